use clap::Parser;

fn main() {
    let cli = airlink_lib::console::Cli::parse();
    if let Err(e) = airlink_lib::run(cli) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
