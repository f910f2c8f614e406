// Must come first so `tlog!` is visible to every module below
#[macro_use]
mod logging;

pub mod console;
pub mod io;
pub mod settings;

pub use logging::{init_file_logging, stop_file_logging};

/// Run the AirLink console for already-parsed arguments
pub fn run(cli: console::Cli) -> Result<(), String> {
    console::run(cli)
}
