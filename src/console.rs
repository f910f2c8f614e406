// src/console.rs
//
// Terminal front end: operator commands (list ports, connect, disconnect) and
// a line-oriented renderer for the message and ping channels.

use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use crate::io::{
    event_channel, list_ports, ClassifiedLine, EventSink, LinkError, LinkEvent, LinkSession,
    LinkState, PortDescriptor, PortDirectory,
};
use crate::logging;
use crate::settings::{self, AppSettings};

// ============================================================================
// Command Line
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "airlink", version, about = "AirLink receiver console")]
pub struct Cli {
    /// Settings file (defaults to <config dir>/AirLink/settings.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Mirror diagnostics into a timestamped log file in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available serial ports
    Ports {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Connect and stream classified telemetry until Ctrl-C
    Monitor(MonitorArgs),
    /// Print the effective settings
    Config,
}

#[derive(Args, Debug, Default)]
pub struct MonitorArgs {
    /// Port to open; defaults to the first port found
    #[arg(short, long)]
    pub port: Option<String>,

    /// Baud rate override
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Per-read timeout override in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Do not render the ping/pong channel
    #[arg(long)]
    pub hide_pings: bool,

    /// Emit one JSON event per line instead of text
    #[arg(long)]
    pub json: bool,
}

/// Parse the command line and run it
pub fn run(cli: Cli) -> Result<(), String> {
    let settings_path = cli
        .config
        .clone()
        .unwrap_or_else(settings::default_settings_path);
    let mut app_settings = settings::load_settings(&settings_path)?;
    if cli.log_dir.is_some() {
        app_settings.log_dir = cli.log_dir.clone();
    }
    if let Some(ref dir) = app_settings.log_dir {
        logging::init_file_logging(dir)?;
    }

    let result = match cli.command {
        Command::Ports { json } => print_ports(&list_ports(), json, &mut std::io::stdout()),
        Command::Config => toml::to_string_pretty(&app_settings)
            .map_err(|e| format!("Failed to serialize settings: {}", e))
            .map(|text| print!("{}", text)),
        Command::Monitor(args) => {
            apply_overrides(&mut app_settings, &args);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| format!("Failed to start runtime: {}", e))?;
            runtime.block_on(monitor(app_settings, args))
        }
    };

    logging::stop_file_logging();
    result
}

fn apply_overrides(app_settings: &mut AppSettings, args: &MonitorArgs) {
    if let Some(baud) = args.baud {
        app_settings.serial.baud_rate = baud;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        app_settings.serial.read_timeout_ms = timeout_ms;
    }
    if args.hide_pings {
        app_settings.show_pings = false;
    }
}

// ============================================================================
// Commands
// ============================================================================

fn print_ports(ports: &[PortDescriptor], json: bool, out: &mut impl Write) -> Result<(), String> {
    let text = if json {
        serde_json::to_string_pretty(ports)
            .map_err(|e| format!("Failed to serialize ports: {}", e))?
    } else if ports.is_empty() {
        "No serial ports found".to_string()
    } else {
        ports.iter().map(describe_port).collect::<Vec<_>>().join("\n")
    };
    writeln!(out, "{}", text).map_err(|e| format!("Failed to write output: {}", e))
}

fn describe_port(port: &PortDescriptor) -> String {
    let mut line = format!("{}  {}", port.port_name, port.kind);
    let label: Vec<&str> = [port.manufacturer.as_deref(), port.product.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    if !label.is_empty() {
        line.push_str(&format!("  {}", label.join(" ")));
    }
    if let Some(id) = port.usb_id {
        line.push_str(&format!(" ({})", id));
    }
    line
}

async fn monitor(app_settings: AppSettings, args: MonitorArgs) -> Result<(), String> {
    let (tx, mut rx) = event_channel(app_settings.event_queue_capacity);
    let session = LinkSession::serial(app_settings.serial.clone(), tx);
    let mut directory = PortDirectory::system();
    if let Some(ref port) = args.port {
        directory.select(port.clone());
    }

    let mut sink = ConsoleSink::new(std::io::stdout(), app_settings.show_pings, args.json);
    sink.banner();

    let mut refresh = tokio::time::interval(Duration::from_secs(
        app_settings.port_refresh_interval_secs.max(1),
    ));
    let mut drain = tokio::time::interval(Duration::from_millis(
        app_settings.drain_interval_ms.max(1),
    ));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut connected_once = false;
    let mut announced_wait = false;

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tlog!("[console] Interrupted");
                break Ok(());
            }
            _ = refresh.tick() => {
                directory.refresh();
                if connected_once {
                    continue;
                }
                match session.connect(directory.selected()) {
                    Ok(()) => connected_once = true,
                    Err(LinkError::PortUnavailable) => {
                        if !announced_wait {
                            sink.notice("No COM port selected. Waiting for a serial port...");
                            announced_wait = true;
                        }
                    }
                    // No retry. An open failure is also queued as an error event.
                    Err(e) => break Err(e.to_string()),
                }
            }
            _ = drain.tick() => {
                for event in rx.drain() {
                    sink.render(&event);
                }
                if link_went_down(&sink, connected_once, session.state()) {
                    break Err("Serial link lost".to_string());
                }
            }
        }
    };

    tokio::task::block_in_place(|| session.disconnect()).map_err(|e| e.to_string())?;
    for event in rx.drain() {
        sink.render(&event);
    }
    if session.dropped_events() > 0 {
        tlog!(
            "[console] {} events dropped while the console was busy",
            session.dropped_events()
        );
    }
    outcome
}

/// The link dropped on its own, judged from the rendered events or, failing
/// that, from the session itself
fn link_went_down<W: Write>(
    sink: &ConsoleSink<W>,
    connected_once: bool,
    state: LinkState,
) -> bool {
    sink.link_lost() || (connected_once && state == LinkState::Disconnected)
}

// ============================================================================
// Renderer
// ============================================================================

/// Renders link events as `[HH:MM:SS] text` lines, or as JSON
pub struct ConsoleSink<W: Write> {
    out: W,
    show_pings: bool,
    json: bool,
    connected: bool,
    link_lost: bool,
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W, show_pings: bool, json: bool) -> Self {
        ConsoleSink {
            out,
            show_pings,
            json,
            connected: false,
            link_lost: false,
        }
    }

    /// True once the link dropped without the operator asking.
    /// An error event always precedes that status change.
    pub fn link_lost(&self) -> bool {
        self.link_lost
    }

    pub fn banner(&mut self) {
        if self.json {
            return;
        }
        self.write_line("Awaiting mission data...");
        if self.show_pings {
            self.write_line("Monitoring link heartbeat...");
        }
    }

    pub fn notice(&mut self, text: &str) {
        if !self.json {
            let clock = now_clock();
            self.write_line(&format!("[{}] {}", clock, text));
        }
    }

    pub fn render(&mut self, event: &LinkEvent) {
        if let LinkEvent::Error { .. } = event {
            if self.connected {
                self.link_lost = true;
            }
        }

        if !self.json {
            self.dispatch(event);
            return;
        }

        match event {
            LinkEvent::Ping { .. } if !self.show_pings => {}
            LinkEvent::StatusChanged { state, .. } => {
                self.connected = *state == LinkState::Connected;
                self.write_json(event);
            }
            _ => self.write_json(event),
        }
    }

    fn write_json(&mut self, event: &LinkEvent) {
        match serde_json::to_string(event) {
            Ok(json) => self.write_line(&json),
            Err(e) => tlog!("[console] Failed to serialize event: {}", e),
        }
    }

    fn write_line(&mut self, text: &str) {
        if let Err(e) = writeln!(self.out, "{}", text) {
            tlog!("[console] Failed to write output: {}", e);
        }
    }
}

impl<W: Write> EventSink for ConsoleSink<W> {
    fn on_message(&mut self, line: &ClassifiedLine) {
        let text = format!("[{}] {}", line.clock(), line.text());
        self.write_line(&text);
    }

    fn on_ping(&mut self, line: &ClassifiedLine) {
        if self.show_pings {
            let text = format!("[{}] PING {}", line.clock(), line.text());
            self.write_line(&text);
        }
    }

    fn on_status_change(&mut self, state: LinkState, port: &str) {
        self.connected = state == LinkState::Connected;
        let text = match state {
            LinkState::Connected => format!("Connected to {}", port),
            LinkState::Disconnected => "Disconnected.".to_string(),
        };
        self.notice(&text);
    }

    fn on_error(&mut self, cause: &str) {
        self.notice(cause);
    }
}

fn now_clock() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{PortKind, UsbId};

    fn rendered(sink: ConsoleSink<Vec<u8>>) -> Vec<String> {
        String::from_utf8(sink.out)
            .unwrap()
            .lines()
            .map(|l| l.to_string())
            .collect()
    }

    /// Drop the leading "[HH:MM:SS] "
    fn strip_clock(line: &str) -> &str {
        &line[11..]
    }

    fn status(state: LinkState) -> LinkEvent {
        LinkEvent::StatusChanged {
            state,
            port: "COM3".to_string(),
        }
    }

    #[test]
    fn test_text_rendering_per_channel() {
        let mut sink = ConsoleSink::new(Vec::new(), true, false);
        sink.render(&status(LinkState::Connected));
        sink.render(&LinkEvent::from_line(ClassifiedLine::new("Hello")));
        sink.render(&LinkEvent::from_line(ClassifiedLine::new("Ping 1")));
        sink.render(&status(LinkState::Disconnected));

        let lines = rendered(sink);
        let bodies: Vec<&str> = lines.iter().map(|l| strip_clock(l)).collect();
        assert_eq!(
            bodies,
            vec!["Connected to COM3", "Hello", "PING Ping 1", "Disconnected."]
        );
        assert!(lines[0].starts_with('['));
    }

    #[test]
    fn test_hidden_pings_are_not_rendered() {
        let mut sink = ConsoleSink::new(Vec::new(), false, false);
        sink.render(&LinkEvent::from_line(ClassifiedLine::new("Pong 2")));
        sink.render(&LinkEvent::from_line(ClassifiedLine::new("Hello")));
        let lines = rendered(sink);
        assert_eq!(lines.len(), 1);
        assert_eq!(strip_clock(&lines[0]), "Hello");
    }

    #[test]
    fn test_error_while_connected_marks_link_lost() {
        let mut sink = ConsoleSink::new(Vec::new(), true, false);
        sink.render(&LinkEvent::Error {
            cause: "Error opening COM3: busy".to_string(),
        });
        assert!(!sink.link_lost());

        sink.render(&status(LinkState::Connected));
        sink.render(&LinkEvent::Error {
            cause: "Serial error: unplugged".to_string(),
        });
        assert!(sink.link_lost());
    }

    #[test]
    fn test_operator_disconnect_is_not_link_loss() {
        let mut sink = ConsoleSink::new(Vec::new(), true, true);
        sink.render(&status(LinkState::Connected));
        sink.render(&status(LinkState::Disconnected));
        assert!(!sink.link_lost());
    }

    #[test]
    fn test_session_state_reveals_link_loss_without_events() {
        let sink = ConsoleSink::new(Vec::new(), true, false);
        assert!(!link_went_down(&sink, false, LinkState::Disconnected));
        assert!(!link_went_down(&sink, true, LinkState::Connected));
        // The error and status events never reached the console
        assert!(link_went_down(&sink, true, LinkState::Disconnected));
    }

    #[test]
    fn test_json_rendering() {
        let mut sink = ConsoleSink::new(Vec::new(), false, true);
        sink.banner();
        sink.render(&LinkEvent::from_line(ClassifiedLine::with_timestamp("Ping 9", 5)));
        sink.render(&LinkEvent::from_line(ClassifiedLine::with_timestamp("Hello", 6)));

        let lines = rendered(sink);
        assert_eq!(lines.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["event"], "message");
        assert_eq!(value["line"]["text"], "Hello");
    }

    #[test]
    fn test_banner_mentions_heartbeat_only_with_pings() {
        let mut sink = ConsoleSink::new(Vec::new(), false, false);
        sink.banner();
        assert_eq!(rendered(sink), vec!["Awaiting mission data..."]);
    }

    #[test]
    fn test_print_ports() {
        let mut usb = PortDescriptor::named("/dev/ttyUSB0");
        usb.kind = PortKind::Usb;
        usb.manufacturer = Some("FTDI".to_string());
        usb.product = Some("FT232R".to_string());
        usb.usb_id = Some(UsbId {
            vid: 0x0403,
            pid: 0x6001,
        });

        let mut out = Vec::new();
        print_ports(&[usb, PortDescriptor::named("COM1")], false, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "/dev/ttyUSB0  USB  FTDI FT232R (0403:6001)\nCOM1  Unknown\n"
        );

        let mut out = Vec::new();
        print_ports(&[], false, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "No serial ports found\n");
    }

    #[test]
    fn test_cli_parses_monitor_overrides() {
        let cli = Cli::parse_from([
            "airlink",
            "monitor",
            "--port",
            "COM3",
            "--baud",
            "9600",
            "--hide-pings",
        ]);
        let Command::Monitor(args) = cli.command else {
            panic!("expected monitor");
        };
        let mut app_settings = AppSettings::default();
        apply_overrides(&mut app_settings, &args);
        assert_eq!(args.port.as_deref(), Some("COM3"));
        assert_eq!(app_settings.serial.baud_rate, 9600);
        assert!(!app_settings.show_pings);
        assert_eq!(app_settings.serial.read_timeout_ms, 500);
    }
}
