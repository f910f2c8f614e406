// src/io/serial/session.rs
//
// The single serial link. Owns at most one open device, a dedicated blocking
// read thread, and the CONNECTED/DISCONNECTED lifecycle.
//
// Locking:
// - `control` serialises connect/disconnect so two commands never interleave
//   (no double open, no disconnect racing a connect).
// - `state` is held only briefly. The read thread takes it once, on failure,
//   to perform the implicit disconnect.

use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::framer::{decode_dropping_invalid, LineFramer, DEFAULT_MAX_LINE_LENGTH};
use super::transport::{LinkReader, PortOpener, SerialPortOpener};
use crate::io::events::{ClassifiedLine, EventSender, LinkEvent};
use crate::io::{LinkError, LinkState};

// ============================================================================
// Configuration
// ============================================================================

/// Serial line settings for the link. Framing is always 8-N-1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub baud_rate: u32,
    /// Per-read timeout. Bounds how long a disconnect takes to be noticed.
    pub read_timeout_ms: u64,
    /// Bytes buffered without a newline before the line is force-split
    pub max_line_length: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            baud_rate: 115_200,
            read_timeout_ms: 500,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl LinkConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

// ============================================================================
// Session
// ============================================================================

/// Read thread of the current (or last) connection
struct Worker {
    cancel_flag: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct SessionState {
    state: LinkState,
    port: String,
    /// Bumped on every successful connect so a stale read thread can tell
    /// it no longer owns the session
    generation: u64,
    worker: Option<Worker>,
}

struct Shared {
    state: Mutex<SessionState>,
    events: EventSender,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, SessionState>, LinkError> {
        self.state
            .lock()
            .map_err(|e| LinkError::Poisoned(e.to_string()))
    }

    /// Implicit disconnect after a read failure. The handle is already closed.
    /// Does nothing if the operator disconnected first.
    fn fail(&self, generation: u64, cancel_flag: &AtomicBool, cause: String) {
        let mut st = match self.lock() {
            Ok(st) => st,
            Err(e) => {
                tlog!("[link] Cannot record read failure: {}", e);
                return;
            }
        };
        if st.generation != generation
            || st.state != LinkState::Connected
            || cancel_flag.load(Ordering::SeqCst)
        {
            return;
        }

        st.state = LinkState::Disconnected;
        tlog!("[link] {} disconnected after read failure: {}", st.port, cause);
        self.events.emit(LinkEvent::Error {
            cause: LinkError::ReadFailed(cause).to_string(),
        });
        self.events.emit(LinkEvent::StatusChanged {
            state: LinkState::Disconnected,
            port: st.port.clone(),
        });
    }
}

/// The one serial connection of the application.
///
/// `connect` and `disconnect` run on the caller's thread. While connected a
/// dedicated thread reads lines, classifies them, and queues them as events.
pub struct LinkSession {
    config: LinkConfig,
    opener: Box<dyn PortOpener>,
    control: Mutex<()>,
    shared: Arc<Shared>,
}

impl LinkSession {
    pub fn new(config: LinkConfig, opener: impl PortOpener + 'static, events: EventSender) -> Self {
        LinkSession {
            config,
            opener: Box::new(opener),
            control: Mutex::new(()),
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState {
                    state: LinkState::Disconnected,
                    port: String::new(),
                    generation: 0,
                    worker: None,
                }),
                events,
            }),
        }
    }

    /// Session backed by real serial devices
    pub fn serial(config: LinkConfig, events: EventSender) -> Self {
        LinkSession::new(config, SerialPortOpener, events)
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn state(&self) -> LinkState {
        self.shared
            .lock()
            .map(|st| st.state)
            .unwrap_or(LinkState::Disconnected)
    }

    /// Port of the open connection
    pub fn port(&self) -> Option<String> {
        let st = self.shared.lock().ok()?;
        (st.state == LinkState::Connected).then(|| st.port.clone())
    }

    /// Events dropped so far because the consumer fell behind
    pub fn dropped_events(&self) -> u64 {
        self.shared.events.dropped()
    }

    /// Open `port` and start the read thread.
    ///
    /// An empty port or an existing connection is refused without any event.
    /// An open failure is both emitted as an `Error` event and returned; the
    /// session stays disconnected and nothing is retried.
    pub fn connect(&self, port: &str) -> Result<(), LinkError> {
        if port.is_empty() {
            return Err(LinkError::PortUnavailable);
        }

        let _control = self
            .control
            .lock()
            .map_err(|e| LinkError::Poisoned(e.to_string()))?;

        // A read thread that ended on its own is still parked here
        let stale = {
            let mut st = self.shared.lock()?;
            if st.state == LinkState::Connected {
                return Err(LinkError::AlreadyConnected(st.port.clone()));
            }
            st.worker.take()
        };
        if let Some(worker) = stale {
            join_worker(worker);
        }

        let reader = match self.opener.open(port, &self.config) {
            Ok(reader) => reader,
            Err(cause) => {
                let err = LinkError::OpenFailed {
                    port: port.to_string(),
                    cause,
                };
                tlog!("[link] {}", err);
                self.shared.events.emit(LinkEvent::Error {
                    cause: err.to_string(),
                });
                return Err(err);
            }
        };

        tlog!(
            "[link] Opened {} at {} baud (8-N-1), read timeout {} ms",
            port,
            self.config.baud_rate,
            self.config.read_timeout_ms
        );

        let mut st = self.shared.lock()?;
        st.generation += 1;
        st.state = LinkState::Connected;
        st.port = port.to_string();
        self.shared.events.emit(LinkEvent::StatusChanged {
            state: LinkState::Connected,
            port: port.to_string(),
        });

        let cancel_flag = Arc::new(AtomicBool::new(false));
        let thread_ctx = ReadLoop {
            port: port.to_string(),
            generation: st.generation,
            max_line_length: self.config.max_line_length,
            cancel_flag: cancel_flag.clone(),
            shared: self.shared.clone(),
        };
        let spawned = std::thread::Builder::new()
            .name(format!("link-reader-{}", port))
            .spawn(move || thread_ctx.run(reader));

        match spawned {
            Ok(handle) => {
                st.worker = Some(Worker {
                    cancel_flag,
                    handle,
                });
                Ok(())
            }
            Err(e) => {
                // The reader moved into the closure and was dropped with it
                st.state = LinkState::Disconnected;
                let err = LinkError::OpenFailed {
                    port: port.to_string(),
                    cause: format!("failed to start read thread: {}", e),
                };
                tlog!("[link] {}", err);
                self.shared.events.emit(LinkEvent::Error {
                    cause: err.to_string(),
                });
                self.shared.events.emit(LinkEvent::StatusChanged {
                    state: LinkState::Disconnected,
                    port: port.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Close the link. A no-op without events when already disconnected.
    ///
    /// Returns once the read thread has exited and the device is closed,
    /// which takes at most one read timeout.
    pub fn disconnect(&self) -> Result<(), LinkError> {
        let _control = self
            .control
            .lock()
            .map_err(|e| LinkError::Poisoned(e.to_string()))?;
        let st = self.shared.lock()?;
        self.stop(st);
        Ok(())
    }

    /// Cancel and join the read thread. The state lock is released before the
    /// join so a failing read thread can still take it.
    fn stop(&self, mut st: MutexGuard<'_, SessionState>) {
        let was_connected = st.state == LinkState::Connected;
        if let Some(ref worker) = st.worker {
            worker.cancel_flag.store(true, Ordering::SeqCst);
        }
        st.state = LinkState::Disconnected;
        let worker = st.worker.take();
        let port = st.port.clone();
        drop(st);

        if let Some(worker) = worker {
            join_worker(worker);
        }

        if was_connected {
            tlog!("[link] Disconnected from {}", port);
            self.shared.events.emit(LinkEvent::StatusChanged {
                state: LinkState::Disconnected,
                port,
            });
        }
    }
}

impl Drop for LinkSession {
    fn drop(&mut self) {
        // Poisoned or not, the device must be closed
        let _control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        let st = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.stop(st);
    }
}

fn join_worker(worker: Worker) {
    if worker.handle.join().is_err() {
        tlog!("[link] Read thread panicked");
    }
}

// ============================================================================
// Read Loop
// ============================================================================

/// Why the read loop stopped
enum LoopExit {
    /// Operator disconnect
    Stopped,
    /// The device reported end of stream
    Disconnected,
    /// Hard I/O failure
    Failed(String),
}

struct ReadLoop {
    port: String,
    generation: u64,
    max_line_length: usize,
    cancel_flag: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl ReadLoop {
    fn run(self, mut reader: LinkReader) {
        let exit = self.read_lines(&mut reader);

        // Close the device before anyone hears about the disconnect
        drop(reader);

        match exit {
            LoopExit::Stopped => {
                tlog!("[link] Read loop for {} ended (stopped)", self.port);
            }
            LoopExit::Disconnected => {
                tlog!("[link] Read loop for {} ended (disconnected)", self.port);
                self.shared.fail(
                    self.generation,
                    &self.cancel_flag,
                    "device closed the connection".to_string(),
                );
            }
            LoopExit::Failed(cause) => {
                tlog!("[link] Read loop for {} ended (error)", self.port);
                self.shared.fail(self.generation, &self.cancel_flag, cause);
            }
        }
    }

    fn read_lines(&self, reader: &mut LinkReader) -> LoopExit {
        let mut framer = LineFramer::new(self.max_line_length);
        let mut buf = [0u8; 256];

        loop {
            if self.cancel_flag.load(Ordering::SeqCst) {
                return LoopExit::Stopped;
            }

            match reader.read(&mut buf) {
                Ok(0) => return LoopExit::Disconnected,
                Ok(n) => {
                    for raw in framer.feed(&buf[..n]) {
                        self.deliver(&raw);
                    }
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    // No data within the timeout is expected
                }
                Err(e) => {
                    if self.cancel_flag.load(Ordering::SeqCst) {
                        return LoopExit::Stopped;
                    }
                    return LoopExit::Failed(e.to_string());
                }
            }
        }
    }

    fn deliver(&self, raw: &[u8]) {
        let text = decode_dropping_invalid(raw);
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.shared
            .events
            .emit(LinkEvent::from_line(ClassifiedLine::new(text)));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::events::event_channel;

    struct RefusingOpener;

    impl PortOpener for RefusingOpener {
        fn open(&self, _port: &str, _config: &LinkConfig) -> Result<LinkReader, String> {
            Err("Access is denied.".to_string())
        }
    }

    /// Device that never sends anything and records when it is closed
    struct IdleOpener {
        closed: Arc<AtomicBool>,
    }

    struct IdleReader {
        closed: Arc<AtomicBool>,
    }

    impl Read for IdleReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(5));
            Err(ErrorKind::TimedOut.into())
        }
    }

    impl Drop for IdleReader {
        fn drop(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    impl PortOpener for IdleOpener {
        fn open(&self, _port: &str, _config: &LinkConfig) -> Result<LinkReader, String> {
            Ok(Box::new(IdleReader {
                closed: self.closed.clone(),
            }))
        }
    }

    #[test]
    fn test_drop_closes_device_despite_poisoned_state() {
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = event_channel(8);
        let session = LinkSession::new(
            LinkConfig::default(),
            IdleOpener {
                closed: closed.clone(),
            },
            tx,
        );
        session.connect("COM3").unwrap();

        let shared = session.shared.clone();
        let poisoner = std::thread::spawn(move || {
            let _guard = shared.state.lock().unwrap();
            panic!("panic while holding the session state");
        });
        assert!(poisoner.join().is_err());

        assert!(matches!(session.disconnect(), Err(LinkError::Poisoned(_))));
        assert!(!closed.load(Ordering::SeqCst));

        drop(session);
        assert!(closed.load(Ordering::SeqCst));
        let events = rx.drain();
        assert_eq!(
            events.last(),
            Some(&LinkEvent::StatusChanged {
                state: LinkState::Disconnected,
                port: "COM3".to_string(),
            })
        );
    }

    #[test]
    fn test_default_config_is_115200_half_second_timeout() {
        let config = LinkConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.max_line_length, 4096);
        assert_eq!(config.read_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_connect_empty_port_is_refused_without_events() {
        let (tx, mut rx) = event_channel(8);
        let session = LinkSession::new(LinkConfig::default(), RefusingOpener, tx);

        assert_eq!(session.connect(""), Err(LinkError::PortUnavailable));
        assert_eq!(session.state(), LinkState::Disconnected);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_open_failure_emits_error_and_stays_disconnected() {
        let (tx, mut rx) = event_channel(8);
        let session = LinkSession::new(LinkConfig::default(), RefusingOpener, tx);

        let err = session.connect("COM9").unwrap_err();
        assert!(matches!(err, LinkError::OpenFailed { .. }));
        assert_eq!(session.state(), LinkState::Disconnected);
        assert_eq!(session.port(), None);

        let events = rx.drain();
        assert_eq!(
            events,
            vec![LinkEvent::Error {
                cause: "Error opening COM9: Access is denied.".to_string()
            }]
        );
    }

    #[test]
    fn test_disconnect_when_disconnected_is_silent() {
        let (tx, mut rx) = event_channel(8);
        let session = LinkSession::new(LinkConfig::default(), RefusingOpener, tx);

        session.disconnect().unwrap();
        session.disconnect().unwrap();
        assert_eq!(session.state(), LinkState::Disconnected);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_deliver_trims_and_skips_blank_lines() {
        let (tx, mut rx) = event_channel(8);
        let ctx = ReadLoop {
            port: "COM1".to_string(),
            generation: 1,
            max_line_length: 64,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState {
                    state: LinkState::Connected,
                    port: "COM1".to_string(),
                    generation: 1,
                    worker: None,
                }),
                events: tx,
            }),
        };

        ctx.deliver(b"  \r");
        ctx.deliver(b"\t Ping 7 \r");
        ctx.deliver(b"temp=21\xff\r");

        let events = rx.drain();
        assert_eq!(events.len(), 2);
        match &events[0] {
            LinkEvent::Ping { line } => assert_eq!(line.text(), "Ping 7"),
            other => panic!("unexpected event {:?}", other),
        }
        match &events[1] {
            LinkEvent::Message { line } => assert_eq!(line.text(), "temp=21"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
