//! The stdin/stdout handshake with the server process.
//!
//! The child reports `STARTED`, `FATAL <message>` or `STOPPED` on stdout, one
//! per line, and accepts a single `STOP` line on stdin. Anything else it
//! prints on stdout is a protocol violation and is handled like `FATAL`.

use crate::sink::SharedSink;
use crate::watcher::{Frame, Watcher, for_each_line};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

const STOP_COMMAND: &[u8] = b"STOP\n";

/// Distilled state of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Starting,
    Started,
    Error,
    Stopped,
}

type ControlInput = Box<dyn AsyncWrite + Unpin + Send + Sync>;

/// What a single stdout line means for the handshake
#[derive(Debug, Clone, PartialEq)]
enum Signal {
    Started,
    Stopped,
    Fatal,
    Unexpected,
}

fn parse(line: &str) -> Signal {
    if line.starts_with("STARTED") {
        Signal::Started
    } else if line.starts_with("FATAL") {
        Signal::Fatal
    } else if line.starts_with("STOPPED") {
        Signal::Stopped
    } else {
        Signal::Unexpected
    }
}

/// Write side of the handshake. Shared between the watcher task, which closes
/// it on failure, and the orchestrator, which closes it on `stop`.
#[derive(Clone)]
struct ControlChannel {
    input: Arc<Mutex<Option<ControlInput>>>,
}

impl ControlChannel {
    async fn send_stop(&self) {
        let Some(mut input) = self.input.lock().await.take() else {
            return;
        };

        // The child may already be gone; a broken pipe here is expected.
        if let Err(e) = input.write_all(STOP_COMMAND).await {
            debug!(error = %e, "Could not send STOP to server process");
        } else if let Err(e) = input.flush().await {
            debug!(error = %e, "Could not flush STOP to server process");
        }
        if let Err(e) = input.shutdown().await {
            debug!(error = %e, "Closing server process stdin failed");
        }
    }

    async fn is_open(&self) -> bool {
        self.input.lock().await.is_some()
    }
}

/// Runs the handshake on a dedicated task and publishes its state
pub struct Controller {
    channel: ControlChannel,
    state: watch::Receiver<ControllerState>,
    failure: Arc<StdMutex<Option<String>>>,
    watcher: Watcher,
}

impl Controller {
    pub fn spawn<R, W>(stdout: R, stdin: W, sink: SharedSink) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let channel = ControlChannel {
            input: Arc::new(Mutex::new(Some(Box::new(stdin) as ControlInput))),
        };
        let (state_tx, state) = watch::channel(ControllerState::Starting);
        let failure = Arc::new(StdMutex::new(None));

        let watcher = {
            let channel = channel.clone();
            let failure = failure.clone();
            Watcher::spawn("controller", async move {
                let mut failed = false;
                for_each_line(stdout, |frame| {
                    let line = match frame {
                        Frame::Line(line) => line,
                        Frame::Overlong { limit } => format!("<line longer than {limit} bytes>"),
                    };
                    let report = match parse(&line) {
                        Signal::Started => {
                            info!("Server process reported STARTED");
                            state_tx.send_replace(ControllerState::Started);
                            return true;
                        }
                        Signal::Stopped => {
                            info!("Server process reported STOPPED");
                            state_tx.send_replace(ControllerState::Stopped);
                            return true;
                        }
                        Signal::Fatal => format!("server process failed: {line}"),
                        Signal::Unexpected => format!("Unexpected server process output: {line}"),
                    };

                    warn!(line = %line, "Server handshake failed");
                    sink.error(&report);
                    if let Ok(mut slot) = failure.lock() {
                        slot.get_or_insert(line);
                    }
                    state_tx.send_replace(ControllerState::Error);
                    failed = true;
                    false
                })
                .await;

                if failed {
                    channel.send_stop().await;
                }
                debug!("Server stdout closed");
            })
        };

        Self {
            channel,
            state,
            failure,
            watcher,
        }
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// A receiver that is notified on every state change. `changed()` returns an
    /// error once the watcher has stopped reading.
    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.clone()
    }

    /// The first line that put the handshake into `Error`
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|slot| slot.clone())
    }

    pub async fn is_input_open(&self) -> bool {
        self.channel.is_open().await
    }

    /// Send `STOP` and close the child's stdin. Does nothing once stdin is closed.
    pub async fn stop(&self) {
        self.channel.send_stop().await
    }

    pub fn is_finished(&self) -> bool {
        self.watcher.is_finished()
    }

    pub async fn join(&mut self, grace: Duration) {
        self.watcher.join(grace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::{RecordingSink, init_tracing};
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    struct Harness {
        controller: Controller,
        sink: Arc<RecordingSink>,
        child_out: DuplexStream,
        child_in: BufReader<DuplexStream>,
    }

    fn harness() -> Harness {
        init_tracing();
        let sink = Arc::new(RecordingSink::default());
        let (child_out, stdout) = tokio::io::duplex(1024);
        let (stdin, child_in) = tokio::io::duplex(1024);
        let controller = Controller::spawn(stdout, stdin, sink.clone());
        Harness {
            controller,
            sink,
            child_out,
            child_in: BufReader::new(child_in),
        }
    }

    async fn wait_for(controller: &Controller, wanted: ControllerState) {
        let mut rx = controller.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == wanted))
            .await
            .expect("state change timed out")
            .expect("watcher ended before reaching state");
    }

    #[test]
    fn test_parse_handshake_lines() {
        assert_eq!(parse("STARTED"), Signal::Started);
        assert_eq!(parse("STARTED on port 3897"), Signal::Started);
        assert_eq!(parse("FATAL: boom"), Signal::Fatal);
        assert_eq!(parse("STOPPED"), Signal::Stopped);
        assert_eq!(parse("started"), Signal::Unexpected);
        assert_eq!(parse(" STARTED"), Signal::Unexpected);
        assert_eq!(parse(""), Signal::Unexpected);
    }

    #[tokio::test]
    async fn test_started_line_sets_started() {
        let mut h = harness();
        assert_eq!(h.controller.state(), ControllerState::Starting);

        h.child_out.write_all(b"STARTED\n").await.unwrap();
        wait_for(&h.controller, ControllerState::Started).await;

        assert!(h.sink.errors().is_empty());
        assert!(h.controller.failure().is_none());
        assert!(h.controller.is_input_open().await);
    }

    #[tokio::test]
    async fn test_fatal_line_reports_once_and_closes_input() {
        let mut h = harness();

        h.child_out
            .write_all(b"FATAL: Expected failure for testing\n")
            .await
            .unwrap();
        wait_for(&h.controller, ControllerState::Error).await;
        h.controller.join(Duration::from_secs(5)).await;

        let errors = h.sink.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Expected failure for testing"));
        assert_eq!(
            h.controller.failure().as_deref(),
            Some("FATAL: Expected failure for testing")
        );

        // The watcher sent STOP and closed the child's stdin
        let mut line = String::new();
        h.child_in.read_line(&mut line).await.unwrap();
        assert_eq!(line, "STOP\n");
        line.clear();
        assert_eq!(h.child_in.read_line(&mut line).await.unwrap(), 0);
        assert!(!h.controller.is_input_open().await);
    }

    #[tokio::test]
    async fn test_unexpected_output_is_fatal() {
        let mut h = harness();

        h.child_out.write_all(b"hello there\n").await.unwrap();
        wait_for(&h.controller, ControllerState::Error).await;

        assert_eq!(
            h.sink.errors(),
            vec!["Unexpected server process output: hello there"]
        );
        assert_eq!(h.controller.failure().as_deref(), Some("hello there"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_is_fatal() {
        let mut h = harness();

        h.child_out.write_all(b"STARTED\xff\n").await.unwrap();
        wait_for(&h.controller, ControllerState::Started).await;

        let mut h = harness();
        h.child_out.write_all(b"\xffSTARTED\n").await.unwrap();
        wait_for(&h.controller, ControllerState::Error).await;
        assert_eq!(h.controller.failure().as_deref(), Some("\u{FFFD}STARTED"));
    }

    #[tokio::test]
    async fn test_overlong_output_is_fatal() {
        let h = harness();
        let mut child_out = h.child_out;

        let writing = tokio::spawn(async move {
            let mut long_line = vec![b'S'; crate::watcher::MAX_LINE_LENGTH + 1];
            long_line.push(b'\n');
            // The watcher stops reading once it fails, so the write may break off
            let _ = child_out.write_all(&long_line).await;
        });
        wait_for(&h.controller, ControllerState::Error).await;
        writing.abort();

        let expected = format!("<line longer than {} bytes>", crate::watcher::MAX_LINE_LENGTH);
        assert_eq!(h.controller.failure(), Some(expected.clone()));
        assert_eq!(
            h.sink.errors(),
            vec![format!("Unexpected server process output: {expected}")]
        );
    }

    #[tokio::test]
    async fn test_stopped_after_started() {
        let mut h = harness();

        h.child_out.write_all(b"STARTED\n").await.unwrap();
        wait_for(&h.controller, ControllerState::Started).await;
        h.child_out.write_all(b"STOPPED\n").await.unwrap();
        wait_for(&h.controller, ControllerState::Stopped).await;

        assert!(h.sink.errors().is_empty());
    }

    #[tokio::test]
    async fn test_stop_writes_command_once() {
        let mut h = harness();

        h.controller.stop().await;
        h.controller.stop().await;

        let mut line = String::new();
        h.child_in.read_line(&mut line).await.unwrap();
        assert_eq!(line, "STOP\n");
        line.clear();
        assert_eq!(h.child_in.read_line(&mut line).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_end_of_stream_keeps_state() {
        let mut h = harness();

        h.child_out.write_all(b"STARTED\n").await.unwrap();
        wait_for(&h.controller, ControllerState::Started).await;
        drop(h.child_out);

        h.controller.join(Duration::from_secs(5)).await;
        assert!(h.controller.is_finished());
        assert_eq!(h.controller.state(), ControllerState::Started);

        // once the watcher is gone, subscribers see the channel close
        let mut rx = h.controller.subscribe();
        rx.borrow_and_update();
        assert!(rx.changed().await.is_err());
    }
}
