//! Background tasks that drain one of the child's output streams.

use std::io;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, warn};

/// Longest line kept from a child stream, excluding the newline
pub(crate) const MAX_LINE_LENGTH: usize = 64 * 1024;

/// One unit of child output
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Frame {
    Line(String),
    /// A line longer than `limit` bytes; its content is dropped
    Overlong { limit: usize },
}

/// Newline framing that never fails on content.
///
/// Bytes that are not UTF-8 are replaced rather than ending the stream, and a
/// line past `max_length` is reported once as [`Frame::Overlong`] and then
/// skipped up to its newline.
pub(crate) struct LossyLinesCodec {
    max_length: usize,
    next_index: usize,
    discarding: bool,
}

impl LossyLinesCodec {
    pub(crate) fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for LossyLinesCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        loop {
            let read_to = src.len().min(self.max_length.saturating_add(1));
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            match (self.discarding, newline) {
                (true, Some(end)) => {
                    src.advance(end + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(end)) => {
                    let line = src.split_to(end + 1);
                    self.next_index = 0;
                    return Ok(Some(Frame::Line(decode_line(&line[..end]))));
                }
                (false, None) if src.len() > self.max_length => {
                    self.discarding = true;
                    self.next_index = 0;
                    return Ok(Some(Frame::Overlong {
                        limit: self.max_length,
                    }));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        self.next_index = 0;
        if src.is_empty() || self.discarding {
            src.clear();
            return Ok(None);
        }

        // Last line without a trailing newline
        let line = src.split_to(src.len());
        Ok(Some(Frame::Line(decode_line(&line))))
    }
}

/// Runs `on_frame` for every line of `reader` until end-of-stream.
///
/// Read errors end the loop like EOF does. `on_frame` returns `false` to stop
/// reading early.
pub(crate) async fn for_each_line<R, F>(reader: R, on_frame: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(Frame) -> bool,
{
    for_each_line_with_limit(reader, MAX_LINE_LENGTH, on_frame).await
}

pub(crate) async fn for_each_line_with_limit<R, F>(reader: R, max_length: usize, mut on_frame: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(Frame) -> bool,
{
    let mut frames = FramedRead::new(reader, LossyLinesCodec::new(max_length));
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(frame) => {
                if !on_frame(frame) {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Stream read failed; treating as end of stream");
                break;
            }
        }
    }
}

/// A spawned watcher task
pub(crate) struct Watcher {
    name: &'static str,
    task: Option<JoinHandle<()>>,
}

impl Watcher {
    pub(crate) fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            task: Some(tokio::spawn(future)),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Waits for the task to end, aborting it if it outlives `grace`.
    ///
    /// A stream can stay open past the child's exit when a grandchild inherited it.
    pub(crate) async fn join(&mut self, grace: Duration) {
        let Some(mut task) = self.task.take() else {
            return;
        };

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => debug!(watcher = self.name, "Watcher finished"),
            Ok(Err(e)) => warn!(watcher = self.name, error = %e, "Watcher task failed"),
            Err(_) => {
                warn!(
                    watcher = self.name,
                    grace_ms = grace.as_millis() as u64,
                    "Watcher still reading after process exit; aborting it"
                );
                task.abort();
            }
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
