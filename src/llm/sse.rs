//! Server-Sent Events parsing for provider responses
//!
//! Buffers raw bytes, splits lines on `\n` (tolerating `\r\n`), and assembles
//! `data:` lines into one payload per event. Other fields are ignored since
//! completion providers only use `data`.

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Stream of SSE `data` payloads assembled from a byte stream
pub struct SseDataStream<S> {
    inner: S,
    buffer: Vec<u8>,
    data: Vec<String>,
    done: bool,
}

impl<S> SseDataStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            data: Vec::new(),
            done: false,
        }
    }

    /// Pop one complete line off the buffer, without its terminator
    fn next_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|b| *b == b'\n')?;
        let rest = self.buffer.split_off(newline + 1);
        let mut line = std::mem::replace(&mut self.buffer, rest);
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Feed one line; returns a payload when the line closes an event
    fn consume_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.take_event();
        }
        if let Some(data) = line.strip_prefix("data:") {
            self.data
                .push(data.strip_prefix(' ').unwrap_or(data).to_string());
        }
        // Comments (`:`), `event:`, `id:` and `retry:` carry nothing we use
        None
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data).join("\n"))
        }
    }
}

impl<S, B, E> Stream for SseDataStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    type Item = Result<String, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            while let Some(line) = self.next_line() {
                if let Some(payload) = self.consume_line(&line) {
                    return Poll::Ready(Some(Ok(payload)));
                }
            }

            if self.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.buffer.extend_from_slice(bytes.as_ref());
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    self.done = true;
                    // A final line without a trailing newline still counts
                    if !self.buffer.is_empty() {
                        let tail = String::from_utf8_lossy(&std::mem::take(&mut self.buffer))
                            .trim_end_matches('\r')
                            .to_string();
                        self.consume_line(&tail);
                    }
                    if let Some(payload) = self.take_event() {
                        return Poll::Ready(Some(Ok(payload)));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
