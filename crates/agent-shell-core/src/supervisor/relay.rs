//! Output relay from the backend's pipes.

use super::events::SupervisorEvent;
use crate::config::SupervisorConfig;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Fan-out of supervisor events to any number of subscribers.
///
/// Each subscriber has its own unbounded queue, so a slow reader never
/// blocks the relay and never sees events out of order.
#[derive(Debug, Default)]
pub struct EventHub {
    listeners: Mutex<Vec<mpsc::UnboundedSender<SupervisorEvent>>>,
}

impl EventHub {
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SupervisorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber, dropping closed ones.
    pub fn emit(&self, event: SupervisorEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<SupervisorEvent>>> {
        // A panicking subscriber must not silence the backend
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Decodes a byte stream as UTF-8 without splitting multibyte characters.
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    carry: Vec<u8>,
}

impl Utf8Chunker {
    /// Decode `bytes`, holding back an incomplete trailing sequence.
    ///
    /// Invalid sequences are replaced with U+FFFD.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let split = incomplete_tail_start(&self.carry);
        let tail = self.carry.split_off(split);
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry = tail;
        text
    }

    /// Decode whatever is still held back.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

/// Index where a trailing, still-incomplete UTF-8 sequence starts.
fn incomplete_tail_start(bytes: &[u8]) -> usize {
    let len = bytes.len();
    // A sequence is at most 4 bytes, so only the last 3 can be a dangling prefix
    for back in 1..=len.min(3) {
        let idx = len - back;
        let byte = bytes[idx];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => return len,
        };
        return if back < needed { idx } else { len };
    }
    len
}

/// Forward stdout chunks as [`SupervisorEvent::Output`] until EOF.
pub(crate) async fn relay_stdout<R>(mut reader: R, hub: &EventHub)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; SupervisorConfig::RELAY_READ_BUFFER];
    let mut chunker = Utf8Chunker::default();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = chunker.push(&buf[..n]);
                if !text.is_empty() {
                    hub.emit(SupervisorEvent::Output { text });
                }
            }
            Err(e) => {
                warn!("Error reading backend stdout: {}", e);
                break;
            }
        }
    }

    let rest = chunker.finish();
    if !rest.is_empty() {
        hub.emit(SupervisorEvent::Output { text: rest });
    }
    debug!("Backend stdout closed");
}

/// Log stderr lines as diagnostics. They never reach subscribers.
pub(crate) async fn relay_stderr<R>(reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                if !text.is_empty() {
                    warn!(target: "backend", "{}", text);
                }
            }
            Err(e) => {
                warn!("Error reading backend stderr: {}", e);
                break;
            }
        }
    }
    debug!("Backend stderr closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunker_carries_split_character() {
        let bytes = "완료".as_bytes();
        let mut chunker = Utf8Chunker::default();

        let first = chunker.push(&bytes[..2]);
        let second = chunker.push(&bytes[2..4]);
        let third = chunker.push(&bytes[4..]);

        assert_eq!(first, "");
        assert_eq!(second, "완");
        assert_eq!(third, "료");
        assert_eq!(chunker.finish(), "");
    }

    #[test]
    fn test_chunker_ascii_passthrough() {
        let mut chunker = Utf8Chunker::default();
        assert_eq!(chunker.push(b"hello"), "hello");
        assert_eq!(chunker.push(b""), "");
    }

    #[test]
    fn test_chunker_invalid_bytes_replaced() {
        let mut chunker = Utf8Chunker::default();
        assert_eq!(chunker.push(&[b'a', 0xff, b'b']), "a\u{fffd}b");
        // Truncated sequence at end of stream
        assert_eq!(chunker.push(&[0xe2, 0x82]), "");
        assert_eq!(chunker.finish(), "\u{fffd}");
    }

    #[test]
    fn test_incomplete_tail_start() {
        assert_eq!(incomplete_tail_start(b"abc"), 3);
        assert_eq!(incomplete_tail_start(&[b'a', 0xe2]), 1);
        assert_eq!(incomplete_tail_start(&[b'a', 0xe2, 0x82]), 1);
        assert_eq!(incomplete_tail_start(&[b'a', 0xe2, 0x82, 0xac]), 4);
        assert_eq!(incomplete_tail_start(&[0xf0, 0x9f, 0x98]), 0);
    }

    #[test]
    fn test_hub_drops_closed_subscribers() {
        let hub = EventHub::default();
        let mut kept = hub.subscribe();
        drop(hub.subscribe());

        hub.emit(SupervisorEvent::Started { pid: 1 });
        assert_eq!(hub.lock().len(), 1);
        assert_eq!(kept.try_recv().unwrap(), SupervisorEvent::Started { pid: 1 });
    }

    #[tokio::test]
    async fn test_relay_stdout_preserves_order() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe();
        let data: &[u8] = "A\nB\n결과<END_OF_TASK>".as_bytes();

        relay_stdout(data, &hub).await;

        let mut text = String::new();
        while let Ok(SupervisorEvent::Output { text: chunk }) = rx.try_recv() {
            text.push_str(&chunk);
        }
        assert_eq!(text, "A\nB\n결과<END_OF_TASK>");
    }

    #[tokio::test]
    async fn test_relay_stderr_emits_nothing() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe();
        relay_stderr(&b"Traceback (most recent call last):\n"[..]).await;
        assert!(rx.try_recv().is_err());
    }
}
