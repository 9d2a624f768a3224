//! Serial driver abstraction
//!
//! A driver delivers `SerialEvent`s over a bounded queue and hands out the
//! payload bytes through blocking, size-bounded reads. Two implementations:
//! `InMemorySerial` for tests and programmatic feeding, `StdioSerial` for
//! the host binary (one stdin line = one received chunk).

use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Notification from the serial driver.
///
/// `Data` payloads are held in the driver's receive buffer until the
/// consumer collects them with [`SerialPort::read_exact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialEvent {
    /// `len` bytes are ready to be read.
    Data { len: usize },
    /// The driver's receive buffer overflowed; pending input is suspect.
    BufferFull,
    /// Line break condition. Not acted on.
    Break,
    /// Framing error on the wire. Not acted on.
    FrameError,
}

/// Errors surfaced by serial drivers.
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("serial port disconnected")]
    Disconnected,

    #[error("driver delivered {got} of {expected} announced bytes")]
    ShortRead { expected: usize, got: usize },

    #[error("serial i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Port parameters, mirroring the underlying driver installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub baud_rate: u32,
    /// Receive buffer size; also the upper bound on one chunk.
    pub rx_buffer_len: usize,
    /// Depth of the event delivery queue.
    pub event_queue_depth: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            rx_buffer_len: 2048,
            event_queue_depth: 20,
        }
    }
}

/// Byte-level access to an installed serial driver.
///
/// `read_exact` blocks until `buf` is filled; the driver contract is that a
/// `Data { len }` event is only delivered once `len` bytes are available, so
/// a well-behaved driver never blocks the consumer for long.
pub trait SerialPort {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SerialError>;
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError>;
    /// Discard all pending receive data.
    fn flush_input(&mut self) -> Result<(), SerialError>;
}

/// In-memory driver for tests and programmatic input.
///
/// The port half moves into the consumer; the [`InMemorySerialHandle`] stays
/// with the caller to feed chunks, raise overruns, observe transmitted
/// bytes, and close the delivery queue (the shutdown trigger).
pub struct InMemorySerial {
    rx: Arc<Mutex<VecDeque<u8>>>,
    tx: Arc<Mutex<Vec<u8>>>,
}

pub struct InMemorySerialHandle {
    events: Option<mpsc::Sender<SerialEvent>>,
    rx: Arc<Mutex<VecDeque<u8>>>,
    tx: Arc<Mutex<Vec<u8>>>,
}

impl InMemorySerial {
    /// Install the driver, returning the port, its control handle, and the
    /// event delivery queue.
    pub fn install(
        config: &SerialConfig,
    ) -> (Self, InMemorySerialHandle, mpsc::Receiver<SerialEvent>) {
        let (events, queue) = mpsc::channel(config.event_queue_depth);
        let rx = Arc::new(Mutex::new(VecDeque::new()));
        let tx = Arc::new(Mutex::new(Vec::new()));
        let port = Self {
            rx: Arc::clone(&rx),
            tx: Arc::clone(&tx),
        };
        let handle = InMemorySerialHandle {
            events: Some(events),
            rx,
            tx,
        };
        (port, handle, queue)
    }
}

impl SerialPort for InMemorySerial {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SerialError> {
        let mut rx = self.rx.lock().expect("serial rx poisoned");
        if rx.len() < buf.len() {
            let got = rx.len();
            rx.clear();
            return Err(SerialError::ShortRead {
                expected: buf.len(),
                got,
            });
        }
        for slot in buf.iter_mut() {
            *slot = rx.pop_front().expect("length checked above");
        }
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        self.tx
            .lock()
            .expect("serial tx poisoned")
            .extend_from_slice(bytes);
        Ok(())
    }

    fn flush_input(&mut self) -> Result<(), SerialError> {
        self.rx.lock().expect("serial rx poisoned").clear();
        Ok(())
    }
}

impl InMemorySerialHandle {
    /// Queue `bytes` as one received chunk and deliver the matching
    /// `Data` event. Blocks if the event queue is full.
    pub fn push_chunk(&self, bytes: &[u8]) -> Result<(), SerialError> {
        let events = self.events.as_ref().ok_or(SerialError::Disconnected)?;
        self.rx
            .lock()
            .expect("serial rx poisoned")
            .extend(bytes.iter().copied());
        events
            .blocking_send(SerialEvent::Data { len: bytes.len() })
            .map_err(|_| SerialError::Disconnected)
    }

    /// Leave `bytes` in the receive buffer without announcing them,
    /// simulating data stranded by an overrun.
    pub fn push_stale_bytes(&self, bytes: &[u8]) {
        self.rx
            .lock()
            .expect("serial rx poisoned")
            .extend(bytes.iter().copied());
    }

    pub fn push_event(&self, event: SerialEvent) -> Result<(), SerialError> {
        let events = self.events.as_ref().ok_or(SerialError::Disconnected)?;
        events
            .blocking_send(event)
            .map_err(|_| SerialError::Disconnected)
    }

    /// Everything the consumer has transmitted so far.
    pub fn output(&self) -> Vec<u8> {
        self.tx.lock().expect("serial tx poisoned").clone()
    }

    /// Bytes still sitting unread in the receive buffer.
    pub fn pending_input(&self) -> usize {
        self.rx.lock().expect("serial rx poisoned").len()
    }

    /// Close the delivery queue. The consumer drains queued events and then
    /// shuts down.
    pub fn close(&mut self) {
        self.events = None;
    }
}

/// Host driver: each stdin line becomes one received chunk.
///
/// A reader thread feeds the receive buffer and the event queue. Lines
/// longer than the configured receive buffer are dropped with a
/// `BufferFull` event, matching overrun behavior on real hardware. Stdin
/// EOF closes the queue, which shuts the interpreter down.
pub struct StdioSerial {
    rx: Arc<Mutex<VecDeque<u8>>>,
}

impl StdioSerial {
    pub fn install(
        config: &SerialConfig,
    ) -> Result<(Self, mpsc::Receiver<SerialEvent>), SerialError> {
        let (events, queue) = mpsc::channel(config.event_queue_depth);
        let rx = Arc::new(Mutex::new(VecDeque::new()));
        let port = Self {
            rx: Arc::clone(&rx),
        };
        let limit = config.rx_buffer_len;

        std::thread::Builder::new()
            .name("firefly-stdin".into())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(err) => {
                            tracing::error!(%err, "stdin read failed");
                            break;
                        }
                    };
                    if line.is_empty() {
                        continue;
                    }
                    let bytes = line.into_bytes();
                    let event = if bytes.len() > limit {
                        SerialEvent::BufferFull
                    } else {
                        rx.lock()
                            .expect("serial rx poisoned")
                            .extend(bytes.iter().copied());
                        SerialEvent::Data { len: bytes.len() }
                    };
                    if events.blocking_send(event).is_err() {
                        break;
                    }
                }
                // Sender drops here; the consumer sees the queue close.
            })?;

        Ok((port, queue))
    }
}

impl SerialPort for StdioSerial {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SerialError> {
        let mut rx = self.rx.lock().expect("serial rx poisoned");
        if rx.len() < buf.len() {
            let got = rx.len();
            rx.clear();
            return Err(SerialError::ShortRead {
                expected: buf.len(),
                got,
            });
        }
        for slot in buf.iter_mut() {
            *slot = rx.pop_front().expect("length checked above");
        }
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(bytes)?;
        stdout.write_all(b"\n")?;
        stdout.flush()?;
        Ok(())
    }

    fn flush_input(&mut self) -> Result<(), SerialError> {
        self.rx.lock().expect("serial rx poisoned").clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_roundtrip() {
        let config = SerialConfig::default();
        let (mut port, handle, mut queue) = InMemorySerial::install(&config);

        handle.push_chunk(b"print(1)").unwrap();
        let event = queue.blocking_recv().unwrap();
        assert_eq!(event, SerialEvent::Data { len: 8 });

        let mut buf = [0u8; 8];
        port.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"print(1)");
    }

    #[test]
    fn short_read_is_an_error() {
        let config = SerialConfig::default();
        let (mut port, handle, _queue) = InMemorySerial::install(&config);

        handle.push_stale_bytes(b"abc");
        let mut buf = [0u8; 8];
        match port.read_exact(&mut buf) {
            Err(SerialError::ShortRead { expected: 8, got: 3 }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        // The partial data was discarded with the failed read.
        assert_eq!(handle.pending_input(), 0);
    }

    #[test]
    fn flush_discards_pending_input() {
        let config = SerialConfig::default();
        let (mut port, handle, _queue) = InMemorySerial::install(&config);

        handle.push_stale_bytes(b"garbage");
        port.flush_input().unwrap();
        assert_eq!(handle.pending_input(), 0);
    }

    #[test]
    fn close_ends_the_queue() {
        let config = SerialConfig::default();
        let (_port, mut handle, mut queue) = InMemorySerial::install(&config);

        handle.push_chunk(b"1").unwrap();
        handle.close();
        assert!(handle.push_chunk(b"2").is_err());

        // Queued events drain before the close is observed.
        assert_eq!(queue.blocking_recv(), Some(SerialEvent::Data { len: 1 }));
        assert_eq!(queue.blocking_recv(), None);
    }

    #[test]
    fn transmit_is_observable() {
        let config = SerialConfig::default();
        let (mut port, handle, _queue) = InMemorySerial::install(&config);

        port.write_all(b"something was wrong!").unwrap();
        assert_eq!(handle.output(), b"something was wrong!");
    }
}
