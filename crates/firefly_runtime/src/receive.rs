//! Receive loop
//!
//! Turns asynchronous delivery notifications into synchronous, serialized
//! execution cycles. Runs on the dedicated consumer thread; it is the only
//! consumer of the delivery queue and the only reader/writer of the working
//! buffer. Queue closure is the shutdown signal.

use firefly_hal::serial::{SerialEvent, SerialPort};
use firefly_script::runtime::{ExecutionOutcome, ScriptRuntime};
use tokio::sync::mpsc::Receiver;

/// Fixed diagnostic echoed to the serial peer when a chunk fails to parse.
pub const PARSE_FAILURE_NOTICE: &[u8] = b"something was wrong!";

/// Prefix for runtime-failure reports on the serial channel.
pub const RUNTIME_FAILURE_PREFIX: &str = "script error: ";

pub struct ReceiveLoop<S: SerialPort> {
    queue: Receiver<SerialEvent>,
    port: S,
    runtime: ScriptRuntime,
    /// Working buffer; zeroed before each data event is serviced and never
    /// read past the event's announced length.
    buffer: Box<[u8]>,
}

impl<S: SerialPort> ReceiveLoop<S> {
    pub fn new(
        queue: Receiver<SerialEvent>,
        port: S,
        runtime: ScriptRuntime,
        chunk_capacity: usize,
    ) -> Self {
        Self {
            queue,
            port,
            runtime,
            buffer: vec![0u8; chunk_capacity].into_boxed_slice(),
        }
    }

    /// Block on the delivery queue until it closes, servicing one event at
    /// a time. Consumes the loop; the engine is torn down on return.
    pub fn run(mut self) {
        while let Some(event) = self.queue.blocking_recv() {
            match event {
                SerialEvent::Data { len } => self.service_data(len),
                SerialEvent::BufferFull => self.recover_overrun(),
                other => tracing::trace!(?other, "ignoring serial event"),
            }
        }
        tracing::info!("delivery queue closed, receive loop exiting");
    }

    /// One execution cycle. Failures here abandon the cycle, never the
    /// loop.
    fn service_data(&mut self, len: usize) {
        if len > self.buffer.len() {
            tracing::warn!(
                len,
                capacity = self.buffer.len(),
                "announced chunk exceeds the working buffer, truncating"
            );
        }
        let len = len.min(self.buffer.len());

        self.buffer.fill(0);
        if let Err(err) = self.port.read_exact(&mut self.buffer[..len]) {
            tracing::error!(%err, "driver read failed, abandoning cycle");
            return;
        }

        match self.runtime.execute(&self.buffer[..len]) {
            Ok(ExecutionOutcome::Completed) => {}
            Ok(ExecutionOutcome::ParseError { diagnostic }) => {
                tracing::warn!(%diagnostic, "chunk failed to parse");
                self.report(PARSE_FAILURE_NOTICE);
            }
            Ok(ExecutionOutcome::RuntimeError { diagnostic }) => {
                tracing::warn!(%diagnostic, "chunk failed at runtime");
                self.report(format!("{RUNTIME_FAILURE_PREFIX}{diagnostic}").as_bytes());
            }
            Err(err) => {
                tracing::error!(%err, "engine failure, abandoning cycle");
            }
        }
    }

    fn report(&mut self, notice: &[u8]) {
        if let Err(err) = self.port.write_all(notice) {
            tracing::error!(%err, "failed to report over serial");
        }
    }

    /// Flush the driver's pending input and discard already-delivered
    /// events, the queue-reset analog. Partially received data is not
    /// salvaged.
    fn recover_overrun(&mut self) {
        tracing::warn!("receive buffer overrun, flushing input and resetting the queue");
        if let Err(err) = self.port.flush_input() {
            tracing::error!(%err, "input flush failed during overrun recovery");
        }
        while let Ok(event) = self.queue.try_recv() {
            tracing::trace!(?event, "event discarded during overrun recovery");
        }
    }
}
