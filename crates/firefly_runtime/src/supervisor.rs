//! Lifecycle supervision
//!
//! Owns the one-time startup sequence: spawn the consumer thread,
//! initialize the scripting runtime on it (the engine context is not
//! `Send`), install the capability table, then hand the thread to the
//! receive loop. Startup failures are reported back over a one-shot
//! channel before the supervisor declares boot complete.

use std::thread::JoinHandle;

use firefly_hal::serial::{SerialEvent, SerialPort};
use firefly_script::capability::{self, CapabilityHost, RegistrationError};
use firefly_script::runtime::{ScriptError, ScriptRuntime};
use thiserror::Error;
use tokio::sync::mpsc::Receiver;
use tokio::sync::oneshot;

use crate::receive::ReceiveLoop;
use crate::settings::Settings;

/// Fatal startup conditions. None of these can occur once boot completes.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to initialize the scripting engine: {0}")]
    Engine(#[from] ScriptError),

    #[error("failed to register native capabilities: {0}")]
    Registration(#[from] RegistrationError),

    #[error("failed to spawn the receive-consumer thread: {0}")]
    Thread(#[from] std::io::Error),

    #[error("receive-consumer thread exited during startup")]
    ConsumerVanished,
}

pub struct Supervisor {
    consumer: JoinHandle<()>,
}

impl Supervisor {
    /// Boot the interpreter. Blocks until the consumer thread has either
    /// finished its startup sequence or failed it.
    pub fn start<S>(
        settings: &Settings,
        port: S,
        queue: Receiver<SerialEvent>,
        host: CapabilityHost,
    ) -> Result<Self, StartupError>
    where
        S: SerialPort + Send + 'static,
    {
        let limits = settings.engine.clone();
        let chunk_capacity = settings.serial.rx_buffer_len;
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), StartupError>>();

        let consumer = std::thread::Builder::new()
            .name("firefly-consumer".into())
            .stack_size(settings.supervisor.consumer_stack_bytes)
            .spawn(move || {
                let runtime = match ScriptRuntime::new(&limits) {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.into()));
                        return;
                    }
                };
                if let Err(err) = capability::register(&runtime, &host) {
                    let _ = ready_tx.send(Err(err.into()));
                    return;
                }
                if ready_tx.send(Ok(())).is_err() {
                    // The supervisor gave up waiting; don't start the loop.
                    return;
                }
                tracing::info!("receive loop starting");
                ReceiveLoop::new(queue, port, runtime, chunk_capacity).run();
            })?;

        match ready_rx.blocking_recv() {
            Ok(Ok(())) => {
                tracing::info!("interpreter boot complete");
                Ok(Self { consumer })
            }
            Ok(Err(err)) => {
                let _ = consumer.join();
                Err(err)
            }
            Err(_) => {
                let _ = consumer.join();
                Err(StartupError::ConsumerVanished)
            }
        }
    }

    /// Wait for the receive loop to finish. The delivery queue must close
    /// first (drop the driver handle); when this returns, queued events
    /// have been drained and the engine has been torn down.
    pub fn join(self) -> std::thread::Result<()> {
        self.consumer.join()
    }
}
