//! Firefly binary
//!
//! Host rendition of the interpreter: stdin stands in for the serial
//! receive path (one line = one delivered chunk), stdout carries serial
//! replies, and the light pin is the in-memory driver with its transitions
//! visible in the debug log.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use firefly_hal::console::StdoutSink;
use firefly_hal::gpio::{MemoryPin, PinId};
use firefly_hal::serial::StdioSerial;
use firefly_runtime::settings::Settings;
use firefly_runtime::supervisor::Supervisor;
use firefly_script::capability::CapabilityHost;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Firefly v{}", firefly_runtime::VERSION);
    let settings = Settings::load_or_default(Path::new("firefly.json"))?;
    tracing::debug!(?settings, "settings resolved");

    let (port, queue) = StdioSerial::install(&settings.serial)?;
    let host = CapabilityHost {
        console: Arc::new(Mutex::new(StdoutSink)),
        light: Arc::new(Mutex::new(MemoryPin::new(PinId(settings.light.pin)))),
    };

    // Boot blocks on the consumer thread's startup handshake.
    let boot_settings = settings.clone();
    let supervisor = tokio::task::spawn_blocking(move || {
        Supervisor::start(&boot_settings, port, queue, host)
    })
    .await??;
    tracing::info!("ready; one program per line");

    let mut consumer_done = tokio::task::spawn_blocking(move || supervisor.join());
    let mut liveness = tokio::time::interval(Duration::from_millis(
        settings.supervisor.liveness_interval_ms,
    ));

    loop {
        tokio::select! {
            _ = liveness.tick() => {
                tracing::trace!("alive");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
            result = &mut consumer_done => {
                match result {
                    Ok(Ok(())) => tracing::info!("serial input closed, shutting down"),
                    Ok(Err(_)) => tracing::error!("receive-consumer thread panicked"),
                    Err(err) => tracing::error!(%err, "consumer watch task failed"),
                }
                break;
            }
        }
    }

    Ok(())
}
