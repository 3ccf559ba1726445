//! answerphone-daemon: answering machine controller
//!
//! Runs the answering machine state machine against a storage directory
//! and simulated handset, push-button, microphone and speaker. The
//! panel socket drives the buttons and reports status and events.

mod config;
mod events;
mod feedback;
mod hal;
mod input;
mod ipc;
mod lifecycle;
mod recording;
mod sim;
mod state;
mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::DeviceEvent;
use crate::hal::{Clock, Peripherals, SystemClock};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::recording::wav::playback_duration_ms;
use crate::sim::{SimCaptureQueue, SimPins, SimPlayback, SimTone, SimTransfer};
use crate::state::StateMachine;
use crate::storage::DirStorage;

/// Blocks the capture queue holds before it overruns
const CAPTURE_QUEUE_BLOCKS: usize = 60;

/// Playback channel that plays each file for as long as its audio lasts
fn playback_channel(clock: &Arc<dyn Clock>, storage: &DirStorage) -> SimPlayback {
    let storage = storage.clone();
    SimPlayback::with_durations(Arc::clone(clock), move |name| {
        let mut storage = storage.clone();
        playback_duration_ms(&mut storage, name).unwrap_or_else(|e| {
            warn!(?e, name, "cannot play file");
            0
        })
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "answerphone-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, ?config.storage_root, "configuration loaded");

    let shutdown = ShutdownSignal::new();

    // State machine -> panel server and log
    let (event_tx, _event_rx) = broadcast::channel::<DeviceEvent>(64);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let storage = DirStorage::new(&config.storage_root);
    let pins = SimPins::new(Arc::clone(&clock));
    let peripherals = Peripherals {
        clock: Arc::clone(&clock),
        pins: Box::new(pins.clone()),
        capture: Box::new(SimCaptureQueue::new(Arc::clone(&clock), CAPTURE_QUEUE_BLOCKS)),
        prompts: Box::new(playback_channel(&clock, &storage)),
        recordings: Box::new(playback_channel(&clock, &storage)),
        tone: Box::new(SimTone::new()),
        storage: Box::new(storage),
        transfer: Box::new(SimTransfer::new()),
    };

    let server = Server::new(&config.socket_path, pins, &config.storage_root, event_tx.clone())?;
    let mut event_rx = event_tx.subscribe();

    let mut machine = StateMachine::new(config, peripherals, event_tx, shutdown.halt_flag());

    // The control loop blocks, so it gets its own thread
    let mut control_loop = tokio::task::spawn_blocking(move || machine.run());
    let mut control_loop_done = false;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        result = &mut control_loop => {
            control_loop_done = true;
            match result {
                Ok(Ok(())) => info!("control loop exited"),
                Ok(Err(e)) => error!(?e, "boot failed"),
                Err(e) => error!(?e, "control loop panicked"),
            }
        }

        // Run the panel server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "panel server error");
            }
        }

        // Keep the panel's status in step with the device
        _ = async {
            loop {
                match event_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "device event");
                        server.apply_event(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "device event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("device event handler exited");
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            result?;
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    shutdown.trigger();
    if !control_loop_done {
        match control_loop.await.context("control loop panicked")? {
            Ok(()) => {}
            Err(e) => warn!(?e, "control loop stopped during boot"),
        }
    }
    server.shutdown().await;

    info!("answerphone-daemon stopped");

    Ok(())
}
