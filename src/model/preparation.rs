use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{Context, Result};
use log::{error, info};
use thiserror::Error;

use super::{prepare_model, DisplayModel, ModelSource};
use crate::events::PreparationEvent;
use crate::partition::PartitionLimits;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PreparationError {
    #[error("This model is only wireframes and cannot be displayed.")]
    WireframeOnly,
    #[error("This model has no renderable geometry.")]
    NoRenderableGeometry,
    #[error("This model is empty.")]
    Empty,
    #[error("Model is too large.")]
    TooLarge,
    #[error("Initialization cancelled.")]
    Cancelled,
    #[error("This model is corrupt and cannot be displayed.")]
    Corrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparationOptions {
    pub limits: PartitionLimits,
    pub compute_missing_normals: bool,
}

impl Default for PreparationOptions {
    fn default() -> Self {
        Self { limits: PartitionLimits::default(), compute_missing_normals: true }
    }
}

/// Shared flag; clones observe the same cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Raised by the host when the platform reports low memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryPressure(Arc<AtomicBool>);

impl MemoryPressure {
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreparationSignals {
    pub cancel: CancellationToken,
    pub memory: MemoryPressure,
}

impl PreparationSignals {
    /// Polled between objects.
    pub fn check(&self) -> Result<(), PreparationError> {
        if self.cancel.is_cancelled() {
            Err(PreparationError::Cancelled)
        } else if self.memory.is_raised() {
            Err(PreparationError::TooLarge)
        } else {
            Ok(())
        }
    }
}

/// Runs [`prepare_model`] on a named worker thread and streams [`PreparationEvent`]s back.
pub struct PreparationTask {
    signals: PreparationSignals,
    rx: mpsc::Receiver<PreparationEvent>,
    handle: thread::JoinHandle<Result<DisplayModel, PreparationError>>,
}

impl PreparationTask {
    pub fn spawn(source: ModelSource, options: PreparationOptions) -> Result<Self> {
        let signals = PreparationSignals::default();
        let (tx, rx) = mpsc::channel();
        let worker_signals = signals.clone();
        let handle = thread::Builder::new()
            .name("model-preparation".to_string())
            .spawn(move || {
                let progress_tx = tx.clone();
                let result = prepare_model(source, &options, &worker_signals, |fraction| {
                    let _ = progress_tx.send(PreparationEvent::Progress(fraction));
                });
                let event = match &result {
                    Ok(model) => {
                        let stats = model.statistics();
                        PreparationEvent::Succeeded {
                            mesh_count: stats.mesh_count,
                            triangle_count: stats.triangle_count,
                        }
                    }
                    Err(err) => PreparationEvent::Failed(*err),
                };
                let _ = tx.send(event);
                result
            })
            .context("Failed to spawn model preparation thread")?;
        Ok(Self { signals, rx, handle })
    }

    pub fn signals(&self) -> &PreparationSignals {
        &self.signals
    }

    pub fn cancel(&self) {
        info!("[model] cancelling preparation");
        self.signals.cancel.cancel();
    }

    pub fn memory_warning(&self) {
        self.signals.memory.raise();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Events received since the last call, oldest first.
    pub fn drain(&self) -> Vec<PreparationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Blocks until the worker finishes. A panicking worker reports the model as corrupt.
    pub fn wait(self) -> Result<DisplayModel, PreparationError> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => {
                error!("[model] preparation thread panicked");
                Err(PreparationError::Corrupt)
            }
        }
    }
}
