//! Session termination guard
//!
//! Hosts deliver termination through [`LifecycleSignals`]: an abortable
//! [`LifecycleSignal::BeforeUnload`] followed by a final
//! [`LifecycleSignal::Unload`]. Either one triggers cleanup, because a host
//! may skip the abortable one. Only guest sessions are released; the
//! persisted attachment is cleared before the detach request goes out, and
//! the guard never waits for that request.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::controller::AttendanceController;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleSignal {
    /// Termination requested; the host may still abort it
    BeforeUnload,
    /// Termination is happening
    Unload,
}

/// Broadcast source of lifecycle signals
#[derive(Debug, Clone)]
pub struct LifecycleSignals {
    tx: broadcast::Sender<LifecycleSignal>,
}

impl Default for LifecycleSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleSignals {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Deliver `signal` to every listener, returning how many received it
    pub fn emit(&self, signal: LifecycleSignal) -> usize {
        self.tx.send(signal).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleSignal> {
        self.tx.subscribe()
    }

    /// Map the process interrupt to `BeforeUnload` then `Unload`
    pub fn forward_ctrl_c(&self) -> JoinHandle<()> {
        let signals = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, emitting termination signals");
                    signals.emit(LifecycleSignal::BeforeUnload);
                    signals.emit(LifecycleSignal::Unload);
                }
                Err(e) => warn!(error = %e, "Failed to listen for interrupt"),
            }
        })
    }
}

#[derive(Debug)]
pub struct SessionGuard {
    controller: Arc<AttendanceController>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SessionGuard {
    pub fn new(controller: Arc<AttendanceController>) -> Self {
        Self {
            controller,
            listener: Mutex::new(None),
        }
    }

    /// Start listening on `signals`. Registering twice keeps the first listener.
    pub fn register(&self, signals: &LifecycleSignals) {
        let mut listener = self.listener.lock();
        if listener.as_ref().map_or(false, |task| !task.is_finished()) {
            debug!("Session guard already registered");
            return;
        }

        let mut rx = signals.subscribe();
        let controller = self.controller.clone();
        *listener = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(signal) => {
                        release(&controller, signal);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session guard lagged behind lifecycle signals");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
        debug!("Session guard registered");
    }

    /// Stop listening. Called on explicit logout.
    pub fn unregister(&self) {
        if let Some(task) = self.listener.lock().take() {
            task.abort();
            debug!("Session guard unregistered");
        }
    }

    pub fn is_registered(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    /// Run termination cleanup for `signal` directly. Returns the handle of
    /// the best-effort detach when one was issued.
    pub fn handle(&self, signal: LifecycleSignal) -> Option<JoinHandle<()>> {
        release(&self.controller, signal)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.unregister();
    }
}

fn release(controller: &AttendanceController, signal: LifecycleSignal) -> Option<JoinHandle<()>> {
    let handle = controller.release_on_termination();
    if handle.is_some() {
        info!(?signal, "Session guard released guest attachment");
    } else {
        debug!(?signal, "Session guard found nothing to release");
    }
    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_listeners_reaches_nobody() {
        let signals = LifecycleSignals::new();
        assert_eq!(signals.emit(LifecycleSignal::Unload), 0);
    }

    #[tokio::test]
    async fn subscribers_see_both_signals_in_order() {
        let signals = LifecycleSignals::new();
        let mut rx = signals.subscribe();

        signals.emit(LifecycleSignal::BeforeUnload);
        signals.emit(LifecycleSignal::Unload);

        assert_eq!(rx.recv().await.unwrap(), LifecycleSignal::BeforeUnload);
        assert_eq!(rx.recv().await.unwrap(), LifecycleSignal::Unload);
    }
}
