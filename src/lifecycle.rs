//! Forwards host visibility and suspension signals to the timer.
//!
//! The platform side only has to push `LifecycleEvent`s into the channel; the timer never
//! polls for them.

use anyhow::{Context, Result};
use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::timer::{Reconciliation, TimerController};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Visible,
    Hidden,
    /// Process is about to be frozen by the host.
    Frozen,
    /// Process was thawed after a freeze.
    Resumed,
}

impl LifecycleEvent {
    pub fn is_visible(self) -> bool {
        matches!(self, LifecycleEvent::Visible | LifecycleEvent::Resumed)
    }
}

pub struct LifecycleBridge {
    handle: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
    sender: mpsc::UnboundedSender<LifecycleEvent>,
}

impl LifecycleBridge {
    /// `on_reconciled` sees the outcome of every forwarded event.
    pub fn spawn<F>(timer: TimerController, on_reconciled: F) -> Self
    where
        F: Fn(LifecycleEvent, Reconciliation) + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<LifecycleEvent>();
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = receiver.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                debug!("Lifecycle event {event:?}");
                let reconciliation = timer.handle_visibility_change(event.is_visible()).await;
                on_reconciled(event, reconciliation);
            }
            info!("Lifecycle bridge stopped");
        });

        Self {
            handle: Some(handle),
            cancel_token,
            sender,
        }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<LifecycleEvent> {
        self.sender.clone()
    }

    /// Stops forwarding and waits for the task. Safe to call more than once.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("lifecycle bridge task failed to join")
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, SessionStore};
    use crate::timer::TimerConfig;

    #[tokio::test]
    async fn forwards_events_in_order() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        let config = TimerConfig {
            tick_interval: None,
            ..TimerConfig::for_device("dev-1")
        };
        let timer = TimerController::new(store, clock.clone(), config);
        let id = timer.start("flow", None).await.unwrap();
        clock.advance(1_000);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut bridge = LifecycleBridge::spawn(timer.clone(), move |event, reconciliation| {
            sink.lock().unwrap().push((event, reconciliation));
        });
        let sender = bridge.sender();

        sender.send(LifecycleEvent::Frozen).unwrap();
        // Give the bridge a turn so the freeze is observed before the clock jumps.
        while seen.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
        clock.advance(120_000);
        sender.send(LifecycleEvent::Resumed).unwrap();
        while seen.lock().unwrap().len() < 2 {
            tokio::task::yield_now().await;
        }

        bridge.shutdown().await.unwrap();
        bridge.shutdown().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, LifecycleEvent::Frozen);
        assert_eq!(seen[1].0, LifecycleEvent::Resumed);
        assert_eq!(seen[1].1.gap_ms, 120_000);
        assert!(seen[1].1.notable);
        assert_eq!(seen[1].1.elapsed_after_ms, 121_000);
        assert_eq!(timer.get_state().session_id, Some(id));
        assert!(sender.send(LifecycleEvent::Visible).is_err());
    }

    #[test]
    fn maps_events_to_visibility() {
        assert!(LifecycleEvent::Visible.is_visible());
        assert!(LifecycleEvent::Resumed.is_visible());
        assert!(!LifecycleEvent::Hidden.is_visible());
        assert!(!LifecycleEvent::Frozen.is_visible());
    }
}
