//! Timer-driven scan and sync loop.
//!
//! A producer scans the store on an interval and hands each snapshot to a
//! consumer task over a capacity-1 channel. A scan that finishes while the
//! previous sync is still running waits on the handoff, so at most one
//! snapshot is ever queued and a slow database backpressures the scanner
//! instead of piling up batches.
//!
//! Shutdown is cooperative: on cancellation the producer stops ticking and
//! closes the channel, the consumer drains whatever is already queued, and
//! observers see the state move through `Draining` to `Stopped`.

use crate::scanner::Scanner;
use crate::sync::Synchronizer;
use imgsrv_db::Image;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Stopped,
}

pub struct Pipeline {
    scanner: Arc<Scanner>,
    sync: Synchronizer,
    interval: Duration,
    cancel: CancellationToken,
    state: watch::Sender<PipelineState>,
}

impl Pipeline {
    pub fn new(
        scanner: Arc<Scanner>,
        sync: Synchronizer,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            scanner,
            sync,
            interval,
            cancel,
            state,
        }
    }

    /// Observe state transitions, e.g. to wait for `Stopped` in tests.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// One immediate scan-and-load, run before the listener opens so the
    /// catalog is populated when the first request arrives.
    pub async fn initial_load(&self) {
        match self.snapshot().await {
            Some(snapshot) => match self.sync.sync(&snapshot).await {
                Ok(changed) => info!(total = snapshot.len(), changed, "initial catalog load"),
                Err(err) => error!(error = %err, "initial catalog load failed"),
            },
            None => error!("initial scan failed"),
        }
    }

    /// Run the scan loop until the cancellation token fires, then drain.
    pub async fn run(self) {
        let _ = self.state.send(PipelineState::Running);

        let (tx, rx) = mpsc::channel::<Vec<Image>>(1);
        let consumer = tokio::spawn(consume(self.sync.clone(), rx));

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; initial_load already ran.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("stopping image scan");
                    break;
                }
                _ = ticker.tick() => {
                    let Some(snapshot) = self.snapshot().await else {
                        continue;
                    };
                    // Suspends here while the previous batch is still being
                    // synced; cancellation is observed on the next loop turn.
                    if tx.send(snapshot).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = self.state.send(PipelineState::Draining);
        drop(tx);
        if let Err(err) = consumer.await {
            error!(error = %err, "sync consumer task failed");
        }
        let _ = self.state.send(PipelineState::Stopped);
    }

    /// Scan on the blocking pool; walking a large store must not stall the
    /// runtime.
    async fn snapshot(&self) -> Option<Vec<Image>> {
        let scanner = Arc::clone(&self.scanner);
        match tokio::task::spawn_blocking(move || scanner.scan()).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                error!(error = %err, "scan task failed");
                None
            }
        }
    }
}

async fn consume(sync: Synchronizer, mut rx: mpsc::Receiver<Vec<Image>>) {
    while let Some(snapshot) = rx.recv().await {
        debug!(count = snapshot.len(), "syncing snapshot");
        if let Err(err) = sync.sync(&snapshot).await {
            // A failed batch is dropped; the next tick produces a fresh one.
            error!(error = %err, "snapshot sync failed");
        }
    }
}
