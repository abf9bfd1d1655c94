//! Shared estimate of how long a queued build takes to produce a result.

use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::channel::{MessageChannel, wait_connected};
use crate::error::ChannelError;
use crate::events::{PushEvent, parse_frame};
use crate::topics::exercise_topic;
use crate::types::ExerciseId;

/// Last-write-wins relay of the server's result ETA in milliseconds.
///
/// The value never decays; the server keeps pushing fresh estimates while builds are
/// queued.
#[derive(Clone)]
pub struct ResultEtaEstimator {
    tx: Arc<watch::Sender<u64>>,
}

impl ResultEtaEstimator {
    pub fn new(initial_eta_ms: u64) -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(initial_eta_ms)),
        }
    }

    /// Watch the current estimate. The current value is readable immediately.
    pub fn current_eta_ms(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    pub fn eta_ms(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn record_hint(&self, eta_ms: u64) {
        self.tx.send_if_modified(|current| {
            if *current == eta_ms {
                return false;
            }
            *current = eta_ms;
            true
        });
    }

    /// Relays ETA signals pushed on the exercise topic until the guard is dropped.
    pub fn watch_exercise(
        &self,
        channel: Arc<dyn MessageChannel>,
        exercise_id: ExerciseId,
    ) -> DropGuard {
        let token = CancellationToken::new();
        tokio::spawn(relay(
            self.clone(),
            channel,
            exercise_topic(exercise_id),
            token.clone(),
        ));
        token.drop_guard()
    }
}

async fn relay(
    eta: ResultEtaEstimator,
    channel: Arc<dyn MessageChannel>,
    topic: String,
    token: CancellationToken,
) {
    let mut connection = channel.connection();
    loop {
        let connected = tokio::select! {
            _ = token.cancelled() => return,
            up = wait_connected(&mut connection) => up,
        };
        if !connected {
            return;
        }

        let mut rx = match channel.subscribe(&topic).await {
            Ok(rx) => rx,
            Err(ChannelError::Disconnected) => continue,
            Err(e) => {
                warn!("ETA relay not started: {e}");
                return;
            }
        };
        info!("Relaying build ETA from '{topic}'");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    channel.unsubscribe(&topic).await;
                    return;
                }
                msg = rx.recv() => match msg {
                    Ok(raw) => match parse_frame(&raw) {
                        Ok(PushEvent::Eta { eta_ms }) => eta.record_hint(eta_ms),
                        Ok(PushEvent::Submission(update)) => {
                            if let Some(eta_ms) = update.eta_ms {
                                eta.record_hint(eta_ms);
                            }
                        }
                        Ok(PushEvent::Ignored { event }) => debug!("Ignoring '{event}' on '{topic}'"),
                        Err(e) => warn!("Dropping malformed frame on '{topic}': {e}"),
                    },
                    Err(RecvError::Lagged(n)) => warn!("ETA relay on '{topic}' skipped {n} frames"),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}
