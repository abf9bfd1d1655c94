//! Push-driven cache of per-participation submission state.
//!
//! Every participation has one `watch` sender holding its [`TrackedSubmission`]. The
//! first `track` opens a subscription on the participation topic; the last `untrack`
//! cancels it. The cached value outlives the subscription, so tracking again within
//! the same session starts from what was last seen.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use util::config::DEFAULT_RESULT_ETA_MS;

use crate::api::SubmissionApi;
use crate::channel::{MessageChannel, wait_connected};
use crate::error::ChannelError;
use crate::eta::ResultEtaEstimator;
use crate::events::{PushEvent, SubmissionUpdate, UpdateKind, parse_frame};
use crate::topics::participation_topic;
use crate::types::{ParticipationId, SubmissionId, SubmissionState, TrackedSubmission};

/// Read side of the store as seen by aggregators and coordinators.
#[async_trait]
pub trait SubmissionStateSource: Send + Sync + 'static {
    /// Starts (or joins) tracking and returns a watch that already holds the last known value.
    async fn track(&self, participation_id: ParticipationId) -> watch::Receiver<TrackedSubmission>;

    /// Releases one `track`. Extra calls are no-ops.
    fn untrack(&self, participation_id: ParticipationId);

    /// Last known value, the cold value for never-seen participations.
    fn current(&self, participation_id: ParticipationId) -> TrackedSubmission;
}

#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Extra time past the ETA after which a still-building submission counts as failed.
    /// `None` disables the timeout.
    pub result_grace: Option<Duration>,
}

/// Applies one update to the current value.
///
/// Returns `None` when the update is older than what is stored. Updates with the same
/// or a newer timestamp win.
pub(crate) fn reconcile(
    current: &TrackedSubmission,
    update: &SubmissionUpdate,
) -> Option<TrackedSubmission> {
    if update.at < current.updated_at {
        return None;
    }
    let state = match update.kind {
        UpdateKind::Created => SubmissionState::PendingSubmissionBuilding,
        UpdateKind::ResultReceived => SubmissionState::NoPendingSubmission,
        UpdateKind::Failed => SubmissionState::PendingSubmissionFailed,
    };
    Some(TrackedSubmission {
        state,
        submission: Some(update.submission.clone()),
        updated_at: update.at,
    })
}

struct Entry {
    tx: watch::Sender<TrackedSubmission>,
    refs: usize,
    subscription: Option<CancellationToken>,
}

impl Entry {
    fn new() -> Self {
        Self {
            tx: watch::Sender::new(TrackedSubmission::default()),
            refs: 0,
            subscription: None,
        }
    }
}

struct Inner {
    channel: Arc<dyn MessageChannel>,
    api: Option<Arc<dyn SubmissionApi>>,
    eta: Option<ResultEtaEstimator>,
    options: StoreOptions,
    entries: Mutex<HashMap<ParticipationId, Entry>>,
}

/// Single source of truth for "is this participation currently building".
#[derive(Clone)]
pub struct SubmissionStateStore {
    inner: Arc<Inner>,
}

pub struct StoreBuilder {
    channel: Arc<dyn MessageChannel>,
    api: Option<Arc<dyn SubmissionApi>>,
    eta: Option<ResultEtaEstimator>,
    options: StoreOptions,
}

impl StoreBuilder {
    /// Refresh from the REST snapshot after every (re)subscription.
    pub fn api(mut self, api: Arc<dyn SubmissionApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Forward ETA hints carried by participation frames.
    pub fn eta(mut self, eta: ResultEtaEstimator) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> SubmissionStateStore {
        SubmissionStateStore {
            inner: Arc::new(Inner {
                channel: self.channel,
                api: self.api,
                eta: self.eta,
                options: self.options,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }
}

/// Releases a `track` whose caller went away before it resolved.
struct PendingTrack<'a> {
    store: &'a SubmissionStateStore,
    participation_id: ParticipationId,
    armed: bool,
}

impl Drop for PendingTrack<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(
                "track of participation {} dropped before subscribing",
                self.participation_id
            );
            self.store.untrack(self.participation_id);
        }
    }
}

impl SubmissionStateStore {
    pub fn new(channel: Arc<dyn MessageChannel>) -> Self {
        Self::builder(channel).build()
    }

    pub fn builder(channel: Arc<dyn MessageChannel>) -> StoreBuilder {
        StoreBuilder {
            channel,
            api: None,
            eta: None,
            options: StoreOptions::default(),
        }
    }

    /// Starts (or joins) tracking `participation_id`.
    ///
    /// The returned watch holds the last known value right away. The first tracker
    /// waits for the first subscription attempt, so frames broadcast after this call
    /// resolves are observed. Dropping the future before it resolves releases the
    /// tracker again.
    pub async fn track(&self, participation_id: ParticipationId) -> watch::Receiver<TrackedSubmission> {
        let (rx, first_attempt) = {
            let mut entries = self.inner.entries();
            let entry = entries.entry(participation_id).or_insert_with(Entry::new);
            entry.refs += 1;
            let first_attempt = match entry.subscription {
                Some(_) => None,
                None => {
                    let token = CancellationToken::new();
                    entry.subscription = Some(token.clone());
                    let (ready_tx, ready_rx) = oneshot::channel();
                    tokio::spawn(run_subscription(
                        Arc::clone(&self.inner),
                        participation_id,
                        participation_topic(participation_id),
                        token,
                        ready_tx,
                    ));
                    Some(ready_rx)
                }
            };
            (entry.tx.subscribe(), first_attempt)
        };

        if let Some(ready) = first_attempt {
            let mut pending = PendingTrack {
                store: self,
                participation_id,
                armed: true,
            };
            // Err only when the task ended early; the cached value is served either way.
            let _ = ready.await;
            pending.armed = false;
        }
        rx
    }

    /// Releases one `track`. At zero the push subscription is cancelled; the cached
    /// value is kept.
    pub fn untrack(&self, participation_id: ParticipationId) {
        let mut entries = self.inner.entries();
        let Some(entry) = entries.get_mut(&participation_id) else {
            debug!("untrack of never-tracked participation {participation_id} ignored");
            return;
        };
        if entry.refs == 0 {
            debug!("participation {participation_id} is already untracked");
            return;
        }
        entry.refs -= 1;
        if entry.refs == 0 {
            if let Some(token) = entry.subscription.take() {
                token.cancel();
            }
            info!("Released push subscription for participation {participation_id}");
        }
    }

    pub fn current(&self, participation_id: ParticipationId) -> TrackedSubmission {
        self.inner
            .entries()
            .get(&participation_id)
            .map(|e| e.tx.borrow().clone())
            .unwrap_or_default()
    }

    /// Number of outstanding `track` calls for the participation.
    pub fn tracker_count(&self, participation_id: ParticipationId) -> usize {
        self.inner
            .entries()
            .get(&participation_id)
            .map(|e| e.refs)
            .unwrap_or(0)
    }
}

#[async_trait]
impl SubmissionStateSource for SubmissionStateStore {
    async fn track(&self, participation_id: ParticipationId) -> watch::Receiver<TrackedSubmission> {
        SubmissionStateStore::track(self, participation_id).await
    }

    fn untrack(&self, participation_id: ParticipationId) {
        SubmissionStateStore::untrack(self, participation_id)
    }

    fn current(&self, participation_id: ParticipationId) -> TrackedSubmission {
        SubmissionStateStore::current(self, participation_id)
    }
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, HashMap<ParticipationId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_frame(self: &Arc<Self>, participation_id: ParticipationId, topic: &str, raw: &str) {
        match parse_frame(raw) {
            Ok(PushEvent::Submission(update)) => {
                if update.submission.participation_id != participation_id {
                    warn!(
                        "Dropping frame on '{topic}' for participation {}",
                        update.submission.participation_id
                    );
                    return;
                }
                if let (Some(eta), Some(eta_ms)) = (&self.eta, update.eta_ms) {
                    eta.record_hint(eta_ms);
                }
                self.apply(participation_id, update);
            }
            Ok(PushEvent::Eta { eta_ms }) => {
                if let Some(eta) = &self.eta {
                    eta.record_hint(eta_ms);
                }
            }
            Ok(PushEvent::Ignored { event }) => debug!("Ignoring '{event}' on '{topic}'"),
            Err(e) => warn!("Dropping malformed frame on '{topic}': {e}"),
        }
    }

    /// The only write path for a tracked value. Returns whether the value changed.
    fn apply(self: &Arc<Self>, participation_id: ParticipationId, update: SubmissionUpdate) -> bool {
        let mut now_building = None;
        let changed = {
            let entries = self.entries();
            let Some(entry) = entries.get(&participation_id) else {
                return false;
            };
            entry.tx.send_if_modified(|current| match reconcile(current, &update) {
                Some(next) if next != *current => {
                    if next.is_building() {
                        now_building = Some(next.updated_at);
                    }
                    *current = next;
                    true
                }
                Some(_) => false,
                None => {
                    debug!(
                        "Discarding stale {:?} for participation {participation_id} ({} < {})",
                        update.kind, update.at, current.updated_at
                    );
                    false
                }
            })
        };

        if let (Some(at), Some(grace)) = (now_building, self.options.result_grace) {
            let eta_ms = update
                .eta_ms
                .or_else(|| self.eta.as_ref().map(ResultEtaEstimator::eta_ms))
                .unwrap_or(DEFAULT_RESULT_ETA_MS);
            let wait = Duration::from_millis(eta_ms) + grace;
            let inner = Arc::clone(self);
            let submission_id = update.submission.id;
            tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                inner.expire(participation_id, submission_id, at, wait);
            });
        }
        changed
    }

    /// Marks a submission failed if it is still the one building since `at`.
    fn expire(
        &self,
        participation_id: ParticipationId,
        submission_id: SubmissionId,
        at: chrono::DateTime<chrono::Utc>,
        waited: Duration,
    ) {
        let entries = self.entries();
        let Some(entry) = entries.get(&participation_id) else {
            return;
        };
        let expired = entry.tx.send_if_modified(|current| {
            let same = current.is_building()
                && current.updated_at == at
                && current.submission.as_ref().map(|s| s.id) == Some(submission_id);
            if same {
                current.state = SubmissionState::PendingSubmissionFailed;
            }
            same
        });
        if expired {
            warn!(
                "No result for submission {submission_id} of participation {participation_id} after {waited:?}; marking it failed"
            );
        }
    }

    async fn refresh_snapshot(self: &Arc<Self>, participation_id: ParticipationId) {
        let Some(api) = &self.api else {
            return;
        };
        let before = self
            .entries()
            .get(&participation_id)
            .map(|e| e.tx.borrow().updated_at);

        match api.latest_pending_submission(participation_id).await {
            Ok(Some(submission)) => {
                self.apply(participation_id, SubmissionUpdate::from_pending_snapshot(submission));
            }
            Ok(None) => {
                let entries = self.entries();
                let Some(entry) = entries.get(&participation_id) else {
                    return;
                };
                // Only settle when no frame arrived while the request was in flight.
                let settled = entry.tx.send_if_modified(|current| {
                    let untouched = Some(current.updated_at) == before;
                    if untouched && current.pending().is_some() {
                        current.state = SubmissionState::NoPendingSubmission;
                        true
                    } else {
                        false
                    }
                });
                if settled {
                    info!("Participation {participation_id} has no pending submission any more");
                }
            }
            Err(e) => warn!(
                "Could not refresh the pending submission of participation {participation_id}: {e}"
            ),
        }
    }
}

async fn run_subscription(
    inner: Arc<Inner>,
    participation_id: ParticipationId,
    topic: String,
    token: CancellationToken,
    ready: oneshot::Sender<()>,
) {
    let mut connection = inner.channel.connection();
    let mut ready = Some(ready);

    loop {
        if ready.is_none() {
            let up = tokio::select! {
                _ = token.cancelled() => return,
                up = wait_connected(&mut connection) => up,
            };
            if !up {
                return;
            }
        }

        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = inner.channel.subscribe(&topic) => result,
        };
        if let Some(ready) = ready.take() {
            let _ = ready.send(());
        }

        let mut rx = match result {
            Ok(rx) => rx,
            Err(ChannelError::Disconnected) => {
                debug!("'{topic}' waits for the push connection");
                continue;
            }
            Err(e) => {
                warn!("Participation {participation_id} keeps its cached state: {e}");
                return;
            }
        };

        if token.is_cancelled() {
            inner.channel.unsubscribe(&topic).await;
            return;
        }
        debug!("Subscribed to '{topic}'");
        inner.refresh_snapshot(participation_id).await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    inner.channel.unsubscribe(&topic).await;
                    return;
                }
                msg = rx.recv() => match msg {
                    Ok(raw) => inner.handle_frame(participation_id, &topic, &raw),
                    Err(RecvError::Lagged(n)) => {
                        warn!("'{topic}' skipped {n} frames; refreshing from the server");
                        inner.refresh_snapshot(participation_id).await;
                    }
                    Err(RecvError::Closed) => {
                        info!("'{topic}' closed; serving cached state until reconnect");
                        break;
                    }
                }
            }
        }
    }
}
