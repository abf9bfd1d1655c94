//! Debounced per-exercise dashboard over the participations' tracked states.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use util::config::DEFAULT_SUMMARY_DEBOUNCE_MS;

use crate::api::ParticipationDirectory;
use crate::error::ApiError;
use crate::store::SubmissionStateSource;
use crate::types::{ExerciseId, ParticipationId, SubmissionState, TrackedSubmission};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(DEFAULT_SUMMARY_DEBOUNCE_MS);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub no_pending: usize,
    pub building: usize,
    pub failed: usize,
}

impl StateCounts {
    pub fn get(&self, state: SubmissionState) -> usize {
        match state {
            SubmissionState::NoPendingSubmission => self.no_pending,
            SubmissionState::PendingSubmissionBuilding => self.building,
            SubmissionState::PendingSubmissionFailed => self.failed,
        }
    }

    pub fn total(&self) -> usize {
        self.no_pending + self.building + self.failed
    }

    fn add(&mut self, state: SubmissionState) {
        match state {
            SubmissionState::NoPendingSubmission => self.no_pending += 1,
            SubmissionState::PendingSubmissionBuilding => self.building += 1,
            SubmissionState::PendingSubmissionFailed => self.failed += 1,
        }
    }
}

/// Read-only projection of the store over one exercise.
///
/// `revision` increases by one with every emission of a live summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExerciseSubmissionSummary {
    pub exercise_id: ExerciseId,
    pub revision: u64,
    pub submissions: BTreeMap<ParticipationId, TrackedSubmission>,
    pub counts: StateCounts,
}

impl ExerciseSubmissionSummary {
    pub fn from_states<I>(exercise_id: ExerciseId, revision: u64, states: I) -> Self
    where
        I: IntoIterator<Item = (ParticipationId, TrackedSubmission)>,
    {
        let submissions: BTreeMap<_, _> = states.into_iter().collect();
        let mut counts = StateCounts::default();
        for tracked in submissions.values() {
            counts.add(tracked.state);
        }
        Self {
            exercise_id,
            revision,
            submissions,
            counts,
        }
    }

    fn from_receivers(
        exercise_id: ExerciseId,
        revision: u64,
        receivers: &[(ParticipationId, watch::Receiver<TrackedSubmission>)],
    ) -> Self {
        Self::from_states(
            exercise_id,
            revision,
            receivers.iter().map(|(pid, rx)| (*pid, rx.borrow().clone())),
        )
    }

    /// Participations currently in `state`, in ascending id order.
    pub fn participations_in(&self, state: SubmissionState) -> Vec<ParticipationId> {
        self.submissions
            .iter()
            .filter(|(_, tracked)| tracked.state == state)
            .map(|(pid, _)| *pid)
            .collect()
    }
}

struct ActiveSummary {
    tx: Arc<watch::Sender<ExerciseSubmissionSummary>>,
    refs: usize,
    token: CancellationToken,
}

struct Inner {
    source: Arc<dyn SubmissionStateSource>,
    directory: Arc<dyn ParticipationDirectory>,
    debounce: Duration,
    active: Mutex<HashMap<ExerciseId, ActiveSummary>>,
}

impl Inner {
    fn active(&self) -> MutexGuard<'_, HashMap<ExerciseId, ActiveSummary>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(&self, exercise_id: ExerciseId) -> Option<watch::Receiver<ExerciseSubmissionSummary>> {
        let mut active = self.active();
        let summary = active.get_mut(&exercise_id)?;
        summary.refs += 1;
        Some(summary.tx.subscribe())
    }

    fn release(&self, exercise_id: ExerciseId) {
        let mut active = self.active();
        let Some(summary) = active.get_mut(&exercise_id) else {
            return;
        };
        summary.refs = summary.refs.saturating_sub(1);
        if summary.refs == 0 {
            summary.token.cancel();
            active.remove(&exercise_id);
            info!("Stopped summarising exercise {exercise_id}");
        }
    }
}

/// Participations tracked for a summary that is not registered yet. Dropping it
/// untracks them all.
struct TrackedParticipations {
    source: Arc<dyn SubmissionStateSource>,
    receivers: Vec<(ParticipationId, watch::Receiver<TrackedSubmission>)>,
}

impl TrackedParticipations {
    /// Passes ownership of the tracks to the fold task, which untracks on exit.
    fn hand_over(mut self) -> Vec<(ParticipationId, watch::Receiver<TrackedSubmission>)> {
        std::mem::take(&mut self.receivers)
    }
}

impl Drop for TrackedParticipations {
    fn drop(&mut self) {
        for (pid, _) in &self.receivers {
            self.source.untrack(*pid);
        }
    }
}

/// Folds many participations' states into one debounced summary per exercise.
#[derive(Clone)]
pub struct ExerciseStateAggregator {
    inner: Arc<Inner>,
}

impl ExerciseStateAggregator {
    pub fn new(
        source: Arc<dyn SubmissionStateSource>,
        directory: Arc<dyn ParticipationDirectory>,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                directory,
                debounce,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.inner.debounce
    }

    /// Live summary of `exercise_id`.
    ///
    /// The first caller lists and tracks the exercise's participations; later callers
    /// share the same summary. The watch holds an initial summary (revision 0)
    /// immediately. Changes are batched: the first change after an emission opens a
    /// window of [`Self::debounce`], at whose end one summary is emitted.
    pub async fn summary_for(&self, exercise_id: ExerciseId) -> Result<ExerciseSummaryWatch, ApiError> {
        if let Some(rx) = self.inner.join(exercise_id) {
            return Ok(self.handle(exercise_id, rx));
        }

        let mut participations = self.inner.directory.participations_of(exercise_id).await?;
        participations.sort_unstable();
        participations.dedup();

        if let Some(rx) = self.inner.join(exercise_id) {
            return Ok(self.handle(exercise_id, rx));
        }

        let mut tracked = TrackedParticipations {
            source: Arc::clone(&self.inner.source),
            receivers: Vec::with_capacity(participations.len()),
        };
        for pid in participations {
            let rx = self.inner.source.track(pid).await;
            tracked.receivers.push((pid, rx));
        }
        let initial = ExerciseSubmissionSummary::from_receivers(exercise_id, 0, &tracked.receivers);
        let tx = Arc::new(watch::Sender::new(initial));
        let token = CancellationToken::new();

        {
            let mut active = self.inner.active();
            if let Some(existing) = active.get_mut(&exercise_id) {
                // Lost the race while tracking; share the winner's summary.
                existing.refs += 1;
                let rx = existing.tx.subscribe();
                drop(active);
                drop(tracked);
                return Ok(self.handle(exercise_id, rx));
            }
            active.insert(
                exercise_id,
                ActiveSummary {
                    tx: Arc::clone(&tx),
                    refs: 1,
                    token: token.clone(),
                },
            );
        }

        let receivers = tracked.hand_over();
        info!(
            "Summarising exercise {exercise_id} over {} participations",
            receivers.len()
        );
        let rx = tx.subscribe();
        tokio::spawn(fold(
            Arc::clone(&self.inner.source),
            exercise_id,
            receivers,
            tx,
            self.inner.debounce,
            token,
        ));
        Ok(self.handle(exercise_id, rx))
    }

    /// One consistent snapshot: the live summary when one is active, otherwise the
    /// store's current values for the listed participations.
    pub async fn current_summary(
        &self,
        exercise_id: ExerciseId,
    ) -> Result<ExerciseSubmissionSummary, ApiError> {
        let live = self
            .inner
            .active()
            .get(&exercise_id)
            .map(|summary| summary.tx.borrow().clone());
        if let Some(summary) = live {
            return Ok(summary);
        }
        let participations = self.inner.directory.participations_of(exercise_id).await?;
        Ok(ExerciseSubmissionSummary::from_states(
            exercise_id,
            0,
            participations
                .into_iter()
                .map(|pid| (pid, self.inner.source.current(pid))),
        ))
    }

    pub fn is_active(&self, exercise_id: ExerciseId) -> bool {
        self.inner.active().contains_key(&exercise_id)
    }

    fn handle(
        &self,
        exercise_id: ExerciseId,
        rx: watch::Receiver<ExerciseSubmissionSummary>,
    ) -> ExerciseSummaryWatch {
        ExerciseSummaryWatch {
            exercise_id,
            rx,
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A subscription to one exercise summary. Dropping the last one stops tracking.
pub struct ExerciseSummaryWatch {
    exercise_id: ExerciseId,
    rx: watch::Receiver<ExerciseSubmissionSummary>,
    inner: Arc<Inner>,
}

impl ExerciseSummaryWatch {
    pub fn exercise_id(&self) -> ExerciseId {
        self.exercise_id
    }

    pub fn latest(&self) -> ExerciseSubmissionSummary {
        self.rx.borrow().clone()
    }

    /// Waits for the next emission. `None` once the summary can no longer change.
    pub async fn changed(&mut self) -> Option<ExerciseSubmissionSummary> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn receiver(&self) -> watch::Receiver<ExerciseSubmissionSummary> {
        self.rx.clone()
    }
}

impl Drop for ExerciseSummaryWatch {
    fn drop(&mut self) {
        self.inner.release(self.exercise_id);
    }
}

async fn fold(
    source: Arc<dyn SubmissionStateSource>,
    exercise_id: ExerciseId,
    receivers: Vec<(ParticipationId, watch::Receiver<TrackedSubmission>)>,
    tx: Arc<watch::Sender<ExerciseSubmissionSummary>>,
    debounce: Duration,
    token: CancellationToken,
) {
    let (dirty_tx, mut dirty_rx) = mpsc::unbounded_channel::<ParticipationId>();
    for (pid, rx) in &receivers {
        let pid = *pid;
        let mut rx = rx.clone();
        let dirty = dirty_tx.clone();
        let token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() || dirty.send(pid).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }
    drop(dirty_tx);

    let mut revision = 0;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            first = dirty_rx.recv() => if first.is_none() { break },
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(debounce) => {}
        }
        let mut batched = 1;
        while dirty_rx.try_recv().is_ok() {
            batched += 1;
        }

        revision += 1;
        let summary = ExerciseSubmissionSummary::from_receivers(exercise_id, revision, &receivers);
        debug!(
            "Exercise {exercise_id} summary r{revision} after {batched} changes: {:?}",
            summary.counts
        );
        tx.send_replace(summary);
    }

    for (pid, _) in &receivers {
        source.untrack(*pid);
    }
}
