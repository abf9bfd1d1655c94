//! Tracker state container handed to the UI layer.
//!
//! Holds one of each component, wired to the same push channel and REST API. It is
//! cheap to clone; every component shares its internals.

use std::sync::Arc;
use std::time::Duration;

use util::config::{AppConfig, DEFAULT_RESULT_ETA_MS};

use crate::aggregator::{DEFAULT_DEBOUNCE, ExerciseStateAggregator};
use crate::api::{ParticipationDirectory, SubmissionApi};
use crate::builds::BuildTriggerCoordinator;
use crate::channel::MessageChannel;
use crate::eta::ResultEtaEstimator;
use crate::locks::AssessmentLockCoordinator;
use crate::store::{StoreOptions, SubmissionStateStore};

#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub summary_debounce: Duration,
    pub default_result_eta_ms: u64,
    /// `None` disables marking stuck builds as failed.
    pub result_grace: Option<Duration>,
    /// Fetch the latest pending submission whenever a participation (re)subscribes.
    pub refresh_snapshots: bool,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            summary_debounce: DEFAULT_DEBOUNCE,
            default_result_eta_ms: DEFAULT_RESULT_ETA_MS,
            result_grace: None,
            refresh_snapshots: true,
        }
    }
}

impl TrackerOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            summary_debounce: Duration::from_millis(config.summary_debounce_ms),
            default_result_eta_ms: config.default_result_eta_ms,
            result_grace: (config.result_timeout_grace_secs > 0)
                .then(|| Duration::from_secs(config.result_timeout_grace_secs)),
            refresh_snapshots: true,
        }
    }
}

#[derive(Clone)]
pub struct TrackerState {
    channel: Arc<dyn MessageChannel>,
    store: SubmissionStateStore,
    aggregator: ExerciseStateAggregator,
    eta: ResultEtaEstimator,
    builds: BuildTriggerCoordinator,
    locks: AssessmentLockCoordinator,
}

impl TrackerState {
    /// Wires every component to `channel` and `api`.
    pub fn new<A>(channel: Arc<dyn MessageChannel>, api: Arc<A>, options: TrackerOptions) -> Self
    where
        A: SubmissionApi + ParticipationDirectory,
    {
        let eta = ResultEtaEstimator::new(options.default_result_eta_ms);

        let mut builder = SubmissionStateStore::builder(Arc::clone(&channel))
            .eta(eta.clone())
            .options(StoreOptions {
                result_grace: options.result_grace,
            });
        if options.refresh_snapshots {
            builder = builder.api(api.clone());
        }
        let store = builder.build();

        let aggregator = ExerciseStateAggregator::new(
            Arc::new(store.clone()),
            api.clone(),
            options.summary_debounce,
        );
        let builds = BuildTriggerCoordinator::new(
            api.clone(),
            Arc::new(store.clone()),
            aggregator.clone(),
        );
        let locks = AssessmentLockCoordinator::new(api);

        Self {
            channel,
            store,
            aggregator,
            eta,
            builds,
            locks,
        }
    }

    pub fn channel(&self) -> &Arc<dyn MessageChannel> {
        &self.channel
    }

    pub fn store(&self) -> &SubmissionStateStore {
        &self.store
    }

    pub fn aggregator(&self) -> &ExerciseStateAggregator {
        &self.aggregator
    }

    pub fn eta(&self) -> &ResultEtaEstimator {
        &self.eta
    }

    pub fn builds(&self) -> &BuildTriggerCoordinator {
        &self.builds
    }

    pub fn locks(&self) -> &AssessmentLockCoordinator {
        &self.locks
    }
}
