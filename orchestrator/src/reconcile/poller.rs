//! Adaptive status poller
//!
//! One poller per watched deployment. Each iteration makes a single describe
//! call, maps the raw status, persists it to the record store, and emits a
//! transition event when a settled change is observed. The cadence adapts:
//! fast while the instance is mid-change, slow once settled. Poll failures
//! are logged and retried on the next tick; the loop never dies on them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::status::{self, DeploymentStatus, StatusTransition};
use crate::gcp::ControlPlane;
use crate::store::{records, RecordStore};

/// Poll cadence options
#[derive(Debug, Clone)]
pub struct PollerOptions {
    /// Interval while the raw status is transitional
    pub fast_interval: Duration,

    /// Interval once the status has settled
    pub slow_interval: Duration,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            fast_interval: Duration::from_secs(10),
            slow_interval: Duration::from_secs(60),
        }
    }
}

/// The deployment a poller watches
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub record_id: String,
    pub project_id: String,
    pub zone: String,
    pub vm_name: String,
}

#[derive(Debug)]
struct PollState {
    /// Most recent raw status, drives the cadence
    last_raw: Option<String>,

    /// Last stable raw status, the `from` side of transition events
    last_stable: Option<String>,

    last_mapped: DeploymentStatus,
    seeded: bool,
}

struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Reconciliation loop for one deployment. Stoppable and restartable;
/// stopping never loses the last observed state.
pub struct StatusPoller {
    cloud: Arc<dyn ControlPlane>,
    store: Arc<dyn RecordStore>,
    target: WatchTarget,
    options: PollerOptions,
    transitions: mpsc::UnboundedSender<StatusTransition>,
    state: Arc<Mutex<PollState>>,
    task: Mutex<Option<Running>>,
}

impl StatusPoller {
    /// Create a poller and the receiver its transition events arrive on
    pub fn new(
        cloud: Arc<dyn ControlPlane>,
        store: Arc<dyn RecordStore>,
        target: WatchTarget,
        options: PollerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<StatusTransition>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let poller = Self {
            cloud,
            store,
            target,
            options,
            transitions: tx,
            state: Arc::new(Mutex::new(PollState {
                last_raw: None,
                last_stable: None,
                last_mapped: DeploymentStatus::Provisioning,
                seeded: false,
            })),
            task: Mutex::new(None),
        };
        (poller, rx)
    }

    /// Start polling. The first poll happens immediately. A no-op when the
    /// loop is already running.
    pub fn start(&self) {
        let mut task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if task.as_ref().map(|r| !r.handle.is_finished()).unwrap_or(false) {
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let cloud = Arc::clone(&self.cloud);
        let store = Arc::clone(&self.store);
        let target = self.target.clone();
        let options = self.options.clone();
        let transitions = self.transitions.clone();
        let state = Arc::clone(&self.state);

        info!("Watching {} ({})", target.vm_name, target.record_id);
        let handle = tokio::spawn(async move {
            loop {
                poll_once(&*cloud, &*store, &target, &transitions, &state).await;

                let interval = {
                    let state = match state.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    match &state.last_raw {
                        Some(raw) if status::is_transitional(raw) => options.fast_interval,
                        _ => options.slow_interval,
                    }
                };

                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!("Poll loop stopped");
        });

        *task = Some(Running {
            stop: stop_tx,
            handle,
        });
    }

    /// Signal the loop to stop. Observed state is kept, so a later `start`
    /// resumes without replaying transitions.
    pub fn stop(&self) {
        let mut task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(running) = task.take() {
            let _ = running.stop.send(true);
        }
    }

    pub fn is_running(&self) -> bool {
        let task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        task.as_ref().map(|r| !r.handle.is_finished()).unwrap_or(false)
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_once(
    cloud: &dyn ControlPlane,
    store: &dyn RecordStore,
    target: &WatchTarget,
    transitions: &mpsc::UnboundedSender<StatusTransition>,
    state: &Mutex<PollState>,
) {
    // Seed the previous mapping from the persisted record once, so an
    // unrecognized first status falls back to what was last recorded.
    let needs_seed = {
        let state = match state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        !state.seeded
    };
    if needs_seed {
        let seeded_status = match records::load(store, &target.record_id).await {
            Ok(Some(record)) => Some(record.status),
            Ok(None) => None,
            Err(e) => {
                warn!("Could not load record {}: {}", target.record_id, e);
                None
            }
        };
        let mut state = match state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(status) = seeded_status {
            state.last_mapped = status;
        }
        state.seeded = true;
    }

    let view = match cloud
        .describe_instance(&target.project_id, &target.zone, &target.vm_name)
        .await
    {
        Ok(Some(view)) => view,
        Ok(None) => {
            debug!("Instance {} not found, keeping last known state", target.vm_name);
            return;
        }
        Err(e) => {
            warn!("Status poll for {} failed: {}", target.vm_name, e);
            return;
        }
    };

    let raw = view.status.to_lowercase();
    let (mapped, transition) = {
        let mut state = match state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mapped = status::map_raw_status(&raw, state.last_mapped);
        let transition = status::detect_transition(state.last_stable.as_deref(), &raw, mapped);
        state.last_raw = Some(raw.clone());
        if status::is_stable(&raw) {
            state.last_stable = Some(raw.clone());
        }
        state.last_mapped = mapped;
        (mapped, transition)
    };

    if let Some(transition) = transition {
        info!(
            "{}: {} -> {}",
            target.vm_name,
            transition.from.as_deref().unwrap_or("?"),
            transition.to
        );
        let _ = transitions.send(transition);
    }

    if let Err(e) =
        records::update_status(store, &target.record_id, mapped, &raw, Some(&view)).await
    {
        warn!("Could not persist status for {}: {}", target.record_id, e);
    }
}
