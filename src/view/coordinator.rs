//! Reload coordination for one list view
//!
//! A [`ReloadCoordinator`] owns the view's query and last good result. All
//! reload requests funnel through one "flight": at most one fetch is in
//! progress, and any number of requests arriving meanwhile collapse into a
//! single follow-up fetch that runs right after it. A result whose query was
//! changed while it was being fetched is dropped on arrival.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::normalize::{normalize, size_hint, ListEnvelope};
use super::query::{PageQuery, QueryPatch};
use crate::api::RecordApi;
use crate::events::{ChangeEvent, EntityKind};

/// Snapshot of a list view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    pub query: PageQuery,
    /// Last successfully fetched page
    pub envelope: ListEnvelope,
    /// A fetch is in progress
    pub loading: bool,
    /// The coordinator's flight guard; equal to `loading` except between a
    /// request being accepted and its fetch starting
    pub in_flight: bool,
    /// Message of the last failed fetch, cleared by the next success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ViewState {
    fn new(query: PageQuery) -> Self {
        Self {
            query,
            envelope: ListEnvelope::empty(),
            loading: false,
            in_flight: false,
            error: None,
        }
    }
}

/// Receives view updates. Called outside any coordinator lock.
pub trait ViewObserver: Send + Sync {
    /// The state changed (loading started, data arrived, page clamped)
    fn on_change(&self, _state: &ViewState) {}

    /// Something failed; `message` is fit for display
    fn on_error(&self, _message: &str) {}

    /// Informational message, e.g. an import summary
    fn on_notice(&self, _message: &str) {}
}

/// How a call to [`ReloadCoordinator::reload`] ended
#[derive(Debug, Clone, PartialEq)]
pub enum ReloadOutcome {
    /// The flight's last fetch was applied; this is the view's page now
    Applied(ListEnvelope),
    /// The flight's last fetch failed with this message
    Failed(String),
    /// The view is unmounted
    Detached,
}

/// Cheap-to-clone handle on one view's reload state.
#[derive(Clone)]
pub struct ReloadCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    entity: EntityKind,
    api: Arc<dyn RecordApi>,
    observer: Arc<dyn ViewObserver>,
    state: Mutex<FlightState>,
    /// Bumped each time a flight lands
    landed: watch::Sender<u64>,
}

struct FlightState {
    view: ViewState,
    /// Bumped on every query change; a fetch result is applied only if the
    /// revision it was issued under is still current
    revision: u64,
    /// A request arrived while a fetch was in flight
    pending: bool,
    mounted: bool,
}

/// What one fetch did to the state, decided under the lock
enum Step {
    Applied { corrected: bool },
    Failed(String),
    Superseded,
}

impl ReloadCoordinator {
    pub fn new(
        entity: EntityKind,
        query: PageQuery,
        api: Arc<dyn RecordApi>,
        observer: Arc<dyn ViewObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                entity,
                api,
                observer,
                state: Mutex::new(FlightState {
                    view: ViewState::new(query),
                    revision: 0,
                    pending: false,
                    mounted: true,
                }),
                landed: watch::Sender::new(0),
            }),
        }
    }

    pub fn entity(&self) -> EntityKind {
        self.inner.entity
    }

    /// Current snapshot
    pub fn state(&self) -> ViewState {
        self.inner.state.lock().view.clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.state.lock().mounted
    }

    /// Apply a partial query update and schedule a reload.
    ///
    /// Changing sort, direction, filters or size sends the view to page 0.
    pub fn set_query(&self, patch: QueryPatch) {
        {
            let mut state = self.inner.state.lock();
            if !state.mounted {
                return;
            }
            if state.view.query.apply(patch) {
                state.revision += 1;
                debug!(
                    entity = %self.inner.entity,
                    page = state.view.query.page,
                    sort = %state.view.query.sort,
                    revision = state.revision,
                    "View query changed"
                );
            }
        }
        self.trigger_reload();
    }

    /// Column header click: flip the active column, or sort ascending by a new one.
    pub fn toggle_sort(&self, column: &str) {
        let patch = self.inner.state.lock().view.query.toggle_sort(column);
        self.set_query(patch);
    }

    /// Schedule a reload if `event` concerns this view. Returns whether it did.
    pub fn on_external_change(&self, event: &ChangeEvent) -> bool {
        if !event.concerns(self.inner.entity) {
            return false;
        }
        debug!(
            entity = %self.inner.entity,
            source_entity = %event.entity,
            action = event.action.as_str(),
            "External change accepted"
        );
        self.trigger_reload();
        true
    }

    /// Fire-and-forget reload. Must be called within a tokio runtime.
    pub fn trigger_reload(&self) {
        if self.claim_flight() {
            let this = self.clone();
            tokio::spawn(async move {
                this.run_flight().await;
            });
        }
    }

    /// Reload and wait for the result.
    ///
    /// If a flight is already running this joins it: the request becomes its
    /// follow-up and the call returns once that flight lands.
    pub async fn reload(&self) -> ReloadOutcome {
        let mut landed = {
            let mut state = self.inner.state.lock();
            if !state.mounted {
                return ReloadOutcome::Detached;
            }
            if state.view.in_flight {
                state.pending = true;
                Some(self.inner.landed.subscribe())
            } else {
                state.view.in_flight = true;
                None
            }
        };

        match landed.as_mut() {
            None => self.run_flight().await,
            Some(landed) => {
                if landed.changed().await.is_err() {
                    return ReloadOutcome::Detached;
                }
                let state = self.inner.state.lock();
                if !state.mounted {
                    ReloadOutcome::Detached
                } else if let Some(message) = &state.view.error {
                    ReloadOutcome::Failed(message.clone())
                } else {
                    ReloadOutcome::Applied(state.view.envelope.clone())
                }
            }
        }
    }

    /// Detach the view: pending work is dropped and results still in flight
    /// are ignored when they arrive.
    pub fn unmount(&self) {
        let mut state = self.inner.state.lock();
        state.mounted = false;
        state.pending = false;
        debug!(entity = %self.inner.entity, "View unmounted");
    }

    /// Take the flight guard, or mark a follow-up if it is taken.
    fn claim_flight(&self) -> bool {
        let mut state = self.inner.state.lock();
        if !state.mounted {
            return false;
        }
        if state.view.in_flight {
            if !state.pending {
                debug!(entity = %self.inner.entity, "Reload coalesced into follow-up");
            }
            state.pending = true;
            return false;
        }
        state.view.in_flight = true;
        true
    }

    /// Fetch until no follow-up is pending. The caller holds the flight guard.
    async fn run_flight(&self) -> ReloadOutcome {
        let outcome = self.fly().await;
        self.inner.landed.send_modify(|n| *n += 1);
        outcome
    }

    async fn fly(&self) -> ReloadOutcome {
        let inner = &self.inner;
        let mut correction_used = false;

        loop {
            let (query, revision, snapshot) = {
                let mut state = inner.state.lock();
                if !state.mounted {
                    state.view.in_flight = false;
                    state.view.loading = false;
                    return ReloadOutcome::Detached;
                }
                state.view.loading = true;
                (
                    state.view.query.clone(),
                    state.revision,
                    state.view.clone(),
                )
            };
            inner.observer.on_change(&snapshot);

            let result = inner.api.list(inner.entity, &query).await;

            let (step, follow_up, snapshot) = {
                let mut state = inner.state.lock();
                if !state.mounted {
                    state.view.in_flight = false;
                    state.view.loading = false;
                    debug!(entity = %inner.entity, "Discarding result for unmounted view");
                    return ReloadOutcome::Detached;
                }

                let step = if state.revision != revision {
                    Step::Superseded
                } else {
                    match result {
                        Ok(raw) => {
                            // Page math follows the size the server actually used.
                            let served_size = match size_hint(&raw, query.size) {
                                Some(size) => {
                                    debug!(entity = %inner.entity, requested = query.size, size, "Adopting server page size");
                                    state.view.query.size = size;
                                    size
                                }
                                None => query.size,
                            };
                            let envelope = normalize(&raw, served_size);
                            let total_pages = envelope.total_pages;
                            state.view.envelope = envelope;
                            state.view.error = None;

                            let mut corrected = false;
                            if state.view.query.clamp_page(total_pages) {
                                state.revision += 1;
                                if !correction_used {
                                    correction_used = true;
                                    corrected = true;
                                }
                                debug!(
                                    entity = %inner.entity,
                                    page = state.view.query.page,
                                    total_pages,
                                    refetch = corrected,
                                    "Page clamped"
                                );
                            }
                            Step::Applied { corrected }
                        }
                        Err(e) => {
                            let message = e.user_message();
                            warn!(entity = %inner.entity, "List fetch failed: {}", e);
                            state.view.error = Some(message.clone());
                            Step::Failed(message)
                        }
                    }
                };

                let follow_up = std::mem::take(&mut state.pending)
                    || matches!(step, Step::Applied { corrected: true });
                if !follow_up {
                    state.view.in_flight = false;
                    state.view.loading = false;
                }
                (step, follow_up, state.view.clone())
            };

            match &step {
                Step::Superseded => {
                    debug!(entity = %inner.entity, revision, "Discarding superseded result");
                }
                Step::Failed(message) => {
                    inner.observer.on_error(message);
                    inner.observer.on_change(&snapshot);
                }
                Step::Applied { .. } => inner.observer.on_change(&snapshot),
            }

            if !follow_up {
                return match step {
                    Step::Failed(message) => ReloadOutcome::Failed(message),
                    _ => ReloadOutcome::Applied(snapshot.envelope),
                };
            }
        }
    }
}
