//! A mounted list view: coordinator plus its change subscriptions

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::coordinator::{ReloadCoordinator, ViewObserver, ViewState};
use super::query::{PageQuery, QueryPatch};
use crate::api::{ApiError, ImportResponse, RecordApi};
use crate::events::{
    BusSubscription, ChangeAction, ChangeBus, ChangeEvent, EntityKind, PushClient, PushMessage,
    PushSubscription,
};

/// Shown on the import history view when the server reports job progress
pub const IMPORT_HISTORY_NOTICE: &str = "import history updated";

/// One list view wired to every change source.
///
/// Mounting subscribes to the [`ChangeBus`] and the [`PushClient`] and starts
/// the first load. Mutations made through the view report failures to the
/// observer and announce successes on the bus, so other views (here or in
/// peer instances) refresh too. The view's own bus subscription performs its
/// reload.
pub struct LiveView {
    entity: EntityKind,
    coordinator: ReloadCoordinator,
    api: Arc<dyn RecordApi>,
    bus: ChangeBus,
    observer: Arc<dyn ViewObserver>,
    bus_subscription: Option<BusSubscription>,
    push_subscription: Option<PushSubscription>,
}

impl LiveView {
    /// Mount a view of `entity` starting from `query`.
    ///
    /// Must be called within a tokio runtime.
    pub fn mount(
        entity: EntityKind,
        query: PageQuery,
        api: Arc<dyn RecordApi>,
        bus: &ChangeBus,
        push: &PushClient,
        observer: Arc<dyn ViewObserver>,
    ) -> Self {
        let coordinator = ReloadCoordinator::new(entity, query, api.clone(), observer.clone());

        let bus_subscription = {
            let coordinator = coordinator.clone();
            bus.subscribe(move |name, payload| {
                if let Some(event) = ChangeEvent::from_bus_name(name, payload) {
                    coordinator.on_external_change(&event);
                }
            })
        };

        let push_subscription = {
            let coordinator = coordinator.clone();
            let observer = observer.clone();
            push.subscribe_to_changes(move |message| match message {
                PushMessage::Change(event) => {
                    // Import jobs progress server-side; say so on the history view.
                    if coordinator.on_external_change(event) && entity == EntityKind::Import {
                        observer.on_notice(IMPORT_HISTORY_NOTICE);
                    }
                }
                PushMessage::Raw(_) => {
                    debug!(entity = %coordinator.entity(), "Ignoring unstructured push frame");
                }
            })
        };

        info!(entity = %entity, "View mounted");
        coordinator.trigger_reload();

        Self {
            entity,
            coordinator,
            api,
            bus: bus.clone(),
            observer,
            bus_subscription: Some(bus_subscription),
            push_subscription: Some(push_subscription),
        }
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn state(&self) -> ViewState {
        self.coordinator.state()
    }

    pub fn coordinator(&self) -> &ReloadCoordinator {
        &self.coordinator
    }

    pub fn set_query(&self, patch: QueryPatch) {
        self.coordinator.set_query(patch);
    }

    pub fn toggle_sort(&self, column: &str) {
        self.coordinator.toggle_sort(column);
    }

    pub fn trigger_reload(&self) {
        self.coordinator.trigger_reload();
    }

    pub async fn create(&self, body: &Value) -> Result<Value, ApiError> {
        let created = self
            .api
            .create(self.entity, body)
            .await
            .map_err(|e| self.report(e))?;
        let payload = created.get("id").cloned().unwrap_or(Value::Null);
        self.announce(ChangeEvent::new(self.entity.key(), ChangeAction::Created), payload);
        Ok(created)
    }

    pub async fn update(&self, id: i64, body: &Value) -> Result<Value, ApiError> {
        let updated = self
            .api
            .update(self.entity, id, body)
            .await
            .map_err(|e| self.report(e))?;
        self.announce(ChangeEvent::new(self.entity.key(), ChangeAction::Updated), json!(id));
        Ok(updated)
    }

    pub async fn delete(&self, id: i64) -> Result<(), ApiError> {
        self.api
            .delete(self.entity, id)
            .await
            .map_err(|e| self.report(e))?;
        self.announce(ChangeEvent::new(self.entity.key(), ChangeAction::Deleted), json!(id));
        Ok(())
    }

    /// Upload a bulk-import file for this view's entity.
    pub async fn upload_import(
        &self,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<ImportResponse, ApiError> {
        let response = self
            .api
            .upload_import(self.entity, file_name, contents)
            .await
            .map_err(|e| self.report(e))?;

        self.observer
            .on_notice(&format!("import started: {} created", response.created_count));
        if !response.errors.is_empty() {
            debug!(entity = %self.entity, rejected = response.errors.len(), "Import reported row errors");
        }
        self.announce(
            ChangeEvent::new(self.entity.key(), ChangeAction::Updated),
            Value::Null,
        );
        Ok(response)
    }

    /// Release both subscriptions and detach the coordinator. Idempotent.
    pub fn unmount(&mut self) {
        if let Some(sub) = self.bus_subscription.take() {
            sub.unsubscribe();
        }
        if let Some(sub) = self.push_subscription.take() {
            sub.unsubscribe();
        }
        if self.coordinator.is_mounted() {
            self.coordinator.unmount();
            info!(entity = %self.entity, "View unmounted");
        }
    }

    fn report(&self, error: ApiError) -> ApiError {
        self.observer.on_error(&error.user_message());
        error
    }

    fn announce(&self, event: ChangeEvent, payload: Value) {
        self.bus.publish(&event.bus_name(), payload);
    }
}

impl Drop for LiveView {
    fn drop(&mut self) {
        self.unmount();
    }
}
