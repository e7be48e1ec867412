//! Test helper mocks and polling utilities
//!
//! Provides an in-memory [`RecordApi`], a scripted push transport and a
//! recording view observer, so coordinator and live-view tests run without
//! a server.
#![allow(dead_code)]

use crate::api::{ApiError, ImportResponse, RecordApi};
use crate::events::{EntityKind, FrameStream, PushTransport};
use crate::view::{PageQuery, ViewObserver, ViewState};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

// ============================================================================
// Polling
// ============================================================================

/// Poll `condition` until it holds; panics after two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}

// ============================================================================
// Mock API
// ============================================================================

/// In-memory backend recording every list request.
///
/// List responses come from a queue first, then from the default body set
/// with [`MockApi::set_list`]. [`MockApi::hold`] parks list calls (after
/// they are recorded) until [`MockApi::release`].
pub struct MockApi {
    default_list: Mutex<Value>,
    queued: Mutex<VecDeque<Value>>,
    list_failure: Mutex<Option<(u16, String)>>,
    mutation_failure: Mutex<Option<(u16, String)>>,
    calls: Mutex<Vec<(EntityKind, PageQuery)>>,
    mutations: Mutex<Vec<String>>,
    gate: watch::Sender<bool>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(false);
        Arc::new(Self {
            default_list: Mutex::new(json!([])),
            queued: Mutex::new(VecDeque::new()),
            list_failure: Mutex::new(None),
            mutation_failure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            mutations: Mutex::new(Vec::new()),
            gate,
        })
    }

    pub fn set_list(&self, body: Value) {
        *self.default_list.lock() = body;
    }

    /// Answer the next list call with `body`
    pub fn push_list(&self, body: Value) {
        self.queued.lock().push_back(body);
    }

    pub fn fail_next_list(&self, status: u16, body: &str) {
        *self.list_failure.lock() = Some((status, body.to_string()));
    }

    pub fn fail_next_mutation(&self, status: u16, body: &str) {
        *self.mutation_failure.lock() = Some((status, body.to_string()));
    }

    pub fn hold(&self) {
        self.gate.send_replace(true);
    }

    pub fn release(&self) {
        self.gate.send_replace(false);
    }

    pub fn list_calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn list_calls_for(&self, entity: EntityKind) -> usize {
        self.calls.lock().iter().filter(|(e, _)| *e == entity).count()
    }

    pub fn list_queries(&self) -> Vec<PageQuery> {
        self.calls.lock().iter().map(|(_, q)| q.clone()).collect()
    }

    /// `"<method> <entity>[/<id>]"` for every mutation received
    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().clone()
    }

    fn mutate(&self, call: String) -> Result<(), ApiError> {
        self.mutations.lock().push(call);
        match self.mutation_failure.lock().take() {
            Some((status, body)) => Err(ApiError::from_response(status, &body)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RecordApi for MockApi {
    async fn list(&self, entity: EntityKind, query: &PageQuery) -> Result<Value, ApiError> {
        self.calls.lock().push((entity, query.clone()));

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|held| !*held).await;

        if let Some((status, body)) = self.list_failure.lock().take() {
            return Err(ApiError::from_response(status, &body));
        }
        let queued = self.queued.lock().pop_front();
        Ok(queued.unwrap_or_else(|| self.default_list.lock().clone()))
    }

    async fn get(&self, entity: EntityKind, id: i64) -> Result<Value, ApiError> {
        Ok(json!({"id": id, "entity": entity.key()}))
    }

    async fn create(&self, entity: EntityKind, body: &Value) -> Result<Value, ApiError> {
        self.mutate(format!("POST {}", entity.path()))?;
        let mut created = body.clone();
        if let Some(obj) = created.as_object_mut() {
            obj.insert("id".into(), json!(101));
        }
        Ok(created)
    }

    async fn update(&self, entity: EntityKind, id: i64, body: &Value) -> Result<Value, ApiError> {
        self.mutate(format!("PUT {}/{}", entity.path(), id))?;
        Ok(body.clone())
    }

    async fn delete(&self, entity: EntityKind, id: i64) -> Result<(), ApiError> {
        self.mutate(format!("DELETE {}/{}", entity.path(), id))
    }

    async fn upload_import(
        &self,
        entity: EntityKind,
        _file_name: &str,
        _contents: Vec<u8>,
    ) -> Result<ImportResponse, ApiError> {
        self.mutate(format!("UPLOAD {}", entity.path()))?;
        Ok(ImportResponse {
            created_count: 3,
            errors: Vec::new(),
        })
    }
}

// ============================================================================
// Scripted push transport
// ============================================================================

type FrameSlot = Arc<Mutex<Option<mpsc::UnboundedSender<anyhow::Result<String>>>>>;

/// Push transport whose sessions are driven by a [`FrameSender`].
pub struct ScriptedPushTransport {
    slot: FrameSlot,
    connects: AtomicUsize,
    failures_left: AtomicUsize,
}

/// Feeds frames into the current scripted session
#[derive(Clone)]
pub struct FrameSender {
    slot: FrameSlot,
}

impl ScriptedPushTransport {
    pub fn new() -> (Arc<Self>, FrameSender) {
        let slot: FrameSlot = Arc::new(Mutex::new(None));
        let transport = Arc::new(Self {
            slot: slot.clone(),
            connects: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
        });
        (transport, FrameSender { slot })
    }

    /// Make the next `n` connection attempts fail
    pub fn fail_next_connects(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Connection attempts so far, failed ones included
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushTransport for ScriptedPushTransport {
    async fn connect(&self) -> anyhow::Result<FrameStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("connection refused");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.slot.lock() = Some(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

impl FrameSender {
    /// Deliver a frame body on the current session, if any
    pub fn send(&self, body: &str) {
        if let Some(tx) = self.slot.lock().as_ref() {
            let _ = tx.send(Ok(body.to_string()));
        }
    }

    /// Fail the current session with a transport error
    pub fn fail(&self, reason: &str) {
        if let Some(tx) = self.slot.lock().take() {
            let _ = tx.send(Err(anyhow::anyhow!(reason.to_string())));
        }
    }

    /// End the current session as if the server closed it
    pub fn disconnect(&self) {
        self.slot.lock().take();
    }
}

// ============================================================================
// Recording observer
// ============================================================================

/// View observer that keeps everything it is told
#[derive(Default)]
pub struct RecordingObserver {
    states: Mutex<Vec<ViewState>>,
    errors: Mutex<Vec<String>>,
    notices: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of `on_change` calls
    pub fn changes(&self) -> usize {
        self.states.lock().len()
    }

    pub fn last_state(&self) -> Option<ViewState> {
        self.states.lock().last().cloned()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().clone()
    }
}

impl ViewObserver for RecordingObserver {
    fn on_change(&self, state: &ViewState) {
        self.states.lock().push(state.clone());
    }

    fn on_error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }

    fn on_notice(&self, message: &str) {
        self.notices.lock().push(message.to_string());
    }
}
