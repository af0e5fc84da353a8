//! Realtime-synced collection cache.
//!
//! A [`SyncedCollection`] keeps a local copy of one backend table for one
//! caller. It fetches the rows the caller may see, listens on a single
//! change channel for the caller's company and applies each change either
//! as a single-row patch or as a full refetch, depending on the record type.
//! Consumers observe the store through a `watch` channel.

use async_trait::async_trait;
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use shared::{ChangeKind, RowChange, RowFilter, Table, TableSubscription};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::notify::{Notification, Notifier};

mod records;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("request failed ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid row: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("channel {0} is already open")]
    ChannelOpen(String),
    #[error("channel {channel} was refused: {reason}")]
    SubscribeRefused { channel: String, reason: String },
    #[error("realtime connection is not available")]
    RealtimeUnavailable,
}

/// Changes routed to one channel, in commit order
pub type ChangeStream = mpsc::UnboundedReceiver<RowChange>;

/// Table access plus the change feed
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn select(&self, table: Table) -> Result<Vec<serde_json::Value>, SyncError>;

    async fn insert(&self, table: Table, row: serde_json::Value) -> Result<serde_json::Value, SyncError>;

    async fn update(
        &self,
        table: Table,
        id: Uuid,
        patch: serde_json::Value,
    ) -> Result<serde_json::Value, SyncError>;

    async fn delete(&self, table: Table, id: Uuid) -> Result<(), SyncError>;

    async fn subscribe(
        &self,
        channel: &str,
        subscriptions: Vec<TableSubscription>,
    ) -> Result<ChangeStream, SyncError>;

    async fn unsubscribe(&self, channel: &str) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Apply the changed row in place
    Patch,
    /// The local view is derived from several tables; fetch again
    Refetch,
}

/// A row type a collection can hold
pub trait Record: Clone + DeserializeOwned + Send + Sync + 'static {
    const TABLE: Table;
    const SYNC_MODE: SyncMode;

    fn id(&self) -> Uuid;

    fn is_visible(&self, _scope: &Scope) -> bool {
        true
    }

    fn subscriptions(company_id: Uuid) -> Vec<TableSubscription> {
        vec![TableSubscription::all(Self::TABLE).with_filter(RowFilter::eq("company_id", company_id))]
    }
}

/// Who is looking: passed in explicitly, never looked up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub user_id: Uuid,
    pub company_id: Option<Uuid>,
    pub role_name: String,
}

#[derive(Debug, Clone)]
pub struct CollectionState<T> {
    pub records: Vec<T>,
    /// Only true during the first fetch
    pub loading: bool,
    /// True while a change event is being applied
    pub is_updating: bool,
    pub error: Option<String>,
}

impl<T> Default for CollectionState<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            loading: false,
            is_updating: false,
            error: None,
        }
    }
}

pub fn channel_name(table: Table, user_id: Uuid, timestamp_ms: i64) -> String {
    format!("{}-{}-{}", table, user_id, timestamp_ms)
}

struct Inner<T, B> {
    backend: Arc<B>,
    notifier: Arc<dyn Notifier>,
    scope: Mutex<Scope>,
    state: watch::Sender<CollectionState<T>>,
    generation: AtomicU64,
    fetched: AtomicBool,
    journal: Mutex<Journal<T>>,
}

/// Patches applied while a fetch is in flight, replayed over its result
struct Journal<T> {
    seq: u64,
    in_flight: usize,
    entries: Vec<(u64, Patch<T>)>,
}

impl<T> Default for Journal<T> {
    fn default() -> Self {
        Self {
            seq: 0,
            in_flight: 0,
            entries: Vec::new(),
        }
    }
}

impl<T: Clone> Journal<T> {
    fn record(&mut self, patch: &Patch<T>) {
        if self.in_flight > 0 {
            self.seq += 1;
            self.entries.push((self.seq, patch.clone()));
        }
    }

    fn since(&self, seq: u64) -> Vec<Patch<T>> {
        self.entries
            .iter()
            .filter(|(at, _)| *at > seq)
            .map(|(_, patch)| patch.clone())
            .collect()
    }

    fn leave(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 {
            self.entries.clear();
        }
    }
}

fn lock_journal<T>(journal: &Mutex<Journal<T>>) -> MutexGuard<'_, Journal<T>> {
    journal.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One fetch registered with the journal; leaves it when dropped mid-flight
struct InFlight<'a, T: Clone> {
    journal: &'a Mutex<Journal<T>>,
    since: u64,
    open: bool,
}

impl<'a, T: Clone> InFlight<'a, T> {
    fn enter(journal: &'a Mutex<Journal<T>>) -> Self {
        let mut guard = lock_journal(journal);
        guard.in_flight += 1;
        Self {
            journal,
            since: guard.seq,
            open: true,
        }
    }

    /// The patches applied since the fetch began, with the journal still locked
    fn finish(mut self) -> (MutexGuard<'a, Journal<T>>, Vec<Patch<T>>) {
        self.open = false;
        let mut guard = lock_journal(self.journal);
        let pending = guard.since(self.since);
        guard.leave();
        (guard, pending)
    }
}

impl<T: Clone> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if self.open {
            lock_journal(self.journal).leave();
        }
    }
}

struct Listener {
    channel: String,
    task: JoinHandle<()>,
}

pub struct SyncedCollection<T, B: Backend> {
    inner: Arc<Inner<T, B>>,
    listener: tokio::sync::Mutex<Option<Listener>>,
}

#[derive(Clone)]
enum Patch<T> {
    Upsert(T),
    Remove(Uuid),
}

impl<T: Record, B: Backend> Inner<T, B> {
    fn scope(&self) -> Scope {
        self.scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn fetch(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let scope = self.scope();

        if scope.company_id.is_none() {
            self.state.send_modify(|state| {
                state.records.clear();
                state.loading = false;
                state.error = None;
            });
            return;
        }

        if !self.fetched.load(Ordering::SeqCst) {
            self.state.send_modify(|state| state.loading = true);
        }

        let in_flight = InFlight::enter(&self.journal);

        let result = match self.backend.select(T::TABLE).await {
            Ok(rows) => rows
                .into_iter()
                .map(serde_json::from_value::<T>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(SyncError::from),
            Err(e) => Err(e),
        };

        // Held until the store is written so no patch slips in between
        let (_journal, pending) = in_flight.finish();

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("Dropping superseded {} fetch", T::TABLE);
            return;
        }

        match result {
            Ok(rows) => {
                let mut records: Vec<T> = rows.into_iter().filter(|r| r.is_visible(&scope)).collect();
                if !pending.is_empty() {
                    tracing::debug!("Replaying {} {} changes over fetch", pending.len(), T::TABLE);
                }
                for patch in pending {
                    apply_patch(&mut records, patch, &scope);
                }
                tracing::debug!("Fetched {} {}", records.len(), T::TABLE);
                self.state.send_modify(|state| {
                    state.records = records;
                    state.loading = false;
                    state.error = None;
                });
                self.fetched.store(true, Ordering::SeqCst);
            }
            Err(e) => {
                tracing::warn!("Failed to fetch {}: {}", T::TABLE, e);
                self.notifier
                    .notify(Notification::error(format!("Could not load {}", T::TABLE), e.to_string()));
                self.state.send_modify(|state| {
                    state.loading = false;
                    state.error = Some(e.to_string());
                });
            }
        }
    }

    async fn apply_change(&self, change: RowChange) {
        self.state.send_modify(|state| state.is_updating = true);

        match T::SYNC_MODE {
            SyncMode::Refetch => self.fetch().await,
            SyncMode::Patch => match decode_patch::<T>(&change) {
                Some(patch) => self.patch(patch),
                None => {
                    tracing::debug!("Undecodable {} change, refetching", T::TABLE);
                    self.fetch().await
                }
            },
        }

        self.state.send_modify(|state| state.is_updating = false);
    }

    /// Apply one row change to the store, journaling it for in-flight fetches
    fn patch(&self, patch: Patch<T>) {
        let scope = self.scope();
        let mut journal = lock_journal(&self.journal);
        journal.record(&patch);
        self.state
            .send_modify(|state| apply_patch(&mut state.records, patch, &scope));
    }

    fn report(&self, action: &str, error: &SyncError) {
        tracing::warn!("Failed to {} {}: {}", action, T::TABLE, error);
        self.notifier
            .notify(Notification::error(format!("Could not {} {}", action, T::TABLE), error.to_string()));
    }
}

/// Insert or replace by id; rows the caller may not see are dropped
fn apply_patch<T: Record>(records: &mut Vec<T>, patch: Patch<T>, scope: &Scope) {
    match patch {
        Patch::Upsert(record) => {
            let id = record.id();
            let visible = record.is_visible(scope);
            let position = records.iter().position(|r| r.id() == id);
            match (position, visible) {
                (Some(i), true) => records[i] = record,
                (None, true) => records.push(record),
                (Some(i), false) => {
                    records.remove(i);
                }
                (None, false) => {}
            }
        }
        Patch::Remove(id) => records.retain(|r| r.id() != id),
    }
}

fn decode_patch<T: Record>(change: &RowChange) -> Option<Patch<T>> {
    match change.kind {
        ChangeKind::Insert | ChangeKind::Update => change
            .record
            .clone()
            .and_then(|row| serde_json::from_value::<T>(row).ok())
            .map(Patch::Upsert),
        ChangeKind::Delete => change.row_id().map(Patch::Remove),
    }
}

impl<T: Record, B: Backend> SyncedCollection<T, B> {
    pub fn new(backend: Arc<B>, notifier: Arc<dyn Notifier>, scope: Scope) -> Self {
        let (state, _) = watch::channel(CollectionState::default());
        Self {
            inner: Arc::new(Inner {
                backend,
                notifier,
                scope: Mutex::new(scope),
                state,
                generation: AtomicU64::new(0),
                fetched: AtomicBool::new(false),
                journal: Mutex::new(Journal::default()),
            }),
            listener: tokio::sync::Mutex::new(None),
        }
    }

    /// Fetch, then listen for changes
    pub async fn start(&self) -> Result<(), SyncError> {
        self.fetch().await;
        self.subscribe().await
    }

    pub fn watch(&self) -> watch::Receiver<CollectionState<T>> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> CollectionState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn scope(&self) -> Scope {
        self.inner.scope()
    }

    pub async fn fetch(&self) {
        self.inner.fetch().await
    }

    /// Open the change channel; at most one is live per collection
    pub async fn subscribe(&self) -> Result<(), SyncError> {
        let mut listener = self.listener.lock().await;
        if let Some(live) = listener.as_ref() {
            tracing::warn!("Refusing second subscription, {} is live", live.channel);
            return Err(SyncError::ChannelOpen(live.channel.clone()));
        }

        let scope = self.inner.scope();
        let Some(company_id) = scope.company_id else {
            tracing::debug!("No company in scope, not subscribing to {}", T::TABLE);
            return Ok(());
        };

        let channel = channel_name(T::TABLE, scope.user_id, Utc::now().timestamp_millis());
        let mut stream = match self
            .inner
            .backend
            .subscribe(&channel, T::subscriptions(company_id))
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                self.inner.report("subscribe to", &e);
                return Err(e);
            }
        };

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            while let Some(change) = stream.recv().await {
                inner.apply_change(change).await;
            }
        });

        tracing::info!("Subscribed {} on channel {}", T::TABLE, channel);
        *listener = Some(Listener { channel, task });
        Ok(())
    }

    /// Release the change channel
    pub async fn close(&self) {
        let listener = self.listener.lock().await.take();
        if let Some(listener) = listener {
            listener.task.abort();
            if let Err(e) = self.inner.backend.unsubscribe(&listener.channel).await {
                tracing::warn!("Failed to release channel {}: {}", listener.channel, e);
            }
        }
    }

    /// Switch caller context: the old channel goes before the new one opens
    pub async fn rescope(&self, scope: Scope) -> Result<(), SyncError> {
        self.close().await;
        *self
            .inner
            .scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = scope;
        self.start().await
    }

    pub async fn create<P: Serialize + Sync>(&self, payload: &P) -> Result<T, SyncError> {
        let result: Result<T, SyncError> = async {
            let row = self
                .inner
                .backend
                .insert(T::TABLE, serde_json::to_value(payload)?)
                .await?;
            Ok(serde_json::from_value::<T>(row)?)
        }
        .await;
        self.write_through("create", result)
    }

    pub async fn update<P: Serialize + Sync>(&self, id: Uuid, patch: &P) -> Result<T, SyncError> {
        let result: Result<T, SyncError> = async {
            let row = self
                .inner
                .backend
                .update(T::TABLE, id, serde_json::to_value(patch)?)
                .await?;
            Ok(serde_json::from_value::<T>(row)?)
        }
        .await;
        self.write_through("update", result)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), SyncError> {
        match self.inner.backend.delete(T::TABLE, id).await {
            Ok(()) => {
                self.inner.patch(Patch::Remove(id));
                Ok(())
            }
            Err(e) => {
                self.inner.report("delete", &e);
                Err(e)
            }
        }
    }

    /// Mirror a confirmed write locally; the later change event is idempotent
    fn write_through(&self, action: &str, result: Result<T, SyncError>) -> Result<T, SyncError> {
        match result {
            Ok(record) => {
                self.inner.patch(Patch::Upsert(record.clone()));
                Ok(record)
            }
            Err(e) => {
                self.inner.report(action, &e);
                Err(e)
            }
        }
    }
}

impl<T, B: Backend> Drop for SyncedCollection<T, B> {
    fn drop(&mut self) {
        let Some(listener) = self.listener.get_mut().take() else {
            return;
        };
        listener.task.abort();
        let backend = self.inner.backend.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = backend.unsubscribe(&listener.channel).await {
                    tracing::warn!("Failed to release channel {}: {}", listener.channel, e);
                }
            });
        }
    }
}
