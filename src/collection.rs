//! Aggregates a [`FetchController`] and a [`SyncQueue`] into the reactive, optimistic view
//! consumers actually hold: server items overlaid with locally pending creates/updates, with
//! locally pending removes hidden.
//!
//! Grounded on `hack-ink-jwks-cache`'s `registry::Registry`, which owns per-key state and
//! republishes it on a channel rather than letting callers poll; the two sub-components here
//! never reference `Collection` back. Instead `Collection` holds a `watch::Receiver` from each
//! and spawns a small forwarding task that republishes on their behalf — the same "notification
//! port handed out at construction" shape, expressed with an owned task instead of a callback.

use std::{sync::Arc, time::Duration};

use indexmap::IndexMap;
use tokio::{
	sync::{Mutex, RwLock, watch},
	task::JoinHandle,
};

use crate::{
	Error, Result,
	fetch::{FetchController, FetchHandler, FetchStatus},
	record::{Change, ChangeKind, Identified, ItemStatus},
	retry::RetryPolicy,
	sync::{SyncHandler, SyncQueue},
};

/// Construction-time configuration for a single [`Collection`].
#[derive(Clone, Debug)]
pub struct CollectionConfig {
	/// Maximum number of distinct contexts the fetch cache retains.
	pub cache_capacity: usize,
	/// How long a cached fetch result remains valid.
	pub cache_ttl: Duration,
	/// Retry budget applied to a failing fetch.
	pub fetch_retries: u32,
	/// Idle window before a batch of pending changes is drained.
	pub sync_debounce: Duration,
	/// Retry policy applied to failing sync batches.
	pub sync_retry_policy: RetryPolicy,
	/// Refetch the authoritative record set once a sync drain finishes, re-establishing the
	/// server item set from scratch rather than trusting the transport's per-change outcomes.
	pub refetch_on_mutation: bool,
}
impl Default for CollectionConfig {
	fn default() -> Self {
		Self {
			cache_capacity: 16,
			cache_ttl: Duration::from_secs(60),
			fetch_retries: 3,
			sync_debounce: Duration::from_millis(250),
			sync_retry_policy: RetryPolicy::default(),
			refetch_on_mutation: false,
		}
	}
}

/// Snapshot of a collection's merged view: server items overlaid with local optimism.
#[derive(Clone, Debug)]
pub struct CollectionState<T> {
	/// Merged item list — server items, with locally pending updates applied in place,
	/// locally pending creates appended, and locally pending removes filtered out.
	pub items: Vec<T>,
	/// Whether the underlying fetch is currently in flight.
	pub is_fetching: bool,
	/// Whether the sync queue currently has a drain in flight.
	pub is_syncing: bool,
	/// Most recent fetch failure, if any, preserved alongside the last known-good items.
	pub fetch_error: Option<String>,
}

struct Inner<T, C> {
	fetch: FetchController<T, C>,
	sync: SyncQueue<T>,
	server_items: RwLock<IndexMap<String, T>>,
	local_creates: RwLock<IndexMap<String, T>>,
	local_removes: RwLock<IndexMap<String, ()>>,
	state: watch::Sender<CollectionState<T>>,
	republish: Mutex<()>,
	refetch_on_mutation: bool,
}
impl<T, C> Inner<T, C>
where
	T: Identified + Clone + Send + Sync + 'static,
	C: Clone + PartialEq + serde::Serialize + Send + Sync + 'static,
{
	/// Replace the server item set with a freshly fetched one and republish.
	async fn apply_fetch_result(&self, items: Vec<T>) {
		*self.server_items.write().await = items.iter().cloned().map(|item| (item.id().to_string(), item)).collect();

		self.republish().await;
	}


	/// Recompute the merged view and republish it, along with the current fetch/sync flags.
	///
	/// Guarded by its own mutex so concurrent callers serialize on publishing a consistent
	/// snapshot rather than racing to overwrite each other's `send_modify`. Called both from
	/// `Collection`'s own methods after a local mutation and from the forwarding task whenever
	/// the fetch controller or sync queue change state on their own schedule.
	async fn republish(&self) {
		let _guard = self.republish.lock().await;

		let server_items = self.server_items.read().await;
		let local_creates = self.local_creates.read().await;
		let local_removes = self.local_removes.read().await;

		let mut items: Vec<T> = server_items
			.values()
			.filter(|item| !local_removes.contains_key(item.id()))
			.cloned()
			.collect();

		for item in local_creates.values() {
			if !local_removes.contains_key(item.id()) {
				items.push(item.clone());
			}
		}

		drop((server_items, local_creates, local_removes));

		let fetch_state = self.fetch.state();

		self.state.send_replace(CollectionState {
			items,
			is_fetching: fetch_state.status == FetchStatus::Fetching,
			is_syncing: self.sync.is_syncing().await,
			fetch_error: fetch_state.error,
		});
	}

	async fn item(&self, id: &str) -> Option<T> {
		if self.local_removes.read().await.contains_key(id) {
			return None;
		}
		if let Some(item) = self.local_creates.read().await.get(id) {
			return Some(item.clone());
		}

		self.server_items.read().await.get(id).cloned()
	}
}

/// One managed collection of records of type `T`, fetched and synced against context `C`.
///
/// `T` must implement [`Identified`] so the collection can key its overlay by record id
/// without interpreting any other field.
pub struct Collection<T, C> {
	inner: Arc<Inner<T, C>>,
	forward_task: JoinHandle<()>,
}
impl<T, C> Drop for Collection<T, C> {
	fn drop(&mut self) {
		self.forward_task.abort();
	}
}
impl<T, C> Collection<T, C>
where
	T: Identified + Clone + Send + Sync + 'static,
	C: Clone + PartialEq + serde::Serialize + Send + Sync + 'static,
{
	/// Construct a collection backed by `fetch_handler`/`sync_handler` (either may be `None`
	/// for a purely local collection with no network backing). `id` identifies this collection
	/// for metrics labeling and is shared by its internal fetch controller and sync queue.
	/// `seed_items`, when present, populates the server item set directly, skipping the
	/// initial fetch a caller would otherwise need to run before the collection has anything
	/// to show.
	pub fn new(
		id: impl Into<String>,
		fetch_handler: Option<Arc<dyn FetchHandler<T, C>>>,
		sync_handler: Option<Arc<dyn SyncHandler<T>>>,
		seed_items: Option<Vec<T>>,
		config: CollectionConfig,
	) -> Self {
		let id = id.into();
		let fetch = FetchController::new(id.clone(), fetch_handler, config.cache_capacity, config.cache_ttl, config.fetch_retries);
		let sync = SyncQueue::new(id, sync_handler, config.sync_debounce, config.sync_retry_policy);
		let server_items: IndexMap<String, T> =
			seed_items.unwrap_or_default().into_iter().map(|item| (item.id().to_string(), item)).collect();
		let (state, _) = watch::channel(CollectionState {
			items: server_items.values().cloned().collect(),
			is_fetching: false,
			is_syncing: false,
			fetch_error: None,
		});
		let mut fetch_changed = fetch.subscribe();
		let mut sync_changed = sync.subscribe();
		let inner = Arc::new(Inner {
			fetch,
			sync,
			server_items: RwLock::new(server_items),
			local_creates: RwLock::new(IndexMap::new()),
			local_removes: RwLock::new(IndexMap::new()),
			state,
			republish: Mutex::new(()),
			refetch_on_mutation: config.refetch_on_mutation,
		});

		let forward_inner = inner.clone();
		let forward_task = tokio::spawn(async move {
			let mut was_syncing = false;

			loop {
				tokio::select! {
					result = fetch_changed.changed() => if result.is_err() { break },
					result = sync_changed.changed() => if result.is_err() { break },
				}

				forward_inner.republish().await;

				let is_syncing = forward_inner.sync.is_syncing().await;

				if forward_inner.refetch_on_mutation && was_syncing && !is_syncing {
					if let Some(ctx) = forward_inner.fetch.context() {
						if let Ok(items) = forward_inner.fetch.refresh(Some(ctx)).await {
							forward_inner.apply_fetch_result(items).await;
						}
					}
				}

				was_syncing = is_syncing;
			}
		});

		Self { inner, forward_task }
	}

	/// Subscribe to the merged collection state; the receiver yields the current state first.
	pub fn subscribe(&self) -> watch::Receiver<CollectionState<T>> {
		self.inner.state.subscribe()
	}

	/// Snapshot the current merged state.
	pub fn state(&self) -> CollectionState<T> {
		self.inner.state.borrow().clone()
	}

	/// Fetch the authoritative record set for `ctx`, replacing the server item set. Any
	/// locally pending optimistic changes continue to overlay the new server items by id.
	pub async fn fetch(&self, ctx: C) -> Vec<T> {
		let items = self.inner.fetch.fetch(ctx).await;

		self.inner.apply_fetch_result(items).await;

		self.inner.state.borrow().items.clone()
	}

	/// Re-run the most recent fetch, bypassing the fetch cache.
	pub async fn refresh(&self, ctx: Option<C>) -> Result<Vec<T>> {
		let items = self.inner.fetch.refresh(ctx).await?;

		self.inner.apply_fetch_result(items).await;

		Ok(self.inner.state.borrow().items.clone())
	}

	/// Apply `mutator` to a clone of the context used by the most recent fetch. If the
	/// result is structurally different, invalidates the old context's cache entry and
	/// fetches the new context, replacing `items` on success.
	///
	/// A no-op if no context has been established yet (no fetch has ever run).
	pub async fn set_context(&self, mutator: impl FnOnce(&mut C)) {
		let Some(old_ctx) = self.inner.fetch.context() else { return };
		let mut new_ctx = old_ctx.clone();

		mutator(&mut new_ctx);

		if new_ctx == old_ctx {
			return;
		}

		self.inner.fetch.invalidate_cache_for_context(&old_ctx).await;
		self.fetch(new_ctx).await;
	}

	/// Optimistically create `item`, making it visible immediately and enqueuing the change
	/// to be synced on the next debounced drain. Returns the item's id.
	pub async fn create(&self, item: T) -> String {
		let id = item.id().to_string();

		self.inner.local_creates.write().await.insert(id.clone(), item.clone());
		self.inner.local_removes.write().await.shift_remove(&id);
		self.inner.republish().await;

		self.inner.sync.enqueue(Change::new(id.clone(), ChangeKind::Create, item)).await;

		id
	}

	/// Optimistically update the record identified by `id` by applying `mutator` to a clone
	/// of its current value, making the change visible immediately and enqueuing it to be
	/// synced on the next debounced drain.
	///
	/// Returns an error if `id` is not currently present in this collection's merged view.
	pub async fn update(&self, id: &str, mutator: impl FnOnce(&mut T)) -> Result<()> {
		let Some(mut item) = self.inner.item(id).await else {
			return Err(Error::Validation { field: "id", reason: format!("'{id}' is not present in this collection") });
		};

		mutator(&mut item);

		if self.inner.local_creates.read().await.contains_key(id) {
			self.inner.local_creates.write().await.insert(id.to_string(), item.clone());
		} else {
			self.inner.server_items.write().await.insert(id.to_string(), item.clone());
		}

		self.inner.republish().await;

		self.inner.sync.enqueue(Change::new(id, ChangeKind::Update, item)).await;

		Ok(())
	}

	/// Optimistically remove the record identified by `id`, hiding it from the merged view
	/// immediately and enqueuing the removal to be synced on the next debounced drain.
	///
	/// A failed removal is not rolled back: the id stays hidden and the retry/error state
	/// is visible via [`Self::item_status`]. The local view is presumed correct until
	/// explicitly contradicted by a refetch.
	pub async fn remove(&self, id: &str) -> Result<()> {
		let last_known = if self.inner.local_creates.write().await.shift_remove(id).is_some() {
			self.inner.republish().await;
			self.inner.sync.cancel_item(id).await;

			return Ok(());
		} else if let Some(item) = self.inner.server_items.read().await.get(id).cloned() {
			item
		} else {
			return Err(Error::Validation { field: "id", reason: format!("'{id}' is not present in this collection") });
		};

		self.inner.local_removes.write().await.insert(id.to_string(), ());
		self.inner.republish().await;

		self.inner.sync.enqueue(Change::new(id, ChangeKind::Remove, last_known)).await;

		Ok(())
	}

	/// Look up a single record by id in the current merged view.
	pub async fn item(&self, id: &str) -> Option<T> {
		self.inner.item(id).await
	}

	/// Current sync status for a single id (idle, pending, syncing, or erroring).
	pub async fn item_status(&self, id: &str) -> ItemStatus {
		self.inner.sync.item_status(id).await
	}

	/// Pause the sync queue; optimistic local mutations still apply immediately.
	pub async fn pause_sync(&self) {
		self.inner.sync.pause().await;
		self.inner.republish().await;
	}

	/// Resume the sync queue, draining anything accumulated while paused, and trigger a
	/// best-effort refresh of the current context. A paused collection can drift from the
	/// server while it sits idle; this resurrects rows removed elsewhere in the meantime
	/// until the collection's own pending changes re-drain and settle the difference.
	/// Silently skipped if no context has ever been established.
	pub async fn resume_sync(&self) {
		self.inner.sync.resume().await;
		self.inner.republish().await;

		let _ = self.refresh(None).await;
	}

	/// Force an immediate sync drain, bypassing the debounce window.
	pub async fn flush_sync(&self) -> Result<()> {
		self.inner.sync.flush().await
	}

	/// Invalidate the fetch cache for every context (use after an out-of-band server change).
	pub async fn invalidate_cache(&self) {
		self.inner.fetch.invalidate_cache().await;
	}
}
