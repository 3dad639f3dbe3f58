//! Debounced, coalescing, retrying write-back queue.
//!
//! Grounded on `hack-ink-jwks-cache`'s `RetryExecutor` for the retry/backoff half and on
//! `cache::manager::CacheManager`'s single-flight `Mutex` guard for the "never drain twice
//! concurrently" half; the debounce/coalescing half is new, built the way the rest of this
//! crate composes `tokio::sync` primitives.

use std::{
	collections::HashMap,
	sync::Arc,
	time::Duration,
};

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::{
	sync::{Mutex, Notify, watch},
	task::JoinHandle,
	time::Instant,
};

use crate::{
	record::{Change, ChangeKind, ItemStatus, SyncOutcome},
	retry::{Backoff, RetryPolicy},
};

/// Consumer-supplied strategy for applying a batch of pending changes to the backend.
///
/// A single call receives every change due in one drain; the returned map must carry one
/// entry per input change — a missing entry is treated as an error rather than a silent
/// pass. Returning `Err` fails the whole batch, which is retried as a unit on the next
/// eligible drain.
#[async_trait]
pub trait SyncHandler<T>: Send + Sync
where
	T: Send + Sync + 'static,
{
	/// Apply `changes` and report the outcome of each.
	async fn sync(&self, changes: Vec<Change<T>>) -> crate::Result<HashMap<String, SyncOutcome>>;
}

struct ErrorEntry<T> {
	change: Change<T>,
	error: String,
	backoff: Backoff,
}

struct State<T> {
	queue: IndexMap<String, Change<T>>,
	in_flight: IndexMap<String, Change<T>>,
	errors: IndexMap<String, ErrorEntry<T>>,
	is_paused: bool,
	is_syncing: bool,
}
impl<T> State<T> {
	fn new() -> Self {
		Self {
			queue: IndexMap::new(),
			in_flight: IndexMap::new(),
			errors: IndexMap::new(),
			is_paused: false,
			is_syncing: false,
		}
	}
}

struct Shared<T> {
	id: String,
	state: Mutex<State<T>>,
	handler: Option<Arc<dyn SyncHandler<T>>>,
	retry_policy: RetryPolicy,
	debounce: Duration,
	changed: watch::Sender<()>,
	deadline: Mutex<Option<Instant>>,
	wake: Notify,
}

/// Holds pending, in-flight, and failed changes for one collection and drains them to a
/// [`SyncHandler`] on a debounce timer.
///
/// Three invariants hold for the life of the queue: an id lives in at most one of `queue`,
/// `in_flight`, `errors` at a time; only `drain` moves entries into or out of `in_flight`;
/// and a change already in `in_flight` is never mutated in place — a concurrent enqueue for
/// the same id is coalesced into `queue` instead, to be applied on the *next* drain.
pub struct SyncQueue<T> {
	shared: Arc<Shared<T>>,
	drain_task: JoinHandle<()>,
}
impl<T> Drop for SyncQueue<T> {
	fn drop(&mut self) {
		self.drain_task.abort();
	}
}
impl<T> SyncQueue<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Construct a queue backed by `handler` (or pure local mode if `None`, where every
	/// enqueued change is treated as immediately successful), draining at most once per
	/// `debounce` window and retrying failures per `retry_policy`. `id` identifies the owning
	/// collection for metrics labeling.
	pub fn new(
		id: impl Into<String>,
		handler: Option<Arc<dyn SyncHandler<T>>>,
		debounce: Duration,
		retry_policy: RetryPolicy,
	) -> Self {
		let (changed, _) = watch::channel(());
		let shared = Arc::new(Shared {
			id: id.into(),
			state: Mutex::new(State::new()),
			handler,
			retry_policy,
			debounce,
			changed,
			deadline: Mutex::new(None),
			wake: Notify::new(),
		});
		let drain_task = tokio::spawn(Self::run(shared.clone()));

		Self { shared, drain_task }
	}

	/// Subscribe to a tick fired after every change to queue contents, `is_syncing`, or
	/// `is_paused`. Carries no payload; callers re-query the state they need.
	pub fn subscribe(&self) -> watch::Receiver<()> {
		self.shared.changed.subscribe()
	}

	/// Whether a drain is currently in flight.
	pub async fn is_syncing(&self) -> bool {
		self.shared.state.lock().await.is_syncing
	}

	/// Whether the queue is paused.
	pub async fn is_paused(&self) -> bool {
		self.shared.state.lock().await.is_paused
	}

	/// Number of changes waiting for the next drain (excludes in-flight and error entries).
	pub async fn pending_count(&self) -> usize {
		self.shared.state.lock().await.queue.len()
	}

	/// Enqueue `change`, coalescing it with any existing pending, in-flight, or failed entry
	/// for the same id, and (re)schedule a debounced drain.
	#[tracing::instrument(skip(self, change), fields(id = %change.id))]
	pub async fn enqueue(&self, change: Change<T>) {
		{
			let mut state = self.shared.state.lock().await;

			coalesce(&mut state, change);
		}

		self.shared.changed.send(()).ok();
		self.schedule_drain(self.shared.debounce).await;
	}

	/// Pause draining; already-in-flight syncs run to completion but no new drain starts.
	pub async fn pause(&self) {
		self.shared.state.lock().await.is_paused = true;
		self.shared.changed.send(()).ok();
	}

	/// Resume draining and immediately schedule a drain if anything is pending.
	pub async fn resume(&self) {
		self.shared.state.lock().await.is_paused = false;
		self.shared.changed.send(()).ok();
		self.schedule_drain(Duration::ZERO).await;
	}

	/// Remove `id` from every internal map; a no-op if it is not tracked or is already
	/// in flight (an in-flight change cannot be safely un-sent).
	pub async fn cancel_item(&self, id: &str) {
		let mut state = self.shared.state.lock().await;

		state.queue.shift_remove(id);
		state.errors.shift_remove(id);

		drop(state);

		self.shared.changed.send(()).ok();
	}

	/// Force an immediate drain, bypassing the debounce window. A no-op while paused or
	/// while a drain is already in flight. Awaits the drain's completion.
	pub async fn flush(&self) -> crate::Result<()> {
		Self::drain_once(&self.shared).await;

		Ok(())
	}

	/// Current sync status for a single id, for the owning collection's state projection.
	pub async fn item_status(&self, id: &str) -> ItemStatus {
		let state = self.shared.state.lock().await;

		if let Some(change) = state.in_flight.get(id) {
			return ItemStatus::Syncing { kind: change.kind, retries: change.retries };
		}
		if let Some(entry) = state.errors.get(id) {
			return ItemStatus::Error { kind: entry.change.kind, retries: entry.change.retries, error: entry.error.clone() };
		}
		if let Some(change) = state.queue.get(id) {
			return ItemStatus::Pending { kind: change.kind, retries: change.retries };
		}

		ItemStatus::Idle
	}

	async fn schedule_drain(&self, delay: Duration) {
		*self.shared.deadline.lock().await = Some(Instant::now() + delay);
		self.shared.wake.notify_one();
	}

	async fn run(shared: Arc<Shared<T>>) {
		loop {
			let deadline = *shared.deadline.lock().await;

			match deadline {
				None => shared.wake.notified().await,
				Some(at) => {
					tokio::select! {
						_ = tokio::time::sleep_until(at) => {
							let due = {
								let mut guard = shared.deadline.lock().await;
								let due = guard.is_some_and(|d| Instant::now() >= d);
								if due {
									*guard = None;
								}
								due
							};

							if due {
								Self::drain_once(&shared).await;
							}
						},
						_ = shared.wake.notified() => {},
					}
				},
			}
		}
	}

	async fn drain_once(shared: &Arc<Shared<T>>) {
		let changes = {
			let mut state = shared.state.lock().await;

			if state.is_paused || state.is_syncing {
				return;
			}

			let now = Instant::now();
			let queued: Vec<String> = state.queue.keys().cloned().collect();
			let retriable: Vec<String> = state
				.errors
				.iter()
				.filter(|(_, entry)| {
					entry.backoff.is_eligible(now) && shared.retry_policy.is_retriable(entry.change.retries)
				})
				.map(|(id, _)| id.clone())
				.collect();

			if queued.is_empty() && retriable.is_empty() {
				return;
			}

			for id in queued {
				if let Some(change) = state.queue.shift_remove(&id) {
					state.in_flight.insert(id, change);
				}
			}
			for id in retriable {
				#[cfg(feature = "metrics")]
				crate::metrics::record_sync_retry(&shared.id);

				if let Some(entry) = state.errors.shift_remove(&id) {
					state.in_flight.insert(id, entry.change);
				}
			}

			state.is_syncing = true;

			state.in_flight.values().cloned().collect::<Vec<_>>()
		};

		#[cfg(feature = "metrics")]
		crate::metrics::record_sync_drain(&shared.id, changes.len());

		shared.changed.send(()).ok();

		let outcome = match &shared.handler {
			Some(handler) => handler.sync(changes.clone()).await,
			None => Ok(changes.iter().map(|change| (change.id.clone(), SyncOutcome::Success)).collect()),
		};

		let mut state = shared.state.lock().await;
		let in_flight_ids: Vec<String> = state.in_flight.keys().cloned().collect();

		match outcome {
			Ok(sync_results) => {
				for id in in_flight_ids {
					let outcome = sync_results.get(&id).cloned();
					let Some(change) = state.in_flight.shift_remove(&id) else { continue };

					match outcome {
						Some(SyncOutcome::Success) => {},
						Some(SyncOutcome::Error { error }) =>
							move_to_errors(&mut state, &shared.retry_policy, &shared.id, change, error),
						None => move_to_errors(
							&mut state,
							&shared.retry_policy,
							&shared.id,
							change,
							"transport did not report an outcome for this change".into(),
						),
					}
				}
			},
			Err(err) => {
				tracing::warn!(error = %err, "sync batch failed");

				for id in in_flight_ids {
					if let Some(change) = state.in_flight.shift_remove(&id) {
						move_to_errors(&mut state, &shared.retry_policy, &shared.id, change, err.to_string());
					}
				}
			},
		}

		state.is_syncing = false;

		let now = Instant::now();
		let redrain = !state.queue.is_empty()
			|| state
				.errors
				.values()
				.any(|entry| entry.backoff.is_eligible(now) && shared.retry_policy.is_retriable(entry.change.retries));

		drop(state);

		shared.changed.send(()).ok();

		if redrain {
			*shared.deadline.lock().await = Some(now);
			shared.wake.notify_one();
		}
	}
}

fn move_to_errors<T>(state: &mut State<T>, policy: &RetryPolicy, collection_id: &str, mut change: Change<T>, error: String) {
	let attempt = change.retries;

	change.retries += 1;

	let backoff = Backoff::record_failure(policy, Instant::now(), attempt);

	#[cfg(feature = "metrics")]
	crate::metrics::record_sync_error(collection_id);
	#[cfg(not(feature = "metrics"))]
	let _ = collection_id;

	tracing::debug!(id = %change.id, attempt, "sync attempt failed, scheduling retry eligibility");

	state.errors.insert(change.id.clone(), ErrorEntry { change, error, backoff });
}

/// Coalesce `incoming` with whatever this id currently holds: an in-flight change is left
/// untouched and the new intent is queued for the next drain; an errored change is retried
/// immediately by moving back to `queue` with the incoming payload, carrying its retry
/// count forward; a queued change is merged with the incoming one (create+update stays
/// create, create+remove cancels outright, update+remove becomes remove); a remove already
/// queued absorbs nothing further.
fn coalesce<T>(state: &mut State<T>, incoming: Change<T>) {
	let id = incoming.id.clone();

	if state.in_flight.contains_key(&id) {
		state.queue.insert(id, incoming);

		return;
	}

	if let Some(mut existing) = state.errors.shift_remove(&id) {
		existing.change.kind = incoming.kind;
		existing.change.data = incoming.data;

		state.queue.insert(id, existing.change);

		return;
	}

	let Some(existing) = state.queue.get(&id) else {
		state.queue.insert(id, incoming);

		return;
	};

	match (existing.kind, incoming.kind) {
		(ChangeKind::Create, ChangeKind::Remove) => {
			state.queue.shift_remove(&id);
		},
		(ChangeKind::Remove, _) => {
			tracing::warn!(id = %id, "ignoring change enqueued after a pending removal");
		},
		(ChangeKind::Create, _) => {
			state.queue.insert(id, Change { kind: ChangeKind::Create, data: incoming.data, ..incoming });
		},
		(_, ChangeKind::Remove) => {
			state.queue.insert(id, Change { kind: ChangeKind::Remove, data: incoming.data, ..incoming });
		},
		(_, _) => {
			state.queue.insert(id, Change { kind: ChangeKind::Update, data: incoming.data, ..incoming });
		},
	}
}
