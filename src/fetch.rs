//! Serializes context-driven fetches for a single collection, with caching, retry, and
//! cooperative cancellation of superseded fetches.
//!
//! Grounded on `hack-ink-jwks-cache`'s `CacheManager`: the single-flight guard there
//! becomes a generation counter here. "Abort the in-flight fetch" maps onto Tokio's
//! `JoinHandle::abort`, which is cooperative in the same sense — the aborted task keeps
//! running until its next await point, but its result is never observed.

use std::sync::{
	Arc,
	atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use tokio::{
	sync::{Mutex, watch},
	task::AbortHandle,
	time,
};

use crate::{Error, Result, cache::Cache, retry::RetryPolicy};

/// Consumer-supplied strategy for retrieving the authoritative record set for a context.
///
/// Implementors should treat cancellation cooperatively where possible (e.g. checking an
/// external cancellation token inside long-running I/O) but are not required to — an
/// aborted fetch's result is simply discarded by [`FetchController`].
#[async_trait]
pub trait FetchHandler<T, C>: Send + Sync
where
	T: Send + 'static,
	C: Send + Sync + 'static,
{
	/// Retrieve the authoritative record set for the given context.
	async fn fetch(&self, ctx: C) -> Result<Vec<T>>;
}

/// Lifecycle status of a [`FetchController`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchStatus {
	/// No fetch is in progress and the last fetch (if any) succeeded or has not run yet.
	Idle,
	/// A fetch is currently in flight.
	Fetching,
	/// The most recent fetch failed after exhausting retries.
	Error,
}

/// Observable state of a [`FetchController`].
#[derive(Clone, Debug)]
pub struct FetchState<T, C> {
	/// Current lifecycle status.
	pub status: FetchStatus,
	/// Most recently known-good item set; preserved across failed fetches.
	pub items: Vec<T>,
	/// Error message from the most recent failed fetch, if `status == Error`.
	pub error: Option<String>,
	/// Retry attempts consumed by the most recent fetch.
	pub retry_count: u32,
	/// Context used for the most recent fetch, if any has run.
	pub current_context: Option<C>,
}
impl<T, C> FetchState<T, C> {
	fn empty() -> Self {
		Self { status: FetchStatus::Idle, items: Vec::new(), error: None, retry_count: 0, current_context: None }
	}
}

/// Owns the fetch cache and the single in-flight fetch for one collection.
///
/// With no handler (pure local mode, per the `Collection` that owns this controller), `fetch`
/// is a no-op that returns whatever items are already known — there is nothing to reach out to.
///
/// Its contract is to [`crate::collection::Collection`], not to end consumers directly.
pub struct FetchController<T, C> {
	id: String,
	handler: Option<Arc<dyn FetchHandler<T, C>>>,
	cache: Mutex<Cache<Vec<T>>>,
	state: watch::Sender<FetchState<T, C>>,
	generation: AtomicU64,
	current_task: Mutex<Option<AbortHandle>>,
	retry_policy: RetryPolicy,
}
impl<T, C> FetchController<T, C>
where
	T: Clone + Send + Sync + 'static,
	C: Clone + PartialEq + serde::Serialize + Send + Sync + 'static,
{
	/// Construct a controller backed by `handler`, with the given fetch-cache sizing and
	/// retry budget. `handler` is `None` for collections running in pure local mode. `id`
	/// identifies the owning collection for metrics labeling.
	pub fn new(
		id: impl Into<String>,
		handler: Option<Arc<dyn FetchHandler<T, C>>>,
		cache_capacity: usize,
		cache_ttl: std::time::Duration,
		fetch_retries: u32,
	) -> Self {
		let retry_policy = RetryPolicy { max_retries: fetch_retries, ..RetryPolicy::default() };

		Self {
			id: id.into(),
			handler,
			cache: Mutex::new(Cache::new(cache_capacity, cache_ttl)),
			state: watch::Sender::new(FetchState::empty()),
			generation: AtomicU64::new(0),
			current_task: Mutex::new(None),
			retry_policy,
		}
	}

	/// Subscribe to state changes; the receiver always yields the current state first.
	pub fn subscribe(&self) -> watch::Receiver<FetchState<T, C>> {
		self.state.subscribe()
	}

	/// Snapshot the current state.
	pub fn state(&self) -> FetchState<T, C> {
		self.state.borrow().clone()
	}

	/// The context used by the most recent fetch, if any.
	pub fn context(&self) -> Option<C> {
		self.state.borrow().current_context.clone()
	}

	/// Whether a fetch is currently in flight.
	pub fn is_fetching(&self) -> bool {
		self.state.borrow().status == FetchStatus::Fetching
	}

	/// Fetch the record set for `ctx`, serving from cache when a valid entry exists.
	///
	/// The *latest* call to this method wins: an earlier, still-running fetch is aborted
	/// and its eventual result (successful or not) is discarded. Callers of a superseded
	/// fetch never see an error — they observe the previous `items` unchanged.
	#[tracing::instrument(skip(self, ctx))]
	pub async fn fetch(&self, ctx: C) -> Vec<T> {
		let Some(handler) = self.handler.clone() else {
			self.state.send_modify(|state| state.current_context = Some(ctx));

			return self.state.borrow().items.clone();
		};

		let key = cache_key(&ctx);

		if let Some(cached) = self.cache.lock().await.get(&key) {
			tracing::debug!("fetch cache hit");

			#[cfg(feature = "metrics")]
			crate::metrics::record_cache_hit(&self.id);

			self.state.send_modify(|state| {
				state.status = FetchStatus::Idle;
				state.items = cached.clone();
				state.error = None;
				state.current_context = Some(ctx.clone());
			});

			return cached;
		}

		#[cfg(feature = "metrics")]
		crate::metrics::record_cache_miss(&self.id);

		let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

		if let Some(previous) = self.current_task.lock().await.take() {
			previous.abort();
		}

		self.state.send_modify(|state| {
			state.status = FetchStatus::Fetching;
			state.current_context = Some(ctx.clone());
		});

		let task_handler = handler.clone();
		let task_ctx = ctx.clone();
		let join = tokio::spawn(async move { task_handler.fetch(task_ctx).await });

		*self.current_task.lock().await = Some(join.abort_handle());

		self.drive_fetch(generation, key, ctx, handler, join).await
	}

	async fn drive_fetch(
		&self,
		generation: u64,
		key: String,
		ctx: C,
		handler: Arc<dyn FetchHandler<T, C>>,
		mut join: tokio::task::JoinHandle<Result<Vec<T>>>,
	) -> Vec<T> {
		let mut attempt = 0u32;

		loop {
			let outcome = (&mut join).await;

			if self.generation.load(Ordering::SeqCst) != generation {
				tracing::debug!("fetch superseded; discarding result");

				return self.state.borrow().items.clone();
			}

			match outcome {
				Ok(Ok(items)) => {
					self.cache.lock().await.set(key, items.clone());

					#[cfg(feature = "metrics")]
					crate::metrics::record_fetch(&self.id, true);

					self.state.send_modify(|state| {
						state.status = FetchStatus::Idle;
						state.items = items.clone();
						state.error = None;
						state.retry_count = attempt;
						state.current_context = Some(ctx.clone());
					});

					return items;
				},
				Ok(Err(err)) =>
					if self.retry_policy.is_retriable(attempt) {
						let backoff = self.retry_policy.backoff(attempt);

						attempt += 1;

						tracing::debug!(attempt, ?backoff, error = %err, "retrying fetch");

						if !backoff.is_zero() {
							time::sleep(backoff).await;
						}

						let retry_handler = handler.clone();
						let retry_ctx = ctx.clone();

						join = tokio::spawn(async move { retry_handler.fetch(retry_ctx).await });
						*self.current_task.lock().await = Some(join.abort_handle());

						continue;
					} else {
						tracing::warn!(error = %err, "fetch exhausted retries");

						#[cfg(feature = "metrics")]
						crate::metrics::record_fetch(&self.id, false);

						self.state.send_modify(|state| {
							state.status = FetchStatus::Error;
							state.error = Some(err.to_string());
							state.retry_count = attempt;
						});

						return self.state.borrow().items.clone();
					},
				Err(join_err) =>
					if join_err.is_cancelled() {
						tracing::debug!("fetch task aborted");

						return self.state.borrow().items.clone();
					} else {
						self.state.send_modify(|state| {
							state.status = FetchStatus::Error;
							state.error = Some(join_err.to_string());
						});

						return self.state.borrow().items.clone();
					},
			}
		}
	}

	/// Invalidate the cache key for `ctx`, defaulting to the current context.
	///
	/// Returns an error if `ctx` is `None` and no context has been established yet.
	pub async fn refresh(&self, ctx: Option<C>) -> Result<Vec<T>> {
		let ctx = match ctx.or_else(|| self.context()) {
			Some(ctx) => ctx,
			None => {
				return Err(Error::Validation {
					field: "context",
					reason: "refresh() requires a context; none has been established yet.".into(),
				});
			},
		};

		self.cache.lock().await.invalidate(&cache_key(&ctx));

		Ok(self.fetch(ctx).await)
	}

	/// Invalidate every cached fetch result.
	pub async fn invalidate_cache(&self) {
		self.cache.lock().await.clear();
	}

	/// Invalidate the cached result for a specific context.
	pub async fn invalidate_cache_for_context(&self, ctx: &C) {
		self.cache.lock().await.invalidate(&cache_key(ctx));
	}
}

fn cache_key<C: serde::Serialize>(ctx: &C) -> String {
	serde_json::to_string(ctx).unwrap_or_default()
}
