//! Server-side counterpart to [`crate::transport::Transport`]: turns one
//! [`TransportRequest`] into concurrent calls against per-operation handlers and aggregates
//! their outcomes back into a [`TransportResponse`].
//!
//! The client side of this crate never needs more than "send a request, get a response";
//! this module is for the process on the other end of that call, typically a web server.
//! Built on `futures::future::join_all`, the concurrent-fan-out primitive used anywhere a
//! batch of independent async operations needs to resolve as a unit.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::{
	Result,
	record::{ChangeKind, SyncOutcome},
	transport::{Transport, TransportRequest, TransportResponse},
};

/// Applies a single optimistic change to the system of record.
#[async_trait]
pub trait ChangeHandler<T>: Send + Sync
where
	T: Send + Sync + 'static,
{
	/// Persist a newly created record.
	async fn create(&self, item: T) -> Result<()>;
	/// Apply an update to the record identified by `id`.
	async fn update(&self, id: &str, item: T) -> Result<()>;
	/// Delete the record identified by `id`.
	async fn remove(&self, id: &str) -> Result<()>;
}

/// Answers a fetch query for a given context.
#[async_trait]
pub trait QueryHandler<T, C>: Send + Sync
where
	T: Send + Sync + 'static,
	C: Send + Sync + 'static,
{
	/// Retrieve the authoritative record set for `ctx`.
	async fn query(&self, ctx: C) -> Result<Vec<T>>;
}

/// Combines a [`ChangeHandler`] and a [`QueryHandler`] into a [`Transport`] a server process
/// can hand directly to whatever transport binding it exposes (HTTP, WebSocket, ...).
///
/// Per-change outcomes are resolved concurrently: a slow `update` does not hold up an
/// independent `remove` in the same batch. Results are reassembled keyed by change id
/// regardless of completion order, so callers never see a positional mismatch.
pub struct CollectionDispatcher<H> {
	handler: Arc<H>,
}
impl<H> CollectionDispatcher<H> {
	/// Construct a dispatcher delegating every operation to `handler`.
	pub fn new(handler: Arc<H>) -> Self {
		Self { handler }
	}
}
#[async_trait]
impl<T, C, H> Transport<T, C> for CollectionDispatcher<H>
where
	T: Send + Sync + 'static,
	C: Send + Sync + 'static,
	H: ChangeHandler<T> + QueryHandler<T, C> + 'static,
{
	async fn send(&self, request: TransportRequest<T, C>) -> Result<TransportResponse<T>> {
		let results = match request.query {
			Some(ctx) => Some(self.handler.query(ctx).await?),
			None => None,
		};

		let sync_results = match request.changes {
			Some(changes) => {
				let outcomes = join_all(changes.into_iter().map(|change| {
					let handler = self.handler.clone();

					async move {
						let id = change.id;
						let outcome = match change.kind {
							ChangeKind::Create => handler.create(change.data).await,
							ChangeKind::Update => handler.update(&id, change.data).await,
							ChangeKind::Remove => handler.remove(&id).await,
						};

						match outcome {
							Ok(()) => (id, SyncOutcome::Success),
							Err(err) => (id, SyncOutcome::Error { error: err.to_string() }),
						}
					}
				}))
				.await;

				Some(outcomes.into_iter().collect())
			},
			None => None,
		};

		Ok(TransportResponse { results, sync_results })
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;

	use serde::Serialize;

	use super::*;
	use crate::record::{Change, ChangeKind};

	#[derive(Clone, Serialize, PartialEq, Debug)]
	struct Item {
		id: String,
	}

	#[derive(Clone, Serialize, PartialEq, Debug)]
	struct Ctx;

	struct RecordingStore {
		created: Mutex<Vec<String>>,
		fail_id: Option<String>,
	}
	#[async_trait]
	impl ChangeHandler<Item> for RecordingStore {
		async fn create(&self, item: Item) -> Result<()> {
			if Some(&item.id) == self.fail_id.as_ref() {
				return Err(crate::Error::Sync("rejected".into()));
			}

			self.created.lock().unwrap().push(item.id);

			Ok(())
		}

		async fn update(&self, _id: &str, _item: Item) -> Result<()> {
			Ok(())
		}

		async fn remove(&self, _id: &str) -> Result<()> {
			Ok(())
		}
	}
	#[async_trait]
	impl QueryHandler<Item, Ctx> for RecordingStore {
		async fn query(&self, _ctx: Ctx) -> Result<Vec<Item>> {
			Ok(self.created.lock().unwrap().iter().map(|id| Item { id: id.clone() }).collect())
		}
	}

	#[tokio::test]
	async fn dispatches_each_change_and_reports_per_id_outcomes() {
		let store = Arc::new(RecordingStore { created: Mutex::new(Vec::new()), fail_id: Some("bad".into()) });
		let dispatcher = CollectionDispatcher::new(store);

		let request = TransportRequest {
			scope: "items".into(),
			query: None,
			changes: Some(vec![
				Change::new("ok", ChangeKind::Create, Item { id: "ok".into() }),
				Change::new("bad", ChangeKind::Create, Item { id: "bad".into() }),
			]),
		};
		let response: TransportResponse<Item> =
			Transport::<Item, Ctx>::send(&dispatcher, request).await.unwrap();
		let sync_results = response.sync_results.unwrap();

		assert!(matches!(sync_results.get("ok"), Some(SyncOutcome::Success)));
		assert!(matches!(sync_results.get("bad"), Some(SyncOutcome::Error { .. })));
	}

	#[tokio::test]
	async fn query_request_returns_results_without_touching_sync_results() {
		let store = Arc::new(RecordingStore { created: Mutex::new(vec!["a".into()]), fail_id: None });
		let dispatcher = CollectionDispatcher::new(store);

		let request: TransportRequest<Item, Ctx> = TransportRequest { scope: "items".into(), query: Some(Ctx), changes: None };
		let response = Transport::<Item, Ctx>::send(&dispatcher, request).await.unwrap();

		assert_eq!(response.results, Some(vec![Item { id: "a".into() }]));
		assert!(response.sync_results.is_none());
	}
}
