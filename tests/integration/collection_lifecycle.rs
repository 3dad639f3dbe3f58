//! Integration coverage for a collection's optimistic lifecycle against an in-process
//! transport: create-then-sync, pause/resume, and refetch-replaces-optimism.

// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use async_trait::async_trait;
use optimistic_collection::{
	ChangeKind, Collection, CollectionConfig, FetchAdapter, FetchHandler, Identified, ItemStatus,
	Result, SyncAdapter, SyncHandler, SyncOutcome, Transport, TransportRequest, TransportResponse,
};
use serde::Serialize;
use tokio::time::{self, Duration as TokioDuration};

#[derive(Clone, Debug, Serialize, PartialEq)]
struct Task {
	id: String,
	title: String,
}
impl Identified for Task {
	fn id(&self) -> &str {
		&self.id
	}
}

#[derive(Clone, Serialize, PartialEq, Debug)]
struct Ctx;

/// Backend fake: holds the "server" record set in a mutex and always accepts sync batches.
struct FakeBackend {
	server_items: std::sync::Mutex<Vec<Task>>,
}
#[async_trait]
impl Transport<Task, Ctx> for FakeBackend {
	async fn send(&self, request: TransportRequest<Task, Ctx>) -> Result<TransportResponse<Task>> {
		let results = request.query.map(|_| self.server_items.lock().unwrap().clone());
		let sync_results = request.changes.map(|changes| {
			let mut server = self.server_items.lock().unwrap();

			changes
				.into_iter()
				.map(|change| {
					match change.kind {
						ChangeKind::Create | ChangeKind::Update =>
							if let Some(existing) = server.iter_mut().find(|item| item.id == change.id) {
								*existing = change.data;
							} else {
								server.push(change.data);
							},
						ChangeKind::Remove => server.retain(|item| item.id != change.id),
					}

					(change.id, SyncOutcome::Success)
				})
				.collect()
		});

		Ok(TransportResponse { results, sync_results })
	}
}

fn config() -> CollectionConfig {
	CollectionConfig { sync_debounce: Duration::from_millis(10), ..CollectionConfig::default() }
}

/// Wires a bare [`Transport`] into a [`Collection`] through the adapter pair, the way
/// [`optimistic_collection::Registry`] does internally.
fn build_collection<TR>(id: &str, transport: Arc<TR>, config: CollectionConfig) -> Collection<Task, Ctx>
where
	TR: Transport<Task, Ctx> + 'static,
{
	let fetch_handler: Arc<dyn FetchHandler<Task, Ctx>> = Arc::new(FetchAdapter::new(id, transport.clone()));
	let sync_handler: Arc<dyn SyncHandler<Task>> = Arc::new(SyncAdapter::new(id, transport));

	Collection::new(id, Some(fetch_handler), Some(sync_handler), None, config)
}

#[tokio::test(start_paused = true)]
async fn create_is_visible_then_lands_on_the_server_after_one_drain() {
	let backend = Arc::new(FakeBackend { server_items: std::sync::Mutex::new(vec![]) });
	let collection = build_collection("tasks", backend.clone(), config());

	collection.create(Task { id: "t1".into(), title: "write tests".into() }).await;
	assert_eq!(collection.item_status("t1").await, ItemStatus::Pending { kind: ChangeKind::Create, retries: 0 });

	collection.flush_sync().await.unwrap();

	assert_eq!(collection.item_status("t1").await, ItemStatus::Idle);
	assert!(backend.server_items.lock().unwrap().iter().any(|t| t.id == "t1"));
}

#[tokio::test(start_paused = true)]
async fn pause_then_resume_defers_the_server_mutation() {
	let backend = Arc::new(FakeBackend { server_items: std::sync::Mutex::new(vec![]) });
	let collection = build_collection("tasks", backend.clone(), config());

	collection.pause_sync().await;
	collection.create(Task { id: "a".into(), title: "one".into() }).await;
	collection.create(Task { id: "b".into(), title: "two".into() }).await;

	time::advance(TokioDuration::from_millis(500)).await;
	time::sleep(TokioDuration::from_millis(1)).await;
	assert!(backend.server_items.lock().unwrap().is_empty());

	collection.resume_sync().await;
	collection.flush_sync().await.unwrap();

	let server = backend.server_items.lock().unwrap();
	assert_eq!(server.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn refetch_replaces_server_items_but_leaves_a_still_pending_create_visible() {
	let backend = Arc::new(FakeBackend {
		server_items: std::sync::Mutex::new(vec![
			Task { id: "1".into(), title: "one".into() },
			Task { id: "2".into(), title: "two".into() },
			Task { id: "3".into(), title: "three".into() },
		]),
	});
	let collection = build_collection("tasks", backend.clone(), config());

	collection.fetch(Ctx).await;
	collection.pause_sync().await;
	collection.create(Task { id: "temp".into(), title: "draft".into() }).await;

	assert!(collection.item("temp").await.is_some());

	let items = collection.refresh(Some(Ctx)).await.unwrap();

	assert_eq!(items.len(), 3);
	assert!(collection.item("temp").await.is_some(), "locally pending create still overlays the refetched set");
	assert_eq!(
		collection.item_status("temp").await,
		ItemStatus::Pending { kind: ChangeKind::Create, retries: 0 },
		"the create remains queued, unaffected by the refetch, until its own drain"
	);
}

#[derive(Clone)]
struct FlakyOnce {
	calls: Arc<AtomicUsize>,
	backend: Arc<FakeBackend>,
}
#[async_trait]
impl Transport<Task, Ctx> for FlakyOnce {
	async fn send(&self, request: TransportRequest<Task, Ctx>) -> Result<TransportResponse<Task>> {
		if request.changes.is_some() && self.calls.fetch_add(1, Ordering::SeqCst) < 2 {
			return Ok(TransportResponse {
				results: None,
				sync_results: request.changes.map(|changes| {
					changes.into_iter().map(|c| (c.id, SyncOutcome::Error { error: "503".into() })).collect()
				}),
			});
		}

		self.backend.send(request).await
	}
}

#[tokio::test(start_paused = true)]
async fn retried_sync_eventually_lands_once_the_backend_recovers() {
	let backend = Arc::new(FakeBackend { server_items: std::sync::Mutex::new(vec![]) });
	let flaky = Arc::new(FlakyOnce { calls: Arc::new(AtomicUsize::new(0)), backend: backend.clone() });
	let mut cfg = config();
	cfg.sync_retry_policy.initial_backoff = Duration::from_millis(5);
	cfg.sync_retry_policy.max_backoff = Duration::from_millis(20);
	cfg.sync_retry_policy.jitter = optimistic_collection::JitterStrategy::None;
	let collection = build_collection("tasks", flaky.clone(), cfg);

	collection.create(Task { id: "r1".into(), title: "retry me".into() }).await;

	for _ in 0..20 {
		time::advance(TokioDuration::from_millis(50)).await;
		time::sleep(TokioDuration::from_millis(1)).await;

		if collection.item_status("r1").await == ItemStatus::Idle {
			break;
		}
	}

	assert_eq!(collection.item_status("r1").await, ItemStatus::Idle);
	assert!(flaky.calls.load(Ordering::SeqCst) >= 3);
	assert!(backend.server_items.lock().unwrap().iter().any(|t| t.id == "r1"));
}
