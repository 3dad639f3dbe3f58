//! Integration coverage wiring a [`Registry`] straight into a server-side
//! [`CollectionDispatcher`] in-process, exercising the same contract an HTTP boundary would
//! carry between them.

// std
use std::sync::{Arc, Mutex};
// crates.io
use async_trait::async_trait;
use optimistic_collection::{
	ChangeHandler, Collection, CollectionConfig, CollectionDispatcher, Identified, QueryHandler,
	Registry, Result,
};
use serde::Serialize;

#[derive(Clone, Debug, Serialize, PartialEq)]
struct Ticket {
	id: String,
	summary: String,
}
impl Identified for Ticket {
	fn id(&self) -> &str {
		&self.id
	}
}

#[derive(Clone, Serialize, PartialEq, Debug)]
struct Ctx;

/// The "system of record" a server process would own: an in-memory ticket store.
struct TicketStore {
	tickets: Mutex<Vec<Ticket>>,
}
#[async_trait]
impl ChangeHandler<Ticket> for TicketStore {
	async fn create(&self, item: Ticket) -> Result<()> {
		self.tickets.lock().unwrap().push(item);

		Ok(())
	}

	async fn update(&self, id: &str, item: Ticket) -> Result<()> {
		let mut tickets = self.tickets.lock().unwrap();

		if let Some(existing) = tickets.iter_mut().find(|t| t.id == id) {
			*existing = item;
		}

		Ok(())
	}

	async fn remove(&self, id: &str) -> Result<()> {
		self.tickets.lock().unwrap().retain(|t| t.id != id);

		Ok(())
	}
}
#[async_trait]
impl QueryHandler<Ticket, Ctx> for TicketStore {
	async fn query(&self, _ctx: Ctx) -> Result<Vec<Ticket>> {
		Ok(self.tickets.lock().unwrap().clone())
	}
}

#[tokio::test]
async fn registry_collections_round_trip_through_the_server_dispatcher() {
	let store = Arc::new(TicketStore { tickets: Mutex::new(vec![]) });
	let dispatcher = Arc::new(CollectionDispatcher::new(store.clone()));
	let registry: Registry<Ticket, Ctx> = Registry::new(Some(dispatcher), CollectionConfig::default());

	let inbox: Arc<Collection<Ticket, Ctx>> = registry.get_or_create("inbox").await;

	inbox.create(Ticket { id: "t1".into(), summary: "file the report".into() }).await;
	inbox.flush_sync().await.unwrap();

	assert_eq!(store.tickets.lock().unwrap().len(), 1);

	let refetched = inbox.refresh(Some(Ctx)).await.unwrap();
	assert_eq!(refetched, vec![Ticket { id: "t1".into(), summary: "file the report".into() }]);

	inbox.remove("t1").await.unwrap();
	inbox.flush_sync().await.unwrap();

	assert!(store.tickets.lock().unwrap().is_empty());
}

#[tokio::test]
async fn distinct_registry_ids_stay_isolated_even_against_one_shared_dispatcher() {
	let store = Arc::new(TicketStore { tickets: Mutex::new(vec![]) });
	let dispatcher = Arc::new(CollectionDispatcher::new(store.clone()));
	let registry: Registry<Ticket, Ctx> = Registry::new(Some(dispatcher), CollectionConfig::default());

	let a = registry.get_or_create("queue-a").await;
	let b = registry.get_or_create("queue-b").await;

	a.create(Ticket { id: "shared-id".into(), summary: "from a".into() }).await;
	a.flush_sync().await.unwrap();

	assert_eq!(a.item("shared-id").await, Some(Ticket { id: "shared-id".into(), summary: "from a".into() }));
	assert_eq!(b.item("shared-id").await, None, "collections under different registry ids hold independent overlays");

	assert!(Arc::ptr_eq(&registry.get_or_create("queue-a").await, &a));
}
