//! Process-scoped mapping from collection id to a live [`Collection`] handle.
//!
//! Grounded on `hack-ink-jwks-cache`'s `Registry`, which maps a `TenantProviderKey` to a
//! `ProviderHandle` behind a single `RwLock<HashMap<..>>` rather than sharding per key —
//! registrations are rare relative to reads, so one lock is plenty. This registry keeps
//! that shape but maps a plain string id to a [`Collection`], constructed lazily from a
//! single shared transport the first time an id is touched.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use crate::{
	collection::{Collection, CollectionConfig},
	fetch::FetchHandler,
	record::Identified,
	sync::SyncHandler,
	transport::{FetchAdapter, SyncAdapter, Transport},
};

/// Owns every [`Collection`] for a given record type `T` and context `C`, keyed by a
/// consumer-assigned collection id (e.g. a resource name or a tenant-scoped namespace).
///
/// Not a global singleton: a process wires up one `Registry` per record type it manages and
/// holds it for the lifetime it needs, the same way a `hack-ink-jwks-cache` consumer holds
/// its own `Registry` rather than reaching for a `static`.
pub struct Registry<T, C> {
	collections: RwLock<HashMap<String, Arc<Collection<T, C>>>>,
	transport: Option<Arc<dyn Transport<T, C>>>,
	config: CollectionConfig,
}
impl<T, C> Registry<T, C>
where
	T: Identified + Clone + Send + Sync + 'static,
	C: Clone + PartialEq + serde::Serialize + Send + Sync + 'static,
{
	/// Construct a registry backed by `transport` (or pure local mode if `None`), with every
	/// collection it creates configured per `config`.
	pub fn new(transport: Option<Arc<dyn Transport<T, C>>>, config: CollectionConfig) -> Self {
		Self { collections: RwLock::new(HashMap::new()), transport, config }
	}

	/// Get the collection for `id`, creating it (backed by the registry's shared transport,
	/// scoped by `id`) if this is the first time it has been touched.
	pub async fn get_or_create(&self, id: &str) -> Arc<Collection<T, C>> {
		if let Some(existing) = self.collections.read().await.get(id) {
			return existing.clone();
		}

		let mut collections = self.collections.write().await;

		if let Some(existing) = collections.get(id) {
			return existing.clone();
		}

		let fetch_handler: Option<Arc<dyn FetchHandler<T, C>>> =
			self.transport.clone().map(|transport| Arc::new(FetchAdapter::new(id, transport)) as _);
		let sync_handler: Option<Arc<dyn SyncHandler<T>>> =
			self.transport.clone().map(|transport| Arc::new(SyncAdapter::new(id, transport)) as _);
		let collection = Arc::new(Collection::new(id, fetch_handler, sync_handler, None, self.config.clone()));

		collections.insert(id.to_string(), collection.clone());

		collection
	}

	/// Get the collection for `id` if it has already been created, without creating one.
	pub async fn get(&self, id: &str) -> Option<Arc<Collection<T, C>>> {
		self.collections.read().await.get(id).cloned()
	}

	/// Drop the collection for `id`, if present. Returns whether one was removed.
	///
	/// In-flight fetches or syncs belonging to the removed collection continue to run to
	/// completion; they simply have no effect once the `Arc` they were driven through is no
	/// longer reachable from the registry.
	pub async fn clear(&self, id: &str) -> bool {
		self.collections.write().await.remove(id).is_some()
	}

	/// Drop every collection currently registered.
	pub async fn clear_all(&self) {
		self.collections.write().await.clear();
	}

	/// Every collection id currently registered.
	pub async fn ids(&self) -> Vec<String> {
		self.collections.read().await.keys().cloned().collect()
	}
}
