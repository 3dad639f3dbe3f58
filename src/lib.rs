//! Offline-first optimistic collection engine — LRU+TTL caching, debounced/coalescing
//! write-back sync, and a reactive merged view over server and local-only state.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod collection;
pub mod dispatch;
#[cfg(feature = "metrics")] pub mod metrics;
pub mod record;
pub mod registry;
pub mod retry;
pub mod transport;

mod error;
mod fetch;
mod sync;

pub use crate::{
	cache::Cache,
	collection::{Collection, CollectionConfig, CollectionState},
	dispatch::{ChangeHandler, CollectionDispatcher, QueryHandler},
	error::{Error, Result},
	fetch::{FetchController, FetchHandler, FetchState, FetchStatus},
	record::{Change, ChangeKind, Identified, ItemStatus, SyncOutcome, SyncOutcomeEntry},
	registry::Registry,
	retry::{Backoff, JitterStrategy, RetryPolicy},
	sync::{SyncHandler, SyncQueue},
	transport::{FetchAdapter, SyncAdapter, Transport, TransportRequest, TransportResponse},
};
#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
