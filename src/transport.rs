//! The consumer-supplied network boundary: a single request/response contract that both
//! fetches and syncs go through, plus adapters wiring it into [`crate::fetch::FetchHandler`]
//! and [`crate::sync::SyncHandler`].
//!
//! Grounded on `hack-ink-jwks-cache`'s `http::client::HttpClient`/`http::semantics`, which
//! draw the same line: one transport trait owning wire concerns, with narrower traits above
//! it for what the rest of the crate actually calls.

use std::{collections::HashMap, marker::PhantomData, sync::Arc};

use async_trait::async_trait;

use crate::{
	Result,
	fetch::FetchHandler,
	record::{Change, SyncOutcome},
	sync::SyncHandler,
};

/// A single request to the transport: either a query for the authoritative record set under
/// `scope`/`query`, or a batch of pending changes to apply, or both.
#[derive(Clone, Debug)]
pub struct TransportRequest<T, C> {
	/// Opaque scope identifier for the collection issuing this request (its registry id).
	pub scope: String,
	/// Context to fetch against, if this request is a fetch.
	pub query: Option<C>,
	/// Changes to apply, if this request is a sync.
	pub changes: Option<Vec<Change<T>>>,
}

/// The transport's reply: fetched items, per-change sync outcomes, or both.
#[derive(Clone, Debug)]
pub struct TransportResponse<T> {
	/// Authoritative record set, present when the request carried a `query`.
	pub results: Option<Vec<T>>,
	/// Per-change outcome keyed by change id, present when the request carried `changes`.
	pub sync_results: Option<HashMap<String, SyncOutcome>>,
}
impl<T> Default for TransportResponse<T> {
	fn default() -> Self {
		Self { results: None, sync_results: None }
	}
}

/// The boundary a consumer implements to connect a collection to a real backend.
///
/// One implementation typically backs every collection in a [`crate::registry::Registry`];
/// `scope` on the request is how a single transport disambiguates between them.
#[async_trait]
pub trait Transport<T, C>: Send + Sync
where
	T: Send + Sync + 'static,
	C: Send + Sync + 'static,
{
	/// Perform one round trip for the given request.
	async fn send(&self, request: TransportRequest<T, C>) -> Result<TransportResponse<T>>;
}

/// Adapts a shared [`Transport`] into the narrower [`FetchHandler`] contract a
/// [`crate::fetch::FetchController`] calls.
pub struct FetchAdapter<T, C, TR: ?Sized> {
	scope: String,
	transport: Arc<TR>,
	_marker: PhantomData<fn() -> (T, C)>,
}
impl<T, C, TR: ?Sized> FetchAdapter<T, C, TR> {
	/// Wrap `transport` for fetches scoped to `scope` (the owning collection's id).
	pub fn new(scope: impl Into<String>, transport: Arc<TR>) -> Self {
		Self { scope: scope.into(), transport, _marker: PhantomData }
	}
}
#[async_trait]
impl<T, C, TR: ?Sized> FetchHandler<T, C> for FetchAdapter<T, C, TR>
where
	T: Send + Sync + 'static,
	C: Send + Sync + 'static,
	TR: Transport<T, C> + 'static,
{
	async fn fetch(&self, ctx: C) -> Result<Vec<T>> {
		let request = TransportRequest { scope: self.scope.clone(), query: Some(ctx), changes: None };
		let response = self.transport.send(request).await?;

		Ok(response.results.unwrap_or_default())
	}
}

/// Adapts a shared [`Transport`] into the narrower [`SyncHandler`] contract a
/// [`crate::sync::SyncQueue`] calls.
pub struct SyncAdapter<T, C, TR: ?Sized> {
	scope: String,
	transport: Arc<TR>,
	_marker: PhantomData<fn() -> (T, C)>,
}
impl<T, C, TR: ?Sized> SyncAdapter<T, C, TR> {
	/// Wrap `transport` for syncs scoped to `scope` (the owning collection's id).
	pub fn new(scope: impl Into<String>, transport: Arc<TR>) -> Self {
		Self { scope: scope.into(), transport, _marker: PhantomData }
	}
}
#[async_trait]
impl<T, C, TR: ?Sized> SyncHandler<T> for SyncAdapter<T, C, TR>
where
	T: Send + Sync + 'static,
	C: Send + Sync + 'static,
	TR: Transport<T, C> + 'static,
{
	async fn sync(&self, changes: Vec<Change<T>>) -> Result<HashMap<String, SyncOutcome>> {
		let request = TransportRequest { scope: self.scope.clone(), query: None, changes: Some(changes) };
		let response = self.transport.send(request).await?;

		Ok(response.sync_results.unwrap_or_default())
	}
}

#[cfg(feature = "http-transport")]
pub mod http {
	//! Reference HTTP transport: one JSON endpoint accepting a [`super::TransportRequest`]
	//! and returning a [`super::TransportResponse`], built on `reqwest` the same way
	//! `hack-ink-jwks-cache`'s `http::client::HttpClient` wraps it.

	use std::marker::PhantomData;

	use serde::{Serialize, de::DeserializeOwned};

	use super::*;
	use crate::Error;

	/// `Transport` backed by a single HTTP endpoint; `T` and `C` are (de)serialized as JSON.
	pub struct HttpTransport<T, C> {
		client: reqwest::Client,
		endpoint: reqwest::Url,
		_marker: PhantomData<fn() -> (T, C)>,
	}
	impl<T, C> HttpTransport<T, C> {
		/// Construct a transport posting every request to `endpoint`.
		pub fn new(client: reqwest::Client, endpoint: reqwest::Url) -> Self {
			Self { client, endpoint, _marker: PhantomData }
		}
	}
	#[derive(serde::Serialize)]
	struct WireRequest<'a, T, C> {
		scope: &'a str,
		query: &'a Option<C>,
		changes: &'a Option<Vec<Change<T>>>,
	}
	#[derive(serde::Deserialize)]
	#[serde(bound(deserialize = "T: DeserializeOwned"))]
	struct WireResponse<T> {
		#[serde(default)]
		results: Option<Vec<T>>,
		#[serde(default)]
		sync_results: Option<HashMap<String, SyncOutcome>>,
	}
	#[async_trait]
	impl<T, C> Transport<T, C> for HttpTransport<T, C>
	where
		T: Serialize + DeserializeOwned + Send + Sync + 'static,
		C: Serialize + Send + Sync + 'static,
	{
		async fn send(&self, request: TransportRequest<T, C>) -> Result<TransportResponse<T>> {
			let wire = WireRequest { scope: &request.scope, query: &request.query, changes: &request.changes };
			let response = self.client.post(self.endpoint.clone()).json(&wire).send().await?;
			let status = response.status();

			if !status.is_success() {
				let body = response.text().await.ok();

				return Err(Error::Transport { status: status.as_u16(), url: self.endpoint.to_string(), body });
			}

			let wire: WireResponse<T> = response.json().await?;

			Ok(TransportResponse { results: wire.results, sync_results: wire.sync_results })
		}
	}
}
