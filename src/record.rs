//! Record identity, change intents, and per-item status projections.

use serde::{Deserialize, Serialize};

/// Capability bound required of any type the engine manages.
///
/// Records are opaque to the engine beyond their string identity; the engine never
/// interprets a record's other fields.
pub trait Identified {
	/// Stable identifier used as the key within a collection's item map.
	fn id(&self) -> &str;
}

/// The kind of mutation a [`Change`] represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
	/// The record did not previously exist on the server.
	Create,
	/// The record exists and is being modified in place.
	Update,
	/// The record should be deleted.
	Remove,
}

/// A pending intent to mutate the server record identified by `id`.
///
/// For [`ChangeKind::Remove`], `data` carries the last-known record so a terminal
/// failure can be explained to the consumer without re-fetching.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Change<T> {
	/// Identifier of the record this change targets.
	pub id: String,
	/// What kind of mutation this change represents.
	pub kind: ChangeKind,
	/// Record payload at the time the change was (most recently) enqueued.
	pub data: T,
	/// Number of sync attempts that have already failed for this change.
	#[serde(default)]
	pub retries: u32,
}
impl<T> Change<T> {
	/// Construct a fresh change with no prior retry history.
	pub fn new(id: impl Into<String>, kind: ChangeKind, data: T) -> Self {
		Self { id: id.into(), kind, data, retries: 0 }
	}
}

/// Outcome of a single change as reported by the transport's `sync_results`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
	/// The server accepted and applied the change.
	Success,
	/// The server rejected or failed to apply the change.
	Error {
		/// Human-readable failure reason returned by the server.
		error: String,
	},
}

/// An entry in the legacy array-shaped `sync_results` response, accepted for parity
/// with servers that have not migrated to the keyed-object form.
#[derive(Clone, Debug, Deserialize)]
pub struct SyncOutcomeEntry {
	/// Identifier of the change this outcome applies to.
	pub id: String,
	/// Outcome reported for that change.
	#[serde(flatten)]
	pub outcome: SyncOutcome,
}

/// Projection of a single id's sync state, derived from [`crate::sync::SyncQueue`].
#[derive(Clone, Debug, PartialEq)]
pub enum ItemStatus {
	/// No pending change exists for this id.
	Idle,
	/// The change is queued and waiting for the next drain.
	Pending {
		/// Kind of the queued change.
		kind: ChangeKind,
		/// Retries already consumed before this change re-entered the queue.
		retries: u32,
	},
	/// The change is part of the currently in-flight transport call.
	Syncing {
		/// Kind of the in-flight change.
		kind: ChangeKind,
		/// Retries already consumed.
		retries: u32,
	},
	/// The change failed and is awaiting retry, or has exhausted its retry budget.
	Error {
		/// Kind of the failed change.
		kind: ChangeKind,
		/// Retries consumed so far.
		retries: u32,
		/// Most recent failure message reported by the transport.
		error: String,
	},
}
impl ItemStatus {
	/// Whether this projection represents an idle (no pending change) id.
	pub fn is_idle(&self) -> bool {
		matches!(self, ItemStatus::Idle)
	}
}
