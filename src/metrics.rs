//! Metrics helpers and per-collection telemetry bookkeeping.
//!
//! Ported from `hack-ink-jwks-cache`'s `metrics` module: the same free-function-plus-label
//! shape, the same `OnceLock<PrometheusHandle>` exporter singleton, re-labeled from
//! tenant/provider to a single `collection` label and re-pointed at the counters this
//! crate's components actually produce (cache hit/miss, fetch outcome, sync drain/retry).

use std::sync::{
	OnceLock,
	atomic::{AtomicU64, Ordering},
};

use metrics::Label;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;

use crate::{Error, Result};

type LabelSet = SmallVec<[Label; 2]>;

const METRIC_FETCH_TOTAL: &str = "optimistic_collection_fetch_total";
const METRIC_CACHE_HITS: &str = "optimistic_collection_cache_hits_total";
const METRIC_CACHE_MISSES: &str = "optimistic_collection_cache_misses_total";
const METRIC_SYNC_DRAINS: &str = "optimistic_collection_sync_drains_total";
const METRIC_SYNC_RETRIES: &str = "optimistic_collection_sync_retries_total";
const METRIC_SYNC_ERRORS: &str = "optimistic_collection_sync_errors_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe metrics accumulator for a single collection id.
#[derive(Debug, Default)]
pub struct CollectionMetrics {
	fetch_successes: AtomicU64,
	fetch_errors: AtomicU64,
	cache_hits: AtomicU64,
	cache_misses: AtomicU64,
	sync_drains: AtomicU64,
	sync_retries: AtomicU64,
	sync_errors: AtomicU64,
}
impl CollectionMetrics {
	/// Create a new, zeroed metrics accumulator.
	pub fn new() -> std::sync::Arc<Self> {
		std::sync::Arc::new(Self::default())
	}

	/// Record a fetch-cache hit.
	pub fn record_cache_hit(&self) {
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a fetch-cache miss (a fetch actually reached the handler).
	pub fn record_cache_miss(&self) {
		self.cache_misses.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a fetch outcome once retries are exhausted or it succeeds.
	pub fn record_fetch(&self, succeeded: bool) {
		if succeeded {
			self.fetch_successes.fetch_add(1, Ordering::Relaxed);
		} else {
			self.fetch_errors.fetch_add(1, Ordering::Relaxed);
		}
	}

	/// Record that a sync drain ran.
	pub fn record_sync_drain(&self) {
		self.sync_drains.fetch_add(1, Ordering::Relaxed);
	}

	/// Record that a single change was retried after a failed sync attempt.
	pub fn record_sync_retry(&self) {
		self.sync_retries.fetch_add(1, Ordering::Relaxed);
	}

	/// Record that a single change's sync attempt failed (whether or not it will retry).
	pub fn record_sync_error(&self) {
		self.sync_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> CollectionMetricsSnapshot {
		CollectionMetricsSnapshot {
			fetch_successes: self.fetch_successes.load(Ordering::Relaxed),
			fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			cache_misses: self.cache_misses.load(Ordering::Relaxed),
			sync_drains: self.sync_drains.load(Ordering::Relaxed),
			sync_retries: self.sync_retries.load(Ordering::Relaxed),
			sync_errors: self.sync_errors.load(Ordering::Relaxed),
		}
	}
}

/// Read-only snapshot of per-collection telemetry counters.
#[derive(Clone, Debug)]
pub struct CollectionMetricsSnapshot {
	/// Count of fetches that eventually succeeded.
	pub fetch_successes: u64,
	/// Count of fetches that exhausted retries.
	pub fetch_errors: u64,
	/// Count of fetches served from the cache.
	pub cache_hits: u64,
	/// Count of fetches that required reaching the handler.
	pub cache_misses: u64,
	/// Count of sync drains that ran (whether or not they moved anything).
	pub sync_drains: u64,
	/// Count of individual change retries across all drains.
	pub sync_retries: u64,
	/// Count of individual change failures across all drains.
	pub sync_errors: u64,
}
impl CollectionMetricsSnapshot {
	/// Convenience method to compute the fetch-cache hit rate.
	pub fn cache_hit_rate(&self) -> f64 {
		let total = self.cache_hits + self.cache_misses;

		if total == 0 { 0.0 } else { self.cache_hits as f64 / total as f64 }
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is
/// installed.
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new().install_recorder().map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a fetch-cache hit for `collection`.
pub fn record_cache_hit(collection: &str) {
	metrics::counter!(METRIC_CACHE_HITS, labels(collection).iter()).increment(1);
}

/// Record a fetch-cache miss for `collection`.
pub fn record_cache_miss(collection: &str) {
	metrics::counter!(METRIC_CACHE_MISSES, labels(collection).iter()).increment(1);
}

/// Record a completed fetch attempt for `collection`.
pub fn record_fetch(collection: &str, succeeded: bool) {
	let status = if succeeded { "success" } else { "error" };
	let mut label_set = labels(collection);

	label_set.push(Label::new("status", status));

	metrics::counter!(METRIC_FETCH_TOTAL, label_set.iter()).increment(1);
}

/// Record that a sync drain ran for `collection`, moving `batch_size` changes.
pub fn record_sync_drain(collection: &str, batch_size: usize) {
	metrics::counter!(METRIC_SYNC_DRAINS, labels(collection).iter()).increment(1);
	metrics::histogram!("optimistic_collection_sync_batch_size", labels(collection).iter())
		.record(batch_size as f64);
}

/// Record a single change retry within a drain for `collection`.
pub fn record_sync_retry(collection: &str) {
	metrics::counter!(METRIC_SYNC_RETRIES, labels(collection).iter()).increment(1);
}

/// Record a single change failure within a drain for `collection`.
pub fn record_sync_error(collection: &str) {
	metrics::counter!(METRIC_SYNC_ERRORS, labels(collection).iter()).increment(1);
}

fn labels(collection: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(1);

	labels.push(Label::new("collection", collection.to_owned()));

	labels
}

#[cfg(test)]
mod tests {
	use std::borrow::Borrow;

	use metrics_util::{
		CompositeKey, MetricKind,
		debugging::{DebugValue, DebuggingRecorder},
	};

	use super::*;

	fn capture_metrics<F>(f: F) -> Vec<(CompositeKey, DebugValue)>
	where
		F: FnOnce(),
	{
		let recorder = DebuggingRecorder::new();
		let snapshotter = recorder.snapshotter();

		metrics::with_local_recorder(&recorder, f);

		snapshotter.snapshot().into_vec().into_iter().map(|(key, _, _, value)| (key, value)).collect()
	}

	fn counter_value(snapshot: &[(CompositeKey, DebugValue)], name: &str, labels: &[(&str, &str)]) -> u64 {
		snapshot
			.iter()
			.find_map(|(key, value)| {
				(key.kind() == MetricKind::Counter
					&& Borrow::<str>::borrow(key.key().name()) == name
					&& labels_match(key, labels))
				.then(|| match value {
					DebugValue::Counter(value) => *value,
					_ => 0,
				})
			})
			.unwrap_or(0)
	}

	fn labels_match(key: &CompositeKey, expected: &[(&str, &str)]) -> bool {
		let mut labels: Vec<_> = key.key().labels().map(|label| (label.key(), label.value())).collect();

		labels.sort_unstable();

		let mut expected_sorted: Vec<_> = expected.to_vec();

		expected_sorted.sort_unstable();

		labels.len() == expected_sorted.len()
			&& labels.into_iter().zip(expected_sorted).all(|((lk, lv), (ek, ev))| lk == ek && lv == ev)
	}

	#[test]
	fn records_cache_hits_and_misses() {
		let snapshot = capture_metrics(|| {
			record_cache_hit("notes");
			record_cache_hit("notes");
			record_cache_miss("notes");
		});
		let base = [("collection", "notes")];

		assert_eq!(counter_value(&snapshot, METRIC_CACHE_HITS, &base), 2);
		assert_eq!(counter_value(&snapshot, METRIC_CACHE_MISSES, &base), 1);
	}

	#[test]
	fn records_fetch_outcomes_with_status_label() {
		let snapshot = capture_metrics(|| {
			record_fetch("notes", true);
			record_fetch("notes", false);
		});
		let success = [("collection", "notes"), ("status", "success")];
		let error = [("collection", "notes"), ("status", "error")];

		assert_eq!(counter_value(&snapshot, METRIC_FETCH_TOTAL, &success), 1);
		assert_eq!(counter_value(&snapshot, METRIC_FETCH_TOTAL, &error), 1);
	}

	#[test]
	fn accumulator_snapshot_computes_hit_rate() {
		let metrics = CollectionMetrics::new();

		metrics.record_cache_hit();
		metrics.record_cache_hit();
		metrics.record_cache_miss();

		let snapshot = metrics.snapshot();

		assert_eq!(snapshot.cache_hits, 2);
		assert_eq!(snapshot.cache_misses, 1);
		assert!((snapshot.cache_hit_rate() - (2.0 / 3.0)).abs() < 1e-9);
	}
}
