//! Query-backed metric cache.
//!
//! A [`QueryCollector`] owns one source's query, caches the latest record
//! snapshot and answers describe/collect requests from that cache. Descriptors
//! are fixed the first time the collector is described; a schema change needs
//! a new collector.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::collector::descriptor::{Descriptor, Sample, ValueKind};
use crate::collector::throttle::{MinInterval, Permit};
use crate::query::{QueryError, QueryRunner};
use crate::row::Record;

/// Default deadline for a single query execution (2 minutes).
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(120);

static NEXT_COLLECTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Result of a successful [`QueryCollector::update`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The query ran and the snapshot was replaced.
    Refreshed {
        /// Number of records in the new snapshot.
        records: usize,
    },
    /// The minimum interval had not elapsed; nothing ran.
    Skipped {
        /// Time since the last real run started.
        elapsed: Duration,
    },
}

/// Per-source cache of query results with stable descriptors.
pub struct QueryCollector {
    id: u64,
    name: String,
    kind: ValueKind,
    query: String,
    runner: Arc<dyn QueryRunner>,
    timeout: Duration,
    throttle: MinInterval,
    descriptors: OnceCell<BTreeMap<String, Arc<Descriptor>>>,
    snapshot: RwLock<Arc<Vec<Record>>>,
    init_error: Mutex<Option<QueryError>>,
}

impl std::fmt::Debug for QueryCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCollector")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("min_interval", &self.throttle.interval())
            .field("initialized", &self.descriptors.initialized())
            .finish_non_exhaustive()
    }
}

impl QueryCollector {
    /// Create an uninitialized collector.
    ///
    /// The minimum interval is parsed from `query` once, here.
    pub fn new(
        runner: Arc<dyn QueryRunner>,
        kind: ValueKind,
        name: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        let query = query.into();
        Self {
            id: NEXT_COLLECTOR_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            kind,
            throttle: MinInterval::from_query(&query),
            query,
            runner,
            timeout: DEFAULT_QUERY_TIMEOUT,
            descriptors: OnceCell::new(),
            snapshot: RwLock::new(Arc::new(Vec::new())),
            init_error: Mutex::new(None),
        }
    }

    /// Set the query deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Process-unique identity of this collector instance.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Source name; the base of every metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared value kind.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Query text after placeholder substitution.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Minimum interval parsed from the query.
    pub fn min_interval(&self) -> Duration {
        self.throttle.interval()
    }

    /// Start time of the last query that actually ran.
    pub fn last_run(&self) -> Option<Instant> {
        self.throttle.last_run()
    }

    /// Whether descriptors have been fixed.
    pub fn is_initialized(&self) -> bool {
        self.descriptors.initialized()
    }

    /// Current record snapshot.
    pub fn snapshot(&self) -> Arc<Vec<Record>> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Take the error from the initial query run by [`describe`], if any.
    ///
    /// [`describe`]: Self::describe
    pub fn take_init_error(&self) -> Option<QueryError> {
        self.init_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Return the descriptors, initializing them on first use.
    ///
    /// The first call runs one [`update`](Self::update) and derives one
    /// descriptor per value suffix of the first record. An error from that
    /// update is stored for [`take_init_error`](Self::take_init_error) instead
    /// of being returned. Zero records yield zero descriptors, permanently.
    pub async fn describe(&self) -> Vec<Arc<Descriptor>> {
        let descriptors = self
            .descriptors
            .get_or_init(|| async {
                if let Err(e) = self.update().await {
                    tracing::warn!(source = %self.name, error = %e, "Initial query failed");
                    *self.init_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                }
                self.build_descriptors()
            })
            .await;

        descriptors.values().cloned().collect()
    }

    /// Run the query and swap in the new snapshot.
    ///
    /// Skips without touching the runner or the cache while the minimum
    /// interval has not elapsed. On error the previous snapshot is kept. The
    /// query runs without holding any lock; only the swap is guarded.
    pub async fn update(&self) -> Result<UpdateOutcome, QueryError> {
        if let Permit::Skip { elapsed } = self.throttle.try_acquire() {
            tracing::debug!(
                source = %self.name,
                elapsed_secs = elapsed.as_secs(),
                min_interval_secs = self.throttle.interval().as_secs(),
                "Minimum interval not reached"
            );
            return Ok(UpdateOutcome::Skipped { elapsed });
        }

        tracing::debug!(source = %self.name, "Running query");
        let records = tokio::time::timeout(self.timeout, self.runner.query(&self.query))
            .await
            .map_err(|_| QueryError::Timeout(self.timeout))??;

        let count = records.len();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(records);
        Ok(UpdateOutcome::Refreshed { records: count })
    }

    /// Emit one sample per cached record and descriptor.
    ///
    /// Records missing a descriptor's value suffix, or whose label count does
    /// not match the descriptor, are skipped with a warning.
    pub fn collect(&self) -> Vec<Sample> {
        let Some(descriptors) = self.descriptors.get() else {
            return Vec::new();
        };
        let snapshot = self.snapshot();

        let mut samples = Vec::with_capacity(snapshot.len() * descriptors.len());
        let mut skipped = 0usize;
        for record in snapshot.iter() {
            for (suffix, descriptor) in descriptors {
                let Some(value) = record.values.get(suffix) else {
                    skipped += 1;
                    continue;
                };
                if record.label_values.len() != descriptor.label_keys().len() {
                    skipped += 1;
                    continue;
                }
                samples.push(Sample {
                    descriptor: Arc::clone(descriptor),
                    kind: self.kind,
                    value: *value,
                    label_values: record.label_values.clone(),
                });
            }
        }

        if skipped > 0 {
            tracing::warn!(
                source = %self.name,
                skipped,
                "Records do not match the registered schema"
            );
        }
        samples
    }

    fn build_descriptors(&self) -> BTreeMap<String, Arc<Descriptor>> {
        let snapshot = self.snapshot();
        let Some(first) = snapshot.first() else {
            tracing::debug!(source = %self.name, "Query returned no rows, no descriptors");
            return BTreeMap::new();
        };

        first
            .values
            .keys()
            .map(|suffix| {
                let descriptor = Descriptor::new(
                    format!("{}{}", self.name, suffix),
                    format!("Query results for source {}", self.name),
                    first.label_keys.clone(),
                );
                (suffix.clone(), Arc::new(descriptor))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::testing::{
        FailingRunner, ScriptedRunner, SlowRunner, StaticRunner, record,
    };

    fn two_things() -> Vec<Record> {
        vec![
            record(&[("key", "thing")], 1.1),
            record(&[("key", "thing2")], 2.1),
        ]
    }

    #[tokio::test]
    async fn test_describe_and_collect() {
        let runner = Arc::new(StaticRunner::new(two_things()));
        let collector =
            QueryCollector::new(runner.clone(), ValueKind::Gauge, "fake_metric", "-- not used");

        let descriptors = collector.describe().await;
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name(), "fake_metric");
        assert_eq!(descriptors[0].label_keys(), ["key".to_string()]);

        let samples = collector.collect();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].label_values, vec!["thing"]);
        assert_eq!(samples[0].value, 1.1);
        assert_eq!(samples[1].label_values, vec!["thing2"]);
        assert_eq!(samples[1].kind, ValueKind::Gauge);

        // Describe is idempotent and does not query again.
        collector.describe().await;
        assert_eq!(runner.calls(), 1);
    }

    #[tokio::test]
    async fn test_suffixes_become_metric_names() {
        let rec = Record::new(
            vec![],
            vec![],
            BTreeMap::from([("_foo".to_string(), 10.0), ("_bar".to_string(), 20.0)]),
        );
        let runner = Arc::new(StaticRunner::new(vec![rec]));
        let collector = QueryCollector::new(runner, ValueKind::Counter, "jobs", "");

        let mut names: Vec<_> = collector
            .describe()
            .await
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["jobs_bar", "jobs_foo"]);
    }

    #[tokio::test]
    async fn test_zero_records_zero_descriptors() {
        let runner = Arc::new(StaticRunner::new(vec![]));
        let collector = QueryCollector::new(runner, ValueKind::Gauge, "empty", "");

        assert!(collector.describe().await.is_empty());
        assert!(collector.is_initialized());
        assert!(collector.collect().is_empty());
        assert!(collector.take_init_error().is_none());
    }

    #[tokio::test]
    async fn test_describe_records_initial_error() {
        let runner = Arc::new(FailingRunner::default());
        let collector = QueryCollector::new(runner.clone(), ValueKind::Gauge, "metric_name", "");

        assert!(collector.describe().await.is_empty());
        assert_eq!(runner.calls(), 1);
        assert!(matches!(
            collector.take_init_error(),
            Some(QueryError::Failed(_))
        ));
        assert!(collector.take_init_error().is_none());
    }

    #[tokio::test]
    async fn test_collect_before_describe_is_empty() {
        let runner = Arc::new(StaticRunner::new(two_things()));
        let collector = QueryCollector::new(runner, ValueKind::Gauge, "m", "");
        collector.update().await.unwrap();
        assert!(collector.collect().is_empty());
    }

    #[tokio::test]
    async fn test_update_error_preserves_snapshot() {
        let runner = Arc::new(ScriptedRunner::new(vec![
            Ok(two_things()),
            Err("backend unavailable".to_string()),
        ]));
        let collector = QueryCollector::new(runner, ValueKind::Gauge, "fake_metric", "");
        collector.describe().await;
        let before = collector.collect();

        let result = collector.update().await;
        assert!(matches!(result, Err(QueryError::Failed(_))));
        assert_eq!(collector.collect(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_skips_runner() {
        let runner = Arc::new(StaticRunner::new(two_things()));
        let collector = QueryCollector::new(
            runner.clone(),
            ValueKind::Gauge,
            "throttled",
            "--min-interval=60\nSELECT 1",
        );
        assert_eq!(collector.min_interval(), Duration::from_secs(60));

        let first = collector.update().await.unwrap();
        assert_eq!(first, UpdateOutcome::Refreshed { records: 2 });
        let stamped = collector.last_run();

        tokio::time::advance(Duration::from_secs(10)).await;
        let second = collector.update().await.unwrap();

        assert!(matches!(second, UpdateOutcome::Skipped { .. }));
        assert_eq!(runner.calls(), 1);
        assert_eq!(collector.last_run(), stamped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_during_slow_query_is_skipped() {
        let runner = Arc::new(SlowRunner::new(Duration::from_secs(30), two_things()));
        let collector = Arc::new(QueryCollector::new(
            runner.clone(),
            ValueKind::Gauge,
            "slow",
            "--min-interval=60",
        ));

        let in_flight = {
            let collector = Arc::clone(&collector);
            tokio::spawn(async move { collector.update().await })
        };
        tokio::time::advance(Duration::from_secs(10)).await;

        // Scrapes read the old (empty) snapshot without waiting.
        assert!(collector.snapshot().is_empty());
        let second = collector.update().await.unwrap();
        assert!(matches!(second, UpdateOutcome::Skipped { .. }));

        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(
            in_flight.await.unwrap().unwrap(),
            UpdateOutcome::Refreshed { records: 2 }
        );
        assert_eq!(runner.calls(), 1);
        assert_eq!(collector.snapshot().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_preserves_snapshot() {
        let runner = Arc::new(SlowRunner::new(Duration::from_secs(300), two_things()));
        let collector = QueryCollector::new(runner, ValueKind::Gauge, "slow", "")
            .with_timeout(Duration::from_secs(1));

        let result = collector.update().await;
        assert!(matches!(result, Err(QueryError::Timeout(_))));
        assert!(collector.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_missing_suffix_is_skipped() {
        let full = Record::new(
            vec!["site".into()],
            vec!["a".into()],
            BTreeMap::from([(String::new(), 1.0), ("_max".to_string(), 5.0)]),
        );
        let partial = Record::new(
            vec!["site".into()],
            vec!["b".into()],
            BTreeMap::from([(String::new(), 2.0)]),
        );
        let runner = Arc::new(ScriptedRunner::new(vec![Ok(vec![full]), Ok(vec![partial])]));
        let collector = QueryCollector::new(runner, ValueKind::Gauge, "drift", "");

        assert_eq!(collector.describe().await.len(), 2);
        collector.update().await.unwrap();

        let samples = collector.collect();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].descriptor.name(), "drift");
        assert_eq!(samples[0].value, 2.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_update_and_collect_are_consistent() {
        const UPDATES: usize = 50;
        const COLLECTS: usize = 50;

        let script = (0..UPDATES)
            .map(|generation| {
                let tag = generation.to_string();
                Ok((0..4)
                    .map(|i| {
                        let row = i.to_string();
                        record(
                            &[("generation", tag.as_str()), ("row", row.as_str())],
                            generation as f64,
                        )
                    })
                    .collect())
            })
            .collect();
        let collector = Arc::new(QueryCollector::new(
            Arc::new(ScriptedRunner::new(script)),
            ValueKind::Gauge,
            "race",
            "",
        ));
        collector.describe().await;

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..UPDATES {
            let collector = Arc::clone(&collector);
            tasks.spawn(async move {
                collector.update().await.unwrap();
            });
        }
        for _ in 0..COLLECTS {
            let collector = Arc::clone(&collector);
            tasks.spawn(async move {
                let samples = collector.collect();
                assert_eq!(samples.len(), 4);
                let generation = &samples[0].label_values[0];
                for sample in &samples {
                    assert_eq!(&sample.label_values[0], generation);
                    assert_eq!(sample.value, generation.parse::<f64>().unwrap());
                }
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }
    }
}
