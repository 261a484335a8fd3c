//! Registry of active collectors.
//!
//! The single shared table the pull endpoint reads from. Register and
//! unregister may run concurrently from per-source refresh tasks while scrapes
//! iterate the table.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;

use prometheus::TextEncoder;
use prometheus::proto::{Counter, Gauge, LabelPair, Metric, MetricFamily, MetricType, Untyped};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::collector::{Descriptor, QueryCollector, Sample, ValueKind};

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A descriptor has a name the exposition format cannot carry.
    #[error("invalid descriptor '{name}': {reason}")]
    InvalidDescriptor {
        /// Metric name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The collector, or another one with an identical descriptor, is already registered.
    #[error("metric '{0}' is already registered")]
    AlreadyRegistered(String),

    /// Another collector owns the metric name with a different label schema.
    #[error("metric '{name}' is registered with labels {registered:?}, refusing labels {requested:?}")]
    SchemaConflict {
        /// Metric name.
        name: String,
        /// Labels of the registered descriptor.
        registered: Vec<String>,
        /// Labels of the rejected descriptor.
        requested: Vec<String>,
    },

    /// Rendering the exposition text failed.
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),
}

struct Registration {
    collector: Arc<QueryCollector>,
    descriptors: Vec<Arc<Descriptor>>,
}

/// Concurrency-safe table of registered collectors.
///
/// Also owns the `prometheus::Registry` for the exporter's own metrics so a
/// single scrape renders both.
pub struct Registry {
    collectors: RwLock<HashMap<u64, Registration>>,
    internal: prometheus::Registry,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field(
                "collector_count",
                &self.collectors.try_read().map(|c| c.len()).unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            collectors: RwLock::new(HashMap::new()),
            internal: prometheus::Registry::new(),
        }
    }

    /// Registry for the exporter's own metrics.
    pub fn internal(&self) -> &prometheus::Registry {
        &self.internal
    }

    /// Describe and register a collector.
    ///
    /// Describing runs the collector's first query when it is uninitialized;
    /// that happens before the table lock is taken. Fails when a descriptor is
    /// invalid or its metric name is already held by a registered collector
    /// or by one of the exporter's own metrics.
    pub async fn register(&self, collector: Arc<QueryCollector>) -> Result<(), RegistryError> {
        let descriptors = collector.describe().await;
        for descriptor in &descriptors {
            descriptor
                .validate()
                .map_err(|reason| RegistryError::InvalidDescriptor {
                    name: descriptor.name().to_string(),
                    reason,
                })?;
        }

        for family in self.internal.gather() {
            if descriptors.iter().any(|d| d.name() == family.get_name()) {
                return Err(RegistryError::AlreadyRegistered(family.get_name().to_string()));
            }
        }

        let mut collectors = self.collectors.write().await;
        if collectors.contains_key(&collector.id()) {
            return Err(RegistryError::AlreadyRegistered(collector.name().to_string()));
        }
        for held in collectors.values().flat_map(|r| r.descriptors.iter()) {
            if let Some(requested) = descriptors.iter().find(|d| d.name() == held.name()) {
                if requested.label_keys() == held.label_keys() {
                    return Err(RegistryError::AlreadyRegistered(held.name().to_string()));
                }
                return Err(RegistryError::SchemaConflict {
                    name: held.name().to_string(),
                    registered: held.label_keys().to_vec(),
                    requested: requested.label_keys().to_vec(),
                });
            }
        }

        tracing::info!(
            source = %collector.name(),
            collector_id = collector.id(),
            metrics = descriptors.len(),
            "Collector registered"
        );
        collectors.insert(
            collector.id(),
            Registration {
                collector,
                descriptors,
            },
        );
        Ok(())
    }

    /// Remove a collector. Returns `false` when it was not registered.
    pub async fn unregister(&self, collector: &QueryCollector) -> bool {
        let removed = self.collectors.write().await.remove(&collector.id()).is_some();
        if removed {
            tracing::info!(
                source = %collector.name(),
                collector_id = collector.id(),
                "Collector unregistered"
            );
        }
        removed
    }

    /// Whether this exact collector instance is registered.
    pub async fn contains(&self, collector: &QueryCollector) -> bool {
        self.collectors.read().await.contains_key(&collector.id())
    }

    /// Number of registered collectors.
    pub async fn len(&self) -> usize {
        self.collectors.read().await.len()
    }

    /// Whether no collector is registered.
    pub async fn is_empty(&self) -> bool {
        self.collectors.read().await.is_empty()
    }

    /// Collect every registered collector plus the internal metrics.
    ///
    /// Families are sorted by name; families without samples are omitted.
    pub async fn gather(&self) -> Vec<MetricFamily> {
        let collectors: Vec<_> = self
            .collectors
            .read()
            .await
            .values()
            .map(|r| Arc::clone(&r.collector))
            .collect();

        let mut families: BTreeMap<String, MetricFamily> = BTreeMap::new();
        for collector in &collectors {
            for sample in collector.collect() {
                push_sample(&mut families, sample);
            }
        }
        for family in self.internal.gather() {
            if families.contains_key(family.get_name()) {
                tracing::warn!(
                    metric = %family.get_name(),
                    "Source metric shadows an exporter metric, dropping the exporter metric"
                );
                continue;
            }
            families.insert(family.get_name().to_string(), family);
        }

        families.into_values().collect()
    }

    /// Render [`gather`](Self::gather) in the Prometheus text format.
    ///
    /// `TextEncoder` does not render untyped families, so those are written
    /// here in the same layout.
    pub async fn encode_text(&self) -> Result<String, RegistryError> {
        let encoder = TextEncoder::new();
        let mut buffer = String::new();
        for family in self.gather().await {
            if family.get_field_type() == MetricType::UNTYPED {
                encode_untyped(&family, &mut buffer);
            } else {
                encoder.encode_utf8(std::slice::from_ref(&family), &mut buffer)?;
            }
        }
        Ok(buffer)
    }
}

fn encode_untyped(family: &MetricFamily, out: &mut String) {
    let name = family.get_name();
    if !family.get_help().is_empty() {
        let _ = writeln!(out, "# HELP {name} {}", escape(family.get_help(), false));
    }
    let _ = writeln!(out, "# TYPE {name} untyped");

    for metric in family.get_metric() {
        out.push_str(name);
        let mut separator = '{';
        for pair in metric.get_label() {
            let _ = write!(
                out,
                "{separator}{}=\"{}\"",
                pair.get_name(),
                escape(pair.get_value(), true)
            );
            separator = ',';
        }
        if separator == ',' {
            out.push('}');
        }
        let _ = writeln!(out, " {}", metric.get_untyped().get_value());
    }
}

fn escape(value: &str, quotes: bool) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '"' if quotes => escaped.push_str("\\\""),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn push_sample(families: &mut BTreeMap<String, MetricFamily>, sample: Sample) {
    let descriptor = &sample.descriptor;
    let family = families
        .entry(descriptor.name().to_string())
        .or_insert_with(|| {
            let mut family = MetricFamily::default();
            family.set_name(descriptor.name().to_string());
            family.set_help(descriptor.help().to_string());
            family.set_field_type(sample.kind.metric_type());
            family
        });

    let labels = descriptor
        .label_keys()
        .iter()
        .zip(sample.label_values)
        .map(|(key, value)| {
            let mut pair = LabelPair::default();
            pair.set_name(key.clone());
            pair.set_value(value);
            pair
        })
        .collect();

    let mut metric = Metric::default();
    metric.set_label(labels);
    match sample.kind {
        ValueKind::Counter => {
            let mut counter = Counter::default();
            counter.set_value(sample.value);
            metric.set_counter(counter);
        }
        ValueKind::Gauge => {
            let mut gauge = Gauge::default();
            gauge.set_value(sample.value);
            metric.set_gauge(gauge);
        }
        ValueKind::Untyped => {
            let mut untyped = Untyped::default();
            untyped.set_value(sample.value);
            metric.set_untyped(untyped);
        }
    }
    family.mut_metric().push(metric);
}
