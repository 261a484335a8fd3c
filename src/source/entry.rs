//! Source entries and their registration lifecycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::collector::{QueryCollector, Registry, RegistryError, UpdateOutcome, ValueKind};
use crate::query::{QueryError, QueryRunner};
use crate::source::{ModifiedStamp, TemplateVars};

/// Errors from source entry operations.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The query file could not be stat'ed.
    #[error("failed to stat '{}': {source}", path.display())]
    Stat {
        /// Query file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The query file could not be read.
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        /// Query file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The registry did not know a collector this entry believed it owned.
    #[error("collector for source '{0}' was not registered; registry is inconsistent")]
    Unregister(String),

    /// The registry rejected the new collector.
    #[error("failed to register source: {0}")]
    Registry(#[from] RegistryError),
}

impl SourceError {
    /// Whether this error means internal bookkeeping can no longer be trusted.
    pub fn is_consistency_error(&self) -> bool {
        matches!(self, Self::Unregister(_))
    }
}

/// Derive a source name from a path: the file name without directory or extension.
pub fn source_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// One query file plus the collector currently registered for it.
#[derive(Debug)]
pub struct SourceEntry {
    name: String,
    kind: ValueKind,
    stamp: ModifiedStamp,
    collector: Option<Arc<QueryCollector>>,
}

impl SourceEntry {
    /// Create an entry for a query file. Nothing is read or registered yet.
    pub fn new(path: impl Into<PathBuf>, kind: ValueKind) -> Self {
        let path = path.into();
        Self {
            name: source_name(&path),
            kind,
            stamp: ModifiedStamp::new(path),
            collector: None,
        }
    }

    /// Source name, used as the metric name prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Query file path.
    pub fn path(&self) -> &Path {
        self.stamp.path()
    }

    /// Declared value kind.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Change the declared value kind; takes effect on the next registration.
    pub fn set_kind(&mut self, kind: ValueKind) {
        self.kind = kind;
    }

    /// Currently registered collector, if any.
    pub fn collector(&self) -> Option<&Arc<QueryCollector>> {
        self.collector.as_ref()
    }

    /// Report whether the query file changed since the last check.
    ///
    /// The first successful call returns `true` so the source gets its
    /// initial registration. Callers should treat an error as "not modified".
    pub async fn is_modified(&mut self) -> Result<bool, SourceError> {
        self.stamp.check().await.map_err(|source| SourceError::Stat {
            path: self.stamp.path().to_path_buf(),
            source,
        })
    }

    /// Make the next [`is_modified`](Self::is_modified) report `true`, so a
    /// failed registration is retried on the following cycle.
    pub fn invalidate(&mut self) {
        self.stamp.reset();
    }

    /// Read the query file and build a fresh, unregistered collector.
    pub async fn build_collector(
        &self,
        runner: Arc<dyn QueryRunner>,
        vars: &TemplateVars,
        timeout: Duration,
    ) -> Result<QueryCollector, SourceError> {
        let text = tokio::fs::read_to_string(self.path())
            .await
            .map_err(|source| SourceError::Read {
                path: self.path().to_path_buf(),
                source,
            })?;

        Ok(
            QueryCollector::new(runner, self.kind, self.name.clone(), vars.render(&text))
                .with_timeout(timeout),
        )
    }

    /// Replace the registered collector with `collector`.
    ///
    /// Any previous collector is unregistered first; if the registry does not
    /// know it, [`SourceError::Unregister`] is returned and nothing else
    /// happens. Registering runs the collector's first query. The entry only
    /// tracks `collector` once the registry has accepted it.
    pub async fn register(
        &mut self,
        registry: &Registry,
        collector: Arc<QueryCollector>,
    ) -> Result<(), SourceError> {
        self.unregister(registry).await?;

        registry.register(Arc::clone(&collector)).await?;
        self.collector = Some(collector);
        Ok(())
    }

    /// Unregister the tracked collector, if any.
    pub async fn unregister(&mut self, registry: &Registry) -> Result<(), SourceError> {
        let Some(previous) = self.collector.as_ref() else {
            return Ok(());
        };

        if !registry.unregister(previous).await {
            return Err(SourceError::Unregister(self.name.clone()));
        }
        self.collector = None;
        Ok(())
    }

    /// Refresh the registered collector. Without one this is a no-op.
    pub async fn update(&self) -> Result<Option<UpdateOutcome>, QueryError> {
        match &self.collector {
            Some(collector) => collector.update().await.map(Some),
            None => Ok(None),
        }
    }
}
