//! Query file lists grouped by value kind.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::collector::ValueKind;
use crate::source::source_name;

use super::validation::ConfigError;

/// One entry of a `*-queries` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFile {
    /// Path to the query file. Relative paths resolve against the config file's directory.
    pub file: PathBuf,
}

/// A query file paired with the kind of metrics it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub path: PathBuf,
    pub kind: ValueKind,
}

/// Query lists as they appear in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueriesConfig {
    #[serde(default, rename = "gauge-queries")]
    pub gauge: Vec<QueryFile>,

    #[serde(default, rename = "counter-queries")]
    pub counter: Vec<QueryFile>,

    #[serde(default, rename = "untyped-queries")]
    pub untyped: Vec<QueryFile>,
}

impl QueriesConfig {
    /// All query files with their kinds: gauges, then counters, then untyped.
    pub fn specs(&self) -> Vec<QuerySpec> {
        let lists = [
            (ValueKind::Gauge, &self.gauge),
            (ValueKind::Counter, &self.counter),
            (ValueKind::Untyped, &self.untyped),
        ];
        lists
            .into_iter()
            .flat_map(|(kind, files)| {
                files.iter().map(move |q| QuerySpec {
                    path: q.file.clone(),
                    kind,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.gauge.len() + self.counter.len() + self.untyped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrite relative paths so they are relative to `base`.
    pub fn resolve_relative(&mut self, base: &Path) {
        for query in self
            .gauge
            .iter_mut()
            .chain(self.counter.iter_mut())
            .chain(self.untyped.iter_mut())
        {
            if query.file.is_relative() {
                query.file = base.join(&query.file);
            }
        }
    }

    /// Validate the query lists.
    ///
    /// At least one query is required. A file may appear only once across
    /// all lists, and no two files may yield the same source name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one of gauge-queries, counter-queries or untyped-queries is required"
                    .to_string(),
            ));
        }

        let mut seen_files = HashSet::new();
        let mut seen_names: HashMap<String, PathBuf> = HashMap::new();
        for spec in self.specs() {
            let name = source_name(&spec.path);
            if name.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "query file '{}' has no file name",
                    spec.path.display()
                )));
            }
            if !seen_files.insert(spec.path.clone()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate query file: '{}'",
                    spec.path.display()
                )));
            }
            if let Some(other) = seen_names.insert(name.clone(), spec.path.clone()) {
                return Err(ConfigError::ValidationError(format!(
                    "query files '{}' and '{}' both map to source '{}'",
                    other.display(),
                    spec.path.display(),
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(paths: &[&str]) -> Vec<QueryFile> {
        paths
            .iter()
            .map(|p| QueryFile { file: PathBuf::from(p) })
            .collect()
    }

    #[test]
    fn test_parse_lists() {
        let yaml = r#"
gauge-queries:
  - file: queries/pending.sql
counter-queries:
  - file: queries/tests_total.sql
  - file: queries/bytes_total.sql
"#;
        let config: QueriesConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.len(), 3);
        assert!(config.untyped.is_empty());

        let specs = config.specs();
        assert_eq!(specs[0].kind, ValueKind::Gauge);
        assert_eq!(specs[0].path, PathBuf::from("queries/pending.sql"));
        assert_eq!(specs[2].kind, ValueKind::Counter);
    }

    #[test]
    fn test_resolve_relative() {
        let mut config = QueriesConfig {
            gauge: files(&["queries/a.sql", "/abs/b.sql"]),
            ..Default::default()
        };
        config.resolve_relative(Path::new("/etc/exporter"));
        assert_eq!(config.gauge[0].file, PathBuf::from("/etc/exporter/queries/a.sql"));
        assert_eq!(config.gauge[1].file, PathBuf::from("/abs/b.sql"));
    }

    #[test]
    fn test_validate_empty() {
        assert!(QueriesConfig::default().validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_file() {
        let config = QueriesConfig {
            gauge: files(&["q/a.sql"]),
            counter: files(&["q/a.sql"]),
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("duplicate query file"));
    }

    #[test]
    fn test_validate_duplicate_source_name() {
        let config = QueriesConfig {
            gauge: files(&["one/jobs.sql", "two/jobs.sql"]),
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("both map to source 'jobs'"));
    }

    #[test]
    fn test_validate_ok() {
        let config = QueriesConfig {
            gauge: files(&["q/a.sql"]),
            untyped: files(&["q/b.sql"]),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
