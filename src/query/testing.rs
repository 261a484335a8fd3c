//! Query runner fakes for unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::query::{QueryError, QueryRunner};
use crate::row::Record;

/// Build a record with a single unnamed value.
pub(crate) fn record(labels: &[(&str, &str)], value: f64) -> Record {
    Record::new(
        labels.iter().map(|(k, _)| k.to_string()).collect(),
        labels.iter().map(|(_, v)| v.to_string()).collect(),
        BTreeMap::from([(String::new(), value)]),
    )
}

/// Always returns the same records.
#[derive(Debug, Default)]
pub(crate) struct StaticRunner {
    records: Vec<Record>,
    calls: AtomicUsize,
}

impl StaticRunner {
    pub(crate) fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl QueryRunner for StaticRunner {
    async fn query(&self, _query: &str) -> Result<Vec<Record>, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.clone())
    }
}

/// Always fails.
#[derive(Debug, Default)]
pub(crate) struct FailingRunner {
    calls: AtomicUsize,
}

impl FailingRunner {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl QueryRunner for FailingRunner {
    async fn query(&self, _query: &str) -> Result<Vec<Record>, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(QueryError::Failed("fake query error".to_string()))
    }
}

/// Replays scripted results in order, then repeats the last one.
#[derive(Debug)]
pub(crate) struct ScriptedRunner {
    script: Mutex<VecDeque<Result<Vec<Record>, String>>>,
    last: Mutex<Option<Result<Vec<Record>, String>>>,
    calls: AtomicUsize,
}

impl ScriptedRunner {
    pub(crate) fn new(script: Vec<Result<Vec<Record>, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl QueryRunner for ScriptedRunner {
    async fn query(&self, _query: &str) -> Result<Vec<Record>, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let result = match next {
            Some(result) => {
                *self.last.lock().unwrap() = Some(result.clone());
                result
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Ok(Vec::new())),
        };
        result.map_err(QueryError::Failed)
    }
}

/// Sleeps before returning its records.
#[derive(Debug)]
pub(crate) struct SlowRunner {
    delay: Duration,
    records: Vec<Record>,
    calls: AtomicUsize,
}

impl SlowRunner {
    pub(crate) fn new(delay: Duration, records: Vec<Record>) -> Self {
        Self {
            delay,
            records,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl QueryRunner for SlowRunner {
    async fn query(&self, _query: &str) -> Result<Vec<Record>, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.records.clone())
    }
}

/// Answers with the records of the first route whose pattern occurs in the
/// query text. A query matching no route fails.
#[derive(Debug, Default)]
pub(crate) struct RoutingRunner {
    routes: Vec<(String, Vec<Record>)>,
    calls: Mutex<HashMap<String, usize>>,
}

impl RoutingRunner {
    pub(crate) fn new(routes: Vec<(&str, Vec<Record>)>) -> Self {
        Self {
            routes: routes
                .into_iter()
                .map(|(pattern, records)| (pattern.to_string(), records))
                .collect(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Number of queries that contained `pattern`.
    pub(crate) fn calls_for(&self, pattern: &str) -> usize {
        self.calls.lock().unwrap().get(pattern).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl QueryRunner for RoutingRunner {
    async fn query(&self, query: &str) -> Result<Vec<Record>, QueryError> {
        let route = self.routes.iter().find(|(pattern, _)| query.contains(pattern.as_str()));
        let key = route.map_or(query, |(pattern, _)| pattern.as_str()).to_string();
        *self.calls.lock().unwrap().entry(key).or_default() += 1;

        match route {
            Some((_, records)) => Ok(records.clone()),
            None => Err(QueryError::Failed(format!("no route for query: {query}"))),
        }
    }
}
