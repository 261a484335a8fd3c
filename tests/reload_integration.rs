//! Config hot reload tests.
//!
//! Loads a config file from disk, runs cycles, then rewrites the file and
//! checks that the source set follows it.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use query_exporter::collector::Registry;
use query_exporter::config::AppConfig;
use query_exporter::query::SqliteRunner;
use query_exporter::scheduler::{Scheduler, SchedulerMetrics, SourceOutcome};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

async fn create_runner(dir: &Path) -> SqliteRunner {
    let options = SqliteConnectOptions::from_str(&format!(
        "sqlite:{}",
        dir.join("reload.db").display()
    ))
    .expect("Failed to parse database url")
    .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .expect("Failed to open database");
    sqlx::query("CREATE TABLE hosts (name TEXT NOT NULL, up INTEGER NOT NULL)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO hosts VALUES ('a', 1), ('b', 0), ('c', 1)")
        .execute(&pool)
        .await
        .unwrap();
    SqliteRunner::from_pool(pool)
}

fn write_config(path: &Path, yaml: &str, modified: SystemTime) {
    std::fs::write(path, yaml).unwrap();
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(modified)
        .unwrap();
}

const TWO_SOURCES: &str = r#"
database:
  url: "sqlite::memory:"
refresh: 1m
gauge-queries:
  - file: queries/hosts_up.sql
counter-queries:
  - file: queries/hosts_total.sql
"#;

const ONE_SOURCE: &str = r#"
database:
  url: "sqlite::memory:"
refresh: 1m
untyped-queries:
  - file: queries/hosts_up.sql
"#;

#[tokio::test]
async fn test_config_reload_follows_file() {
    let dir = tempfile::tempdir().unwrap();
    let queries = dir.path().join("queries");
    std::fs::create_dir_all(&queries).unwrap();
    std::fs::write(
        queries.join("hosts_up.sql"),
        "SELECT name, up AS value FROM hosts",
    )
    .unwrap();
    std::fs::write(
        queries.join("hosts_total.sql"),
        "SELECT COUNT(*) AS value FROM hosts",
    )
    .unwrap();

    let config_path = dir.path().join("config.yaml");
    let base = SystemTime::now() - Duration::from_secs(3600);
    write_config(&config_path, TWO_SOURCES, base);

    let (config, stamp) = AppConfig::load_with_stamp(&config_path).unwrap();
    let registry = Arc::new(Registry::new());
    let metrics = SchedulerMetrics::new(registry.internal()).unwrap();
    let mut scheduler = Scheduler::new(
        config.scheduler_settings(),
        Arc::new(create_runner(dir.path()).await),
        Arc::clone(&registry),
        metrics,
    )
    .with_sources(config.queries.specs())
    .watch_config(stamp);

    // Unchanged config: no reload.
    assert!(!scheduler.reload_config().await.unwrap());
    scheduler.run_cycle(false).await.unwrap();
    assert_eq!(registry.len().await, 2);
    let text = registry.encode_text().await.unwrap();
    assert!(text.contains("# TYPE hosts_up gauge"));
    assert!(text.contains("hosts_total 3"));

    // Drop one source and change the other's kind.
    write_config(&config_path, ONE_SOURCE, base + Duration::from_secs(60));
    assert!(scheduler.reload_config().await.unwrap());
    assert_eq!(scheduler.source_count(), 1);
    assert_eq!(registry.len().await, 1);

    let report = scheduler.run_cycle(true).await.unwrap();
    assert_eq!(
        report.outcome("hosts_up"),
        Some(&SourceOutcome::Registered { init_error: None })
    );
    assert_eq!(report.outcome("hosts_total"), None);

    let text = registry.encode_text().await.unwrap();
    assert!(text.contains("# TYPE hosts_up untyped"));
    assert!(text.contains(r#"hosts_up{name="b"} 0"#));
    assert!(!text.contains("hosts_total"));
}

#[tokio::test]
async fn test_invalid_config_keeps_sources() {
    let dir = tempfile::tempdir().unwrap();
    let queries = dir.path().join("queries");
    std::fs::create_dir_all(&queries).unwrap();
    std::fs::write(queries.join("hosts_up.sql"), "SELECT name, up AS value FROM hosts").unwrap();
    std::fs::write(queries.join("hosts_total.sql"), "SELECT COUNT(*) AS value FROM hosts").unwrap();

    let config_path = dir.path().join("config.yaml");
    let base = SystemTime::now() - Duration::from_secs(3600);
    write_config(&config_path, TWO_SOURCES, base);

    let (config, stamp) = AppConfig::load_with_stamp(&config_path).unwrap();
    let registry = Arc::new(Registry::new());
    let metrics = SchedulerMetrics::new(registry.internal()).unwrap();
    let mut scheduler = Scheduler::new(
        config.scheduler_settings(),
        Arc::new(create_runner(dir.path()).await),
        Arc::clone(&registry),
        metrics,
    )
    .with_sources(config.queries.specs())
    .watch_config(stamp);
    scheduler.run_cycle(false).await.unwrap();

    write_config(
        &config_path,
        "database:\n  url: \"\"\ngauge-queries: []\n",
        base + Duration::from_secs(60),
    );
    assert!(!scheduler.reload_config().await.unwrap());
    assert_eq!(scheduler.source_count(), 2);
    assert_eq!(registry.len().await, 2);
}
