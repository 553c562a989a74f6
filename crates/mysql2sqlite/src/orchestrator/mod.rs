//! Sync orchestrator - runs one replication pass over the configured tables.
//!
//! Tables are independent units: each runs its own
//! `Pending -> Extracting -> Mapping -> Applying -> Committed | Failed`
//! pipeline on a worker slot, and a failure in one never stops the others.

mod locks;

pub use locks::TableLocks;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::apply::{Applier, WatermarkPlan};
use crate::catalog::{CatalogOptions, SchemaCatalog};
use crate::checkpoint::CheckpointStore;
use crate::config::{Config, TableConfig};
use crate::core::{
    ChangeDetection, RunReport, RunStatus, SchemaDrift, SyncResult, TablePhase, WatermarkValue,
};
use crate::error::{ReplicaError, Result};
use crate::extract::ChangeExtractor;
use crate::retry::{Clock, RetryPolicy, SystemClock};
use crate::source::{MysqlReader, SourceReader};
use crate::target::TargetDb;

/// Sync orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceReader>,
    target: Arc<TargetDb>,
    runner: Arc<TableRunner>,
}

/// Connectivity of both databases.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
}

/// Schema drift of one configured table.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaCheck {
    pub table_name: String,
    pub drift: Vec<SchemaDrift>,
    /// Set when the table could not be inspected at all.
    pub error: Option<String>,
}

impl Orchestrator {
    /// Connect to MySQL and open the SQLite replica.
    pub async fn connect(config: Config) -> Result<Self> {
        let workers = config.sync.workers.max(1) as u32;
        let source_conns = config.source.max_connections.unwrap_or(workers);

        let source = MysqlReader::new(&config.source, source_conns).await?;
        let target = TargetDb::open(&config.target, workers).await?;

        Self::new(Arc::new(source), Arc::new(target), config, Arc::new(SystemClock)).await
    }

    /// Build an orchestrator over existing connections.
    ///
    /// Creates the checkpoint table if it is missing.
    pub async fn new(
        source: Arc<dyn SourceReader>,
        target: Arc<TargetDb>,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let checkpoints = CheckpointStore::new(target.pool().clone());
        checkpoints.init_schema().await?;

        let runner = Arc::new(TableRunner {
            extractor: ChangeExtractor::new(Arc::clone(&source), config.sync.page_size),
            applier: Applier::new(Arc::clone(&target), checkpoints.clone(), config.sync.batch_size),
            checkpoints,
            locks: TableLocks::new(),
            retry: RetryPolicy::from(&config.sync.retry),
            clock,
        });

        Ok(Self {
            config,
            source,
            target,
            runner,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Checkpoint store of the replica (status and reset commands).
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.runner.checkpoints
    }

    fn catalog(&self) -> SchemaCatalog {
        SchemaCatalog::new(
            Arc::clone(&self.source),
            Arc::clone(&self.target),
            CatalogOptions {
                drift_policy: self.config.sync.schema_drift,
                create_missing_tables: self.config.target.create_missing_tables,
            },
        )
    }

    /// Report schema drift for every configured table without syncing.
    pub async fn check_schema(&self) -> Vec<SchemaCheck> {
        let catalog = self.catalog();
        let mut checks = Vec::with_capacity(self.config.tables.len());

        for table in &self.config.tables {
            let check = match catalog.check(table).await {
                Ok(drift) => SchemaCheck {
                    table_name: table.target_name().to_string(),
                    drift: drift.into_iter().collect(),
                    error: None,
                },
                Err(e) => SchemaCheck {
                    table_name: table.target_name().to_string(),
                    drift: Vec::new(),
                    error: Some(e.to_string()),
                },
            };
            checks.push(check);
        }

        checks
    }

    /// One pass over every configured table.
    pub async fn sync(&self, cancel: CancellationToken) -> RunReport {
        self.run(&self.config.tables, cancel).await
    }

    /// Run the given tables concurrently, bounded by `sync.workers`.
    ///
    /// Each table is described against both databases inside its own retry
    /// loop, so a transient describe failure is retried like any other.
    /// Results come back in the order of `tables`.
    pub async fn run(&self, tables: &[TableConfig], cancel: CancellationToken) -> RunReport {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = self.runner.clock.now();
        let workers = self.config.sync.workers.max(1);
        let catalog = Arc::new(self.catalog());

        info!(
            run_id = %run_id,
            tables = tables.len(),
            workers,
            "Starting sync run"
        );

        let token = cancel.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        let deadline = self.config.sync.run_timeout().map(|timeout| {
            let token = token.clone();
            let timed_out = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(timeout_secs = timeout.as_secs(), "Run timeout reached, aborting in-flight tables");
                timed_out.store(true, Ordering::SeqCst);
                token.cancel();
            })
        });
        let stop = StopReason {
            token: token.clone(),
            timed_out,
            timeout_secs: self.config.sync.run_timeout_secs.unwrap_or(0),
        };

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut pending: HashSet<String> = HashSet::new();
        let mut tasks = JoinSet::new();

        for table in tables {
            pending.insert(table.target_name().to_string());
            let table = table.clone();
            let runner = Arc::clone(&self.runner);
            let catalog = Arc::clone(&catalog);
            let semaphore = Arc::clone(&semaphore);
            let stop = stop.clone();

            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = stop.token.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                match permit {
                    Some(_permit) => runner.run_table(&catalog, &table, &stop).await,
                    None => runner.stopped(table.target_name(), &stop).await,
                }
            });
        }

        let mut results = Vec::with_capacity(pending.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    pending.remove(&result.table_name);
                    results.push(result);
                }
                Err(e) => error!("Table worker failed: {}", e),
            }
        }
        // Whatever is left panicked.
        for table in pending {
            results.push(SyncResult::failed(table, "table worker panicked"));
        }

        if let Some(deadline) = deadline {
            deadline.abort();
        }

        let order: HashMap<&str, usize> = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.target_name(), i))
            .collect();
        results.sort_by_key(|r| order.get(r.table_name.as_str()).copied().unwrap_or(usize::MAX));
        let status = RunStatus::from_results(&results);
        let completed_at = self.runner.clock.now();

        info!(
            run_id = %run_id,
            status = %status,
            tables = results.len(),
            rows_applied = results.iter().map(|r| r.rows_applied).sum::<u64>(),
            rows_failed = results.iter().map(|r| r.rows_failed).sum::<u64>(),
            "Sync run complete"
        );

        RunReport {
            run_id,
            started_at,
            completed_at,
            status,
            results,
        }
    }

    /// Ping both databases.
    pub async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let source = self.source.ping().await;
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let target = self.target.ping().await;
        let target_latency_ms = start.elapsed().as_millis() as u64;

        HealthCheckResult {
            healthy: source.is_ok() && target.is_ok(),
            source_connected: source.is_ok(),
            source_latency_ms,
            source_error: source.err().map(|e| e.to_string()),
            target_connected: target.is_ok(),
            target_latency_ms,
            target_error: target.err().map(|e| e.to_string()),
        }
    }

    /// Close both connection pools.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }
}

/// Why in-flight work must stop.
#[derive(Clone)]
struct StopReason {
    token: CancellationToken,
    timed_out: Arc<AtomicBool>,
    timeout_secs: u64,
}

impl StopReason {
    fn error(&self) -> ReplicaError {
        if self.timed_out.load(Ordering::SeqCst) {
            ReplicaError::TimedOut(self.timeout_secs)
        } else {
            ReplicaError::Cancelled
        }
    }
}

/// Per-table machinery shared by every worker task.
struct TableRunner {
    extractor: ChangeExtractor,
    applier: Applier,
    checkpoints: CheckpointStore,
    locks: TableLocks,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl TableRunner {
    /// Run one table's pass with retries; never fails, the outcome is in the result.
    async fn run_table(
        &self,
        catalog: &SchemaCatalog,
        config: &TableConfig,
        stop: &StopReason,
    ) -> SyncResult {
        let table = config.target_name();
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            enter(table, TablePhase::Pending);

            let outcome = tokio::select! {
                biased;
                _ = stop.token.cancelled() => Err(stop.error()),
                result = self.sync_table(catalog, config) => result,
            };

            match outcome {
                Ok(mut result) => {
                    enter(table, TablePhase::Committed);
                    result.attempts = attempts;
                    result.duration_ms = started.elapsed().as_millis() as u64;
                    return result;
                }
                Err(e) if e.is_retryable() && self.retry.should_retry(attempts) => {
                    let delay = self.retry.delay_for_attempt(attempts);
                    warn!(
                        table = %table,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying: {}",
                        e
                    );
                    tokio::select! {
                        biased;
                        _ = stop.token.cancelled() => {
                            return self.failed(table, stop.error(), attempts, started).await;
                        }
                        _ = self.clock.sleep(delay) => {}
                    }
                }
                Err(e) => return self.failed(table, e, attempts, started).await,
            }
        }
    }

    /// Describe, extract, map and apply one pass while holding the table lock.
    async fn sync_table(
        &self,
        catalog: &SchemaCatalog,
        config: &TableConfig,
    ) -> Result<SyncResult> {
        let table = config.target_name();
        let _guard = self.locks.acquire(table).await;

        let spec = catalog.describe(config).await?;

        enter(table, TablePhase::Extracting);
        let previous = self
            .checkpoints
            .load(table)
            .await?
            .and_then(|w| w.last_value);
        let extracted = self
            .extractor
            .extract(Arc::clone(&spec), previous)
            .collect_all()
            .await?;

        enter(table, TablePhase::Mapping);
        let mapped = Applier::map_rows(&spec, extracted.rows);

        enter(table, TablePhase::Applying);
        let plan = WatermarkPlan {
            previous,
            observed: extracted.new_watermark,
            purge_unseen: spec.mode == ChangeDetection::Full,
        };
        self.applier.write(&spec, mapped, plan).await
    }

    async fn failed(
        &self,
        table: &str,
        err: ReplicaError,
        attempts: u32,
        started: Instant,
    ) -> SyncResult {
        enter(table, TablePhase::Failed);
        error!(table = %table, attempts, "Table failed: {}", err);

        SyncResult {
            attempts,
            new_watermark: self.last_good_watermark(table).await,
            duration_ms: started.elapsed().as_millis() as u64,
            ..SyncResult::failed(table, &err)
        }
    }

    /// Result for a table that never got a worker slot.
    async fn stopped(&self, table: &str, stop: &StopReason) -> SyncResult {
        let err = stop.error();
        warn!(table = %table, "Table not started: {}", err);
        SyncResult {
            new_watermark: self.last_good_watermark(table).await,
            ..SyncResult::failed(table, &err)
        }
    }

    async fn last_good_watermark(&self, table: &str) -> Option<WatermarkValue> {
        // Bounded so a stuck replica cannot hold up the report.
        match tokio::time::timeout(Duration::from_secs(5), self.checkpoints.load(table)).await {
            Ok(Ok(watermark)) => watermark.and_then(|w| w.last_value),
            _ => None,
        }
    }
}

fn enter(table: &str, phase: TablePhase) {
    debug!(table = %table, phase = %phase, "Table phase");
}
