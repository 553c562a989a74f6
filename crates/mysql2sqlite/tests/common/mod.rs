//! Shared fixtures for engine tests: an in-memory source and a manual clock.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mysql2sqlite::core::{SourceColumn, SourceTable, SourceType};
use mysql2sqlite::source::PageRequest;
use mysql2sqlite::{
    Clock, Config, Orchestrator, ReplicaError, Result, SourceReader, SourceValue, TargetDb,
};

struct MemTable {
    table: SourceTable,
    rows: Vec<Vec<SourceValue>>,
}

/// Failure injected into the next page fetches of a table.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Transient,
    Permanent,
}

/// In-memory source honoring the keyset paging contract.
#[derive(Default)]
pub struct MemorySource {
    tables: Mutex<HashMap<String, MemTable>>,
    faults: Mutex<HashMap<String, VecDeque<Fault>>>,
    describe_faults: Mutex<HashMap<String, VecDeque<Fault>>>,
    unreachable: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Define a table; `columns` are `(name, type, nullable)`.
    pub fn add_table(&self, name: &str, columns: &[(&str, SourceType, bool)], primary_key: &[&str]) {
        let table = SourceTable {
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|(n, t, nullable)| SourceColumn {
                    name: n.to_string(),
                    source_type: *t,
                    nullable: *nullable,
                    declared: t.to_string(),
                })
                .collect(),
            primary_key: primary_key.iter().map(|k| k.to_string()).collect(),
        };
        self.tables.lock().unwrap().insert(
            name.to_string(),
            MemTable {
                table,
                rows: Vec::new(),
            },
        );
    }

    /// Insert or replace a row (matched on the primary key).
    pub fn upsert(&self, table: &str, row: Vec<SourceValue>) {
        let mut tables = self.tables.lock().unwrap();
        let mem = tables.get_mut(table).expect("unknown table");
        let key: Vec<usize> = mem
            .table
            .primary_key
            .iter()
            .map(|k| mem.table.columns.iter().position(|c| &c.name == k).unwrap())
            .collect();
        let existing = mem
            .rows
            .iter()
            .position(|r| key.iter().all(|&i| r[i] == row[i]));
        match existing {
            Some(pos) => mem.rows[pos] = row,
            None => mem.rows.push(row),
        }
    }

    /// Remove rows whose first column equals `key`.
    pub fn remove(&self, table: &str, key: &SourceValue) {
        let mut tables = self.tables.lock().unwrap();
        let mem = tables.get_mut(table).expect("unknown table");
        mem.rows.retain(|r| &r[0] != key);
    }

    pub fn fail_next(&self, table: &str, faults: &[Fault]) {
        self.faults
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(faults.iter().copied());
    }

    /// Fail the next table descriptions instead of page fetches.
    pub fn fail_describe(&self, table: &str, faults: &[Fault]) {
        self.describe_faults
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(faults.iter().copied());
    }

    /// Drop a table entirely, as if it were renamed upstream.
    pub fn drop_table(&self, table: &str) {
        self.tables.lock().unwrap().remove(table);
    }

    pub fn set_unreachable(&self, table: &str) {
        self.unreachable.lock().unwrap().insert(table.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn describe_table(&self, table: &str) -> Result<Option<SourceTable>> {
        let fault = self
            .describe_faults
            .lock()
            .unwrap()
            .get_mut(table)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(Fault::Transient) => return Err(ReplicaError::extraction(table, "connection refused")),
            Some(Fault::Permanent) => {
                return Err(ReplicaError::extraction_permanent(table, "access denied"))
            }
            None => {}
        }
        Ok(self.tables.lock().unwrap().get(table).map(|m| m.table.clone()))
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Vec<SourceValue>>> {
        self.fetches.fetch_add(1, AtomicOrdering::SeqCst);
        let name = request.spec.target_name.clone();

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.lock().unwrap().contains(&request.spec.source_name) {
            return Err(ReplicaError::extraction(&name, "connection refused"));
        }
        let fault = self
            .faults
            .lock()
            .unwrap()
            .get_mut(&request.spec.source_name)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(Fault::Transient) => return Err(ReplicaError::extraction(&name, "lost connection")),
            Some(Fault::Permanent) => {
                return Err(ReplicaError::extraction_permanent(&name, "undecodable value"))
            }
            None => {}
        }

        let tables = self.tables.lock().unwrap();
        let mem = tables
            .get(&request.spec.source_name)
            .ok_or_else(|| ReplicaError::extraction(&name, "table does not exist"))?;

        // Project source rows onto the requested columns.
        let positions: Vec<usize> = request
            .spec
            .columns
            .iter()
            .map(|c| {
                mem.table
                    .columns
                    .iter()
                    .position(|s| s.name.eq_ignore_ascii_case(&c.name))
                    .unwrap()
            })
            .collect();
        let order = request.order_indices();
        let watermark = request.watermark.as_ref().map(|w| {
            (
                request.spec.column_index(&w.column).unwrap(),
                w.after.clone(),
            )
        });

        let mut rows: Vec<Vec<SourceValue>> = mem
            .rows
            .iter()
            .map(|r| positions.iter().map(|&i| r[i].clone()).collect::<Vec<_>>())
            .filter(|r| match &watermark {
                None => true,
                Some((i, None)) => !r[*i].is_null(),
                Some((i, Some(after))) => {
                    !r[*i].is_null() && compare(&r[*i], after) == Ordering::Greater
                }
            })
            .filter(|r| match &request.after {
                None => true,
                Some(after) => {
                    let tuple: Vec<SourceValue> = order.iter().map(|&i| r[i].clone()).collect();
                    compare_tuple(&tuple, after) == Ordering::Greater
                }
            })
            .collect();

        rows.sort_by(|a, b| {
            let a: Vec<SourceValue> = order.iter().map(|&i| a[i].clone()).collect();
            let b: Vec<SourceValue> = order.iter().map(|&i| b[i].clone()).collect();
            compare_tuple(&a, &b)
        });
        rows.truncate(request.limit);
        Ok(rows)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

fn compare(a: &SourceValue, b: &SourceValue) -> Ordering {
    use SourceValue as V;
    match (a, b) {
        (V::Null, V::Null) => Ordering::Equal,
        (V::Null, _) => Ordering::Less,
        (_, V::Null) => Ordering::Greater,
        (V::Int(x), V::Int(y)) => x.cmp(y),
        (V::UInt(x), V::UInt(y)) => x.cmp(y),
        (V::Int(x), V::UInt(y)) => i128::from(*x).cmp(&i128::from(*y)),
        (V::UInt(x), V::Int(y)) => i128::from(*x).cmp(&i128::from(*y)),
        (V::Text(x), V::Text(y)) => x.cmp(y),
        (V::DateTime(x), V::DateTime(y)) => x.cmp(y),
        (V::Date(x), V::DateTime(y)) => x.and_hms_opt(0, 0, 0).unwrap().cmp(y),
        (V::Date(x), V::Date(y)) => x.cmp(y),
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}

fn compare_tuple(a: &[SourceValue], b: &[SourceValue]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match compare(x, y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Clock that records sleeps instead of waiting.
pub struct ManualClock {
    start: DateTime<Utc>,
    slept: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            slept: Mutex::new(Vec::new()),
        })
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let total: Duration = self.slept.lock().unwrap().iter().sum();
        self.start + chrono::Duration::from_std(total).unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

/// Parse a config whose replica lives at `db` with the given `sync` and
/// `tables` YAML sections.
pub fn config(db: &Path, sync: &str, tables: &str) -> Config {
    let yaml = format!(
        "source:\n  host: localhost\n  database: mail\n  user: test\n\
         target:\n  path: {}\n  create_missing_tables: true\n\
         sync:\n{}\ntables:\n{}\n",
        db.display(),
        sync,
        tables
    );
    Config::from_yaml(&yaml).unwrap()
}

pub async fn orchestrator(
    source: Arc<MemorySource>,
    config: Config,
    clock: Arc<ManualClock>,
) -> (Orchestrator, Arc<TargetDb>) {
    let target = Arc::new(TargetDb::open(&config.target, 2).await.unwrap());
    let orchestrator = Orchestrator::new(source, Arc::clone(&target), config, clock)
        .await
        .unwrap();
    (orchestrator, target)
}

/// Run a query against the replica and decode every row.
pub async fn rows<T>(target: &TargetDb, sql: &str) -> Vec<T>
where
    T: for<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> + Send + Unpin,
{
    sqlx::query_as(sql).fetch_all(target.pool()).await.unwrap()
}

pub async fn count(target: &TargetDb, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{}\"", table))
        .fetch_one(target.pool())
        .await
        .unwrap()
}

pub fn text(s: &str) -> SourceValue {
    SourceValue::Text(s.to_string())
}

pub fn int(v: i64) -> SourceValue {
    SourceValue::Int(v)
}
