//! SQLite 存储实现

use std::cell::Cell;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use log::warn;
use parking_lot::ReentrantMutex;
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use super::{EventStore, ObjectFilter, ObjectStore, ReportStore, SnapshotStore, Transactional};
use crate::model::{GcEvent, HeapObject, HeapSnapshot, LeakReport, ObjectId};
use crate::{GcSimError, GcSimResult};

const OBJECT_COLUMNS: &str =
    "id, size_kb, allocation_time, last_access_time, referenced, object_type, generation, age";
const SNAPSHOT_COLUMNS: &str = "id, timestamp, total_heap_used, live_objects_count, \
     unreachable_objects_count, young_gen_size, old_gen_size";
const EVENT_COLUMNS: &str =
    "id, gc_type, before_heap, after_heap, reclaimed_memory, objects_collected, timestamp";
const REPORT_COLUMNS: &str = "id, suspicion_score, leaking_object_types, suspected_leak_duration, \
     heap_growth_rate, gc_efficiency, old_gen_growth_rate, live_object_stagnation, verdict, created_at";

struct Inner {
    connection: Connection,
    depth: Cell<usize>,
}

/// SQLite存储
///
/// 连接由可重入锁保护：同一线程内的嵌套调用（例如事务体内的读写）可以重复加锁，
/// 其他线程在事务结束前被阻塞。
pub struct SqliteStore {
    inner: ReentrantMutex<Inner>,
}

impl SqliteStore {
    /// 打开（或创建）数据库文件
    pub fn open(path: impl AsRef<Path>) -> GcSimResult<Self> {
        let connection = Connection::open(path)?;
        Self::from_connection(connection)
    }

    /// 使用内存数据库
    pub fn open_in_memory() -> GcSimResult<Self> {
        let connection = Connection::open_in_memory()?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> GcSimResult<Self> {
        Self::create_tables(&connection)?;
        Ok(Self {
            inner: ReentrantMutex::new(Inner {
                connection,
                depth: Cell::new(0),
            }),
        })
    }

    /// 创建数据库表
    fn create_tables(conn: &Connection) -> GcSimResult<()> {
        // 堆对象表
        conn.execute(
            "CREATE TABLE IF NOT EXISTS heap_object (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                size_kb INTEGER NOT NULL,
                allocation_time TEXT NOT NULL,
                last_access_time TEXT NOT NULL,
                referenced INTEGER NOT NULL,
                object_type TEXT NOT NULL,
                generation TEXT NOT NULL,
                age INTEGER NOT NULL
            )",
            [],
        )?;

        // 堆快照表
        conn.execute(
            "CREATE TABLE IF NOT EXISTS heap_snapshot (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                total_heap_used INTEGER NOT NULL,
                live_objects_count INTEGER NOT NULL,
                unreachable_objects_count INTEGER NOT NULL,
                young_gen_size INTEGER,
                old_gen_size INTEGER
            )",
            [],
        )?;

        // GC事件表
        conn.execute(
            "CREATE TABLE IF NOT EXISTS gc_event (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                gc_type TEXT NOT NULL,
                before_heap INTEGER NOT NULL,
                after_heap INTEGER NOT NULL,
                reclaimed_memory INTEGER NOT NULL,
                objects_collected INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            )",
            [],
        )?;

        // 泄漏报告表
        conn.execute(
            "CREATE TABLE IF NOT EXISTS leak_report (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                suspicion_score REAL NOT NULL,
                leaking_object_types TEXT,
                suspected_leak_duration INTEGER,
                heap_growth_rate REAL,
                gc_efficiency REAL,
                old_gen_growth_rate REAL,
                live_object_stagnation REAL,
                verdict TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // 创建索引
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_object_generation ON heap_object(generation, referenced)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_snapshot_timestamp ON heap_snapshot(timestamp)",
            [],
        )?;

        Ok(())
    }
}

/// 定宽的 RFC 3339 纳秒格式，字典序即时间序
fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = GcSimError>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn unsigned_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn to_sql_int(value: u64) -> GcSimResult<i64> {
    i64::try_from(value).map_err(|_| GcSimError::store(format!("value {value} exceeds SQLite INTEGER range")))
}

fn row_to_object(row: &Row<'_>) -> rusqlite::Result<HeapObject> {
    Ok(HeapObject {
        id: Some(unsigned_column(row, 0)?),
        size_kb: row.get(1)?,
        allocation_time: timestamp_column(row, 2)?,
        last_access_time: timestamp_column(row, 3)?,
        referenced: row.get(4)?,
        object_type: row.get(5)?,
        generation: parsed_column(row, 6)?,
        age: row.get(7)?,
    })
}

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<HeapSnapshot> {
    let young: Option<i64> = row.get(5)?;
    let old: Option<i64> = row.get(6)?;
    Ok(HeapSnapshot {
        id: Some(unsigned_column(row, 0)?),
        timestamp: timestamp_column(row, 1)?,
        total_heap_used: unsigned_column(row, 2)?,
        live_objects_count: unsigned_column(row, 3)?,
        unreachable_objects_count: unsigned_column(row, 4)?,
        young_gen_size: young.map(|v| v.max(0) as u64),
        old_gen_size: old.map(|v| v.max(0) as u64),
    })
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<GcEvent> {
    Ok(GcEvent {
        id: Some(unsigned_column(row, 0)?),
        gc_type: parsed_column(row, 1)?,
        before_heap: unsigned_column(row, 2)?,
        after_heap: unsigned_column(row, 3)?,
        reclaimed_memory: unsigned_column(row, 4)?,
        objects_collected: unsigned_column(row, 5)?,
        timestamp: timestamp_column(row, 6)?,
    })
}

fn row_to_report(row: &Row<'_>) -> rusqlite::Result<LeakReport> {
    let leaking: Option<String> = row.get(2)?;
    let duration: Option<i64> = row.get(3)?;
    let heap_growth: Option<f64> = row.get(4)?;
    let efficiency: Option<f64> = row.get(5)?;
    let old_growth: Option<f64> = row.get(6)?;
    let stagnation: Option<f64> = row.get(7)?;
    Ok(LeakReport {
        id: Some(unsigned_column(row, 0)?),
        suspicion_score: row.get(1)?,
        leaking_object_types: leaking.unwrap_or_default(),
        suspected_leak_duration: duration.unwrap_or(0),
        heap_growth_rate: heap_growth.unwrap_or(0.0),
        gc_efficiency: efficiency.unwrap_or(0.0),
        old_gen_growth_rate: old_growth.unwrap_or(0.0),
        live_object_stagnation: stagnation.unwrap_or(0.0),
        verdict: parsed_column(row, 8)?,
        created_at: timestamp_column(row, 9)?,
    })
}

fn where_clause(filter: &ObjectFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    if let Some(referenced) = filter.referenced {
        clauses.push("referenced = ?");
        values.push(Value::Integer(i64::from(referenced)));
    }
    if let Some(generation) = filter.generation {
        clauses.push("generation = ?");
        values.push(Value::Text(generation.as_str().to_string()));
    }
    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

fn collect_rows<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> GcSimResult<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

impl ObjectStore for SqliteStore {
    fn insert_objects(&self, objects: Vec<HeapObject>) -> GcSimResult<Vec<HeapObject>> {
        super::transaction(self, || {
            let guard = self.inner.lock();
            let conn = &guard.connection;
            let mut stmt = conn.prepare(
                "INSERT INTO heap_object
                 (size_kb, allocation_time, last_access_time, referenced, object_type, generation, age)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )?;
            let mut saved = Vec::with_capacity(objects.len());
            for mut object in objects {
                stmt.execute(params![
                    object.size_kb,
                    format_timestamp(&object.allocation_time),
                    format_timestamp(&object.last_access_time),
                    object.referenced,
                    object.object_type,
                    object.generation.as_str(),
                    object.age,
                ])?;
                object.id = Some(conn.last_insert_rowid() as u64);
                saved.push(object);
            }
            Ok(saved)
        })
    }

    fn update_objects(&self, objects: &[HeapObject]) -> GcSimResult<()> {
        super::transaction(self, || {
            let guard = self.inner.lock();
            let mut stmt = guard.connection.prepare(
                "UPDATE heap_object
                 SET size_kb = ?, allocation_time = ?, last_access_time = ?, referenced = ?,
                     object_type = ?, generation = ?, age = ?
                 WHERE id = ?",
            )?;
            for object in objects {
                let id = object
                    .id
                    .ok_or_else(|| GcSimError::store("cannot update an object that was never saved"))?;
                stmt.execute(params![
                    object.size_kb,
                    format_timestamp(&object.allocation_time),
                    format_timestamp(&object.last_access_time),
                    object.referenced,
                    object.object_type,
                    object.generation.as_str(),
                    object.age,
                    to_sql_int(id)?,
                ])?;
            }
            Ok(())
        })
    }

    fn get_object(&self, id: ObjectId) -> GcSimResult<Option<HeapObject>> {
        let guard = self.inner.lock();
        let object = guard
            .connection
            .query_row(
                &format!("SELECT {OBJECT_COLUMNS} FROM heap_object WHERE id = ?"),
                params![to_sql_int(id)?],
                row_to_object,
            )
            .optional()?;
        Ok(object)
    }

    fn get_objects(&self, ids: &[ObjectId]) -> GcSimResult<Vec<HeapObject>> {
        let mut wanted: Vec<ObjectId> = ids.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        let mut found = Vec::with_capacity(wanted.len());
        for id in wanted {
            if let Some(object) = self.get_object(id)? {
                found.push(object);
            }
        }
        Ok(found)
    }

    fn find_objects(&self, filter: ObjectFilter) -> GcSimResult<Vec<HeapObject>> {
        let (clause, values) = where_clause(&filter);
        let guard = self.inner.lock();
        let mut stmt = guard
            .connection
            .prepare(&format!("SELECT {OBJECT_COLUMNS} FROM heap_object{clause} ORDER BY id"))?;
        let rows = stmt.query_map(params_from_iter(values), row_to_object)?;
        collect_rows(rows)
    }

    fn delete_objects(&self, ids: &[ObjectId]) -> GcSimResult<usize> {
        super::transaction(self, || {
            let guard = self.inner.lock();
            let mut stmt = guard.connection.prepare("DELETE FROM heap_object WHERE id = ?")?;
            let mut removed = 0;
            for id in ids {
                removed += stmt.execute(params![to_sql_int(*id)?])?;
            }
            Ok(removed)
        })
    }

    fn delete_all_objects(&self) -> GcSimResult<usize> {
        let guard = self.inner.lock();
        Ok(guard.connection.execute("DELETE FROM heap_object", [])?)
    }

    fn sum_size(&self, filter: ObjectFilter) -> GcSimResult<u64> {
        let (clause, values) = where_clause(&filter);
        let guard = self.inner.lock();
        let total: i64 = guard.connection.query_row(
            &format!("SELECT COALESCE(SUM(size_kb), 0) FROM heap_object{clause}"),
            params_from_iter(values),
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    fn count_objects(&self, filter: ObjectFilter) -> GcSimResult<u64> {
        let (clause, values) = where_clause(&filter);
        let guard = self.inner.lock();
        let count: i64 = guard.connection.query_row(
            &format!("SELECT COUNT(*) FROM heap_object{clause}"),
            params_from_iter(values),
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

impl SnapshotStore for SqliteStore {
    fn append_snapshot(&self, mut snapshot: HeapSnapshot) -> GcSimResult<HeapSnapshot> {
        let guard = self.inner.lock();
        guard.connection.execute(
            "INSERT INTO heap_snapshot
             (timestamp, total_heap_used, live_objects_count, unreachable_objects_count,
              young_gen_size, old_gen_size)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                format_timestamp(&snapshot.timestamp),
                to_sql_int(snapshot.total_heap_used)?,
                to_sql_int(snapshot.live_objects_count)?,
                to_sql_int(snapshot.unreachable_objects_count)?,
                snapshot.young_gen_size.map(to_sql_int).transpose()?,
                snapshot.old_gen_size.map(to_sql_int).transpose()?,
            ],
        )?;
        snapshot.id = Some(guard.connection.last_insert_rowid() as u64);
        Ok(snapshot)
    }

    fn snapshots_desc(&self) -> GcSimResult<Vec<HeapSnapshot>> {
        let guard = self.inner.lock();
        let mut stmt = guard.connection.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM heap_snapshot ORDER BY timestamp DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], row_to_snapshot)?;
        collect_rows(rows)
    }

    fn snapshots_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> GcSimResult<Vec<HeapSnapshot>> {
        let guard = self.inner.lock();
        let mut stmt = guard.connection.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM heap_snapshot
             WHERE timestamp BETWEEN ? AND ?
             ORDER BY timestamp, id"
        ))?;
        let rows = stmt.query_map(
            params![format_timestamp(&from), format_timestamp(&to)],
            row_to_snapshot,
        )?;
        collect_rows(rows)
    }

    fn first_snapshot(&self) -> GcSimResult<Option<HeapSnapshot>> {
        let guard = self.inner.lock();
        let snapshot = guard
            .connection
            .query_row(
                &format!(
                    "SELECT {SNAPSHOT_COLUMNS} FROM heap_snapshot ORDER BY timestamp ASC, id ASC LIMIT 1"
                ),
                [],
                row_to_snapshot,
            )
            .optional()?;
        Ok(snapshot)
    }

    fn latest_snapshot(&self) -> GcSimResult<Option<HeapSnapshot>> {
        let guard = self.inner.lock();
        let snapshot = guard
            .connection
            .query_row(
                &format!(
                    "SELECT {SNAPSHOT_COLUMNS} FROM heap_snapshot ORDER BY timestamp DESC, id DESC LIMIT 1"
                ),
                [],
                row_to_snapshot,
            )
            .optional()?;
        Ok(snapshot)
    }
}

impl EventStore for SqliteStore {
    fn append_event(&self, mut event: GcEvent) -> GcSimResult<GcEvent> {
        let guard = self.inner.lock();
        guard.connection.execute(
            "INSERT INTO gc_event
             (gc_type, before_heap, after_heap, reclaimed_memory, objects_collected, timestamp)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                event.gc_type.as_str(),
                to_sql_int(event.before_heap)?,
                to_sql_int(event.after_heap)?,
                to_sql_int(event.reclaimed_memory)?,
                to_sql_int(event.objects_collected)?,
                format_timestamp(&event.timestamp),
            ],
        )?;
        event.id = Some(guard.connection.last_insert_rowid() as u64);
        Ok(event)
    }

    fn events_desc(&self) -> GcSimResult<Vec<GcEvent>> {
        let guard = self.inner.lock();
        let mut stmt = guard.connection.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM gc_event ORDER BY timestamp DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], row_to_event)?;
        collect_rows(rows)
    }

    fn average_efficiency(&self) -> GcSimResult<Option<f64>> {
        let guard = self.inner.lock();
        let average: Option<f64> = guard.connection.query_row(
            "SELECT AVG(CAST(reclaimed_memory AS REAL) / before_heap) FROM gc_event WHERE before_heap > 0",
            [],
            |row| row.get(0),
        )?;
        Ok(average)
    }
}

impl ReportStore for SqliteStore {
    fn append_report(&self, mut report: LeakReport) -> GcSimResult<LeakReport> {
        let guard = self.inner.lock();
        guard.connection.execute(
            "INSERT INTO leak_report
             (suspicion_score, leaking_object_types, suspected_leak_duration, heap_growth_rate,
              gc_efficiency, old_gen_growth_rate, live_object_stagnation, verdict, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                report.suspicion_score,
                report.leaking_object_types,
                report.suspected_leak_duration,
                report.heap_growth_rate,
                report.gc_efficiency,
                report.old_gen_growth_rate,
                report.live_object_stagnation,
                report.verdict.as_str(),
                format_timestamp(&report.created_at),
            ],
        )?;
        report.id = Some(guard.connection.last_insert_rowid() as u64);
        Ok(report)
    }

    fn reports_desc(&self) -> GcSimResult<Vec<LeakReport>> {
        let guard = self.inner.lock();
        let mut stmt = guard.connection.prepare(&format!(
            "SELECT {REPORT_COLUMNS} FROM leak_report ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], row_to_report)?;
        collect_rows(rows)
    }

    fn latest_report(&self) -> GcSimResult<Option<LeakReport>> {
        let guard = self.inner.lock();
        let report = guard
            .connection
            .query_row(
                &format!(
                    "SELECT {REPORT_COLUMNS} FROM leak_report ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                [],
                row_to_report,
            )
            .optional()?;
        Ok(report)
    }
}

/// 顶层事务守卫：未提交即被丢弃（出错、COMMIT 失败或 panic）时回滚，并复位嵌套深度
struct TxGuard<'a> {
    inner: &'a Inner,
    open: bool,
}

impl<'a> TxGuard<'a> {
    fn begin(inner: &'a Inner) -> GcSimResult<Self> {
        inner.connection.execute_batch("BEGIN IMMEDIATE")?;
        inner.depth.set(1);
        Ok(Self { inner, open: true })
    }

    fn commit(mut self) -> GcSimResult<()> {
        self.inner.connection.execute_batch("COMMIT")?;
        self.open = false;
        Ok(())
    }
}

impl Drop for TxGuard<'_> {
    fn drop(&mut self) {
        self.inner.depth.set(0);
        if self.open && !self.inner.connection.is_autocommit() {
            if let Err(err) = self.inner.connection.execute_batch("ROLLBACK") {
                warn!("SQLite rollback failed: {}", err);
            }
        }
    }
}

impl Transactional for SqliteStore {
    fn atomically(&self, body: &mut dyn FnMut() -> GcSimResult<()>) -> GcSimResult<()> {
        let guard = self.inner.lock();
        if guard.depth.get() > 0 {
            return body();
        }

        let tx = TxGuard::begin(&guard)?;
        body()?;
        tx.commit()
    }
}
