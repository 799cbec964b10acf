//! Persistence layer: a versioned entity store over SQLite.
//!
//! # Schema Overview
//! Three tables, named after the store:
//! * `<name>` – entity versions. Each row carries
//!   `(customer_id, id, start_datetime, end_datetime, entity)`; the entity
//!   itself is the JSON-codec row object, and `[start, end)` is the
//!   version validity window (`end` NULL while current).
//! * `<name>_meta_datas` – grid-level metadata and column schema per
//!   version, stored as a row-less JSON grid document.
//! * `<name>_ts` – time-series samples `(customer_id, id, ts, value, level,
//!   who)` fed by point writes and history imports.
//!
//! Instants are stored as RFC 3339 UTC text, so the version window
//! comparisons are plain text comparisons.
//!
//! # Reading with a filter
//! `read` compiles the filter through [`crate::sql`] and runs it inside
//! SQLite. When the translation is flagged inexact, or it needs correlated
//! ref joins (which ignore the version window), the store falls back to
//! evaluating the filter in memory over the full version grid.

use std::sync::Mutex;
use std::time::Duration;

use chrono::DateTime;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::datatype::{DateTimeTz, Dict, Ref, Value};
use crate::diff;
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::grid::Grid;
use crate::json;
use crate::provider::{Capabilities, HisRange, Provider, WriteAck};
use crate::sql::{self, Dialect, Sqlite};
use crate::zinc;

pub struct SqlStore {
    conn: Mutex<Connection>,
    table: String,
    customer: String,
}

impl SqlStore {
    /// Wraps a connection and creates (or migrates) the schema.
    pub fn open(conn: Connection, table: &str, customer: &str) -> Result<SqlStore> {
        // WAL helps concurrent readers on file-backed DBs; a no-op in memory.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;");
        let dialect = Sqlite;
        let entities = dialect.quote_ident(table);
        let metas = dialect.quote_ident(&format!("{}_meta_datas", table));
        let ts = dialect.quote_ident(&format!("{}_ts", table));
        conn.execute_batch(&format!(
            "
            create table if not exists {entities} (
                customer_id text not null,
                id text not null,
                start_datetime text not null,
                end_datetime text null,
                entity text not null
            ) STRICT;
            create index if not exists {entities_idx} on {entities} (customer_id, id, start_datetime);
            create table if not exists {metas} (
                customer_id text not null,
                start_datetime text not null,
                end_datetime text null,
                metadata text not null
            ) STRICT;
            create table if not exists {ts} (
                customer_id text not null,
                id text not null,
                ts text not null,
                value text not null,
                level integer null,
                who text null
            ) STRICT;
            ",
            entities = entities,
            entities_idx = dialect.quote_ident(&format!("{}_window", table)),
            metas = metas,
            ts = ts,
        ))?;
        Ok(SqlStore {
            conn: Mutex::new(conn),
            table: table.to_string(),
            customer: customer.to_string(),
        })
    }

    /// In-memory store, mostly for tests and scratch work.
    pub fn in_memory(table: &str) -> Result<SqlStore> {
        let conn = Connection::open_in_memory()?;
        Self::open(conn, table, "")
    }

    /// File-backed store at `path`.
    pub fn open_path(path: &std::path::Path, table: &str, customer: &str) -> Result<SqlStore> {
        let conn = Connection::open(path)?;
        let _ = conn.busy_timeout(std::time::Duration::from_millis(5000));
        Self::open(conn, table, customer)
    }

    fn with_conn<T>(&self, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| Error::Data(format!("connection lock poisoned: {}", e)))?;
        op(&guard)
    }

    fn quoted(&self, suffix: &str) -> String {
        Sqlite.quote_ident(&format!("{}{}", self.table, suffix))
    }

    /// Removes every row of every table. Irreversible.
    pub fn purge(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(&format!(
                "delete from {}; delete from {}; delete from {};",
                self.quoted(""),
                self.quoted("_meta_datas"),
                self.quoted("_ts"),
            ))?;
            Ok(())
        })
    }

    /// Imports a grid as a new version at `version`. A grid marked with
    /// the `diff_` metadata tag patches the current state; any other grid
    /// replaces it. Every row must carry an `id` tag.
    pub fn update_grid(&self, grid: &Grid, version: &DateTimeTz) -> Result<()> {
        let state = if grid.meta().contains("diff_") {
            let current = self.read_grid(None)?;
            diff::merge(&current, grid)?
        } else {
            grid.clone()
        };
        for row in state.rows() {
            if !matches!(row.get("id"), Some(Value::Ref(_))) {
                return Err(Error::Schema("every persisted entity needs an id tag".to_string()));
            }
        }
        let stamp = version.to_utc().to_rfc3339();
        let schema = {
            let mut header = Grid::new();
            *header.meta_mut() = state.meta().clone();
            for col in state.columns() {
                header.add_column(col.clone())?;
            }
            json::dump_grid(&header)?
        };
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "update {} set end_datetime = ?1 where customer_id = ?2 and end_datetime is null",
                    self.quoted("")
                ),
                params![stamp, self.customer],
            )?;
            conn.execute(
                &format!(
                    "update {} set end_datetime = ?1 where customer_id = ?2 and end_datetime is null",
                    self.quoted("_meta_datas")
                ),
                params![stamp, self.customer],
            )?;
            conn.execute(
                &format!(
                    "insert into {} (customer_id, start_datetime, end_datetime, metadata) values (?1, ?2, null, ?3)",
                    self.quoted("_meta_datas")
                ),
                params![self.customer, stamp, schema],
            )?;
            let mut insert = conn.prepare(&format!(
                "insert into {} (customer_id, id, start_datetime, end_datetime, entity) values (?1, ?2, ?3, null, ?4)",
                self.quoted("")
            ))?;
            for row in state.rows() {
                let id = match row.get("id") {
                    Some(Value::Ref(r)) => r.name().to_string(),
                    _ => unreachable!("validated above"),
                };
                insert.execute(params![self.customer, id, stamp, json::dump_dict(row)?])?;
            }
            Ok(())
        })
    }

    /// The full grid valid at `version` (latest when `None`).
    pub fn read_grid(&self, version: Option<&DateTimeTz>) -> Result<Grid> {
        let window = self.version_window(version);
        let mut grid = self.read_schema(version)?;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "select entity from {} where customer_id = ?1 and {} order by rowid",
                self.quoted(""),
                window.clause,
            ))?;
            let mut binds: Vec<&dyn rusqlite::ToSql> = vec![&self.customer];
            for b in &window.binds {
                binds.push(b);
            }
            let mut rows = stmt.query(&binds[..])?;
            while let Some(row) = rows.next()? {
                let text: String = row.get(0)?;
                let entity = json::parse_dict(&text)?;
                for name in entity.keys() {
                    if !grid.has_column(name) {
                        grid.add_column(crate::grid::Column::new(name.clone()))?;
                    }
                }
                grid.append(entity);
            }
            Ok(())
        })?;
        Ok(grid)
    }

    fn read_schema(&self, version: Option<&DateTimeTz>) -> Result<Grid> {
        let window = self.version_window(version);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "select metadata from {} where customer_id = ?1 and {} order by start_datetime desc limit 1",
                self.quoted("_meta_datas"),
                window.clause,
            ))?;
            let mut binds: Vec<&dyn rusqlite::ToSql> = vec![&self.customer];
            for b in &window.binds {
                binds.push(b);
            }
            let mut rows = stmt.query(&binds[..])?;
            match rows.next()? {
                Some(row) => {
                    let text: String = row.get(0)?;
                    json::parse_grid(&text)
                }
                None => Ok(Grid::new()),
            }
        })
    }

    fn version_window(&self, version: Option<&DateTimeTz>) -> VersionWindow {
        match version {
            None => VersionWindow {
                clause: "end_datetime is null".to_string(),
                binds: vec![],
            },
            Some(v) => {
                let stamp = v.to_utc().to_rfc3339();
                VersionWindow {
                    clause: "start_datetime <= ?2 and (end_datetime is null or end_datetime > ?2)"
                        .to_string(),
                    binds: vec![stamp],
                }
            }
        }
    }

    /// Appends history samples for a point.
    pub fn his_write(&self, id: &Ref, samples: &[(DateTimeTz, Value)]) -> Result<()> {
        self.with_conn(|conn| {
            let mut insert = conn.prepare(&format!(
                "insert into {} (customer_id, id, ts, value, level, who) values (?1, ?2, ?3, ?4, null, null)",
                self.quoted("_ts")
            ))?;
            for (stamp, value) in samples {
                let encoded = json::scalar_string(value)
                    .unwrap_or_else(|| match value {
                        Value::Bool(b) => b.to_string(),
                        other => zinc::dump_scalar(other).unwrap_or_default(),
                    });
                insert.execute(params![
                    self.customer,
                    id.name(),
                    stamp.to_utc().to_rfc3339(),
                    encoded
                ])?;
            }
            Ok(())
        })
    }
}

struct VersionWindow {
    clause: String,
    binds: Vec<String>,
}

impl Provider for SqlStore {
    fn name(&self) -> &str {
        &self.table
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read: true,
            his_read: true,
            point_write: true,
            invoke_action: false,
            values_for_tag: true,
            versions: true,
        }
    }

    fn read(
        &self,
        filter: Option<&str>,
        limit: usize,
        select: Option<&str>,
        version: Option<&DateTimeTz>,
    ) -> Result<Grid> {
        let mut grid = match filter {
            None | Some("") => self.read_grid(version)?,
            Some(source) => {
                let filter = Filter::parse(source)?;
                let translation = sql::translate(&filter, &Sqlite, &self.table)?;
                if !translation.exact || translation.has_ref_paths {
                    // Correlated subqueries do not see the version window;
                    // fall back to the evaluator over the full grid.
                    debug!(filter = %filter, "re-verifying SQL read in process");
                    let full = self.read_grid(version)?;
                    let mut narrowed = Grid::new();
                    *narrowed.meta_mut() = full.meta().clone();
                    for col in full.columns() {
                        narrowed.add_column(col.clone())?;
                    }
                    let hits: Vec<Dict> = filter.filter_grid(&full).cloned().collect();
                    for hit in hits {
                        narrowed.append(hit);
                    }
                    narrowed
                } else {
                    let window = self.version_window(version);
                    let mut grid = self.read_schema(version)?;
                    self.with_conn(|conn| {
                        let query = format!(
                            "select entity from {} where customer_id = ?1 and {} and ({}) order by rowid",
                            self.quoted(""),
                            window.clause,
                            translation.clause,
                        );
                        debug!(%query, "translated filter read");
                        let mut stmt = conn.prepare(&query)?;
                        let mut binds: Vec<&dyn rusqlite::ToSql> = vec![&self.customer];
                        for b in &window.binds {
                            binds.push(b);
                        }
                        for b in &translation.binds {
                            binds.push(b);
                        }
                        let mut rows = stmt.query(&binds[..])?;
                        while let Some(row) = rows.next()? {
                            let text: String = row.get(0)?;
                            let entity = json::parse_dict(&text)?;
                            for name in entity.keys() {
                                if !grid.has_column(name) {
                                    grid.add_column(crate::grid::Column::new(name.clone()))?;
                                }
                            }
                            grid.append(entity);
                        }
                        Ok(())
                    })?;
                    grid
                }
            }
        };
        if limit > 0 {
            while grid.len() > limit {
                grid.take_row(limit);
            }
        }
        if let Some(select) = select {
            let names: Vec<&str> = select
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty() && *s != "*")
                .collect();
            if !names.is_empty() {
                grid = grid.select(&names);
            }
        }
        Ok(grid)
    }

    fn his_read(&self, ids: &[Ref], range: &HisRange) -> Result<Grid> {
        let mut grid = Grid::with_columns(["ts", "id", "val"])?;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "select id, ts, value from {} where customer_id = ?1 order by ts",
                self.quoted("_ts")
            ))?;
            let mut rows = stmt.query(params![self.customer])?;
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                if !ids.is_empty() && !ids.iter().any(|r| r.name() == id) {
                    continue;
                }
                let ts_text: String = row.get(1)?;
                let stamp = DateTime::parse_from_rfc3339(&ts_text)
                    .map_err(|e| Error::Data(format!("bad stored timestamp: {}", e)))?;
                let stamp = DateTimeTz::from_parts(stamp, "UTC");
                if !range.contains(&stamp) {
                    continue;
                }
                let value_text: String = row.get(2)?;
                let value = match value_text.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    other => json::tagged_scalar(other)?,
                };
                let mut out = Dict::new();
                out.insert("ts", Value::DateTime(stamp));
                out.insert("id", Value::Ref(Ref::new(id)));
                out.insert("val", value);
                grid.append(out);
            }
            Ok(())
        })?;
        Ok(grid)
    }

    fn point_write(
        &self,
        id: &Ref,
        level: u8,
        value: &Value,
        who: &str,
        _duration: Option<Duration>,
    ) -> Result<WriteAck> {
        let encoded = json::scalar_string(value).unwrap_or_else(|| match value {
            Value::Bool(b) => b.to_string(),
            other => zinc::dump_scalar(other).unwrap_or_default(),
        });
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "insert into {} (customer_id, id, ts, value, level, who) values (?1, ?2, ?3, ?4, ?5, ?6)",
                    self.quoted("_ts")
                ),
                params![
                    self.customer,
                    id.name(),
                    DateTimeTz::now().to_utc().to_rfc3339(),
                    encoded,
                    level as i64,
                    who
                ],
            )?;
            Ok(())
        })?;
        Ok(WriteAck { id: id.clone(), level })
    }

    fn values_for_tag(&self, tag: &str) -> Result<Vec<Value>> {
        let grid = self.read_grid(None)?;
        let mut seen = std::collections::HashSet::new();
        let mut values = Vec::new();
        for row in grid.rows() {
            if let Some(value) = row.get(tag) {
                let key = zinc::dump_scalar(value)?;
                if seen.insert(key) {
                    values.push(value.clone());
                }
            }
        }
        values.sort_by_key(|v| zinc::dump_scalar(v).unwrap_or_default());
        Ok(values)
    }

    fn versions(&self) -> Result<Vec<DateTimeTz>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "select distinct start_datetime from {} order by start_datetime desc",
                self.quoted("_meta_datas")
            ))?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let text: String = row.get(0)?;
                let stamp = DateTime::parse_from_rfc3339(&text)
                    .map_err(|e| Error::Data(format!("bad stored version: {}", e)))?;
                out.push(DateTimeTz::from_parts(stamp, "UTC"));
            }
            Ok(out)
        })
    }
}
