//! Provider contract: the abstract boundary to storage back-ends.
//!
//! A provider mirrors the Haystack REST verbs. Implementations are free to
//! support any subset; the default method bodies answer
//! [`Error::Capability`] and the `ops` grid is derived from the declared
//! capability set, so callers can discover what a provider actually does.

use std::time::Duration;

use crate::datatype::{DateTimeTz, Dict, Ref, Value};
use crate::error::{Error, Result};
use crate::grid::{Column, Grid};

/// Which optional operations a provider implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub read: bool,
    pub his_read: bool,
    pub point_write: bool,
    pub invoke_action: bool,
    pub values_for_tag: bool,
    pub versions: bool,
}

/// An inclusive-exclusive instant window for history reads. `None` bounds
/// are open.
#[derive(Debug, Clone, Default)]
pub struct HisRange {
    pub start: Option<DateTimeTz>,
    pub end: Option<DateTimeTz>,
}

impl HisRange {
    pub fn contains(&self, stamp: &DateTimeTz) -> bool {
        if let Some(start) = &self.start {
            if stamp.to_utc() < start.to_utc() {
                return false;
            }
        }
        if let Some(end) = &self.end {
            if stamp.to_utc() >= end.to_utc() {
                return false;
            }
        }
        true
    }
}

/// Acknowledgement of a point write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteAck {
    pub id: Ref,
    pub level: u8,
}

pub trait Provider {
    /// Short name reported in `about`.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// The Haystack `about` grid with the standard columns filled in.
    fn about(&self, home: &str) -> Result<Grid> {
        let mut grid = Grid::with_columns([
            "haystackVersion",
            "tz",
            "serverName",
            "serverTime",
            "serverBootTime",
            "productName",
            "productUri",
            "productVersion",
            "moduleName",
            "moduleVersion",
        ])?;
        let now = DateTimeTz::now();
        let mut row = Dict::new();
        row.insert("haystackVersion", Value::str("3.0"));
        row.insert("tz", Value::str(now.zone()));
        row.insert("serverName", Value::str(self.name()));
        row.insert("serverTime", Value::DateTime(now.clone()));
        row.insert("serverBootTime", Value::DateTime(now));
        row.insert("productName", Value::str("hayrick"));
        row.insert("productUri", Value::Uri(home.to_string()));
        row.insert("productVersion", Value::str(env!("CARGO_PKG_VERSION")));
        row.insert("moduleName", Value::str(self.name()));
        row.insert("moduleVersion", Value::str(env!("CARGO_PKG_VERSION")));
        grid.append(row);
        Ok(grid)
    }

    /// The operations grid, derived from [`Self::capabilities`].
    fn ops(&self) -> Grid {
        let caps = self.capabilities();
        let mut grid = Grid::new();
        let _ = grid.add_column(Column::new("name"));
        let _ = grid.add_column(Column::new("summary"));
        let mut push = |name: &str, summary: &str| {
            let mut row = Dict::new();
            row.insert("name", Value::str(name));
            row.insert("summary", Value::str(summary));
            grid.append(row);
        };
        push("about", "Summary information for server");
        push("ops", "Operations supported by this server");
        push("formats", "Grid data formats supported by this server");
        if caps.read {
            push("read", "Read entity records by filter or id");
        }
        if caps.his_read {
            push("hisRead", "Read time-series data from historized points");
        }
        if caps.point_write {
            push("pointWrite", "Read or write a point's priority array");
        }
        if caps.invoke_action {
            push("invokeAction", "Invoke a user action on a target record");
        }
        grid
    }

    /// The content formats every provider speaks through the shared codecs.
    fn formats(&self) -> Grid {
        let mut grid = Grid::new();
        let _ = grid.add_column(Column::new("mime"));
        let _ = grid.add_column(Column::new("receive"));
        let _ = grid.add_column(Column::new("send"));
        for mime in ["text/zinc", "application/json", "text/csv", "text/trio"] {
            let mut row = Dict::new();
            row.insert("mime", Value::str(mime));
            row.insert("receive", Value::Marker);
            row.insert("send", Value::Marker);
            grid.append(row);
        }
        grid
    }

    /// Runs a filter (or unfiltered read) against the entity set, at an
    /// optional version instant. `limit` of zero means unlimited; `select`
    /// narrows the returned columns.
    fn read(
        &self,
        _filter: Option<&str>,
        _limit: usize,
        _select: Option<&str>,
        _version: Option<&DateTimeTz>,
    ) -> Result<Grid> {
        Err(Error::Capability("read"))
    }

    /// Time-series slice for the given points.
    fn his_read(&self, _ids: &[Ref], _range: &HisRange) -> Result<Grid> {
        Err(Error::Capability("hisRead"))
    }

    fn point_write(
        &self,
        _id: &Ref,
        _level: u8,
        _value: &Value,
        _who: &str,
        _duration: Option<Duration>,
    ) -> Result<WriteAck> {
        Err(Error::Capability("pointWrite"))
    }

    fn invoke_action(&self, _id: &Ref, _action: &str, _params: &Dict) -> Result<Grid> {
        Err(Error::Capability("invokeAction"))
    }

    /// Distinct values known for a tag, in a stable order.
    fn values_for_tag(&self, _tag: &str) -> Result<Vec<Value>> {
        Err(Error::Capability("valuesForTag"))
    }

    /// Version instants available for point-in-time reads, newest first.
    fn versions(&self) -> Result<Vec<DateTimeTz>> {
        Err(Error::Capability("versions"))
    }
}
