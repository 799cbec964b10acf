//! JSON codec.
//!
//! Scalars encode as tagged strings with a two-character sigil (`n:` number,
//! `r:` ref, `t:` datetime, ...); the top-level object carries `meta`,
//! `cols` and `rows`. Round-tripping with Zinc preserves every scalar
//! distinction. Unlike Zinc, JSON rows may carry tags that are not declared
//! columns, and a JSON `null` is a present Null, distinct from an omitted
//! tag.

use chrono::{DateTime, NaiveDate, NaiveTime};
use serde_json::{json, Map, Value as Json};

use crate::datatype::{Bin, Coord, DateTimeTz, Dict, Number, Ref, Value, XStr};
use crate::error::{Error, ParseErrorKind, Result};
use crate::grid::{Column, Grid, Version};

/// Emits a grid as a JSON document.
pub fn dump_grid(grid: &Grid) -> Result<String> {
    Ok(grid_to_json(grid)?.to_string())
}

/// Parses a JSON document into a grid.
pub fn parse_grid(src: &str) -> Result<Grid> {
    let root: Json = serde_json::from_str(src)
        .map_err(|e| Error::parse(ParseErrorKind::UnexpectedToken, e.line(), e.column()))?;
    grid_from_json(&root)
}

fn grid_to_json(grid: &Grid) -> Result<Json> {
    let mut meta = Map::new();
    meta.insert("ver".to_string(), json!("3.0"));
    for (name, value) in grid.meta() {
        meta.insert(name.clone(), scalar_to_json(value)?);
    }
    let mut cols = Vec::with_capacity(grid.columns().len());
    for col in grid.columns() {
        let mut entry = Map::new();
        entry.insert("name".to_string(), json!(col.name()));
        for (name, value) in col.meta() {
            entry.insert(name.clone(), scalar_to_json(value)?);
        }
        cols.push(Json::Object(entry));
    }
    let mut rows = Vec::with_capacity(grid.len());
    for row in grid.rows() {
        rows.push(Json::Object(dict_to_json(row)?));
    }
    Ok(json!({ "meta": Json::Object(meta), "cols": cols, "rows": rows }))
}

fn dict_to_json(dict: &Dict) -> Result<Map<String, Json>> {
    let mut map = Map::new();
    for (name, value) in dict {
        map.insert(name.clone(), scalar_to_json(value)?);
    }
    Ok(map)
}

fn scalar_to_json(value: &Value) -> Result<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Marker => json!("m:"),
        Value::Remove => json!("-:"),
        Value::Na => json!("z:"),
        Value::Bool(b) => json!(b),
        Value::Number(n) => json!(number_string(n)),
        Value::Str(s) => json!(format!("s:{}", s)),
        Value::Uri(u) => json!(format!("u:{}", u)),
        Value::Ref(r) => match r.dis() {
            Some(dis) => json!(format!("r:{} {}", r.name(), dis)),
            None => json!(format!("r:{}", r.name())),
        },
        Value::Bin(b) => json!(format!("b:{}", b.mime())),
        Value::Date(d) => json!(format!("d:{}", d.format("%Y-%m-%d"))),
        Value::Time(t) => json!(format!("h:{}", crate::datatype::format_time(t))),
        Value::DateTime(dt) => json!(format!("t:{}", dt)),
        Value::Coord(c) => json!(format!("c:{},{}", c.lat(), c.lng())),
        Value::XStr(x) => json!(format!("x:{}:{}", x.encoding(), x.data())),
        Value::List(items) => {
            Json::Array(items.iter().map(scalar_to_json).collect::<Result<_>>()?)
        }
        Value::Dict(dict) => Json::Object(dict_to_json(dict)?),
        Value::Grid(grid) => grid_to_json(grid)?,
    })
}

/// Emits one entity dict as a standalone JSON object, the row form stored
/// by the SQL provider.
pub fn dump_dict(dict: &Dict) -> Result<String> {
    Ok(Json::Object(dict_to_json(dict)?).to_string())
}

/// Parses a standalone JSON object back into an entity dict.
pub fn parse_dict(src: &str) -> Result<Dict> {
    let root: Json = serde_json::from_str(src)
        .map_err(|e| Error::parse(ParseErrorKind::UnexpectedToken, e.line(), e.column()))?;
    match root.as_object() {
        Some(map) => dict_from_json(map),
        None => Err(Error::Schema("entity JSON must be an object".to_string())),
    }
}

/// The tagged string form of a scalar, when its JSON encoding is a string.
/// Bool, Null and the composite kinds return `None`. This is the form the
/// SQL translator binds against persisted entities.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(_) | Value::List(_) | Value::Dict(_) | Value::Grid(_) => None,
        other => match scalar_to_json(other) {
            Ok(Json::String(s)) => Some(s),
            _ => None,
        },
    }
}

/// The tagged string form of a number: `n:154`, `n:154 kg`, `n:NaN`.
pub fn number_string(n: &Number) -> String {
    let value = if n.value().is_nan() {
        "NaN".to_string()
    } else if n.value().is_infinite() {
        if n.value() < 0.0 { "-INF".to_string() } else { "INF".to_string() }
    } else {
        n.value().to_string()
    };
    match n.unit() {
        Some(unit) => format!("n:{} {}", value, unit),
        None => format!("n:{}", value),
    }
}

fn grid_from_json(root: &Json) -> Result<Grid> {
    let obj = root
        .as_object()
        .ok_or_else(|| Error::Schema("top-level JSON grid must be an object".to_string()))?;
    let mut grid = Grid::new();
    if let Some(meta) = obj.get("meta").and_then(Json::as_object) {
        for (name, value) in meta {
            if name == "ver" {
                let text = value.as_str().unwrap_or("3.0");
                let version = Version::parse(text).ok_or_else(|| {
                    Error::Schema(format!("unsupported version '{}'", text))
                })?;
                grid.set_version(version);
            } else {
                grid.meta_mut().insert(name.clone(), scalar_from_json(value)?);
            }
        }
    }
    if let Some(cols) = obj.get("cols").and_then(Json::as_array) {
        for col in cols {
            let entry = col
                .as_object()
                .ok_or_else(|| Error::Schema("column entry must be an object".to_string()))?;
            let name = entry
                .get("name")
                .and_then(Json::as_str)
                .ok_or_else(|| Error::Schema("column entry is missing 'name'".to_string()))?;
            let mut meta = Dict::new();
            for (key, value) in entry {
                if key != "name" {
                    meta.insert(key.clone(), scalar_from_json(value)?);
                }
            }
            grid.add_column(Column::with_meta(name, meta))?;
        }
    }
    if let Some(rows) = obj.get("rows").and_then(Json::as_array) {
        for row in rows {
            let entry = row
                .as_object()
                .ok_or_else(|| Error::Schema("row entry must be an object".to_string()))?;
            grid.append(dict_from_json(entry)?);
        }
    }
    Ok(grid)
}

fn dict_from_json(map: &Map<String, Json>) -> Result<Dict> {
    let mut dict = Dict::new();
    for (name, value) in map {
        dict.insert(name.clone(), scalar_from_json(value)?);
    }
    Ok(dict)
}

fn scalar_from_json(value: &Json) -> Result<Value> {
    match value {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => Ok(Value::number(n.as_f64().unwrap_or(f64::NAN))),
        Json::String(s) => tagged_scalar(s),
        Json::Array(items) => Ok(Value::List(
            items.iter().map(scalar_from_json).collect::<Result<_>>()?,
        )),
        Json::Object(map) => {
            if map.contains_key("meta") && map.contains_key("cols") && map.contains_key("rows") {
                Ok(Value::Grid(Box::new(grid_from_json(value)?)))
            } else {
                Ok(Value::Dict(dict_from_json(map)?))
            }
        }
    }
}

/// Decodes a sigil-tagged scalar string. A string without a known sigil is
/// a plain Str.
pub fn tagged_scalar(s: &str) -> Result<Value> {
    let bad = || Error::parse(ParseErrorKind::UnknownScalar, 0, 0);
    if let Some(rest) = s.strip_prefix("s:") {
        return Ok(Value::str(rest));
    }
    if s.starts_with("m:") {
        return Ok(Value::Marker);
    }
    if s.starts_with("-:") {
        return Ok(Value::Remove);
    }
    if s.starts_with("z:") {
        return Ok(Value::Na);
    }
    if let Some(rest) = s.strip_prefix("n:") {
        let (value_text, unit) = match rest.split_once(' ') {
            Some((v, u)) => (v, Some(u)),
            None => (rest, None),
        };
        let value = match value_text {
            "INF" => f64::INFINITY,
            "-INF" => f64::NEG_INFINITY,
            "NaN" => f64::NAN,
            other => other.parse().map_err(|_| bad())?,
        };
        return Ok(Value::Number(Number::new(value, unit)));
    }
    if let Some(rest) = s.strip_prefix("r:") {
        return Ok(match rest.split_once(' ') {
            Some((name, dis)) => Value::Ref(Ref::with_dis(name, dis)),
            None => Value::Ref(Ref::new(rest)),
        });
    }
    if let Some(rest) = s.strip_prefix("u:") {
        return Ok(Value::Uri(rest.to_string()));
    }
    if let Some(rest) = s.strip_prefix("b:") {
        return Ok(Value::Bin(Bin::new(rest)));
    }
    if let Some(rest) = s.strip_prefix("d:") {
        let date = NaiveDate::parse_from_str(rest, "%Y-%m-%d").map_err(|_| bad())?;
        return Ok(Value::Date(date));
    }
    if let Some(rest) = s.strip_prefix("h:") {
        let time = NaiveTime::parse_from_str(rest, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(rest, "%H:%M"))
            .map_err(|_| bad())?;
        return Ok(Value::Time(time));
    }
    if let Some(rest) = s.strip_prefix("t:") {
        return datetime_scalar(rest).ok_or_else(bad);
    }
    if let Some(rest) = s.strip_prefix("c:") {
        let (lat, lng) = rest.split_once(',').ok_or_else(bad)?;
        let lat: f64 = lat.parse().map_err(|_| bad())?;
        let lng: f64 = lng.parse().map_err(|_| bad())?;
        return Ok(Value::Coord(Coord::new(lat, lng)));
    }
    if let Some(rest) = s.strip_prefix("x:") {
        let (encoding, data) = rest.split_once(':').ok_or_else(bad)?;
        return Ok(Value::XStr(XStr::new(encoding, data)));
    }
    Ok(Value::str(s))
}

fn datetime_scalar(rest: &str) -> Option<Value> {
    let (instant, zone) = match rest.split_once(' ') {
        Some((instant, zone)) => (instant, Some(zone)),
        None => (rest, None),
    };
    let stamp = DateTime::parse_from_rfc3339(instant).ok()?;
    let value = match zone {
        Some(zone) => DateTimeTz::new(stamp, zone)
            .unwrap_or_else(|| DateTimeTz::from_parts(stamp, zone)),
        // Interop leniency: a bare UTC instant still decodes.
        None if stamp.offset().local_minus_utc() == 0 => DateTimeTz::from_parts(stamp, "UTC"),
        None => return None,
    };
    Some(Value::DateTime(value))
}
