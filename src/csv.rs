//! CSV codec.
//!
//! CSV is lossy but deterministic: markers become `✓`, Null becomes an
//! empty cell, datetimes lose their zone name, and complex values embed
//! their Zinc literal inside a quoted cell. The emitter writes the source
//! grid's column order; grid and column metadata are not representable.
//!
//! The reader re-sniffs cells through the shared Zinc scalar layer, falling
//! back to Str when a cell does not spell any scalar literal.

use chrono::DateTime;

use crate::datatype::{DateTimeTz, Ref, Value};
use crate::error::{Error, ParseErrorKind, Result};
use crate::grid::{Column, Grid};
use crate::zinc::{self, ParseOptions};

/// Emits a grid as CSV, one header row plus one line per row.
pub fn dump_grid(grid: &Grid) -> Result<String> {
    let mut out = String::new();
    let names: Vec<&str> = grid.column_names().collect();
    out.push_str(&names.join(","));
    out.push('\n');
    for row in grid.rows() {
        let mut cells = Vec::with_capacity(names.len());
        for name in &names {
            cells.push(match row.get(name) {
                None | Some(Value::Null) => String::new(),
                Some(value) => dump_cell(value)?,
            });
        }
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    Ok(out)
}

fn dump_cell(value: &Value) -> Result<String> {
    let raw = match value {
        Value::Marker => "\u{2713}".to_string(),
        Value::Remove => "R".to_string(),
        Value::Na => "NA".to_string(),
        Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Str(s) => return Ok(quote(s)),
        Value::Ref(r) => match r.dis() {
            Some(dis) => format!("@{} {}", r.name(), dis),
            None => format!("@{}", r.name()),
        },
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::Time(t) => crate::datatype::format_time(t),
        // Spreadsheet tools cannot parse the zone suffix; emit the bare
        // offset instant.
        Value::DateTime(dt) => {
            let mut text = dt.to_string();
            if let Some(space) = text.rfind(' ') {
                text.truncate(space);
            }
            text
        }
        other => zinc::dump_scalar(other)?,
    };
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        Ok(quote(&raw))
    } else {
        Ok(raw)
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Parses CSV text into a grid. The first record names the columns.
pub fn parse_grid(src: &str) -> Result<Grid> {
    parse_grid_with(src, &ParseOptions::default())
}

pub fn parse_grid_with(src: &str, options: &ParseOptions) -> Result<Grid> {
    let records = tokenize(src)?;
    let mut grid = Grid::new();
    let mut iter = records.into_iter();
    let header = match iter.next() {
        Some(header) => header,
        None => return Ok(grid),
    };
    for (name, _) in &header.cells {
        grid.add_column(Column::new(name.clone()))?;
    }
    for record in iter {
        if let Some(deadline) = options.deadline {
            if std::time::Instant::now() > deadline {
                return Err(Error::Data("parse deadline exceeded".to_string()));
            }
        }
        if record.cells.len() != grid.columns().len() {
            return Err(Error::parse(
                ParseErrorKind::UnexpectedToken,
                record.line,
                1,
            ));
        }
        let mut row = crate::datatype::Dict::new();
        for ((text, quoted), column) in record.cells.iter().zip(grid.columns()) {
            if text.is_empty() && !quoted {
                continue;
            }
            row.insert(column.name(), sniff_cell(text, *quoted));
        }
        grid.append(row);
    }
    Ok(grid)
}

struct Record {
    line: usize,
    /// Cell text plus whether it was quoted in the source.
    cells: Vec<(String, bool)>,
}

fn tokenize(src: &str) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut cells: Vec<(String, bool)> = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = src.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        cell.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                '\n' => {
                    line += 1;
                    cell.push(c);
                }
                c => cell.push(c),
            }
            continue;
        }
        match c {
            '"' if cell.is_empty() => {
                in_quotes = true;
                quoted = true;
            }
            ',' => {
                cells.push((std::mem::take(&mut cell), quoted));
                quoted = false;
            }
            '\r' => {}
            '\n' => {
                line += 1;
                cells.push((std::mem::take(&mut cell), quoted));
                quoted = false;
                if !(cells.len() == 1 && cells[0].0.is_empty() && !cells[0].1) {
                    records.push(Record { line: record_line, cells: std::mem::take(&mut cells) });
                } else {
                    cells.clear();
                }
                record_line = line;
            }
            c => cell.push(c),
        }
    }
    if in_quotes {
        return Err(Error::parse(
            ParseErrorKind::UnterminatedString,
            record_line,
            1,
        ));
    }
    if !cell.is_empty() || !cells.is_empty() {
        cells.push((cell, quoted));
        records.push(Record { line: record_line, cells });
    }
    Ok(records)
}

fn sniff_cell(text: &str, was_quoted: bool) -> Value {
    if was_quoted {
        // Quoted cells are strings unless they spell a complex Zinc form
        // that only CSV quoting could carry.
        let complex = text.starts_with('[')
            || text.starts_with('{')
            || text.starts_with("<<")
            || text.starts_with("C(")
            || text.starts_with("Bin(")
            || text.starts_with('`');
        if complex {
            if let Ok(value) = zinc::parse_scalar(text) {
                return value;
            }
        }
        if let Some(value) = sniff_ref(text) {
            return value;
        }
        return Value::str(text);
    }
    match text {
        "\u{2713}" => return Value::Marker,
        "R" => return Value::Remove,
        "NA" => return Value::Na,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Some(value) = sniff_ref(text) {
        return value;
    }
    if let Ok(value) = zinc::parse_scalar(text) {
        return value;
    }
    // Datetimes in CSV lost their zone suffix; recover the offset form.
    if let Ok(stamp) = DateTime::parse_from_rfc3339(text) {
        let zone = if stamp.offset().local_minus_utc() == 0 {
            "UTC".to_string()
        } else {
            format!("GMT{:+}", stamp.offset().local_minus_utc() / 3600)
        };
        return Value::DateTime(DateTimeTz::from_parts(stamp, zone));
    }
    Value::str(text)
}

fn sniff_ref(text: &str) -> Option<Value> {
    let rest = text.strip_prefix('@')?;
    let (name, dis) = match rest.split_once(' ') {
        Some((name, dis)) => (name, Some(dis)),
        None => (rest, None),
    };
    if !Ref::is_valid_name(name) {
        return None;
    }
    Some(Value::Ref(match dis {
        Some(dis) => Ref::with_dis(name, dis),
        None => Ref::new(name),
    }))
}
