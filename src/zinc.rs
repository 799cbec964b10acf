//! Zinc v3 codec: the canonical Haystack text format.
//!
//! The parser is recursive descent over a hand-written char scanner; every
//! error carries the line and column where the input stopped making sense.
//! The emitter is deterministic: rows preserve column order, numbers emit
//! their shortest round-trip form, escaping is minimal but always valid.
//!
//! The scalar half of this module ([`parse_scalar`], [`dump_scalar`]) is the
//! shared literal layer: the JSON, CSV and Trio codecs and the filter
//! grammar all reuse it and only decide framing for themselves.
//!
//! # Example
//! ```
//! use hayrick::zinc;
//! let src = "ver:\"3.0\"\nname,age\n\"Alice\",N\n\"Bob\",30\n";
//! let grid = zinc::parse_grid(src).unwrap();
//! assert_eq!(grid.len(), 2);
//! assert_eq!(zinc::dump_grid(&grid).unwrap(), src);
//! ```

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveTime};

use crate::datatype::{self, Bin, Coord, Dict, Number, Ref, Value, XStr};
use crate::error::{Error, ParseErrorKind, Result};
use crate::grid::{Column, Grid, Version};
use crate::units;

/// Caller-supplied limits for a parse. The deadline is checked at row
/// boundaries.
#[derive(Debug, Default, Clone)]
pub struct ParseOptions {
    pub deadline: Option<Instant>,
}

/// Parses a complete Zinc grid.
pub fn parse_grid(src: &str) -> Result<Grid> {
    parse_grid_with(src, &ParseOptions::default())
}

/// Parses a complete Zinc grid honouring the supplied options.
pub fn parse_grid_with(src: &str, options: &ParseOptions) -> Result<Grid> {
    let mut scanner = Scanner::new(src);
    let grid = parse_grid_at(&mut scanner, false, options)?;
    scanner.skip_newlines();
    if !scanner.at_end() {
        return Err(scanner.error(ParseErrorKind::UnexpectedToken));
    }
    Ok(grid)
}

/// Parses a single Zinc scalar, consuming the whole input.
pub fn parse_scalar(src: &str) -> Result<Value> {
    let mut scanner = Scanner::new(src);
    let value = parse_scalar_at(&mut scanner, Version::V3, &ParseOptions::default())?;
    if !scanner.at_end() {
        return Err(scanner.error(ParseErrorKind::UnexpectedToken));
    }
    Ok(value)
}

/// Emits a grid in Zinc form, always `ver:"3.0"`, ending with a newline.
///
/// Rows holding tags that are not declared columns are a structural error:
/// Zinc cannot represent them.
pub fn dump_grid(grid: &Grid) -> Result<String> {
    let mut out = String::new();
    out.push_str("ver:\"3.0\"");
    if !grid.meta().is_empty() {
        out.push(' ');
        out.push_str(&dump_meta(grid.meta())?);
    }
    out.push('\n');
    let cols: Vec<String> = grid
        .columns()
        .iter()
        .map(|col| {
            if col.meta().is_empty() {
                Ok(col.name().to_string())
            } else {
                Ok(format!("{} {}", col.name(), dump_meta(col.meta())?))
            }
        })
        .collect::<Result<_>>()?;
    out.push_str(&cols.join(","));
    out.push('\n');
    for row in grid.rows() {
        for name in row.keys() {
            if !grid.has_column(name) {
                return Err(Error::Schema(format!(
                    "row tag '{}' is not a declared column",
                    name
                )));
            }
        }
        let mut cells = Vec::with_capacity(grid.columns().len());
        for col in grid.columns() {
            match row.get(col.name()) {
                // An omitted tag and a present Null are distinct; the
                // empty cell form round-trips the former, N the latter.
                None => cells.push(String::new()),
                Some(Value::Null) => cells.push("N".to_string()),
                Some(value) => cells.push(dump_scalar(value)?),
            }
        }
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    Ok(out)
}

/// Emits one scalar in Zinc literal form.
pub fn dump_scalar(value: &Value) -> Result<String> {
    let mut out = String::new();
    write_scalar(&mut out, value)?;
    Ok(out)
}

fn dump_meta(meta: &Dict) -> Result<String> {
    let items: Vec<String> = meta
        .iter()
        .map(|(name, value)| match value {
            Value::Marker => Ok(name.clone()),
            other => Ok(format!("{}:{}", name, dump_scalar(other)?)),
        })
        .collect::<Result<_>>()?;
    Ok(items.join(" "))
}

fn write_scalar(out: &mut String, value: &Value) -> Result<()> {
    match value {
        Value::Null => out.push('N'),
        Value::Marker => out.push('M'),
        Value::Remove => out.push('R'),
        Value::Na => out.push_str("NA"),
        Value::Bool(b) => out.push(if *b { 'T' } else { 'F' }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Str(s) => out.push_str(&dump_str(s)),
        Value::Uri(u) => out.push_str(&dump_uri(u)),
        Value::Ref(r) => {
            out.push('@');
            out.push_str(r.name());
            if let Some(dis) = r.dis() {
                out.push(' ');
                out.push_str(&dump_str(dis));
            }
        }
        Value::Bin(b) => {
            out.push_str("Bin(");
            out.push_str(b.mime());
            out.push(')');
        }
        Value::Date(d) => out.push_str(&d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => out.push_str(&datatype::format_time(t)),
        Value::DateTime(dt) => out.push_str(&dt.to_string()),
        Value::Coord(c) => {
            out.push_str("C(");
            out.push_str(&c.lat().to_string());
            out.push(',');
            out.push_str(&c.lng().to_string());
            out.push(')');
        }
        Value::XStr(x) => {
            out.push_str(x.encoding());
            out.push('(');
            out.push_str(&dump_str(x.data()));
            out.push(')');
        }
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_scalar(out, item)?;
            }
            out.push(']');
        }
        Value::Dict(dict) => {
            out.push('{');
            for (i, (name, item)) in dict.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(name);
                if !matches!(item, Value::Marker) {
                    out.push(':');
                    write_scalar(out, item)?;
                }
            }
            out.push('}');
        }
        Value::Grid(grid) => {
            out.push_str("<<");
            out.push_str(&dump_grid(grid)?);
            out.push_str(">>");
        }
    }
    Ok(())
}

/// A Zinc string literal with minimal escaping; non-ASCII becomes `\uXXXX`.
pub fn dump_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '$' => out.push_str("\\$"),
            c if (c as u32) >= 0x80 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn dump_uri(uri: &str) -> String {
    let mut out = String::with_capacity(uri.len() + 2);
    out.push('`');
    for c in uri.chars() {
        match c {
            '`' => out.push_str("\\`"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) >= 0x80 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('`');
    out
}

impl fmt::Display for Value {
    /// The Zinc literal form.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&dump_scalar(self).map_err(|_| fmt::Error)?)
    }
}

impl fmt::Display for Grid {
    /// The full Zinc text of the grid.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&dump_grid(self).map_err(|_| fmt::Error)?)
    }
}

// ------------- Scanner -------------

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Scanner {
    fn new(src: &str) -> Self {
        Self { chars: src.chars().collect(), pos: 0, line: 1, col: 1 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.next();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        if s.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
        {
            for _ in s.chars() {
                self.next();
            }
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char, kind: ParseErrorKind) -> Result<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(kind))
        }
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(' ') {
            self.next();
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Some('\n') | Some('\r')) {
            self.next();
        }
    }

    /// Consumes a `\r?\n` (or end of input) terminating a line.
    fn eat_newline(&mut self) -> Result<()> {
        self.eat('\r');
        if self.at_end() || self.eat('\n') {
            Ok(())
        } else {
            Err(self.error(ParseErrorKind::UnexpectedToken))
        }
    }

    fn error(&self, kind: ParseErrorKind) -> Error {
        Error::parse(kind, self.line, self.col)
    }
}

// ------------- Grid parsing -------------

fn parse_grid_at(s: &mut Scanner, nested: bool, options: &ParseOptions) -> Result<Grid> {
    if !s.eat_str("ver:") {
        return Err(s.error(ParseErrorKind::UnexpectedToken));
    }
    let ver_text = parse_string(s)?;
    let version = Version::parse(&ver_text)
        .ok_or_else(|| Error::Schema(format!("unsupported Zinc version '{}'", ver_text)))?;

    let mut grid = Grid::new();
    grid.set_version(version);

    if s.peek() == Some(' ') {
        s.skip_spaces();
        if !matches!(s.peek(), Some('\n') | Some('\r') | None) {
            *grid.meta_mut() = parse_meta(s, version, false, options)?;
        }
    }
    s.skip_spaces();
    s.eat_newline()?;

    // Column definitions. A blank line declares a column-less grid.
    if !matches!(s.peek(), Some('\n') | Some('\r') | None) {
        loop {
            s.skip_spaces();
            let (line, col) = (s.line, s.col);
            let name = parse_id(s)?;
            if grid.has_column(&name) {
                return Err(Error::parse(ParseErrorKind::DuplicateColumn, line, col));
            }
            let meta = if s.peek() == Some(' ') {
                s.skip_spaces();
                if matches!(s.peek(), Some(',') | Some('\n') | Some('\r') | None) {
                    Dict::new()
                } else {
                    parse_meta(s, version, true, options)?
                }
            } else {
                Dict::new()
            };
            grid.add_column(Column::with_meta(name, meta))
                .map_err(|_| s.error(ParseErrorKind::DuplicateColumn))?;
            s.skip_spaces();
            if s.eat(',') {
                continue;
            }
            break;
        }
    }
    s.eat_newline()?;

    // Rows, until end of input or the closing sentinel of a nested grid.
    loop {
        if let Some(deadline) = options.deadline {
            if Instant::now() > deadline {
                return Err(Error::Data("parse deadline exceeded".to_string()));
            }
        }
        s.skip_spaces();
        if nested && s.peek() == Some('>') && s.peek_at(1) == Some('>') {
            s.next();
            s.next();
            return Ok(grid);
        }
        if s.at_end() {
            if nested {
                return Err(s.error(ParseErrorKind::UnexpectedToken));
            }
            return Ok(grid);
        }
        let cells = parse_row(s, version, options)?;
        if cells.len() != grid.columns().len() {
            return Err(s.error(ParseErrorKind::UnexpectedToken));
        }
        let mut row = Dict::new();
        for (cell, column) in cells.into_iter().zip(grid.columns()) {
            // An empty cell is an omitted tag; an explicit N is a present
            // Null. Both are distinct in the model and both round-trip.
            if let Some(value) = cell {
                row.insert(column.name(), value);
            }
        }
        grid.append(row);
    }
}

fn parse_row(
    s: &mut Scanner,
    version: Version,
    options: &ParseOptions,
) -> Result<Vec<Option<Value>>> {
    let mut cells = Vec::new();
    loop {
        s.skip_spaces();
        match s.peek() {
            Some(',') => {
                cells.push(None);
                s.next();
                continue;
            }
            Some('\n') | Some('\r') | None => {
                cells.push(None);
                s.eat_newline()?;
                return Ok(cells);
            }
            _ => {}
        }
        cells.push(Some(parse_scalar_at(s, version, options)?));
        s.skip_spaces();
        if s.eat(',') {
            continue;
        }
        s.eat_newline()?;
        return Ok(cells);
    }
}

/// Metadata items: `id` (Marker) or `id:scalar`, separated by spaces.
fn parse_meta(
    s: &mut Scanner,
    version: Version,
    stop_at_comma: bool,
    options: &ParseOptions,
) -> Result<Dict> {
    let mut meta = Dict::new();
    loop {
        match s.peek() {
            Some('\n') | Some('\r') | None => return Ok(meta),
            Some(',') if stop_at_comma => return Ok(meta),
            _ => {}
        }
        let name = parse_id(s)?;
        s.skip_spaces();
        if s.eat(':') {
            s.skip_spaces();
            let value = parse_scalar_at(s, version, options)?;
            meta.insert(name, value);
        } else {
            meta.mark(name);
        }
        if s.peek() == Some(' ') {
            s.skip_spaces();
        }
    }
}

fn parse_id(s: &mut Scanner) -> Result<String> {
    match s.peek() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return Err(s.error(ParseErrorKind::UnexpectedToken)),
    }
    let mut id = String::new();
    while let Some(c) = s.peek() {
        if c.is_ascii_alphanumeric() || c == '_' {
            id.push(c);
            s.next();
        } else {
            break;
        }
    }
    Ok(id)
}

// ------------- Scalar parsing -------------

fn parse_scalar_at(s: &mut Scanner, version: Version, options: &ParseOptions) -> Result<Value> {
    let require_v3 = |s: &Scanner| -> Result<()> {
        if version < Version::V3 {
            Err(s.error(ParseErrorKind::UnknownScalar))
        } else {
            Ok(())
        }
    };
    match s.peek() {
        Some('"') => Ok(Value::Str(parse_string(s)?)),
        Some('`') => Ok(Value::Uri(parse_uri(s)?)),
        Some('@') => parse_ref(s),
        Some('[') => {
            require_v3(s)?;
            parse_list(s, version, options)
        }
        Some('{') => {
            require_v3(s)?;
            parse_dict(s, version, options)
        }
        Some('<') if s.peek_at(1) == Some('<') => {
            require_v3(s)?;
            s.next();
            s.next();
            s.skip_spaces();
            let grid = parse_grid_at(s, true, options)?;
            Ok(Value::Grid(Box::new(grid)))
        }
        Some('-') if s.peek_at(1) == Some('I') => {
            if s.eat_str("-INF") {
                Ok(Value::number(f64::NEG_INFINITY))
            } else {
                Err(s.error(ParseErrorKind::BadNumber))
            }
        }
        Some(c) if c.is_ascii_digit() || c == '-' => parse_number_or_temporal(s),
        Some(c) if c.is_ascii_uppercase() => parse_word(s, version),
        _ => Err(s.error(ParseErrorKind::UnknownScalar)),
    }
}

/// Literals that start with an uppercase run: singletons, booleans, `INF`,
/// `NaN`, `Bin(...)`, `C(...)` and `XStr(...)`.
fn parse_word(s: &mut Scanner, version: Version) -> Result<Value> {
    let (line, col) = (s.line, s.col);
    let mut word = String::new();
    while let Some(c) = s.peek() {
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
            s.next();
        } else {
            break;
        }
    }
    if s.peek() == Some('(') {
        match word.as_str() {
            "Bin" => {
                s.next();
                let mut mime = String::new();
                while let Some(c) = s.peek() {
                    if c == ')' {
                        break;
                    }
                    mime.push(c);
                    s.next();
                }
                s.expect(')', ParseErrorKind::UnexpectedToken)?;
                return Ok(Value::Bin(Bin::new(mime)));
            }
            "C" => {
                s.next();
                s.skip_spaces();
                let lat = parse_coord_degrees(s)?;
                s.skip_spaces();
                s.expect(',', ParseErrorKind::UnexpectedToken)?;
                s.skip_spaces();
                let lng = parse_coord_degrees(s)?;
                s.skip_spaces();
                s.expect(')', ParseErrorKind::UnexpectedToken)?;
                return Ok(Value::Coord(Coord::new(lat, lng)));
            }
            _ => {
                if version < Version::V3 {
                    return Err(Error::parse(ParseErrorKind::UnknownScalar, line, col));
                }
                s.next();
                let data = parse_string(s)?;
                s.expect(')', ParseErrorKind::UnexpectedToken)?;
                return Ok(Value::XStr(XStr::new(word, data)));
            }
        }
    }
    match word.as_str() {
        "N" => Ok(Value::Null),
        "M" => Ok(Value::Marker),
        "R" => Ok(Value::Remove),
        "NA" => {
            if version < Version::V3 {
                return Err(Error::parse(ParseErrorKind::UnknownScalar, line, col));
            }
            Ok(Value::Na)
        }
        "T" => Ok(Value::Bool(true)),
        "F" => Ok(Value::Bool(false)),
        "INF" => Ok(Value::number(f64::INFINITY)),
        "NaN" => Ok(Value::number(f64::NAN)),
        _ => Err(Error::parse(ParseErrorKind::UnknownScalar, line, col)),
    }
}

fn parse_coord_degrees(s: &mut Scanner) -> Result<f64> {
    let (line, col) = (s.line, s.col);
    let mut text = String::new();
    while let Some(c) = s.peek() {
        if c.is_ascii_digit() || c == '-' || c == '.' {
            text.push(c);
            s.next();
        } else {
            break;
        }
    }
    text.parse::<f64>()
        .map_err(|_| Error::parse(ParseErrorKind::BadNumber, line, col))
}

fn parse_ref(s: &mut Scanner) -> Result<Value> {
    s.expect('@', ParseErrorKind::UnexpectedToken)?;
    let mut name = String::new();
    while let Some(c) = s.peek() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '-' | '.' | '~') {
            name.push(c);
            s.next();
        } else {
            break;
        }
    }
    if name.is_empty() {
        return Err(s.error(ParseErrorKind::UnexpectedToken));
    }
    // An optional display string follows on the same cell.
    if s.peek() == Some(' ') && s.peek_at(1) == Some('"') {
        s.next();
        let dis = parse_string(s)?;
        return Ok(Value::Ref(Ref::with_dis(name, dis)));
    }
    Ok(Value::Ref(Ref::new(name)))
}

fn parse_list(s: &mut Scanner, version: Version, options: &ParseOptions) -> Result<Value> {
    s.expect('[', ParseErrorKind::UnexpectedToken)?;
    let mut items = Vec::new();
    loop {
        s.skip_spaces();
        if s.eat(']') {
            return Ok(Value::List(items));
        }
        // A Null inside a list must be spelled out as N; there is no
        // empty-cell shorthand here.
        items.push(parse_scalar_at(s, version, options)?);
        s.skip_spaces();
        if s.eat(',') {
            continue;
        }
        s.skip_spaces();
        s.expect(']', ParseErrorKind::UnexpectedToken)?;
        return Ok(Value::List(items));
    }
}

fn parse_dict(s: &mut Scanner, version: Version, options: &ParseOptions) -> Result<Value> {
    s.expect('{', ParseErrorKind::UnexpectedToken)?;
    let mut dict = Dict::new();
    loop {
        s.skip_spaces();
        if s.eat('}') {
            return Ok(Value::Dict(dict));
        }
        let name = parse_id(s)?;
        if s.eat(':') {
            s.skip_spaces();
            let value = parse_scalar_at(s, version, options)?;
            dict.insert(name, value);
        } else {
            dict.mark(name);
        }
    }
}

// ------------- Strings and URIs -------------

fn parse_string(s: &mut Scanner) -> Result<String> {
    let (line, col) = (s.line, s.col);
    s.expect('"', ParseErrorKind::UnexpectedToken)?;
    let mut out = String::new();
    loop {
        match s.peek() {
            None | Some('\n') => {
                return Err(Error::parse(ParseErrorKind::UnterminatedString, line, col))
            }
            Some('"') => {
                s.next();
                return Ok(out);
            }
            Some('\\') => {
                s.next();
                out.push(parse_escape(s, false)?);
            }
            Some(c) if (c as u32) < 0x20 => {
                return Err(s.error(ParseErrorKind::UnexpectedToken));
            }
            Some(c) => {
                out.push(c);
                s.next();
            }
        }
    }
}

fn parse_uri(s: &mut Scanner) -> Result<String> {
    let (line, col) = (s.line, s.col);
    s.expect('`', ParseErrorKind::UnexpectedToken)?;
    let mut out = String::new();
    loop {
        match s.peek() {
            None | Some('\n') => {
                return Err(Error::parse(ParseErrorKind::UnterminatedString, line, col))
            }
            Some('`') => {
                s.next();
                return Ok(out);
            }
            Some('\\') => {
                s.next();
                // `\#` keeps its backslash; a URI fragment is not an escape.
                if s.peek() == Some('#') {
                    s.next();
                    out.push('\\');
                    out.push('#');
                } else {
                    out.push(parse_escape(s, true)?);
                }
            }
            Some(c) => {
                out.push(c);
                s.next();
            }
        }
    }
}

fn parse_escape(s: &mut Scanner, uri: bool) -> Result<char> {
    let (line, col) = (s.line, s.col);
    match s.next() {
        Some('b') => Ok('\u{8}'),
        Some('f') => Ok('\u{c}'),
        Some('n') => Ok('\n'),
        Some('r') => Ok('\r'),
        Some('t') => Ok('\t'),
        Some('"') if !uri => Ok('"'),
        Some('$') if !uri => Ok('$'),
        Some('\\') => Ok('\\'),
        Some('u') | Some('U') => {
            let mut code = 0u32;
            for _ in 0..4 {
                let digit = s
                    .next()
                    .and_then(|c| c.to_digit(16))
                    .ok_or(Error::parse(ParseErrorKind::BadEscape, line, col))?;
                code = code * 16 + digit;
            }
            char::from_u32(code).ok_or(Error::parse(ParseErrorKind::BadEscape, line, col))
        }
        Some(c) if uri && matches!(c, ':' | '/' | '?' | '[' | ']' | '@' | '&' | '=' | ';' | '`') => {
            Ok(c)
        }
        _ => Err(Error::parse(ParseErrorKind::BadEscape, line, col)),
    }
}

// ------------- Numbers, dates and times -------------

/// A leading digit can open a number, a date (`YYYY-MM-DD`), a wall-clock
/// time (`hh:mm...`) or a full datetime; a leading `-` only a number.
fn parse_number_or_temporal(s: &mut Scanner) -> Result<Value> {
    if s.peek() != Some('-') {
        let four_digits = (0..4).all(|i| s.peek_at(i).map_or(false, |c| c.is_ascii_digit()));
        if four_digits && s.peek_at(4) == Some('-') {
            return parse_date_or_datetime(s);
        }
        let two_digits = (0..2).all(|i| s.peek_at(i).map_or(false, |c| c.is_ascii_digit()));
        if two_digits && s.peek_at(2) == Some(':') {
            return parse_time(s).map(Value::Time);
        }
    }
    parse_number(s)
}

fn parse_number(s: &mut Scanner) -> Result<Value> {
    let (line, col) = (s.line, s.col);
    let mut text = String::new();
    if s.eat('-') {
        text.push('-');
    }
    let mut saw_digit = false;
    let read_digits = |s: &mut Scanner, text: &mut String, saw: &mut bool| {
        while let Some(c) = s.peek() {
            if c.is_ascii_digit() {
                *saw = true;
                text.push(c);
                s.next();
            } else if c == '_' {
                // Thousands separator, dropped; a trailing one reads as a
                // unit character instead.
                if s.peek_at(1).map_or(false, |n| n.is_ascii_digit()) {
                    s.next();
                } else {
                    break;
                }
            } else {
                break;
            }
        }
    };
    read_digits(s, &mut text, &mut saw_digit);
    if !saw_digit {
        return Err(Error::parse(ParseErrorKind::BadNumber, line, col));
    }
    if s.peek() == Some('.') && s.peek_at(1).map_or(false, |c| c.is_ascii_digit()) {
        text.push('.');
        s.next();
        read_digits(s, &mut text, &mut saw_digit);
    }
    if matches!(s.peek(), Some('e') | Some('E')) {
        let exp_digit = match s.peek_at(1) {
            Some('+') | Some('-') => s.peek_at(2).map_or(false, |c| c.is_ascii_digit()),
            Some(c) => c.is_ascii_digit(),
            None => false,
        };
        // Otherwise the e opens a unit token.
        if exp_digit {
            text.push('e');
            s.next();
            if let Some(sign @ ('+' | '-')) = s.peek() {
                text.push(sign);
                s.next();
            }
            read_digits(s, &mut text, &mut saw_digit);
        }
    }
    let value: f64 = text
        .parse()
        .map_err(|_| Error::parse(ParseErrorKind::BadNumber, line, col))?;
    let mut unit = String::new();
    while let Some(c) = s.peek() {
        if units::is_unit_char(c) {
            unit.push(c);
            s.next();
        } else {
            break;
        }
    }
    if unit.is_empty() {
        Ok(Value::number(value))
    } else {
        Ok(Value::Number(Number::new(value, Some(&unit))))
    }
}

fn parse_fixed_digits(s: &mut Scanner, count: usize) -> Result<u32> {
    let mut out = 0u32;
    for _ in 0..count {
        match s.peek() {
            Some(c) if c.is_ascii_digit() => {
                out = out * 10 + c.to_digit(10).unwrap_or(0);
                s.next();
            }
            _ => return Err(s.error(ParseErrorKind::BadNumber)),
        }
    }
    Ok(out)
}

fn parse_date_literal(s: &mut Scanner) -> Result<NaiveDate> {
    let (line, col) = (s.line, s.col);
    let year = parse_fixed_digits(s, 4)?;
    s.expect('-', ParseErrorKind::BadNumber)?;
    let month = parse_fixed_digits(s, 2)?;
    s.expect('-', ParseErrorKind::BadNumber)?;
    let day = parse_fixed_digits(s, 2)?;
    NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or(Error::parse(ParseErrorKind::BadNumber, line, col))
}

fn parse_time(s: &mut Scanner) -> Result<NaiveTime> {
    let (line, col) = (s.line, s.col);
    let hour = parse_fixed_digits(s, 2)?;
    s.expect(':', ParseErrorKind::BadNumber)?;
    let minute = parse_fixed_digits(s, 2)?;
    let mut second = 0;
    let mut millis = 0u32;
    if s.peek() == Some(':') && s.peek_at(1).map_or(false, |c| c.is_ascii_digit()) {
        s.next();
        second = parse_fixed_digits(s, 2)?;
        if s.peek() == Some('.') && s.peek_at(1).map_or(false, |c| c.is_ascii_digit()) {
            s.next();
            let mut scale = 100;
            while let Some(c) = s.peek() {
                match c.to_digit(10) {
                    Some(d) => {
                        millis += d * scale;
                        scale /= 10;
                        s.next();
                        if scale == 0 {
                            // Deeper precision than milliseconds is dropped.
                            while s.peek().map_or(false, |c| c.is_ascii_digit()) {
                                s.next();
                            }
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    NaiveTime::from_hms_milli_opt(hour, minute, second, millis)
        .ok_or(Error::parse(ParseErrorKind::BadNumber, line, col))
}

fn parse_date_or_datetime(s: &mut Scanner) -> Result<Value> {
    let date = parse_date_literal(s)?;
    if !matches!(s.peek(), Some('T') | Some('t')) {
        return Ok(Value::Date(date));
    }
    s.next();
    let time = parse_time(s)?;
    let naive = date.and_time(time);

    // Offset: Z or ±hh:mm.
    let mut offset_text = String::new();
    match s.peek() {
        Some('Z') | Some('z') => {
            s.next();
            offset_text.push('Z');
        }
        Some(sign @ ('+' | '-')) => {
            s.next();
            offset_text.push(sign);
            let hh = parse_fixed_digits(s, 2)?;
            s.expect(':', ParseErrorKind::BadNumber)?;
            let mm = parse_fixed_digits(s, 2)?;
            offset_text.push_str(&format!("{:02}:{:02}", hh, mm));
        }
        _ => {}
    }

    // The zone name suffix is mandatory.
    let (line, col) = (s.line, s.col);
    if !(s.peek() == Some(' ') && s.peek_at(1).map_or(false, |c| c.is_ascii_uppercase())) {
        return Err(Error::parse(ParseErrorKind::MissingTz, line, col));
    }
    s.next();
    let mut zone = String::new();
    while let Some(c) = s.peek() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+') {
            zone.push(c);
            s.next();
        } else {
            break;
        }
    }

    if offset_text.is_empty() {
        return datatype::localize(naive, &zone)
            .map(Value::DateTime)
            .ok_or(Error::parse(ParseErrorKind::UnknownScalar, line, col));
    }
    let iso = format!(
        "{}T{}{}",
        date.format("%Y-%m-%d"),
        time.format("%H:%M:%S%.3f"),
        offset_text
    );
    let stamp = DateTime::parse_from_rfc3339(&iso)
        .map_err(|_| Error::parse(ParseErrorKind::BadNumber, line, col))?;
    // Unknown zone names keep their parsed offset so they still round-trip.
    let value = datatype::DateTimeTz::new(stamp, &zone)
        .unwrap_or_else(|| datatype::DateTimeTz::from_parts(stamp, &zone));
    Ok(Value::DateTime(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_literals() {
        assert_eq!(parse_scalar("N").unwrap(), Value::Null);
        assert_eq!(parse_scalar("M").unwrap(), Value::Marker);
        assert_eq!(parse_scalar("R").unwrap(), Value::Remove);
        assert_eq!(parse_scalar("NA").unwrap(), Value::Na);
        assert_eq!(parse_scalar("T").unwrap(), Value::Bool(true));
        assert_eq!(parse_scalar("F").unwrap(), Value::Bool(false));
        assert_eq!(parse_scalar("154kg").unwrap(), Value::quantity(154.0, "kg"));
        assert_eq!(parse_scalar("1_000").unwrap(), Value::number(1000.0));
        assert_eq!(parse_scalar("-1.5e3").unwrap(), Value::number(-1500.0));
        assert_eq!(parse_scalar("INF").unwrap(), Value::number(f64::INFINITY));
        assert_eq!(parse_scalar("-INF").unwrap(), Value::number(f64::NEG_INFINITY));
        assert_eq!(parse_scalar("NaN").unwrap(), Value::number(f64::NAN));
        assert_eq!(parse_scalar("\"a\\nb\"").unwrap(), Value::str("a\nb"));
        assert_eq!(parse_scalar("`http://x/`").unwrap(), Value::Uri("http://x/".into()));
        assert_eq!(parse_scalar("@ab-c").unwrap(), Value::reference("ab-c"));
        assert_eq!(
            parse_scalar("@a \"Dis\"").unwrap(),
            Value::Ref(Ref::with_dis("a", "Dis"))
        );
        assert_eq!(
            parse_scalar("C(37.5,-77.4)").unwrap(),
            Value::Coord(Coord::new(37.5, -77.4))
        );
        assert_eq!(
            parse_scalar("Bin(text/plain)").unwrap(),
            Value::Bin(Bin::new("text/plain"))
        );
        assert_eq!(
            parse_scalar("Span(\"abc\")").unwrap(),
            Value::XStr(XStr::new("Span", "abc"))
        );
    }

    #[test]
    fn scalar_collections() {
        assert_eq!(
            parse_scalar("[1,2,3]").unwrap(),
            Value::List(vec![Value::number(1.0), Value::number(2.0), Value::number(3.0)])
        );
        assert_eq!(
            parse_scalar("[1, 2, ]").unwrap(),
            Value::List(vec![Value::number(1.0), Value::number(2.0)])
        );
        let parsed = parse_scalar("{site area:10ft²}").unwrap();
        let mut dict = Dict::new();
        dict.mark("site");
        dict.insert("area", Value::quantity(10.0, "ft²"));
        assert_eq!(parsed, Value::Dict(dict));
    }

    #[test]
    fn temporals() {
        assert_eq!(
            parse_scalar("2021-01-01").unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2021, 1, 1).unwrap())
        );
        assert_eq!(
            parse_scalar("09:30:00").unwrap(),
            Value::Time(NaiveTime::from_hms_opt(9, 30, 0).unwrap())
        );
        let dt = parse_scalar("2021-01-01T12:00:00-05:00 New_York").unwrap();
        assert_eq!(dump_scalar(&dt).unwrap(), "2021-01-01T12:00:00-05:00 New_York");
        let utc = parse_scalar("2021-01-01T00:00:00Z UTC").unwrap();
        assert_eq!(dump_scalar(&utc).unwrap(), "2021-01-01T00:00:00Z UTC");
    }

    #[test]
    fn datetime_requires_zone_suffix() {
        let err = parse_scalar("2021-01-01T00:00:00Z").unwrap_err();
        match err {
            Error::Parse { kind, .. } => assert_eq!(kind, ParseErrorKind::MissingTz),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn string_errors() {
        assert!(matches!(
            parse_scalar("\"abc"),
            Err(Error::Parse { kind: ParseErrorKind::UnterminatedString, .. })
        ));
        assert!(matches!(
            parse_scalar("\"a\\qb\""),
            Err(Error::Parse { kind: ParseErrorKind::BadEscape, .. })
        ));
    }

    #[test]
    fn grid_parse_and_emit_identity() {
        let src = "ver:\"3.0\"\nname,age\n\"Alice\",N\n\"Bob\",30\n";
        let grid = parse_grid(src).unwrap();
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.column_names().collect::<Vec<_>>(), vec!["name", "age"]);
        assert_eq!(grid.row(0).unwrap().get("age"), Some(&Value::Null));
        assert_eq!(grid.row(1).unwrap().get("age"), Some(&Value::number(30.0)));
        assert_eq!(dump_grid(&grid).unwrap(), src);
    }

    #[test]
    fn empty_cell_is_distinct_from_explicit_null() {
        let src = "ver:\"3.0\"\na,b\n,N\n";
        let grid = parse_grid(src).unwrap();
        assert_eq!(grid.row(0).unwrap().get("a"), None);
        assert_eq!(grid.row(0).unwrap().get("b"), Some(&Value::Null));
        assert_eq!(dump_grid(&grid).unwrap(), src);
    }

    #[test]
    fn grid_meta_and_column_meta() {
        let src = "ver:\"3.0\" site dis:\"Main\"\nid,area unit:\"sqft\"\n@a,100ft²\n";
        let grid = parse_grid(src).unwrap();
        assert_eq!(grid.meta().get("site"), Some(&Value::Marker));
        assert_eq!(grid.meta().get("dis"), Some(&Value::str("Main")));
        assert_eq!(
            grid.columns()[1].meta().get("unit"),
            Some(&Value::str("sqft"))
        );
        let out = dump_grid(&grid).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn duplicate_columns_rejected() {
        let err = parse_grid("ver:\"3.0\"\na,a\n").unwrap_err();
        assert!(matches!(
            err,
            Error::Parse { kind: ParseErrorKind::DuplicateColumn, .. }
        ));
    }

    #[test]
    fn nested_grid_cells() {
        let src = "ver:\"3.0\"\ninner\n<<ver:\"3.0\"\nv\n1\n2\n>>\n";
        let grid = parse_grid(src).unwrap();
        match grid.row(0).unwrap().get("inner") {
            Some(Value::Grid(inner)) => assert_eq!(inner.len(), 2),
            other => panic!("expected nested grid, got {:?}", other),
        }
        assert_eq!(dump_grid(&grid).unwrap(), src);
    }

    #[test]
    fn version_2_rejects_v3_scalars() {
        assert!(parse_grid("ver:\"2.0\"\nv\nNA\n").is_err());
        assert!(parse_grid("ver:\"2.0\"\nv\n[1]\n").is_err());
        assert!(parse_grid("ver:\"2.0\"\nv\n1\n").is_ok());
    }

    #[test]
    fn nan_round_trips() {
        let src = "ver:\"3.0\"\nv\nNaN\n";
        let grid = parse_grid(src).unwrap();
        assert_eq!(dump_grid(&grid).unwrap(), src);
        assert_eq!(grid.row(0).unwrap().get("v"), Some(&Value::number(f64::NAN)));
    }

    #[test]
    fn undeclared_row_tags_do_not_emit() {
        let mut grid = Grid::with_columns(["a"]).unwrap();
        let mut row = Dict::new();
        row.insert("a", Value::number(1.0));
        row.insert("b", Value::number(2.0));
        grid.append(row);
        assert!(matches!(dump_grid(&grid), Err(Error::Schema(_))));
    }

    #[test]
    fn unicode_strings_escape() {
        let round = dump_scalar(&Value::str("héllo")).unwrap();
        assert_eq!(round, "\"h\\u00e9llo\"");
        assert_eq!(parse_scalar(&round).unwrap(), Value::str("héllo"));
    }
}
