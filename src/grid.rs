//! The grid model: ordered typed columns, ordered rows, grid metadata.
//!
//! A [`Grid`] is the primary Haystack container. Rows are [`Dict`]s that may
//! omit a column; an omitted tag is distinct from a present `Null`. Rows are
//! appended once and not mutated afterwards by the core APIs; updates go
//! through [`crate::diff`].

use std::collections::HashMap;
use std::fmt;

use crate::datatype::{Dict, Ref, Value};
use crate::error::{Error, Result};

// ------------- Version -------------

/// The Zinc wire version of a grid. Parsers accept 2.0 and 3.0, emitters
/// write 3.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Version {
    V2,
    #[default]
    V3,
}

impl Version {
    pub fn parse(text: &str) -> Option<Version> {
        match text {
            "2.0" => Some(Version::V2),
            "3.0" => Some(Version::V3),
            _ => None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Version::V2 => write!(f, "2.0"),
            Version::V3 => write!(f, "3.0"),
        }
    }
}

// ------------- Column -------------

/// A column definition: an identifier and its metadata tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    meta: Dict,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), meta: Dict::new() }
    }
    pub fn with_meta(name: impl Into<String>, meta: Dict) -> Self {
        Self { name: name.into(), meta }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn meta(&self) -> &Dict {
        &self.meta
    }
}

// ------------- Grid -------------

#[derive(Debug, Clone, Default)]
pub struct Grid {
    version: Version,
    meta: Dict,
    cols: Vec<Column>,
    rows: Vec<Dict>,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut grid = Grid::new();
        for name in names {
            grid.add_column(Column::new(name))?;
        }
        Ok(grid)
    }

    pub fn version(&self) -> Version {
        self.version
    }
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn meta(&self) -> &Dict {
        &self.meta
    }
    pub fn meta_mut(&mut self) -> &mut Dict {
        &mut self.meta
    }

    /// Adds a column definition. Column names must be unique within the
    /// grid.
    pub fn add_column(&mut self, col: Column) -> Result<()> {
        if self.has_column(col.name()) {
            return Err(Error::Schema(format!("duplicate column '{}'", col.name())));
        }
        self.cols.push(col);
        Ok(())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.cols.iter().any(|c| c.name() == name)
    }

    pub fn columns(&self) -> &[Column] {
        &self.cols
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.cols.iter().map(|c| c.name())
    }

    /// Replaces a column's metadata, keeping its position.
    pub fn set_column_meta(&mut self, name: &str, meta: Dict) {
        if let Some(col) = self.cols.iter_mut().find(|c| c.name == name) {
            col.meta = meta;
        }
    }

    pub fn remove_column(&mut self, name: &str) {
        self.cols.retain(|c| c.name() != name);
        for row in &mut self.rows {
            row.remove(name);
        }
    }

    pub fn append(&mut self, row: Dict) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[Dict] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&Dict> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Dict> {
        self.rows.iter()
    }

    /// Removes and returns the row at `index`.
    pub fn take_row(&mut self, index: usize) -> Dict {
        self.rows.remove(index)
    }

    /// Builds the `Ref name -> row position` index used for O(1) ref
    /// resolution during filter evaluation. The index is a snapshot; it is
    /// invalidated by any row mutation.
    pub fn index_by_id(&self) -> HashMap<String, usize> {
        let mut index = HashMap::with_capacity(self.rows.len());
        for (pos, row) in self.rows.iter().enumerate() {
            if let Some(Value::Ref(id)) = row.get("id") {
                index.entry(id.name().to_string()).or_insert(pos);
            }
        }
        index
    }

    /// Looks up a row by its `id` tag, scanning in source order.
    pub fn by_id(&self, id: &Ref) -> Option<&Dict> {
        self.rows.iter().find(|row| match row.get("id") {
            Some(Value::Ref(r)) => r == id,
            _ => false,
        })
    }

    /// A copy narrowed to the named columns, in the order given. Unknown
    /// names become empty columns, mirroring the Haystack `select` read
    /// parameter.
    pub fn select(&self, names: &[&str]) -> Grid {
        let mut grid = Grid::new();
        grid.version = self.version;
        grid.meta = self.meta.clone();
        for name in names {
            let col = self
                .cols
                .iter()
                .find(|c| c.name() == *name)
                .cloned()
                .unwrap_or_else(|| Column::new(*name));
            grid.cols.push(col);
        }
        for row in &self.rows {
            let narrowed: Dict = row
                .iter()
                .filter(|(k, _)| names.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            grid.rows.push(narrowed);
        }
        grid
    }
}

/// Structural equality. Rows carrying an `id` tag are matched by id; rows
/// without one are matched pairwise by value, so two grids that only differ
/// in the order of identified rows compare equal (the diff/merge laws rely
/// on this).
impl PartialEq for Grid {
    fn eq(&self, other: &Self) -> bool {
        if self.meta != other.meta || self.rows.len() != other.rows.len() {
            return false;
        }
        if self.cols.len() != other.cols.len() {
            return false;
        }
        for col in &self.cols {
            match other.cols.iter().find(|c| c.name() == col.name()) {
                Some(found) if found.meta() == col.meta() => {}
                _ => return false,
            }
        }
        let mut unmatched: Vec<&Dict> = other
            .rows
            .iter()
            .filter(|row| !matches!(row.get("id"), Some(Value::Ref(_))))
            .collect();
        for row in &self.rows {
            if let Some(Value::Ref(id)) = row.get("id") {
                match other.by_id(id) {
                    Some(found) if found == row => {}
                    _ => return false,
                }
            } else {
                match unmatched.iter().position(|candidate| *candidate == row) {
                    Some(pos) => {
                        unmatched.remove(pos);
                    }
                    None => return false,
                }
            }
        }
        true
    }
}
impl Eq for Grid {}

impl<'a> IntoIterator for &'a Grid {
    type Item = &'a Dict;
    type IntoIter = std::slice::Iter<'a, Dict>;
    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
