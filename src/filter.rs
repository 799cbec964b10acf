//! Filter sublanguage: grammar, AST and in-memory evaluator.
//!
//! The grammar lives in `filter.pest` and is parsed into a [`FilterExpr`]
//! tree which either runs here against a grid, or compiles to SQL through
//! [`crate::sql`].
//!
//! Evaluation never errors on data: a broken ref chain, a missing tag or a
//! mistyped comparison is simply `false`. Batch evaluation builds a
//! `Ref name -> row` index once and resolves refs in O(1).
//!
//! # Example
//! ```
//! use hayrick::filter::Filter;
//! use hayrick::zinc;
//! let grid = zinc::parse_grid(
//!     "ver:\"3.0\"\nid,site,area\n@a,M,100ft²\n@b,,\n").unwrap();
//! let filter = Filter::parse("site and area >= 50ft²").unwrap();
//! let hits: Vec<_> = filter.filter_grid(&grid).collect();
//! assert_eq!(hits.len(), 1);
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use crate::datatype::{Dict, Value};
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::zinc;

/// Filter strings are single-line and bounded; the default cap matches the
/// wire limit.
pub const DEFAULT_MAX_LEN: usize = 4096;

#[derive(Parser)]
#[grammar = "filter.pest"] // relative to src
struct FilterParser;

// ------------- AST -------------

/// A dotted dereference path: `siteRef->geoCity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPath(Vec<String>);

impl FilterPath {
    pub fn new(hops: Vec<String>) -> Self {
        Self(hops)
    }
    pub fn hops(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for FilterPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0.join("->"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// Bare path: the tag is present and truthy.
    Has(FilterPath),
    /// `not path`.
    Missing(FilterPath),
    Cmp {
        path: FilterPath,
        op: CmpOp,
        value: Value,
    },
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
}

/// A parsed filter, ready for evaluation or SQL translation.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    source: String,
    root: FilterExpr,
}

impl Filter {
    pub fn parse(source: &str) -> Result<Filter> {
        Self::parse_with_limit(source, DEFAULT_MAX_LEN)
    }

    pub fn parse_with_limit(source: &str, max_len: usize) -> Result<Filter> {
        if source.len() > max_len {
            return Err(Error::Filter {
                pos: max_len,
                expected: format!("filter no longer than {} bytes", max_len),
            });
        }
        if source.contains('\n') || source.contains('\r') {
            return Err(Error::Filter {
                pos: source.find(|c| c == '\n' || c == '\r').unwrap_or(0),
                expected: "single-line filter".to_string(),
            });
        }
        let mut pairs =
            FilterParser::parse(Rule::filter, source).map_err(pest_error)?;
        let filter_pair = pairs.next().ok_or_else(|| Error::Filter {
            pos: 0,
            expected: "filter expression".to_string(),
        })?;
        let cond = filter_pair
            .into_inner()
            .find(|p| p.as_rule() == Rule::cond_or)
            .ok_or_else(|| Error::Filter {
                pos: 0,
                expected: "filter expression".to_string(),
            })?;
        Ok(Filter {
            source: source.to_string(),
            root: build_or(cond)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &FilterExpr {
        &self.root
    }

    /// Evaluates the filter against a single entity.
    pub fn matches(&self, entity: &Dict, resolver: &dyn Resolver) -> bool {
        eval(&self.root, entity, resolver)
    }

    /// Lazily filters a grid's rows in source order, resolving refs through
    /// an index built once up front.
    pub fn filter_grid<'a>(&'a self, grid: &'a Grid) -> impl Iterator<Item = &'a Dict> + 'a {
        let resolver = GridResolver::new(grid);
        grid.rows()
            .iter()
            .filter(move |row| eval(&self.root, row, &resolver))
    }

    /// As [`Self::filter_grid`], checking the cancel flag before each row.
    pub fn filter_grid_cancellable<'a>(
        &'a self,
        grid: &'a Grid,
        cancel: &'a AtomicBool,
    ) -> impl Iterator<Item = &'a Dict> + 'a {
        let resolver = GridResolver::new(grid);
        grid.rows()
            .iter()
            .take_while(move |_| !cancel.load(AtomicOrdering::Relaxed))
            .filter(move |row| eval(&self.root, row, &resolver))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn pest_error(e: pest::error::Error<Rule>) -> Error {
    let pos = match e.location {
        pest::error::InputLocation::Pos(p) => p,
        pest::error::InputLocation::Span((start, _)) => start,
    };
    let expected = match &e.variant {
        pest::error::ErrorVariant::ParsingError { positives, .. } => positives
            .iter()
            .map(|r| format!("{:?}", r))
            .collect::<Vec<_>>()
            .join(", "),
        other => format!("{:?}", other),
    };
    Error::Filter { pos, expected }
}

// ------------- Pair walking -------------

fn build_or(pair: Pair<Rule>) -> Result<FilterExpr> {
    let mut expr: Option<FilterExpr> = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::cond_and => {
                let right = build_and(inner)?;
                expr = Some(match expr {
                    None => right,
                    Some(left) => FilterExpr::Or(Box::new(left), Box::new(right)),
                });
            }
            Rule::or_kw => {}
            rule => {
                return Err(Error::Filter {
                    pos: 0,
                    expected: format!("cond_and, found {:?}", rule),
                })
            }
        }
    }
    expr.ok_or_else(|| Error::Filter { pos: 0, expected: "condition".to_string() })
}

fn build_and(pair: Pair<Rule>) -> Result<FilterExpr> {
    let mut expr: Option<FilterExpr> = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::term => {
                let right = build_term(inner)?;
                expr = Some(match expr {
                    None => right,
                    Some(left) => FilterExpr::And(Box::new(left), Box::new(right)),
                });
            }
            Rule::and_kw => {}
            rule => {
                return Err(Error::Filter {
                    pos: 0,
                    expected: format!("term, found {:?}", rule),
                })
            }
        }
    }
    expr.ok_or_else(|| Error::Filter { pos: 0, expected: "term".to_string() })
}

fn build_term(pair: Pair<Rule>) -> Result<FilterExpr> {
    let inner = pair.into_inner().next().ok_or_else(|| Error::Filter {
        pos: 0,
        expected: "term".to_string(),
    })?;
    match inner.as_rule() {
        Rule::parens => {
            let cond = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::cond_or)
                .ok_or_else(|| Error::Filter { pos: 0, expected: "condition".to_string() })?;
            build_or(cond)
        }
        Rule::missing => {
            let path = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::path)
                .ok_or_else(|| Error::Filter { pos: 0, expected: "path".to_string() })?;
            Ok(FilterExpr::Missing(build_path(path)))
        }
        Rule::cmp => {
            let mut path = None;
            let mut op = None;
            let mut value = None;
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::path => path = Some(build_path(part)),
                    Rule::cmp_op => {
                        op = Some(match part.as_str() {
                            "==" => CmpOp::Eq,
                            "!=" => CmpOp::Ne,
                            "<=" => CmpOp::Le,
                            ">=" => CmpOp::Ge,
                            "<" => CmpOp::Lt,
                            _ => CmpOp::Gt,
                        })
                    }
                    Rule::scalar => value = Some(build_scalar(part)?),
                    _ => {}
                }
            }
            match (path, op, value) {
                (Some(path), Some(op), Some(value)) => Ok(FilterExpr::Cmp { path, op, value }),
                _ => Err(Error::Filter { pos: 0, expected: "comparison".to_string() }),
            }
        }
        Rule::has => {
            let path = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::path)
                .ok_or_else(|| Error::Filter { pos: 0, expected: "path".to_string() })?;
            Ok(FilterExpr::Has(build_path(path)))
        }
        rule => Err(Error::Filter {
            pos: 0,
            expected: format!("term, found {:?}", rule),
        }),
    }
}

fn build_path(pair: Pair<Rule>) -> FilterPath {
    FilterPath::new(
        pair.into_inner()
            .filter(|p| p.as_rule() == Rule::id)
            .map(|p| p.as_str().to_string())
            .collect(),
    )
}

/// Scalar tokens share the Zinc literal layer; only the boolean spellings
/// differ between the two grammars.
fn build_scalar(pair: Pair<Rule>) -> Result<Value> {
    let pos = pair.as_span().start();
    let text = pair.as_str();
    match text {
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        other => zinc::parse_scalar(other)
            .or_else(|e| {
                // Filters may spell an instant without the zone suffix; the
                // offset alone is unambiguous for comparison purposes.
                if let Ok(stamp) = chrono::DateTime::parse_from_rfc3339(other) {
                    let zone = if stamp.offset().local_minus_utc() == 0 {
                        "UTC".to_string()
                    } else {
                        format!("GMT{:+}", stamp.offset().local_minus_utc() / 3600)
                    };
                    return Ok(Value::DateTime(crate::datatype::DateTimeTz::from_parts(
                        stamp, zone,
                    )));
                }
                Err(e)
            })
            .map_err(|_| Error::Filter {
                pos,
                expected: "scalar literal".to_string(),
            }),
    }
}

// ------------- Evaluation -------------

/// Resolves a ref name to the entity it identifies, if known.
pub trait Resolver {
    fn resolve(&self, name: &str) -> Option<&Dict>;
}

/// A resolver that knows no entities; every ref chain is broken.
pub struct NoRefs;

impl Resolver for NoRefs {
    fn resolve(&self, _name: &str) -> Option<&Dict> {
        None
    }
}

/// Resolver over a grid with a prebuilt `Ref name -> row` index.
pub struct GridResolver<'g> {
    grid: &'g Grid,
    index: HashMap<String, usize>,
}

impl<'g> GridResolver<'g> {
    pub fn new(grid: &'g Grid) -> Self {
        Self { grid, index: grid.index_by_id() }
    }
}

impl Resolver for GridResolver<'_> {
    fn resolve(&self, name: &str) -> Option<&Dict> {
        self.index.get(name).and_then(|pos| self.grid.row(*pos))
    }
}

fn eval(expr: &FilterExpr, entity: &Dict, resolver: &dyn Resolver) -> bool {
    match expr {
        FilterExpr::Has(path) => {
            matches!(get_path(entity, path, resolver), Some(v) if v.is_truthy())
        }
        FilterExpr::Missing(path) => {
            !matches!(get_path(entity, path, resolver), Some(v) if v.is_truthy())
        }
        FilterExpr::Cmp { path, op, value } => {
            let found = match get_path(entity, path, resolver) {
                Some(found) => found,
                None => return false,
            };
            match op {
                CmpOp::Eq => found == value,
                CmpOp::Ne => found != value,
                CmpOp::Lt => matches!(found.compare(value), Some(Ordering::Less)),
                CmpOp::Le => matches!(
                    found.compare(value),
                    Some(Ordering::Less) | Some(Ordering::Equal)
                ),
                CmpOp::Gt => matches!(found.compare(value), Some(Ordering::Greater)),
                CmpOp::Ge => matches!(
                    found.compare(value),
                    Some(Ordering::Greater) | Some(Ordering::Equal)
                ),
            }
        }
        FilterExpr::And(left, right) => {
            eval(left, entity, resolver) && eval(right, entity, resolver)
        }
        FilterExpr::Or(left, right) => {
            eval(left, entity, resolver) || eval(right, entity, resolver)
        }
    }
}

/// Walks a dotted path. Intermediate hops must be a Ref (resolved against
/// the entity set) or an embedded Dict; a broken chain is `None`, never an
/// error.
fn get_path<'a>(
    entity: &'a Dict,
    path: &FilterPath,
    resolver: &'a dyn Resolver,
) -> Option<&'a Value> {
    let hops = path.hops();
    let mut current = entity;
    for (i, hop) in hops.iter().enumerate() {
        let value = current.get(hop)?;
        if i == hops.len() - 1 {
            if value.is_null() {
                return None;
            }
            return Some(value);
        }
        current = match value {
            Value::Ref(r) => resolver.resolve(r.name())?,
            Value::Dict(d) => d,
            _ => return None,
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Grid {
        zinc::parse_grid(
            "ver:\"3.0\"\nid,site,equip,area,siteRef,geoCity\n\
             @a,M,,100ft²,,\n\
             @b,,M,,@site1,\n\
             @site1,M,,,,\"Richmond\"\n",
        )
        .unwrap()
    }

    fn ids(filter: &str) -> Vec<String> {
        let grid = grid();
        let parsed = Filter::parse(filter).unwrap();
        parsed
            .filter_grid(&grid)
            .map(|row| match row.get("id") {
                Some(Value::Ref(r)) => r.name().to_string(),
                _ => panic!("row without id"),
            })
            .collect()
    }

    #[test]
    fn has_and_comparison() {
        assert_eq!(ids("site and area >= 50ft²"), vec!["a"]);
        assert_eq!(ids("site"), vec!["a", "site1"]);
        assert_eq!(ids("not site"), vec!["b"]);
    }

    #[test]
    fn unit_mismatch_is_false_not_error() {
        assert!(ids("area >= 50m").is_empty());
        assert!(ids("area >= 50").is_empty());
    }

    #[test]
    fn ref_dereference() {
        assert_eq!(ids("siteRef->geoCity == \"Richmond\""), vec!["b"]);
        assert!(ids("siteRef->missing == \"x\"").is_empty());
        assert!(ids("equip->geoCity").is_empty());
    }

    #[test]
    fn keywords_and_parens() {
        assert_eq!(ids("(site or equip) and not geoCity"), vec!["a", "b"]);
    }

    #[test]
    fn marker_comparisons() {
        assert_eq!(ids("site == M"), vec!["a", "site1"]);
        assert!(ids("site == 1").is_empty());
    }

    #[test]
    fn boolean_literals() {
        let grid = zinc::parse_grid("ver:\"3.0\"\nid,on\n@x,T\n@y,F\n").unwrap();
        let filter = Filter::parse("on == true").unwrap();
        assert_eq!(filter.filter_grid(&grid).count(), 1);
        // A false tag is present but not truthy.
        let has = Filter::parse("on").unwrap();
        assert_eq!(has.filter_grid(&grid).count(), 1);
        let eq_false = Filter::parse("on == false").unwrap();
        assert_eq!(eq_false.filter_grid(&grid).count(), 1);
    }

    #[test]
    fn parse_errors_carry_position() {
        match Filter::parse("site and") {
            Err(Error::Filter { pos, .. }) => assert!(pos >= 4),
            other => panic!("expected filter error, got {:?}", other),
        }
        assert!(Filter::parse("site\nand equip").is_err());
    }

    #[test]
    fn and_is_monotone() {
        let grid = grid();
        let a = Filter::parse("site").unwrap();
        let b = Filter::parse("area >= 50ft²").unwrap();
        let both = Filter::parse("site and area >= 50ft²").unwrap();
        let resolver = GridResolver::new(&grid);
        for row in grid.rows() {
            if both.matches(row, &resolver) {
                assert!(a.matches(row, &resolver) && b.matches(row, &resolver));
            }
        }
    }
}
