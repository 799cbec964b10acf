//! Filter to SQL translation.
//!
//! Entities persist as JSON rows (see [`crate::persist`]); a filter walks
//! down to a parameterised `WHERE` clause whose predicates extract tags
//! from the `entity` column. Scalars bind in their JSON tag-encoded form
//! (`s:…`, `n:154 kg`, ref names), so the same comparisons the in-memory
//! evaluator makes run inside the database.
//!
//! Ref hops (`siteRef->geoCity`) become correlated `EXISTS` subqueries
//! joining on the target's `id` name. Disjunctions that span a ref hop on a
//! dialect without parenthesised compound subqueries are flagged inexact;
//! the caller re-verifies the superset in process.

use std::fmt;

use rusqlite::types::{ToSql, ToSqlOutput};
use tracing::warn;

use crate::error::{Error, Result};
use crate::filter::{CmpOp, Filter, FilterExpr, FilterPath};
use crate::json;
use crate::datatype::Value;

// ------------- Dialects -------------

/// The few syntax points where SQLite and PostgreSQL JSON predicates
/// differ.
pub trait Dialect {
    fn name(&self) -> &'static str;
    fn quote_ident(&self, ident: &str) -> String;
    /// Expression extracting `$.tag` from a JSON entity column.
    fn json_extract(&self, column: &str, tag: &str) -> String;
    /// The parameter placeholder for the 1-based bind `index`.
    fn placeholder(&self, index: usize) -> String;
    /// Expression for the name part of an encoded ref (`r:name dis…`).
    fn ref_name(&self, extract: &str) -> String;
    /// Expression casting an encoded number (`n:154 kg`) to a float.
    fn number_cast(&self, extract: &str) -> String;
    /// Expression for the position of the first space in the encoded text,
    /// zero when there is none.
    fn space_index(&self, extract: &str) -> String;
    /// Truthiness guard for bare-path predicates.
    fn truthy(&self, extract: &str) -> String;
    /// The bind value for a boolean tag comparison.
    fn bool_bind(&self, value: bool) -> SqlBind;
    /// Whether compound subqueries may be parenthesised.
    fn parenthesised_compounds(&self) -> bool;
}

pub struct Sqlite;

impl Dialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
    fn json_extract(&self, column: &str, tag: &str) -> String {
        format!("json_extract({},'$.{}')", column, tag)
    }
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }
    fn ref_name(&self, extract: &str) -> String {
        format!(
            "CASE WHEN instr({x},' ') > 0 THEN substr({x},3,instr({x},' ')-3) ELSE substr({x},3) END",
            x = extract
        )
    }
    fn number_cast(&self, extract: &str) -> String {
        format!("CAST(SUBSTR({},3) AS REAL)", extract)
    }
    fn space_index(&self, extract: &str) -> String {
        format!("instr({},' ')", extract)
    }
    fn truthy(&self, extract: &str) -> String {
        // JSON false extracts as the integer 0 here, as 'false' in text
        // based dialects.
        format!(
            "{x} IS NOT NULL AND {x} <> 'false' AND {x} <> 0",
            x = extract
        )
    }
    fn bool_bind(&self, value: bool) -> SqlBind {
        SqlBind::Int(if value { 1 } else { 0 })
    }
    fn parenthesised_compounds(&self) -> bool {
        false
    }
}

pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgresql"
    }
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
    fn json_extract(&self, column: &str, tag: &str) -> String {
        format!("({} ->> '{}')", column, tag)
    }
    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }
    fn ref_name(&self, extract: &str) -> String {
        format!("split_part(substr({},3),' ',1)", extract)
    }
    fn number_cast(&self, extract: &str) -> String {
        format!(
            "CAST(split_part(substr({},3),' ',1) AS double precision)",
            extract
        )
    }
    fn space_index(&self, extract: &str) -> String {
        format!("strpos({},' ')", extract)
    }
    fn truthy(&self, extract: &str) -> String {
        format!("{x} IS NOT NULL AND {x} <> 'false'", x = extract)
    }
    fn bool_bind(&self, value: bool) -> SqlBind {
        SqlBind::Text(if value { "true" } else { "false" }.to_string())
    }
    fn parenthesised_compounds(&self) -> bool {
        true
    }
}

// ------------- Translation output -------------

/// A bind parameter accompanying the emitted clause.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlBind {
    Text(String),
    Real(f64),
    Int(i64),
}

impl ToSql for SqlBind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlBind::Text(s) => ToSqlOutput::from(s.as_str()),
            SqlBind::Real(f) => ToSqlOutput::from(*f),
            SqlBind::Int(i) => ToSqlOutput::from(*i),
        })
    }
}

impl fmt::Display for SqlBind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SqlBind::Text(s) => write!(f, "'{}'", s),
            SqlBind::Real(v) => write!(f, "{}", v),
            SqlBind::Int(v) => write!(f, "{}", v),
        }
    }
}

/// A parameterised `WHERE` body plus its bind list.
///
/// `exact` is false when the emitted SQL may select a superset of the
/// filter (the documented compound-subquery limitation); the caller must
/// then re-verify matches in process. `has_ref_paths` reports whether any
/// correlated subquery was emitted, which versioned stores use to decide on
/// re-verification as well.
#[derive(Debug)]
pub struct Translation {
    pub clause: String,
    pub binds: Vec<SqlBind>,
    pub exact: bool,
    pub has_ref_paths: bool,
}

/// Compiles a filter into a `WHERE` clause body over `table`, whose JSON
/// entity column is named `entity`.
pub fn translate(filter: &Filter, dialect: &dyn Dialect, table: &str) -> Result<Translation> {
    let mut tr = Translator {
        dialect,
        table,
        binds: Vec::new(),
        exact: true,
        has_ref_paths: false,
        next_alias: 1,
    };
    let outer = if expr_has_ref_path(filter.root()) {
        // Subqueries shadow the bare column name, so the outer table must
        // qualify it.
        format!("{}.entity", dialect.quote_ident(table))
    } else {
        "entity".to_string()
    };
    let clause = tr.expr(filter.root(), &outer)?;
    if !tr.exact {
        warn!(filter = %filter, dialect = dialect.name(), "translation is a superset; re-verify in process");
    }
    Ok(Translation {
        clause,
        binds: tr.binds,
        exact: tr.exact,
        has_ref_paths: tr.has_ref_paths,
    })
}

fn expr_has_ref_path(expr: &FilterExpr) -> bool {
    match expr {
        FilterExpr::Has(p) | FilterExpr::Missing(p) => p.hops().len() > 1,
        FilterExpr::Cmp { path, .. } => path.hops().len() > 1,
        FilterExpr::And(l, r) | FilterExpr::Or(l, r) => {
            expr_has_ref_path(l) || expr_has_ref_path(r)
        }
    }
}

struct Translator<'a> {
    dialect: &'a dyn Dialect,
    table: &'a str,
    binds: Vec<SqlBind>,
    exact: bool,
    has_ref_paths: bool,
    next_alias: usize,
}

enum Leaf<'a> {
    Has,
    Cmp(CmpOp, &'a Value),
}

impl<'a> Translator<'a> {
    fn push_bind(&mut self, bind: SqlBind) -> String {
        self.binds.push(bind);
        self.dialect.placeholder(self.binds.len())
    }

    fn expr(&mut self, expr: &FilterExpr, entity: &str) -> Result<String> {
        match expr {
            FilterExpr::Has(path) => self.path_pred(path, entity, &Leaf::Has),
            FilterExpr::Missing(path) => {
                Ok(format!("NOT ({})", self.path_pred(path, entity, &Leaf::Has)?))
            }
            FilterExpr::Cmp { path, op, value } => {
                self.path_pred(path, entity, &Leaf::Cmp(*op, value))
            }
            FilterExpr::And(left, right) => Ok(format!(
                "({} AND {})",
                self.expr(left, entity)?,
                self.expr(right, entity)?
            )),
            FilterExpr::Or(left, right) => {
                if !self.dialect.parenthesised_compounds()
                    && (expr_has_ref_path(left) || expr_has_ref_path(right))
                {
                    self.exact = false;
                }
                Ok(format!(
                    "({} OR {})",
                    self.expr(left, entity)?,
                    self.expr(right, entity)?
                ))
            }
        }
    }

    /// Emits the predicate for one dotted path, nesting an `EXISTS` join
    /// per ref hop.
    fn path_pred(&mut self, path: &FilterPath, entity: &str, leaf: &Leaf) -> Result<String> {
        self.hops_pred(path.hops(), entity, leaf)
    }

    fn hops_pred(&mut self, hops: &[String], entity: &str, leaf: &Leaf) -> Result<String> {
        let extract = self.dialect.json_extract(entity, &hops[0]);
        if hops.len() == 1 {
            return self.leaf_pred(&extract, leaf);
        }
        self.has_ref_paths = true;
        let alias = format!("t{}", self.next_alias);
        self.next_alias += 1;
        let inner_entity = format!("{}.entity", alias);
        let inner_id = self
            .dialect
            .json_extract(&inner_entity, "id");
        let rest = self.hops_pred(&hops[1..], &inner_entity, leaf)?;
        Ok(format!(
            "EXISTS (SELECT 1 FROM {} AS {} WHERE {} = {} AND {})",
            self.dialect.quote_ident(self.table),
            alias,
            self.dialect.ref_name(&extract),
            self.dialect.ref_name(&inner_id),
            rest
        ))
    }

    fn leaf_pred(&mut self, extract: &str, leaf: &Leaf) -> Result<String> {
        match leaf {
            Leaf::Has => Ok(self.dialect.truthy(extract)),
            Leaf::Cmp(op, value) => self.cmp_pred(extract, *op, value),
        }
    }

    fn cmp_pred(&mut self, extract: &str, op: CmpOp, value: &Value) -> Result<String> {
        match (op, value) {
            (CmpOp::Eq, Value::Null) => Ok(format!("{} IS NULL", extract)),
            (CmpOp::Ne, Value::Null) => Ok(format!("{} IS NOT NULL", extract)),
            (CmpOp::Eq, Value::Bool(b)) => {
                let bind = self.dialect.bool_bind(*b);
                let ph = self.push_bind(bind);
                Ok(format!("{} = {}", extract, ph))
            }
            (CmpOp::Ne, Value::Bool(b)) => {
                let bind = self.dialect.bool_bind(*b);
                let ph = self.push_bind(bind);
                Ok(format!("({x} IS NOT NULL AND {x} <> {ph})", x = extract, ph = ph))
            }
            (CmpOp::Eq, Value::Ref(r)) => {
                let name = self.dialect.ref_name(extract);
                let ph = self.push_bind(SqlBind::Text(r.name().to_string()));
                Ok(format!("{} = {}", name, ph))
            }
            (CmpOp::Ne, Value::Ref(r)) => {
                let name = self.dialect.ref_name(extract);
                let ph = self.push_bind(SqlBind::Text(r.name().to_string()));
                Ok(format!("({x} IS NOT NULL AND {n} <> {ph})", x = extract, n = name, ph = ph))
            }
            (CmpOp::Eq, other) => {
                let encoded = json::scalar_string(other)
                    .ok_or(Error::Unrepresentable("composite value in SQL comparison"))?;
                let ph = self.push_bind(SqlBind::Text(encoded));
                Ok(format!("{} = {}", extract, ph))
            }
            (CmpOp::Ne, other) => {
                let encoded = json::scalar_string(other)
                    .ok_or(Error::Unrepresentable("composite value in SQL comparison"))?;
                let ph = self.push_bind(SqlBind::Text(encoded));
                Ok(format!("({x} IS NOT NULL AND {x} <> {ph})", x = extract, ph = ph))
            }
            (op, Value::Number(n)) => {
                let cast = self.dialect.number_cast(extract);
                let ph = self.push_bind(SqlBind::Real(n.value()));
                let cmp = format!("{} {} {}", cast, sql_op(op), ph);
                // The unit suffix is matched structurally, never through a
                // pattern: `%` is itself a unit and would read as a LIKE
                // wildcard.
                let space = self.dialect.space_index(extract);
                let unit_guard = match n.unit() {
                    Some(unit) => {
                        let ph = self.push_bind(SqlBind::Text(unit.to_string()));
                        format!(
                            "substr({x},1,2) = 'n:' AND {space} > 0 AND substr({x},{space}+1) = {ph}",
                            x = extract,
                            space = space,
                            ph = ph
                        )
                    }
                    None => format!(
                        "substr({x},1,2) = 'n:' AND {space} = 0",
                        x = extract,
                        space = space
                    ),
                };
                Ok(format!("({} AND {})", cmp, unit_guard))
            }
            (op, other @ (Value::Str(_) | Value::Uri(_) | Value::Date(_) | Value::Time(_) | Value::DateTime(_))) => {
                // Encoded ISO forms order textually; for datetimes this is
                // sound within a single zone.
                let encoded = json::scalar_string(other)
                    .ok_or(Error::Unrepresentable("composite value in SQL comparison"))?;
                let ph = self.push_bind(SqlBind::Text(encoded));
                Ok(format!("{} {} {}", extract, sql_op(op), ph))
            }
            // Ordering over unordered kinds is false, matching the
            // evaluator.
            _ => Ok("1 = 0".to_string()),
        }
    }
}

fn sql_op(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "=",
        CmpOp::Ne => "<>",
        CmpOp::Lt => "<",
        CmpOp::Le => "<=",
        CmpOp::Gt => ">",
        CmpOp::Ge => ">=",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_and_number_comparison() {
        let filter = Filter::parse("site and area >= 50ft²").unwrap();
        let t = translate(&filter, &Sqlite, "haystack").unwrap();
        assert!(t.clause.contains("json_extract(entity,'$.site') IS NOT NULL"));
        assert!(t.clause.contains("<> 'false'"));
        assert!(t
            .clause
            .contains("CAST(SUBSTR(json_extract(entity,'$.area'),3) AS REAL) >= ?"));
        assert!(t
            .clause
            .contains("substr(json_extract(entity,'$.area'),instr(json_extract(entity,'$.area'),' ')+1) = ?"));
        assert_eq!(t.binds[0], SqlBind::Real(50.0));
        assert_eq!(t.binds[1], SqlBind::Text("ft²".to_string()));
        assert!(t.exact);
        assert!(!t.has_ref_paths);
    }

    #[test]
    fn percent_units_are_not_wildcards() {
        let filter = Filter::parse("level >= 50%").unwrap();
        let t = translate(&filter, &Sqlite, "haystack").unwrap();
        assert!(!t.clause.contains("LIKE"));
        assert_eq!(t.binds[1], SqlBind::Text("%".to_string()));
        let unitless = Filter::parse("level >= 50").unwrap();
        let t = translate(&unitless, &Sqlite, "haystack").unwrap();
        assert!(t
            .clause
            .contains("instr(json_extract(entity,'$.level'),' ') = 0"));
        assert_eq!(t.binds, vec![SqlBind::Real(50.0)]);
    }

    #[test]
    fn string_equality_binds_tagged_form() {
        let filter = Filter::parse("dis == \"Dis 1\"").unwrap();
        let t = translate(&filter, &Sqlite, "haystack").unwrap();
        assert_eq!(t.clause, "json_extract(entity,'$.dis') = ?");
        assert_eq!(t.binds, vec![SqlBind::Text("s:Dis 1".to_string())]);
    }

    #[test]
    fn ref_equality_ignores_display() {
        let filter = Filter::parse("id == @id1").unwrap();
        let t = translate(&filter, &Sqlite, "haystack").unwrap();
        assert!(t.clause.contains("substr("));
        assert_eq!(t.binds, vec![SqlBind::Text("id1".to_string())]);
    }

    #[test]
    fn ref_hop_emits_exists_join() {
        let filter = Filter::parse("siteRef->geoCity == \"Richmond\"").unwrap();
        let t = translate(&filter, &Sqlite, "haystack").unwrap();
        assert!(t.clause.starts_with("EXISTS (SELECT 1 FROM \"haystack\" AS t1"));
        assert!(t.clause.contains("json_extract(t1.entity,'$.geoCity') = ?"));
        assert!(t.has_ref_paths);
        assert!(t.exact);
    }

    #[test]
    fn disjunction_across_hops_is_flagged_on_sqlite() {
        let filter = Filter::parse("site or siteRef->geoCity == \"x\"").unwrap();
        let sqlite = translate(&filter, &Sqlite, "haystack").unwrap();
        assert!(!sqlite.exact);
        let postgres = translate(&filter, &Postgres, "haystack").unwrap();
        assert!(postgres.exact);
    }

    #[test]
    fn postgres_uses_numbered_placeholders() {
        let filter = Filter::parse("a == \"x\" and b == \"y\"").unwrap();
        let t = translate(&filter, &Postgres, "haystack").unwrap();
        assert!(t.clause.contains("(entity ->> 'a') = $1"));
        assert!(t.clause.contains("(entity ->> 'b') = $2"));
    }

    #[test]
    fn composite_values_are_unrepresentable() {
        let filter = Filter::parse("a == [1,2]").unwrap();
        assert!(matches!(
            translate(&filter, &Sqlite, "haystack"),
            Err(Error::Unrepresentable(_))
        ));
    }
}
