//! Hayrick – the Project Haystack ontology core.
//!
//! Hayrick centers on the *grid* concept: a tabular container of tagged
//! entities, where:
//! * A [`datatype::Value`] is the closed sum of every Haystack scalar and
//!   structured value (markers, quantities with units, refs, zoned
//!   instants, lists, dicts, nested grids).
//! * A [`grid::Grid`] couples grid-level metadata with ordered typed
//!   columns and ordered entity rows.
//! * A [`filter::Filter`] selects entities by tag conditions, with dotted
//!   ref dereferencing (`siteRef->geoCity`).
//!
//! Values and grids are immutable once constructed and safe to share
//! across threads; parsers and emitters own their state.
//!
//! ## Modules
//! * [`datatype`] – the tagged value algebra and its equality rules.
//! * [`grid`] – grid model, columns, ref index.
//! * [`zinc`] – the canonical text format: recursive-descent parser and
//!   deterministic emitter, plus the scalar layer every other codec and
//!   the filter grammar share.
//! * [`json`], [`csv`], [`trio`] – the auxiliary formats.
//! * [`filter`] – filter grammar (Pest based), AST and evaluator.
//! * [`sql`] – filter compilation to parameterised JSON-predicate SQL for
//!   SQLite and PostgreSQL.
//! * [`provider`] – the capability-discovering storage contract.
//! * [`persist`] – SQLite-backed versioned entity store.
//! * [`diff`] – grid merge/diff/union and their round-trip law.
//! * [`interface`] – thread-per-query submission with cooperative
//!   cancellation.
//! * [`units`] – the one-shot unit alias registry.
//! * [`error`] – crate error type; every fallible API returns
//!   [`error::Result`].
//!
//! ## Quick Start
//! ```
//! use hayrick::{filter::Filter, zinc};
//! let grid = zinc::parse_grid(
//!     "ver:\"3.0\"\nid,site,area\n@a,M,100ft\u{b2}\n@b,,\n").unwrap();
//! let filter = Filter::parse("site and area >= 50ft\u{b2}").unwrap();
//! assert_eq!(filter.filter_grid(&grid).count(), 1);
//! ```
//!
//! ## Wire formats
//! Zinc is the reference format; parsers accept versions 2.0 and 3.0 and
//! emitters write 3.0. JSON round-trips every scalar distinction through
//! sigil-tagged strings; CSV and Trio are line-oriented and lossy to
//! different degrees. All four share Zinc's scalar literal layer.
//!
//! ## License
//! Dual licensed under Apache-2.0 and MIT.

pub mod csv;
pub mod datatype;
pub mod diff;
pub mod error;
pub mod filter;
pub mod grid;
pub mod interface;
pub mod json;
pub mod persist;
pub mod provider;
pub mod sql;
pub mod trio;
pub mod units;
pub mod zinc;

pub use datatype::{Dict, Value};
pub use error::{Error, Result};
pub use grid::Grid;
