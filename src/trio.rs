//! Trio codec.
//!
//! A line-oriented format: one entity per paragraph, paragraphs separated
//! by `---` lines or blank lines. Each line is `tag: zincScalar` or a bare
//! `tag` for a Marker. Multi-line strings follow a bare `tag:` on
//! two-space-indented continuation lines. Trio carries no grid-level or
//! column metadata; the parsed grid's columns are the union of seen tags in
//! first-seen order.

use crate::datatype::{Dict, Value};
use crate::error::{Error, ParseErrorKind, Result};
use crate::grid::{Column, Grid};
use crate::zinc::{self, ParseOptions};

/// Emits one paragraph per row, separated by `---` lines.
pub fn dump_grid(grid: &Grid) -> Result<String> {
    let mut out = String::new();
    for (i, row) in grid.rows().iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        for (name, value) in row {
            match value {
                Value::Null => continue,
                Value::Marker => {
                    out.push_str(name);
                    out.push('\n');
                }
                Value::Str(s) if s.contains('\n') => {
                    out.push_str(name);
                    out.push_str(":\n");
                    for line in s.split('\n') {
                        out.push_str("  ");
                        out.push_str(line);
                        out.push('\n');
                    }
                }
                Value::Grid(_) => {
                    return Err(Error::Unrepresentable("nested grid in Trio"));
                }
                other => {
                    out.push_str(name);
                    out.push_str(": ");
                    out.push_str(&zinc::dump_scalar(other)?);
                    out.push('\n');
                }
            }
        }
    }
    Ok(out)
}

pub fn parse_grid(src: &str) -> Result<Grid> {
    parse_grid_with(src, &ParseOptions::default())
}

pub fn parse_grid_with(src: &str, options: &ParseOptions) -> Result<Grid> {
    let mut entities: Vec<Dict> = Vec::new();
    let mut current = Dict::new();
    let mut lines = src.lines().enumerate().peekable();
    while let Some((index, line)) = lines.next() {
        if let Some(deadline) = options.deadline {
            if std::time::Instant::now() > deadline {
                return Err(Error::Data("parse deadline exceeded".to_string()));
            }
        }
        let line_no = index + 1;
        if line.trim().is_empty() || line.chars().all(|c| c == '-') && line.len() >= 3 {
            if !current.is_empty() {
                entities.push(std::mem::take(&mut current));
            }
            continue;
        }
        if line.starts_with("  ") {
            // Continuation lines are only legal right after `tag:`.
            return Err(Error::parse(ParseErrorKind::UnexpectedToken, line_no, 1));
        }
        match line.split_once(':') {
            None => {
                let name = line.trim_end();
                if !is_tag_name(name) {
                    return Err(Error::parse(ParseErrorKind::UnexpectedToken, line_no, 1));
                }
                current.mark(name);
            }
            Some((name, rest)) => {
                let name = name.trim_end();
                if !is_tag_name(name) {
                    return Err(Error::parse(ParseErrorKind::UnexpectedToken, line_no, 1));
                }
                let rest = rest.strip_prefix(' ').unwrap_or(rest);
                if rest.is_empty() {
                    // Multi-line string: two-space indented continuation.
                    let mut parts = Vec::new();
                    while let Some((_, next)) = lines.peek() {
                        if let Some(stripped) = next.strip_prefix("  ") {
                            parts.push(stripped.to_string());
                            lines.next();
                        } else {
                            break;
                        }
                    }
                    current.insert(name, Value::Str(parts.join("\n")));
                } else {
                    let value = zinc::parse_scalar(rest).map_err(|e| match e {
                        Error::Parse { kind, col, .. } => Error::parse(kind, line_no, col),
                        other => other,
                    })?;
                    current.insert(name, value);
                }
            }
        }
    }
    if !current.is_empty() {
        entities.push(current);
    }

    let mut grid = Grid::new();
    for entity in &entities {
        for name in entity.keys() {
            if !grid.has_column(name) {
                grid.add_column(Column::new(name.clone()))?;
            }
        }
    }
    for entity in entities {
        grid.append(entity);
    }
    Ok(grid)
}

fn is_tag_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_round_trip() {
        let src = "id: @a\nsite\narea: 100ft²\n---\nid: @b\nequip\n";
        let grid = parse_grid(src).unwrap();
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.row(0).unwrap().get("site"), Some(&Value::Marker));
        assert_eq!(
            grid.row(0).unwrap().get("area"),
            Some(&Value::quantity(100.0, "ft²"))
        );
        assert_eq!(dump_grid(&grid).unwrap(), src);
    }

    #[test]
    fn blank_line_also_separates() {
        let grid = parse_grid("a: 1\n\nb: 2\n").unwrap();
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.row(1).unwrap().get("b"), Some(&Value::number(2.0)));
    }

    #[test]
    fn multi_line_strings_use_two_space_indent() {
        let src = "dis:\n  line one\n  line two\nsite\n";
        let grid = parse_grid(src).unwrap();
        assert_eq!(
            grid.row(0).unwrap().get("dis"),
            Some(&Value::str("line one\nline two"))
        );
        assert_eq!(dump_grid(&grid).unwrap(), src);
    }

    #[test]
    fn nested_grids_are_not_representable() {
        let mut grid = Grid::with_columns(["inner"]).unwrap();
        let mut row = Dict::new();
        row.insert("inner", Value::Grid(Box::new(Grid::new())));
        grid.append(row);
        assert!(matches!(
            dump_grid(&grid),
            Err(Error::Unrepresentable(_))
        ));
    }
}
