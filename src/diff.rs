//! Grid algebra: diff, merge and union over versioned grids.
//!
//! `diff(a, b)` builds a patch grid such that `merge(a, diff(a, b)) == b`.
//! The patch is marked with a `diff_` Marker in its metadata; a dropped tag
//! becomes a `Remove` cell, a dropped entity becomes a row tagged
//! `remove_`, and a dropped column carries `remove_` in its column
//! metadata. Rows are matched by their `id` tag when they have one and by
//! whole-row equality otherwise.

use crate::datatype::{Dict, Value};
use crate::error::Result;
use crate::grid::{Column, Grid};

/// Tags a patch grid as a difference.
pub const DIFF_TAG: &str = "diff_";
/// Tombstone tag for removed rows and columns.
pub const REMOVE_TAG: &str = "remove_";

/// Builds the patch turning `left` into `right`.
pub fn diff(left: &Grid, right: &Grid) -> Grid {
    let mut patch = Grid::new();
    patch.meta_mut().mark(DIFF_TAG);

    // Metadata differences.
    for (key, left_value) in left.meta() {
        match right.meta().get(key) {
            Some(right_value) if right_value == left_value => {}
            Some(right_value) => {
                patch.meta_mut().insert(key.clone(), right_value.clone());
            }
            None => {
                patch.meta_mut().insert(key.clone(), Value::Remove);
            }
        }
    }
    for (key, right_value) in right.meta() {
        if !left.meta().contains(key) {
            patch.meta_mut().insert(key.clone(), right_value.clone());
        }
    }

    // Column differences: every right column in right order, plus
    // tombstones for columns only the left grid had.
    let mut needs_remove_col = false;
    for col in right.columns() {
        let meta = match left.columns().iter().find(|c| c.name() == col.name()) {
            None => col.meta().clone(),
            Some(left_col) => {
                let mut overlay = Dict::new();
                for (key, value) in col.meta() {
                    if left_col.meta().get(key) != Some(value) {
                        overlay.insert(key.clone(), value.clone());
                    }
                }
                for (key, _) in left_col.meta() {
                    if !col.meta().contains(key) {
                        overlay.insert(key.clone(), Value::Remove);
                    }
                }
                overlay
            }
        };
        // Name collisions were ruled out when the source grids were built.
        let _ = patch.add_column(Column::with_meta(col.name(), meta));
    }
    for col in left.columns() {
        if !right.has_column(col.name()) {
            let mut meta = Dict::new();
            meta.mark(REMOVE_TAG);
            let _ = patch.add_column(Column::with_meta(col.name(), meta));
        }
    }

    // Row differences.
    let mut claimed: Vec<usize> = Vec::new();
    for row in left.rows() {
        if let Some(Value::Ref(id)) = row.get("id") {
            match right.by_id(id) {
                Some(right_row) => {
                    let mut delta = Dict::new();
                    for (key, right_value) in right_row {
                        if key == "id" {
                            continue;
                        }
                        if row.get(key) != Some(right_value) {
                            delta.insert(key.clone(), right_value.clone());
                        }
                    }
                    for (key, _) in row {
                        if key != "id" && !right_row.contains(key) {
                            delta.insert(key.clone(), Value::Remove);
                        }
                    }
                    if !delta.is_empty() {
                        let mut out = Dict::new();
                        out.insert("id", Value::Ref(id.clone()));
                        for (key, value) in delta {
                            out.insert(key, value);
                        }
                        patch.append(out);
                    }
                }
                None => {
                    let mut out = Dict::new();
                    out.insert("id", Value::Ref(id.clone()));
                    out.mark(REMOVE_TAG);
                    needs_remove_col = true;
                    patch.append(out);
                }
            }
        } else {
            // Anonymous rows match by value.
            let matched = right.rows().iter().enumerate().position(|(pos, candidate)| {
                !claimed.contains(&pos)
                    && !matches!(candidate.get("id"), Some(Value::Ref(_)))
                    && candidate == row
            });
            match matched {
                Some(pos) => claimed.push(pos),
                None => {
                    let mut out = row.clone();
                    out.mark(REMOVE_TAG);
                    needs_remove_col = true;
                    patch.append(out);
                }
            }
        }
    }
    for (pos, row) in right.rows().iter().enumerate() {
        match row.get("id") {
            Some(Value::Ref(id)) => {
                if left.by_id(id).is_none() {
                    patch.append(row.clone());
                }
            }
            _ => {
                if !claimed.contains(&pos) {
                    patch.append(row.clone());
                }
            }
        }
    }
    if needs_remove_col && !patch.has_column(REMOVE_TAG) {
        let _ = patch.add_column(Column::new(REMOVE_TAG));
    }
    patch
}

/// Applies a patch produced by [`diff`] (or hand-built in the same shape).
pub fn merge(base: &Grid, patch: &Grid) -> Result<Grid> {
    let mut out = Grid::new();

    // Metadata overlay.
    let mut meta = base.meta().clone();
    for (key, value) in patch.meta() {
        if key == DIFF_TAG {
            continue;
        }
        if matches!(value, Value::Remove) {
            meta.remove(key);
        } else {
            meta.insert(key.clone(), value.clone());
        }
    }
    *out.meta_mut() = meta;

    // Column overlay. A patch without column definitions leaves the base
    // schema alone.
    if patch.columns().is_empty() {
        for col in base.columns() {
            out.add_column(col.clone())?;
        }
    } else {
        for col in patch.columns() {
            if col.name() == REMOVE_TAG || col.meta().contains(REMOVE_TAG) {
                continue;
            }
            let mut meta = base
                .columns()
                .iter()
                .find(|c| c.name() == col.name())
                .map(|c| c.meta().clone())
                .unwrap_or_default();
            for (key, value) in col.meta() {
                if matches!(value, Value::Remove) {
                    meta.remove(key);
                } else {
                    meta.insert(key.clone(), value.clone());
                }
            }
            out.add_column(Column::with_meta(col.name(), meta))?;
        }
    }

    // Row overlay.
    let mut rows: Vec<Dict> = base.rows().to_vec();
    for patch_row in patch.rows() {
        if let Some(Value::Ref(id)) = patch_row.get("id") {
            let position = rows.iter().position(|row| match row.get("id") {
                Some(Value::Ref(r)) => r == id,
                _ => false,
            });
            match position {
                Some(pos) => {
                    if patch_row.contains(REMOVE_TAG) {
                        rows.remove(pos);
                    } else {
                        let row = &mut rows[pos];
                        for (key, value) in patch_row {
                            if matches!(value, Value::Remove) {
                                row.remove(key);
                            } else {
                                row.insert(key.clone(), value.clone());
                            }
                        }
                    }
                }
                None => {
                    if !patch_row.contains(REMOVE_TAG) {
                        rows.push(patch_row.clone());
                    }
                }
            }
        } else if patch_row.contains(REMOVE_TAG) {
            let mut target = patch_row.clone();
            target.remove(REMOVE_TAG);
            if let Some(pos) = rows.iter().position(|row| *row == target) {
                rows.remove(pos);
            }
        } else {
            rows.push(patch_row.clone());
        }
    }
    for row in rows {
        out.append(row);
    }
    Ok(out)
}

/// Multiset union by `id`, preserving the first occurrence of each entity.
/// Anonymous rows are kept from both sides.
pub fn union(a: &Grid, b: &Grid) -> Result<Grid> {
    let mut out = Grid::new();
    *out.meta_mut() = a.meta().clone();
    for (key, value) in b.meta() {
        if !a.meta().contains(key) {
            out.meta_mut().insert(key.clone(), value.clone());
        }
    }
    for col in a.columns() {
        out.add_column(col.clone())?;
    }
    for col in b.columns() {
        if !out.has_column(col.name()) {
            out.add_column(col.clone())?;
        }
    }
    for row in a.rows() {
        out.append(row.clone());
    }
    for row in b.rows() {
        if let Some(Value::Ref(id)) = row.get("id") {
            if out.by_id(id).is_some() {
                continue;
            }
        }
        out.append(row.clone());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zinc;

    #[test]
    fn diff_then_merge_round_trips() {
        let a = zinc::parse_grid("ver:\"3.0\"\nid,v\n@x,1\n").unwrap();
        let b = zinc::parse_grid("ver:\"3.0\"\nid,v,w\n@x,2,3\n").unwrap();
        let patch = diff(&a, &b);
        assert!(patch.meta().contains(DIFF_TAG));
        assert_eq!(patch.len(), 1);
        let row = patch.row(0).unwrap();
        assert_eq!(row.get("v"), Some(&Value::number(2.0)));
        assert_eq!(row.get("w"), Some(&Value::number(3.0)));
        assert_eq!(merge(&a, &patch).unwrap(), b);
    }

    #[test]
    fn diff_of_identical_grids_is_empty() {
        let a = zinc::parse_grid("ver:\"3.0\"\nid,v\n@x,1\n@y,2\n").unwrap();
        let patch = diff(&a, &a);
        assert_eq!(patch.len(), 0);
        assert_eq!(merge(&a, &patch).unwrap(), a);
    }

    #[test]
    fn removed_rows_and_tags_tombstone() {
        let a = zinc::parse_grid("ver:\"3.0\"\nid,v,w\n@x,1,5\n@y,2,\n").unwrap();
        let b = zinc::parse_grid("ver:\"3.0\"\nid,v,w\n@x,1,\n").unwrap();
        let patch = diff(&a, &b);
        let merged = merge(&a, &patch).unwrap();
        assert_eq!(merged, b);
        assert!(merged.by_id(&crate::datatype::Ref::new("y")).is_none());
        assert_eq!(merged.by_id(&crate::datatype::Ref::new("x")).unwrap().get("w"), None);
    }

    #[test]
    fn union_keeps_first_occurrence() {
        let a = zinc::parse_grid("ver:\"3.0\"\nid,v\n@x,1\n").unwrap();
        let b = zinc::parse_grid("ver:\"3.0\"\nid,v\n@x,9\n@y,2\n").unwrap();
        let u = union(&a, &b).unwrap();
        assert_eq!(u.len(), 2);
        assert_eq!(
            u.by_id(&crate::datatype::Ref::new("x")).unwrap().get("v"),
            Some(&Value::number(1.0))
        );
    }
}
