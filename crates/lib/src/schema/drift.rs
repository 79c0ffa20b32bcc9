//! # Schema Drift
//!
//! Pure comparison of two schema descriptions. Renames are only ever reported
//! as candidates; nothing here mutates an index or a store.

use crate::schema::{SchemaMetadata, TableSchema};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameCandidate {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeChange {
    pub table: String,
    pub column: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    /// Snapshot version the live schema was compared against, if any.
    pub baseline_version: Option<u64>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Removed/added table pairs with identical column sets. Also listed in
    /// `removed` and `added`, since a candidate is never applied.
    pub renamed_candidates: Vec<RenameCandidate>,
    /// `table.column` entries for tables present on both sides.
    pub added_columns: Vec<String>,
    pub removed_columns: Vec<String>,
    pub type_changes: Vec<TypeChange>,
}

impl DriftReport {
    pub fn has_drift(&self) -> bool {
        !(self.added.is_empty()
            && self.removed.is_empty()
            && self.added_columns.is_empty()
            && self.removed_columns.is_empty()
            && self.type_changes.is_empty())
    }

    /// Removed columns split into `(table, column)` pairs.
    pub fn removed_column_pairs(&self) -> Vec<(String, String)> {
        self.removed_columns
            .iter()
            .filter_map(|qualified| {
                qualified
                    .split_once('.')
                    .map(|(t, c)| (t.to_string(), c.to_string()))
            })
            .collect()
    }
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

fn column_set(table: &TableSchema) -> BTreeSet<String> {
    table.columns.iter().map(|c| key(&c.name)).collect()
}

/// Compares `old` (last snapshot) with `new` (live metadata).
pub fn diff_schemas(old: &SchemaMetadata, new: &SchemaMetadata) -> DriftReport {
    let old_tables: HashMap<String, &TableSchema> =
        old.tables.iter().map(|t| (key(&t.name), t)).collect();
    let new_tables: HashMap<String, &TableSchema> =
        new.tables.iter().map(|t| (key(&t.name), t)).collect();

    let mut report = DriftReport::default();

    for table in &new.tables {
        if !old_tables.contains_key(&key(&table.name)) {
            report.added.push(table.name.clone());
        }
    }
    for table in &old.tables {
        if !new_tables.contains_key(&key(&table.name)) {
            report.removed.push(table.name.clone());
        }
    }

    for removed in &report.removed {
        let Some(old_table) = old_tables.get(&key(removed)) else {
            continue;
        };
        let old_columns = column_set(old_table);
        for added in &report.added {
            if let Some(new_table) = new_tables.get(&key(added)) {
                if !old_columns.is_empty() && column_set(new_table) == old_columns {
                    report.renamed_candidates.push(RenameCandidate {
                        from: removed.clone(),
                        to: added.clone(),
                    });
                }
            }
        }
    }

    for old_table in &old.tables {
        let Some(new_table) = new_tables.get(&key(&old_table.name)) else {
            continue;
        };
        for column in &new_table.columns {
            match old_table.column(&column.name) {
                None => report
                    .added_columns
                    .push(format!("{}.{}", old_table.name, column.name)),
                Some(previous) if !previous.data_type.eq_ignore_ascii_case(&column.data_type) => {
                    report.type_changes.push(TypeChange {
                        table: old_table.name.clone(),
                        column: column.name.clone(),
                        from: previous.data_type.clone(),
                        to: column.data_type.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        for column in &old_table.columns {
            if new_table.column(&column.name).is_none() {
                report
                    .removed_columns
                    .push(format!("{}.{}", old_table.name, column.name));
            }
        }
    }

    report
}
