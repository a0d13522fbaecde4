//! Cross-subject feature tables built from graph statistics records.
//!
//! Each table has one row per subject and is ready for export as CSV. An
//! optional binary class column is derived from the subject ID.

use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::Selection;
use crate::error::{NeurographError, Result};
use crate::graph_stats::GraphStatsRecord;
use crate::store::{GroupKey, StoreLayout};
use crate::util::{nanmean, wildcard_match};

/// Rule deriving a 0/1 class label from a subject ID.
///
/// In JSON this is `{"members": ["sub-01", ...]}` or `{"pattern": "HS"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassSpec {
    /// Subjects in the set are class 0, all others class 1.
    Members(BTreeSet<String>),
    /// A glob (if it contains `*` or `?`, matched against the whole ID) or a
    /// substring. Matching subjects are class 0, all others class 1.
    Pattern(String),
}

impl ClassSpec {
    pub fn validate(&self) -> Result<()> {
        match self {
            ClassSpec::Members(set) if set.is_empty() => {
                Err(NeurographError::config("class", "member set is empty"))
            }
            ClassSpec::Pattern(p) if p.is_empty() => Err(NeurographError::config("class", "pattern is empty")),
            _ => Ok(()),
        }
    }

    pub fn class_of(&self, subject: &str) -> u8 {
        let hit = match self {
            ClassSpec::Members(set) => set.contains(subject),
            ClassSpec::Pattern(p) if p.contains(|c| c == '*' || c == '?') => wildcard_match(p, subject),
            ClassSpec::Pattern(p) => subject.contains(p.as_str()),
        };
        if hit {
            0
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub subject: String,
    pub class: Option<u8>,
    pub values: Vec<f64>,
}

/// A subjects × features table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn has_class(&self) -> bool {
        self.rows.iter().any(|r| r.class.is_some())
    }

    /// Values of one column, `None` if there is no such column.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|r| r.values[idx]).collect())
    }

    /// Write the table as CSV: `subject[,class],<columns...>`. Missing values are written as `NaN`.
    pub fn to_writer<W: Write>(&self, output: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(output);
        let with_class = self.has_class();

        let mut header: Vec<&str> = vec!["subject"];
        if with_class {
            header.push("class");
        }
        header.extend(self.columns.iter().map(|c| c.as_str()));
        wtr.write_record(&header)?;

        for row in &self.rows {
            let mut rec: Vec<String> = Vec::with_capacity(header.len());
            rec.push(row.subject.clone());
            if with_class {
                rec.push(row.class.map(|c| c.to_string()).unwrap_or_default());
            }
            rec.extend(row.values.iter().map(|v| v.to_string()));
            wtr.write_record(&rec)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        self.to_writer(std::io::BufWriter::new(file))
    }
}

// Records must be unique per subject and describe the same ROIs and nodal columns.
fn check_records(records: &[GraphStatsRecord]) -> Result<()> {
    let first = match records.first() {
        Some(r) => r,
        None => return Ok(()),
    };
    let first_cols: Vec<&str> = first.nodal.columns().iter().map(|(n, _)| *n).collect();
    let mut seen = HashSet::with_capacity(records.len());
    for rec in records {
        if !seen.insert(rec.subject()) {
            return Err(NeurographError::DuplicateSubject { subject: rec.subject().to_string() });
        }
        if rec.roi_names.len() != first.roi_names.len() {
            return Err(NeurographError::DimensionMismatch {
                context: format!("ROI count of subject '{}'", rec.subject()),
                expected: first.roi_names.len(),
                got: rec.roi_names.len(),
            });
        }
        if rec.roi_names != first.roi_names {
            return Err(NeurographError::IdentityMismatch {
                context: format!(
                    "ROI names of subject '{}' differ from those of '{}'",
                    rec.subject(),
                    first.subject()
                ),
            });
        }
        let cols: Vec<&str> = rec.nodal.columns().iter().map(|(n, _)| *n).collect();
        if cols != first_cols {
            return Err(NeurographError::DimensionMismatch {
                context: format!("nodal statistics of subject '{}'", rec.subject()),
                expected: first_cols.len(),
                got: cols.len(),
            });
        }
    }
    Ok(())
}

/// One row per record with a column `<metric>_<roi>` for every nodal statistic and ROI.
///
/// # Examples
///
/// ```no_run
/// use neurograph::{compile_nodal, ClassSpec, GraphStatsRecord};
///
/// let records = vec![
///     GraphStatsRecord::from_file("/path/to/graph_stats_sub-HS01.json").unwrap(),
///     GraphStatsRecord::from_file("/path/to/graph_stats_sub-SZ01.json").unwrap(),
/// ];
/// let table = compile_nodal(&records, Some(&ClassSpec::Pattern("HS".into()))).unwrap();
/// table.write_csv("/path/to/nodal.csv").unwrap();
/// ```
pub fn compile_nodal(records: &[GraphStatsRecord], class: Option<&ClassSpec>) -> Result<FeatureTable> {
    check_records(records)?;
    let first = match records.first() {
        Some(r) => r,
        None => return Ok(FeatureTable::default()),
    };

    let mut columns = Vec::new();
    for (metric, _) in first.nodal.columns() {
        columns.extend(first.roi_names.iter().map(|roi| format!("{}_{}", metric, roi)));
    }
    let rows = records
        .iter()
        .map(|rec| FeatureRow {
            subject: rec.subject().to_string(),
            class: class.map(|c| c.class_of(rec.subject())),
            values: rec
                .nodal
                .columns()
                .iter()
                .flat_map(|(_, vals)| vals.iter().copied())
                .collect(),
        })
        .collect();
    Ok(FeatureTable { columns, rows })
}

/// One row per record with the global statistics, followed by the NaN-ignoring
/// mean of every nodal statistic as `mean_<metric>`.
pub fn compile_global(records: &[GraphStatsRecord], class: Option<&ClassSpec>) -> Result<FeatureTable> {
    check_records(records)?;
    let first = match records.first() {
        Some(r) => r,
        None => return Ok(FeatureTable::default()),
    };

    let mut columns: Vec<String> = first.global.columns().iter().map(|(n, _)| n.to_string()).collect();
    columns.extend(first.nodal.columns().iter().map(|(n, _)| format!("mean_{}", n)));

    let rows = records
        .iter()
        .map(|rec| {
            let mut values: Vec<f64> = rec.global.columns().iter().map(|(_, v)| *v).collect();
            values.extend(rec.nodal.columns().iter().map(|(_, vals)| nanmean(vals)));
            FeatureRow {
                subject: rec.subject().to_string(),
                class: class.map(|c| c.class_of(rec.subject())),
                values,
            }
        })
        .collect();
    Ok(FeatureTable { columns, rows })
}

/// Load the statistics records of a group from the store.
///
/// With an explicit subject list every subject must have a record, otherwise
/// `MissingData` is returned. With `Selection::All` whatever is present is used.
#[instrument(skip_all, fields(atlas = %group.atlas, condition = %group.condition, weight = group.weight))]
pub fn collect_stats(layout: &StoreLayout, group: &GroupKey, subjects: &Selection) -> Result<Vec<GraphStatsRecord>> {
    let records = match subjects {
        Selection::All => layout.find_stats(group)?,
        Selection::Only(names) => names
            .iter()
            .map(|s| layout.read_stats(group, s))
            .collect::<Result<Vec<_>>>()?,
    };
    debug!(records = records.len(), "collected statistics records");
    Ok(records)
}

/// Compile and write the nodal and global tables of one group.
/// Returns the written paths; nothing is written when there are no records.
pub fn export_tables(
    layout: &StoreLayout,
    group: &GroupKey,
    records: &[GraphStatsRecord],
    class: Option<&ClassSpec>,
) -> Result<Vec<std::path::PathBuf>> {
    if records.is_empty() {
        return Ok(Vec::new());
    }
    let mut written = Vec::with_capacity(2);
    for (level, table) in [
        ("nodal", compile_nodal(records, class)?),
        ("global", compile_global(records, class)?),
    ]
    .iter()
    {
        let path = layout.table_path(group, level);
        table.write_csv(&path)?;
        info!(path = %path.display(), rows = table.n_rows(), "wrote feature table");
        written.push(path);
    }
    Ok(written)
}
