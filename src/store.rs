//! On-disk layout of inputs and outputs.
//!
//! File and directory names are derived from typed keys. The reverse
//! direction never parses names: discovery reads record headers and
//! contents, so every record is identified by the metadata it carries.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::{ConnType, GraphType, ThreshType};
use crate::error::{NeurographError, Result};
use crate::graph_stats::GraphStatsRecord;
use crate::roi_ts::TsHeader;
use crate::util::format_weight;

/// Identity of one time series record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TsKey {
    pub atlas: String,
    pub condition: String,
    pub subject: String,
}

impl TsKey {
    pub fn new<A: Into<String>, C: Into<String>, S: Into<String>>(atlas: A, condition: C, subject: S) -> Self {
        TsKey { atlas: atlas.into(), condition: condition.into(), subject: subject.into() }
    }
}

/// Identifies one set of comparable graphs across subjects: same atlas group,
/// condition, connectivity and thresholding.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupKey {
    pub conn_type: ConnType,
    /// Atlas group name, atlas names joined with `+` when merged.
    pub atlas: String,
    pub condition: String,
    pub thresh_type: ThreshType,
    pub graph_type: GraphType,
    pub weight: f64,
}

impl GroupKey {
    /// Whether a statistics record belongs to this group.
    pub fn matches(&self, record: &GraphStatsRecord) -> bool {
        let notes = &record.notes;
        notes.conn.conn_type == self.conn_type
            && notes.conn.atlas == self.atlas
            && notes.conn.condition == self.condition
            && notes.thresh_type == self.thresh_type
            && record.graph_type() == self.graph_type
            && format_weight(notes.thresh_weight) == format_weight(self.weight)
    }

    fn suffix(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.atlas,
            self.thresh_type,
            self.graph_type,
            format_weight(self.weight)
        )
    }
}

/// Directory roots and naming of every file the pipeline reads or writes.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreLayout {
    pub ts_dir: PathBuf,
    pub out_dir: PathBuf,
    /// GZip-compress written records.
    pub compress: bool,
}

const TS_EXT: &str = ".ngts";

impl StoreLayout {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(ts_dir: P, out_dir: Q, compress: bool) -> Self {
        StoreLayout { ts_dir: ts_dir.into(), out_dir: out_dir.into(), compress }
    }

    fn json_ext(&self) -> &'static str {
        if self.compress {
            "json.gz"
        } else {
            "json"
        }
    }

    /// Conventional location of a time series record (uncompressed name).
    pub fn ts_path(&self, key: &TsKey) -> PathBuf {
        self.ts_dir
            .join(&key.atlas)
            .join(&key.condition)
            .join(format!("TS_{}_{}_{}{}", key.atlas, key.condition, key.subject, TS_EXT))
    }

    pub fn conn_path(&self, conn_type: ConnType, atlas: &str, condition: &str, subject: &str) -> PathBuf {
        self.out_dir.join("conn").join(atlas).join(condition).join(format!(
            "conn_mat_{}_{}_{}_{}.{}",
            conn_type,
            atlas,
            condition,
            subject,
            self.json_ext()
        ))
    }

    fn group_dir(&self, kind: &str, group: &GroupKey) -> PathBuf {
        self.out_dir
            .join(kind)
            .join(&group.atlas)
            .join(&group.condition)
            .join(format_weight(group.weight))
    }

    pub fn graph_path(&self, group: &GroupKey, subject: &str) -> PathBuf {
        self.group_dir("graphs", group).join(format!(
            "graphs_{}_{}_{}.{}",
            subject,
            group.conn_type,
            group.suffix(),
            self.json_ext()
        ))
    }

    pub fn stats_path(&self, group: &GroupKey, subject: &str) -> PathBuf {
        self.group_dir("stats", group).join(format!(
            "graph_stats_{}_{}_{}.{}",
            subject,
            group.conn_type,
            group.suffix(),
            self.json_ext()
        ))
    }

    /// Path of an exported feature table; `level` is `"nodal"` or `"global"`.
    pub fn table_path(&self, group: &GroupKey, level: &str) -> PathBuf {
        self.out_dir
            .join("tables")
            .join(&group.atlas)
            .join(&group.condition)
            .join(format!(
                "graph_stats_{}_{}_{}_{}_{}_{}_{}.csv",
                group.conn_type,
                group.atlas,
                group.condition,
                group.thresh_type,
                group.graph_type,
                format_weight(group.weight),
                level
            ))
    }

    /// Scan the time series store and index every readable record by the
    /// identity stored in its header.
    ///
    /// Files with unreadable headers are skipped with a warning. When two files
    /// carry the same identity the first in path order is kept.
    pub fn index_time_series(&self) -> Result<BTreeMap<TsKey, PathBuf>> {
        if !self.ts_dir.is_dir() {
            return Err(NeurographError::MissingData {
                what: String::from("time series directory"),
                path: self.ts_dir.clone(),
            });
        }
        let mut index = BTreeMap::new();
        for atlas_dir in subdirs(&self.ts_dir)? {
            for cond_dir in subdirs(&atlas_dir)? {
                for path in files(&cond_dir)? {
                    if !is_ts_file(&path) {
                        continue;
                    }
                    let header = match TsHeader::from_file(&path) {
                        Ok(h) => h,
                        Err(err) => {
                            warn!(path = %path.display(), error = %err, "skipping unreadable time series file");
                            continue;
                        }
                    };
                    let key = TsKey::new(header.atlas, header.condition, header.subject);
                    match index.entry(key) {
                        Entry::Vacant(slot) => {
                            slot.insert(path);
                        }
                        Entry::Occupied(slot) => {
                            warn!(
                                kept = %slot.get().display(),
                                ignored = %path.display(),
                                "two time series files carry the same identity"
                            );
                        }
                    }
                }
            }
        }
        debug!(records = index.len(), "indexed time series store");
        Ok(index)
    }

    /// All statistics records of a group found on disk, sorted by subject.
    pub fn find_stats(&self, group: &GroupKey) -> Result<Vec<GraphStatsRecord>> {
        let dir = self.group_dir("stats", group);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for path in files(&dir)? {
            if !is_json_file(&path) {
                continue;
            }
            match GraphStatsRecord::from_file(&path) {
                Ok(rec) if group.matches(&rec) => records.push(rec),
                Ok(_) => {}
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable statistics record"),
            }
        }
        records.sort_by(|a, b| a.subject().cmp(b.subject()));
        Ok(records)
    }

    /// Read the statistics record of one subject, trying the compressed and
    /// uncompressed name.
    pub fn read_stats(&self, group: &GroupKey, subject: &str) -> Result<GraphStatsRecord> {
        let primary = self.stats_path(group, subject);
        let alternate = StoreLayout { compress: !self.compress, ..self.clone() }.stats_path(group, subject);
        for path in [&primary, &alternate].iter() {
            if path.is_file() {
                return GraphStatsRecord::from_file(path);
            }
        }
        Err(NeurographError::MissingData {
            what: format!("graph statistics of subject '{}'", subject),
            path: primary,
        })
    }

    /// Atlas group names that have statistics on disk.
    pub fn stats_atlases(&self) -> Result<Vec<String>> {
        dir_names(&self.out_dir.join("stats"))
    }

    /// Conditions with statistics on disk for an atlas group.
    pub fn stats_conditions(&self, atlas: &str) -> Result<Vec<String>> {
        dir_names(&self.out_dir.join("stats").join(atlas))
    }
}

fn is_ts_file(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    name.ends_with(TS_EXT) || name.ends_with(&format!("{}.gz", TS_EXT))
}

fn is_json_file(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    name.ends_with(".json") || name.ends_with(".json.gz")
}

fn sorted_entries(dir: &Path, want_dirs: bool) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() == want_dirs {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    sorted_entries(dir, true)
}

fn files(dir: &Path) -> Result<Vec<PathBuf>> {
    sorted_entries(dir, false)
}

fn dir_names(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    Ok(subdirs(dir)?
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect())
}
