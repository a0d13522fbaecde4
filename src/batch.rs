//! Batch processing of a whole time series store.
//!
//! A run plans one work unit per (atlas group, condition, subject), processes
//! the units in parallel on a rayon thread pool and finally compiles the
//! feature tables once every unit has finished.
//!
//! Units whose subject was named explicitly in the configuration must
//! succeed, and the first failure aborts the run. Units found by directory
//! scan are skipped with a warning when they fail.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::aggregate::{collect_stats, export_tables};
use crate::config::{PipelineConfig, Selection};
use crate::connectivity::build_connectivity;
use crate::error::{NeurographError, Result};
use crate::graph_stats::compute_graph_stats;
use crate::metrics::NativeMetrics;
use crate::roi_ts::read_ts;
use crate::store::{GroupKey, StoreLayout, TsKey};
use crate::threshold::{threshold_graphs, ThresholdParams};
use crate::traits::GraphMetrics;

/// One subject's data for one atlas group and condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkUnit {
    /// Atlases whose ROIs are pooled, in concatenation order.
    pub atlases: Vec<String>,
    pub condition: String,
    pub subject: String,
    /// Whether the subject was named in the configuration.
    pub explicit: bool,
}

impl WorkUnit {
    /// Atlas group name, the atlas names joined with `+`.
    pub fn group(&self) -> String {
        self.atlases.join("+")
    }
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub completed: usize,
    pub graphs: usize,
    pub skipped: Vec<WorkUnit>,
    pub tables: Vec<PathBuf>,
}

/// The connectivity → graph → statistics → table pipeline over a store.
///
/// # Examples
///
/// ```no_run
/// use neurograph::{Pipeline, PipelineConfig};
///
/// let cfg = PipelineConfig::from_file("/path/to/pipeline.json").unwrap();
/// let summary = Pipeline::new(cfg).run().unwrap();
/// println!("{} units done, {} skipped", summary.completed, summary.skipped.len());
/// ```
pub struct Pipeline<M = NativeMetrics> {
    config: PipelineConfig,
    metrics: M,
}

impl Pipeline<NativeMetrics> {
    pub fn new(config: PipelineConfig) -> Self {
        Pipeline { config, metrics: NativeMetrics }
    }
}

impl<M: GraphMetrics + Sync> Pipeline<M> {
    /// Use a custom graph measure implementation.
    pub fn with_metrics(config: PipelineConfig, metrics: M) -> Self {
        Pipeline { config, metrics }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout(&self) -> StoreLayout {
        StoreLayout::new(&self.config.ts_dir, &self.config.out_dir, self.config.compress)
    }

    fn threshold_params(&self) -> ThresholdParams {
        ThresholdParams {
            thresh_type: self.config.thresh_type,
            weights: self.config.thresh_weights.clone(),
            binarize: self.config.binarize,
            neg_discard: self.config.neg_discard,
        }
    }

    fn group_key(&self, atlas: &str, condition: &str, weight: f64) -> GroupKey {
        GroupKey {
            conn_type: self.config.conn_type,
            atlas: atlas.to_string(),
            condition: condition.to_string(),
            thresh_type: self.config.thresh_type,
            graph_type: self.config.graph_type(),
            weight,
        }
    }

    /// Work units for the selected atlases, conditions and subjects.
    ///
    /// Explicitly named atlases and conditions must exist in the store.
    pub fn plan(&self, index: &BTreeMap<TsKey, PathBuf>) -> Result<Vec<WorkUnit>> {
        let layout = self.layout();
        let atlases = select(
            "atlas",
            &self.config.atlases,
            index.keys().map(|k| k.atlas.as_str()).collect(),
            |name| layout.ts_dir.join(name),
        )?;
        let conditions = select(
            "condition",
            &self.config.conditions,
            index
                .keys()
                .filter(|k| atlases.contains(&k.atlas))
                .map(|k| k.condition.as_str())
                .collect(),
            |name| layout.ts_dir.join(name),
        )?;

        let groups: Vec<Vec<String>> = if self.config.merge_atlases {
            vec![atlases]
        } else {
            atlases.into_iter().map(|a| vec![a]).collect()
        };

        let mut units = Vec::new();
        for atlases in &groups {
            for condition in &conditions {
                let subjects: Vec<String> = match &self.config.subjects {
                    Selection::Only(names) => names.clone(),
                    Selection::All => index
                        .keys()
                        .filter(|k| &k.condition == condition && atlases.contains(&k.atlas))
                        .map(|k| k.subject.clone())
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .collect(),
                };
                for subject in subjects {
                    units.push(WorkUnit {
                        atlases: atlases.clone(),
                        condition: condition.clone(),
                        subject,
                        explicit: self.config.subjects.is_explicit(),
                    });
                }
            }
        }
        Ok(units)
    }

    /// Compute and write the connectivity matrix, graphs and statistics of one unit.
    /// Returns the number of graphs written.
    #[instrument(skip_all, fields(atlas = %unit.group(), condition = %unit.condition, subject = %unit.subject))]
    pub fn process_unit(&self, unit: &WorkUnit, index: &BTreeMap<TsKey, PathBuf>) -> Result<usize> {
        let layout = self.layout();
        let parts = unit
            .atlases
            .iter()
            .map(|atlas| {
                let key = TsKey::new(atlas.as_str(), unit.condition.as_str(), unit.subject.as_str());
                match index.get(&key) {
                    Some(path) => read_ts(path),
                    None => Err(NeurographError::MissingData {
                        what: format!("time series of subject '{}'", unit.subject),
                        path: layout.ts_path(&key),
                    }),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let group = unit.group();
        let conn = build_connectivity(&parts, self.config.conn_type)?;
        conn.to_file(layout.conn_path(self.config.conn_type, &group, &unit.condition, &unit.subject))?;

        let graphs = threshold_graphs(&conn, &self.threshold_params())?;
        for graph in &graphs {
            let key = self.group_key(&group, &unit.condition, graph.notes.thresh_weight);
            graph.to_file(layout.graph_path(&key, &unit.subject))?;
            let stats = compute_graph_stats(graph, &self.metrics, self.config.normalize_weights)?;
            stats.to_file(layout.stats_path(&key, &unit.subject))?;
        }
        debug!(graphs = graphs.len(), "unit done");
        Ok(graphs.len())
    }

    /// Run the whole pipeline: validate, plan, process all units in parallel,
    /// then write the feature tables.
    pub fn run(&self) -> Result<RunSummary> {
        self.config.validate()?;
        let layout = self.layout();
        let index = layout.index_time_series()?;
        let units = self.plan(&index)?;
        info!(units = units.len(), records = index.len(), "planned work units");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads.unwrap_or(0))
            .build()
            .map_err(|e| NeurographError::config("threads", e.to_string()))?;
        let results: Vec<Result<usize>> =
            pool.install(|| units.par_iter().map(|u| self.process_unit(u, &index)).collect());

        let mut summary = RunSummary::default();
        for (unit, res) in units.iter().zip(results) {
            match res {
                Ok(n) => {
                    summary.completed += 1;
                    summary.graphs += n;
                }
                Err(err) if unit.explicit => {
                    error!(atlas = %unit.group(), condition = %unit.condition, subject = %unit.subject, error = %err, "unit failed");
                    return Err(err);
                }
                Err(err) => {
                    warn!(atlas = %unit.group(), condition = %unit.condition, subject = %unit.subject, error = %err, "skipping unit");
                    summary.skipped.push(unit.clone());
                }
            }
        }

        let mut pairs: Vec<(String, String)> = units.iter().map(|u| (u.group(), u.condition.clone())).collect();
        pairs.dedup();
        summary.tables = self.export_groups(&layout, &pairs)?;
        info!(
            completed = summary.completed,
            skipped = summary.skipped.len(),
            tables = summary.tables.len(),
            "run finished"
        );
        Ok(summary)
    }

    /// Compile feature tables from statistics already on disk, without
    /// recomputing anything. Returns the written table paths.
    pub fn aggregate(&self) -> Result<Vec<PathBuf>> {
        self.config.validate()?;
        let layout = self.layout();
        let groups: Vec<String> = match (&self.config.atlases, self.config.merge_atlases) {
            (Selection::Only(names), true) => vec![names.join("+")],
            (Selection::Only(names), false) => names.clone(),
            (Selection::All, _) => layout.stats_atlases()?,
        };
        let mut pairs = Vec::new();
        for group in groups {
            let conditions = match &self.config.conditions {
                Selection::Only(names) => names.clone(),
                Selection::All => layout.stats_conditions(&group)?,
            };
            pairs.extend(conditions.into_iter().map(|c| (group.clone(), c)));
        }
        self.export_groups(&layout, &pairs)
    }

    fn export_groups(&self, layout: &StoreLayout, pairs: &[(String, String)]) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (atlas, condition) in pairs {
            for &weight in &self.config.thresh_weights {
                let group = self.group_key(atlas, condition, weight);
                let records = collect_stats(layout, &group, &self.config.subjects)?;
                if records.is_empty() {
                    warn!(atlas = %atlas, condition = %condition, weight, "no statistics records to aggregate");
                    continue;
                }
                written.extend(export_tables(layout, &group, &records, self.config.class.as_ref())?);
            }
        }
        Ok(written)
    }
}

// Resolve a selection against the names present in the store.
fn select<F: Fn(&str) -> PathBuf>(
    what: &str,
    selection: &Selection,
    present: BTreeSet<&str>,
    path_of: F,
) -> Result<Vec<String>> {
    match selection {
        Selection::All => Ok(present.into_iter().map(String::from).collect()),
        Selection::Only(names) => {
            for name in names {
                if !present.contains(name.as_str()) {
                    return Err(NeurographError::MissingData {
                        what: format!("{} '{}'", what, name),
                        path: path_of(name),
                    });
                }
            }
            Ok(names.clone())
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn index_of(keys: &[(&str, &str, &str)]) -> BTreeMap<TsKey, PathBuf> {
        keys.iter()
            .map(|&(a, c, s)| (TsKey::new(a, c, s), PathBuf::from(format!("/ts/{}/{}/{}.ngts", a, c, s))))
            .collect()
    }

    #[test]
    fn discovered_units_cover_every_subject() {
        let index = index_of(&[
            ("aal", "rest", "sub-02"),
            ("aal", "rest", "sub-01"),
            ("aal", "task", "sub-01"),
            ("dk", "rest", "sub-01"),
        ]);
        let units = Pipeline::new(PipelineConfig::default()).plan(&index).unwrap();
        let ids: Vec<(String, String, String)> = units
            .iter()
            .map(|u| (u.group(), u.condition.clone(), u.subject.clone()))
            .collect();
        // aal/rest has two subjects, aal/task and dk/rest one each, dk/task none.
        assert_eq!(4, units.len());
        assert_eq!(("aal".to_string(), "rest".to_string(), "sub-01".to_string()), ids[0]);
        assert!(units.iter().all(|u| !u.explicit));
    }

    #[test]
    fn merged_units_pool_atlases_in_order() {
        let index = index_of(&[("aal", "rest", "sub-01"), ("dk", "rest", "sub-01")]);
        let cfg = PipelineConfig {
            atlases: Selection::Only(vec!["dk".into(), "aal".into()]),
            merge_atlases: true,
            subjects: Selection::Only(vec!["sub-01".into()]),
            ..PipelineConfig::default()
        };
        let units = Pipeline::new(cfg).plan(&index).unwrap();
        assert_eq!(1, units.len());
        assert_eq!("dk+aal", units[0].group());
        assert!(units[0].explicit);
    }

    #[test]
    fn unknown_explicit_atlas_is_missing_data() {
        let index = index_of(&[("aal", "rest", "sub-01")]);
        let cfg = PipelineConfig {
            atlases: Selection::Only(vec!["schaefer".into()]),
            ..PipelineConfig::default()
        };
        let err = Pipeline::new(cfg).plan(&index).unwrap_err();
        assert!(err.is_missing_data());
    }
}
