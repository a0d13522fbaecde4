use std::path::Path;

use ndarray::Array2;
use tempfile::tempdir;

use neurograph::{
    ClassSpec, ConnType, GraphStatsRecord, NeurographError, Pipeline, PipelineConfig, RoiTimeSeries, Selection,
    StoreLayout, ThreshType,
};

// Deterministic pseudo-random samples in [-0.5, 0.5).
fn noise(seed: u64, n: usize) -> Vec<f64> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 11) as f64 / (1u64 << 53) as f64) - 0.5
        })
        .collect()
}

fn write_ts(ts_dir: &Path, atlas: &str, subject: &str, n_timepoints: usize, n_rois: usize, seed: u64) {
    let data = Array2::from_shape_vec((n_timepoints, n_rois), noise(seed, n_timepoints * n_rois)).unwrap();
    let names = (0..n_rois).map(|i| format!("{}_roi{}", atlas, i)).collect();
    let ts = RoiTimeSeries::new(atlas, "rest", subject, data, names, vec![[0.0, 1.0, 2.0]; n_rois]).unwrap();
    let path = ts_dir
        .join(atlas)
        .join("rest")
        .join(format!("TS_{}_rest_{}.ngts.gz", atlas, subject));
    ts.to_file(path).unwrap();
}

fn config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        ts_dir: root.join("ts"),
        out_dir: root.join("out"),
        thresh_type: ThreshType::Proportional,
        thresh_weights: vec![0.2, 0.3],
        // Keep signed edges so proportional counts are exact.
        neg_discard: false,
        class: Some(ClassSpec::Pattern("HS".into())),
        threads: Some(2),
        ..PipelineConfig::default()
    }
}

#[test]
fn full_run_writes_records_and_tables() {
    let dir = tempdir().unwrap();
    let ts_dir = dir.path().join("ts");
    for (i, subject) in ["sub-HS01", "sub-HS02", "sub-SZ01"].iter().enumerate() {
        write_ts(&ts_dir, "aal", subject, 40, 6, i as u64 + 1);
    }

    let cfg = config(dir.path());
    let summary = Pipeline::new(cfg.clone()).run().unwrap();
    assert_eq!(3, summary.completed);
    assert_eq!(6, summary.graphs);
    assert!(summary.skipped.is_empty());
    assert_eq!(4, summary.tables.len());

    let layout = StoreLayout::new(&cfg.ts_dir, &cfg.out_dir, false);
    assert!(layout.conn_path(ConnType::Corr, "aal", "rest", "sub-HS01").is_file());

    let table = std::fs::read_to_string(
        dir.path()
            .join("out/tables/aal/rest/graph_stats_corr_aal_rest_proportional_wei_0.20_global.csv"),
    )
    .unwrap();
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(4, lines.len());
    assert!(lines[0].starts_with("subject,class,num_nodes,num_edges"));
    assert!(lines[1].starts_with("sub-HS01,0,6,3,"));
    assert!(lines[3].starts_with("sub-SZ01,1,6,3,"));

    let stats_file = dir
        .path()
        .join("out/stats/aal/rest/0.30/graph_stats_sub-SZ01_corr_aal_proportional_wei_0.30.json");
    let record = GraphStatsRecord::from_file(stats_file).unwrap();
    // round(0.3 * 15) = 5 strongest pairs survive.
    assert_eq!(5, record.global.num_edges);
    assert_eq!(Some(true), record.normalized);
}

#[test]
fn merged_atlases_pool_rois() {
    let dir = tempdir().unwrap();
    let ts_dir = dir.path().join("ts");
    write_ts(&ts_dir, "aal", "sub-01", 30, 3, 11);
    write_ts(&ts_dir, "dk", "sub-01", 30, 2, 12);

    let cfg = PipelineConfig {
        atlases: Selection::Only(vec!["aal".into(), "dk".into()]),
        merge_atlases: true,
        binarize: true,
        thresh_weights: vec![0.5],
        class: None,
        ..config(dir.path())
    };
    let summary = Pipeline::new(cfg).run().unwrap();
    assert_eq!(1, summary.completed);

    let conn = neurograph::ConnectivityMatrix::from_file(
        dir.path().join("out/conn/aal+dk/rest/conn_mat_corr_aal+dk_rest_sub-01.json"),
    )
    .unwrap();
    assert_eq!(5, conn.n_rois());
    assert_eq!(vec!["aal", "dk"], conn.notes.atlases);
    assert_eq!("dk_roi0", conn.roi_names[3]);
}

#[test]
fn explicitly_named_subject_without_data_aborts() {
    let dir = tempdir().unwrap();
    write_ts(&dir.path().join("ts"), "aal", "sub-01", 20, 4, 3);

    let cfg = PipelineConfig {
        subjects: Selection::Only(vec!["sub-01".into(), "sub-02".into()]),
        ..config(dir.path())
    };
    let err = Pipeline::new(cfg).run().unwrap_err();
    assert!(matches!(err, NeurographError::MissingData { .. }));
}

#[test]
fn discovered_subject_with_bad_data_is_skipped() {
    let dir = tempdir().unwrap();
    let ts_dir = dir.path().join("ts");
    write_ts(&ts_dir, "aal", "sub-01", 20, 4, 5);
    // Too few time points for a correlation.
    write_ts(&ts_dir, "aal", "sub-02", 2, 4, 6);

    let summary = Pipeline::new(config(dir.path())).run().unwrap();
    assert_eq!(1, summary.completed);
    assert_eq!(1, summary.skipped.len());
    assert_eq!("sub-02", summary.skipped[0].subject);
}

#[test]
fn aggregation_alone_reuses_records_on_disk() {
    let dir = tempdir().unwrap();
    let ts_dir = dir.path().join("ts");
    write_ts(&ts_dir, "aal", "sub-HS01", 25, 5, 8);
    write_ts(&ts_dir, "aal", "sub-SZ01", 25, 5, 9);

    let cfg = config(dir.path());
    Pipeline::new(cfg.clone()).run().unwrap();
    let tables_dir = dir.path().join("out").join("tables");
    std::fs::remove_dir_all(&tables_dir).unwrap();

    let written = Pipeline::new(cfg).aggregate().unwrap();
    assert_eq!(4, written.len());
    assert!(written.iter().all(|p| p.starts_with(&tables_dir) && p.is_file()));
}

#[test]
fn invalid_configuration_is_rejected_before_processing() {
    let dir = tempdir().unwrap();
    let cfg = PipelineConfig {
        thresh_weights: vec![1.5],
        ..config(dir.path())
    };
    match Pipeline::new(cfg).run() {
        Err(NeurographError::InvalidConfig { param, .. }) => assert_eq!("thresh_weight", param),
        other => panic!("expected an invalid configuration, got {:?}", other.map(|s| s.completed)),
    }
    assert!(!dir.path().join("out").exists());
}
