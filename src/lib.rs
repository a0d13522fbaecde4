//! Functional connectivity and graph-theoretic analysis of ROI time series.
//!
//! The crate turns per-subject ROI time series into connectivity matrices,
//! thresholds them into graphs, computes nodal and global graph statistics
//! and compiles row-per-subject feature tables for machine learning.
//!
//! ```no_run
//! use neurograph::{build_connectivity, compute_graph_stats, read_ts, threshold_graphs};
//! use neurograph::{ConnType, NativeMetrics, ThreshType, ThresholdParams};
//!
//! let ts = read_ts("/path/to/ts/aal/rest/TS_aal_rest_sub-01.ngts").unwrap();
//! let conn = build_connectivity(&[ts], ConnType::Corr).unwrap();
//! let params = ThresholdParams {
//!     thresh_type: ThreshType::Proportional,
//!     weights: vec![0.1],
//!     binarize: false,
//!     neg_discard: true,
//! };
//! for graph in threshold_graphs(&conn, &params).unwrap() {
//!     let stats = compute_graph_stats(&graph, &NativeMetrics, true).unwrap();
//!     println!("{}", stats);
//! }
//! ```

pub mod aggregate;
pub mod batch;
pub mod community;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod graph_stats;
pub mod linalg;
pub mod metrics;
pub mod paths;
pub mod roi_ts;
pub mod store;
pub mod threshold;
pub mod traits;
pub mod util;

pub use aggregate::{collect_stats, compile_global, compile_nodal, ClassSpec, FeatureRow, FeatureTable};
pub use batch::{Pipeline, RunSummary, WorkUnit};
pub use community::Partition;
pub use config::{ConnType, GraphType, PipelineConfig, Selection, ThreshType};
pub use connectivity::{build_connectivity, ConnNotes, ConnectivityMatrix};
pub use error::{NeurographError, Result};
pub use graph_stats::{compute_graph_stats, GlobalStats, GraphStatsRecord, NodalStats};
pub use metrics::NativeMetrics;
pub use roi_ts::{merge_time_series, read_ts, RoiTimeSeries, TsHeader};
pub use store::{GroupKey, StoreLayout, TsKey};
pub use threshold::{threshold_graph, threshold_graphs, GraphMatrix, GraphNotes, ThresholdParams};
pub use traits::GraphMetrics;
