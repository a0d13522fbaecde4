//! Connectivity matrices computed from ROI time series.
//!
//! A connectivity matrix holds one statistical association value for every
//! pair of ROIs, plus a parallel matrix of two-sided p-values. When several
//! atlases are given for one subject and condition, their ROIs are pooled
//! (see [`merge_time_series`]) before a single computation.

use std::fmt;
use std::path::Path;

use ndarray::Array2;
use ndarray_stats::CorrelationExt;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use tracing::{debug, instrument};

use crate::config::ConnType;
use crate::error::{NeurographError, Result};
use crate::linalg::inverse;
use crate::roi_ts::{merge_time_series, RoiTimeSeries};
use crate::util::{nullable, read_json, write_json};

/// Provenance of a connectivity matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnNotes {
    pub conn_type: ConnType,
    /// Atlas group name, the atlas names joined with `+` when merged.
    pub atlas: String,
    /// Source atlases in concatenation order.
    pub atlases: Vec<String>,
    pub condition: String,
    pub subject: String,
    pub n_timepoints: usize,
    /// The time series records this matrix was computed from.
    pub provenance: Vec<String>,
}

/// An N×N connectivity matrix with p-values and ROI metadata.
///
/// The diagonal is not meaningful: it holds 1.0 for `corr` and `partcorr`,
/// and +inf for `fisher` (stored as `null` in JSON and read back as NaN).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityMatrix {
    pub notes: ConnNotes,
    pub roi_names: Vec<String>,
    pub xyz: Vec<[f32; 3]>,
    #[serde(with = "nullable::matrix")]
    pub matrix: Array2<f64>,
    #[serde(with = "nullable::matrix")]
    pub pvalues: Array2<f64>,
}

impl ConnectivityMatrix {
    pub fn n_rois(&self) -> usize {
        self.roi_names.len()
    }

    /// Read a connectivity record from a JSON file (".gz" aware).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<ConnectivityMatrix> {
        let conn: ConnectivityMatrix = read_json(path)?;
        if conn.matrix.dim() != (conn.n_rois(), conn.n_rois()) {
            return Err(NeurographError::DimensionMismatch {
                context: String::from("connectivity matrix vs. ROI names"),
                expected: conn.n_rois(),
                got: conn.matrix.nrows(),
            });
        }
        Ok(conn)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json(path, self)
    }
}

impl fmt::Display for ConnectivityMatrix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} connectivity of subject '{}', condition '{}' over {} ROIs of '{}'.",
            self.notes.conn_type,
            self.notes.subject,
            self.notes.condition,
            self.n_rois(),
            self.notes.atlas
        )
    }
}

/// Compute the connectivity matrix of one subject and condition.
///
/// `parts` holds one time series per atlas. With more than one atlas the ROIs
/// are concatenated column-wise in the given order; all parts must have the
/// same number of time points.
///
/// # Examples
///
/// ```no_run
/// use neurograph::{build_connectivity, read_ts, ConnType};
///
/// let ts = read_ts("/path/to/ts/aal/rest/TS_aal_rest_sub-01.ngts").unwrap();
/// let conn = build_connectivity(&[ts], ConnType::Fisher).unwrap();
/// println!("{}", conn);
/// ```
#[instrument(skip_all, fields(conn_type = %conn_type, n_atlases = parts.len()))]
pub fn build_connectivity(parts: &[RoiTimeSeries], conn_type: ConnType) -> Result<ConnectivityMatrix> {
    let ts = merge_time_series(parts)?;

    let (matrix, pvalues) = match conn_type {
        ConnType::Corr => pearson(&ts.data)?,
        ConnType::Fisher => {
            let (r, p) = pearson(&ts.data)?;
            (fisher_transform(&r), p)
        }
        ConnType::Partcorr => partial_correlation(&ts.data)?,
    };
    debug!(subject = %ts.subject, n_rois = ts.n_rois(), "connectivity computed");

    let provenance = parts
        .iter()
        .map(|p| format!("TS_{}_{}_{}", p.atlas, p.condition, p.subject))
        .collect();

    Ok(ConnectivityMatrix {
        notes: ConnNotes {
            conn_type,
            atlas: ts.atlas.clone(),
            atlases: parts.iter().map(|p| p.atlas.clone()).collect(),
            condition: ts.condition.clone(),
            subject: ts.subject.clone(),
            n_timepoints: ts.n_timepoints(),
            provenance,
        },
        roi_names: ts.roi_names,
        xyz: ts.xyz,
        matrix,
        pvalues,
    })
}

/// Pearson correlation between the columns of a T×N matrix, with two-sided p-values
/// from Student's t distribution with `T - 2` degrees of freedom.
pub fn pearson(data: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>)> {
    let t = data.nrows();
    if t < 3 {
        return Err(NeurographError::InsufficientData {
            context: format!("correlation needs at least 3 time points, got {}", t),
        });
    }
    let mut r = data.t().pearson_correlation().map_err(|_| NeurographError::InsufficientData {
        context: String::from("empty time series"),
    })?;
    // Rounding in the covariance product can leave r slightly asymmetric.
    r = (&r + &r.t()) * 0.5;
    for i in 0..r.nrows() {
        if r[[i, i]].is_finite() {
            r[[i, i]] = 1.0;
        }
    }
    let r = r.mapv(|x| if x.is_nan() { x } else { x.max(-1.0).min(1.0) });
    let p = correlation_pvalues(&r, (t - 2) as f64)?;
    Ok((r, p))
}

/// Partial correlation between each pair of columns of a T×N matrix, controlling for all
/// other columns, computed from the inverse covariance matrix. P-values use `T - N`
/// degrees of freedom.
pub fn partial_correlation(data: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>)> {
    let (t, n) = data.dim();
    if t <= n || t < 3 {
        return Err(NeurographError::InsufficientData {
            context: format!("partial correlation of {} ROIs needs more than {} time points, got {}", n, n, t),
        });
    }
    let cov = data.t().cov(1.0).map_err(|_| NeurographError::InsufficientData {
        context: String::from("empty time series"),
    })?;
    let prec = inverse(&cov).ok_or_else(|| NeurographError::SingularMatrix {
        context: String::from("time series covariance"),
    })?;

    let mut rho = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            rho[[i, j]] = if i == j {
                1.0
            } else {
                let pij = 0.5 * (prec[[i, j]] + prec[[j, i]]);
                let v = -pij / (prec[[i, i]] * prec[[j, j]]).sqrt();
                v.max(-1.0).min(1.0)
            };
        }
    }
    let p = correlation_pvalues(&rho, (t - n) as f64)?;
    Ok((rho, p))
}

/// Element-wise Fisher z-transform. Correlations of exactly ±1 map to ±inf.
pub fn fisher_transform(r: &Array2<f64>) -> Array2<f64> {
    r.mapv(f64::atanh)
}

fn correlation_pvalues(r: &Array2<f64>, df: f64) -> Result<Array2<f64>> {
    let dist = StudentsT::new(0.0, 1.0, df)?;
    Ok(r.mapv(|x| {
        if x.is_nan() {
            return f64::NAN;
        }
        let denom = 1.0 - x * x;
        if denom <= 0.0 {
            return 0.0;
        }
        let t = x * (df / denom).sqrt();
        (2.0 * dist.cdf(-t.abs())).min(1.0)
    }))
}
