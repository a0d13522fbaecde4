//! Pipeline configuration.
//!
//! [`PipelineConfig`] holds every tunable parameter of a batch run. It can be
//! built in code with struct-update syntax or read from a JSON file with
//! [`PipelineConfig::from_file`]. Call [`PipelineConfig::validate`] before
//! processing; the batch driver does so itself.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::aggregate::ClassSpec;
use crate::error::{NeurographError, Result};
use crate::util::{format_weight, open_reader};

/// Numeric transform used to build a connectivity matrix from ROI time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnType {
    /// Pearson correlation.
    Corr,
    /// Pearson correlation followed by the Fisher z-transform (`atanh`).
    Fisher,
    /// Partial correlation controlling for all other ROIs.
    Partcorr,
}

/// Policy for turning a dense connectivity matrix into a sparse graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreshType {
    /// Keep a fraction of the strongest edges.
    Proportional,
    /// Keep edges whose magnitude reaches a fixed value.
    Absolute,
}

/// Whether graph edges keep their weights or are binarized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphType {
    #[serde(rename = "wei")]
    Weighted,
    #[serde(rename = "bin")]
    Binary,
}

impl ConnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnType::Corr => "corr",
            ConnType::Fisher => "fisher",
            ConnType::Partcorr => "partcorr",
        }
    }
}

impl ThreshType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreshType::Proportional => "proportional",
            ThreshType::Absolute => "absolute",
        }
    }
}

impl GraphType {
    /// The short tag used in file names, `wei` or `bin`.
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphType::Weighted => "wei",
            GraphType::Binary => "bin",
        }
    }

    pub fn from_binarize(binarize: bool) -> GraphType {
        if binarize {
            GraphType::Binary
        } else {
            GraphType::Weighted
        }
    }

    pub fn is_binary(&self) -> bool {
        *self == GraphType::Binary
    }
}

impl FromStr for ConnType {
    type Err = NeurographError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "corr" => Ok(ConnType::Corr),
            "fisher" => Ok(ConnType::Fisher),
            "partcorr" => Ok(ConnType::Partcorr),
            other => Err(NeurographError::config(
                "conn_type",
                format!("unknown connectivity type '{}' (expected corr, fisher or partcorr)", other),
            )),
        }
    }
}

impl FromStr for ThreshType {
    type Err = NeurographError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "proportional" => Ok(ThreshType::Proportional),
            "absolute" => Ok(ThreshType::Absolute),
            other => Err(NeurographError::config(
                "thresh_type",
                format!("unknown threshold type '{}' (expected proportional or absolute)", other),
            )),
        }
    }
}

impl FromStr for GraphType {
    type Err = NeurographError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "wei" | "weighted" => Ok(GraphType::Weighted),
            "bin" | "binary" => Ok(GraphType::Binary),
            other => Err(NeurographError::config(
                "graph_type",
                format!("unknown graph type '{}' (expected wei or bin)", other),
            )),
        }
    }
}

impl fmt::Display for ConnType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ThreshType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for GraphType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which atlases, conditions or subjects to process.
///
/// `All` discovers entries by directory scan and is lenient: units with
/// missing data are skipped with a warning. `Only` names entries explicitly
/// and is strict: missing data aborts the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Only(Vec<String>),
}

impl Selection {
    pub fn is_explicit(&self) -> bool {
        matches!(self, Selection::Only(_))
    }

    pub fn contains(&self, name: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(names) => names.iter().any(|n| n == name),
        }
    }
}

impl Default for Selection {
    fn default() -> Self {
        Selection::All
    }
}

impl From<Option<Vec<String>>> for Selection {
    fn from(names: Option<Vec<String>>) -> Self {
        match names {
            Some(names) => Selection::Only(names),
            None => Selection::All,
        }
    }
}

// In JSON a selection is either the string "all" or a list of names.
impl Serialize for Selection {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Selection::All => s.serialize_str("all"),
            Selection::Only(names) => names.serialize(s),
        }
    }
}

impl<'de> Deserialize<'de> for Selection {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Keyword(String),
            Names(Vec<String>),
        }
        match Raw::deserialize(d)? {
            Raw::Keyword(k) if k == "all" => Ok(Selection::All),
            Raw::Keyword(k) => Ok(Selection::Only(vec![k])),
            Raw::Names(names) => Ok(Selection::Only(names)),
        }
    }
}

/// Configuration for a full connectivity → graph → statistics → table run.
///
/// ```
/// use neurograph::{PipelineConfig, ThreshType};
///
/// let cfg = PipelineConfig {
///     thresh_type: ThreshType::Absolute,
///     thresh_weights: vec![0.3, 0.4],
///     ..PipelineConfig::default()
/// };
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory of the time series store (`<atlas>/<condition>/TS_*.ngts`).
    pub ts_dir: PathBuf,

    /// Root directory for connectivity matrices, graphs, statistics and tables.
    pub out_dir: PathBuf,

    /// Atlases to process. Default: all atlases found under `ts_dir`.
    pub atlases: Selection,

    /// Conditions to process. Default: all found.
    pub conditions: Selection,

    /// Subjects to process. Default: all found. Naming subjects makes missing data fatal.
    pub subjects: Selection,

    /// Concatenate the ROIs of all selected atlases into one network per subject/condition.
    ///
    /// Default: `false`.
    pub merge_atlases: bool,

    /// Default: `ConnType::Corr`.
    pub conn_type: ConnType,

    /// Default: `ThreshType::Proportional`.
    pub thresh_type: ThreshType,

    /// Threshold weights, each producing an independent graph.
    ///
    /// Fractions in `(0, 1]` for proportional thresholding, magnitudes `>= 0`
    /// for absolute thresholding. There is no default for absolute
    /// thresholding: the list must be given.
    ///
    /// Default: `[0.1, 0.15, 0.2, 0.25, 0.3]`.
    pub thresh_weights: Vec<f64>,

    /// Set all surviving edges to 1. Default: `false`.
    pub binarize: bool,

    /// Zero negative edges after thresholding. Default: `true`.
    pub neg_discard: bool,

    /// Scale weighted graphs by their largest magnitude before computing
    /// statistics, so weights lie in `[0, 1]`. Ignored for binary graphs.
    ///
    /// Default: `true`.
    pub normalize_weights: bool,

    /// Optional class labelling of the exported feature tables.
    pub class: Option<ClassSpec>,

    /// Write records GZip-compressed (`.json.gz`). Default: `false`.
    pub compress: bool,

    /// Worker threads for per-subject processing. Default: all cores.
    pub threads: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ts_dir: PathBuf::from("ts"),
            out_dir: PathBuf::from("out"),
            atlases: Selection::All,
            conditions: Selection::All,
            subjects: Selection::All,
            merge_atlases: false,
            conn_type: ConnType::Corr,
            thresh_type: ThreshType::Proportional,
            thresh_weights: vec![0.1, 0.15, 0.2, 0.25, 0.3],
            binarize: false,
            neg_discard: true,
            normalize_weights: true,
            class: None,
            compress: false,
            threads: None,
        }
    }
}

impl PipelineConfig {
    /// Read a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
        let reader = open_reader(path)?;
        let cfg: PipelineConfig = serde_json::from_reader(reader)?;
        Ok(cfg)
    }

    pub fn graph_type(&self) -> GraphType {
        GraphType::from_binarize(self.binarize)
    }

    /// Check every parameter, failing with an error that names the first offending one.
    pub fn validate(&self) -> Result<()> {
        validate_weights(self.thresh_type, &self.thresh_weights)?;
        validate_weight_labels(&self.thresh_weights)?;
        validate_selection("atlases", &self.atlases)?;
        validate_selection("conditions", &self.conditions)?;
        validate_selection("subjects", &self.subjects)?;
        if self.merge_atlases {
            if let Selection::Only(names) = &self.atlases {
                if names.len() < 2 {
                    return Err(NeurographError::config(
                        "merge_atlases",
                        "merging needs at least two atlases",
                    ));
                }
            }
        }
        if let Some(threads) = self.threads {
            if threads == 0 {
                return Err(NeurographError::config("threads", "must be at least 1"));
            }
        }
        if let Some(class) = &self.class {
            class.validate()?;
        }
        Ok(())
    }
}

/// Check a list of threshold weights against the threshold type.
pub fn validate_weights(thresh_type: ThreshType, weights: &[f64]) -> Result<()> {
    if weights.is_empty() {
        return Err(NeurographError::config(
            "thresh_weight",
            "at least one threshold weight is required",
        ));
    }
    for &w in weights {
        validate_weight(thresh_type, w)?;
    }
    Ok(())
}

/// Check that no two weights share the label used in output paths.
pub fn validate_weight_labels(weights: &[f64]) -> Result<()> {
    let mut labels = HashSet::new();
    for &w in weights {
        let label = format_weight(w);
        if !labels.insert(label.clone()) {
            return Err(NeurographError::config(
                "thresh_weight",
                format!("weight {} collides with another weight labelled {}", w, label),
            ));
        }
    }
    Ok(())
}

pub(crate) fn validate_weight(thresh_type: ThreshType, w: f64) -> Result<()> {
    let ok = match thresh_type {
        ThreshType::Proportional => w > 0.0 && w <= 1.0,
        ThreshType::Absolute => w.is_finite() && w >= 0.0,
    };
    if ok {
        Ok(())
    } else {
        let range = match thresh_type {
            ThreshType::Proportional => "(0, 1]",
            ThreshType::Absolute => "[0, inf)",
        };
        Err(NeurographError::config(
            "thresh_weight",
            format!("{} is outside {} for {} thresholding", w, range, thresh_type),
        ))
    }
}

// Names end up in directory and file names.
fn validate_selection(param: &str, sel: &Selection) -> Result<()> {
    if let Selection::Only(names) = sel {
        if names.is_empty() {
            return Err(NeurographError::config(param, "explicit selection is empty"));
        }
        for name in names {
            if name.is_empty() || name.contains(|c| c == '/' || c == '\\') || name == "." || name == ".." {
                return Err(NeurographError::config(param, format!("malformed name '{}'", name)));
            }
        }
    }
    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn enums_parse_from_their_names() {
        assert_eq!(ConnType::Fisher, "fisher".parse::<ConnType>().unwrap());
        assert_eq!(ThreshType::Absolute, "absolute".parse::<ThreshType>().unwrap());
        assert_eq!(GraphType::Binary, "bin".parse::<GraphType>().unwrap());
        assert_eq!("wei", GraphType::Weighted.to_string());
    }

    #[test]
    fn unknown_enum_values_name_the_parameter() {
        let err = "pearson".parse::<ConnType>().unwrap_err();
        match err {
            NeurographError::InvalidConfig { param, .. } => assert_eq!("conn_type", param),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn proportional_weights_must_be_fractions() {
        assert!(validate_weights(ThreshType::Proportional, &[0.1, 1.0]).is_ok());
        assert!(validate_weights(ThreshType::Proportional, &[0.0]).is_err());
        assert!(validate_weights(ThreshType::Proportional, &[1.5]).is_err());
        assert!(validate_weights(ThreshType::Absolute, &[1.5]).is_ok());
        assert!(validate_weights(ThreshType::Absolute, &[-0.1]).is_err());
        assert!(validate_weights(ThreshType::Absolute, &[]).is_err());
    }

    #[test]
    fn weights_sharing_a_label_are_rejected() {
        // Both format as 0.10 and would write to the same paths.
        let cfg = PipelineConfig {
            thresh_weights: vec![0.101, 0.104],
            ..PipelineConfig::default()
        };
        match cfg.validate() {
            Err(NeurographError::InvalidConfig { param, .. }) => assert_eq!("thresh_weight", param),
            other => panic!("expected an invalid configuration, got {:?}", other),
        }
        assert!(validate_weight_labels(&[0.1, 0.1]).is_err());
        assert!(validate_weight_labels(&[0.1, 0.11]).is_ok());
        // In-memory thresholding may still repeat a weight.
        assert!(validate_weights(ThreshType::Proportional, &[0.3, 0.3]).is_ok());
    }

    #[test]
    fn config_is_read_from_json_with_defaults() {
        let json = r#"{
            "ts_dir": "/data/ts",
            "subjects": ["sub-01", "sub-02"],
            "conn_type": "partcorr",
            "thresh_type": "absolute",
            "thresh_weights": [0.3],
            "class": { "pattern": "HS" }
        }"#;
        let cfg: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(PathBuf::from("/data/ts"), cfg.ts_dir);
        assert_eq!(Selection::All, cfg.atlases);
        assert_eq!(Selection::Only(vec!["sub-01".into(), "sub-02".into()]), cfg.subjects);
        assert_eq!(ConnType::Partcorr, cfg.conn_type);
        assert!(cfg.neg_discard);
        assert_eq!(Some(ClassSpec::Pattern("HS".into())), cfg.class);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn merge_with_a_single_named_atlas_is_rejected() {
        let cfg = PipelineConfig {
            atlases: Selection::Only(vec!["aal".into()]),
            merge_atlases: true,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
