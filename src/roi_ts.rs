//! ROI time series and their binary 'ngts' file format.
//!
//! A time series record holds one T×N matrix (rows are time points, columns
//! are ROIs) for a single (atlas, condition, subject), together with the ROI
//! names and centroid coordinates. Files are big-endian; a file whose name
//! ends with ".gz" is GZip-compressed.

use std::collections::HashSet;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use byteordered::ByteOrdered;
use ndarray::{s, Array2};

use crate::error::{NeurographError, Result};
use crate::util::{open_reader, read_fixed_length_string, write_file_bytes, write_fixed_length_string};

pub const NGTS_MAGIC: [u8; 4] = *b"NGTS";
pub const NGTS_VERSION: i32 = 1;

/// Upper bound on capacity reserved from header counts before any data is read.
const MAX_PREALLOC: usize = 1 << 16;

/// Identity and shape of a time series file, readable without the data block.
#[derive(Debug, Clone, PartialEq)]
pub struct TsHeader {
    pub version: i32,
    pub n_timepoints: i32,
    pub n_rois: i32,
    pub atlas: String,
    pub condition: String,
    pub subject: String,
}

impl TsHeader {
    /// Read a time series header from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<TsHeader> {
        let mut input = open_reader(path)?;
        TsHeader::from_reader(&mut input)
    }

    /// Read a time series header from the given byte stream.
    /// It is assumed that the input is currently at the start of the file.
    pub fn from_reader<S>(input: &mut S) -> Result<TsHeader>
    where
        S: Read,
    {
        let mut input = ByteOrdered::be(input);

        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if magic != NGTS_MAGIC {
            return Err(NeurographError::InvalidTsFormat {
                reason: String::from("wrong magic bytes"),
            });
        }

        let version = input.read_i32()?;
        if version != NGTS_VERSION {
            return Err(NeurographError::UnsupportedTsVersion { version });
        }

        let n_timepoints = input.read_i32()?;
        let n_rois = input.read_i32()?;
        if n_timepoints < 0 || n_rois < 0 {
            return Err(NeurographError::InvalidTsFormat {
                reason: format!("negative dimensions {}x{}", n_timepoints, n_rois),
            });
        }

        let atlas = read_fixed_length_string(&mut input)?;
        let condition = read_fixed_length_string(&mut input)?;
        let subject = read_fixed_length_string(&mut input)?;

        Ok(TsHeader { version, n_timepoints, n_rois, atlas, condition, subject })
    }
}

/// Weighted ROI time series of one subject in one condition, parcellated with one atlas.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiTimeSeries {
    pub atlas: String,
    pub condition: String,
    pub subject: String,
    /// T×N, rows are time points.
    pub data: Array2<f64>,
    pub roi_names: Vec<String>,
    pub xyz: Vec<[f32; 3]>,
}

impl RoiTimeSeries {
    /// Create a time series record, checking that the ROI metadata matches the data columns
    /// and that ROI names are unique.
    pub fn new(
        atlas: &str,
        condition: &str,
        subject: &str,
        data: Array2<f64>,
        roi_names: Vec<String>,
        xyz: Vec<[f32; 3]>,
    ) -> Result<RoiTimeSeries> {
        if roi_names.len() != data.ncols() {
            return Err(NeurographError::DimensionMismatch {
                context: format!("ROI names of atlas '{}'", atlas),
                expected: data.ncols(),
                got: roi_names.len(),
            });
        }
        if xyz.len() != data.ncols() {
            return Err(NeurographError::DimensionMismatch {
                context: format!("ROI coordinates of atlas '{}'", atlas),
                expected: data.ncols(),
                got: xyz.len(),
            });
        }
        let mut seen = HashSet::with_capacity(roi_names.len());
        for name in &roi_names {
            if !seen.insert(name.as_str()) {
                return Err(NeurographError::DuplicateRoi {
                    atlas: atlas.to_string(),
                    name: name.clone(),
                });
            }
        }
        Ok(RoiTimeSeries {
            atlas: atlas.to_string(),
            condition: condition.to_string(),
            subject: subject.to_string(),
            data,
            roi_names,
            xyz,
        })
    }

    pub fn n_timepoints(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_rois(&self) -> usize {
        self.data.ncols()
    }

    /// Read a time series record from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<RoiTimeSeries> {
        let mut input = open_reader(path)?;
        RoiTimeSeries::from_reader(&mut input)
    }

    /// Read a time series record from the given byte stream, header first.
    pub fn from_reader<S>(input: &mut S) -> Result<RoiTimeSeries>
    where
        S: Read,
    {
        let hdr = TsHeader::from_reader(input)?;
        let mut input = ByteOrdered::be(input);

        let n_rois = hdr.n_rois as usize;
        let n_timepoints = hdr.n_timepoints as usize;
        let n_values = n_timepoints.checked_mul(n_rois).ok_or_else(|| NeurographError::InvalidTsFormat {
            reason: format!("{} time points x {} ROIs overflows", n_timepoints, n_rois),
        })?;

        // Header dimensions are untrusted until the payload has actually been read.
        let mut roi_names: Vec<String> = Vec::with_capacity(n_rois.min(MAX_PREALLOC));
        let mut xyz: Vec<[f32; 3]> = Vec::with_capacity(n_rois.min(MAX_PREALLOC));
        for _ in 0..n_rois {
            roi_names.push(read_fixed_length_string(&mut input)?);
            let mut c = [0f32; 3];
            for v in &mut c {
                *v = input.read_f32()?;
            }
            xyz.push(c);
        }

        let mut values: Vec<f64> = Vec::with_capacity(n_values.min(MAX_PREALLOC));
        for _ in 0..n_values {
            values.push(input.read_f64()?);
        }
        let data = Array2::from_shape_vec((n_timepoints, n_rois), values).map_err(|e| {
            NeurographError::InvalidTsFormat { reason: e.to_string() }
        })?;

        RoiTimeSeries::new(&hdr.atlas, &hdr.condition, &hdr.subject, data, roi_names, xyz)
    }

    /// Serialize to the given byte sink.
    pub fn to_writer<W>(&self, output: &mut W) -> Result<()>
    where
        W: Write,
    {
        let mut output = ByteOrdered::be(output);
        output.write_all(&NGTS_MAGIC)?;
        output.write_i32(NGTS_VERSION)?;
        output.write_i32(self.n_timepoints() as i32)?;
        output.write_i32(self.n_rois() as i32)?;
        write_fixed_length_string(&mut output, &self.atlas)?;
        write_fixed_length_string(&mut output, &self.condition)?;
        write_fixed_length_string(&mut output, &self.subject)?;
        for (name, c) in self.roi_names.iter().zip(self.xyz.iter()) {
            write_fixed_length_string(&mut output, name)?;
            for v in c {
                output.write_f32(*v)?;
            }
        }
        for v in self.data.iter() {
            output.write_f64(*v)?;
        }
        Ok(())
    }

    /// Write to a file, GZip-compressed if the name ends with ".gz".
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut buf: Vec<u8> = Vec::with_capacity(self.data.len() * 8 + 64 * self.n_rois());
        self.to_writer(&mut buf)?;
        write_file_bytes(path, &buf)
    }
}

impl fmt::Display for RoiTimeSeries {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Time series of subject '{}', condition '{}': {} time points for {} ROIs of atlas '{}'.",
            self.subject,
            self.condition,
            self.n_timepoints(),
            self.n_rois(),
            self.atlas
        )
    }
}

/// Read a time series record from a file.
///
/// # Examples
///
/// ```no_run
/// let ts = neurograph::read_ts("/path/to/ts/aal/rest/TS_aal_rest_sub-01.ngts").unwrap();
/// println!("{} ROIs, {} time points", ts.n_rois(), ts.n_timepoints());
/// ```
pub fn read_ts<P: AsRef<Path>>(path: P) -> Result<RoiTimeSeries> {
    RoiTimeSeries::from_file(path)
}

/// Concatenate the ROIs of several atlases column-wise, in the given order.
///
/// All inputs must belong to the same subject and condition and have the same
/// number of time points. The resulting atlas name joins the atlas names with `+`.
/// ROI names that occur in more than one atlas are prefixed with their atlas name.
pub fn merge_time_series(parts: &[RoiTimeSeries]) -> Result<RoiTimeSeries> {
    let first = parts.first().ok_or_else(|| NeurographError::InsufficientData {
        context: String::from("no time series to merge"),
    })?;
    if parts.len() == 1 {
        return Ok(first.clone());
    }

    for p in &parts[1..] {
        if p.subject != first.subject || p.condition != first.condition {
            return Err(NeurographError::IdentityMismatch {
                context: format!(
                    "cannot merge {}/{} with {}/{}",
                    first.subject, first.condition, p.subject, p.condition
                ),
            });
        }
        if p.n_timepoints() != first.n_timepoints() {
            return Err(NeurographError::DimensionMismatch {
                context: format!("time points of atlas '{}' merged with '{}'", p.atlas, first.atlas),
                expected: first.n_timepoints(),
                got: p.n_timepoints(),
            });
        }
    }

    let n_total: usize = parts.iter().map(|p| p.n_rois()).sum();
    let mut data = Array2::<f64>::zeros((first.n_timepoints(), n_total));
    let mut offset = 0;
    for p in parts {
        data.slice_mut(s![.., offset..offset + p.n_rois()]).assign(&p.data);
        offset += p.n_rois();
    }
    // Names shared by several atlases are qualified as `<atlas>:<name>`.
    let mut seen: HashSet<&str> = HashSet::new();
    let mut shared: HashSet<&str> = HashSet::new();
    for p in parts {
        for name in &p.roi_names {
            if !seen.insert(name.as_str()) {
                shared.insert(name.as_str());
            }
        }
    }
    let roi_names: Vec<String> = parts
        .iter()
        .flat_map(|p| {
            let shared = &shared;
            p.roi_names.iter().map(move |name| {
                if shared.contains(name.as_str()) {
                    format!("{}:{}", p.atlas, name)
                } else {
                    name.clone()
                }
            })
        })
        .collect();
    let xyz: Vec<[f32; 3]> = parts.iter().flat_map(|p| p.xyz.iter().copied()).collect();
    let atlas = parts.iter().map(|p| p.atlas.as_str()).collect::<Vec<_>>().join("+");

    RoiTimeSeries::new(&atlas, &first.condition, &first.subject, data, roi_names, xyz)
}


#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    fn names(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn metadata_must_match_the_columns() {
        let data = Array2::<f64>::zeros((10, 3));
        let err = RoiTimeSeries::new("aal", "rest", "sub-01", data, names("r", 2), vec![[0.0; 3]; 3]);
        assert!(matches!(err, Err(NeurographError::DimensionMismatch { .. })));
    }

    #[test]
    fn duplicate_roi_names_are_rejected() {
        let data = Array2::<f64>::zeros((10, 2));
        let roi_names = vec![String::from("insula"), String::from("insula")];
        let err = RoiTimeSeries::new("aal", "rest", "sub-01", data, roi_names, vec![[0.0; 3]; 2]);
        assert!(matches!(err, Err(NeurographError::DuplicateRoi { .. })));
    }

    #[test]
    fn a_record_survives_the_binary_format() {
        let data = array![[1.0, 2.0], [3.0, 4.5], [-1.0, 0.25]];
        let ts = RoiTimeSeries::new("aal", "rest", "sub-01", data, names("r", 2), vec![[1.0, 2.0, 3.0], [-4.0, 5.5, 6.0]])
            .unwrap();
        let mut buf: Vec<u8> = Vec::new();
        ts.to_writer(&mut buf).unwrap();

        let hdr = TsHeader::from_reader(&mut &buf[..]).unwrap();
        assert_eq!(3, hdr.n_timepoints);
        assert_eq!(2, hdr.n_rois);
        assert_eq!("sub-01", hdr.subject);

        let back = RoiTimeSeries::from_reader(&mut &buf[..]).unwrap();
        assert_eq!(ts, back);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let buf = b"NOPE\0\0\0\x01".to_vec();
        let err = TsHeader::from_reader(&mut &buf[..]);
        assert!(matches!(err, Err(NeurographError::InvalidTsFormat { .. })));
    }

    #[test]
    fn merging_concatenates_columns_in_atlas_order() {
        let a = RoiTimeSeries::new("aal", "rest", "sub-01", Array2::zeros((20, 3)), names("a", 3), vec![[0.0; 3]; 3])
            .unwrap();
        let b = RoiTimeSeries::new("hoa", "rest", "sub-01", Array2::ones((20, 2)), names("b", 2), vec![[1.0; 3]; 2])
            .unwrap();
        let merged = merge_time_series(&[a, b]).unwrap();
        assert_eq!(5, merged.n_rois());
        assert_eq!("aal+hoa", merged.atlas);
        assert_eq!(vec!["a0", "a1", "a2", "b0", "b1"], merged.roi_names);
        assert_eq!(1.0, merged.data[[0, 4]]);
        assert_eq!(0.0, merged.data[[0, 2]]);
    }

    #[test]
    fn merging_requires_equal_time_point_counts() {
        let a = RoiTimeSeries::new("aal", "rest", "sub-01", Array2::zeros((20, 3)), names("a", 3), vec![[0.0; 3]; 3])
            .unwrap();
        let b = RoiTimeSeries::new("hoa", "rest", "sub-01", Array2::zeros((19, 2)), names("b", 2), vec![[0.0; 3]; 2])
            .unwrap();
        let err = merge_time_series(&[a, b]);
        assert!(matches!(err, Err(NeurographError::DimensionMismatch { expected: 20, got: 19, .. })));
    }

    #[test]
    fn atlases_sharing_roi_names_merge_with_qualified_names() {
        let roi_names = vec![String::from("Region_1"), String::from("Region_2")];
        let a = RoiTimeSeries::new("aal", "rest", "sub-01", Array2::zeros((20, 2)), roi_names.clone(), vec![[0.0; 3]; 2])
            .unwrap();
        let b_names = vec![String::from("Region_1"), String::from("Region_2"), String::from("Region_3")];
        let b = RoiTimeSeries::new("hoa", "rest", "sub-01", Array2::ones((20, 3)), b_names, vec![[0.0; 3]; 3])
            .unwrap();
        let merged = merge_time_series(&[a, b]).unwrap();
        assert_eq!("aal+hoa", merged.atlas);
        assert_eq!(
            vec!["aal:Region_1", "aal:Region_2", "hoa:Region_1", "hoa:Region_2", "Region_3"],
            merged.roi_names
        );
        assert_eq!(1.0, merged.data[[0, 2]]);
    }

    #[test]
    fn oversized_header_dimensions_fail_without_allocating() {
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(&NGTS_MAGIC);
        buf.extend_from_slice(&NGTS_VERSION.to_be_bytes());
        buf.extend_from_slice(&i32::MAX.to_be_bytes());
        buf.extend_from_slice(&i32::MAX.to_be_bytes());
        for s in ["aal", "rest", "sub-01"] {
            buf.extend_from_slice(&(s.len() as i32).to_be_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        // One ROI name claiming 2 GiB, then end of stream.
        buf.extend_from_slice(&i32::MAX.to_be_bytes());
        buf.extend_from_slice(b"Reg");

        let hdr = TsHeader::from_reader(&mut &buf[..]).unwrap();
        assert_eq!(i32::MAX, hdr.n_rois);
        assert!(RoiTimeSeries::from_reader(&mut &buf[..]).is_err());
    }
}
