//! Utility functions used in all other neurograph modules.

use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::Path;

use byteordered::{ByteOrdered, Endian};
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{NeurographError, Result};

/// Check whether the file extension ends with ".gz".
pub fn is_gz_file<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    path.as_ref()
        .file_name()
        .map(|a| a.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false)
}

/// Open a file for buffered reading. If the file's name ends with ".gz", the stream is GZip-decoded.
pub fn open_reader<P: AsRef<Path>>(path: P) -> Result<Box<dyn Read>> {
    let gz = is_gz_file(&path);
    let file = BufReader::new(File::open(path)?);
    if gz {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Write `data` to `path`, creating parent directories. GZip-encodes if the file name ends with ".gz".
pub fn write_file_bytes<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if is_gz_file(path) {
        let mut enc = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
        enc.write_all(data)?;
        fs::write(path, enc.finish()?)?;
    } else {
        fs::write(path, data)?;
    }
    Ok(())
}

/// Serialize a record as JSON to `path`, GZip-compressed if the name ends with ".gz".
pub fn write_json<T: Serialize, P: AsRef<Path>>(path: P, record: &T) -> Result<()> {
    let bytes = serde_json::to_vec(record)?;
    write_file_bytes(path, &bytes)
}

/// Read a JSON record written by [`write_json`].
pub fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let reader = open_reader(path)?;
    Ok(serde_json::from_reader(reader)?)
}

/// Read a length-prefixed string: an i32 byte count followed by that many UTF-8 bytes.
/// Embedded '\0' chars are allowed, but not added to the returned String.
pub fn read_fixed_length_string<S, E>(input: &mut ByteOrdered<S, E>) -> Result<String>
where
    S: Read,
    E: Endian,
{
    let len = input.read_i32()?;
    if len < 0 {
        return Err(NeurographError::InvalidTsFormat {
            reason: format!("negative string length {}", len),
        });
    }
    let mut buf = Vec::with_capacity((len as usize).min(1 << 16));
    Read::by_ref(input).take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len as usize {
        return Err(NeurographError::InvalidTsFormat {
            reason: format!("string truncated after {} of {} bytes", buf.len(), len),
        });
    }
    buf.retain(|&b| b != 0);
    String::from_utf8(buf).map_err(|e| NeurographError::InvalidTsFormat {
        reason: format!("string is not valid UTF-8: {}", e),
    })
}

/// Write a length-prefixed string, the inverse of [`read_fixed_length_string`].
pub fn write_fixed_length_string<S, E>(output: &mut ByteOrdered<S, E>, value: &str) -> Result<()>
where
    S: Write,
    E: Endian,
{
    output.write_i32(value.len() as i32)?;
    output.write_all(value.as_bytes())?;
    Ok(())
}

/// Threshold weights appear in file and folder names with two decimals.
pub fn format_weight(weight: f64) -> String {
    format!("{:.2}", weight)
}

/// Glob match over the whole `text`. `*` matches any run of characters, `?` exactly one.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_ti = 0usize;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Mean of the non-NaN values, NaN if there are none.
pub fn nanmean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Serde helpers writing non-finite floats as `null` and reading `null` back as NaN.
/// JSON has no representation for NaN or infinity.
pub mod nullable {
    use ndarray::Array2;
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    fn to_opt(v: f64) -> Option<f64> {
        if v.is_finite() {
            Some(v)
        } else {
            None
        }
    }

    pub mod scalar {
        use super::*;

        pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
            to_opt(*v).serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
            Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
        }
    }

    pub mod vector {
        use super::*;

        pub fn serialize<S: Serializer>(v: &[f64], s: S) -> Result<S::Ok, S::Error> {
            let tmp: Vec<Option<f64>> = v.iter().map(|x| to_opt(*x)).collect();
            tmp.serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
            let tmp = Vec::<Option<f64>>::deserialize(d)?;
            Ok(tmp.into_iter().map(|x| x.unwrap_or(f64::NAN)).collect())
        }
    }

    pub mod matrix {
        use super::*;

        pub fn serialize<S: Serializer>(m: &Array2<f64>, s: S) -> Result<S::Ok, S::Error> {
            let rows: Vec<Vec<Option<f64>>> = m
                .outer_iter()
                .map(|row| row.iter().map(|x| to_opt(*x)).collect())
                .collect();
            rows.serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Array2<f64>, D::Error> {
            let rows = Vec::<Vec<Option<f64>>>::deserialize(d)?;
            let nrows = rows.len();
            let ncols = rows.first().map(|r| r.len()).unwrap_or(0);
            let mut flat = Vec::with_capacity(nrows * ncols);
            for (idx, row) in rows.into_iter().enumerate() {
                if row.len() != ncols {
                    return Err(D::Error::custom(format!(
                        "matrix row {} has {} columns, expected {}",
                        idx,
                        row.len(),
                        ncols
                    )));
                }
                flat.extend(row.into_iter().map(|x| x.unwrap_or(f64::NAN)));
            }
            Array2::from_shape_vec((nrows, ncols), flat).map_err(D::Error::custom)
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn gz_suffix_is_detected() {
        assert!(is_gz_file("TS_aal_rest_sub-01.ngts.gz"));
        assert!(!is_gz_file("TS_aal_rest_sub-01.ngts"));
        assert!(!is_gz_file("/some/dir.gz/file.json"));
    }

    #[test]
    fn weights_are_formatted_with_two_decimals() {
        assert_eq!("0.10", format_weight(0.1));
        assert_eq!("0.25", format_weight(0.25));
        assert_eq!("1.00", format_weight(1.0));
    }

    #[test]
    fn wildcard_patterns_match_whole_ids() {
        assert!(wildcard_match("sub-HS*", "sub-HS01"));
        assert!(wildcard_match("*HS*", "sub-HS01"));
        assert!(wildcard_match("sub-??01", "sub-SZ01"));
        assert!(!wildcard_match("HS*", "sub-HS01"));
        assert!(!wildcard_match("sub-HS?", "sub-HS01"));
        assert!(wildcard_match("*", ""));
    }

    #[test]
    fn nanmean_omits_nan() {
        assert_eq!(2.0, nanmean(&[1.0, f64::NAN, 3.0]));
        assert!(nanmean(&[f64::NAN]).is_nan());
        assert!(nanmean(&[]).is_nan());
    }

    #[test]
    fn length_prefixed_strings_can_be_written_and_read() {
        let mut buf: Vec<u8> = Vec::new();
        {
            let mut out = ByteOrdered::be(&mut buf);
            write_fixed_length_string(&mut out, "ctx-lh-insula").unwrap();
        }
        assert_eq!(4 + 13, buf.len());
        let mut input = ByteOrdered::be(&buf[..]);
        assert_eq!("ctx-lh-insula", read_fixed_length_string(&mut input).unwrap());
    }
}
