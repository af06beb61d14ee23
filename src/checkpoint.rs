//! Named-parameter checkpoints.
use bincode::{config, Decode, Encode};
use ndarray::{Array, Dimension, IxDyn};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::{Error, Result};

/// Upper bound on the decoded size of a checkpoint, corrupt length prefixes
/// beyond it fail instead of allocating.
pub const MAX_CHECKPOINT_BYTES: usize = 1 << 30;

pub type StateDict = BTreeMap<String, TensorData>;

/// Serializable representation of a parameter array
#[derive(Debug, Encode, Decode, Clone, PartialEq)]
pub struct TensorData {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorData {
    pub fn from_array<D: Dimension>(a: &Array<f32, D>) -> Self {
        TensorData {
            shape: a.shape().to_vec(),
            data: a.iter().copied().collect(),
        }
    }

    /// Rebuilds the array, failing if `shape` does not fit `D` or the data length.
    pub fn to_array<D: Dimension>(&self) -> Result<Array<f32, D>> {
        let a = Array::from_shape_vec(IxDyn(&self.shape), self.data.clone())?;
        Ok(a.into_dimensionality::<D>()?)
    }

    /// Whether `data` holds exactly as many values as `shape` describes.
    pub fn is_consistent(&self) -> bool {
        self.shape.iter().product::<usize>() == self.data.len()
    }
}

/// Summary of differences between two state dicts.
///
/// `expected` is usually taken from `model.state_dict()`, and `loaded` is what
/// was deserialized from disk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StateDictDiff {
    /// Keys that exist in `expected` but are missing from `loaded`.
    pub missing_keys: Vec<String>,
    /// Keys that exist in `loaded` but not in `expected`.
    pub unexpected_keys: Vec<String>,
    /// `(key, expected_shape, loaded_shape)` for keys present in both.
    pub shape_mismatches: Vec<(String, Vec<usize>, Vec<usize>)>,
    /// Keys in `loaded` whose data length disagrees with their own shape.
    pub malformed_keys: Vec<String>,
}

impl StateDictDiff {
    pub fn is_empty(&self) -> bool {
        self.missing_keys.is_empty()
            && self.unexpected_keys.is_empty()
            && self.shape_mismatches.is_empty()
            && self.malformed_keys.is_empty()
    }
}

impl fmt::Display for StateDictDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.missing_keys.is_empty() {
            parts.push(format!("missing keys {:?}", self.missing_keys));
        }
        if !self.unexpected_keys.is_empty() {
            parts.push(format!("unexpected keys {:?}", self.unexpected_keys));
        }
        if !self.malformed_keys.is_empty() {
            parts.push(format!("malformed tensors {:?}", self.malformed_keys));
        }
        for (key, expected, loaded) in &self.shape_mismatches {
            parts.push(format!(
                "`{}` has shape {:?}, expected {:?}",
                key, loaded, expected
            ));
        }
        f.write_str(&parts.join("; "))
    }
}

/// Compute the diff between an `expected` and a `loaded` state dict.
///
/// Purely informational, nothing is mutated.
pub fn diff(expected: &StateDict, loaded: &StateDict) -> StateDictDiff {
    let mut diff = StateDictDiff::default();

    for (key, expected_td) in expected {
        match loaded.get(key) {
            None => diff.missing_keys.push(key.clone()),
            Some(loaded_td) if loaded_td.shape != expected_td.shape => {
                diff.shape_mismatches.push((
                    key.clone(),
                    expected_td.shape.clone(),
                    loaded_td.shape.clone(),
                ));
            }
            Some(loaded_td) if !loaded_td.is_consistent() => {
                diff.malformed_keys.push(key.clone());
            }
            Some(_) => {}
        }
    }

    for key in loaded.keys() {
        if !expected.contains_key(key) {
            diff.unexpected_keys.push(key.clone());
        }
    }

    diff
}

/// Fails with [`Error::Checkpoint`] unless `loaded` has exactly the keys and
/// shapes of `expected`, with every tensor holding as much data as its shape
/// requires.
pub fn expect_matching(expected: &StateDict, loaded: &StateDict) -> Result<()> {
    let diff = diff(expected, loaded);
    if diff.is_empty() {
        Ok(())
    } else {
        Err(Error::Checkpoint(diff))
    }
}

/// The entries of `state` under `prefix.`, with the prefix stripped.
pub fn sub_dict(state: &StateDict, prefix: &str) -> StateDict {
    let prefix = format!("{}.", prefix);
    state
        .iter()
        .filter_map(|(key, td)| {
            key.strip_prefix(&prefix)
                .map(|rest| (rest.to_string(), td.clone()))
        })
        .collect()
}

/// Moves every entry of `src` into `dst` as `prefix.key`.
pub fn insert_prefixed(dst: &mut StateDict, prefix: &str, src: StateDict) {
    dst.extend(
        src.into_iter()
            .map(|(key, td)| (format!("{}.{}", prefix, key), td)),
    );
}

pub fn save(state: &StateDict, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let encoded = bincode::encode_to_vec(state, config::standard())?;
    fs::write(path, encoded)?;
    info!(path = %path.display(), tensors = state.len(), "saved checkpoint");
    Ok(())
}

pub fn load(path: impl AsRef<Path>) -> Result<StateDict> {
    let path = path.as_ref();
    let buffer = fs::read(path)?;
    let config = config::standard().with_limit::<MAX_CHECKPOINT_BYTES>();
    let (state, _): (StateDict, _) = bincode::decode_from_slice(&buffer, config)?;
    info!(path = %path.display(), tensors = state.len(), "loaded checkpoint");
    Ok(state)
}

/// Fetches a pretrained checkpoint from `url` into `dest` unless `dest` already exists.
#[cfg(feature = "download")]
pub fn download(url: &str, dest: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let dest = dest.as_ref();
    if dest.exists() {
        return Ok(dest.to_path_buf());
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    info!(url, dest = %dest.display(), "downloading checkpoint");
    let bytes = reqwest::blocking::get(url)?.error_for_status()?.bytes()?;
    fs::write(dest, &bytes)?;
    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array4, Ix1, Ix4};

    fn sample() -> StateDict {
        let mut state = StateDict::new();
        state.insert(
            "weight".to_string(),
            TensorData::from_array(&Array4::<f32>::ones((2, 1, 3, 3))),
        );
        state.insert(
            "bias".to_string(),
            TensorData::from_array(&Array1::<f32>::zeros(2)),
        );
        state
    }

    #[test]
    fn diff_reports_mismatches() {
        let expected = sample();
        let mut loaded = expected.clone();
        loaded.remove("bias");
        loaded.insert(
            "extra".to_string(),
            TensorData {
                shape: vec![1],
                data: vec![0.],
            },
        );
        if let Some(td) = loaded.get_mut("weight") {
            td.shape = vec![999];
        }

        let diff = diff(&expected, &loaded);
        assert!(!diff.is_empty());
        assert_eq!(diff.missing_keys, vec!["bias".to_string()]);
        assert_eq!(diff.unexpected_keys, vec!["extra".to_string()]);
        assert_eq!(diff.shape_mismatches.len(), 1);
        assert_eq!(diff.shape_mismatches[0].0, "weight");
        assert!(expect_matching(&expected, &loaded).is_err());
        assert!(expect_matching(&expected, &expected).is_ok());
    }

    #[test]
    fn prefixes_round_through_sub_dict() {
        let mut state = StateDict::new();
        insert_prefixed(&mut state, "conv_list.3", sample());
        assert!(state.contains_key("conv_list.3.weight"));
        // `conv_list.3` must not capture `conv_list.30`
        insert_prefixed(&mut state, "conv_list.30", sample());
        assert_eq!(sub_dict(&state, "conv_list.3"), sample());
    }

    #[test]
    fn to_array_checks_dimensionality() {
        let td = &sample()["weight"];
        assert_eq!(td.to_array::<Ix4>().unwrap().dim(), (2, 1, 3, 3));
        assert!(td.to_array::<Ix1>().is_err());
    }

    #[test]
    fn save_load() {
        let path = std::env::temp_dir().join("proxinv_checkpoint_save_load.bin");
        save(&sample(), &path).unwrap();
        assert_eq!(load(&path).unwrap(), sample());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn diff_reports_malformed_tensors() {
        let expected = sample();
        let mut loaded = expected.clone();
        if let Some(td) = loaded.get_mut("weight") {
            td.data.pop();
        }
        let diff = diff(&expected, &loaded);
        assert_eq!(diff.malformed_keys, vec!["weight".to_string()]);
        assert!(diff.shape_mismatches.is_empty());
        assert!(loaded["weight"].to_array::<Ix4>().is_err());
    }

    #[test]
    fn load_rejects_oversized_length_prefix() {
        let path = std::env::temp_dir().join("proxinv_checkpoint_corrupt.bin");
        // one entry named "a" whose shape claims 2^40 elements
        let mut bytes = vec![1u8, 1, b'a', 253];
        bytes.extend_from_slice(&(1u64 << 40).to_le_bytes());
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(load(&path), Err(Error::Decode(_))));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn load_truncated_file_fails() {
        let path = std::env::temp_dir().join("proxinv_checkpoint_truncated.bin");
        let encoded = bincode::encode_to_vec(&sample(), config::standard()).unwrap();
        fs::write(&path, &encoded[..encoded.len() / 2]).unwrap();
        assert!(matches!(load(&path), Err(Error::Decode(_))));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn load_missing_file_fails() {
        let path = std::env::temp_dir().join("proxinv_checkpoint_does_not_exist.bin");
        assert!(matches!(load(&path), Err(Error::Io(_))));
    }
}
