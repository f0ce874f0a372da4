use std::path::{Path, PathBuf};

use serde::Serialize;

use super::network::{ModelStructure, Weights};
use crate::config::PersistParams;
use crate::error::Result;

/// Structure and weights files of one model directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelArtifacts {
    pub dir: PathBuf,
    pub struct_path: PathBuf,
    pub weights_path: PathBuf,
}

impl ModelArtifacts {
    pub fn new(dir: &Path, persist: &PersistParams) -> Self {
        ModelArtifacts {
            dir: dir.to_path_buf(),
            struct_path: dir.join(&persist.struct_file),
            weights_path: dir.join(&persist.weights_file),
        }
    }

    /// Create the model directory if needed.
    pub fn prepare(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn write_structure(&self, structure: &ModelStructure) -> Result<()> {
        write_json(&self.struct_path, structure)
    }

    pub fn read_structure(&self) -> Result<ModelStructure> {
        let text = std::fs::read_to_string(&self.struct_path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Overwrites any previous weights.
    pub fn write_weights(&self, weights: &Weights) -> Result<()> {
        write_json(&self.weights_path, weights)
    }

    pub fn read_weights(&self) -> Result<Weights> {
        let text = std::fs::read_to_string(&self.weights_path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn has_weights(&self) -> bool {
        self.weights_path.is_file()
    }
}

/// Write through a temporary sibling so a crash never leaves a torn file.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_round_trip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ModelArtifacts::new(&dir.path().join("m"), &PersistParams::default());
        artifacts.prepare().unwrap();
        assert!(!artifacts.has_weights());

        let w1 = Weights {
            tensors: vec![vec![1.0, 2.0], vec![3.0]],
        };
        artifacts.write_weights(&w1).unwrap();
        let w2 = Weights {
            tensors: vec![vec![5.0, 6.0], vec![7.0]],
        };
        artifacts.write_weights(&w2).unwrap();
        assert_eq!(artifacts.read_weights().unwrap(), w2);
        assert!(artifacts.weights_path.ends_with("ModelWeights.json"));
    }
}
