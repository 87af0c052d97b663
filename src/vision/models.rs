//! Model management for ONNX Runtime
//!
//! Resolves and verifies the EAST detector file and wraps the `ort` session
//! that runs it.

use anyhow::{bail, Context, Result};
use ndarray::{Array4, Ix4};
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::east::{EastMaps, TextDetectorModel};
use crate::config::ModelSettings;

/// Plausible size range of an EAST export (the frozen graph is ~95 MB)
const EAST_SIZE_RANGE: (u64, u64) = (1_000_000, 200_000_000);

/// Locates model files and checks their integrity
pub struct ModelStore {
    models_dir: PathBuf,
}

impl ModelStore {
    /// Store rooted at the data directory's `models/` folder
    pub fn new() -> Result<Self> {
        let data_dir = crate::config::get_data_dir()?;
        Ok(Self {
            models_dir: data_dir.join("models"),
        })
    }

    /// Create a store with a custom directory
    pub fn with_dir(models_dir: PathBuf) -> Self {
        Self { models_dir }
    }

    /// Absolute paths are used as is; relative ones are tried against the
    /// working directory, then the models directory
    pub fn resolve(&self, model: &Path) -> Result<PathBuf> {
        if model.is_absolute() {
            if model.exists() {
                return Ok(model.to_path_buf());
            }
            bail!("Model file {:?} not found", model);
        }

        if model.exists() {
            return Ok(model.to_path_buf());
        }
        let in_store = self.models_dir.join(model);
        if in_store.exists() {
            return Ok(in_store);
        }

        bail!(
            "Model file {:?} not found in the working directory or {:?}",
            model,
            self.models_dir
        )
    }

    /// Resolve then verify size and, when given, the SHA-256 checksum
    pub fn verified_path(&self, model: &Path, expected_sha256: Option<&str>) -> Result<PathBuf> {
        let path = self.resolve(model)?;

        let size = std::fs::metadata(&path)
            .with_context(|| format!("Failed to stat model {:?}", path))?
            .len();
        let (min, max) = EAST_SIZE_RANGE;
        if size < min || size > max {
            warn!("Model {:?} has unexpected size {} bytes", path, size);
        }

        if let Some(expected) = expected_sha256 {
            let hash = file_sha256(&path)?;
            if !hash.eq_ignore_ascii_case(expected.trim()) {
                bail!(
                    "Checksum mismatch for {:?}: expected {}, got {}",
                    path,
                    expected,
                    hash
                );
            }
            info!("Checksum verified for {:?}", path);
        }

        Ok(path)
    }
}

/// Hex-encoded SHA-256 of a file
pub fn file_sha256(path: &Path) -> Result<String> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_names: Vec<String> = session
            .inputs
            .iter()
            .map(|input| input.name.clone())
            .collect();

        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();

        info!(
            "Model loaded. Inputs: {:?}, Outputs: {:?}",
            input_names, output_names
        );

        Ok(Self {
            session,
            input_names,
            output_names,
        })
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

/// EAST detector backed by an ONNX export
pub struct OnnxEastModel {
    session: OnnxSession,
    input_name: String,
    score_output: String,
    geometry_output: String,
}

impl OnnxEastModel {
    pub fn new(model_path: &Path, settings: &ModelSettings) -> Result<Self> {
        let session = OnnxSession::new(model_path, settings.intra_threads)?;

        for name in [&settings.score_output, &settings.geometry_output] {
            if !session.output_names().iter().any(|o| o == name) {
                bail!(
                    "Model has no output {:?} (outputs: {:?})",
                    name,
                    session.output_names()
                );
            }
        }
        if !session.input_names().iter().any(|i| i == &settings.input_name) {
            bail!(
                "Model has no input {:?} (inputs: {:?})",
                settings.input_name,
                session.input_names()
            );
        }

        Ok(Self {
            session,
            input_name: settings.input_name.clone(),
            score_output: settings.score_output.clone(),
            geometry_output: settings.geometry_output.clone(),
        })
    }

    /// Resolve, verify and load the configured model
    pub fn load(store: &ModelStore, settings: &ModelSettings) -> Result<Self> {
        let path = store.verified_path(&settings.east_model, settings.east_sha256.as_deref())?;
        Self::new(&path, settings)
    }
}

impl TextDetectorModel for OnnxEastModel {
    fn infer(&mut self, blob: Array4<f32>) -> Result<EastMaps> {
        debug!("Running EAST on blob {:?}", blob.shape());

        let input = TensorRef::from_array_view(&blob)?;
        let (scores, geometry) = {
            let outputs = self
                .session
                .session_mut()
                .run(inputs![self.input_name.as_str() => input])
                .map_err(|e| anyhow::anyhow!("EAST inference failed: {e}"))?;

            let scores = outputs[self.score_output.as_str()]
                .try_extract_array::<f32>()?
                .into_owned()
                .into_dimensionality::<Ix4>()
                .context("Score map is not 4-dimensional")?;
            let geometry = outputs[self.geometry_output.as_str()]
                .try_extract_array::<f32>()?
                .into_owned()
                .into_dimensionality::<Ix4>()
                .context("Geometry map is not 4-dimensional")?;
            (scores, geometry)
        };

        EastMaps::new(scores, geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_resolve_from_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("east_in_store.onnx"), b"model").unwrap();

        let store = ModelStore::with_dir(dir.path().to_path_buf());
        let path = store.resolve(Path::new("east_in_store.onnx")).unwrap();
        assert_eq!(path, dir.path().join("east_in_store.onnx"));
    }

    #[test]
    fn test_resolve_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::with_dir(dir.path().to_path_buf());
        assert!(store.resolve(Path::new("no_such_model.onnx")).is_err());
        assert!(store.resolve(&dir.path().join("absent.onnx")).is_err());
    }

    #[test]
    fn test_checksum_verification() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        let store = ModelStore::with_dir(PathBuf::from("/nonexistent"));

        // SHA-256 of "abc"
        let good = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert!(store.verified_path(file.path(), Some(good)).is_ok());
        assert!(store
            .verified_path(file.path(), Some(&good.to_uppercase()))
            .is_ok());
        assert!(store.verified_path(file.path(), Some("00ff")).is_err());
        assert!(store.verified_path(file.path(), None).is_ok());
    }
}
