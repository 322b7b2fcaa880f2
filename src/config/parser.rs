use crate::config::build::{build_model, CrawlModel};
use crate::config::types::ModelConfig;
use crate::config::validation::validate;
use crate::ModelError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Extension of crawl model files
const MODEL_EXTENSION: &str = "toml";

/// Path of the model file `name` in `dir`
pub fn model_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", name, MODEL_EXTENSION))
}

/// Loads the named crawl model from a models directory
///
/// # Arguments
///
/// * `dir` - Directory holding `<name>.toml` model files
/// * `name` - Model name, without extension
///
/// # Returns
///
/// * `Ok(CrawlModel)` - Loaded, validated and built model
/// * `Err(ModelError)` - Missing file, parse, validation or build failure
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sumi_tide::config::load_model;
///
/// let model = load_model(Path::new("models"), "books").unwrap();
/// println!("{} has {} phases", model.name, model.phases.len());
/// ```
pub fn load_model(dir: &Path, name: &str) -> Result<CrawlModel, ModelError> {
    let path = model_path(dir, name);
    if !path.is_file() {
        return Err(ModelError::NotFound {
            name: name.to_string(),
            dir: dir.display().to_string(),
        });
    }
    load_model_file(&path)
}

/// Loads a crawl model from a file path
///
/// The model name defaults to the file stem.
pub fn load_model_file(path: &Path) -> Result<CrawlModel, ModelError> {
    let content = std::fs::read_to_string(path)?;
    let default_name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    parse_model(&content, &default_name)
}

/// Parses, validates and builds a model from TOML text
pub fn parse_model(content: &str, default_name: &str) -> Result<CrawlModel, ModelError> {
    let config: ModelConfig = toml::from_str(content)?;
    validate(&config)?;
    build_model(config, default_name)
}

/// Computes a SHA-256 hash of the model file content
///
/// Logged at the start of a run so results can be traced to the exact model.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ModelError)` - Failed to read the file
pub fn compute_model_hash(path: &Path) -> Result<String, ModelError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads the named model and returns it with its file hash
pub fn load_model_with_hash(dir: &Path, name: &str) -> Result<(CrawlModel, String), ModelError> {
    let model = load_model(dir, name)?;
    let hash = compute_model_hash(&model_path(dir, name))?;
    Ok((model, hash))
}

/// Names of the models in `dir`, sorted
pub fn list_models(dir: &Path) -> Result<Vec<String>, ModelError> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == MODEL_EXTENSION) {
            if let Some(stem) = path.file_stem() {
                names.push(stem.to_string_lossy().into_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}
