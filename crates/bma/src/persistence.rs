//! Save and load predictor sets and fitted models.

use crate::enumerate::PredictorSet;
use crate::errors::{BmaError, Result};
use crate::fitting::FittedModel;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// File format of persisted fitted models
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFileFormat {
    /// Human readable format
    #[default]
    Json,
    /// Compact binary format
    Binary,
}

impl ModelFileFormat {
    /// File extension
    pub fn extension(&self) -> &'static str {
        match self {
            ModelFileFormat::Json => "json",
            ModelFileFormat::Binary => "bin",
        }
    }

    /// Format guessed from a file extension, JSON unless `.bin`
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some("bin") => ModelFileFormat::Binary,
            _ => ModelFileFormat::Json,
        }
    }
}

impl fmt::Display for ModelFileFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ModelFileFormat::Json => write!(f, "json"),
            ModelFileFormat::Binary => write!(f, "binary"),
        }
    }
}

impl FromStr for ModelFileFormat {
    type Err = BmaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ModelFileFormat::Json),
            "binary" | "bin" => Ok(ModelFileFormat::Binary),
            _ => Err(BmaError::InvalidValue(format!("unknown model file format `{s}`"))),
        }
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Save fitted models in the given file
pub fn save_models<M: Serialize, P: AsRef<Path>>(
    models: &[FittedModel<M>],
    path: P,
    format: ModelFileFormat,
) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    let bytes = match format {
        ModelFileFormat::Json => serde_json::to_vec(models)?,
        ModelFileFormat::Binary => {
            bincode::serde::encode_to_vec(models, bincode::config::standard())?
        }
    };
    let mut file = fs::File::create(path)?;
    file.write_all(&bytes)?;
    log::info!("{} fitted models saved in {}", models.len(), path.display());
    Ok(())
}

/// Load fitted models from the given file
pub fn load_models<M: DeserializeOwned, P: AsRef<Path>>(
    path: P,
    format: ModelFileFormat,
) -> Result<Vec<FittedModel<M>>> {
    let data = fs::read(path)?;
    let models = match format {
        ModelFileFormat::Json => serde_json::from_slice(&data)?,
        ModelFileFormat::Binary => {
            bincode::serde::decode_from_slice(&data, bincode::config::standard())
                .map(|(models, _)| models)?
        }
    };
    Ok(models)
}

/// Save predictor sets as JSON
pub fn save_predictor_sets<P: AsRef<Path>>(sets: &[PredictorSet], path: P) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(file, sets)?;
    Ok(())
}

/// Load predictor sets saved with [`save_predictor_sets`]
pub fn load_predictor_sets<P: AsRef<Path>>(path: P) -> Result<Vec<PredictorSet>> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerate::enumerate;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Line {
        intercept: f64,
        slope: f64,
    }

    fn fitted() -> Vec<FittedModel<Line>> {
        let candidates = vec!["CRIM".to_string(), "RM".to_string()];
        enumerate(&candidates, 1..=2)
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(i, set)| FittedModel {
                set,
                n_params: 2,
                model: Line {
                    intercept: 0.1 * i as f64,
                    slope: -1.7 / 3.,
                },
            })
            .collect()
    }

    #[test]
    fn test_save_load_binary() {
        let test_dir = "target/tests/persistence";
        let filename = format!("{test_dir}/models.bin");
        let models = fitted();
        save_models(&models, &filename, ModelFileFormat::Binary).unwrap();
        let loaded: Vec<FittedModel<Line>> =
            load_models(&filename, ModelFileFormat::from_path(&filename)).unwrap();
        assert_eq!(loaded.len(), 3);
        for (m, l) in models.iter().zip(loaded.iter()) {
            assert_eq!(m.set, l.set);
            assert_eq!(m.set.id(), l.set.id());
            assert_eq!(m.model, l.model);
        }
    }

    #[test]
    fn test_save_load_json() {
        let test_dir = "target/tests/persistence";
        let filename = format!("{test_dir}/models.json");
        save_models(&fitted(), &filename, ModelFileFormat::Json).unwrap();
        let loaded: Vec<FittedModel<Line>> = load_models(&filename, ModelFileFormat::Json).unwrap();
        assert_eq!(loaded[2].set.predictors(), ["CRIM", "RM"]);
        assert_eq!(loaded[2].n_params, 2);
    }

    #[test]
    fn test_predictor_sets() {
        let filename = "target/tests/persistence/predictor_sets.json";
        let sets = enumerate(&["A".to_string(), "B".to_string(), "C".to_string()], 1..=3).unwrap();
        save_predictor_sets(&sets, filename).unwrap();
        let loaded = load_predictor_sets(filename).unwrap();
        assert_eq!(sets, loaded);
    }

    #[test]
    fn test_format() {
        assert_eq!("Binary".parse::<ModelFileFormat>().unwrap(), ModelFileFormat::Binary);
        assert_eq!(ModelFileFormat::from_path("models.json"), ModelFileFormat::Json);
        assert!("npy".parse::<ModelFileFormat>().is_err());
    }
}
