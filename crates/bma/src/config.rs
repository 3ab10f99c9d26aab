//! GPR-BMA run configuration.
use crate::dataset::DatasetColumns;
use crate::errors::{BmaError, Result};
use crate::evaluation::TieBreak;
use crate::persistence::ModelFileFormat;
use crate::scoring::{ComplexitySpec, HessianSpec};
use crate::surrogate::GpSettings;
use crate::weighting::Criterion;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// GPR-BMA run configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BmaConfig {
    /// Input table column names and candidate predictors
    pub(crate) columns: DatasetColumns,
    /// Smallest subset size
    pub(crate) min_size: usize,
    /// Largest subset size, all candidates when `None`
    pub(crate) max_size: Option<usize>,
    /// GP fitting settings shared by every model
    pub(crate) gp: GpSettings,
    /// Hessian used by the MAP criterion
    pub(crate) hessian: HessianSpec,
    /// Complexity function used by the SPBIC criterion
    pub(crate) complexity: ComplexitySpec,
    /// Best criterion tie-break
    pub(crate) tie_break: TieBreak,
    /// Worker threads, all cores when `None`
    pub(crate) n_threads: Option<usize>,
    /// Number of models listed in top models files
    pub(crate) top_n: usize,
    /// Directory where results are written
    pub(crate) outdir: PathBuf,
    /// Fitted models persistence, disabled when `None`
    pub(crate) save_models: Option<ModelFileFormat>,
    /// Average over the models finished before a cancellation instead of failing
    pub(crate) allow_partial: bool,
    /// Progress logged every `log_every` models
    pub(crate) log_every: usize,
    /// Fit a plain GPR on all candidates as a baseline
    pub(crate) gpr_baseline: bool,
    /// Column of the external baseline predictions table
    pub(crate) baseline_column: String,
}

impl Default for BmaConfig {
    fn default() -> Self {
        BmaConfig {
            columns: DatasetColumns::default(),
            min_size: 1,
            max_size: None,
            gp: GpSettings::default(),
            hessian: HessianSpec::default(),
            complexity: ComplexitySpec::default(),
            tie_break: TieBreak::default(),
            n_threads: None,
            top_n: 10,
            outdir: PathBuf::from("geobma_output"),
            save_models: None,
            allow_partial: false,
            log_every: 500,
            gpr_baseline: true,
            baseline_column: "prediction".to_string(),
        }
    }
}

impl BmaConfig {
    /// Load a JSON configuration, missing fields take default values
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        let config: BmaConfig = serde_json::from_slice(&data)?;
        config.check()?;
        Ok(config)
    }

    /// Check values that can not be enforced by the setters
    pub fn check(&self) -> Result<()> {
        self.tie_break.check()
    }

    /// Save the configuration as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Sets input table columns
    pub fn columns(mut self, columns: DatasetColumns) -> Self {
        self.columns = columns;
        self
    }

    /// Sets the response column
    pub fn response(mut self, response: &str) -> Self {
        self.columns.response = response.to_string();
        self
    }

    /// Sets candidate predictors, every numeric column when empty
    pub fn predictors(mut self, predictors: &[String]) -> Self {
        self.columns.predictors = predictors.to_vec();
        self
    }

    /// Sets smallest subset size
    pub fn min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    /// Sets largest subset size
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Sets GP fitting settings
    pub fn gp(mut self, gp: GpSettings) -> Self {
        self.gp = gp;
        self
    }

    /// Sets the Hessian of the MAP criterion
    pub fn hessian(mut self, hessian: HessianSpec) -> Self {
        self.hessian = hessian;
        self
    }

    /// Sets the complexity function of the SPBIC criterion
    pub fn complexity(mut self, complexity: ComplexitySpec) -> Self {
        self.complexity = complexity;
        self
    }

    /// Sets the best criterion tie-break
    pub fn tie_break(mut self, priority: &[Criterion], tolerance: f64) -> Self {
        self.tie_break = TieBreak {
            priority: priority.to_vec(),
            tolerance,
        };
        self
    }

    /// Sets the number of worker threads
    pub fn n_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = Some(n_threads);
        self
    }

    /// Sets the number of models listed per criterion
    pub fn top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    /// Sets the output directory
    pub fn outdir<P: AsRef<Path>>(mut self, outdir: P) -> Self {
        self.outdir = outdir.as_ref().to_path_buf();
        self
    }

    /// Enables fitted models persistence in the given format
    pub fn save_models(mut self, format: ModelFileFormat) -> Self {
        self.save_models = Some(format);
        self
    }

    /// Allows partial results on cancellation
    pub fn allow_partial(mut self, allow_partial: bool) -> Self {
        self.allow_partial = allow_partial;
        self
    }

    /// Sets the progress logging interval
    pub fn log_every(mut self, log_every: usize) -> Self {
        self.log_every = log_every.max(1);
        self
    }

    /// Enables or disables the plain GPR baseline
    pub fn gpr_baseline(mut self, gpr_baseline: bool) -> Self {
        self.gpr_baseline = gpr_baseline;
        self
    }

    /// Sets the column read from external baseline tables
    pub fn baseline_column(mut self, column: &str) -> Self {
        self.baseline_column = column.to_string();
        self
    }

    /// Input table columns
    pub fn dataset_columns(&self) -> &DatasetColumns {
        &self.columns
    }

    /// Output directory
    pub fn output_dir(&self) -> &Path {
        &self.outdir
    }

    /// Column of external baseline tables
    pub fn baseline_column_name(&self) -> &str {
        &self.baseline_column
    }

    /// Subset sizes for `n_candidates` candidates
    pub fn size_range(&self, n_candidates: usize) -> Result<std::ops::RangeInclusive<usize>> {
        let max = self.max_size.unwrap_or(n_candidates).min(n_candidates);
        if self.min_size == 0 || self.min_size > max {
            return Err(BmaError::InvalidSizeRange {
                min: self.min_size,
                max,
                n_candidates,
            });
        }
        Ok(self.min_size..=max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = BmaConfig::default()
            .response("PRICE")
            .max_size(3)
            .n_threads(2)
            .tie_break(&[Criterion::Map], 1e-6)
            .save_models(ModelFileFormat::Binary);
        assert_eq!(config.columns.response, "PRICE");
        assert_eq!(config.size_range(10).unwrap(), 1..=3);
        assert_eq!(config.size_range(2).unwrap(), 1..=2);
        assert_eq!(config.tie_break.priority, vec![Criterion::Map]);
        assert_eq!(config.save_models, Some(ModelFileFormat::Binary));
    }

    #[test]
    fn test_invalid_size_range() {
        let config = BmaConfig::default().min_size(4).max_size(2);
        assert!(matches!(
            config.size_range(10),
            Err(BmaError::InvalidSizeRange { min: 4, max: 2, .. })
        ));
        assert!(BmaConfig::default().min_size(0).size_range(3).is_err());
    }

    #[test]
    fn test_config_file() {
        let path = "target/tests/config/geobma_config.json";
        let config = BmaConfig::default().top_n(5).allow_partial(true);
        config.save(path).unwrap();
        assert_eq!(BmaConfig::from_file(path).unwrap(), config);

        let partial: BmaConfig = serde_json::from_str(r#"{"top_n": 3, "min_size": 2}"#).unwrap();
        assert_eq!(partial.top_n, 3);
        assert_eq!(partial.min_size, 2);
        assert_eq!(partial.log_every, 500);
    }

    #[test]
    fn test_negative_tie_break_tolerance() {
        let config = BmaConfig::default().tie_break(&Criterion::ALL, -1e-3);
        assert!(matches!(config.check(), Err(BmaError::Config(_))));

        let path = "target/tests/config/negative_tolerance.json";
        std::fs::create_dir_all("target/tests/config").unwrap();
        std::fs::write(
            path,
            r#"{"tie_break": {"priority": ["Map"], "tolerance": -0.5}}"#,
        )
        .unwrap();
        assert!(matches!(
            BmaConfig::from_file(path),
            Err(BmaError::Config(_))
        ));
    }
}
