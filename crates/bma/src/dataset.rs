//! Spatial observations loaded from a CSV table.

use crate::enumerate::PredictorSet;
use crate::errors::{BmaError, Result};
use crate::report::PREDICTOR_SEPARATOR;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// Column names of the input table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetColumns {
    /// Response column
    pub response: String,
    /// Latitude column
    pub latitude: String,
    /// Longitude column
    pub longitude: String,
    /// Optional row identifier column, kept for exports
    pub id: Option<String>,
    /// Candidate predictors. When empty, every numeric column which is not
    /// the response, a coordinate or the identifier is a candidate (file order)
    pub predictors: Vec<String>,
}

impl Default for DatasetColumns {
    fn default() -> Self {
        DatasetColumns {
            response: "MEDV".to_string(),
            latitude: "LAT".to_string(),
            longitude: "LON".to_string(),
            id: None,
            predictors: vec![],
        }
    }
}

impl DatasetColumns {
    fn is_reserved(&self, name: &str) -> bool {
        name == self.response
            || name == self.latitude
            || name == self.longitude
            || self.id.as_deref() == Some(name)
    }
}

/// A set of observations (census tracts): coordinates, numeric predictor columns and response.
///
/// Never modified once built.
#[derive(Clone, Debug)]
pub struct SpatialDataset {
    ids: Option<Vec<String>>,
    latitude: Array1<f64>,
    longitude: Array1<f64>,
    response: Array1<f64>,
    columns: Vec<String>,
    column_index: HashMap<String, usize>,
    features: Array2<f64>,
    candidates: Vec<String>,
}

impl SpatialDataset {
    /// Build a dataset from in-memory columns.
    /// Every numeric column is a candidate predictor.
    pub fn new(
        columns: Vec<String>,
        features: Array2<f64>,
        response: Array1<f64>,
        latitude: Array1<f64>,
        longitude: Array1<f64>,
    ) -> Result<Self> {
        let n = response.len();
        if features.nrows() != n || latitude.len() != n || longitude.len() != n {
            return Err(BmaError::Dataset(format!(
                "inconsistent row counts: features {}, response {}, latitude {}, longitude {}",
                features.nrows(),
                n,
                latitude.len(),
                longitude.len()
            )));
        }
        if features.ncols() != columns.len() {
            return Err(BmaError::Dataset(format!(
                "{} column names for {} feature columns",
                columns.len(),
                features.ncols()
            )));
        }
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect::<HashMap<_, _>>();
        if column_index.len() != columns.len() {
            return Err(BmaError::Dataset("duplicated column names".to_string()));
        }
        Ok(SpatialDataset {
            ids: None,
            latitude,
            longitude,
            response,
            candidates: columns.clone(),
            columns,
            column_index,
            features,
        })
    }

    /// Attach row identifiers
    pub fn with_ids(mut self, ids: Vec<String>) -> Result<Self> {
        if ids.len() != self.n_obs() {
            return Err(BmaError::Dataset(format!(
                "{} identifiers for {} observations",
                ids.len(),
                self.n_obs()
            )));
        }
        self.ids = Some(ids);
        Ok(self)
    }

    /// Restrict or reorder candidate predictors. Names absent from the table are kept
    /// so that subsets using them are reported as skipped.
    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Load the dataset from a CSV file with header
    pub fn from_csv<P: AsRef<Path>>(path: P, columns: &DatasetColumns) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|err| {
            BmaError::Dataset(format!("can not open {}: {err}", path.display()))
        })?;
        Self::from_reader(file, columns)
    }

    /// Load the dataset from CSV content with header
    pub fn from_reader<R: Read>(reader: R, columns: &DatasetColumns) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let header: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let records = rdr.records().collect::<std::result::Result<Vec<_>, _>>()?;
        if records.is_empty() {
            return Err(BmaError::Dataset("no observation".to_string()));
        }
        for p in columns.predictors.iter() {
            if columns.is_reserved(p) {
                return Err(BmaError::Dataset(format!(
                    "candidate predictor `{p}` is a reserved column"
                )));
            }
            if p.contains(PREDICTOR_SEPARATOR) {
                return Err(BmaError::Dataset(format!(
                    "candidate predictor `{p}` contains `{PREDICTOR_SEPARATOR}`"
                )));
            }
        }

        let position = |name: &str| header.iter().position(|h| h == name);
        let required = |name: &str| {
            position(name)
                .ok_or_else(|| BmaError::Dataset(format!("required column `{name}` not found")))
        };
        let parse_cell = |row: usize, col: usize| -> Result<f64> {
            let cell = records[row].get(col).unwrap_or("");
            cell.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    BmaError::Dataset(format!(
                        "row {}, column `{}`: `{cell}` is not a finite number",
                        row + 1,
                        header[col]
                    ))
                })
        };
        let parse_column = |col: usize| -> Result<Array1<f64>> {
            (0..records.len())
                .map(|row| parse_cell(row, col))
                .collect::<Result<Vec<_>>>()
                .map(Array1::from_vec)
        };

        let response = parse_column(required(&columns.response)?)?;
        let latitude = parse_column(required(&columns.latitude)?)?;
        let longitude = parse_column(required(&columns.longitude)?)?;
        let ids = match &columns.id {
            Some(id) => {
                let col = required(id)?;
                Some(
                    records
                        .iter()
                        .map(|r| r.get(col).unwrap_or("").to_string())
                        .collect::<Vec<_>>(),
                )
            }
            None => None,
        };

        // Explicit predictors have to be numeric, others are kept only when they are
        let mut names = vec![];
        let mut values = vec![];
        for (col, name) in header.iter().enumerate() {
            if columns.is_reserved(name) {
                continue;
            }
            if columns.predictors.contains(name) {
                values.push(parse_column(col)?);
                names.push(name.clone());
            } else if let Ok(v) = parse_column(col) {
                if name.contains(PREDICTOR_SEPARATOR) {
                    log::warn!("Column `{name}` ignored: `{PREDICTOR_SEPARATOR}` in its name");
                    continue;
                }
                values.push(v);
                names.push(name.clone());
            }
        }
        let mut features = Array2::zeros((records.len(), names.len()));
        for (mut column, v) in features.axis_iter_mut(Axis(1)).zip(values.iter()) {
            column.assign(v);
        }

        let candidates = if columns.predictors.is_empty() {
            names.clone()
        } else {
            for p in columns.predictors.iter().filter(|p| position(p).is_none()) {
                log::warn!("Candidate predictor `{p}` not found in dataset columns");
            }
            columns.predictors.clone()
        };

        let dataset = SpatialDataset::new(names, features, response, latitude, longitude)?
            .with_candidates(candidates);
        log::info!(
            "Dataset loaded: {} observations, {} candidate predictors",
            dataset.n_obs(),
            dataset.candidates().len()
        );
        match ids {
            Some(ids) => dataset.with_ids(ids),
            None => Ok(dataset),
        }
    }

    /// Number of observations
    pub fn n_obs(&self) -> usize {
        self.response.len()
    }

    /// Observed response values
    pub fn response(&self) -> &Array1<f64> {
        &self.response
    }

    /// Latitudes
    pub fn latitude(&self) -> &Array1<f64> {
        &self.latitude
    }

    /// Longitudes
    pub fn longitude(&self) -> &Array1<f64> {
        &self.longitude
    }

    /// Row identifiers if any
    pub fn ids(&self) -> Option<&[String]> {
        self.ids.as_deref()
    }

    /// Numeric columns available as predictors
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Whether the table has a numeric column with that name
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index.contains_key(name)
    }

    /// Candidate predictors to enumerate subsets from
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Feature matrix (n_obs, len(set)) restricted to the predictor set, columns in set order.
    /// Fails with `MissingPredictor` when a member is not a dataset column.
    pub fn features(&self, set: &PredictorSet) -> Result<Array2<f64>> {
        let indices = set
            .predictors()
            .iter()
            .map(|p| {
                self.column_index
                    .get(p)
                    .copied()
                    .ok_or_else(|| BmaError::MissingPredictor {
                        model: set.name(),
                        field: p.clone(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.features.select(Axis(1), &indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerate::CombinationId;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    const CSV: &str = "TRACT,LON,LAT,MEDV,CRIM,TOWN,RM\n\
                       2011,-70.95,42.25,24.0,0.006,Nahant,6.575\n\
                       2021,-70.93,42.29,21.6,0.027,Swampscott,6.421\n\
                       2022,-70.94,42.28,34.7,0.027,Swampscott,7.185\n";

    fn columns() -> DatasetColumns {
        DatasetColumns {
            id: Some("TRACT".to_string()),
            ..DatasetColumns::default()
        }
    }

    #[test]
    fn test_load_auto_candidates() {
        let ds = SpatialDataset::from_reader(CSV.as_bytes(), &columns()).unwrap();
        assert_eq!(ds.n_obs(), 3);
        // TOWN is not numeric, TRACT is the identifier
        assert_eq!(ds.candidates(), &["CRIM".to_string(), "RM".to_string()]);
        assert_eq!(ds.ids().unwrap()[1], "2021");
        assert_abs_diff_eq!(ds.response(), &array![24.0, 21.6, 34.7]);
        assert_abs_diff_eq!(ds.latitude(), &array![42.25, 42.29, 42.28]);
    }

    #[test]
    fn test_features_in_set_order() {
        let ds = SpatialDataset::from_reader(CSV.as_bytes(), &columns()).unwrap();
        let set = PredictorSet::new(
            CombinationId { size: 2, index: 1 },
            vec!["RM".to_string(), "CRIM".to_string()],
        )
        .unwrap();
        let x = ds.features(&set).unwrap();
        assert_abs_diff_eq!(x.row(0).to_owned(), array![6.575, 0.006]);
    }

    #[test]
    fn test_missing_predictor() {
        let cols = DatasetColumns {
            predictors: vec!["CRIM".to_string(), "NOX".to_string()],
            ..columns()
        };
        let ds = SpatialDataset::from_reader(CSV.as_bytes(), &cols).unwrap();
        assert_eq!(ds.candidates().len(), 2);
        let id = CombinationId { size: 1, index: 2 };
        let set = PredictorSet::new(id, vec!["NOX".to_string()]).unwrap();
        match ds.features(&set) {
            Err(BmaError::MissingPredictor { model, field }) => {
                assert_eq!(model, "m1_2");
                assert_eq!(field, "NOX");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_bad_cell() {
        let csv = "LON,LAT,MEDV,CRIM\n-70.9,42.2,24.0,abc\n";
        let cols = DatasetColumns {
            predictors: vec!["CRIM".to_string()],
            ..DatasetColumns::default()
        };
        match SpatialDataset::from_reader(csv.as_bytes(), &cols) {
            Err(BmaError::Dataset(msg)) => assert!(msg.contains("CRIM") && msg.contains("row 1")),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_reserved_column_as_predictor() {
        let cols = DatasetColumns {
            predictors: vec!["CRIM".to_string(), "LAT".to_string()],
            ..columns()
        };
        match SpatialDataset::from_reader(CSV.as_bytes(), &cols) {
            Err(BmaError::Dataset(msg)) => assert!(msg.contains("LAT")),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_separator_in_predictor_name() {
        let csv = "LON,LAT,MEDV,CRIM,A;B\n-70.9,42.2,24.0,0.1,3.0\n";
        let cols = DatasetColumns {
            predictors: vec!["A;B".to_string()],
            ..DatasetColumns::default()
        };
        assert!(matches!(
            SpatialDataset::from_reader(csv.as_bytes(), &cols),
            Err(BmaError::Dataset(_))
        ));
        let ds = SpatialDataset::from_reader(csv.as_bytes(), &DatasetColumns::default()).unwrap();
        assert_eq!(ds.candidates(), &["CRIM".to_string()]);
    }

    #[test]
    fn test_missing_response() {
        let csv = "LON,LAT,CRIM\n-70.9,42.2,0.1\n";
        assert!(matches!(
            SpatialDataset::from_reader(csv.as_bytes(), &DatasetColumns::default()),
            Err(BmaError::Dataset(_))
        ));
    }
}
