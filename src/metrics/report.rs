//! CSV tables of per-image scores

use std::fmt;
use std::io;
use std::path::Path;

use crate::error::{Error, Result};

/// One row per image: `reference,image,<metric columns...>`
#[derive(Clone, Debug)]
pub struct CsvReport {
    columns: Vec<String>,
    rows: Vec<(String, String, Vec<f64>)>,
}

impl CsvReport {
    pub fn new<S: AsRef<str>>(metric_columns: &[S]) -> Self {
        Self {
            columns: metric_columns.iter().map(|c| c.as_ref().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, reference: &str, image: &str, values: Vec<f64>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(Error::Configuration(format!(
                "row has {} values for {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        self.rows.push((reference.to_string(), image.to_string(), values));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header and rows through a `csv::Writer`
    pub fn write_to<W: io::Write>(&self, wtr: &mut csv::Writer<W>) -> csv::Result<()> {
        let header = ["reference", "image"].into_iter().chain(self.columns.iter().map(String::as_str));
        wtr.write_record(header)?;
        for (reference, image, values) in &self.rows {
            let mut record = vec![reference.clone(), image.clone()];
            record.extend(values.iter().map(|&v| number(v)));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let csv_error = |source| Error::Csv { path: path.to_path_buf(), source };
        let mut wtr = csv::Writer::from_path(path).map_err(csv_error)?;
        self.write_to(&mut wtr).map_err(csv_error)
    }
}

/// NaN is left empty
fn number(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else if v.is_infinite() {
        if v > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else {
        format!("{:?}", v)
    }
}

impl fmt::Display for CsvReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        self.write_to(&mut wtr).map_err(|_| fmt::Error)?;
        let bytes = wtr.into_inner().map_err(|_| fmt::Error)?;
        f.write_str(&String::from_utf8_lossy(&bytes))
    }
}
