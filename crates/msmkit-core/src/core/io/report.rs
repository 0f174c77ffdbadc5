use crate::core::models::msm::{AssignmentKey, Msm};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("CSV writing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("No cached results under key '{0}'")]
    MissingResults(AssignmentKey),
}

fn csv_error(path: &Path) -> impl FnOnce(csv::Error) -> ReportError + '_ {
    move |source| ReportError::Csv {
        path: path.to_string_lossy().to_string(),
        source,
    }
}

/// Writes the cached metastable-assignment table for `key` as CSV, one row
/// per macrostate, for downstream plotting.
pub fn write_assignments(msm: &Msm, key: &AssignmentKey, path: &Path) -> Result<(), ReportError> {
    let stats = msm
        .metastable_assignments
        .get(key)
        .ok_or_else(|| ReportError::MissingResults(key.clone()))?;

    let mut writer = csv::Writer::from_path(path).map_err(csv_error(path))?;
    writer
        .write_record(["state", "probability_percent", "spread_percent", "members"])
        .map_err(csv_error(path))?;
    for (state, stat) in stats.iter().enumerate() {
        writer
            .write_record([
                state.to_string(),
                stat.probability.to_string(),
                stat.spread.to_string(),
                stat.members.to_string(),
            ])
            .map_err(csv_error(path))?;
    }
    writer.flush().map_err(|e| ReportError::Csv {
        path: path.to_string_lossy().to_string(),
        source: csv::Error::from(e),
    })
}

/// Writes the cached mean-first-passage-time table for `key` as CSV, one row
/// per ordered macrostate pair.
pub fn write_passage_times(msm: &Msm, key: &AssignmentKey, path: &Path) -> Result<(), ReportError> {
    let passages = msm
        .mfpt
        .get(key)
        .ok_or_else(|| ReportError::MissingResults(key.clone()))?;

    let mut writer = csv::Writer::from_path(path).map_err(csv_error(path))?;
    writer
        .write_record(["from", "to", "mean", "std_dev", "unit"])
        .map_err(csv_error(path))?;
    for passage in passages {
        writer
            .write_record([
                passage.from.to_string(),
                passage.to.to_string(),
                passage.mean.to_string(),
                passage.std_dev.to_string(),
                passage.unit.clone(),
            ])
            .map_err(csv_error(path))?;
    }
    writer.flush().map_err(|e| ReportError::Csv {
        path: path.to_string_lossy().to_string(),
        source: csv::Error::from(e),
    })
}
