//! Scalar metric sinks.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::Result;

/// The file metrics are appended to, inside the run directory.
pub const METRICS_FILE: &str = "metrics.jsonl";

/// Receives named scalars once per training step.
pub trait MetricsSink {
    /// Records `metrics` at `step`.
    ///
    /// # Errors
    /// Returns an `ExperimentErr` if the metrics cannot be persisted.
    fn log_metrics(&mut self, metrics: &BTreeMap<String, f32>, step: usize) -> Result<()>;
}

#[derive(Serialize)]
struct Record<'a> {
    step: usize,
    #[serde(flatten)]
    metrics: &'a BTreeMap<String, f32>,
}

/// Owns the run directory `{save_dir}/{name}` and appends one JSON object per call
/// to its `metrics.jsonl`.
pub struct ExperimentLogger {
    run_dir: PathBuf,
    writer: BufWriter<File>,
}

impl ExperimentLogger {
    /// Creates the run directory if needed and opens its metrics file for appending.
    ///
    /// # Errors
    /// Returns an `ExperimentErr` if the directory or file cannot be created.
    pub fn new<P: AsRef<Path>>(save_dir: P, name: &str) -> Result<Self> {
        let run_dir = save_dir.as_ref().join(name);
        fs::create_dir_all(&run_dir)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(run_dir.join(METRICS_FILE))?;

        Ok(Self {
            run_dir,
            writer: BufWriter::new(file),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl MetricsSink for ExperimentLogger {
    fn log_metrics(&mut self, metrics: &BTreeMap<String, f32>, step: usize) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &Record { step, metrics })?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps every record in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub records: Vec<(usize, BTreeMap<String, f32>)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsSink for MemorySink {
    fn log_metrics(&mut self, metrics: &BTreeMap<String, f32>, step: usize) -> Result<()> {
        self.records.push((step, metrics.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn logger_appends_json_lines() {
        let dir = TempDir::new().unwrap();
        let mut logger = ExperimentLogger::new(dir.path(), "run").unwrap();

        let metrics = BTreeMap::from([("loss".to_string(), 0.5), ("KLD".to_string(), -1.0)]);
        logger.log_metrics(&metrics, 0).unwrap();
        logger.log_metrics(&metrics, 1).unwrap();

        let content = fs::read_to_string(dir.path().join("run").join(METRICS_FILE)).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["step"], 1);
        assert_eq!(lines[0]["loss"], 0.5);
        assert_eq!(lines[0]["KLD"], -1.0);
        assert_eq!(logger.run_dir(), dir.path().join("run"));
    }

    #[test]
    fn memory_sink_records_in_order() {
        let mut sink = MemorySink::new();
        let metrics = BTreeMap::from([("loss".to_string(), 2.0)]);

        sink.log_metrics(&metrics, 3).unwrap();
        assert_eq!(sink.records, vec![(3, metrics)]);
    }
}
