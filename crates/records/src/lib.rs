use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// One embedded sample, keyed by its path relative to the dataset root.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmbeddingRecord {
    pub sample: String,
    #[serde(default)]
    pub label: Option<String>,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClassDistanceRecord {
    pub class: String,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MatchRecord {
    pub test_idx: usize,
    pub test_sample: String,
    pub test_label: String,
    pub distance: f64,
    pub train_idx: usize,
    pub train_sample: String,
    pub train_label: String,
}

/// Flattened result of a single (method, case, sub-case) test.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResultRecord {
    pub method: String,
    pub case_no: usize,
    pub sub_no: usize,
    pub case: String,
    pub sub: String,
    pub title: String,
    pub auc: f64,
    #[serde(default)]
    pub fpr: Vec<f64>,
    #[serde(default)]
    pub tpr: Vec<f64>,
    #[serde(default)]
    pub thresholds: Vec<f64>,
    pub class_distances: Vec<ClassDistanceRecord>,
    #[serde(default)]
    pub worst: Vec<MatchRecord>,
}

pub struct JsonlWriter<W> {
    writer: W,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut buf = serde_json::to_vec(record)?;
        buf.push(b'\n');
        self.writer.write_all(&buf)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Reads every non-blank line of `path` as a record. A missing file yields no records.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: T = serde_json::from_str(&line).with_context(|| {
            format!("invalid jsonl entry at {}:{}", path.display(), line_no + 1)
        })?;
        records.push(record);
    }
    Ok(records)
}
