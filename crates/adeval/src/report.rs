use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use adeval_core::{summarize, Benchmark, ResultStore, Summary};
use adeval_records::{read_jsonl, JsonlWriter, ResultRecord};
use anyhow::{anyhow, Context, Result};
use tracing::info;

pub const RESULTS_FILE: &str = "results.jsonl";
pub const SUMMARY_FILE: &str = "summary.json";

/// Rebuilds the summary from a results file and prints it.
pub fn run(results: &Path, out: Option<&Path>) -> Result<()> {
    let summary = summarize_file(results)?;
    print!("{}", summary.render());
    if let Some(out) = out {
        write_summary(&summary, out)?;
    }
    Ok(())
}

pub fn summarize_file(results: &Path) -> Result<Summary> {
    if !results.is_file() {
        return Err(anyhow!("results file {} not found", results.display()));
    }
    let records: Vec<ResultRecord> = read_jsonl(results)?;
    info!(records = records.len(), path = %results.display(), "loaded results");
    let store = ResultStore::from_records(&records)?;
    Ok(summarize(&store)?)
}

/// One JSON line per stored result, methods in insertion order.
pub fn write_results(bench: &Benchmark, path: &Path) -> Result<usize> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = JsonlWriter::new(BufWriter::new(file));
    let mut written = 0;
    for (method, table) in bench.results().tables() {
        for (case_no, sub_no, result) in table.filled() {
            let case = bench.case(case_no).unwrap_or_default();
            let sub = bench.sub(case_no, sub_no).unwrap_or_default();
            writer.write_record(&result.to_record(method, case_no, sub_no, case, sub))?;
            written += 1;
        }
    }
    writer.flush()?;
    Ok(written)
}

pub fn write_summary(summary: &Summary, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
