use std::fs;
use std::path::Path;

use adeval_core::{
    Benchmark, BenchmarkConfig, EvalError, PrecomputedEmbeddings, Summary, TrainingPlan,
};
use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use crate::config::{MethodConfig, RunConfig};
use crate::report::{self, RESULTS_FILE, SUMMARY_FILE};

pub fn run_from_config(path: &Path) -> Result<()> {
    let mut cfg = RunConfig::load(path)?;
    cfg.apply_env()?;
    let summary = run_pipeline(&cfg, Benchmark::new, evaluate_method)?;
    print!("{}", summary.render());
    Ok(())
}

fn run_pipeline<FOpen, FEval>(cfg: &RunConfig, open_fn: FOpen, eval_fn: FEval) -> Result<Summary>
where
    FOpen: FnOnce(BenchmarkConfig) -> adeval_core::Result<Benchmark>,
    FEval: Fn(&mut Benchmark, &MethodConfig, bool) -> Result<()>,
{
    if cfg.methods.is_empty() {
        return Err(anyhow!("run config must declare at least one method"));
    }
    let mut bench = open_fn(cfg.benchmark_config()?).with_context(|| {
        format!(
            "failed to prepare benchmark under {}",
            cfg.dataset_root.display()
        )
    })?;
    for (idx, method) in cfg.methods.iter().enumerate() {
        info!(
            method = %method.name,
            embeddings = %method.embeddings.display(),
            "evaluating method {}/{}",
            idx + 1,
            cfg.methods.len()
        );
        eval_fn(&mut bench, method, cfg.delete_models)?;
    }

    fs::create_dir_all(&cfg.output)
        .with_context(|| format!("failed to create {}", cfg.output.display()))?;
    let written = report::write_results(&bench, &cfg.output.join(RESULTS_FILE))?;
    let names: Vec<&str> = cfg.methods.iter().map(|m| m.name.as_str()).collect();
    let summary = bench.summary(Some(&names[..]))?;
    report::write_summary(&summary, &cfg.output.join(SUMMARY_FILE))?;
    info!(results = written, output = %cfg.output.display(), "wrote evaluation outputs");
    Ok(summary)
}

fn evaluate_method(bench: &mut Benchmark, method: &MethodConfig, delete_models: bool) -> Result<()> {
    let root = bench.config().root.clone();
    let embeddings = PrecomputedEmbeddings::load(&method.embeddings, &root)
        .with_context(|| format!("failed to load embeddings for {}", method.name))?;
    let model = &embeddings;
    let mut trainer = |plan: &TrainingPlan| {
        debug!(reference = %plan.reference_dir().display(), "using precomputed embeddings");
        Ok::<_, EvalError>(model)
    };
    let reports = bench.do_tests(&method.name, &mut trainer, delete_models)?;
    info!(method = %method.name, tests = reports.len(), "method finished");
    Ok(())
}
