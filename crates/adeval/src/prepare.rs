use std::path::Path;

use adeval_core::{build, clean_generated, BuildOptions, DatasetLayout, Materialize, Protocol};
use anyhow::{Context, Result};
use tracing::info;

pub fn run(root: &Path, protocol: &str, skip_data_creation: bool, symlink: bool) -> Result<()> {
    let protocol: Protocol = protocol.parse()?;
    let layout = DatasetLayout::discover(root)
        .with_context(|| format!("failed to read cases under {}", root.display()))?;
    let options = BuildOptions {
        materialize: if symlink {
            Materialize::Symlink
        } else {
            Materialize::Copy
        },
        skip_data_creation,
    };
    let subs = build(protocol, layout.cases(), root, options)?;
    let instances: usize = subs.iter().map(Vec::len).sum();
    info!(
        cases = subs.len(),
        instances,
        protocol = %protocol,
        dry_run = skip_data_creation,
        "prepared test instances"
    );
    for (case_no, case_subs) in subs.iter().enumerate() {
        for sub_no in 0..case_subs.len() {
            println!("{}", layout.instance_name(case_no, sub_no)?);
        }
    }
    Ok(())
}

pub fn clean(root: &Path) -> Result<()> {
    let removed = clean_generated(root)
        .with_context(|| format!("failed to clean {}", root.display()))?;
    println!("removed {} test instance folders", removed.len());
    Ok(())
}
