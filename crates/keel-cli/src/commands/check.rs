//! `keel check` command.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use keel_kernel::check_population;
use serde_json::json;

use crate::opts::OutputOpts;
use crate::output::print_success;
use crate::seed;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// JSON file with a `resources` array. Resources without a uid are
    /// ordered by their position in the file.
    pub file: PathBuf,
}

pub fn cmd_check(opts: &OutputOpts, args: &CheckArgs) -> Result<()> {
    let mut population = seed::load(&args.file)?.resources;
    for (position, resource) in population.iter_mut().enumerate() {
        if resource.meta.uid.is_none() {
            resource.meta.uid = Some(format!("file-{position}"));
            resource.meta.created_at_ns = position as u64 + 1;
        }
    }

    let violations = check_population(&population);
    let report: Vec<_> = violations
        .iter()
        .map(|v| {
            json!({
                "key": v.key().to_string(),
                "reason": v.reason(),
                "message": v.to_string(),
            })
        })
        .collect();
    print_success(
        opts,
        json!({
            "resources": population.len(),
            "violations": report,
        }),
    )?;

    if !violations.is_empty() {
        anyhow::bail!("{} identity violation(s) found", violations.len());
    }
    Ok(())
}
