//! `keel phase` command.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use keel_kernel::next_phase;
use keel_types::{Condition, ConditionSet, ConditionStatus, Variant};
use serde_json::Value;

use crate::opts::OutputOpts;
use crate::output::print_success;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantArg {
    Git,
    Image,
    Database,
    Cache,
    Structural,
    Domain,
}

impl From<VariantArg> for Variant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Git => Variant::GitRepository,
            VariantArg::Image => Variant::ImageFromRegistry,
            VariantArg::Database => Variant::DatabaseCluster,
            VariantArg::Cache => Variant::CacheCluster,
            VariantArg::Structural => Variant::Structural,
            VariantArg::Domain => Variant::Domain,
        }
    }
}

#[derive(Args, Debug)]
pub struct PhaseArgs {
    #[arg(long, value_enum)]
    pub variant: VariantArg,

    /// Condition as TYPE=STATUS[:REASON], STATUS one of true, false, unknown
    #[arg(long = "condition", short = 'c')]
    pub conditions: Vec<String>,
}

fn parse_condition(raw: &str) -> Result<Condition> {
    let (condition_type, rest) = raw
        .split_once('=')
        .with_context(|| format!("condition '{raw}' is not TYPE=STATUS[:REASON]"))?;
    let (status, reason) = rest.split_once(':').unwrap_or((rest, ""));
    let status = match status.to_ascii_lowercase().as_str() {
        "true" => ConditionStatus::True,
        "false" => ConditionStatus::False,
        "unknown" => ConditionStatus::Unknown,
        other => anyhow::bail!("unknown condition status '{other}' in '{raw}'"),
    };
    Ok(Condition::new(condition_type, status, reason, ""))
}

pub fn cmd_phase(opts: &OutputOpts, args: &PhaseArgs) -> Result<()> {
    let mut conditions = ConditionSet::new();
    for raw in &args.conditions {
        conditions.upsert(parse_condition(raw)?, 0);
    }
    let phase = next_phase(&conditions, args.variant.into());
    print_success(opts, Value::String(phase.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditions_parse_with_optional_reason() {
        let c = parse_condition("WorkloadReady=false:CrashLoopBackOff").unwrap();
        assert_eq!(c.condition_type, "WorkloadReady");
        assert_eq!(c.status, ConditionStatus::False);
        assert_eq!(c.reason, "CrashLoopBackOff");
        assert_eq!(parse_condition("BuildSucceeded=Unknown").unwrap().reason, "");
        assert!(parse_condition("BuildSucceeded").is_err());
        assert!(parse_condition("BuildSucceeded=maybe").is_err());
    }
}
