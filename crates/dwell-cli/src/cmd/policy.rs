//! `dwell policy`: validate and describe the effective classification tables.

use std::io::Write;

use clap::Args;
use dwell_core::config::Config;
use dwell_core::policy::{Dimension, Pair, PolicyTables};
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

/// Arguments for `dwell policy`.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyArgs {
    /// List every value instead of just the counts.
    #[arg(long)]
    pub values: bool,
}

#[derive(Debug, Serialize)]
struct PairSummary {
    pair: Pair,
    dimension: Dimension,
    yes: usize,
    no: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    universe: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct PolicyOutput {
    source: &'static str,
    valid: bool,
    pairs: Vec<PairSummary>,
}

/// Execute `dwell policy`.
pub fn run_policy(args: &PolicyArgs, config: &Config, output: OutputMode) -> anyhow::Result<()> {
    let tables = config.policy_tables().map_err(dwell_core::Error::from)?;
    let source = if config.policy.is_some() {
        "config"
    } else {
        "builtin"
    };

    render_mode(
        output,
        &describe(&tables, source, args.values),
        render_policy_text,
        render_policy_pretty,
    )
}

fn describe(tables: &PolicyTables, source: &'static str, with_values: bool) -> PolicyOutput {
    let pairs = tables
        .pairs()
        .into_iter()
        .map(|pair| PairSummary {
            pair: pair.pair(),
            dimension: pair.pair().dimension(),
            yes: pair.yes_len(),
            no: pair.no_len(),
            universe: with_values.then(|| pair.universe().into_iter().collect()),
        })
        .collect();

    PolicyOutput {
        source,
        valid: true,
        pairs,
    }
}

fn render_policy_text(payload: &PolicyOutput, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w, "source={} valid={}", payload.source, payload.valid)?;
    for pair in &payload.pairs {
        writeln!(
            w,
            "pair={:?} dimension={:?} yes={} no={}",
            pair.pair.as_str(),
            pair.dimension.as_str(),
            pair.yes,
            pair.no
        )?;
        if let Some(universe) = &pair.universe {
            writeln!(w, "values={}", universe.join(","))?;
        }
    }
    Ok(())
}

fn render_policy_pretty(payload: &PolicyOutput, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, "Classification policy")?;
    pretty_kv(w, "Source", payload.source)?;
    pretty_kv(w, "Status", "valid")?;
    for pair in &payload.pairs {
        writeln!(w)?;
        pretty_section(w, pair.pair.as_str())?;
        pretty_kv(w, "Counted", pair.yes.to_string())?;
        pretty_kv(w, "Not counted", pair.no.to_string())?;
        if let Some(universe) = &pair.universe {
            for value in universe {
                writeln!(w, "  {value}")?;
            }
        }
    }
    Ok(())
}
