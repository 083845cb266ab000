//! `cost` command: price one invocation without touching the database.

use std::fmt::Write as _;
use std::path::PathBuf;

use aivis_analysis::{calculate_cost, CostBreakdown};
use aivis_core::TokenUsage;
use clap::Args;

#[derive(Debug, Args)]
pub struct CostArgs {
    /// Model id as it appears in the pricing table
    #[arg(long)]
    pub model: String,
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub input: i64,
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub output: i64,
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub cached: i64,
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub thinking: i64,
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub searches: i64,
    /// Pricing YAML; the built-in table is used when the file is absent
    #[arg(long, env = "AIVIS_PRICING_PATH", default_value = "./config/pricing.yaml")]
    pub pricing: PathBuf,
}

impl CostArgs {
    pub(crate) fn usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input,
            output_tokens: self.output,
            cached_tokens: self.cached,
            thinking_tokens: self.thinking,
            searches: self.searches,
        }
    }
}

/// Price the invocation described by `args` and print the breakdown.
///
/// # Errors
///
/// Returns an error if the pricing file is invalid or the model is not
/// priced.
pub(crate) fn run_cost(args: &CostArgs) -> anyhow::Result<()> {
    let table = aivis_core::load_pricing_or_default(&args.pricing)?;
    let usage = args.usage();
    let breakdown = calculate_cost(&table, &args.model, &usage)?;
    print!("{}", format_breakdown(&args.model, &usage, &breakdown));
    Ok(())
}

pub(crate) fn format_breakdown(model: &str, usage: &TokenUsage, cost: &CostBreakdown) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "model:     {model}");
    let _ = writeln!(
        out,
        "input:     {:>12} tokens  ${}",
        usage.input_tokens, cost.input_cost
    );
    let _ = writeln!(
        out,
        "output:    {:>12} tokens  ${}",
        usage.output_tokens, cost.output_cost
    );
    let _ = writeln!(
        out,
        "cached:    {:>12} tokens  ${}",
        usage.cached_tokens, cost.caching_cost
    );
    let _ = writeln!(
        out,
        "thinking:  {:>12} tokens  ${}",
        usage.thinking_tokens, cost.thinking_cost
    );
    let _ = writeln!(
        out,
        "searches:  {:>12}         ${}",
        usage.searches, cost.search_cost
    );
    let _ = writeln!(out, "total:                          ${}", cost.total_cost);
    out
}
