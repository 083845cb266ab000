//! Per-invocation cost calculation.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use aivis_core::{PricingTable, TokenUsage};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CostError;

const TOKENS_PER_UNIT: i64 = 1_000_000;
const SEARCHES_PER_UNIT: i64 = 1_000;

/// Monetary breakdown of one backend invocation, in USD.
///
/// Components are exact decimals; nothing is rounded before `total_cost` is
/// summed. Round only for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub thinking_cost: Decimal,
    pub caching_cost: Decimal,
    pub search_cost: Decimal,
    pub total_cost: Decimal,
}

impl Add for CostBreakdown {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_cost: self.input_cost + rhs.input_cost,
            output_cost: self.output_cost + rhs.output_cost,
            thinking_cost: self.thinking_cost + rhs.thinking_cost,
            caching_cost: self.caching_cost + rhs.caching_cost,
            search_cost: self.search_cost + rhs.search_cost,
            total_cost: self.total_cost + rhs.total_cost,
        }
    }
}

impl AddAssign for CostBreakdown {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for CostBreakdown {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, c| acc + c)
    }
}

fn component(count: i64, rate: Decimal, unit: i64) -> Decimal {
    Decimal::from(count) * rate / Decimal::from(unit)
}

/// Price one invocation of `model_id` from its billable counts.
///
/// Each component is `count × rate / unit` (unit is one million tokens or one
/// thousand searches) and `total_cost` is their sum. Zero counts cost zero;
/// negative counts are credits and pass through the arithmetic unchanged.
///
/// # Errors
///
/// Returns [`CostError::UnknownModel`] if `model_id` has no pricing entry.
pub fn calculate_cost(
    table: &PricingTable,
    model_id: &str,
    usage: &TokenUsage,
) -> Result<CostBreakdown, CostError> {
    let pricing = table.get(model_id).ok_or_else(|| CostError::UnknownModel {
        model_id: model_id.to_string(),
    })?;

    let input_cost = component(usage.input_tokens, pricing.input_per_million, TOKENS_PER_UNIT);
    let output_cost = component(
        usage.output_tokens,
        pricing.output_per_million,
        TOKENS_PER_UNIT,
    );
    let thinking_cost = component(
        usage.thinking_tokens,
        pricing.thinking_per_million,
        TOKENS_PER_UNIT,
    );
    let caching_cost = component(
        usage.cached_tokens,
        pricing.caching_per_million,
        TOKENS_PER_UNIT,
    );
    let search_cost = component(usage.searches, pricing.search_per_1000, SEARCHES_PER_UNIT);

    Ok(CostBreakdown {
        input_cost,
        output_cost,
        thinking_cost,
        caching_cost,
        search_cost,
        total_cost: input_cost + output_cost + thinking_cost + caching_cost + search_cost,
    })
}
