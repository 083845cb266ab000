//! Static per-model pricing table, loaded from YAML.
//!
//! Rates are exact decimals. Token rates are per million tokens and search
//! rates per thousand searches. Lookups for unknown models return `None`;
//! callers must treat that as an error rather than pricing at zero.

use std::collections::BTreeMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Pricing shipped with the binary, used when no pricing file is present.
const BUILTIN_PRICING_YAML: &str = include_str!("../../../config/pricing.yaml");

/// Billing rates for one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelPricing {
    pub input_per_million: Decimal,
    pub output_per_million: Decimal,
    pub thinking_per_million: Decimal,
    pub caching_per_million: Decimal,
    pub search_per_1000: Decimal,
}

/// Pricing for every model the pipeline may invoke, keyed by model id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingTable {
    models: BTreeMap<String, ModelPricing>,
}

impl PricingTable {
    /// Build a table from `(model_id, pricing)` pairs.
    pub fn from_models<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = (S, ModelPricing)>,
        S: Into<String>,
    {
        Self {
            models: models.into_iter().map(|(id, p)| (id.into(), p)).collect(),
        }
    }

    /// The table compiled into the binary from `config/pricing.yaml`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the embedded YAML fails to parse or validate.
    pub fn builtin() -> Result<Self, ConfigError> {
        parse_pricing(BUILTIN_PRICING_YAML)
    }

    #[must_use]
    pub fn get(&self, model_id: &str) -> Option<&ModelPricing> {
        self.models.get(model_id)
    }

    #[must_use]
    pub fn contains(&self, model_id: &str) -> bool {
        self.models.contains_key(model_id)
    }

    pub fn model_ids(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Load and validate a pricing table from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_pricing(path: &Path) -> Result<PricingTable, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::PricingFileIo {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_pricing(&content)
}

/// Load the pricing file at `path`, falling back to [`PricingTable::builtin`]
/// when the file does not exist. A file that exists but is invalid is an error.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read, parsed, or validated.
pub fn load_pricing_or_default(path: &Path) -> Result<PricingTable, ConfigError> {
    if path.exists() {
        load_pricing(path)
    } else {
        PricingTable::builtin()
    }
}

fn parse_pricing(content: &str) -> Result<PricingTable, ConfigError> {
    let table: PricingTable = serde_yaml::from_str(content)?;
    validate_pricing(&table)?;
    Ok(table)
}

fn validate_pricing(table: &PricingTable) -> Result<(), ConfigError> {
    if table.models.is_empty() {
        return Err(ConfigError::Validation(
            "pricing table must define at least one model".to_string(),
        ));
    }

    for (model_id, pricing) in &table.models {
        if model_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "model id must be non-empty".to_string(),
            ));
        }

        let rates = [
            ("input_per_million", pricing.input_per_million),
            ("output_per_million", pricing.output_per_million),
            ("thinking_per_million", pricing.thinking_per_million),
            ("caching_per_million", pricing.caching_per_million),
            ("search_per_1000", pricing.search_per_1000),
        ];
        for (field, rate) in rates {
            if rate.is_sign_negative() && !rate.is_zero() {
                return Err(ConfigError::Validation(format!(
                    "model '{model_id}' has negative {field} ({rate})"
                )));
            }
        }
    }

    Ok(())
}
