//! Model pricing table
//!
//! Per-model USD prices per million tokens with a tiered lookup: exact key,
//! provider-prefixed key, then model family with trailing date/version
//! segments stripped. Unknown models cost 0 and flip the trace's
//! `cost_unknown` flag.

use super::Usage;

/// USD per million input/output tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

/// How a model was matched in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Exact,
    ProviderPrefix,
    Family,
}

const PRICES: &[(&str, ModelPricing)] = &[
    (
        "gpt-4o",
        ModelPricing {
            input_per_mtok: 2.50,
            output_per_mtok: 10.00,
        },
    ),
    (
        "gpt-4o-mini",
        ModelPricing {
            input_per_mtok: 0.15,
            output_per_mtok: 0.60,
        },
    ),
    (
        "gpt-4.1",
        ModelPricing {
            input_per_mtok: 2.00,
            output_per_mtok: 8.00,
        },
    ),
    (
        "gpt-4.1-mini",
        ModelPricing {
            input_per_mtok: 0.40,
            output_per_mtok: 1.60,
        },
    ),
    (
        "gpt-4-turbo",
        ModelPricing {
            input_per_mtok: 10.00,
            output_per_mtok: 30.00,
        },
    ),
    (
        "o3-mini",
        ModelPricing {
            input_per_mtok: 1.10,
            output_per_mtok: 4.40,
        },
    ),
    (
        "claude-3-5-haiku",
        ModelPricing {
            input_per_mtok: 0.80,
            output_per_mtok: 4.00,
        },
    ),
    (
        "claude-3-5-sonnet",
        ModelPricing {
            input_per_mtok: 3.00,
            output_per_mtok: 15.00,
        },
    ),
    (
        "claude-3-7-sonnet",
        ModelPricing {
            input_per_mtok: 3.00,
            output_per_mtok: 15.00,
        },
    ),
    (
        "claude-sonnet-4",
        ModelPricing {
            input_per_mtok: 3.00,
            output_per_mtok: 15.00,
        },
    ),
    (
        "claude-opus-4",
        ModelPricing {
            input_per_mtok: 15.00,
            output_per_mtok: 75.00,
        },
    ),
];

fn exact(key: &str) -> Option<ModelPricing> {
    PRICES
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, pricing)| *pricing)
}

/// Look up pricing for a model id
pub fn lookup(model: &str) -> Option<(ModelPricing, MatchType)> {
    let key = model.trim().to_lowercase();
    if key.is_empty() {
        return None;
    }

    if let Some(pricing) = exact(&key) {
        return Some((pricing, MatchType::Exact));
    }

    // "azure/gpt-4o" or "openai/gpt-4o-mini"
    if let Some((_, suffix)) = key.split_once('/')
        && let Some(pricing) = exact(suffix)
    {
        return Some((pricing, MatchType::ProviderPrefix));
    }

    // Family: strip trailing -segments (dates, revisions) until a key matches
    let base = key.split_once('/').map(|(_, s)| s).unwrap_or(&key);
    let mut family = base;
    while let Some(idx) = family.rfind('-') {
        family = &family[..idx];
        if let Some(pricing) = exact(family) {
            return Some((pricing, MatchType::Family));
        }
    }

    None
}

/// Cost of one completion; `None` means the model is unpriced
pub fn cost_usd(model: &str, usage: &Usage) -> Option<f64> {
    let (pricing, _) = lookup(model)?;
    Some(
        usage.input_tokens as f64 * pricing.input_per_mtok / 1_000_000.0
            + usage.output_tokens as f64 * pricing.output_per_mtok / 1_000_000.0,
    )
}
