// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use rust_decimal::Decimal;

use bard_model::{ModelCatalog, Usage};

/// Monetary cost of one completion, in USD.
///
/// A provider-echoed `cost` wins outright.  Otherwise the `(provider, model)`
/// pair is priced through the injected catalog; an unknown model costs zero
/// rather than failing the generation.  All arithmetic stays decimal so
/// repeated accumulation never drifts.
pub fn usage_cost(usage: &Usage, provider: &str, model: &str, catalog: &ModelCatalog) -> Decimal {
    if let Some(cost) = usage.cost {
        return cost;
    }
    match catalog.lookup(provider, model) {
        Some(price) => {
            price.prompt * Decimal::from(usage.prompt_tokens)
                + price.completion * Decimal::from(usage.completion_tokens)
        }
        None => Decimal::ZERO,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
