// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Pricing catalog: per-token prices for known `(provider, model)` pairs.
//!
//! The catalog is constructor-injected — model and pricing discovery happens
//! outside the orchestrator.  Prices are arbitrary-precision decimals so cost
//! accounting never accumulates binary-float drift.

use std::collections::HashMap;

use rust_decimal::Decimal;

/// Per-token prices for one model, in USD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPrice {
    pub prompt: Decimal,
    pub completion: Decimal,
}

/// Injected lookup table mapping `(provider, model)` to prices.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    entries: HashMap<(String, String), ModelPrice>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        provider: impl Into<String>,
        model: impl Into<String>,
        price: ModelPrice,
    ) {
        self.entries.insert((provider.into(), model.into()), price);
    }

    pub fn lookup(&self, provider: &str, model: &str) -> Option<&ModelPrice> {
        self.entries.get(&(provider.to_string(), model.to_string()))
    }
}
