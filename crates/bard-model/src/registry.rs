// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider registry: static metadata for every supported provider id.
//!
//! Single source of truth for which provider ids exist and how requests to
//! them are authenticated.  Construction logic lives in
//! [`crate::openai_compat::HttpProviderFactory`].

use thiserror::Error;

/// How the API key is attached to outgoing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>` — most providers.
    Bearer,
    /// Key in a vendor-specific header (e.g. `x-api-key` for Anthropic).
    VendorHeader(&'static str),
    /// `Authorization` carries a caller-supplied Nostr NIP-98 token.
    /// Signing is external; the adapter forwards the token verbatim.
    Nip98,
    /// No authentication — local servers.
    None,
}

/// Metadata describing a registered provider.
#[derive(Debug, Clone)]
pub struct ProviderMeta {
    /// Unique provider id used as the prefix of `"<provider>/<model>"`.
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    /// Default chat-completions base URL (ends before `/chat/completions`).
    pub base_url: &'static str,
    /// Environment variable that holds the API key, when one applies.
    pub api_key_env: Option<&'static str>,
    pub auth: AuthStyle,
    /// Extra headers sent on every request (version pins, browser opt-ins).
    pub extra_headers: &'static [(&'static str, &'static str)],
}

/// Complete registry of supported providers.
pub static PROVIDERS: &[ProviderMeta] = &[
    ProviderMeta {
        id: "openai",
        name: "OpenAI",
        base_url: "https://api.openai.com/v1",
        api_key_env: Some("OPENAI_API_KEY"),
        auth: AuthStyle::Bearer,
        extra_headers: &[],
    },
    ProviderMeta {
        id: "anthropic",
        name: "Anthropic",
        base_url: "https://api.anthropic.com/v1",
        api_key_env: Some("ANTHROPIC_API_KEY"),
        auth: AuthStyle::VendorHeader("x-api-key"),
        extra_headers: &[
            ("anthropic-version", "2023-06-01"),
            ("anthropic-dangerous-direct-browser-access", "true"),
        ],
    },
    ProviderMeta {
        id: "openrouter",
        name: "OpenRouter",
        base_url: "https://openrouter.ai/api/v1",
        api_key_env: Some("OPENROUTER_API_KEY"),
        auth: AuthStyle::Bearer,
        extra_headers: &[("X-Title", "bard")],
    },
    ProviderMeta {
        id: "routstr",
        name: "Routstr",
        base_url: "https://api.routstr.com/v1",
        api_key_env: None,
        auth: AuthStyle::Nip98,
        extra_headers: &[],
    },
    ProviderMeta {
        id: "groq",
        name: "Groq",
        base_url: "https://api.groq.com/openai/v1",
        api_key_env: Some("GROQ_API_KEY"),
        auth: AuthStyle::Bearer,
        extra_headers: &[],
    },
    ProviderMeta {
        id: "ollama",
        name: "Ollama",
        base_url: "http://localhost:11434/v1",
        api_key_env: None,
        auth: AuthStyle::None,
        extra_headers: &[],
    },
    ProviderMeta {
        id: "mock",
        name: "Mock",
        base_url: "",
        api_key_env: None,
        auth: AuthStyle::None,
        extra_headers: &[],
    },
];

/// Look up a provider by its id.  Returns `None` for unknown ids.
pub fn get_provider(id: &str) -> Option<&'static ProviderMeta> {
    PROVIDERS.iter().find(|p| p.id == id)
}

/// All known provider ids in declaration order.
pub fn known_provider_ids() -> impl Iterator<Item = &'static str> {
    PROVIDERS.iter().map(|p| p.id)
}

// ─── Provider/model identifiers ───────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderModelError {
    #[error("invalid model identifier {0:?}: expected \"<provider>/<model>\"")]
    Invalid(String),
    #[error("unknown provider {provider:?}; known providers: {}", .known.join(", "))]
    UnknownProvider { provider: String, known: Vec<String> },
}

/// Split a `"<provider>/<model>"` identifier on its **first** `/`.
///
/// Everything after the separator is the model id, which may itself contain
/// slashes (`"openrouter/anthropic/claude-sonnet-4"`).  Empty halves and
/// unknown providers are rejected.
pub fn parse_provider_model(s: &str) -> Result<(String, String), ProviderModelError> {
    let (provider, model) = s
        .split_once('/')
        .ok_or_else(|| ProviderModelError::Invalid(s.to_string()))?;
    if provider.is_empty() || model.is_empty() {
        return Err(ProviderModelError::Invalid(s.to_string()));
    }
    if get_provider(provider).is_none() {
        return Err(ProviderModelError::UnknownProvider {
            provider: provider.to_string(),
            known: known_provider_ids().map(str::to_string).collect(),
        });
    }
    Ok((provider.to_string(), model.to_string()))
}
