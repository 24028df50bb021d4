//! Bedrock vendor registry.
//!
//! Maps a client-facing model name to the vendor whose translators handle it
//! and the Bedrock model id to invoke. The table is built once at startup from
//! each vendor's declared model list (Claude, then Llama 3, then Nova), then
//! from configured aliases. A later registration for the same name replaces
//! the earlier one.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ModelAlias;
use crate::error::{GatewayError, Result};

/// The closed set of Bedrock vendors this gateway can translate for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Claude,
    Llama3,
    Nova,
}

const CLAUDE_MODELS: &[(&str, &str)] = &[
    ("claude-instant-1.2", "anthropic.claude-instant-v1"),
    ("claude-2.0", "anthropic.claude-v2"),
    ("claude-2.1", "anthropic.claude-v2:1"),
    ("claude-3-haiku-20240307", "anthropic.claude-3-haiku-20240307-v1:0"),
    ("claude-3-sonnet-20240229", "anthropic.claude-3-sonnet-20240229-v1:0"),
    ("claude-3-opus-20240229", "anthropic.claude-3-opus-20240229-v1:0"),
    ("claude-3-5-sonnet-20240620", "anthropic.claude-3-5-sonnet-20240620-v1:0"),
    ("claude-3-5-sonnet-20241022", "anthropic.claude-3-5-sonnet-20241022-v2:0"),
    ("claude-3-5-haiku-20241022", "anthropic.claude-3-5-haiku-20241022-v1:0"),
];

const LLAMA3_MODELS: &[(&str, &str)] = &[
    ("llama3-8b-8192", "meta.llama3-8b-instruct-v1:0"),
    ("llama3-70b-8192", "meta.llama3-70b-instruct-v1:0"),
];

const NOVA_MODELS: &[(&str, &str)] = &[
    ("amazon.nova-micro", "us.amazon.nova-micro-v1:0"),
    ("amazon.nova-lite", "us.amazon.nova-lite-v1:0"),
    ("amazon.nova-pro", "us.amazon.nova-pro-v1:0"),
];

impl Vendor {
    pub const ALL: [Vendor; 3] = [Vendor::Claude, Vendor::Llama3, Vendor::Nova];

    /// Client-facing model names this vendor declares, with their Bedrock ids.
    #[must_use]
    pub fn declared_models(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Vendor::Claude => CLAUDE_MODELS,
            Vendor::Llama3 => LLAMA3_MODELS,
            Vendor::Nova => NOVA_MODELS,
        }
    }
}

impl FromStr for Vendor {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "claude" | "anthropic" => Ok(Vendor::Claude),
            "llama3" | "llama" | "meta" => Ok(Vendor::Llama3),
            "nova" | "amazon" => Ok(Vendor::Nova),
            other => Err(GatewayError::config(format!(
                "Unknown vendor '{other}'. Known vendors: claude, llama3, nova"
            ))),
        }
    }
}

impl Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Vendor::Claude => write!(f, "claude"),
            Vendor::Llama3 => write!(f, "llama3"),
            Vendor::Nova => write!(f, "nova"),
        }
    }
}

/// Where a model name is served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    pub vendor: Vendor,
    pub model_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    routes: HashMap<String, ModelRoute>,
}

impl Registry {
    /// Registry holding every vendor's declared models.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        for vendor in Vendor::ALL {
            for (name, model_id) in vendor.declared_models() {
                registry.register(name, vendor, model_id);
            }
        }
        registry
    }

    /// Built-in models plus configured aliases, aliases registered last.
    #[must_use]
    pub fn with_aliases(aliases: &[ModelAlias]) -> Self {
        let mut registry = Self::builtin();
        for alias in aliases {
            registry.register(&alias.name, alias.vendor, &alias.model_id);
        }
        registry
    }

    /// Add a route, replacing any existing route for `name`.
    pub fn register(&mut self, name: &str, vendor: Vendor, model_id: &str) {
        let previous = self.routes.insert(
            name.to_string(),
            ModelRoute {
                vendor,
                model_id: model_id.to_string(),
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(
                model = name,
                from = %previous.vendor,
                to = %vendor,
                "Model route shadowed"
            );
        }
    }

    pub fn resolve(&self, name: &str) -> Result<&ModelRoute> {
        self.routes
            .get(name)
            .ok_or_else(|| GatewayError::unknown_model(name))
    }

    /// Registered model names, sorted.
    #[must_use]
    pub fn model_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
