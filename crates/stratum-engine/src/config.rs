use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Path of a TOML options file read by [`Options::from_env`].
pub const ENV_CONFIG: &str = "STRATUM_CONFIG";
/// Boolean override for [`Options::apply_regex`].
pub const ENV_APPLY_REGEX: &str = "STRATUM_APPLY_REGEX";
/// Boolean override for [`Options::apply_shorthand`].
pub const ENV_APPLY_SHORTHAND: &str = "STRATUM_APPLY_SHORTHAND";

/// Resolver behavior toggles. Both default to on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Options {
    /// Treat `r=`-prefixed server/world values as anchored regular
    /// expressions during applicability matching.
    #[serde(default = "default_true")]
    pub apply_regex: bool,
    /// Expand `(a|b)` alternation shorthand into implied permissions during
    /// export.
    #[serde(default = "default_true")]
    pub apply_shorthand: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Options {
    fn default() -> Self {
        Self {
            apply_regex: true,
            apply_shorthand: true,
        }
    }
}

static OPTIONS_SCHEMA: Lazy<jsonschema::Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(Options);
    let value = serde_json::to_value(&schema).expect("schema value");
    jsonschema::validator_for(&value).expect("valid schema")
});

/// JSON Schema for the options file, for out-of-band validation.
pub fn options_schema_json() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(Options)).expect("schema json")
}

/// Load options from a TOML file, validating against the schema first so a
/// typo'd key or mistyped value fails loudly instead of half-applying.
pub fn load_options(path: &str) -> Result<Options> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading resolver options at {path}"))?;
    let raw: toml::Value =
        toml::from_str(&content).with_context(|| format!("parsing resolver options at {path}"))?;
    let json_value = serde_json::to_value(&raw)?;
    if let Err(error) = OPTIONS_SCHEMA.validate(&json_value) {
        return Err(anyhow::anyhow!("invalid resolver options at {path}: {error}"));
    }
    Ok(toml::from_str(&content)?)
}

impl Options {
    /// Apply environment flag overrides on top of these options. Flags accept
    /// 1/0, true/false, yes/no, on/off (case-insensitive).
    pub fn overlay_env(mut self) -> Self {
        if let Some(value) = env_flag(ENV_APPLY_REGEX) {
            self.apply_regex = value;
        }
        if let Some(value) = env_flag(ENV_APPLY_SHORTHAND) {
            self.apply_shorthand = value;
        }
        self
    }

    /// Options from the environment: a file named by `STRATUM_CONFIG` is read
    /// first (an unreadable or invalid file logs and falls back to defaults),
    /// then flag overrides apply.
    pub fn from_env() -> Self {
        let base = match std::env::var(ENV_CONFIG) {
            Ok(path) => match load_options(&path) {
                Ok(options) => options,
                Err(err) => {
                    tracing::error!("ignoring {path}: {err}");
                    Options::default()
                }
            },
            Err(_) => Options::default(),
        };
        base.overlay_env()
    }
}

fn env_flag(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
