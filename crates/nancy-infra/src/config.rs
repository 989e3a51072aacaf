//! Configuration loading: reads `NancyConfig` from a TOML file, applies
//! `${VAR}` / `${VAR:-default}` environment interpolation, and validates
//! the result.
//!
//! Grounded on `brain_infra::config::BrainConfig::{from_file, from_env}`
//! for the load/parse/validate shape. Environment interpolation itself has
//! no teacher analogue (Brain's config never interpolates), so the regex
//! pre-pass is written from scratch, following the crate's existing regex
//! usage in the packet validator.

use std::env;

use nancy_types::config::NancyConfig;
use nancy_types::error::NancyError;
use regex::Regex;

/// Matches `${VAR}` and `${VAR:-default}` placeholders in a string value.
fn interpolation_pattern() -> Regex {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").expect("static regex is valid")
}

/// Replaces every `${VAR}` / `${VAR:-default}` reference in `input` with
/// the named environment variable, or its default if the variable is
/// unset. Returns an error naming the first variable that is both unset
/// and has no default.
pub fn interpolate_env(input: &str) -> Result<String, NancyError> {
    let pattern = interpolation_pattern();
    let mut missing: Option<String> = None;

    let replaced = pattern.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => match caps.get(3) {
                Some(default) => default.as_str().to_string(),
                None => {
                    missing.get_or_insert_with(|| var_name.to_string());
                    String::new()
                }
            },
        }
    });

    if let Some(var_name) = missing {
        return Err(NancyError::ConfigurationError(format!(
            "required environment variable '{var_name}' is not set and has no default"
        )));
    }

    Ok(replaced.into_owned())
}

/// Loads and validates a [`NancyConfig`] from a TOML file, interpolating
/// environment references in the raw text before parsing.
pub fn load_config_file(path: &str) -> Result<NancyConfig, NancyError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| NancyError::ConfigurationError(format!("failed to read config file '{path}': {e}")))?;

    let interpolated = interpolate_env(&raw)?;

    let config: NancyConfig = toml::from_str(&interpolated)
        .map_err(|e| NancyError::ConfigurationError(format!("failed to parse config file '{path}': {e}")))?;

    config
        .validate()
        .map_err(|errors| {
            let joined = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            NancyError::ConfigurationError(format!("configuration failed validation: {joined}"))
        })?;

    Ok(config)
}
