//! Environment variable loading helpers

use crate::error::{GraphError, Result};
use std::collections::BTreeSet;
use std::env;
use std::str::FromStr;

/// Join a prefix and a setting name into a variable name: `("STEPGRAPH", "recursion_limit")` → `STEPGRAPH_RECURSION_LIMIT`
pub fn build_env_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_uppercase()
    } else {
        format!("{}_{}", prefix.trim_end_matches('_'), name.to_uppercase())
    }
}

pub fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(GraphError::Configuration(format!(
            "Environment variable {key} contains invalid UTF-8"
        ))),
    }
}

pub fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env(key)? {
        Some(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| GraphError::Configuration(format!("Failed to parse environment variable {key}: {e}"))),
        None => Ok(None),
    }
}

pub fn get_env_bool(key: &str) -> Result<Option<bool>> {
    match get_env(key)? {
        Some(val) => match val.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(GraphError::Configuration(format!("Invalid boolean value for {key}: {val}"))),
        },
        None => Ok(None),
    }
}

/// Comma separated list; blank entries are dropped
pub fn get_env_set(key: &str) -> Result<Option<BTreeSet<String>>> {
    Ok(get_env(key)?.map(|val| {
        val.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }))
}
