//! Command-line flag rendering for generated service units

use std::collections::BTreeMap;
use std::fmt::Display;

/// Collects `--name=value` flags and renders them sorted by name
///
/// Unset values are omitted; lists are comma-joined and omitted when empty.
#[derive(Debug, Default)]
pub struct FlagBuilder {
    flags: BTreeMap<&'static str, String>,
}

impl FlagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a flag when `value` is set
    pub fn value<T: Display>(mut self, name: &'static str, value: Option<T>) -> Self {
        if let Some(value) = value {
            self.flags.insert(name, value.to_string());
        }
        self
    }

    /// Add a flag that is only emitted when true
    pub fn switch(mut self, name: &'static str, on: bool) -> Self {
        if on {
            self.flags.insert(name, "true".to_string());
        }
        self
    }

    /// Add a comma-joined list flag
    pub fn list(mut self, name: &'static str, values: &[String]) -> Self {
        if !values.is_empty() {
            self.flags.insert(name, values.join(","));
        }
        self
    }

    pub fn build(&self) -> String {
        self.flags
            .iter()
            .map(|(name, value)| format!("--{name}={value}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
