//! Hierarchical key-value options.
//!
//! Options are plain strings keyed by their full name. Components read their options through a
//! prefixed view, so that several solvers can be configured independently through the same
//! database, e.g. `fieldsplit_0_patch_pc_patch_construct_ps_sweeps`.
use crate::error::PatchError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionsDatabase {
    entries: BTreeMap<String, String>,
}

static GLOBAL_OPTIONS: OnceLock<RwLock<OptionsDatabase>> = OnceLock::new();

impl OptionsDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide options database.
    pub fn global() -> &'static RwLock<OptionsDatabase> {
        GLOBAL_OPTIONS.get_or_init(|| RwLock::new(OptionsDatabase::new()))
    }

    /// Parses a command-line style argument list, e.g. `-patch_pc_patch_construct_type plane_smoother`.
    ///
    /// A key that is directly followed by another key (or by nothing) is stored as a flag with the
    /// value `"true"`. Arguments that do not start with `-` and do not follow a key are ignored.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut db = Self::new();
        let mut pending_key: Option<String> = None;
        for arg in args {
            let arg = arg.as_ref();
            // Negative numbers are values, not keys
            let is_key = arg.starts_with('-') && arg.len() > 1 && f64::from_str(arg).is_err();
            if is_key {
                if let Some(key) = pending_key.take() {
                    db.set(key, "true");
                }
                pending_key = Some(arg.trim_start_matches('-').to_string());
            } else if let Some(key) = pending_key.take() {
                db.set(key, arg);
            }
        }
        if let Some(key) = pending_key {
            db.set(key, "true");
        }
        db
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merges the entries of `other` into `self`, overwriting existing keys.
    pub fn extend(&mut self, other: &OptionsDatabase) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    pub fn with_prefix<'a>(&'a self, prefix: &str) -> Options<'a> {
        Options {
            database: self,
            prefix: prefix.to_string(),
        }
    }
}

/// A view of an [`OptionsDatabase`] in which every key is implicitly prefixed.
#[derive(Debug, Clone)]
pub struct Options<'a> {
    database: &'a OptionsDatabase,
    prefix: String,
}

impl<'a> Options<'a> {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.database.get(&self.full_key(key))
    }

    /// Returns the value for a key that must be present.
    ///
    /// The error names the full key that was expected.
    pub fn require(&self, key: &str) -> eyre::Result<&'a str> {
        self.get(key)
            .ok_or_else(|| PatchError::configuration(format!("Must set {}", self.full_key(key))))
    }

    pub fn parse<T>(&self, key: &str) -> eyre::Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key)
            .map(|value| {
                value.parse().map_err(|err| {
                    PatchError::configuration(format!(
                        "Option {} has invalid value \"{}\": {}",
                        self.full_key(key),
                        value,
                        err
                    ))
                })
            })
            .transpose()
    }

    /// A view with `suffix` appended to the current prefix.
    pub fn nested(&self, suffix: &str) -> Options<'a> {
        Options {
            database: self.database,
            prefix: format!("{}{}", self.prefix, suffix),
        }
    }
}
