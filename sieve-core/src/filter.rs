//! Filter descriptors and the id-source contract.
//!
//! A [`Filter`] pairs an [`IdSource`] (the expensive, authoritative lookup)
//! with the parameters passed to it. Only the source's kind and the optional
//! [`FilterArg`] take part in the derived name; [`AuxParams`] reach the
//! source but never the store key.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{SieveError, SieveResult};
use crate::key::SetKey;
use crate::EntityId;

/// Error raised by an id source. Carried through unmodified.
pub type IdSourceError = Box<dyn std::error::Error + Send + Sync>;

/// Helper parameters for an id source that must not affect the store key.
pub type AuxParams = BTreeMap<String, serde_json::Value>;

/// The single key-affecting argument of a filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterArg {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for FilterArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{}", i),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for FilterArg {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for FilterArg {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for FilterArg {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for FilterArg {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Authoritative producer of the ids matching a filter.
///
/// Implementations typically query a primary datastore and may be slow.
/// The result is never cached by the source itself.
#[async_trait]
pub trait IdSource: Send + Sync {
    /// Type-like name of this source, e.g. `"CurrencyFilter"`.
    ///
    /// Converted to snake case for the filter name, so it must be stable.
    fn kind(&self) -> &str;

    /// Produce the ids matching `arg` and `aux`.
    async fn ids(
        &self,
        arg: Option<&FilterArg>,
        aux: &AuxParams,
    ) -> Result<Vec<EntityId>, IdSourceError>;
}

/// A named, parameterized filter.
#[derive(Clone)]
pub struct Filter {
    source: Arc<dyn IdSource>,
    arg: Option<FilterArg>,
    aux: AuxParams,
}

impl Filter {
    /// Create a filter with no argument and no auxiliary parameters.
    pub fn new(source: Arc<dyn IdSource>) -> Self {
        Self {
            source,
            arg: None,
            aux: AuxParams::new(),
        }
    }

    /// Set the key-affecting argument.
    pub fn with_arg(mut self, arg: impl Into<FilterArg>) -> Self {
        self.arg = Some(arg.into());
        self
    }

    /// Add an auxiliary parameter.
    pub fn with_aux(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.aux.insert(name.into(), value);
        self
    }

    pub fn arg(&self) -> Option<&FilterArg> {
        self.arg.as_ref()
    }

    pub fn aux(&self) -> &AuxParams {
        &self.aux
    }

    pub fn kind(&self) -> &str {
        self.source.kind()
    }

    /// Derived name; stable across processes for the same kind and argument.
    pub fn name(&self) -> String {
        filter_name(self.source.kind(), self.arg.as_ref())
    }

    /// Store key of this filter's persisted set.
    pub fn key(&self) -> SetKey {
        SetKey::index(&self.name())
    }

    /// Ask the source for the current authoritative ids.
    pub async fn ids(&self) -> SieveResult<Vec<EntityId>> {
        self.source
            .ids(self.arg.as_ref(), &self.aux)
            .await
            .map_err(|e| SieveError::source_failure(self.name(), e))
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("kind", &self.source.kind())
            .field("arg", &self.arg)
            .field("aux", &self.aux)
            .finish()
    }
}

/// Derive a filter name from its kind and argument.
///
/// The kind is converted to snake case and, when an argument is present,
/// `_<arg>` is appended. Falsy arguments (`0`, `false`, `""`) still count as
/// present.
pub fn filter_name(kind: &str, arg: Option<&FilterArg>) -> String {
    let base = snake_case(kind);
    match arg {
        Some(arg) => format!("{}_{}", base, arg),
        None => base,
    }
}

/// Names of all filters joined with `/`, used to tag query metrics.
pub fn joined_names(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(Filter::name)
        .collect::<Vec<_>>()
        .join("/")
}

/// Convert a type-like name to snake case.
///
/// `CurrencyFilter` → `currency_filter`, `HTTPFilter` → `http_filter`,
/// `Region2Filter` → `region2_filter`, `my-filter` → `my_filter`.
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == ' ' {
            out.push('_');
            continue;
        }
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }

    out
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property: snake_case output never contains uppercase characters.
        #[test]
        fn prop_snake_case_is_lowercase(name in "[A-Za-z0-9]{1,32}") {
            let snake = snake_case(&name);
            prop_assert!(!snake.chars().any(|c| c.is_uppercase()));
        }

        /// Property: the name is a pure function of kind and argument.
        #[test]
        fn prop_filter_name_is_deterministic(
            kind in "[A-Z][a-z]{1,8}Filter",
            arg in any::<i64>(),
        ) {
            let arg = FilterArg::Int(arg);
            prop_assert_eq!(
                filter_name(&kind, Some(&arg)),
                filter_name(&kind, Some(&arg.clone()))
            );
        }
    }
}
