//! Cache key composition.
//!
//! Keys have the shape `{source}:{subject}` followed by `:{name}={value}` for
//! every present parameter, with parameters ordered by name. Two calls that
//! carry the same parameters in a different order produce the same key.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// Build a cache key from a source name, subject id and parameter map.
///
/// `null` parameters are left out of the key.
pub fn build_key<I, K, V>(source: &str, subject_id: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    params
        .into_iter()
        .fold(CacheKey::new(source, subject_id), |key, (name, value)| {
            key.param(name, value)
        })
        .into_string()
}

/// Incremental builder for a cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    source: String,
    subject_id: String,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(source: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            subject_id: subject_id.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter. A `null` value removes nothing and adds nothing.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Some(rendered) = render_scalar(value.into()) {
            self.params.insert(name.into(), rendered);
        }
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn into_string(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.subject_id)?;
        for (name, value) in &self.params {
            write!(f, ":{}={}", name, value)?;
        }
        Ok(())
    }
}

fn render_scalar(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_key_shape() {
        let key = build_key(
            "ads",
            "client42",
            [("start", "2025-01-01"), ("end", "2025-01-31")],
        );
        assert_eq!(key, "ads:client42:end=2025-01-31:start=2025-01-01");
    }

    #[test]
    fn test_key_without_params() {
        let key = build_key("gbp", "loc-9", Vec::<(String, Value)>::new());
        assert_eq!(key, "gbp:loc-9");
    }

    #[test]
    fn test_null_params_are_omitted() {
        let with_null = build_key(
            "ga4",
            "prop-1",
            [("metric", Value::from("sessions")), ("segment", Value::Null)],
        );
        let without = build_key("ga4", "prop-1", [("metric", "sessions")]);
        assert_eq!(with_null, without);
    }

    #[test]
    fn test_scalar_rendering() {
        let key = CacheKey::new("gsc", "site")
            .param("limit", 25)
            .param("mobile", true)
            .param("country", Option::<String>::None)
            .into_string();
        assert_eq!(key, "gsc:site:limit=25:mobile=true");
    }

    #[test]
    fn test_builder_matches_function() {
        let built = CacheKey::new("ads", "c1").param("b", "2").param("a", "1");
        assert_eq!(built.to_string(), build_key("ads", "c1", [("a", "1"), ("b", "2")]));
        assert_eq!(built.source(), "ads");
        assert_eq!(built.subject_id(), "c1");
    }

    proptest! {
        #[test]
        fn prop_key_ignores_param_order(
            params in proptest::collection::hash_map("[a-z]{1,8}", "[a-z0-9-]{0,12}", 0..8),
            seed in any::<u64>(),
        ) {
            let mut entries: Vec<(String, String)> = params.clone().into_iter().collect();
            let forward = build_key("ads", "client", entries.clone());

            // Deterministic shuffle driven by the seed.
            let len = entries.len().max(1);
            entries.rotate_left((seed as usize) % len);
            entries.reverse();
            let shuffled = build_key("ads", "client", entries);

            let from_map: HashMap<String, String> = params;
            prop_assert_eq!(&forward, &shuffled);
            prop_assert_eq!(forward, build_key("ads", "client", from_map));
        }
    }
}
