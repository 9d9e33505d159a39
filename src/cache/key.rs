//! Cache keys derived from an endpoint name and its query parameters

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Query parameters for a request, kept sorted by name
pub type Params = BTreeMap<String, String>;

/// File stem used for an endpoint queried without parameters.
///
/// Encoded parameter strings always contain `%` (from the escaped `=`), so
/// this stem can never collide with a parameterized entry.
const BARE_ENDPOINT_STEM: &str = "_index";

/// Directory for the empty endpoint name. A lone `%` is never produced by
/// the encoding, which always emits `%XX`.
const EMPTY_ENDPOINT_DIR: &str = "%";

/// Logical identity of a request: endpoint plus canonical parameter list
///
/// Parameters are sorted by name on construction, so two keys built from the
/// same set of pairs compare equal regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    endpoint: String,
    params: Vec<(String, String)>,
}

impl CacheKey {
    /// Builds a key from an endpoint name and any iterable of name/value pairs
    ///
    /// When a name appears more than once the last value wins.
    pub fn new<I, K, V>(endpoint: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let sorted: Params = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        Self {
            endpoint: endpoint.into(),
            params: sorted.into_iter().collect(),
        }
    }

    /// The endpoint this key belongs to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sorted parameter pairs
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Canonical string form, e.g. `laps?driver_number=44&session_key=9636`
    pub fn canonical(&self) -> String {
        if self.params.is_empty() {
            return self.endpoint.clone();
        }
        format!("{}?{}", self.endpoint, self.query_string())
    }

    fn query_string(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Directory name for this key's endpoint; never empty, so no entry
    /// lands in the cache root
    pub(crate) fn endpoint_dir_name(endpoint: &str) -> String {
        if endpoint.is_empty() {
            return EMPTY_ENDPOINT_DIR.to_string();
        }
        encode_component(endpoint)
    }

    /// File stem for this key inside its endpoint directory
    pub(crate) fn file_stem(&self) -> String {
        if self.params.is_empty() {
            return BARE_ENDPOINT_STEM.to_string();
        }
        // Each component is encoded before joining so `&` and `=` inside
        // values cannot alias a different parameter list.
        let joined = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
            .collect::<Vec<_>>()
            .join("&");
        encode_component(&joined)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Reversible filename-safe encoding: ASCII alphanumerics, `-` and `_` pass
/// through, every other byte becomes `%XX`.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_key_is_independent_of_insertion_order() {
        let a = CacheKey::new("laps", vec![("session_key", "9636"), ("driver_number", "44")]);
        let b = CacheKey::new("laps", vec![("driver_number", "44"), ("session_key", "9636")]);

        let mut map = HashMap::new();
        map.insert("driver_number".to_string(), "44".to_string());
        map.insert("session_key".to_string(), "9636".to_string());
        let c = CacheKey::new("laps", &map);

        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.file_stem(), c.file_stem());
    }

    #[test]
    fn test_canonical_form_sorts_params() {
        let key = CacheKey::new("laps", vec![("session_key", "9636"), ("driver_number", "44")]);
        assert_eq!(key.canonical(), "laps?driver_number=44&session_key=9636");
        assert_eq!(key.to_string(), key.canonical());
    }

    #[test]
    fn test_canonical_form_without_params() {
        let key = CacheKey::new("meetings", Vec::<(String, String)>::new());
        assert_eq!(key.canonical(), "meetings");
        assert_eq!(key.file_stem(), "_index");
    }

    #[test]
    fn test_different_endpoints_produce_different_keys() {
        let laps = CacheKey::new("laps", vec![("session_key", "1")]);
        let stints = CacheKey::new("stints", vec![("session_key", "1")]);
        assert_ne!(laps, stints);
    }

    #[test]
    fn test_file_stem_does_not_alias_separator_characters() {
        // "a=1&b=2" as a single value must not look like two parameters
        let packed = CacheKey::new("laps", vec![("a", "1&b=2")]);
        let split = CacheKey::new("laps", vec![("a", "1"), ("b", "2")]);
        assert_ne!(packed.file_stem(), split.file_stem());
    }

    #[test]
    fn test_file_stem_is_filesystem_safe() {
        let key = CacheKey::new("car_data", vec![("date>", "2024-03-02T12:00:00/Z")]);
        let stem = key.file_stem();
        assert!(!stem.contains('/'));
        assert!(!stem.contains('>'));
        assert!(!stem.contains(':'));
        assert!(!stem.contains('.'));
    }

    #[test]
    fn test_endpoint_dir_name_encodes_path_separators() {
        assert_eq!(CacheKey::endpoint_dir_name("laps"), "laps");
        assert_eq!(CacheKey::endpoint_dir_name("../etc"), "%2E%2E%2Fetc");
    }

    #[test]
    fn test_empty_endpoint_gets_its_own_directory() {
        let dir = CacheKey::endpoint_dir_name("");
        assert!(!dir.is_empty());
        assert_ne!(dir, CacheKey::endpoint_dir_name("%"));
    }
}
