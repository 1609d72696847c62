//! Compiled route match predicates (§4.2, §4.4 step 2).
//!
//! A regex that fails to compile at decode time demotes its matcher to
//! "never matches" rather than failing the whole route (§4.2: "a compile
//! failure demotes the matcher to 'never matches' without failing the whole
//! route").

use regex::Regex;

#[derive(Debug, Clone)]
pub(crate) enum PathMatch {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    Regex(Option<Regex>),
    /// Absence of a path predicate matches any path.
    Any,
}

impl PathMatch {
    fn matches(&self, path: &str) -> bool {
        match self {
            PathMatch::Exact(p) => path == p,
            PathMatch::Prefix(p) => path.starts_with(p.as_str()),
            PathMatch::Suffix(p) => path.ends_with(p.as_str()),
            PathMatch::Contains(p) => path.contains(p.as_str()),
            PathMatch::Regex(Some(re)) => re.is_match(path),
            PathMatch::Regex(None) => false,
            PathMatch::Any => true,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum HeaderValueMatch {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Regex(Option<Regex>),
    Present,
}

#[derive(Debug, Clone)]
pub(crate) struct HeaderMatch {
    pub name: String,
    pub value: HeaderValueMatch,
}

impl HeaderMatch {
    fn matches(&self, headers: &http::HeaderMap) -> bool {
        let Some(value) = headers.get(&self.name).and_then(|v| v.to_str().ok()) else {
            return false;
        };
        match &self.value {
            HeaderValueMatch::Exact(expected) => value == expected,
            HeaderValueMatch::Prefix(expected) => value.starts_with(expected.as_str()),
            HeaderValueMatch::Suffix(expected) => value.ends_with(expected.as_str()),
            HeaderValueMatch::Regex(Some(re)) => re.is_match(value),
            HeaderValueMatch::Regex(None) => false,
            HeaderValueMatch::Present => true,
        }
    }
}

/// A fully compiled Route `Match`: exactly one path predicate and zero or
/// more header predicates, all of which must accept.
#[derive(Debug, Clone)]
pub(crate) struct CompiledMatch {
    pub path: PathMatch,
    pub headers: Vec<HeaderMatch>,
}

impl CompiledMatch {
    pub(crate) fn matches(&self, path: &str, headers: &http::HeaderMap) -> bool {
        self.path.matches(path) && self.headers.iter().all(|h| h.matches(headers))
    }

    /// Compiles a regex, demoting to "never matches" on failure rather than
    /// propagating the error (§4.2).
    pub(crate) fn compile_regex(pattern: &str) -> Option<Regex> {
        match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(error) => {
                tracing::warn!(pattern, %error, "regex matcher failed to compile, demoting to never-matches");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_match() {
        let m = CompiledMatch { path: PathMatch::Prefix("/api/".to_string()), headers: vec![] };
        assert!(m.matches("/api/v1/users", &http::HeaderMap::new()));
        assert!(!m.matches("/other", &http::HeaderMap::new()));
    }

    #[test]
    fn any_path_matches_everything() {
        let m = CompiledMatch { path: PathMatch::Any, headers: vec![] };
        assert!(m.matches("/anything", &http::HeaderMap::new()));
    }

    #[test]
    fn invalid_regex_never_matches() {
        let re = CompiledMatch::compile_regex("(unclosed");
        assert!(re.is_none());
        let m = CompiledMatch { path: PathMatch::Regex(re), headers: vec![] };
        assert!(!m.matches("/anything", &http::HeaderMap::new()));
    }

    #[test]
    fn header_match_requires_all_to_accept() {
        let mut headers = http::HeaderMap::new();
        headers.insert("x-env", http::HeaderValue::from_static("prod"));
        let m = CompiledMatch {
            path: PathMatch::Any,
            headers: vec![HeaderMatch { name: "x-env".to_string(), value: HeaderValueMatch::Exact("prod".to_string()) }],
        };
        assert!(m.matches("/", &headers));

        let m_missing = CompiledMatch {
            path: PathMatch::Any,
            headers: vec![HeaderMatch { name: "x-missing".to_string(), value: HeaderValueMatch::Present }],
        };
        assert!(!m_missing.matches("/", &headers));
    }

    #[test]
    fn header_prefix_and_suffix_match() {
        let mut headers = http::HeaderMap::new();
        headers.insert("x-env", http::HeaderValue::from_static("prod-east"));

        let prefix = CompiledMatch {
            path: PathMatch::Any,
            headers: vec![HeaderMatch { name: "x-env".to_string(), value: HeaderValueMatch::Prefix("prod-".to_string()) }],
        };
        assert!(prefix.matches("/", &headers));

        let suffix = CompiledMatch {
            path: PathMatch::Any,
            headers: vec![HeaderMatch { name: "x-env".to_string(), value: HeaderValueMatch::Suffix("-east".to_string()) }],
        };
        assert!(suffix.matches("/", &headers));

        let no_match = CompiledMatch {
            path: PathMatch::Any,
            headers: vec![HeaderMatch { name: "x-env".to_string(), value: HeaderValueMatch::Prefix("staging-".to_string()) }],
        };
        assert!(!no_match.matches("/", &headers));
    }
}
