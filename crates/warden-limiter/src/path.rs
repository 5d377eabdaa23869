//! Route pattern matching.
//!
//! A pattern segment is a literal, a `{name}` placeholder matching exactly
//! one path segment, or a trailing `*` matching one or more remaining
//! segments. Resolution picks the most specific registered pattern, with
//! literals beating placeholders position by position.

use warden_core::CoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

impl Segment {
    /// Specificity rank for resolution tie-breaks.
    fn rank(&self) -> u8 {
        match self {
            Self::Literal(_) => 2,
            Self::Param(_) => 1,
            Self::Wildcard => 0,
        }
    }
}

/// One parsed route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    /// Parse a pattern such as `/api/users/{id}` or `/static/*`.
    pub fn parse(pattern: &str) -> Result<Self, CoreError> {
        let trimmed = pattern.trim();
        if !trimmed.starts_with('/') {
            return Err(CoreError::configuration(format!(
                "route pattern '{pattern}' must start with '/'"
            )));
        }
        let parts: Vec<&str> = split_path(trimmed);
        let mut segments = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let segment = if *part == "*" {
                if index + 1 != parts.len() {
                    return Err(CoreError::configuration(format!(
                        "route pattern '{pattern}' has a non-trailing wildcard"
                    )));
                }
                Segment::Wildcard
            } else if part.starts_with('{') && part.ends_with('}') {
                let name = &part[1..part.len() - 1];
                if name.is_empty() {
                    return Err(CoreError::configuration(format!(
                        "route pattern '{pattern}' has an unnamed placeholder"
                    )));
                }
                Segment::Param(name.to_string())
            } else if part.contains('{') || part.contains('}') || part.contains('*') {
                return Err(CoreError::configuration(format!(
                    "route pattern '{pattern}' has a malformed segment '{part}'"
                )));
            } else {
                Segment::Literal((*part).to_string())
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether a concrete path matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        let parts = split_path(path);
        let wildcard = matches!(self.segments.last(), Some(Segment::Wildcard));
        if wildcard {
            // The wildcard stands for one or more remaining segments.
            if parts.len() < self.segments.len() {
                return false;
            }
        } else if parts.len() != self.segments.len() {
            return false;
        }
        self.segments.iter().zip(parts.iter()).all(|(segment, part)| {
            match segment {
                Segment::Literal(literal) => literal == part,
                Segment::Param(_) => !part.is_empty(),
                Segment::Wildcard => true,
            }
        })
    }

    /// Position-by-position specificity comparison for resolution.
    fn specificity(&self) -> Vec<u8> {
        self.segments.iter().map(Segment::rank).collect()
    }
}

/// Set of registered route patterns with most-specific resolution.
///
/// Built once at startup; reconfiguration replaces the whole matcher (see
/// the route table's atomic swap), so readers never observe a partial set.
#[derive(Debug, Default, Clone)]
pub struct PathMatcher {
    patterns: Vec<RoutePattern>,
}

impl PathMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern. Duplicates are ignored.
    pub fn register(&mut self, pattern: &str) -> Result<(), CoreError> {
        let parsed = RoutePattern::parse(pattern)?;
        if !self.patterns.iter().any(|existing| existing.raw == parsed.raw) {
            self.patterns.push(parsed);
        }
        Ok(())
    }

    /// Whether `pattern` (registered or not) matches `path`.
    pub fn matches(pattern: &str, path: &str) -> Result<bool, CoreError> {
        Ok(RoutePattern::parse(pattern)?.matches(path))
    }

    /// Most specific registered pattern matching the path.
    pub fn resolve(&self, path: &str) -> Option<&str> {
        self.patterns
            .iter()
            .filter(|pattern| pattern.matches(path))
            .max_by(|a, b| a.specificity().cmp(&b.specificity()))
            .map(|pattern| pattern.raw.as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_matches_any_single_segment() {
        let pattern = RoutePattern::parse("/api/users/{id}").unwrap();
        assert!(pattern.matches("/api/users/123"));
        assert!(pattern.matches("/api/users/abc"));
        assert!(!pattern.matches("/api/users/123/extra"));
        assert!(!pattern.matches("/api/users"));
    }

    #[test]
    fn test_trailing_wildcard_needs_at_least_one_segment() {
        let pattern = RoutePattern::parse("/static/*").unwrap();
        assert!(pattern.matches("/static/css/site.css"));
        assert!(pattern.matches("/static/app.js"));
        assert!(!pattern.matches("/static"));
        assert!(!pattern.matches("/other/app.js"));
    }

    #[test]
    fn test_non_trailing_wildcard_rejected() {
        assert!(RoutePattern::parse("/a/*/b").is_err());
        assert!(RoutePattern::parse("api/users").is_err());
        assert!(RoutePattern::parse("/a/{}").is_err());
        assert!(RoutePattern::parse("/a/x{y}").is_err());
    }

    #[test]
    fn test_resolve_prefers_literals_over_placeholders() {
        let mut matcher = PathMatcher::new();
        matcher.register("/api/users/{id}").unwrap();
        matcher.register("/api/users/me").unwrap();
        matcher.register("/api/*").unwrap();

        assert_eq!(matcher.resolve("/api/users/me"), Some("/api/users/me"));
        assert_eq!(matcher.resolve("/api/users/42"), Some("/api/users/{id}"));
        assert_eq!(matcher.resolve("/api/health"), Some("/api/*"));
        assert_eq!(matcher.resolve("/metrics"), None);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut matcher = PathMatcher::new();
        matcher.register("/a/{x}").unwrap();
        matcher.register("/a/{x}").unwrap();
        assert_eq!(matcher.len(), 1);
    }

    #[test]
    fn test_static_matches_helper() {
        assert!(PathMatcher::matches("/api/users/{id}", "/api/users/9").unwrap());
        assert!(!PathMatcher::matches("/api/users/{id}", "/api/users").unwrap());
    }
}
