use globset::{GlobBuilder, GlobMatcher};
use std::fmt;

use super::{StoreError, StoreHandle};

/// Which stores a notifier watches.
///
/// A single-tenant deployment watches one fixed path. A multi-tenant
/// deployment watches every store whose path matches a glob such as
/// `/*/scanner`, where `*` stays within one path segment.
#[derive(Debug, Clone)]
pub enum StoreScope {
    Fixed(StoreHandle),
    Pattern { raw: String, matcher: GlobMatcher },
}

impl StoreScope {
    pub fn fixed(path: impl Into<String>) -> Self {
        StoreScope::Fixed(StoreHandle::new(path))
    }

    pub fn pattern(raw: &str) -> Result<Self, StoreError> {
        let matcher = GlobBuilder::new(raw)
            .literal_separator(true)
            .build()?
            .compile_matcher();
        Ok(StoreScope::Pattern {
            raw: raw.to_string(),
            matcher,
        })
    }

    /// Paths containing glob metacharacters become patterns, anything else
    /// is a fixed single-tenant path.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let raw = raw.trim();
        if raw.contains(['*', '?', '[', '{']) {
            Self::pattern(raw)
        } else {
            Ok(Self::fixed(raw))
        }
    }

    pub fn matches(&self, store: &StoreHandle) -> bool {
        match self {
            StoreScope::Fixed(path) => path == store,
            StoreScope::Pattern { matcher, .. } => matcher.is_match(store.as_str()),
        }
    }

    pub fn is_multi_tenant(&self) -> bool {
        matches!(self, StoreScope::Pattern { .. })
    }
}

impl fmt::Display for StoreScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreScope::Fixed(path) => write!(f, "{path}"),
            StoreScope::Pattern { raw, .. } => f.write_str(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_scope_matches_exact_path() {
        let scope = StoreScope::parse("/scanner").unwrap();
        assert!(!scope.is_multi_tenant());
        assert!(scope.matches(&StoreHandle::new("/scanner")));
        assert!(!scope.matches(&StoreHandle::new("/alice/scanner")));
    }

    #[test]
    fn test_tenant_pattern_stays_within_one_segment() {
        let scope = StoreScope::parse("/*/scanner").unwrap();
        assert!(scope.is_multi_tenant());
        assert!(scope.matches(&StoreHandle::new("/alice/scanner")));
        assert!(scope.matches(&StoreHandle::new("/bob/scanner")));
        assert!(!scope.matches(&StoreHandle::new("/alice/nested/scanner")));
        assert!(!scope.matches(&StoreHandle::new("/alice/scanner-old")));
        assert!(!scope.matches(&StoreHandle::new("/scanner")));
    }

    #[test]
    fn test_recursive_pattern() {
        let scope = StoreScope::parse("/**/scanner").unwrap();
        assert!(scope.matches(&StoreHandle::new("/org/alice/scanner")));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(StoreScope::parse("/[a/scanner"), Err(StoreError::Pattern(_))));
    }
}
