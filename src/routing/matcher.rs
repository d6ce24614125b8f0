//! Path pattern matching.
//!
//! # Design Decisions
//! - Two pattern shapes: exact (`/health`) and prefix wildcard (`/api/users/*`)
//! - Prefix wildcards match on segment boundaries: `/api/users/*` matches
//!   `/api/users`, `/api/users/` and `/api/users/42` but not `/api/usersx`
//! - Matching is case-sensitive
//! - No regex to guarantee O(n) matching

/// A compiled public path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    Exact(String),
    /// Stored without the trailing `/*`.
    Prefix(String),
}

impl PathPattern {
    /// Compile a pattern, rejecting anything that is not `/exact` or `/prefix/*`.
    pub fn parse(pattern: &str) -> Result<Self, String> {
        if !pattern.starts_with('/') {
            return Err(format!("pattern '{}' must start with '/'", pattern));
        }

        if let Some(prefix) = pattern.strip_suffix("/*") {
            if prefix.contains('*') {
                return Err(format!("pattern '{}' may only end with '/*'", pattern));
            }
            return Ok(PathPattern::Prefix(prefix.to_string()));
        }

        if pattern.contains('*') {
            return Err(format!("pattern '{}' may only end with '/*'", pattern));
        }
        Ok(PathPattern::Exact(pattern.to_string()))
    }

    pub fn matches(&self, path: &str) -> bool {
        self.remainder(path).is_some()
    }

    /// The part of `path` after the pattern, always starting with `/`.
    pub fn remainder<'a>(&self, path: &'a str) -> Option<&'a str> {
        match self {
            PathPattern::Exact(exact) => (path == exact).then_some(""),
            PathPattern::Prefix(prefix) => {
                let rest = path.strip_prefix(prefix.as_str())?;
                if rest.is_empty() || rest.starts_with('/') {
                    Some(rest)
                } else {
                    None
                }
            }
        }
    }

    /// Length of the literal part, used to prefer more specific routes.
    pub fn specificity(&self) -> usize {
        match self {
            PathPattern::Exact(p) | PathPattern::Prefix(p) => p.len(),
        }
    }
}

impl std::fmt::Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathPattern::Exact(p) => write!(f, "{}", p),
            PathPattern::Prefix(p) => write!(f, "{}/*", p),
        }
    }
}
