//! Name matching against exact, `glob:` and `regexp:` patterns

use glob::MatchOptions;
use regex::Regex;

use crate::error::Result;

pub const GLOB_PREFIX: &str = "glob:";
pub const REGEXP_PREFIX: &str = "regexp:";

/// Stand-in for `/` so glob wildcards span path components
const SEPARATOR_SENTINEL: &str = "\u{1e}";

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A compiled pattern, reusable across many values
#[derive(Debug, Clone)]
pub enum Pattern {
    Exact(String),
    /// `None` when the glob itself is malformed; it then matches nothing
    Glob(Option<glob::Pattern>),
    Regexp(Regex),
}

impl Pattern {
    /// Compile a pattern string. Only `regexp:` compilation can fail.
    pub fn new(pattern: &str) -> Result<Self> {
        if let Some(glob) = pattern.strip_prefix(GLOB_PREFIX) {
            Ok(Pattern::Glob(glob::Pattern::new(&fold_glob(glob)).ok()))
        } else if let Some(re) = pattern.strip_prefix(REGEXP_PREFIX) {
            Ok(Pattern::Regexp(Regex::new(re)?))
        } else {
            Ok(Pattern::Exact(pattern.to_string()))
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Exact(expected) => expected == value,
            Pattern::Glob(Some(glob)) => glob.matches_with(&fold_glob(value), GLOB_OPTIONS),
            Pattern::Glob(None) => false,
            Pattern::Regexp(re) => re.is_match(value),
        }
    }
}

fn fold_glob(s: &str) -> String {
    s.replace('/', SEPARATOR_SENTINEL).to_lowercase()
}

/// Whether `pattern` carries a `glob:` or `regexp:` prefix
pub fn is_pattern(pattern: &str) -> bool {
    pattern.starts_with(GLOB_PREFIX) || pattern.starts_with(REGEXP_PREFIX)
}

/// Match `value` against `pattern` in one shot
pub fn is_match(pattern: &str, value: &str) -> Result<bool> {
    Ok(Pattern::new(pattern)?.matches(value))
}
