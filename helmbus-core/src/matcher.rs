//! Subscription pattern matching
//!
//! Subscriptions name a variable pattern and an app (publisher) pattern.
//! Matching is glob-style: `*` matches any run of characters, `?` exactly
//! one. Comparison is ASCII case-insensitive. No regex, no character
//! classes; matching is O(len) and allocation-free.

use std::cmp::Ordering;
use std::fmt;

/// Glob match of `pattern` against `text`.
///
/// Two-pointer scan with a backtrack anchor at the most recent `*`:
/// each text byte is visited at most once per star, so a pattern with a
/// single star is linear.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0usize, 0usize);
    // Position after the last `*` seen, and the text position it was
    // anchored to.
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == b'?' || p[pi].eq_ignore_ascii_case(&t[ti])) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some((pi + 1, ti));
            pi += 1;
        } else if let Some((star_p, star_t)) = star {
            // Mismatch past a star: widen the star by one text byte and
            // retry from just after it.
            pi = star_p;
            ti = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// Does a pattern contain glob metacharacters at all?
///
/// Patterns without them attach to a single concrete variable; patterns
/// with them are kept for re-evaluation whenever a new variable name is
/// first seen.
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// A registered wildcard subscription filter: app pattern, variable
/// pattern, and the requested throttle period.
///
/// Filters are totally ordered on `(var_pattern, app_pattern)` — the
/// period deliberately does not participate, so re-registering the same
/// pattern pair replaces the old period instead of accumulating
/// duplicate rows.
#[derive(Debug, Clone)]
pub struct MsgFilter {
    app_pattern: String,
    var_pattern: String,
    period: f64,
}

impl MsgFilter {
    pub fn new(app_pattern: &str, var_pattern: &str, period: f64) -> Self {
        MsgFilter {
            app_pattern: app_pattern.to_owned(),
            var_pattern: var_pattern.to_owned(),
            period,
        }
    }

    /// Conjunctive match against a published message's source and key.
    /// An empty app pattern means "any source".
    pub fn matches(&self, source: &str, key: &str) -> bool {
        let app_ok = self.app_pattern.is_empty() || wildcard_match(&self.app_pattern, source);
        app_ok && wildcard_match(&self.var_pattern, key)
    }

    pub fn app_pattern(&self) -> &str {
        &self.app_pattern
    }

    pub fn var_pattern(&self) -> &str {
        &self.var_pattern
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn as_string(&self) -> String {
        format!("{}:{}", self.var_pattern, self.app_pattern)
    }
}

impl PartialEq for MsgFilter {
    fn eq(&self, other: &Self) -> bool {
        self.var_pattern == other.var_pattern && self.app_pattern == other.app_pattern
    }
}

impl Eq for MsgFilter {}

impl PartialOrd for MsgFilter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MsgFilter {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.var_pattern, &self.app_pattern).cmp(&(&other.var_pattern, &other.app_pattern))
    }
}

impl fmt::Display for MsgFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}
