//! Domain matching
//!
//! Decides whether a hostname belongs to a backend. Literal rules compare
//! for exact equality. Regex rules use "find anywhere" semantics: the
//! pattern `example\.com` matches `evilexample.com.attacker.net` unless the
//! rule anchors itself with `^`/`$`. Backend descriptors rely on this, so it
//! is not tightened here.

use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::policy::DomainRule;

/// Why a regex domain rule could not be compiled
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("unknown regex flag '{0}'")]
    UnknownFlag(char),

    #[error("regex flag '{0}' given more than once")]
    DuplicateFlag(char),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Compiles `pattern` using JavaScript-style `flags`.
///
/// `i`, `m` and `s` map onto the matching regex options. `y` (sticky)
/// forces the match to start at the beginning of the hostname. `g`, `d`,
/// `u` and `v` change nothing for a yes/no test and are accepted as-is.
pub fn compile(pattern: &str, flags: &str) -> Result<Regex, RuleError> {
    let mut seen = String::with_capacity(flags.len());
    let mut case_insensitive = false;
    let mut multi_line = false;
    let mut dot_all = false;
    let mut sticky = false;

    for flag in flags.chars() {
        if seen.contains(flag) {
            return Err(RuleError::DuplicateFlag(flag));
        }
        seen.push(flag);

        match flag {
            'i' => case_insensitive = true,
            'm' => multi_line = true,
            's' => dot_all = true,
            'y' => sticky = true,
            'g' | 'd' | 'u' | 'v' => {}
            other => return Err(RuleError::UnknownFlag(other)),
        }
    }

    let source = if sticky {
        format!(r"\A(?:{})", pattern)
    } else {
        pattern.to_string()
    };

    let regex = RegexBuilder::new(&source)
        .case_insensitive(case_insensitive)
        .multi_line(multi_line)
        .dot_matches_new_line(dot_all)
        .build()?;
    Ok(regex)
}

impl DomainRule {
    /// Whether this single rule accepts `hostname`
    pub fn matches(&self, hostname: &str) -> bool {
        match self.compiled() {
            Some(regex) => regex.is_match(hostname),
            None => self.pattern() == hostname,
        }
    }
}

/// True on the first rule, in order, that accepts `hostname`.
pub fn matches_any(hostname: &str, rules: &[DomainRule]) -> bool {
    rules.iter().any(|rule| rule.matches(hostname))
}
