//! Topic names and wildcard matching.
//!
//! A topic is a non-empty, case-sensitive string. The `*` marker matches any
//! run of characters (including none), so `news.*` is a prefix pattern.
//! The same matcher is used for whitelist resolution, event-bus listener
//! selection, and wildcard fallback at publish time.

use std::fmt;

use globset::{GlobBuilder, GlobMatcher};
use percent_encoding::percent_decode_str;

use crate::errors::{CoreError, Result};

/// Wildcard marker inside a topic pattern.
pub const WILDCARD: char = '*';

/// Reserved topic that is never attached through the per-connection path.
pub const GLOBAL_TOPIC: &str = "eventsbus";

/// Event-bus namespace used for events published by clients.
pub const PUSH_SCOPE: &str = "browser";

/// Request header listing the extra topics a connection subscribes to.
pub const TOPICS_HEADER: &str = "topics";

/// Validate a topic string, returning it unchanged when non-empty.
pub fn validate(topic: &str) -> Result<&str> {
    if topic.is_empty() {
        return Err(CoreError::EmptyTopic);
    }
    Ok(topic)
}

/// Whether a pattern contains the wildcard marker.
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.contains(WILDCARD)
}

/// A compiled topic pattern.
///
/// Patterns without `*` compare for string equality. Wildcard patterns are
/// compiled once into a glob whose literal runs are escaped, so `?`, `[`,
/// `{` and `\` inside a topic never act as glob syntax, and `*` also
/// matches `/`.
#[derive(Clone, Debug)]
pub struct TopicPattern {
    source: String,
    glob: Option<GlobMatcher>,
}

impl TopicPattern {
    /// Compile `pattern`.
    pub fn new(pattern: &str) -> Result<Self> {
        let glob = if is_wildcard(pattern) {
            let compiled = GlobBuilder::new(&to_glob(pattern))
                .literal_separator(false)
                .backslash_escape(false)
                .build()
                .map_err(|e| CoreError::InvalidPattern {
                    pattern: pattern.to_owned(),
                    reason: e.to_string(),
                })?;
            Some(compiled.compile_matcher())
        } else {
            None
        };
        Ok(Self {
            source: pattern.to_owned(),
            glob,
        })
    }

    /// Pattern that only matches `topic` itself, even if it contains `*`.
    pub fn exact(topic: &str) -> Self {
        Self {
            source: topic.to_owned(),
            glob: None,
        }
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern was compiled as a wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.glob.is_some()
    }

    /// Whether `topic` matches.
    pub fn is_match(&self, topic: &str) -> bool {
        match &self.glob {
            Some(glob) => glob.is_match(topic),
            None => self.source == topic,
        }
    }
}

impl PartialEq for TopicPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.is_wildcard() == other.is_wildcard()
    }
}

impl Eq for TopicPattern {}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Match a concrete topic against a pattern, compiling it on the spot.
///
/// Patterns without `*` match only the identical string. Hot paths should
/// hold a [`TopicPattern`] instead.
pub fn matches(pattern: &str, topic: &str) -> bool {
    TopicPattern::new(pattern).is_ok_and(|p| p.is_match(topic))
}

/// Glob source for a `*` pattern. Runs of `*` collapse to one.
fn to_glob(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len() + 8);
    for (i, literal) in pattern.split(WILDCARD).enumerate() {
        if i > 0 && !glob.ends_with(WILDCARD) {
            glob.push(WILDCARD);
        }
        escape_literal(literal, &mut glob);
    }
    glob
}

fn escape_literal(literal: &str, out: &mut String) {
    let mut run = String::new();
    for c in literal.chars() {
        if matches!(c, '{' | '}') {
            out.push_str(&globset::escape(&run));
            run.clear();
            out.push('[');
            out.push(c);
            out.push(']');
        } else {
            run.push(c);
        }
    }
    out.push_str(&globset::escape(&run));
}

/// Extract the topic addressed by a request path: its last non-empty
/// segment, percent-decoded.
///
/// `/events/news.sports` → `news.sports`; `/` → `None`.
pub fn from_path(path: &str) -> Option<String> {
    let last = path.split('/').rev().find(|segment| !segment.is_empty())?;
    let decoded = percent_decode_str(last).decode_utf8_lossy().into_owned();
    (!decoded.is_empty()).then_some(decoded)
}

/// Split a comma-separated `topics` header into topic names.
///
/// Entries are trimmed; empty entries are dropped.
pub fn parse_list(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exact_pattern_matches_only_itself() {
        assert!(matches("news", "news"));
        assert!(!matches("news", "News"));
        assert!(!matches("news", "news.sports"));
        assert!(!matches("news", "new"));
    }

    #[test]
    fn trailing_wildcard_is_prefix_match() {
        assert!(matches("news.*", "news.sports"));
        assert!(matches("news.*", "news.weather"));
        assert!(!matches("news.*", "newsonly"));
        assert!(!matches("news.*", "other"));
    }

    #[test]
    fn trailing_wildcard_matches_empty_remainder() {
        assert!(matches("news.*", "news."));
    }

    #[test]
    fn bare_wildcard_matches_everything() {
        assert!(matches("*", "anything"));
        assert!(matches("*", ""));
    }

    #[test]
    fn inner_wildcard_backtracks() {
        assert!(matches("a*c", "abbbc"));
        assert!(matches("a*b*c", "axxbyyc"));
        assert!(!matches("a*c", "abbbd"));
        assert!(matches("*.done", "job.42.done"));
    }

    #[test]
    fn wildcard_with_multibyte_characters() {
        assert!(matches("caf*", "café.menu"));
        assert!(matches("*é", "café"));
    }

    #[test]
    fn glob_metacharacters_in_topics_are_literal() {
        assert!(matches("a?c*", "a?c.1"));
        assert!(!matches("a?c*", "abc.1"));
        assert!(matches("[x]*", "[x]y"));
        assert!(!matches("[x]*", "xy"));
        assert!(matches("{a,b}.*", "{a,b}.c"));
        assert!(!matches("{a,b}.*", "a.c"));
        assert!(matches("dir\\*", "dir\\file"));
        assert!(matches("a]*", "a]b"));
    }

    #[test]
    fn wildcard_crosses_slashes() {
        assert!(matches("chat/*", "chat/room/7"));
        assert!(matches("*/7", "chat/room/7"));
    }

    #[test]
    fn repeated_stars_act_as_one() {
        assert!(matches("a**b", "axyzb"));
        assert!(matches("**", "anything"));
        assert!(matches("news.***", "news."));
    }

    #[test]
    fn compiled_pattern_reports_its_kind() {
        let exact = TopicPattern::new("news").unwrap();
        assert!(!exact.is_wildcard());
        assert!(exact.is_match("news"));
        assert!(!exact.is_match("news.a"));

        let wild = TopicPattern::new("news.*").unwrap();
        assert!(wild.is_wildcard());
        assert!(wild.is_match("news.a"));
        assert_eq!(wild.to_string(), "news.*");

        let literal_star = TopicPattern::exact("news.*");
        assert!(!literal_star.is_match("news.a"));
        assert!(literal_star.is_match("news.*"));
        assert_ne!(literal_star, wild);
    }

    #[test]
    fn validate_rejects_empty() {
        assert!(matches!(validate(""), Err(CoreError::EmptyTopic)));
        assert_eq!(validate("t").unwrap(), "t");
    }

    #[test]
    fn from_path_takes_last_segment() {
        assert_eq!(from_path("/events/news").as_deref(), Some("news"));
        assert_eq!(from_path("/events/a/b/").as_deref(), Some("b"));
        assert_eq!(from_path("news").as_deref(), Some("news"));
        assert_eq!(from_path("/a//b").as_deref(), Some("b"));
    }

    #[test]
    fn from_path_decodes_percent_escapes() {
        assert_eq!(from_path("/events/chat%20room").as_deref(), Some("chat room"));
    }

    #[test]
    fn from_path_empty_is_none() {
        assert_eq!(from_path("/"), None);
        assert_eq!(from_path(""), None);
    }

    #[test]
    fn parse_list_trims_and_skips_empty() {
        assert_eq!(parse_list("a, b ,,c"), vec!["a", "b", "c"]);
        assert!(parse_list("").is_empty());
        assert!(parse_list(" , ").is_empty());
    }

    proptest! {
        #[test]
        fn literal_pattern_matches_iff_equal(a in "[a-z.]{0,8}", b in "[a-z.]{0,8}") {
            prop_assert_eq!(matches(&a, &b), a == b);
        }

        #[test]
        fn prefix_star_matches_any_suffix(prefix in "[a-z.]{0,8}", suffix in "[a-z.]{0,8}") {
            let pattern = format!("{prefix}*");
            let topic = format!("{prefix}{suffix}");
            prop_assert!(matches(&pattern, &topic));
        }

        #[test]
        fn literal_runs_never_act_as_glob(prefix in "[a-z?\\[\\]{},!]{0,6}", suffix in "[a-z]{0,6}") {
            let pattern = format!("{prefix}*");
            let topic = format!("{prefix}{suffix}");
            prop_assert!(matches(&pattern, &topic));
        }

        #[test]
        fn prefix_star_rejects_other_prefixes(prefix in "[a-m]{1,6}", topic in "[n-z]{1,6}") {
            let pattern = format!("{prefix}*");
            prop_assert!(!matches(&pattern, &topic));
        }
    }
}
