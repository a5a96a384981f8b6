//! Express-style path patterns
//!
//! Supported syntax: literal text, `:name` parameters (one path segment) and
//! `*` wildcards (any run of characters, `/` included). Matching ignores case
//! and tolerates a trailing slash. Mount patterns match a prefix ending on a
//! segment boundary.

use std::collections::BTreeMap;

use regex::Regex;

/// A compiled path pattern
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    /// Parameter names in capture order; wildcards are named "0", "1", ...
    keys: Vec<String>,
}

/// Parameters captured by the route that matched a request
///
/// Inserted into the request extensions before the route's handler runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(pub BTreeMap<String, String>);

/// Result of a successful match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub params: BTreeMap<String, String>,
    /// Byte length of the matched prefix (whole path for routes)
    pub matched: usize,
}

impl PathPattern {
    /// Pattern that must match the whole path
    pub fn route(path: &str) -> Result<Self, regex::Error> {
        Self::compile(path, true)
    }

    /// Pattern that matches a leading run of whole segments
    pub fn mount(path: &str) -> Result<Self, regex::Error> {
        Self::compile(path, false)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &str) -> Option<PathMatch> {
        let captures = self.regex.captures(path)?;
        let matched = captures.get(1).map_or(0, |m| m.end());

        let params = self
            .keys
            .iter()
            .enumerate()
            .filter_map(|(i, key)| {
                captures
                    .get(i + 2)
                    .map(|value| (key.clone(), value.as_str().to_string()))
            })
            .collect();

        Some(PathMatch { params, matched })
    }

    fn compile(path: &str, end: bool) -> Result<Self, regex::Error> {
        let trimmed = path.trim_end_matches('/');
        let mut pattern = String::from("(?i)^(");
        let mut keys = Vec::new();
        let mut wildcards = 0;

        let mut chars = trimmed.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                ':' => {
                    let mut name = String::new();
                    while let Some(&next) = chars.peek() {
                        if next.is_ascii_alphanumeric() || next == '_' {
                            name.push(next);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if name.is_empty() {
                        pattern.push(':');
                    } else {
                        keys.push(name);
                        pattern.push_str("([^/]+?)");
                    }
                }
                '*' => {
                    keys.push(wildcards.to_string());
                    wildcards += 1;
                    pattern.push_str("(.*)");
                }
                other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }

        pattern.push(')');
        pattern.push_str(if end { "/?$" } else { "(?:/|$)" });

        Ok(Self {
            source: path.to_string(),
            regex: Regex::new(&pattern)?,
            keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/api/something", "/api/something", true)]
    #[case("/api/something", "/API/Something/", true)]
    #[case("/api/something", "/api/something/else", false)]
    #[case("/api/something", "/api/somethingelse", false)]
    #[case("/", "/", true)]
    #[case("/", "/x", false)]
    #[case("/api*", "/api", true)]
    #[case("/api*", "/apiv2", true)]
    #[case("/api*", "/api/deep/path", true)]
    #[case("*", "/anything/at/all", true)]
    #[case("/a.b", "/axb", false)]
    fn test_route_matching(#[case] pattern: &str, #[case] path: &str, #[case] expected: bool) {
        let pattern = PathPattern::route(pattern).unwrap();
        assert_eq!(pattern.matches(path).is_some(), expected);
    }

    #[test]
    fn test_named_params() {
        let pattern = PathPattern::route("/users/:id/posts/:post_id").unwrap();
        let found = pattern.matches("/users/42/posts/abc").unwrap();
        assert_eq!(found.params["id"], "42");
        assert_eq!(found.params["post_id"], "abc");
        assert!(pattern.matches("/users/42/posts").is_none());
    }

    #[test]
    fn test_wildcard_params() {
        let pattern = PathPattern::route("/files/*").unwrap();
        let found = pattern.matches("/files/a/b.txt").unwrap();
        assert_eq!(found.params["0"], "a/b.txt");
    }

    #[rstest]
    #[case("/sub", "/sub", Some(4))]
    #[case("/sub", "/sub/", Some(4))]
    #[case("/sub", "/sub/x/y", Some(4))]
    #[case("/sub", "/subway", None)]
    #[case("/", "/anything", Some(0))]
    #[case("", "/anything", Some(0))]
    fn test_mount_matching(
        #[case] pattern: &str,
        #[case] path: &str,
        #[case] matched: Option<usize>,
    ) {
        let pattern = PathPattern::mount(pattern).unwrap();
        assert_eq!(pattern.matches(path).map(|m| m.matched), matched);
    }
}
