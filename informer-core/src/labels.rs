//! Label selectors: parsing the API string form and matching label maps
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    iter::FromIterator,
    str::FromStr,
};
use thiserror::Error;

// local type aliases
type Map = BTreeMap<String, String>;
type Expressions = Vec<Expression>;

/// A selector expression with existing operations
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Expression {
    /// `key in (a,b)`
    In(String, BTreeSet<String>),
    /// `key notin (a,b)`
    NotIn(String, BTreeSet<String>),
    /// `key=value` or `key==value`
    Equal(String, String),
    /// `key!=value`
    NotEqual(String, String),
    /// `key`
    Exists(String),
    /// `!key`
    DoesNotExist(String),
}

/// Perform selection on a list of expressions
///
/// An empty selector selects everything.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct Selector(Expressions);

/// Failure to parse a selector string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseSelectorError {
    /// A requirement had no key
    #[error("selector requirement {0:?} has an empty key")]
    EmptyKey(String),
    /// A set-based requirement did not have a parenthesised value list
    #[error("selector requirement {0:?} has malformed values, expected `(a,b,...)`")]
    MalformedValues(String),
    /// Parentheses did not pair up
    #[error("selector {0:?} has unbalanced parentheses")]
    UnbalancedParens(String),
}

impl Selector {
    /// Create a selector from a map of key=value label matches
    fn from_map(map: Map) -> Self {
        Self(map.into_iter().map(|(k, v)| Expression::Equal(k, v)).collect())
    }

    /// Indicates whether this label selector matches all objects
    pub fn selects_all(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every expression holds for the given labels
    pub fn matches(&self, labels: &Map) -> bool {
        self.0.iter().all(|expr| expr.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, expr) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{expr}")?;
        }
        Ok(())
    }
}

impl FromStr for Selector {
    type Err = ParseSelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        split_requirements(s)?
            .into_iter()
            .filter(|term| !term.is_empty())
            .map(Expression::from_str)
            .collect()
    }
}

/// Split on commas that are not inside a `(...)` value list
fn split_requirements(s: &str) -> Result<Vec<&str>, ParseSelectorError> {
    let mut terms = vec![];
    let mut depth = 0_usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ParseSelectorError::UnbalancedParens(s.to_string()))?;
            }
            ',' if depth == 0 => {
                terms.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ParseSelectorError::UnbalancedParens(s.to_string()));
    }
    terms.push(s[start..].trim());
    Ok(terms)
}

// === Expression ===

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |values: &BTreeSet<String>| values.iter().cloned().collect::<Vec<_>>().join(",");
        match self {
            Expression::In(key, values) => write!(f, "{key} in ({})", join(values)),
            Expression::NotIn(key, values) => write!(f, "{key} notin ({})", join(values)),
            Expression::Equal(key, value) => write!(f, "{key}={value}"),
            Expression::NotEqual(key, value) => write!(f, "{key}!={value}"),
            Expression::Exists(key) => write!(f, "{key}"),
            Expression::DoesNotExist(key) => write!(f, "!{key}"),
        }
    }
}

impl FromStr for Expression {
    type Err = ParseSelectorError;

    fn from_str(term: &str) -> Result<Self, Self::Err> {
        let key = |k: &str| {
            let k = k.trim();
            if k.is_empty() {
                Err(ParseSelectorError::EmptyKey(term.to_string()))
            } else {
                Ok(k.to_string())
            }
        };
        let values = |v: &str| {
            v.trim()
                .strip_prefix('(')
                .and_then(|v| v.strip_suffix(')'))
                .map(|inner| {
                    inner
                        .split(',')
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(String::from)
                        .collect::<BTreeSet<_>>()
                })
                .ok_or_else(|| ParseSelectorError::MalformedValues(term.to_string()))
        };

        if let Some((k, v)) = term.split_once(" notin ") {
            Ok(Expression::NotIn(key(k)?, values(v)?))
        } else if let Some((k, v)) = term.split_once(" in ") {
            Ok(Expression::In(key(k)?, values(v)?))
        } else if let Some((k, v)) = term.split_once("!=") {
            Ok(Expression::NotEqual(key(k)?, v.trim().to_string()))
        } else if let Some((k, v)) = term.split_once("==") {
            Ok(Expression::Equal(key(k)?, v.trim().to_string()))
        } else if let Some((k, v)) = term.split_once('=') {
            Ok(Expression::Equal(key(k)?, v.trim().to_string()))
        } else if let Some(k) = term.strip_prefix('!') {
            Ok(Expression::DoesNotExist(key(k)?))
        } else {
            Ok(Expression::Exists(key(term)?))
        }
    }
}

impl Expression {
    fn matches(&self, labels: &Map) -> bool {
        match self {
            Expression::In(key, values) => match labels.get(key) {
                Some(v) => values.contains(v),
                None => false,
            },
            Expression::NotIn(key, values) => match labels.get(key) {
                Some(v) => !values.contains(v),
                None => true,
            },
            Expression::Exists(key) => labels.contains_key(key),
            Expression::DoesNotExist(key) => !labels.contains_key(key),
            Expression::Equal(key, value) => labels.get(key) == Some(value),
            Expression::NotEqual(key, value) => labels.get(key) != Some(value),
        }
    }
}

// convenience conversions for Selector

impl FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Expression> for Selector {
    fn from(value: Expression) -> Self {
        Self(vec![value])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Map {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_raw_matches() {
        for (selector, labels, matches, msg) in &[
            (Selector::default(), Map::default(), true, "empty match"),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                labels(&[("foo", "bar")]),
                true,
                "exact label match",
            ),
            (
                Selector::from_iter(Some(("foo", "bar"))),
                labels(&[("foo", "bar"), ("bah", "baz")]),
                true,
                "sufficient label match",
            ),
            (
                Selector::from_iter(Some(Expression::In("foo".into(), ["bar".to_string()].into()))),
                labels(&[("foo", "bar"), ("bah", "baz")]),
                true,
                "In expression match",
            ),
            (
                Selector::from_iter(Some(Expression::NotEqual("foo".into(), "bar".into()))),
                labels(&[("foo", "bar"), ("bah", "baz")]),
                false,
                "NotEqual expression match",
            ),
            (
                Selector::from_iter(Some(Expression::NotIn("foo".into(), ["quux".to_string()].into()))),
                labels(&[("foo", "bar"), ("bah", "baz")]),
                true,
                "NotIn expression match",
            ),
            (
                Selector(vec![
                    Expression::Equal("foo".to_string(), "bar".to_string()),
                    Expression::In("bah".into(), ["bar".to_string()].into()),
                ]),
                labels(&[("foo", "bar"), ("bah", "baz")]),
                false,
                "matches labels but not expressions",
            ),
        ] {
            assert_eq!(selector.matches(labels), *matches, "{}", msg);
        }
    }

    #[test]
    fn parses_equality_selector() {
        let selector: Selector = "k8s-app=kube-dns".parse().unwrap();
        assert_eq!(
            selector,
            Selector::from(Expression::Equal("k8s-app".into(), "kube-dns".into()))
        );
        assert!(selector.matches(&labels(&[("k8s-app", "kube-dns"), ("pod-template-hash", "x")])));
        assert!(!selector.matches(&labels(&[("k8s-app", "metrics-server")])));
        assert!(!selector.matches(&Map::default()));
    }

    #[test]
    fn parses_set_based_selector() {
        let selector: Selector = "tier in (web, api),env notin (dev),!legacy,owner,app==x,rel!=canary"
            .parse()
            .unwrap();
        assert_eq!(
            selector,
            Selector(vec![
                Expression::In("tier".into(), ["web".to_string(), "api".to_string()].into()),
                Expression::NotIn("env".into(), ["dev".to_string()].into()),
                Expression::DoesNotExist("legacy".into()),
                Expression::Exists("owner".into()),
                Expression::Equal("app".into(), "x".into()),
                Expression::NotEqual("rel".into(), "canary".into()),
            ])
        );
        assert!(selector.matches(&labels(&[("tier", "api"), ("owner", "me"), ("app", "x")])));
        assert!(!selector.matches(&labels(&[("tier", "api"), ("owner", "me"), ("app", "x"), ("legacy", "")])));
    }

    #[test]
    fn empty_string_selects_all() {
        let selector: Selector = "".parse().unwrap();
        assert!(selector.selects_all());
        assert!(selector.matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn rejects_malformed_selectors() {
        assert_eq!(
            "=value".parse::<Selector>(),
            Err(ParseSelectorError::EmptyKey("=value".into()))
        );
        assert_eq!(
            "tier in web".parse::<Selector>(),
            Err(ParseSelectorError::MalformedValues("tier in web".into()))
        );
        assert!(matches!(
            "tier in (web".parse::<Selector>(),
            Err(ParseSelectorError::UnbalancedParens(_))
        ));
    }

    #[test]
    fn test_to_selector_string() {
        let selector = Selector(vec![
            Expression::In("foo".into(), ["bar".into(), "baz".into()].into()),
            Expression::NotIn("foo".into(), ["bar".into(), "baz".into()].into()),
            Expression::Equal("foo".into(), "bar".into()),
            Expression::NotEqual("foo".into(), "bar".into()),
            Expression::Exists("foo".into()),
            Expression::DoesNotExist("foo".into()),
        ])
        .to_string();

        assert_eq!(
            selector,
            "foo in (bar,baz),foo notin (bar,baz),foo=bar,foo!=bar,foo,!foo"
        );
        assert_eq!(selector.parse::<Selector>().unwrap().to_string(), selector);
    }
}
