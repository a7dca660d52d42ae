use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Expression {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Selects a set of objects by their labels.
///
/// An empty selector selects everything.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    match_labels: Option<Map>,
    match_expressions: Option<Expressions>,
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum ParseError {
    #[error("empty requirement in selector {0:?}")]
    EmptyRequirement(String),

    #[error("missing label key in requirement {0:?}")]
    MissingKey(String),

    #[error("set-based requirement must be enclosed in parentheses: {0:?}")]
    MissingParens(String),

    #[error("unbalanced parentheses in selector {0:?}")]
    Unbalanced(String),
}

// === Selector ===

impl Selector {
    pub fn from_expressions(exprs: Expressions) -> Self {
        Self {
            match_labels: None,
            match_expressions: Some(exprs),
        }
    }

    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: Some(map),
            match_expressions: None,
        }
    }

    /// Returns true if the selector has no requirements.
    pub fn is_empty(&self) -> bool {
        self.match_labels.as_ref().map_or(true, Map::is_empty)
            && self.match_expressions.as_ref().map_or(true, Vec::is_empty)
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.matches_map(labels.as_ref())
    }

    pub fn matches_map(&self, labels: &Map) -> bool {
        for expr in self.match_expressions.iter().flatten() {
            if !expr.matches(labels) {
                return false;
            }
        }

        if let Some(match_labels) = self.match_labels.as_ref() {
            for (k, v) in match_labels.iter() {
                if labels.get(k) != Some(v) {
                    return false;
                }
            }
        }

        true
    }

    /// Parses a selector in the Kubernetes string syntax, e.g.
    /// `app=reviews,version!=v1,tier in (web, api),!canary`.
    fn parse(s: &str) -> Result<Self, ParseError> {
        let mut exprs = Expressions::new();
        for term in split_requirements(s)? {
            exprs.push(Expression::parse(term)?);
        }
        Ok(Self::from_expressions(exprs))
    }
}

impl std::str::FromStr for Selector {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

/// Splits a selector string on the commas that separate requirements, ignoring
/// commas inside a set-based value list.
fn split_requirements(s: &str) -> Result<Vec<&str>, ParseError> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ParseError::Unbalanced(s.to_string()))?
            }
            ',' if depth == 0 => {
                terms.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ParseError::Unbalanced(s.to_string()));
    }
    terms.push(&s[start..]);

    terms
        .into_iter()
        .map(|t| {
            let t = t.trim();
            if t.is_empty() {
                Err(ParseError::EmptyRequirement(s.to_string()))
            } else {
                Ok(t)
            }
        })
        .collect()
}

// === Labels ===

impl Labels {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl Serialize for Labels {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_ref().serialize(serializer)
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// === Expression ===

impl Expression {
    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => labels
                .get(&self.key)
                .map_or(false, |v| self.values.contains(v)),
            Operator::NotIn => labels
                .get(&self.key)
                .map_or(true, |v| !self.values.contains(v)),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }

    fn parse(term: &str) -> Result<Self, ParseError> {
        if let Some(key) = term.strip_prefix('!') {
            return Self::unary(key.trim(), Operator::DoesNotExist, term);
        }

        if let Some((key, value)) = term.split_once("!=") {
            return Self::binary(key, Operator::NotIn, value, term);
        }
        if let Some((key, value)) = term.split_once("==") {
            return Self::binary(key, Operator::In, value, term);
        }
        if let Some((key, value)) = term.split_once('=') {
            return Self::binary(key, Operator::In, value, term);
        }

        if let Some((key, rest)) = term.split_once(char::is_whitespace) {
            let rest = rest.trim_start();
            let (operator, list) = if let Some(list) = rest.strip_prefix("notin") {
                (Operator::NotIn, list)
            } else if let Some(list) = rest.strip_prefix("in") {
                (Operator::In, list)
            } else {
                return Err(ParseError::MissingParens(term.to_string()));
            };
            let list = list
                .trim()
                .strip_prefix('(')
                .and_then(|l| l.strip_suffix(')'))
                .ok_or_else(|| ParseError::MissingParens(term.to_string()))?;
            let values = list
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            return Ok(Self {
                key: Self::key(key, term)?,
                operator,
                values,
            });
        }

        Self::unary(term, Operator::Exists, term)
    }

    fn unary(key: &str, operator: Operator, term: &str) -> Result<Self, ParseError> {
        Ok(Self {
            key: Self::key(key, term)?,
            operator,
            values: BTreeSet::new(),
        })
    }

    fn binary(key: &str, operator: Operator, value: &str, term: &str) -> Result<Self, ParseError> {
        Ok(Self {
            key: Self::key(key, term)?,
            operator,
            values: Some(value.trim().to_string()).into_iter().collect(),
        })
    }

    fn key(key: &str, term: &str) -> Result<String, ParseError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ParseError::MissingKey(term.to_string()));
        }
        Ok(key.to_string())
    }
}
