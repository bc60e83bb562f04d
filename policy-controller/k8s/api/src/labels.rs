use std::{
    collections::{BTreeMap, BTreeSet},
    str::FromStr,
    sync::Arc,
};

#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expression {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Selects resources by their labels, as in a list request's
/// `labelSelector` parameter.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Selector {
    match_labels: Option<Map>,
    match_expressions: Option<Expressions>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("label selector requirement is empty")]
    Empty,

    #[error("invalid label selector requirement: {0}")]
    Invalid(String),
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

    pub fn matches(&self, labels: &Labels) -> bool {
        for expr in self.match_expressions.iter().flatten() {
            if !expr.matches(labels.as_ref()) {
                return false;
            }
        }

        if let Some(match_labels) = self.match_labels.as_ref() {
            for (k, v) in match_labels.iter() {
                if labels.0.get(k) != Some(v) {
                    return false;
                }
            }
        }

        true
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

/// Parses the Kubernetes selector syntax: `k=v`, `k==v`, `k!=v`,
/// `k in (a,b)`, `k notin (a,b)`, `k` and `!k`, joined by commas.
impl FromStr for Selector {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut labels = Map::new();
        let mut exprs = Expressions::new();
        for req in split_requirements(s) {
            let req = req.trim();
            if req.is_empty() {
                return Err(ParseError::Empty);
            }

            if let Some(key) = req.strip_prefix('!') {
                exprs.push(Expression::new(key, Operator::DoesNotExist, None)?);
            } else if let Some((key, value)) = req.split_once("!=") {
                exprs.push(Expression::new(key, Operator::NotIn, Some(value))?);
            } else if let Some((key, value)) = req
                .split_once("==")
                .or_else(|| req.split_once('='))
            {
                let (key, value) = (key.trim(), value.trim());
                if key.is_empty() {
                    return Err(ParseError::Invalid(req.to_string()));
                }
                labels.insert(key.to_string(), value.to_string());
            } else if let Some((key, values)) = split_set(req, " notin ") {
                exprs.push(Expression::with_values(key, Operator::NotIn, values)?);
            } else if let Some((key, values)) = split_set(req, " in ") {
                exprs.push(Expression::with_values(key, Operator::In, values)?);
            } else {
                exprs.push(Expression::new(req, Operator::Exists, None)?);
            }
        }

        Ok(Self {
            match_labels: Some(labels).filter(|l| !l.is_empty()),
            match_expressions: Some(exprs).filter(|e| !e.is_empty()),
        })
    }
}

/// Splits on commas that are not inside a parenthesized value set.
fn split_requirements(s: &str) -> Vec<&str> {
    let mut reqs = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                reqs.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    reqs.push(&s[start..]);
    reqs
}

fn split_set<'s>(req: &'s str, op: &str) -> Option<(&'s str, Vec<&'s str>)> {
    let (key, set) = req.split_once(op)?;
    let set = set.trim().strip_prefix('(')?.strip_suffix(')')?;
    Some((key, set.split(',').map(str::trim).collect()))
}

// === Labels ===

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
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
    fn new(key: &str, operator: Operator, value: Option<&str>) -> Result<Self, ParseError> {
        Self::with_values(key, operator, value.into_iter().collect())
    }

    fn with_values(key: &str, operator: Operator, values: Vec<&str>) -> Result<Self, ParseError> {
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(ParseError::Invalid(key.to_string()));
        }
        Ok(Self {
            key: key.to_string(),
            operator,
            values: values.into_iter().map(|v| v.trim().to_string()).collect(),
        })
    }

    fn matches(&self, labels: &Map) -> bool {
        match self.operator {
            Operator::In => labels
                .get(&self.key)
                .map(|v| self.values.contains(v))
                .unwrap_or(false),
            Operator::NotIn => labels
                .get(&self.key)
                .map(|v| !self.values.contains(v))
                .unwrap_or(true),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}
