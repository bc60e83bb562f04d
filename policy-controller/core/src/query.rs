//! Filtering, sorting and pagination for list operations.

use crate::{
    k8s::{
        labels::{Labels, Selector},
        Policy, PolicyTemplate, ResourceExt, Rule, Stateful,
    },
    Error, Result, State,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::Serialize;
use std::cmp::Ordering;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    /// Case-insensitive substring of the resource name.
    Name(String),
    Provider(String),
    State(State),
    Template(String),
    Policy(String),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    Name,
    #[default]
    CreationTimestamp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub label_selector: Option<Selector>,
    pub sort_by: SortBy,
    pub ascending: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult<T> {
    pub items: Vec<T>,

    /// The number of matching items before pagination.
    pub total_items: usize,
}

/// A resource that can be listed.
pub trait Item {
    fn item_name(&self) -> String;

    fn item_labels(&self) -> Labels;

    fn item_creation_timestamp(&self) -> Option<Time>;

    /// Filters that do not apply to a kind match nothing.
    fn item_matches(&self, filter: &Filter) -> bool;
}

// === impl Query ===

impl Default for Query {
    fn default() -> Self {
        Self {
            filters: vec![],
            label_selector: None,
            sort_by: SortBy::default(),
            ascending: false,
            limit: None,
            offset: 0,
        }
    }
}

impl Query {
    /// Parses list parameters: `name`, `provider`, `state`, `template`, `policy`,
    /// `labelSelector`, `sortBy` (`name` or `createTime`), `ascending`, `limit` and the 1-based
    /// `page`. Unknown parameters are ignored.
    pub fn from_params<'p>(params: impl IntoIterator<Item = (&'p str, &'p str)>) -> Result<Self> {
        let mut query = Self::default();
        let mut page = None;
        for (key, value) in params {
            match key {
                "name" => query.filters.push(Filter::Name(value.to_string())),
                "provider" => query.filters.push(Filter::Provider(value.to_string())),
                "template" => query.filters.push(Filter::Template(value.to_string())),
                "policy" => query.filters.push(Filter::Policy(value.to_string())),
                "state" => query
                    .filters
                    .push(Filter::State(value.parse().map_err(Error::invalid)?)),
                "labelSelector" if !value.is_empty() => {
                    query.label_selector = Some(value.parse().map_err(Error::invalid)?);
                }
                "sortBy" => {
                    query.sort_by = match value {
                        "name" => SortBy::Name,
                        "createTime" | "creationTimestamp" => SortBy::CreationTimestamp,
                        _ => return Err(Error::invalid(format_args!("cannot sort by {value}"))),
                    }
                }
                "ascending" => query.ascending = parse(key, value)?,
                "limit" => query.limit = Some(parse(key, value)?),
                "page" => page = Some(parse::<usize>(key, value)?),
                _ => {}
            }
        }

        if let Some(page) = page {
            let limit = query
                .limit
                .ok_or_else(|| Error::invalid("page requires limit"))?;
            query.offset = page.saturating_sub(1).saturating_mul(limit);
        }
        Ok(query)
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort_by(mut self, sort_by: SortBy, ascending: bool) -> Self {
        self.sort_by = sort_by;
        self.ascending = ascending;
        self
    }

    pub fn paginate(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    pub fn matches<T: Item>(&self, item: &T) -> bool {
        if let Some(selector) = self.label_selector.as_ref() {
            if !selector.matches(&item.item_labels()) {
                return false;
            }
        }
        self.filters.iter().all(|f| item.item_matches(f))
    }

    /// Filters, sorts and paginates `items`. Ties are broken by name, ascending.
    pub fn apply<T: Item>(&self, items: impl IntoIterator<Item = T>) -> ListResult<T> {
        let mut items = items
            .into_iter()
            .filter(|i| self.matches(i))
            .map(|i| (i.item_name(), i))
            .collect::<Vec<_>>();

        items.sort_by(|(an, a), (bn, b)| {
            let ord = match self.sort_by {
                SortBy::Name => an.cmp(bn),
                SortBy::CreationTimestamp => a
                    .item_creation_timestamp()
                    .cmp(&b.item_creation_timestamp()),
            };
            let ord = if self.ascending { ord } else { ord.reverse() };
            match ord {
                Ordering::Equal => an.cmp(bn),
                ord => ord,
            }
        });

        let total_items = items.len();
        let items = items
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .map(|(_, i)| i)
            .collect();
        ListResult { items, total_items }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::invalid(format_args!("invalid {key}: {value}")))
}

// === impl ListResult ===

impl<T> ListResult<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ListResult<U> {
        ListResult {
            items: self.items.into_iter().map(f).collect(),
            total_items: self.total_items,
        }
    }
}

// === impl Item ===

fn name_contains(name: &str, needle: &str) -> bool {
    name.to_lowercase().contains(&needle.to_lowercase())
}

impl<T: Item> Item for std::sync::Arc<T> {
    fn item_name(&self) -> String {
        (**self).item_name()
    }

    fn item_labels(&self) -> Labels {
        (**self).item_labels()
    }

    fn item_creation_timestamp(&self) -> Option<Time> {
        (**self).item_creation_timestamp()
    }

    fn item_matches(&self, filter: &Filter) -> bool {
        (**self).item_matches(filter)
    }
}

impl Item for PolicyTemplate {
    fn item_name(&self) -> String {
        self.name_any()
    }

    fn item_labels(&self) -> Labels {
        self.metadata.labels.clone().into()
    }

    fn item_creation_timestamp(&self) -> Option<Time> {
        self.creation_timestamp()
    }

    fn item_matches(&self, filter: &Filter) -> bool {
        match filter {
            Filter::Name(n) => name_contains(&self.name_any(), n),
            Filter::Provider(p) => self.spec.content.supports(p),
            Filter::State(_) | Filter::Template(_) | Filter::Policy(_) => false,
        }
    }
}

impl Item for Policy {
    fn item_name(&self) -> String {
        self.name_any()
    }

    fn item_labels(&self) -> Labels {
        self.metadata.labels.clone().into()
    }

    fn item_creation_timestamp(&self) -> Option<Time> {
        self.creation_timestamp()
    }

    fn item_matches(&self, filter: &Filter) -> bool {
        match filter {
            Filter::Name(n) => name_contains(&self.name_any(), n),
            Filter::Provider(p) => self.spec.provider == *p,
            Filter::State(s) => self.state() == *s,
            Filter::Template(t) => self.spec.policy_template == *t,
            Filter::Policy(_) => false,
        }
    }
}

impl Item for Rule {
    fn item_name(&self) -> String {
        self.spec.name.to_lowercase()
    }

    fn item_labels(&self) -> Labels {
        self.metadata.labels.clone().into()
    }

    fn item_creation_timestamp(&self) -> Option<Time> {
        self.creation_timestamp()
    }

    fn item_matches(&self, filter: &Filter) -> bool {
        match filter {
            Filter::Name(n) => name_contains(&self.spec.name, n),
            Filter::Provider(p) => self.spec.provider == *p,
            Filter::State(s) => self.state() == *s,
            Filter::Policy(p) => self.spec.policy == *p,
            Filter::Template(_) => false,
        }
    }
}
