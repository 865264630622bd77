//! Adapter-neutral query plan.
//!
//! The resolver builds a [`Query`] by applying the resource scope, then
//! filters in request order, then sorts, then a page window. Adapters
//! translate the plan into their own storage calls. Conditions are
//! AND-combined.

use serde_json::Value;

use crate::types::SortDirection;

/// Comparison operator for [`Condition::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Operator {
    /// Parse a filter operator key (`eq`, `ne`, `lt`, `lte`, `gt`, `gte`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Operator::Eq),
            "ne" => Some(Operator::Ne),
            "lt" => Some(Operator::Lt),
            "lte" => Some(Operator::Lte),
            "gt" => Some(Operator::Gt),
            "gte" => Some(Operator::Gte),
            _ => None,
        }
    }
}

/// A single restriction on the result set.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        property: String,
        operator: Operator,
        value: Value,
    },
    In {
        property: String,
        values: Vec<Value>,
        negated: bool,
    },
    Null {
        property: String,
        is_null: bool,
    },
    /// Interpreted by the adapter under a name it registered.
    Custom { name: String, value: Value },
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortClause {
    pub property: String,
    pub direction: SortDirection,
}

/// Slice of the ordered result set to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageWindow {
    Offset { offset: usize, limit: usize },
}

/// The query plan handed to adapters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub resource_type: String,
    pub conditions: Vec<Condition>,
    pub sorts: Vec<SortClause>,
    pub window: Option<PageWindow>,
}

impl Query {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Self::default()
        }
    }

    pub fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn order_by(&mut self, property: impl Into<String>, direction: SortDirection) {
        self.sorts.push(SortClause {
            property: property.into(),
            direction,
        });
    }

    /// The same query without its page window, as used for counting.
    pub fn unwindowed(&self) -> Self {
        Self {
            window: None,
            ..self.clone()
        }
    }
}
