//! Sort handlers for the `sort` query parameter.

use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::error::JsonApiError;
use crate::query::Query;
use crate::types::SortDirection;

pub type SortFn =
    Arc<dyn Fn(&mut Query, SortDirection, &Context<'_>) -> Result<(), JsonApiError> + Send + Sync>;

/// Named sort key.
#[derive(Clone)]
pub struct Sort {
    name: String,
    apply: SortFn,
}

impl fmt::Debug for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sort").field("name", &self.name).finish()
    }
}

impl Sort {
    pub fn new<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&mut Query, SortDirection, &Context<'_>) -> Result<(), JsonApiError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            apply: Arc::new(apply),
        }
    }

    /// Order by a model property.
    pub fn by_property(name: impl Into<String>, property: impl Into<String>) -> Self {
        let property = property.into();
        Self::new(name, move |query, direction, _| {
            query.order_by(property.clone(), direction);
            Ok(())
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(
        &self,
        query: &mut Query,
        direction: SortDirection,
        ctx: &Context<'_>,
    ) -> Result<(), JsonApiError> {
        (self.apply)(query, direction, ctx)
    }
}

/// Parse one `sort` token: a leading `-` means descending.
pub fn parse_token(token: &str) -> (&str, SortDirection) {
    match token.strip_prefix('-') {
        Some(name) => (name, SortDirection::Desc),
        None => (token, SortDirection::Asc),
    }
}
