//! Filter handlers for `filter[name]` query parameters.
//!
//! A [`Filter`] turns a parameter value into [`Condition`]s on a [`Query`].
//! Filterable fields get a built-in handler supporting a CSV scalar
//! (`filter[status]=draft,published`) or an operator map
//! (`filter[age][gte]=18`).

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::context::Context;
use crate::error::JsonApiError;
use crate::field::Field;
use crate::query::{Condition, Operator, Query};
use crate::types::json_type_name;

pub type FilterFn =
    Arc<dyn Fn(&mut Query, &Value, &Context<'_>) -> Result<(), JsonApiError> + Send + Sync>;

/// Named `filter[...]` handler.
#[derive(Clone)]
pub struct Filter {
    name: String,
    apply: FilterFn,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").field("name", &self.name).finish()
    }
}

impl Filter {
    pub fn new<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&mut Query, &Value, &Context<'_>) -> Result<(), JsonApiError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            apply: Arc::new(apply),
        }
    }

    /// A filter passed to the adapter untouched as [`Condition::Custom`].
    pub fn custom(name: impl Into<String>) -> Self {
        let name = name.into();
        let condition_name = name.clone();
        Self::new(name, move |query, value, _| {
            query.push(Condition::Custom {
                name: condition_name.clone(),
                value: value.clone(),
            });
            Ok(())
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(
        &self,
        query: &mut Query,
        value: &Value,
        ctx: &Context<'_>,
    ) -> Result<(), JsonApiError> {
        (self.apply)(query, value, ctx)
    }

    /// Equality (CSV → IN) on the resource id property.
    pub(crate) fn for_id(property: impl Into<String>) -> Self {
        let property = property.into();
        Self::new("id", move |query, value, _| {
            let values = split_csv(value, "filter[id]", true)?;
            push_equality(query, &property, values, false);
            Ok(())
        })
    }

    /// Built-in filter for a filterable field.
    ///
    /// Scalar values are split on commas into an IN unless the field was
    /// built with [`Field::whole_filter_values`].
    pub(crate) fn for_field(field: Field) -> Self {
        let name = field.name().to_string();
        Self::new(name.clone(), move |query, value, _| {
            let property = field.property();
            let Value::Object(operators) = value else {
                let values = field_values(&field, value, &format!("filter[{}]", name))?;
                push_equality(query, property, values, false);
                return Ok(());
            };

            for (key, operand) in operators {
                let parameter = format!("filter[{}][{}]", name, key);
                match key.as_str() {
                    "null" => query.push(Condition::Null {
                        property: property.to_string(),
                        is_null: parse_flag(operand, &parameter)?,
                    }),
                    "eq" | "ne" => {
                        let values = field_values(&field, operand, &parameter)?;
                        push_equality(query, property, values, key == "ne");
                    }
                    other => {
                        let operator = Operator::parse(other).ok_or_else(|| {
                            JsonApiError::bad_parameter(
                                &parameter,
                                format!("unknown filter operator \"{}\"", other),
                            )
                        })?;
                        let mut values = field_values(&field, operand, &parameter)?;
                        if values.len() != 1 {
                            return Err(JsonApiError::bad_parameter(
                                parameter,
                                "operator expects a single value",
                            ));
                        }
                        query.push(Condition::Compare {
                            property: property.to_string(),
                            operator,
                            value: values.remove(0),
                        });
                    }
                }
            }
            Ok(())
        })
    }
}

fn push_equality(query: &mut Query, property: &str, mut values: Vec<Value>, negated: bool) {
    if values.len() == 1 {
        let operator = if negated { Operator::Ne } else { Operator::Eq };
        query.push(Condition::Compare {
            property: property.to_string(),
            operator,
            value: values.remove(0),
        });
    } else {
        query.push(Condition::In {
            property: property.to_string(),
            values,
            negated,
        });
    }
}

/// Split a comma-separated value. Arrays are taken as already split.
fn split_csv(value: &Value, parameter: &str, split: bool) -> Result<Vec<Value>, JsonApiError> {
    match value {
        Value::String(s) if split => Ok(s
            .split(',')
            .map(|part| Value::String(part.to_string()))
            .collect()),
        Value::Array(items) => Ok(items.clone()),
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(vec![value.clone()]),
        other => Err(JsonApiError::bad_parameter(
            parameter,
            format!("expected a value, got {}", json_type_name(other)),
        )),
    }
}

/// Split, deserialize and validate operands through the field's type.
fn field_values(field: &Field, value: &Value, parameter: &str) -> Result<Vec<Value>, JsonApiError> {
    split_csv(value, parameter, field.splits_filter_values())?
        .into_iter()
        .map(|raw| {
            let parsed = field.deserialize(raw.clone());
            if let Some(violation) = field
                .field_type()
                .and_then(|ty| ty.validate(&parsed).into_iter().next())
            {
                return Err(JsonApiError::bad_parameter(
                    parameter,
                    format!("invalid value {}: {}", raw, violation.message),
                ));
            }
            Ok(parsed)
        })
        .collect()
}

fn parse_flag(value: &Value, parameter: &str) -> Result<bool, JsonApiError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" || s == "1" => Ok(true),
        Value::String(s) if s == "false" || s == "0" => Ok(false),
        _ => Err(JsonApiError::bad_parameter(parameter, "expected true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::field_type::FieldType;
    use crate::registry::Registry;
    use crate::server::Request;
    use serde_json::json;

    fn apply(filter: &Filter, value: Value) -> Result<Query, JsonApiError> {
        let registry = Registry::new();
        let config = Config::default();
        let request = Request::get("/");
        let ctx = Context::new(&registry, &config, &request);
        let mut query = Query::new("articles");
        filter.apply(&mut query, &value, &ctx)?;
        Ok(query)
    }

    // === Scalar Values ===

    #[test]
    fn scalar_becomes_equality() {
        let filter = Filter::for_field(Field::attribute("status").filterable());
        let query = apply(&filter, json!("draft")).unwrap();
        assert_eq!(
            query.conditions,
            vec![Condition::Compare {
                property: "status".into(),
                operator: Operator::Eq,
                value: json!("draft"),
            }]
        );
    }

    #[test]
    fn csv_becomes_in() {
        let filter = Filter::for_id("id");
        let query = apply(&filter, json!("1,2,3")).unwrap();
        assert_eq!(
            query.conditions,
            vec![Condition::In {
                property: "id".into(),
                values: vec![json!("1"), json!("2"), json!("3")],
                negated: false,
            }]
        );
    }

    #[test]
    fn values_deserialized_through_field_type() {
        let field = Field::attribute("age").with_type(FieldType::integer());
        let filter = Filter::for_field(field);
        let query = apply(&filter, json!({ "gte": "18" })).unwrap();
        assert_eq!(
            query.conditions,
            vec![Condition::Compare {
                property: "age".into(),
                operator: Operator::Gte,
                value: json!(18),
            }]
        );
    }

    #[test]
    fn whole_values_keep_commas() {
        let filter = Filter::for_field(Field::attribute("title").whole_filter_values());
        let query = apply(&filter, json!("Hello, world")).unwrap();
        assert_eq!(
            query.conditions,
            vec![Condition::Compare {
                property: "title".into(),
                operator: Operator::Eq,
                value: json!("Hello, world"),
            }]
        );

        let query = apply(&filter, json!({ "ne": "a,b" })).unwrap();
        assert!(matches!(
            &query.conditions[0],
            Condition::Compare { operator: Operator::Ne, value, .. } if value == "a,b"
        ));
    }

    // === Operators ===

    #[test]
    fn ne_csv_is_negated_in() {
        let filter = Filter::for_field(Field::attribute("status"));
        let query = apply(&filter, json!({ "ne": "a,b" })).unwrap();
        assert!(matches!(
            &query.conditions[0],
            Condition::In { negated: true, values, .. } if values.len() == 2
        ));
    }

    #[test]
    fn null_operator() {
        let filter = Filter::for_field(Field::attribute("deletedAt").with_property("deleted_at"));
        let query = apply(&filter, json!({ "null": "true" })).unwrap();
        assert_eq!(
            query.conditions,
            vec![Condition::Null {
                property: "deleted_at".into(),
                is_null: true,
            }]
        );
    }

    #[test]
    fn unknown_operator_rejected_with_parameter() {
        let filter = Filter::for_field(Field::attribute("title"));
        let err = apply(&filter, json!({ "like": "x" })).unwrap_err();
        let objects = err.to_error_objects(false);
        assert_eq!(objects[0].status, "400");
        assert_eq!(
            objects[0].source,
            Some(crate::error::ErrorSource::parameter("filter[title][like]"))
        );
    }

    #[test]
    fn out_of_domain_value_rejected() {
        let field = Field::attribute("age").with_type(FieldType::integer());
        let err = apply(&Filter::for_field(field), json!("abc")).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn custom_filter_passes_value_through() {
        let query = apply(&Filter::custom("search"), json!("rust")).unwrap();
        assert_eq!(
            query.conditions,
            vec![Condition::Custom {
                name: "search".into(),
                value: json!("rust"),
            }]
        );
    }
}
