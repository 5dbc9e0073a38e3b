//! Declarative filter trees for query predicates.
//!
//! A `Filter` describes which rows a query selects. Live queries evaluate
//! filters directly against rows pushed through the event bus, so evaluation
//! has to be cheap and allocation-free on the hot path.
//!
//! Two placeholder node kinds exist before a filter becomes a ground
//! predicate:
//!
//! - `Sub`: a nested sub-query whose projected values feed the parent filter.
//!   `extract_sub_queries` replaces each with a named `Parameter` and returns
//!   the provider descriptors.
//! - `Parameter`: a named hole filled in by `resolve_parameters`. Array
//!   parameter values become `In` predicates, scalars become `Eq`.
//!
//! Ground predicates (no placeholders left) support `matches` and report the
//! set of referenced field names for minimal field-level feed subscriptions.

use sayldb_commons::{EntityTypeId, Row, SaylDbError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Sort direction for one ordering criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One ordering criterion: field plus direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub field: String,
    pub direction: SortDirection,
}

impl SortOrder {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// A nested sub-query: its result set, projected to one field, feeds the
/// parent filter as an `$in` parameter and is kept live for the lifetime of
/// the parent query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery {
    pub entity_type: EntityTypeId,
    pub filter: Box<Filter>,
    pub projected_field: String,
}

impl SubQuery {
    pub fn new(
        entity_type: impl Into<EntityTypeId>,
        filter: Filter,
        projected_field: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            filter: Box::new(filter),
            projected_field: projected_field.into(),
        }
    }
}

/// Declarative query predicate over one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    /// Matches every row.
    All,
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// Named hole; resolved by `resolve_parameters` before evaluation.
    Parameter { field: String, name: String },
    /// Sub-query marker; replaced by `extract_sub_queries` before use.
    Sub { field: String, query: SubQuery },
}

/// Provider descriptor produced by sub-query extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSpec {
    pub name: String,
    pub entity_type: EntityTypeId,
    pub filter: Filter,
    pub projected_field: String,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Filter::Eq(field.into(), value)
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In(field.into(), values)
    }

    pub fn sub(field: impl Into<String>, query: SubQuery) -> Self {
        Filter::Sub {
            field: field.into(),
            query,
        }
    }

    /// Evaluate a ground predicate against a row.
    ///
    /// Unresolved `Parameter` and `Sub` nodes match nothing; callers compile
    /// first.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => row
                .get(field)
                .map(|v| values_equal(v, value))
                .unwrap_or_else(|| value.is_null()),
            Filter::Ne(field, value) => !Filter::Eq(field.clone(), value.clone()).matches(row),
            Filter::Gt(field, value) => compare_field(row, field, value) == Some(Ordering::Greater),
            Filter::Gte(field, value) => matches!(
                compare_field(row, field, value),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ),
            Filter::Lt(field, value) => compare_field(row, field, value) == Some(Ordering::Less),
            Filter::Lte(field, value) => matches!(
                compare_field(row, field, value),
                Some(Ordering::Less) | Some(Ordering::Equal)
            ),
            Filter::In(field, values) => row
                .get(field)
                .map(|v| values.iter().any(|candidate| values_equal(v, candidate)))
                .unwrap_or(false),
            Filter::And(filters) => filters.iter().all(|f| f.matches(row)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(row)),
            Filter::Not(inner) => !inner.matches(row),
            Filter::Parameter { .. } | Filter::Sub { .. } => false,
        }
    }

    /// Whether any `Sub` node remains anywhere in the tree.
    pub fn contains_sub_query(&self) -> bool {
        match self {
            Filter::Sub { .. } => true,
            Filter::And(filters) | Filter::Or(filters) => {
                filters.iter().any(|f| f.contains_sub_query())
            }
            Filter::Not(inner) => inner.contains_sub_query(),
            _ => false,
        }
    }

    /// Collect every field name this filter references.
    pub fn referenced_fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Filter::All => {}
            Filter::Eq(field, _)
            | Filter::Ne(field, _)
            | Filter::Gt(field, _)
            | Filter::Gte(field, _)
            | Filter::Lt(field, _)
            | Filter::Lte(field, _)
            | Filter::In(field, _)
            | Filter::Parameter { field, .. }
            | Filter::Sub { field, .. } => {
                out.insert(field.clone());
            }
            Filter::And(filters) | Filter::Or(filters) => {
                for filter in filters {
                    filter.collect_fields(out);
                }
            }
            Filter::Not(inner) => inner.collect_fields(out),
        }
    }

    /// Replace every `Sub` node with a named `Parameter` and return the
    /// provider descriptors. Provider names derive as
    /// `{field}_{projected_field}`; duplicates are a construction error.
    pub fn extract_sub_queries(self) -> Result<(Filter, Vec<ProviderSpec>), SaylDbError> {
        let mut providers = Vec::new();
        let filter = self.extract_subs_inner(&mut providers)?;
        Ok((filter, providers))
    }

    fn extract_subs_inner(self, providers: &mut Vec<ProviderSpec>) -> Result<Filter, SaylDbError> {
        Ok(match self {
            Filter::Sub { field, query } => {
                let name = format!("{}_{}", field, query.projected_field);
                if providers.iter().any(|p| p.name == name) {
                    return Err(SaylDbError::invalid_filter(format!(
                        "Provider with name {} already exists",
                        name
                    )));
                }
                providers.push(ProviderSpec {
                    name: name.clone(),
                    entity_type: query.entity_type,
                    filter: *query.filter,
                    projected_field: query.projected_field,
                });
                Filter::Parameter { field, name }
            }
            Filter::And(filters) => Filter::And(
                filters
                    .into_iter()
                    .map(|f| f.extract_subs_inner(providers))
                    .collect::<Result<_, _>>()?,
            ),
            Filter::Or(filters) => Filter::Or(
                filters
                    .into_iter()
                    .map(|f| f.extract_subs_inner(providers))
                    .collect::<Result<_, _>>()?,
            ),
            Filter::Not(inner) => Filter::Not(Box::new(inner.extract_subs_inner(providers)?)),
            other => other,
        })
    }

    /// Substitute every `Parameter` node with its current value, recording
    /// the consumed values in `used`. Array values become `In` predicates,
    /// scalars become `Eq`; a missing parameter matches nothing.
    pub fn resolve_parameters(
        &self,
        parameters: &BTreeMap<String, Value>,
        used: &mut BTreeMap<String, Value>,
    ) -> Result<Filter, SaylDbError> {
        Ok(match self {
            Filter::Parameter { field, name } => {
                let value = parameters.get(name).cloned().unwrap_or(Value::Null);
                used.insert(name.clone(), value.clone());
                match value {
                    Value::Array(values) => Filter::In(field.clone(), values),
                    Value::Null => Filter::In(field.clone(), Vec::new()),
                    scalar => Filter::Eq(field.clone(), scalar),
                }
            }
            Filter::Sub { field, .. } => {
                return Err(SaylDbError::invalid_filter(format!(
                    "Unextracted sub-query on field {}",
                    field
                )))
            }
            Filter::And(filters) => Filter::And(
                filters
                    .iter()
                    .map(|f| f.resolve_parameters(parameters, used))
                    .collect::<Result<_, _>>()?,
            ),
            Filter::Or(filters) => Filter::Or(
                filters
                    .iter()
                    .map(|f| f.resolve_parameters(parameters, used))
                    .collect::<Result<_, _>>()?,
            ),
            Filter::Not(inner) => {
                Filter::Not(Box::new(inner.resolve_parameters(parameters, used)?))
            }
            other => other.clone(),
        })
    }
}

fn compare_field(row: &Row, field: &str, value: &Value) -> Option<Ordering> {
    row.get(field).and_then(|v| compare_values(v, value))
}

/// Check two JSON values for equality, coercing numeric representations.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }

    // Numeric coercion: 1 and 1.0 compare equal
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return (l - r).abs() < f64::EPSILON;
    }

    false
}

/// Partial ordering over JSON scalars: numbers numerically, strings
/// lexicographically, booleans false < true. Mixed types do not compare.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            let l = left.as_f64()?;
            let r = right.as_f64()?;
            l.partial_cmp(&r)
        }
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total ordering used for sorting query results: null < bool < number <
/// string < everything else.
pub fn sort_values(left: &Value, right: &Value) -> Ordering {
    compare_values(left, right).unwrap_or_else(|| type_rank(left).cmp(&type_rank(right)))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
