//! Storage trait definitions and filter types.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::domain::{Record, RecordKey};
use crate::error::{HarvestrError, Result};

/// Filter operations for querying records.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// Field equals value
    Eq,
    /// Field does not equal value
    Ne,
    /// Field greater than value
    Gt,
    /// Field greater than or equal to value
    Gte,
    /// Field less than value
    Lt,
    /// Field less than or equal to value
    Lte,
    /// Field equals one of the values in an array
    In,
    /// Field contains value (string/array)
    Contains,
}

/// A filter for querying records. A filter list is a conjunction.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Field name to filter on
    pub field: String,
    /// Filter operation
    pub op: FilterOp,
    /// Value to compare against
    pub value: Value,
}

impl Filter {
    fn new(field: impl Into<String>, op: FilterOp, value: impl Serialize) -> Self {
        Self {
            field: field.into(),
            op,
            value: serde_json::to_value(value).unwrap_or(Value::Null),
        }
    }

    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Serialize) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Create a not-equal filter.
    pub fn ne(field: impl Into<String>, value: impl Serialize) -> Self {
        Self::new(field, FilterOp::Ne, value)
    }

    /// Create a greater-than filter.
    pub fn gt(field: impl Into<String>, value: impl Serialize) -> Self {
        Self::new(field, FilterOp::Gt, value)
    }

    /// Create a greater-than-or-equal filter.
    pub fn gte(field: impl Into<String>, value: impl Serialize) -> Self {
        Self::new(field, FilterOp::Gte, value)
    }

    /// Create a less-than filter.
    pub fn lt(field: impl Into<String>, value: impl Serialize) -> Self {
        Self::new(field, FilterOp::Lt, value)
    }

    /// Create a less-than-or-equal filter.
    pub fn lte(field: impl Into<String>, value: impl Serialize) -> Self {
        Self::new(field, FilterOp::Lte, value)
    }

    /// Create a set-membership filter.
    pub fn any_of<T: Serialize>(field: impl Into<String>, values: &[T]) -> Self {
        Self::new(field, FilterOp::In, values)
    }

    /// Create a contains filter.
    pub fn contains(field: impl Into<String>, value: impl Serialize) -> Self {
        Self::new(field, FilterOp::Contains, value)
    }

    /// Check if a record view matches this filter.
    pub fn matches(&self, record: &Value) -> bool {
        let field_value = record.get(&self.field);

        match &self.op {
            FilterOp::Eq => match field_value {
                Some(v) => *v == self.value,
                None => self.value.is_null(),
            },
            FilterOp::Ne => match field_value {
                Some(v) => *v != self.value,
                None => !self.value.is_null(),
            },
            FilterOp::Gt => compare(field_value, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare(field_value, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => compare(field_value, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare(field_value, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::In => match (&self.value, field_value) {
                (Value::Array(candidates), Some(v)) => candidates.contains(v),
                _ => false,
            },
            FilterOp::Contains => match field_value {
                Some(Value::String(s)) => {
                    if let Value::String(needle) = &self.value {
                        s.contains(needle.as_str())
                    } else {
                        false
                    }
                }
                Some(Value::Array(arr)) => arr.contains(&self.value),
                _ => false,
            },
        }
    }

    /// Check a record against a conjunction of filters.
    pub fn all_match(filters: &[Filter], record: &Record) -> bool {
        if filters.is_empty() {
            return true;
        }
        let view = record.filter_view();
        filters.iter().all(|f| f.matches(&view))
    }
}

/// Order two JSON scalars of the same kind. Mixed kinds are incomparable.
fn compare(field_value: Option<&Value>, target: &Value) -> Option<Ordering> {
    match (field_value?, target) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

/// Operators in match order: two-character operators before their prefixes.
const OPERATORS: &[(&str, FilterOp)] = &[
    ("!=", FilterOp::Ne),
    (">=", FilterOp::Gte),
    ("<=", FilterOp::Lte),
    ("=", FilterOp::Eq),
    (">", FilterOp::Gt),
    ("<", FilterOp::Lt),
    ("~", FilterOp::Contains),
];

/// Parse a literal: JSON when it parses, otherwise a bare string.
fn parse_literal(raw: &str) -> Value {
    let raw = raw.trim();
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

impl FromStr for Filter {
    type Err = HarvestrError;

    /// Parse `field<op>value` or `field in a,b,c`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some((field, list)) = s.split_once(" in ")
            && !OPERATORS.iter().any(|(token, _)| field.contains(token))
        {
            let field = field.trim();
            if field.is_empty() {
                return Err(HarvestrError::InvalidFilter(format!("missing field in '{}'", s)));
            }
            let values: Vec<Value> = list.split(',').map(parse_literal).collect();
            return Ok(Self {
                field: field.to_string(),
                op: FilterOp::In,
                value: Value::Array(values),
            });
        }

        let (pos, token, op) = OPERATORS
            .iter()
            .filter_map(|(token, op)| s.find(token).map(|pos| (pos, *token, op.clone())))
            .min_by_key(|(pos, token, _)| (*pos, std::cmp::Reverse(token.len())))
            .ok_or_else(|| HarvestrError::InvalidFilter(format!("no operator in '{}'", s)))?;

        let field = s[..pos].trim();
        if field.is_empty() {
            return Err(HarvestrError::InvalidFilter(format!("missing field in '{}'", s)));
        }

        Ok(Self {
            field: field.to_string(),
            op,
            value: parse_literal(&s[pos + token.len()..]),
        })
    }
}

/// Field selection for `list`. Identity fields are always included.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub fields: Option<Vec<String>>,
}

impl Projection {
    /// Return every field
    pub fn all() -> Self {
        Self { fields: None }
    }

    /// Return only the named fields
    pub fn only<S: AsRef<str>>(fields: &[S]) -> Self {
        Self {
            fields: Some(fields.iter().map(|f| f.as_ref().to_string()).collect()),
        }
    }

    /// Apply to a record
    pub fn apply(&self, record: &Record) -> Value {
        let full = match serde_json::to_value(record) {
            Ok(Value::Object(map)) => map,
            _ => return Value::Null,
        };

        let Some(wanted) = &self.fields else {
            return Value::Object(full);
        };

        let projected = full
            .into_iter()
            .filter(|(name, _)| name == "external_id" || name == "source" || wanted.contains(name))
            .collect();
        Value::Object(projected)
    }
}

/// Key-value persistence for records keyed by `(external_id, source)`.
///
/// Implementations are synchronous and take `&self`; callers share them behind `Arc`.
pub trait RecordBackend: Send + Sync {
    /// Point lookup.
    fn get(&self, key: &RecordKey) -> Result<Option<Record>>;

    /// Insert or replace the record stored under its key.
    fn put(&self, record: &Record) -> Result<()>;

    /// Query records matching all filters.
    fn query(&self, filters: &[Filter]) -> Result<Vec<Record>>;

    /// Count records matching all filters.
    fn count(&self, filters: &[Filter]) -> Result<usize> {
        Ok(self.query(filters)?.len())
    }

    /// Delete records matching all filters, returning how many were removed.
    fn delete_many(&self, filters: &[Filter]) -> Result<usize>;
}

impl<B: RecordBackend + ?Sized> RecordBackend for Box<B> {
    fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
        (**self).get(key)
    }

    fn put(&self, record: &Record) -> Result<()> {
        (**self).put(record)
    }

    fn query(&self, filters: &[Filter]) -> Result<Vec<Record>> {
        (**self).query(filters)
    }

    fn count(&self, filters: &[Filter]) -> Result<usize> {
        (**self).count(filters)
    }

    fn delete_many(&self, filters: &[Filter]) -> Result<usize> {
        (**self).delete_many(filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_eq_matches() {
        let filter = Filter::eq("source", "siteA");
        let record = json!({"external_id": "1", "source": "siteA"});
        assert!(filter.matches(&record));
    }

    #[test]
    fn test_filter_eq_no_match() {
        let filter = Filter::eq("source", "siteA");
        let record = json!({"external_id": "1", "source": "siteB"});
        assert!(!filter.matches(&record));
    }

    #[test]
    fn test_filter_eq_null() {
        let filter = Filter::eq("price", Value::Null);
        let record = json!({"external_id": "1"});
        assert!(filter.matches(&record));
    }

    #[test]
    fn test_filter_ne_matches() {
        let filter = Filter::ne("fuel", "diesel");
        let record = json!({"fuel": "petrol"});
        assert!(filter.matches(&record));
    }

    #[test]
    fn test_filter_range_numbers() {
        let record = json!({"price": 15000, "year": 2019});
        assert!(Filter::gt("price", 10000).matches(&record));
        assert!(Filter::gte("price", 15000).matches(&record));
        assert!(!Filter::lt("price", 15000).matches(&record));
        assert!(Filter::lte("year", 2019).matches(&record));
        assert!(Filter::gt("price", 14999.5).matches(&record));
    }

    #[test]
    fn test_filter_range_strings() {
        let record = json!({"created_at": "2026-03-01T00:00:00+00:00"});
        assert!(Filter::gte("created_at", "2026-01-01").matches(&record));
        assert!(!Filter::lt("created_at", "2026-01-01").matches(&record));
    }

    #[test]
    fn test_filter_range_mixed_kinds_never_match() {
        let record = json!({"price": "15000"});
        assert!(!Filter::gt("price", 100).matches(&record));
        assert!(!Filter::lt("price", 100).matches(&record));
    }

    #[test]
    fn test_filter_range_missing_field() {
        let record = json!({"external_id": "1"});
        assert!(!Filter::gt("price", 0).matches(&record));
    }

    #[test]
    fn test_filter_in() {
        let filter = Filter::any_of("make", &["bmw", "audi"]);
        assert!(filter.matches(&json!({"make": "audi"})));
        assert!(!filter.matches(&json!({"make": "fiat"})));
        assert!(!filter.matches(&json!({})));
    }

    #[test]
    fn test_filter_contains_string() {
        let filter = Filter::contains("title", "Golf");
        assert!(filter.matches(&json!({"title": "VW Golf VII"})));
    }

    #[test]
    fn test_filter_contains_array() {
        let filter = Filter::contains("tags", "4x4");
        assert!(filter.matches(&json!({"tags": ["4x4", "towbar"]})));
        assert!(!filter.matches(&json!({"tags": ["towbar"]})));
    }

    #[test]
    fn test_parse_operators() {
        let f: Filter = "price>=100".parse().unwrap();
        assert_eq!(f, Filter::gte("price", 100));

        let f: Filter = "price > 100".parse().unwrap();
        assert_eq!(f, Filter::gt("price", 100));

        let f: Filter = "source=siteA".parse().unwrap();
        assert_eq!(f, Filter::eq("source", "siteA"));

        let f: Filter = "fuel!=diesel".parse().unwrap();
        assert_eq!(f, Filter::ne("fuel", "diesel"));

        let f: Filter = "year<=2020".parse().unwrap();
        assert_eq!(f, Filter::lte("year", 2020));

        let f: Filter = "title~Golf".parse().unwrap();
        assert_eq!(f, Filter::contains("title", "Golf"));
    }

    #[test]
    fn test_parse_json_literals() {
        let f: Filter = "sold=true".parse().unwrap();
        assert_eq!(f.value, json!(true));

        let f: Filter = "external_id=\"123\"".parse().unwrap();
        assert_eq!(f.value, json!("123"));
    }

    #[test]
    fn test_parse_in_list() {
        let f: Filter = "year in 2019,2020".parse().unwrap();
        assert_eq!(f.op, FilterOp::In);
        assert_eq!(f.value, json!([2019, 2020]));

        // " in " inside a value is not a list
        let f: Filter = "title=made in germany".parse().unwrap();
        assert_eq!(f, Filter::eq("title", "made in germany"));
    }

    #[test]
    fn test_parse_errors() {
        assert!("price".parse::<Filter>().is_err());
        assert!("=5".parse::<Filter>().is_err());
        assert!(" in a,b".parse::<Filter>().is_err());
    }

    #[test]
    fn test_all_match_conjunction() {
        let record = Record::new("X1", "siteA").with_field("price", 100);
        assert!(Filter::all_match(&[], &record));
        assert!(Filter::all_match(
            &[Filter::eq("source", "siteA"), Filter::gte("price", 100)],
            &record
        ));
        assert!(!Filter::all_match(
            &[Filter::eq("source", "siteA"), Filter::gt("price", 100)],
            &record
        ));
    }

    #[test]
    fn test_projection() {
        let record = Record::new("X1", "siteA").with_field("price", 100).with_field("title", "Golf");

        let all = Projection::all().apply(&record);
        assert_eq!(all["title"], "Golf");
        assert!(all.get("change_log").is_some());

        let only = Projection::only(&["price"]).apply(&record);
        assert_eq!(only["price"], 100);
        assert_eq!(only["external_id"], "X1");
        assert!(only.get("title").is_none());
        assert!(only.get("change_log").is_none());
    }
}
