//! Storage trait definitions and filter types.

use crate::error::Result;
use serde::{Serialize, de::DeserializeOwned};

/// Filter operations for querying records.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// Field equals value
    Eq,
    /// Field does not equal value
    Ne,
    /// Field contains value (substring, or element of an array such as `tags`)
    Contains,
}

/// A filter for querying records.
#[derive(Debug, Clone)]
pub struct Filter {
    /// Field name to filter on
    pub field: String,
    /// Filter operation
    pub op: FilterOp,
    /// Value to compare against
    pub value: serde_json::Value,
}

impl Filter {
    fn new(field: impl Into<String>, op: FilterOp, value: impl Serialize) -> Self {
        Self {
            field: field.into(),
            op,
            value: serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
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

    /// Create a contains filter.
    pub fn contains(field: impl Into<String>, value: impl Serialize) -> Self {
        Self::new(field, FilterOp::Contains, value)
    }

    /// Check if a record matches this filter.
    pub fn matches(&self, record: &serde_json::Value) -> bool {
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
            FilterOp::Contains => match (field_value, &self.value) {
                (Some(serde_json::Value::String(s)), serde_json::Value::String(needle)) => {
                    s.contains(needle.as_str())
                }
                (Some(serde_json::Value::Array(arr)), _) => arr.contains(&self.value),
                _ => false,
            },
        }
    }
}

/// Trait for records that have an ID field.
pub trait HasId {
    /// Get the record's unique identifier.
    fn id(&self) -> &str;
}

/// Storage trait for CRUD operations on records.
pub trait Storage: Send + Sync {
    /// Create a new record.
    fn create<T: Serialize + DeserializeOwned + HasId>(&self, collection: &str, record: &T) -> Result<()>;

    /// Get a record by ID.
    fn get<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>>;

    /// Update an existing record.
    fn update<T: Serialize + DeserializeOwned + HasId>(&self, collection: &str, record: &T) -> Result<()>;

    /// Query records with filters.
    fn query<T: DeserializeOwned>(&self, collection: &str, filters: &[Filter]) -> Result<Vec<T>>;

    /// List all records in a collection.
    fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        self.query(collection, &[])
    }

    /// Drop any cached view of a collection so the next read sees writes made
    /// by other processes.
    fn invalidate(&self, collection: &str) -> Result<()>;
}
