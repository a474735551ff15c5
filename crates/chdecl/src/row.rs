//! Result rows returned by catalog queries.

use indexmap::IndexMap;

use crate::traced::DbError;

/// A single column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    String(String),
    UInt(u64),
    Array(Vec<Value>),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt(n)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

/// One row, columns in select order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row(pub IndexMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.0.insert(column.to_string(), value.into());
        self
    }

    fn get(&self, column: &str) -> Result<&Value, DbError> {
        self.0
            .get(column)
            .ok_or_else(|| DbError::new(format!("missing column '{column}'")))
    }

    /// A string column. NULL reads as the empty string.
    pub fn str(&self, column: &str) -> Result<&str, DbError> {
        match self.get(column)? {
            Value::String(s) => Ok(s),
            Value::Null => Ok(""),
            other => Err(mismatch(column, "string", other)),
        }
    }

    pub fn opt_str(&self, column: &str) -> Result<Option<&str>, DbError> {
        match self.get(column)? {
            Value::String(s) => Ok(Some(s)),
            Value::Null => Ok(None),
            other => Err(mismatch(column, "string", other)),
        }
    }

    pub fn u64(&self, column: &str) -> Result<u64, DbError> {
        match self.get(column)? {
            Value::UInt(n) => Ok(*n),
            Value::String(s) => s
                .parse()
                .map_err(|_| mismatch(column, "integer", &Value::String(s.clone()))),
            other => Err(mismatch(column, "integer", other)),
        }
    }

    pub fn strings(&self, column: &str) -> Result<Vec<String>, DbError> {
        match self.get(column)? {
            Value::Array(items) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(mismatch(column, "array of strings", other)),
                })
                .collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(mismatch(column, "array of strings", other)),
        }
    }
}

fn mismatch(column: &str, expected: &str, got: &Value) -> DbError {
    DbError::new(format!("column '{column}': expected {expected}, got {got:?}"))
}
