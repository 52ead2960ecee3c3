//! Text-format result rows

use crate::{Error, Result};
use std::str::FromStr;
use std::sync::Arc;

/// One row of a simple-query result; values are in Postgres text format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl Row {
    /// Build a row; `values` is padded or truncated to the column count
    pub fn new(columns: Arc<[String]>, mut values: Vec<Option<String>>) -> Self {
        values.resize(columns.len(), None);
        Self { columns, values }
    }

    /// Column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw text value; `None` for NULL or out of range
    pub fn get(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).and_then(|v| v.as_deref())
    }

    /// Raw text value by column name
    pub fn get_by_name(&self, name: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == name)?;
        self.get(idx)
    }

    /// Parse a column into `T`
    pub fn try_get<T: FromStr>(&self, idx: usize) -> Result<T> {
        let raw = self.values.get(idx).ok_or_else(|| {
            Error::Protocol(format!("column index {} out of range ({} columns)", idx, self.len()))
        })?;
        let raw = raw
            .as_deref()
            .ok_or_else(|| Error::Protocol(format!("column {} is NULL", idx)))?;
        raw.parse()
            .map_err(|_| Error::Protocol(format!("column {} value '{}' has unexpected type", idx, raw)))
    }
}
