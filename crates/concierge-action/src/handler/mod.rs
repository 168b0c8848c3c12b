//! Per-family operation handlers.
//!
//! Each module adds methods to [`OperationRouter`](crate::OperationRouter)
//! for one operation family and returns an internal `Outcome` or an
//! [`OperationError`](crate::OperationError).

mod alert;
mod calendar;
mod contact;
mod duplicate;
mod settings;

use serde::Serialize;
use serde_json::Value;

use crate::error::OperationError;

/// Serialize handler data. Failure is reported as a storage-side fault
/// since it can only come from a record we produced.
pub(crate) fn to_data<T: Serialize>(value: &T) -> Result<Value, OperationError> {
    serde_json::to_value(value).map_err(|e| OperationError::Storage(e.to_string()))
}

/// Trim a free-text value, mapping blank to `None`.
pub(crate) fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
