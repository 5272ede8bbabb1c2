//! Stack Deletion Items
//!
//! The recursive work-list consumed by the deletion fan-out. On the wire an
//! item is either a stack name or an object holding a further batch:
//!
//! ```json
//! {
//!   "deleteInSequence": [
//!     "myapp-frontend-dev",
//!     { "deleteInParallel": ["myapp-api-dev", "myapp-worker-dev"] },
//!     "myapp-database-dev"
//!   ]
//! }
//! ```
//!
//! In memory the two shapes are the variants of [`StackDeletionItem`], so the
//! fan-out dispatches on the variant instead of inspecting JSON types.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::execution::error::TaskError;

/// Key holding a list deleted with bounded concurrency.
pub const PARALLEL_KEY: &str = "deleteInParallel";

/// Key holding a list deleted one item at a time, in order.
pub const SEQUENTIAL_KEY: &str = "deleteInSequence";

/// Wildcard pattern of the describe error raised for a stack that is gone.
pub const NOT_FOUND_PATTERN: &str = "Stack with id * does not exist*";

/// Statuses of a stack that is still changing.
pub const TRANSITIONAL_STATUSES: &[&str] = &[
    "CREATE_IN_PROGRESS",
    "DELETE_IN_PROGRESS",
    "ROLLBACK_IN_PROGRESS",
    "UPDATE_IN_PROGRESS",
    "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
    "UPDATE_ROLLBACK_IN_PROGRESS",
    "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS",
    "REVIEW_IN_PROGRESS",
    "IMPORT_IN_PROGRESS",
    "IMPORT_ROLLBACK_IN_PROGRESS",
];

/// Statuses of a stack left broken by a failed operation.
pub const TERMINAL_FAILURE_STATUSES: &[&str] = &[
    "CREATE_FAILED",
    "UPDATE_FAILED",
    "DELETE_FAILED",
    "ROLLBACK_FAILED",
    "ROLLBACK_COMPLETE",
    "UPDATE_ROLLBACK_COMPLETE",
    "UPDATE_ROLLBACK_FAILED",
    "IMPORT_ROLLBACK_FAILED",
];

pub const DELETE_COMPLETE: &str = "DELETE_COMPLETE";

/// The describe error message for a missing stack.
pub fn not_found_message(stack: &str) -> String {
    format!(
        "Stack with id {} does not exist (Service: CloudFormation, Status Code: 400, Request ID: simulated)",
        stack
    )
}

/// How a batch of items is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    Parallel,
    Sequential,
}

impl BatchMode {
    /// Wire key for a batch of this mode.
    pub fn items_key(self) -> &'static str {
        match self {
            Self::Parallel => PARALLEL_KEY,
            Self::Sequential => SEQUENTIAL_KEY,
        }
    }
}

/// One entry of a deletion list.
#[derive(Debug, Clone, PartialEq)]
pub enum StackDeletionItem {
    /// A single stack, by name.
    Leaf(String),
    /// A nested list with its own processing mode.
    Batch {
        mode: BatchMode,
        items: Vec<StackDeletionItem>,
    },
}

impl StackDeletionItem {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self::Leaf(name.into())
    }

    pub fn parallel(items: Vec<StackDeletionItem>) -> Self {
        Self::Batch {
            mode: BatchMode::Parallel,
            items,
        }
    }

    pub fn sequential(items: Vec<StackDeletionItem>) -> Self {
        Self::Batch {
            mode: BatchMode::Sequential,
            items,
        }
    }

    /// Parses one item from its wire shape.
    pub fn from_value(value: &Value) -> Result<Self, TaskError> {
        match value {
            Value::String(name) if name.trim().is_empty() => {
                Err(TaskError::validation("stack name is empty"))
            }
            Value::String(name) => Ok(Self::Leaf(name.clone())),
            Value::Object(map) => {
                let parallel = map.get(PARALLEL_KEY);
                let sequential = map.get(SEQUENTIAL_KEY);
                let (mode, list) = match (parallel, sequential) {
                    (Some(list), None) => (BatchMode::Parallel, list),
                    (None, Some(list)) => (BatchMode::Sequential, list),
                    (Some(_), Some(_)) => {
                        return Err(TaskError::validation(format!(
                            "batch has both '{}' and '{}'",
                            PARALLEL_KEY, SEQUENTIAL_KEY
                        )))
                    }
                    (None, None) => {
                        return Err(TaskError::validation(format!(
                            "batch needs '{}' or '{}'",
                            PARALLEL_KEY, SEQUENTIAL_KEY
                        )))
                    }
                };
                Ok(Self::Batch {
                    mode,
                    items: Self::parse_list(list)?,
                })
            }
            other => Err(TaskError::validation(format!(
                "deletion item must be a stack name or a batch object, got {}",
                other
            ))),
        }
    }

    /// Parses a JSON array of items.
    pub fn parse_list(value: &Value) -> Result<Vec<Self>, TaskError> {
        value
            .as_array()
            .ok_or_else(|| TaskError::validation("deletion list must be an array"))?
            .iter()
            .map(Self::from_value)
            .collect()
    }

    /// Converts back to the wire shape.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Leaf(name) => Value::String(name.clone()),
            Self::Batch { mode, items } => {
                let mut map = Map::new();
                map.insert(mode.items_key().to_string(), list_to_value(items));
                Value::Object(map)
            }
        }
    }

    /// Number of stacks named anywhere inside this item.
    pub fn stack_count(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Batch { items, .. } => items.iter().map(Self::stack_count).sum(),
        }
    }
}

/// Converts a list of items to a JSON array.
pub fn list_to_value(items: &[StackDeletionItem]) -> Value {
    Value::Array(items.iter().map(StackDeletionItem::to_value).collect())
}

impl Serialize for StackDeletionItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StackDeletionItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}
