//! Execution Context
//!
//! The JSON document threaded through every node of a run, plus the small
//! path language used to address parts of it.
//!
//! # Path Syntax
//!
//! ```text
//! $                     the whole context
//! $.tier                a top-level key
//! $.stack.status        nested keys
//! $.findings[0].title   array indexing
//! $.run-rds-init        keys may contain '-'
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::execution::error::{EngineError, TaskError};

/// One step of a [`JsonPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed `$.a.b[0]` style path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    /// The `$` path.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parses a path expression.
    ///
    /// # Example
    ///
    /// ```
    /// use stackrunner::workflow::JsonPath;
    ///
    /// let path = JsonPath::parse("$.findings[0].severity").unwrap();
    /// assert_eq!(path.to_string(), "$.findings[0].severity");
    /// ```
    pub fn parse(expr: &str) -> Result<Self, EngineError> {
        let expr = expr.trim();
        let rest = expr
            .strip_prefix('$')
            .ok_or_else(|| EngineError::invalid_path(expr, "must start with '$'"))?;

        let mut segments = Vec::new();
        let mut chars = rest.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    let mut key = String::new();
                    while let Some(&next) = chars.peek() {
                        if next == '.' || next == '[' {
                            break;
                        }
                        key.push(next);
                        chars.next();
                    }
                    if key.is_empty() {
                        return Err(EngineError::invalid_path(expr, "empty key"));
                    }
                    segments.push(Segment::Key(key));
                }
                '[' => {
                    let mut digits = String::new();
                    let mut closed = false;
                    for next in chars.by_ref() {
                        if next == ']' {
                            closed = true;
                            break;
                        }
                        digits.push(next);
                    }
                    if !closed {
                        return Err(EngineError::invalid_path(expr, "missing ']'"));
                    }
                    let index = digits.parse::<usize>().map_err(|_| {
                        EngineError::invalid_path(expr, format!("bad index '{}'", digits))
                    })?;
                    segments.push(Segment::Index(index));
                }
                other => {
                    return Err(EngineError::invalid_path(
                        expr,
                        format!("unexpected character '{}'", other),
                    ));
                }
            }
        }

        Ok(Self { segments })
    }

    /// Returns a new path with `key` appended.
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.into()));
        Self { segments }
    }

    /// Returns a new path with an index appended. Used for runtime-computed
    /// positions such as the current item of a sequential fan-out.
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Index(index));
        Self { segments }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for segment in &self.segments {
            match segment {
                Segment::Key(key) => write!(f, ".{}", key)?,
                Segment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

impl FromStr for JsonPath {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for JsonPath {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JsonPath> for String {
    fn from(path: JsonPath) -> Self {
        path.to_string()
    }
}

/// Where a node's result lands in the context.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultPath {
    /// Keep the context as it was; drop the result.
    #[default]
    Discard,
    /// Write the result at a path. At `$` the result's keys are merged into
    /// the context.
    Merge(JsonPath),
    /// Replace the whole context with the result.
    Replace,
}

impl ResultPath {
    pub fn at(expr: &str) -> Result<Self, EngineError> {
        Ok(Self::Merge(JsonPath::parse(expr)?))
    }

    pub fn merge_root() -> Self {
        Self::Merge(JsonPath::root())
    }
}

/// The document threaded through one workflow run.
///
/// Always a JSON object. Key order is preserved so notification bodies
/// read in the order fields were written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ExecutionContext {
    root: Value,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }

    /// Builds a context from caller input, which must be a JSON object.
    pub fn from_value(value: Value) -> Result<Self, EngineError> {
        match value {
            Value::Object(_) => Ok(Self { root: value }),
            other => Err(EngineError::InvalidInput(format!(
                "expected a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    /// Looks up the value at `path`.
    pub fn get(&self, path: &JsonPath) -> Option<&Value> {
        let mut current = &self.root;
        for segment in path.segments() {
            current = match segment {
                Segment::Key(key) => current.as_object()?.get(key)?,
                Segment::Index(index) => current.as_array()?.get(*index)?,
            };
        }
        Some(current)
    }

    pub fn contains(&self, path: &JsonPath) -> bool {
        self.get(path).is_some()
    }

    /// Convenience lookup of a top-level string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.root.get(key).and_then(Value::as_str)
    }

    /// Convenience lookup of a top-level integer field.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.root.get(key).and_then(Value::as_i64)
    }

    /// Writes `value` at `path`, creating intermediate objects as needed.
    ///
    /// Writing to `$` replaces the context and requires an object.
    pub fn set(&mut self, path: &JsonPath, value: Value) -> Result<(), EngineError> {
        if path.is_root() {
            *self = Self::from_value(value)?;
            return Ok(());
        }
        set_in(&mut self.root, path.segments(), value)
            .map_err(|reason| EngineError::invalid_path(path.to_string(), reason))
    }

    /// Shallow-merges `fields` into the top level of the context.
    pub fn merge(&mut self, fields: Map<String, Value>) {
        if let Value::Object(map) = &mut self.root {
            for (key, value) in fields {
                map.insert(key, value);
            }
        }
    }

    /// Applies a node result according to its [`ResultPath`].
    pub fn apply_result(&mut self, result_path: &ResultPath, value: Value) -> Result<(), EngineError> {
        match result_path {
            ResultPath::Discard => Ok(()),
            ResultPath::Replace => {
                *self = Self::from_value(value)?;
                Ok(())
            }
            ResultPath::Merge(path) if path.is_root() => match value {
                Value::Object(fields) => {
                    self.merge(fields);
                    Ok(())
                }
                other => Err(EngineError::invalid_path(
                    "$",
                    format!("cannot merge {} into the context", type_name(&other)),
                )),
            },
            ResultPath::Merge(path) => self.set(path, value),
        }
    }

    /// Adds one to an integer counter at the top level and returns the new value.
    pub fn increment(&mut self, counter: &str) -> Result<i64, TaskError> {
        let current = self.get_i64(counter).ok_or_else(|| {
            TaskError::validation(format!("counter '{}' is missing or not an integer", counter))
        })?;
        let next = current.checked_add(1).ok_or_else(|| {
            TaskError::validation(format!("counter '{}' cannot grow past {}", counter, current))
        })?;
        self.merge(Map::from_iter([(counter.to_string(), Value::from(next))]));
        Ok(next)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<Value> for ExecutionContext {
    type Error = EngineError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<ExecutionContext> for Value {
    fn from(context: ExecutionContext) -> Self {
        context.root
    }
}

fn set_in(target: &mut Value, segments: &[Segment], value: Value) -> Result<(), String> {
    let Some((first, rest)) = segments.split_first() else {
        *target = value;
        return Ok(());
    };

    match first {
        Segment::Key(key) => {
            if target.is_null() {
                *target = Value::Object(Map::new());
            }
            let map = target
                .as_object_mut()
                .ok_or_else(|| format!("'{}' is not inside an object", key))?;
            if rest.is_empty() {
                map.insert(key.clone(), value);
                return Ok(());
            }
            let child = map.entry(key.clone()).or_insert(Value::Null);
            set_in(child, rest, value)
        }
        Segment::Index(index) => {
            let items = target
                .as_array_mut()
                .ok_or_else(|| format!("[{}] is not inside an array", index))?;
            if *index == items.len() && rest.is_empty() {
                items.push(value);
                return Ok(());
            }
            let child = items
                .get_mut(*index)
                .ok_or_else(|| format!("index {} out of bounds", index))?;
            set_in(child, rest, value)
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
