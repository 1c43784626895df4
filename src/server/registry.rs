//! Method Registry: explicit table of callable operations.
//!
//! Operations are registered by name with an ordered parameter schema and a
//! handler. At server start the registry is split in two:
//!
//! - [`Catalog`] - names and schemas only, `Send + Sync`, shared read-only
//!   with every connection worker for routing and binding
//! - handlers - stay with the [`HttpServer`](super::HttpServer) on the host
//!   thread, reachable only from [`HttpServer::pump`](super::HttpServer::pump)
//!
//! Handlers receive the host's method-call target as `&mut T`, so they
//! never need to be `Send`.

use log::warn;
use serde_json::Value;
use std::collections::HashMap;

use super::binder::Args;
use crate::error::ConversionError;

/// Turns a raw query value into a typed JSON value; `None` means "not convertible".
pub type DecodeFn = fn(&str) -> Option<Value>;

/// Operation body. Returning `Ok(None)` means "no value" and is answered with `{}`.
pub type Handler<T> = Box<dyn FnMut(&mut T, &Args) -> anyhow::Result<Option<Value>>>;

/// One declared parameter: name, declared type, optional default.
#[derive(Debug, Clone)]
pub struct Param {
    name: String,
    type_name: &'static str,
    decode: DecodeFn,
    default: Option<Value>,
}

impl Param {
    /// Custom decoder for types beyond the built-ins.
    pub fn custom(name: impl Into<String>, type_name: &'static str, decode: DecodeFn) -> Self {
        Self { name: name.into(), type_name, decode, default: None }
    }

    /// Signed 64-bit integer
    pub fn int(name: impl Into<String>) -> Self {
        Self::custom(name, "int", decode_int)
    }

    /// Finite 64-bit float
    pub fn float(name: impl Into<String>) -> Self {
        Self::custom(name, "float", decode_float)
    }

    /// `true`/`false`/`1`/`0`, case-insensitive
    pub fn bool(name: impl Into<String>) -> Self {
        Self::custom(name, "bool", decode_bool)
    }

    /// Any string, taken verbatim after percent-decoding
    pub fn string(name: impl Into<String>) -> Self {
        Self::custom(name, "string", decode_string)
    }

    /// Value used when the query does not mention this parameter
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Decode a raw query value into this parameter's type.
    pub fn decode(&self, raw: &str) -> Result<Value, ConversionError> {
        (self.decode)(raw).ok_or_else(|| ConversionError {
            param: self.name.clone(),
            expected: self.type_name,
            value: raw.to_string(),
        })
    }
}

fn decode_int(raw: &str) -> Option<Value> {
    raw.trim().parse::<i64>().ok().map(Value::from)
}

fn decode_float(raw: &str) -> Option<Value> {
    let f = raw.trim().parse::<f64>().ok()?;
    serde_json::Number::from_f64(f).map(Value::Number)
}

fn decode_bool(raw: &str) -> Option<Value> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(Value::Bool(true)),
        "false" | "0" => Some(Value::Bool(false)),
        _ => None,
    }
}

fn decode_string(raw: &str) -> Option<Value> {
    Some(Value::String(raw.to_string()))
}

/// Name and parameter schema of a registered operation.
#[derive(Debug, Clone)]
pub struct OpSchema {
    /// Position in the handler table
    pub(crate) id: usize,
    pub name: String,
    pub params: Vec<Param>,
}

/// Read-only lookup table shared with connection workers.
#[derive(Debug, Default)]
pub struct Catalog {
    ops: Vec<OpSchema>,
    index: HashMap<String, usize>,
    case_sensitive: bool,
}

impl Catalog {
    /// Find the operation a path segment names, honoring the case rule.
    pub fn lookup(&self, segment: &str) -> Option<&OpSchema> {
        if segment.is_empty() {
            return None;
        }
        let key = name_key(segment, self.case_sensitive);
        self.index.get(key.as_str()).map(|&id| &self.ops[id])
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().map(|op| op.name.as_str())
    }
}

fn name_key(name: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        name.to_string()
    } else {
        name.to_lowercase()
    }
}

/// Builder for the operation table.
///
/// # Example
/// ```ignore
/// let mut registry = Registry::<Game>::new();
/// registry.register("Add", vec![Param::int("x"), Param::int("y")], |_, args| {
///     Ok(Some((args.require::<i64>("x")? + args.require::<i64>("y")?).into()))
/// });
/// ```
pub struct Registry<T> {
    ops: Vec<(OpSchema, Handler<T>)>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Register an operation. Chainable.
    pub fn register<F>(&mut self, name: impl Into<String>, params: Vec<Param>, handler: F) -> &mut Self
    where
        F: FnMut(&mut T, &Args) -> anyhow::Result<Option<Value>> + 'static,
    {
        let schema = OpSchema { id: 0, name: name.into(), params };
        self.ops.push((schema, Box::new(handler)));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Split into the shared catalog and the host-side handler table.
    ///
    /// A later registration under an equal name (per `case_sensitive`)
    /// replaces the earlier one.
    pub(crate) fn into_parts(self, case_sensitive: bool) -> (Catalog, Vec<Handler<T>>) {
        let mut catalog = Catalog { case_sensitive, ..Catalog::default() };
        let mut handlers: Vec<Handler<T>> = Vec::with_capacity(self.ops.len());

        for (mut schema, handler) in self.ops {
            let key = name_key(&schema.name, case_sensitive);
            match catalog.index.get(&key) {
                Some(&id) => {
                    warn!(
                        "Operation '{}' registered twice, replacing '{}'",
                        schema.name, catalog.ops[id].name
                    );
                    schema.id = id;
                    catalog.ops[id] = schema;
                    handlers[id] = handler;
                }
                None => {
                    let id = catalog.ops.len();
                    schema.id = id;
                    catalog.index.insert(key, id);
                    catalog.ops.push(schema);
                    handlers.push(handler);
                }
            }
        }

        (catalog, handlers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Registry<()> {
        let mut registry = Registry::new();
        registry
            .register("Add", vec![Param::int("x"), Param::int("y")], |_, _| Ok(None))
            .register("Echo", vec![Param::string("msg").with_default("hi")], |_, _| Ok(None));
        registry
    }

    #[test]
    fn test_decoders() {
        assert_eq!(Param::int("a").decode(" 42 ").unwrap(), json!(42));
        assert_eq!(Param::float("f").decode("2.5").unwrap(), json!(2.5));
        assert_eq!(Param::bool("b").decode("TRUE").unwrap(), json!(true));
        assert_eq!(Param::bool("b").decode("0").unwrap(), json!(false));
        assert_eq!(Param::string("s").decode("a b").unwrap(), json!("a b"));
    }

    #[test]
    fn test_decode_failure_names_param() {
        let err = Param::int("count").decode("many").unwrap_err();
        assert_eq!(err.param, "count");
        assert_eq!(err.expected, "int");
        assert_eq!(err.value, "many");
        assert!(Param::float("f").decode("NaN").is_err());
        assert!(Param::bool("b").decode("yes").is_err());
    }

    #[test]
    fn test_lookup_case_sensitive() {
        let (catalog, handlers) = sample().into_parts(true);
        assert_eq!(catalog.len(), 2);
        assert_eq!(handlers.len(), 2);
        assert_eq!(catalog.lookup("Add").unwrap().params.len(), 2);
        assert!(catalog.lookup("add").is_none());
        assert!(catalog.lookup("").is_none());
    }

    #[test]
    fn test_lookup_case_insensitive() {
        let (catalog, _) = sample().into_parts(false);
        let op = catalog.lookup("eCHO").unwrap();
        assert_eq!(op.name, "Echo");
        assert_eq!(op.params[0].default_value(), Some(&json!("hi")));
    }

    #[test]
    fn test_duplicate_registration_replaces() {
        let mut registry = sample();
        registry.register("add", vec![], |_, _| Ok(Some(json!("second"))));

        let (catalog, _) = registry.into_parts(true);
        assert_eq!(catalog.len(), 3);

        let mut registry = sample();
        registry.register("add", vec![], |_, _| Ok(Some(json!("second"))));
        let (catalog, handlers) = registry.into_parts(false);
        assert_eq!(catalog.len(), 2);
        assert_eq!(handlers.len(), 2);
        let op = catalog.lookup("ADD").unwrap();
        assert_eq!(op.name, "add");
        assert!(op.params.is_empty());
        assert_eq!(op.id, 0);
    }
}
