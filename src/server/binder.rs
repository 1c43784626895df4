//! Parameter Binder: query string -> typed arguments.
//!
//! Parsing is total. Malformed pairs are skipped and conversion failures are
//! recorded in the binding; they surface as an invocation error when the
//! host pump runs the call, never earlier.

use percent_encoding::percent_decode_str;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

use super::registry::OpSchema;
use crate::error::{ConversionError, InvokeError};

/// Split a raw query string (without `?`) into decoded key/value pairs.
///
/// Pairs are `&`-separated, key and value `=`-separated. A pair without `=`
/// or with more than one `=` is ignored. Repeated keys: last one wins.
/// `+` is kept literally.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut pairs = HashMap::new();
    for item in query.trim_start_matches('?').split('&') {
        let mut parts = item.split('=');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        pairs.insert(decode(key), decode(value));
    }
    pairs
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Outcome of binding one declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Value(Value),
    /// Not in the query and no default
    Absent,
    /// In the query but not convertible
    Invalid(ConversionError),
}

/// Arguments for one invocation, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: Vec<(String, Bound)>,
}

impl Args {
    /// Bind `query` against the operation's declared parameters.
    pub fn bind(schema: &OpSchema, query: &HashMap<String, String>) -> Self {
        let values = schema
            .params
            .iter()
            .map(|param| {
                let bound = match query.get(param.name()) {
                    Some(raw) => match param.decode(raw) {
                        Ok(value) => Bound::Value(value),
                        Err(e) => Bound::Invalid(e),
                    },
                    None => match param.default_value() {
                        Some(default) => Bound::Value(default.clone()),
                        None => Bound::Absent,
                    },
                };
                (param.name().to_string(), bound)
            })
            .collect();
        Self { values }
    }

    /// Typed value of a declared parameter; `Ok(None)` when absent.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, InvokeError> {
        match self.bound(name) {
            None => Err(InvokeError::UnknownParam(name.to_string())),
            Some(Bound::Absent) => Ok(None),
            Some(Bound::Invalid(e)) => Err(e.clone().into()),
            Some(Bound::Value(v)) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|source| InvokeError::Shape { name: name.to_string(), source }),
        }
    }

    /// Like [`Args::get`] but absence is an error.
    pub fn require<T: DeserializeOwned>(&self, name: &str) -> Result<T, InvokeError> {
        self.get(name)?.ok_or_else(|| InvokeError::Missing(name.to_string()))
    }

    pub fn bound(&self, name: &str) -> Option<&Bound> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, b)| b)
    }

    /// First conversion failure, if any
    pub fn first_invalid(&self) -> Option<&ConversionError> {
        self.values.iter().find_map(|(_, b)| match b {
            Bound::Invalid(e) => Some(e),
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bound)> {
        self.values.iter().map(|(n, b)| (n.as_str(), b))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
