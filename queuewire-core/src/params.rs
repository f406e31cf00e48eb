//! Argument shaping for positional submission.
//!
//! Callers may pass nothing, a positional list, or a keyed record. Only keyed
//! records are validated against the endpoint's declared parameters.

use tracing::debug;

use crate::endpoint::EndpointDescriptor;
use crate::errors::{ClientError, ClientResult};
use crate::value::{Payload, PayloadMap};

/// Arguments as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CallArgs {
    #[default]
    None,
    Positional(Vec<Payload>),
    Named(PayloadMap),
}

impl CallArgs {
    /// Keyed arguments from `(name, value)` pairs.
    pub fn named<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Payload)>,
    {
        CallArgs::Named(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Payload>,
    {
        CallArgs::Positional(values.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<Payload>> for CallArgs {
    fn from(values: Vec<Payload>) -> Self {
        CallArgs::Positional(values)
    }
}

impl From<PayloadMap> for CallArgs {
    fn from(map: PayloadMap) -> Self {
        CallArgs::Named(map)
    }
}

/// Arrays are positional, objects are keyed, null is absent, and any other
/// value is a single positional argument.
impl From<Payload> for CallArgs {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Null => CallArgs::None,
            Payload::Array(items) => CallArgs::Positional(items),
            Payload::Object(map) => CallArgs::Named(map),
            other => CallArgs::Positional(vec![other]),
        }
    }
}

impl From<serde_json::Value> for CallArgs {
    fn from(value: serde_json::Value) -> Self {
        CallArgs::from(Payload::from(value))
    }
}

/// Resolve `args` against `endpoint` into an ordered argument list.
pub fn map_params(args: CallArgs, endpoint: &EndpointDescriptor) -> ClientResult<Vec<Payload>> {
    let mut named = match args {
        CallArgs::None => return Ok(Vec::new()),
        CallArgs::Positional(values) => return Ok(values),
        CallArgs::Named(map) => map,
    };

    let mut resolved = Vec::with_capacity(endpoint.parameters.len());
    for param in &endpoint.parameters {
        if let Some(value) = named.shift_remove(&param.name) {
            resolved.push(value);
        } else if param.has_default {
            debug!(parameter = %param.name, "using declared default");
            resolved.push(param.default_payload());
        } else {
            return Err(ClientError::InvalidArgument(param.name.clone()));
        }
    }

    if let Some(unknown) = named.keys().next() {
        return Err(ClientError::UnknownArgument(unknown.clone()));
    }

    Ok(resolved)
}
