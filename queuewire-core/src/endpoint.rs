//! Endpoint descriptors.
//!
//! Descriptors are built once from the app's `/info` document and the
//! `dependencies` list of its `/config`, then shared read-only.
//!
//! `/info` looks like:
//!
//! ```json
//! {
//!   "named_endpoints": {
//!     "/predict": {
//!       "parameters": [
//!         { "label": "Input", "parameter_name": "text", "parameter_has_default": false,
//!           "type": { "type": "string" }, "python_type": { "type": "str" },
//!           "component": "Textbox", "serializer": "StringSerializable" }
//!       ],
//!       "returns": [ { "label": "Output", "component": "Textbox" } ]
//!     }
//!   },
//!   "unnamed_endpoints": { "3": { "parameters": [], "returns": [] } }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ClientError, ClientResult};
use crate::value::Payload;

/// Component kinds whose binary inputs are inlined instead of uploaded.
pub const WITHHELD_COMPONENTS: &[&str] = &["Image"];

/// Component kinds whose file references are bare names.
pub const BARE_NAME_COMPONENTS: &[&str] = &["Gallery"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PythonType {
    #[serde(rename = "type", default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// One declared input of an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(default)]
    pub label: String,
    #[serde(rename = "parameter_name", default)]
    pub name: String,
    #[serde(rename = "parameter_has_default", default)]
    pub has_default: bool,
    #[serde(rename = "parameter_default", default)]
    pub default_value: Option<Value>,
    #[serde(rename = "type", default)]
    pub declared_type: Value,
    #[serde(default)]
    pub python_type: PythonType,
    #[serde(rename = "component", default)]
    pub component_kind: String,
    #[serde(rename = "serializer", default)]
    pub serializer_kind: String,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            ..Self::default()
        }
    }

    pub fn with_default(name: impl Into<String>, default: Value) -> Self {
        Self {
            has_default: true,
            default_value: Some(default),
            ..Self::required(name)
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component_kind = component.into();
        self
    }

    /// The declared default, or null when none was declared.
    pub fn default_payload(&self) -> Payload {
        self.default_value.clone().map(Payload::from).unwrap_or_default()
    }
}

/// One declared output of an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnSpec {
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub declared_type: Value,
    #[serde(default)]
    pub python_type: PythonType,
    #[serde(rename = "component", default)]
    pub component_kind: String,
    #[serde(rename = "serializer", default)]
    pub serializer_kind: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointKind {
    /// Streams intermediate outputs
    pub generator: bool,
    /// Cancels other running events when triggered
    pub cancel: bool,
}

/// Immutable description of one callable endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub name: Option<String>,
    pub fn_index: usize,
    pub parameters: Vec<ParameterSpec>,
    pub returns: Vec<ReturnSpec>,
    pub kind: EndpointKind,
}

impl EndpointDescriptor {
    pub fn new(parameters: Vec<ParameterSpec>) -> Self {
        Self {
            parameters,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_fn_index(mut self, fn_index: usize) -> Self {
        self.fn_index = fn_index;
        self
    }

    pub fn with_kind(mut self, kind: EndpointKind) -> Self {
        self.kind = kind;
        self
    }

    /// Component kind of the `position`th parameter, if declared.
    pub fn component_at(&self, position: usize) -> Option<&str> {
        self.parameters
            .get(position)
            .map(|p| p.component_kind.as_str())
    }
}

/// One entry of the `/config` `dependencies` list. Its position is the `fn_index`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DependencySpec {
    /// A string, `null`, or `false` for hidden endpoints.
    #[serde(default)]
    pub api_name: Value,
    #[serde(default)]
    pub types: DependencyTypes,
    #[serde(default)]
    pub cancels: Vec<Value>,
    /// Whether calls go through the queue; `None` defers to the app-wide setting.
    #[serde(default)]
    pub queue: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct DependencyTypes {
    #[serde(default)]
    pub generator: bool,
}

impl DependencySpec {
    pub fn api_name(&self) -> Option<&str> {
        self.api_name
            .as_str()
            .map(|name| name.trim_start_matches('/'))
            .filter(|name| !name.is_empty())
    }

    pub fn kind(&self) -> EndpointKind {
        EndpointKind {
            generator: self.types.generator,
            cancel: !self.cancels.is_empty(),
        }
    }
}

/// How a caller addresses an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EndpointRef {
    Name(String),
    Index(usize),
}

impl EndpointRef {
    /// `"/predict"` and `"predict"` address the same endpoint.
    pub fn name(name: impl AsRef<str>) -> Self {
        EndpointRef::Name(name.as_ref().trim_start_matches('/').to_string())
    }
}

impl From<&str> for EndpointRef {
    fn from(name: &str) -> Self {
        EndpointRef::name(name)
    }
}

impl From<String> for EndpointRef {
    fn from(name: String) -> Self {
        EndpointRef::name(name)
    }
}

impl From<usize> for EndpointRef {
    fn from(index: usize) -> Self {
        EndpointRef::Index(index)
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRef::Name(name) => write!(f, "/{}", name),
            EndpointRef::Index(i) => write!(f, "fn_index {}", i),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawEndpoint {
    #[serde(default)]
    parameters: Vec<ParameterSpec>,
    #[serde(default)]
    returns: Vec<ReturnSpec>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInfo {
    #[serde(default)]
    named_endpoints: IndexMap<String, RawEndpoint>,
    #[serde(default)]
    unnamed_endpoints: IndexMap<String, RawEndpoint>,
}

/// All endpoints an app exposes.
#[derive(Debug, Clone, Default)]
pub struct ApiInfo {
    named: IndexMap<String, EndpointDescriptor>,
    unnamed: BTreeMap<usize, EndpointDescriptor>,
}

impl ApiInfo {
    /// Build descriptors from an `/info` document and the config's dependencies.
    pub fn parse(info: &Value, dependencies: &[DependencySpec]) -> ClientResult<Self> {
        let raw: RawInfo = serde_json::from_value(info.clone())?;

        let fn_index_of = |name: &str| {
            dependencies
                .iter()
                .position(|dep| dep.api_name() == Some(name))
        };

        let mut api = ApiInfo::default();

        for (raw_name, endpoint) in raw.named_endpoints {
            let name = raw_name.trim_start_matches('/').to_string();
            let fn_index = fn_index_of(&name).ok_or_else(|| {
                ClientError::config_unresolved(format!(
                    "endpoint `/{}` has no matching dependency",
                    name
                ))
            })?;
            let descriptor = Self::descriptor(endpoint, fn_index, Some(name.clone()), dependencies);
            api.named.insert(name, descriptor);
        }

        for (raw_index, endpoint) in raw.unnamed_endpoints {
            let fn_index: usize = raw_index.parse().map_err(|_| {
                ClientError::config_unresolved(format!("invalid unnamed endpoint `{}`", raw_index))
            })?;
            let descriptor = Self::descriptor(endpoint, fn_index, None, dependencies);
            api.unnamed.insert(fn_index, descriptor);
        }

        Ok(api)
    }

    fn descriptor(
        raw: RawEndpoint,
        fn_index: usize,
        name: Option<String>,
        dependencies: &[DependencySpec],
    ) -> EndpointDescriptor {
        EndpointDescriptor {
            name,
            fn_index,
            parameters: raw.parameters,
            returns: raw.returns,
            kind: dependencies
                .get(fn_index)
                .map(DependencySpec::kind)
                .unwrap_or_default(),
        }
    }

    pub fn insert(&mut self, descriptor: EndpointDescriptor) {
        match descriptor.name.clone() {
            Some(name) => {
                self.named.insert(name, descriptor);
            }
            None => {
                self.unnamed.insert(descriptor.fn_index, descriptor);
            }
        }
    }

    /// Find an endpoint by name or `fn_index`.
    pub fn lookup(&self, endpoint: &EndpointRef) -> ClientResult<&EndpointDescriptor> {
        let found = match endpoint {
            EndpointRef::Name(name) => self.named.get(name.trim_start_matches('/')),
            EndpointRef::Index(i) => self
                .unnamed
                .get(i)
                .or_else(|| self.named.values().find(|d| d.fn_index == *i)),
        };
        found.ok_or_else(|| ClientError::EndpointNotFound(endpoint.to_string()))
    }

    pub fn named_endpoints(&self) -> impl Iterator<Item = (&str, &EndpointDescriptor)> {
        self.named.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn unnamed_endpoints(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.unnamed.values()
    }

    pub fn len(&self) -> usize {
        self.named.len() + self.unnamed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
