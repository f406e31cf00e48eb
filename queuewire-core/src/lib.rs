//! queuewire-core: value tree, errors and request shaping for the queuewire job client.
//!
//! Nothing in this crate performs I/O. It owns the shapes every other crate
//! exchanges:
//!
//! - [`Payload`], the request/result value tree with binary leaves
//! - [`ClientError`], the error taxonomy shared by the whole client
//! - [`ClientConfig`] and [`ClientOptions`]
//! - [`EndpointDescriptor`] and [`ApiInfo`], parsed from an app's metadata
//! - [`map_params`], which turns caller arguments into positional form
//! - [`apply_diff`], which rebuilds streamed outputs from edit lists

pub mod config;
pub mod diff;
pub mod endpoint;
pub mod errors;
pub mod params;
pub mod value;

pub use config::{ClientConfig, ClientConfigSnapshot, ClientOptions};
pub use diff::{apply_diff, parse_diff, DiffAction, DiffOp};
pub use endpoint::{
    ApiInfo, DependencySpec, EndpointDescriptor, EndpointKind, EndpointRef, ParameterSpec,
    PythonType, ReturnSpec,
};
pub use errors::{ClientError, ClientResult, ErrorKind};
pub use params::{map_params, CallArgs};
pub use value::{display_path, BlobHandle, BlobIdentity, PathKey, Payload, PayloadMap};
