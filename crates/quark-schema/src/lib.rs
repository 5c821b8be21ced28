//! API document handling for quark RPC.
//!
//! The server publishes its callable surface as an API document: a list of
//! action descriptors, each naming a dotted namespace, an action and its
//! methods. This crate validates that document against an embedded JSON
//! Schema, deserializes it, and consolidates overloaded methods into one
//! signature per name.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod validator;

pub use config::ParseConfig;
pub use descriptor::{
    consolidate, ActionDescriptor, ActionSignature, ApiDocument, Arity, ArityInfo, AsyncFlag,
    MethodDescriptor, MethodSignature,
};
pub use error::{Result, SchemaError};
pub use validator::{DocumentParser, API_DOCUMENT_SCHEMA};
