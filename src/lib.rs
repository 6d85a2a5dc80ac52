//! asyncapi-codegen: AsyncAPI 2.x code generator and runtime.
//!
//! Turns an AsyncAPI 2.x document into typed Rust client code for both ends
//! of every channel, plus the broker-agnostic runtime that code links
//! against:
//!
//! - [`asyncapi`]: the specification model and normalizer
//! - [`codegen`]: the template emitter and generator entrypoint
//! - [`runtime`]: broker drivers, middleware, subscriptions, correlation
//!   and versioning for the generated controllers

pub mod asyncapi;
pub mod codegen;
pub mod error;
pub mod runtime;

pub use error::{Error, Result};
