//! Server configuration generation for Ytsaurus clusters
//!
//! The reconciliation core treats configuration as opaque bytes. This crate
//! owns the only code that knows what goes inside them.

#![deny(missing_docs)]

mod generator;
mod model;

pub use generator::{ConfigGenerator, ConfigRole, Generator};
