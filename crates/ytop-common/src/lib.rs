//! Common types for ytop: the Ytsaurus CRD, errors, naming and telemetry

#![deny(missing_docs)]

pub mod consts;
pub mod crd;
pub mod error;
pub mod events;
pub mod labeller;
pub mod retry;
pub mod telemetry;

pub use error::Error;
pub use labeller::{format_with_default, ComponentKind, Labeller};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
