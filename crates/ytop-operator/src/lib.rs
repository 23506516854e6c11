//! ytop operator: watches Ytsaurus objects and drives their clusters
//! toward the declared state

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod controller_runner;
