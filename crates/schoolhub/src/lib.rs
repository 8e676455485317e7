//! School administration services: result generation and the fee payment ledger.
//!
//! Both pipelines run on top of a SQLite store with one serialized writer and expose
//! axum routers that the `schoolhub-api` service mounts.

pub mod access;
pub mod config;
pub mod deadline;
pub mod error;
pub mod fees;
pub mod results;
pub mod roster;
pub mod store;
pub mod telemetry;
