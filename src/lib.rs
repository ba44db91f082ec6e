//! colflow: a declarative dataflow engine over column-oriented tables.
//!
//! Tables and derived columns are declared on a [`Workflow`]; `translate`
//! resolves what every operation reads, synthesizes merges for column paths and
//! inherited columns, and orders operations into layers; `run` evaluates the
//! layers against per-table incremental stores.

pub mod config;
pub mod dependency;
pub mod error;
pub mod exec;
pub mod ident;
pub mod manifest;
pub mod operation;
pub mod schema;
pub mod scripts;
pub mod storage;
pub mod topology;
pub mod workflow;

pub use config::EngineConfig;
pub use error::{FlowError, FlowResult};
pub use workflow::{RunReport, Workflow};
