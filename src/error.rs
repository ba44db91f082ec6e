//! Unified engine error model.
//! Every fallible engine entry point returns [`FlowResult`]; the variants separate
//! structural problems of the declared graph (which abort `translate`) from data
//! problems of a single operation (which the scheduler isolates and skips).

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::storage::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowError {
    Config { code: String, message: String },
    NotFound { code: String, message: String },
    Cycle { code: String, message: String, operations: Vec<String> },
    Unimplemented { code: String, message: String },
    Data { code: String, message: String },
    Exec { code: String, message: String },
    Io { code: String, message: String },
    Internal { code: String, message: String },
}

impl FlowError {
    pub fn code_str(&self) -> &str {
        match self {
            FlowError::Config { code, .. }
            | FlowError::NotFound { code, .. }
            | FlowError::Cycle { code, .. }
            | FlowError::Unimplemented { code, .. }
            | FlowError::Data { code, .. }
            | FlowError::Exec { code, .. }
            | FlowError::Io { code, .. }
            | FlowError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            FlowError::Config { message, .. }
            | FlowError::NotFound { message, .. }
            | FlowError::Cycle { message, .. }
            | FlowError::Unimplemented { message, .. }
            | FlowError::Data { message, .. }
            | FlowError::Exec { message, .. }
            | FlowError::Io { message, .. }
            | FlowError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn config<S: Into<String>>(code: S, msg: S) -> Self { FlowError::Config { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { FlowError::NotFound { code: code.into(), message: msg.into() } }
    pub fn unimplemented<S: Into<String>>(code: S, msg: S) -> Self { FlowError::Unimplemented { code: code.into(), message: msg.into() } }
    pub fn data<S: Into<String>>(code: S, msg: S) -> Self { FlowError::Data { code: code.into(), message: msg.into() } }
    pub fn exec<S: Into<String>>(code: S, msg: S) -> Self { FlowError::Exec { code: code.into(), message: msg.into() } }
    pub fn io<S: Into<String>>(code: S, msg: S) -> Self { FlowError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { FlowError::Internal { code: code.into(), message: msg.into() } }

    /// Operations that could not be placed in any layer.
    pub fn cycle(operations: Vec<String>) -> Self {
        let message = format!("dependency cycle among operations: {}", operations.join(", "));
        FlowError::Cycle { code: "dependency_cycle".into(), message, operations }
    }

    /// Errors in the declared graph itself. These abort `translate`.
    pub fn is_structural(&self) -> bool {
        matches!(self, FlowError::Config { .. } | FlowError::NotFound { .. } | FlowError::Cycle { .. })
    }

    /// Errors confined to the data one operation sees. The scheduler logs and skips these.
    pub fn is_data(&self) -> bool { matches!(self, FlowError::Data { .. }) }

    /// Process exit code used by the command line wrapper.
    pub fn exit_code(&self) -> i32 {
        match self {
            FlowError::Config { .. } => 2,
            FlowError::NotFound { .. } => 2,
            FlowError::Cycle { .. } => 3,
            FlowError::Unimplemented { .. } => 4,
            FlowError::Data { .. } => 5,
            FlowError::Exec { .. } => 6,
            FlowError::Io { .. } => 74,
            FlowError::Internal { .. } => 70,
        }
    }
}

impl Display for FlowError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for FlowError {}

pub type FlowResult<T> = Result<T, FlowError>;

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        // UDFs report through anyhow; a FlowError carried inside keeps its class
        match err.downcast::<FlowError>() {
            Ok(inner) => inner,
            Err(err) => FlowError::Exec { code: "udf_error".into(), message: format!("{:#}", err) },
        }
    }
}

impl From<polars::prelude::PolarsError> for FlowError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        FlowError::Exec { code: "backend_error".into(), message: err.to_string() }
    }
}

impl From<mlua::Error> for FlowError {
    fn from(err: mlua::Error) -> Self {
        FlowError::Exec { code: "lua_error".into(), message: err.to_string() }
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        FlowError::Config { code: "manifest_invalid".into(), message: err.to_string() }
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        FlowError::Io { code: "io_error".into(), message: err.to_string() }
    }
}

impl From<StoreError> for FlowError {
    fn from(err: StoreError) -> Self {
        FlowError::Exec { code: "store_error".into(), message: err.to_string() }
    }
}
