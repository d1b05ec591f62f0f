//! Request and reply messages of the fleet services driven by the fan-out
//! helpers, plus their full method names.

use serde::{Deserialize, Serialize};

pub const EXEC_RUN: &str = "/Exec.Exec/Run";
pub const LOGGING_SET_VERBOSITY: &str = "/Logging.Logging/SetVerbosity";
pub const LOGGING_GET_VERBOSITY: &str = "/Logging.Logging/GetVerbosity";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecRequest {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecResponse {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub ret_code: i32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetVerbosityRequest {
    pub level: i32,
}

/// Empty request of `GetVerbosity`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetVerbosityRequest;

/// Reply of both verbosity calls: the previous level for `SetVerbosity`,
/// the current one for `GetVerbosity`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerbosityReply {
    pub level: i32,
}
