// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

use dispatcher::DispatchError;
use graph::GraphError;
use process::{Pid, ProcessError};
use recycle_pool::PoolError;
use svar::{SvError, SvId};

use crate::call::ParseError;

pub type EngineId = dispatcher::EngineId;
pub type PlaceholderId = svar::SvId;

/// Errors caused by the calling VM: surfaced back with a message, never fatal to the
/// server (§7).
#[derive(Debug, Eq, PartialEq)]
pub enum UserError {
    UnknownPid(Pid),
    DeadProcess(Pid),
    UnknownPlaceholder(PlaceholderId),
    UnknownEngine(EngineId),
    UnknownVariable(SvId),
    /// A variable referenced by `var_id` already has a producer bound to it.
    VariableAlreadyProduced(SvId),
    ParseFailed(String),
    OutputAdjacency(String),
    /// A native call's computation raised an exception.
    NativeCallFailed(String),
    /// No engine both admits a thread's requirements and is healthy, after the
    /// dispatcher's bounded retry budget was exhausted.
    NoEligibleEngine,
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserError::UnknownPid(pid) => write!(f, "no VM registered with pid {pid}"),
            UserError::DeadProcess(pid) => write!(f, "process {pid} is dead"),
            UserError::UnknownPlaceholder(id) => write!(f, "no placeholder bound to {id}"),
            UserError::UnknownEngine(id) => write!(f, "no engine registered with id {id}"),
            UserError::UnknownVariable(id) => write!(f, "{id} is not a known semantic variable"),
            UserError::VariableAlreadyProduced(id) => write!(f, "{id} already has a producer"),
            UserError::ParseFailed(msg) => write!(f, "call parsing failed: {msg}"),
            UserError::OutputAdjacency(name) => write!(f, "output placeholder {name} has no anchor text before it"),
            UserError::NativeCallFailed(msg) => write!(f, "native call failed: {msg}"),
            UserError::NoEligibleEngine => write!(f, "no eligible engine for this thread"),
        }
    }
}

/// Fatal invariant violations: a bug in this runtime or an exhausted resource, not
/// something the calling VM did wrong (§7). `parrot` only runs in lenient mode: these
/// are logged and the offending process is marked `bad` rather than terminating the
/// server (see `PCore::mark_bad_on_internal_error`).
#[derive(Debug, Eq, PartialEq)]
pub enum InternalError {
    PoolExhausted,
    AlreadySet(SvId),
    InvalidFree(u32),
    Deadlock,
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InternalError::PoolExhausted => write!(f, "pool exhausted"),
            InternalError::AlreadySet(id) => write!(f, "{id} already has content"),
            InternalError::InvalidFree(id) => write!(f, "id {id} is not currently allocated"),
            InternalError::Deadlock => write!(f, "no thread can make progress: deadlock"),
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    User(UserError),
    Internal(InternalError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::User(e) => write!(f, "{e}"),
            Error::Internal(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<PoolError> for Error {
    fn from(e: PoolError) -> Error {
        match e {
            PoolError::PoolExhausted => Error::Internal(InternalError::PoolExhausted),
            PoolError::InvalidFree(id) => Error::Internal(InternalError::InvalidFree(id)),
        }
    }
}

impl From<SvError> for Error {
    fn from(e: SvError) -> Error {
        match e {
            SvError::AlreadySet(id) => Error::Internal(InternalError::AlreadySet(id)),
            SvError::UnknownVariable(id) => Error::User(UserError::UnknownVariable(id)),
        }
    }
}

impl From<GraphError> for Error {
    fn from(e: GraphError) -> Error {
        match e {
            GraphError::UnknownVariable(id) => Error::User(UserError::UnknownVariable(id)),
            GraphError::AlreadyHasProducer(id) => Error::User(UserError::VariableAlreadyProduced(id)),
            GraphError::Deadlock => Error::Internal(InternalError::Deadlock),
        }
    }
}

impl From<ProcessError> for Error {
    fn from(e: ProcessError) -> Error {
        match e {
            ProcessError::UnknownPlaceholder(id) => Error::User(UserError::UnknownPlaceholder(id)),
            ProcessError::AlreadySet(id) => Error::Internal(InternalError::AlreadySet(id)),
            ProcessError::Graph(e) => e.into(),
            ProcessError::ProcessDead(pid) => Error::User(UserError::DeadProcess(pid)),
            ProcessError::NativeCallFailed(msg) => Error::User(UserError::NativeCallFailed(msg)),
        }
    }
}

impl From<DispatchError> for Error {
    fn from(e: DispatchError) -> Error {
        match e {
            DispatchError::UnknownEngine(id) => Error::User(UserError::UnknownEngine(id)),
            DispatchError::Pool(e) => e.into(),
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Error {
        match e {
            ParseError::OutputAdjacency(name) => Error::User(UserError::OutputAdjacency(name)),
            other => Error::User(UserError::ParseFailed(other.to_string())),
        }
    }
}
