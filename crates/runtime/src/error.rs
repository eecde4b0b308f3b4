//! Runtime errors

use thiserror::Error;

use crate::time::Tag;

/// Runtime result type
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime errors
///
/// Build-time variants abort assembly before any tag executes.
/// Scheduling-time and reaction variants are tagged with the offending
/// instance and surface through the scheduler, never silently dropped.
#[derive(Debug, Error)]
pub enum Error {
    // Build-time
    #[error("cycle detected in reaction graph: {reactions:?}")]
    CycleDetected { reactions: Vec<String> },

    #[error("mixed-radix overflow: radices {radices:?} exceed the address width")]
    RadixOverflow { radices: Vec<u32> },

    #[error("digit {digit} out of range for radix {radix} at position {position}")]
    DigitOutOfRange {
        digit: u32,
        radix: u32,
        position: usize,
    },

    #[error("address code {code} out of range for capacity {capacity}")]
    CodeOutOfRange { code: u32, capacity: u32 },

    #[error("malformed address: {reason}")]
    MalformedAddress { reason: String },

    #[error("malformed connection {src} -> {dest}: {reason}")]
    MalformedConnection {
        src: String,
        dest: String,
        reason: String,
    },

    #[error("duplicate name {name:?} in reactor {reactor}")]
    DuplicateName { reactor: String, name: String },

    #[error("unknown {kind} key {key}")]
    UnknownKey { kind: &'static str, key: u32 },

    #[error("invalid declaration {item}: {reason}")]
    InvalidDeclaration { item: String, reason: String },

    // Scheduling-time
    #[error("schedule request at past tag {requested}, current tag is {current}")]
    PastTag { requested: Tag, current: Tag },

    #[error("multiple writers for port {port}: reaction {first} then reaction {second}")]
    ConflictingWrite {
        port: String,
        first: String,
        second: String,
    },

    // Reaction-body
    #[error("reaction {reaction} failed at {tag}")]
    ReactionFailed {
        reaction: String,
        tag: Tag,
        #[source]
        fault: ReactionFault,
    },

    // Platform
    #[error("physical clock unavailable: {reason}")]
    ClockUnavailable { reason: String },

    #[error("worker pool construction failed: {reason}")]
    WorkerPool { reason: String },
}

/// Error raised inside a reaction body.
///
/// Captured by the scheduler and attributed to the reaction's identity;
/// the fault policy decides whether it aborts the program or isolates
/// the owning reactor's subtree.
#[derive(Debug, Error)]
pub enum ReactionFault {
    #[error("reactor state is not of the expected type {expected}")]
    StateType { expected: &'static str },

    #[error("port {port} was not declared as an effect of this reaction")]
    UndeclaredEffect { port: String },

    #[error("{0}")]
    Failed(String),
}

impl From<String> for ReactionFault {
    fn from(message: String) -> Self {
        ReactionFault::Failed(message)
    }
}

impl From<&str> for ReactionFault {
    fn from(message: &str) -> Self {
        ReactionFault::Failed(message.to_string())
    }
}
