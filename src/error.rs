// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy for the shared-memory RPC runtime.

use std::io;

use crate::value::TypeTag;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong publishing a channel, registering a
/// function, or making a call across it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to create shared memory segment {name:?}")]
    SmsCreateFailed {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to open shared memory segment {name:?}")]
    SmsOpenFailed {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to initialize process-shared mutex")]
    MutexInitFailed(#[source] io::Error),

    #[error("failed to initialize process-shared condition variable")]
    CondInitFailed(#[source] io::Error),

    #[error("function {0:?} is already registered on this channel")]
    AlreadyRegistered(String),

    #[error("no function named {0:?} is registered on this channel")]
    FunctionNotFound(String),

    #[error("unsupported argument or return type: {0}")]
    UnsupportedType(String),

    #[error("failed to encode value onto the wire: {0}")]
    EncodeError(String),

    #[error("argument count mismatch: expected {expected}, got {actual}")]
    ArgCountMismatch { expected: usize, actual: usize },

    #[error("argument {index} could not be decoded as the registered type {expected:?}")]
    ArgTypeMismatch { index: usize, expected: TypeTag },

    #[error("failed to decode value from the wire: {0}")]
    DecodeError(String),

    #[error("protocol violation: {0}")]
    ProtocolError(String),

    #[error("channel control region is corrupted: {0}")]
    ChannelCorrupted(String),

    #[error("channel {0:?} did not become available before the deadline")]
    ChannelUnavailable(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
