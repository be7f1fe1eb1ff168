//! Unified error types for the MAC runtime.
//!
//! Follows the same shape used throughout this codebase: a single `Error`
//! enum that every subsystem funnels into, keeping the MAC thread's error
//! handling uniform. Per-packet failures never propagate past a phase
//! boundary (see `phases`); only misconfiguration is fatal, and only at
//! construction time.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level MAC error
// ---------------------------------------------------------------------------

/// Every fallible operation in the MAC funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A receive deadline passed with nothing (valid) received.
    Timeout,
    /// CRC mismatch, or (with the `crypto` feature) authentication failure.
    CrcOrAuth,
    /// The node lost synchronization with the master.
    Desync,
    /// An API write exceeded the negotiated payload size.
    BufferOverflow,
    /// The stream/server handle does not name a live endpoint.
    InvalidFd,
    /// The endpoint exists but is not in a state that accepts this call.
    NotConnected,
    /// Peripheral/transceiver initialisation failed.
    Init(&'static str),
    /// `NetworkConfiguration` is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::CrcOrAuth => write!(f, "CRC or authentication failure"),
            Self::Desync => write!(f, "desynchronized from master"),
            Self::BufferOverflow => write!(f, "buffer overflow"),
            Self::InvalidFd => write!(f, "invalid stream/server handle"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Transceiver errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransceiverError {
    Timeout,
    TooLong,
    CrcFail,
    Uninitialized,
}

impl fmt::Display for TransceiverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::TooLong => write!(f, "packet too long"),
            Self::CrcFail => write!(f, "CRC failure"),
            Self::Uninitialized => write!(f, "transceiver uninitialized"),
        }
    }
}

impl From<TransceiverError> for Error {
    fn from(e: TransceiverError) -> Self {
        match e {
            TransceiverError::Timeout => Self::Timeout,
            TransceiverError::TooLong | TransceiverError::CrcFail => Self::CrcOrAuth,
            TransceiverError::Uninitialized => Self::Init("transceiver uninitialized"),
        }
    }
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Header bytes did not match the fixed PAN-broadcast pattern.
    BadHeader,
    /// `panId` field did not match the configured network.
    PanMismatch,
    /// Packet length did not equal the expected size for this phase.
    BadLength,
    /// Hop byte did not equal the expected hop for this receive slot.
    BadHop,
    /// Authentication tag did not verify (crypto feature only).
    AuthFailed,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadHeader => write!(f, "malformed frame header"),
            Self::PanMismatch => write!(f, "PAN id mismatch"),
            Self::BadLength => write!(f, "unexpected frame length"),
            Self::BadHop => write!(f, "unexpected hop count"),
            Self::AuthFailed => write!(f, "authentication tag mismatch"),
        }
    }
}

impl From<CodecError> for Error {
    fn from(_: CodecError) -> Self {
        Self::CrcOrAuth
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// MAC-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
