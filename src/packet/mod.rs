//! Packet codec — frame header, length checks, authenticated wrapping.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    Packet pipeline                         │
//! │                                                              │
//! │  ┌──────────┐   ┌───────────────┐   ┌────────────────────┐ │
//! │  │  Header  │──▶│ optional auth │──▶│ phase-specific TLV │ │
//! │  │ (7 bytes)│   │   tag stage   │   │      payload       │ │
//! │  └──────────┘   └───────────────┘   └────────────────────┘ │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Framing is byte-exact (§4.2), so it is hand-rolled rather than routed
//! through a generic serializer: `serde`/`postcard` are reserved for
//! internal, non-wire-exact bookkeeping elsewhere in this crate.

pub mod auth;
pub mod codec;

pub use codec::{FrameHeader, HEADER_SIZE, MAX_FRAME_SIZE};
