//! Stream and server lifecycle, SME queueing, application API (§3, §4.9).

pub mod endpoint;
pub mod manager;
pub mod sme;
pub mod types;

pub use endpoint::{Server, Stream};
pub use manager::{ServerHandle, StreamHandle, StreamManager};
pub use sme::{Sme, SmeKind, SmeQueue};
pub use types::{Direction, NodeId, Redundancy, StreamId, StreamParameters, StreamStatus};
