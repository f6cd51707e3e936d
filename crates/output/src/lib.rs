//! Flowcast Output - record distribution engine
//!
//! Fans flow records out to many consumers in the wire format each one
//! asked for, without letting a slow consumer stall the rest.
//!
//! # Architecture
//!
//! ```text
//! producer ──push()──→ OutputManager (one per channel)
//!                            │
//!            ┌───────────────┴────────────────┐
//!            ▼                                ▼
//!       EventLoop                       DispatchLoop
//!   accept / auth / read ──events──→  encode once per format
//!            ▲                        filter, enqueue shared
//!            └──────── wake ───────── write, status, purge
//!                                             │
//!                               ClientSession queues (WireBuffer refs)
//! ```
//!
//! - `WireBufferPool` encodes a record once per format; sessions hold
//!   shared references until their write completes.
//! - `ClientSession` drops its oldest buffers when it falls behind.
//! - The control channel speaks a line protocol parsed through each
//!   session's `RingCommandBuffer`.

pub mod auth;
pub mod control;
pub mod dispatch;
mod error;
pub mod filter;
pub mod listener;
pub mod manager;
pub mod pool;
pub mod ring;
pub mod session;
pub mod target;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::{
    AccessList, AuthPolicy, Authenticator, NoAuth, Plaintext, SessionSecurity, TokenAuthenticator,
};
pub use control::{Ack, Command, ControlState, Reply};
pub use dispatch::{CycleReport, DispatchLoop};
pub use error::{AuthError, FilterError, OutputError, Result, RingError, SinkError};
pub use filter::RecordFilter;
pub use listener::{EventLoop, ListenerSpec};
pub use manager::{Channel, ClientEvent, OutputConfig, OutputManager, OutputStats, SessionSet};
pub use pool::{PoolMetrics, PoolSnapshot, WireBuffer, WireBufferPool};
pub use ring::{RING_CAPACITY, RingCommandBuffer};
pub use session::{ClientSession, CloseReason, OutputSink, SessionLimits, SessionState, WriteReport};
pub use target::{FileSink, OpenedOutput, OutputTarget, TargetKind, UdpSink};
