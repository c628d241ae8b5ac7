//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bounded accept, periodic timeout)
//!     → tls.rs (handshake on https endpoints)
//!     → connection.rs (lifecycle tracking for drain)
//!     → Hand off to the HTTP dispatcher
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS is optional and handled per endpoint

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Accepted, Listener, ListenerError, QueuePermit};
pub use tls::{load_tls_config, TlsTerminator};
