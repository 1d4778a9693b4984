//! buttonbox-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does buttonbox-client do? (for beginners)
//!
//! A ButtonBox is a grid of on-screen buttons, each bound to a keyboard or
//! mouse action.  Pressing a button does not perform the action locally:
//! the client sends a small UDP packet to a *companion* process running on
//! a PC, and the companion performs it there.
//!
//! Because UDP gives no feedback, the client keeps a heartbeat running:
//!
//! 1. Every few seconds it sends a `HEALTH_CHECK_PING` to the companion.
//! 2. The companion answers each ping with a `HEALTH_CHECK_PONG` that echoes
//!    the ping's id.
//! 3. Answered and unanswered pings are counted, and the counts decide the
//!    [`ConnectionState`](buttonbox_core::ConnectionState) shown to the user.
//!
//! Command packets (`MACRO_COMMAND`) travel over the same socket.

/// Application layer: the heartbeat state machine and use cases.
pub mod application;

/// Infrastructure layer: UDP engine, endpoint source, config storage.
pub mod infrastructure;
