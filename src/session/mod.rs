//! Per-peer voice chat session management

mod registry;

pub use registry::{CallRole, SessionInfo, SessionRegistry};
