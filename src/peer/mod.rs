//! Peer connection management

mod connection;

pub use connection::{ConnectionState, PeerConnection};
