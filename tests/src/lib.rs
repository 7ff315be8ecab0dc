//! # beammesh Test Suite
//!
//! Unified test crate for multi-node scenarios that exercise real UDP
//! sockets on 127.0.0.1 with `force_localhost` topologies.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── two_node.rs   # Handshake, reliable send, failure surfacing
//!     ├── integrity.rs  # Checksum NACKs, duplicate suppression, sessions
//!     ├── dht.rs        # Five-node join and lookup
//!     └── gossip.rs     # Line-topology convergence and cleanup sweeps
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p mesh-tests
//! cargo test -p mesh-tests integration::dht::
//! ```

#![allow(dead_code)]

pub mod integration;
