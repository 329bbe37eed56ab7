//! Astrid Crypto — narrow cryptographic primitives shared by the streaming
//! session engine.
//!
//! Only BLAKE3 content hashing survives here; it backs MCP stdio server
//! binary verification (`astrid_mcp::config::ServerConfig::verify_binary`).
//! Owner-hash (SHA-256) computation for tenant identity lives in
//! `astrid-streaming` directly, since it is a different algorithm for a
//! different purpose.
//!
//! # Example
//!
//! ```
//! use astrid_crypto::ContentHash;
//!
//! let hash = ContentHash::hash(b"important data");
//! println!("Hash: {}", hash.to_hex());
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod hash;

pub use hash::ContentHash;
