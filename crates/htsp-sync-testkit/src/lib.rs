//! # HTSP Sync Testkit
//!
//! Testing utilities for htsp-sync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fake server**: a scripted HTSP server on a loopback socket
//! - **Golden vectors**: HTSMSG bodies with their exact wire bytes
//! - **Generators**: Proptest strategies for values, maps, channels and programs
//! - **Fixtures**: Push builders and small channel lineups
//!
//! ## Fake Server
//!
//! ```rust,no_run
//! use htsp_sync_testkit::{FakeServer, LineupFixture, ServerScript};
//!
//! async fn example() {
//!     let lineup = LineupFixture::three();
//!     let server = FakeServer::start(ServerScript::with_lineup(lineup.channels, lineup.programs))
//!         .await
//!         .unwrap();
//!     println!("serving on {}", server.address());
//! }
//! ```
//!
//! ## Golden Vectors
//!
//! ```rust
//! use htsp_sync_testkit::vectors::verify_all_vectors;
//!
//! for (name, ok, hex) in verify_all_vectors() {
//!     assert!(ok, "{}: {}", name, hex);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use htsp_sync_core::{decode_body, encode_body};
//! use htsp_sync_testkit::generators::field_map;
//!
//! proptest! {
//!     #[test]
//!     fn body_roundtrip(map in field_map()) {
//!         prop_assert_eq!(decode_body(&encode_body(&map).unwrap()).unwrap(), map);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod server;
pub mod vectors;

pub use fixtures::{channel_add, event_add, init_tracing, initial_sync_completed, LineupFixture};
pub use server::{FakeServer, Reply, ServerScript};
