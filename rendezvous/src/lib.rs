//! # Rendezvous Server Library
//!
//! The naming service peers use to find each other. A hosting peer claims an
//! endpoint name (its namespaced room code); a joining peer looks the name up
//! and then talks to the host directly. No game traffic passes through here.
//!
//! ## Responsibilities
//!
//! ### Name Registration
//! A name belongs to one address at a time. A second peer asking for a live
//! name receives `NameTaken` and is expected to pick another room code.
//!
//! ### Lookup
//! Joining peers resolve a name to the host's socket address. Unknown or
//! expired names answer `NotFound`.
//!
//! ### Expiry
//! Hosts refresh their registration periodically. Silent registrations are
//! dropped by a background task so abandoned rooms free their codes.
//!
//! ## Module Organization
//!
//! - `registry`: the name table, ownership and expiry rules
//! - `network`: UDP socket tasks and the request dispatch loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use rendezvous::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("0.0.0.0:9000", 1024, Duration::from_secs(10)).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod registry;
