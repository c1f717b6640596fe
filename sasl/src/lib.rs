#![no_std]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! This crate provides a framework for SASL authentication and a few authentication mechanisms.
//!
//! It can be used in `no_std` environments.
//!
//! # Examples
//!
//! ## Simple client-sided usage
//!
//! ```rust
//! use sasl::client::Mechanism;
//! use sasl::common::Credentials;
//! use sasl::client::mechanisms::Plain;
//!
//! let creds = Credentials::default()
//!     .with_username("user")
//!     .with_password("pencil");
//!
//! let mut mechanism = Plain::from_credentials(creds).unwrap();
//!
//! let initial_data = mechanism.initial();
//!
//! assert_eq!(initial_data, b"\0user\0pencil");
//! ```
//!
//! ## Picking a mechanism from a server offer
//!
//! ```rust
//! use sasl::client::Catalog;
//! use sasl::common::Credentials;
//!
//! let creds = Credentials::default()
//!     .with_username("user")
//!     .with_password("pencil");
//!
//! let catalog = Catalog::default();
//! let picked = catalog.select(["PLAIN", "SCRAM-SHA-1"], &creds).unwrap();
//!
//! assert_eq!(picked.name, "SCRAM-SHA-1");
//! ```
//!
//! # Usage
//!
//! You can use this in your crate by adding this under `dependencies` in your `Cargo.toml`:
//!
//! ```toml,ignore
//! sasl = "*"
//! ```

extern crate alloc;

pub mod client;
pub mod common;
