//! Crate for the `levelgate` project
//!
//! Decides, per structured log record, whether the record's level is
//! currently allowed for its source, using filter rules cached from a
//! shared configuration store.
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_copy_implementations)]
// #![deny(missing_debug_implementations)]

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]

pub mod config;
pub mod filter;
pub mod http_client;
pub mod logger;
pub mod sources;

/// Environment variable naming the directory that holds `levelgate.yaml`.
pub const CONFIG_DIR_ENV: &str = "LEVELGATE_CONFIG_DIR";
