//! # Larder Remote
//!
//! Clients for the network-only side of a Larder installation.
//!
//! This crate provides:
//! - The [`RemoteClient`] contract: authenticate, read a collection, append,
//!   positional update, delete, batched update and a reachability probe
//! - [`RemoteError`] with the four kinds the sync coordinator reacts to
//! - [`MemoryRemote`], a complete in-process remote for tests and demos
//! - [`SheetsRemote`], a spreadsheet values API client over an abstract
//!   [`HttpClient`]
//!
//! ## Boundaries
//!
//! HTTP statuses, cell ranges and transport errors stay inside this crate.
//! Callers only ever see records, remote ids, versions and `RemoteErrorKind`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod a1;
mod client;
mod error;
mod http;
mod memory;
mod probe;
mod sheets;
mod token;

pub use client::{BatchOutcome, RemoteClient, RemoteRecord, RemoteWrite, RowUpdate};
pub use error::{RemoteError, RemoteErrorKind, RemoteResult};
pub use http::{HttpClient, HttpFailure, HttpRequest, HttpResponse, Method};
pub use memory::MemoryRemote;
pub use probe::probe_tcp;
pub use sheets::{row_version, status_error, SheetsConfig, SheetsRemote};
pub use token::{EnvToken, StaticToken, TokenSource};
