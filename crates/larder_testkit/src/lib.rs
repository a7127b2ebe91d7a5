//! # Larder Testkit
//!
//! Test utilities for Larder.
//!
//! This crate provides:
//! - The sample schema (products, customers, orders) and record builders
//! - In-memory and temp-file stores driven by a manual clock
//! - Remote wrappers that block or intercept data calls at exact points
//!
//! ## Usage
//!
//! ```rust,ignore
//! use larder_testkit::prelude::*;
//!
//! let store = TestStore::memory();
//! let products = store.table("products");
//! store.insert(products, &product(1, "tea"))?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod remotes;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::remotes::*;
}

pub use fixtures::*;
pub use remotes::*;
