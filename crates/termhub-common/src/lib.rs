//! Termhub Common Library
//!
//! Shared types, utilities, and error handling for the termhub workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Custom error type and result alias
//! - **Logging**: `tracing` subscriber setup shared by all binaries
//! - **Checksums**: Field-framed content hashing used for job keys
//! - **Types**: The concept/row data model written to aggregated term lists
//!
//! # Example
//!
//! ```no_run
//! use termhub_common::types::{Concept, OutputSchema};
//!
//! let mut concept = Concept::new("D001", "Calcimycin", "chemical", "MeSH");
//! concept.add_term("A-23187");
//!
//! let mut out = Vec::new();
//! OutputSchema::Cui.write_header(&mut out).unwrap();
//! for row in concept.rows() {
//!     row.write_tsv(&mut out).unwrap();
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, TermhubError};
