//! # otalink Common
//!
//! Shared utilities for the otalink agent components.
//!
//! ## Logging
//!
//! ```rust,no_run
//! use otalink_common::{init_logging, LogFormat};
//!
//! // Pretty output for a development shell
//! init_logging("info").unwrap();
//!
//! // Or pick the format from configuration
//! # fn configured() -> anyhow::Result<()> {
//! otalink_common::init_logging_with_format(LogFormat::Json, "debug")?;
//! # Ok(())
//! # }
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json, init_logging_with_format, LogFormat};
