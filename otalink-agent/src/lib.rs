//! otalink agent library
//!
//! Over-the-air update orchestration for embedded and Android devices: the
//! update state machine in [`update`], its platform drivers in [`platform`],
//! and the daemon configuration in [`config`].

pub mod cli;
pub mod config;
pub mod error;
pub mod platform;
pub mod update;

pub use error::{OtaError, Result};
