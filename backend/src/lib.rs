//! # STAMP Rust Backend
//!
//! Spectral time-series assembly engine.
//!
//! The crate turns an archive of spectroscopic time-series files into one
//! wavelength × time data cube: it scans and reads the archive, puts every
//! integration on a shared wavelength grid, orders them in time, splits the
//! result into visits, and reduces it for display. Jobs run in the background
//! and are polled over an HTTP API.
//!
//! ## Architecture
//!
//! The crate is organized into several logical modules:
//!
//! - [`io`]: Archive scanning and the FITS / HDF5 format readers
//! - [`models`]: Integrations, source files and the assembled cube
//! - [`services`]: Pipeline stages, job tracking and the background runner
//! - [`api`]: Data Transfer Objects (DTOs) for job options and results
//! - [`config`]: TOML and environment configuration
//! - [`http`]: Axum-based HTTP server and request handlers
//!

// PipelineError carries an ErrorContext on every variant
#![allow(clippy::result_large_err)]

pub mod api;
pub mod config;
pub mod error;
pub mod io;
pub mod models;
pub mod services;

#[cfg(feature = "http-server")]
pub mod http;

pub use error::{ErrorKind, PipelineError, PipelineResult};
