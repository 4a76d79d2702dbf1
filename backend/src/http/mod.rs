//! HTTP server module for the STAMP backend.
//!
//! This module provides an axum-based HTTP server that exposes cube assembly
//! as an asynchronous job API: upload an archive, poll or stream progress,
//! then fetch the assembled cube.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  HTTP Layer (axum handlers)                               │
//! │  - Query parsing into job options                         │
//! │  - JSON / SSE responses                                   │
//! │  - CORS, compression, error handling                      │
//! └───────────────────┬──────────────────────────────────────┘
//!                     │
//! ┌───────────────────▼──────────────────────────────────────┐
//! │  Job Runner (services/job_runner.rs)                      │
//! │  - Job store, cancellation, stall watchdog                │
//! │  - Result cache                                           │
//! └───────────────────┬──────────────────────────────────────┘
//!                     │
//! ┌───────────────────▼──────────────────────────────────────┐
//! │  Pipeline (services/pipeline.rs)                          │
//! │  - Scan, read, regrid, assemble, reduce                   │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use router::create_router;
pub use state::AppState;
