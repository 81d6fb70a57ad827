//! HTTP front end for the skyingest pipeline.
//!
//! The binary in `main.rs` wires configuration, stores and the pipeline
//! worker into an [`AppState`] and serves [`api::create_router`].

pub mod api;
pub mod metrics;
pub mod state;

pub use api::create_router;
pub use state::AppState;
