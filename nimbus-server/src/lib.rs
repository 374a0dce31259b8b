//! Nimbus service: HTTP API layer and startup wiring
//!
//! The execution core consumes the API surface only through the
//! `ApiLayer` trait; everything HTTP-shaped lives here.

pub mod api;
pub mod logging;
pub mod startup;

pub use api::HttpApi;
pub use logging::init_logging;
pub use startup::{shutdown_signal, Service};
