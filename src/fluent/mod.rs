//! FluentRouter and middleware configuration.
//!
//! - [`router`] - Core `FluentRouter` struct and initialization
//! - [`observability`] - Request logging
//! - [`request`] - Request ID
//! - [`features`] - Timeout, health probes and the payment endpoint
//! - [`control`] - Admission and panic catching
//! - [`builder`] - Orchestration (setup_middleware, start, router delegation)

mod builder;
mod control;
mod features;
mod observability;
mod request;
mod router;

pub use router::FluentRouter;

#[cfg(test)]
mod tests;
