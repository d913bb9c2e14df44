//! service-core: shared HTTP, configuration and observability plumbing.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
