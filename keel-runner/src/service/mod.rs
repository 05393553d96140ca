//! Service layer
//!
//! Services turn build requests into finished builds and carry their
//! outcome to whoever submitted them.
//!
//! All services are trait-based so the worker pool can be tested without a
//! container runtime.

mod reporter;
mod runner;

// Re-export traits
pub use reporter::BuildReporter;
pub use runner::BuildRunner;

// Re-export implementations
pub use reporter::LogReporter;
pub use runner::StandardBuildRunner;
