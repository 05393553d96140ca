//! Core domain types
//!
//! These types describe what a build is (`BuildScript`, `Repo`,
//! `BuildRequest`) and what it produces (`BuildState`, `BuildReport`).
//! They are shared between the engine (which executes builds) and the
//! collaborators that submit them and persist their results.

pub mod build;
pub mod image;
pub mod repo;
pub mod request;

pub use build::{BuildReport, BuildScript, BuildState, BuildStatus, CommandWriter};
pub use image::ImageSpec;
pub use repo::Repo;
pub use request::BuildRequest;
