//! Keel Core
//!
//! Core types for the Keel build executor.
//!
//! This crate contains the domain types shared by the engine and its
//! front ends: build definitions, repository descriptors, build requests
//! and the terminal records a build produces.

pub mod domain;
