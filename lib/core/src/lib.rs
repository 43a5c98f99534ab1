//! Core domain types and utilities for the SVA platform.
//!
//! This crate provides the foundational strongly-typed identifiers shared
//! by the SVA web application crates.

pub mod id;

pub use id::SessionId;
