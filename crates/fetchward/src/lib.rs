//! Public facade crate for `fetchward`.
//!
//! This crate intentionally contains no IO logic of its own. It re-exports
//! the backend-agnostic types/traits from `fetchward-core`.

pub use fetchward_core::*;
