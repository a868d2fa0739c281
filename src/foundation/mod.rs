//! Core value types and the error model.

pub mod core;
pub mod error;
