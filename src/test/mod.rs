//! Builders for small programs and an interpreter for IR bodies.

pub mod interpreter;
