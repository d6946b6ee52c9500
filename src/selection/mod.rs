// src/selection/mod.rs
pub mod engine;
pub mod ranking;

pub use engine::{SelectionAmbiguity, SelectionConfig, SelectionEngine, SelectionResult};
