// src/extractors/mod.rs
pub mod candidate;
pub mod heuristics;
pub mod inference;
pub mod report;
pub mod units;

// Re-export key extraction types for convenience
pub use candidate::DocumentType;
pub use inference::{HttpInference, InferenceCapability};
pub use report::CandidateExtractor;
