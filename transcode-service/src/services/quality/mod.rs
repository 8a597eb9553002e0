//! Quality analysis and encoding optimization

pub mod complexity;
pub mod optimizer;

pub use complexity::ComplexityAnalyzer;
pub use optimizer::{EncodingOptimizer, OptimizerOptions};
