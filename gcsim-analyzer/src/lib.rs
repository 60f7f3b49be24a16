//! Memory leak analysis
//!
//! Combines heap growth, old generation growth, GC efficiency and live object
//! stagnation into a suspicion score and verdict.

pub mod analyzer;
pub mod signals;

pub use analyzer::LeakAnalyzer;
pub use signals::{LeakSignals, determine_verdict, suspicion_score};
