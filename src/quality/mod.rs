//! Quality scoring, self-critique, and metrics logging (C16-C18): the
//! pipeline orchestrator's final pass over a generated answer before it's
//! handed back to the caller.

pub mod critique;
pub mod density;
pub mod metrics;

pub use critique::{self_critique, CritiqueResult};
pub use density::{analyze_density, analyze_naturalness, DensityReport, NaturalnessReport};
pub use metrics::{overall_score, AggregateReport, ComplexityBucketReport, QualityLogger, QualityRecord};
