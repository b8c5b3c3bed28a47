//! Reference extraction from free text
//!
//! [`tokens`] finds candidate tokens; [`resolver`] decides which of them
//! name real insights or metrics.

pub mod resolver;
pub mod tokens;

pub use resolver::{
    ReferenceResolver, Resolution, ResolutionMode, ResolvedReference, ResolverConfig, TargetKind,
    INSIGHT_PREFIXES, METRIC_PREFIXES, METRIC_TRIGGERS,
};
pub use tokens::{CurlyToken, TokenScanner};
