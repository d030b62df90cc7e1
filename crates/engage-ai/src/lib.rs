//! Engagement candidate pipeline.
//!
//! Ingests customer x subject engagement opportunities, runs them through an
//! eligibility filter chain, scores the survivors with independently isolated
//! scoring models, and persists them conflict-safely for downstream delivery
//! channels to query.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
