//! Core pipeline orchestration and domain logic for Postforge.
//!
//! This crate ties the generation backend, capability tools, call pacing and
//! output extraction into the article workflow exposed by [`ArticleService`].

pub mod extract;
pub mod formatter;
pub mod pipeline;
pub mod rate;
pub mod service;
pub mod stages;

pub use pipeline::{Pipeline, PipelineOptions, ProgressReporter, SilentProgress};
pub use rate::{RateController, RatePolicy, RateState};
pub use service::ArticleService;
