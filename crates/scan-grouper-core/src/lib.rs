//! A library for grouping scanned document images.
//!
//! Two engines share a feature-matching similarity seam:
//!
//! - [`series::DuplicateSeriesEngine`] folds consecutive rescans of the
//!   same page into per-anchor series folders, journaling every decision
//!   to a SQLite ledger so an interrupted run resumes where it stopped.
//! - [`templates::TemplateGroupEngine`] splits a scan stream into groups
//!   by which reference template (letterhead, logo) each page matches.
//!
//! Both engines consume images in natural order, so `img2.png` sorts
//! before `img10.png` the way a human reads a scanner's output.

mod error;

pub mod config;
pub mod discovery;
pub mod fsops;
pub mod logging;
pub mod ordering;
pub mod persistence;
pub mod quality;
pub mod scoring;
pub mod series;
pub mod templates;
pub mod types;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use error::{Error, Result};
pub use persistence::{Ledger, ProcessedImage};
pub use scoring::{GridScorer, SimilarityScorer};
pub use series::{DuplicateSeriesEngine, SeriesReport};
pub use templates::{TemplateGroupEngine, TemplateReport};
pub use types::ImageFormat;
