//! Shared helpers for engine tests: deterministic image fixtures and a
//! scripted similarity scorer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, Luma};

use crate::error::Result;
use crate::scoring::SimilarityScorer;

/// Write a solid-color PNG whose every pixel carries `shade`, so a stub
/// scorer can identify the image from its decoded content alone.
pub fn write_shade_png(dir: &Path, name: &str, shade: u8) -> PathBuf {
    let path = dir.join(name);
    let img = GrayImage::from_pixel(8, 8, Luma([shade]));
    img.save(&path).unwrap();
    path
}

/// Similarity scorer scripted by a table of `(shade, shade) -> score`.
///
/// Features are the top-left luma byte of the image; unlisted pairs score
/// 0.0. Comparison is looked up symmetrically.
pub struct StubScorer {
    scores: HashMap<(u8, u8), f64>,
}

impl StubScorer {
    pub fn new(pairs: &[(u8, u8, f64)]) -> Self {
        let mut scores = HashMap::new();
        for &(a, b, score) in pairs {
            scores.insert((a, b), score);
            scores.insert((b, a), score);
        }
        Self { scores }
    }
}

impl SimilarityScorer for StubScorer {
    type Features = u8;

    fn extract(&self, image: &DynamicImage) -> Result<u8> {
        Ok(image.to_luma8().get_pixel(0, 0).0[0])
    }

    fn compare(&self, a: &u8, b: &u8) -> f64 {
        self.scores.get(&(*a, *b)).copied().unwrap_or(0.0)
    }
}
