//! Similarity scoring seam.
//!
//! The grouping engines only depend on the [`SimilarityScorer`] trait:
//! `extract` returns a feature value that the *caller* owns and threads
//! through comparisons, so there is no hidden "last features" state inside
//! the scorer and cached-anchor comparison is exactly `extract` + `compare`.
//!
//! [`GridScorer`] is the bundled default: grid-cell descriptors, two
//! nearest-neighbour matching with a ratio test, and translation-offset
//! geometric verification. The score is the fraction of ratio-test
//! survivors consistent with the dominant translation, or 0.0 when too few
//! survivors exist.

use std::collections::HashMap;

use image::{imageops::FilterType, DynamicImage, GrayImage};

use crate::config::{Config, ExtractorKind, MatcherKind};
use crate::error::Result;

/// Minimum number of ratio-test survivors required before a score is
/// meaningful; at or below this the score is 0.0
pub const MIN_GOOD_MATCHES: usize = 10;

const GRID: u32 = 256;
const CELL: u32 = 16;
const CELLS: u32 = GRID / CELL;
const CONTRAST_FLOOR: f32 = 4.0;
const OFFSET_BIN: f32 = 8.0;
const FLANN_RADIUS: f32 = 96.0;

/// Computes similarity scores in `[0, 1]` between two images
pub trait SimilarityScorer {
    type Features;

    /// Extract a reusable feature value from a decoded image
    fn extract(&self, image: &DynamicImage) -> Result<Self::Features>;

    /// Compare two feature values; 1.0 means fully consistent
    fn compare(&self, a: &Self::Features, b: &Self::Features) -> f64;
}

/// Keypoints and descriptors extracted from one image
#[derive(Debug, Clone)]
pub struct FeatureSet {
    keypoints: Vec<(f32, f32)>,
    descriptors: Vec<Vec<f32>>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Bundled similarity scorer.
///
/// The image is normalized to a fixed grayscale grid and each cell above a
/// contrast floor yields one keypoint (the cell centre) and one descriptor.
/// The extractor kind selects the descriptor flavour, the matcher kind the
/// search strategy.
pub struct GridScorer {
    extractor: ExtractorKind,
    matcher: MatcherKind,
    ratio: f32,
}

impl GridScorer {
    pub fn new(extractor: ExtractorKind, matcher: MatcherKind) -> Self {
        Self {
            extractor,
            matcher,
            ratio: 0.75,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.feature_extractor, config.matcher)
    }

    fn cell_descriptor(&self, gray: &GrayImage, x0: u32, y0: u32) -> Vec<f32> {
        match self.extractor {
            ExtractorKind::Sift => gradient_histogram(gray, x0, y0, false),
            ExtractorKind::Kaze => gradient_histogram(gray, x0, y0, true),
            ExtractorKind::Orb => binary_pattern(gray, x0, y0),
        }
    }
}

impl SimilarityScorer for GridScorer {
    type Features = FeatureSet;

    fn extract(&self, image: &DynamicImage) -> Result<FeatureSet> {
        let gray = image
            .resize_exact(GRID, GRID, FilterType::Triangle)
            .to_luma8();

        let mut keypoints = Vec::new();
        let mut descriptors = Vec::new();

        for cy in 0..CELLS {
            for cx in 0..CELLS {
                let x0 = cx * CELL;
                let y0 = cy * CELL;
                // Flat cells (blank paper, margins) carry no signal
                if cell_contrast(&gray, x0, y0) < CONTRAST_FLOOR {
                    continue;
                }
                keypoints.push((
                    x0 as f32 + CELL as f32 / 2.0,
                    y0 as f32 + CELL as f32 / 2.0,
                ));
                descriptors.push(self.cell_descriptor(&gray, x0, y0));
            }
        }

        Ok(FeatureSet {
            keypoints,
            descriptors,
        })
    }

    fn compare(&self, a: &FeatureSet, b: &FeatureSet) -> f64 {
        if a.len() < 2 || b.len() < 2 {
            return 0.0;
        }

        // Ratio-test matching: keep a correspondence only when its best
        // match is clearly better than the runner-up
        let mut offsets: Vec<(f32, f32)> = Vec::new();
        let all: Vec<usize> = (0..b.len()).collect();

        for (i, desc) in a.descriptors.iter().enumerate() {
            let near: Vec<usize>;
            let candidates: &[usize] = match self.matcher {
                MatcherKind::BruteForce => &all,
                MatcherKind::Flann => {
                    near = (0..b.len())
                        .filter(|&j| {
                            keypoint_dist2(a.keypoints[i], b.keypoints[j])
                                <= FLANN_RADIUS * FLANN_RADIUS
                        })
                        .collect();
                    if near.len() < 2 {
                        &all
                    } else {
                        &near
                    }
                }
            };

            let mut best = f32::MAX;
            let mut second = f32::MAX;
            let mut best_j = 0;
            for &j in candidates {
                let d = l2_distance(desc, &b.descriptors[j]);
                if d < best {
                    second = best;
                    best = d;
                    best_j = j;
                } else if d < second {
                    second = d;
                }
            }

            if second > 0.0 && best < self.ratio * second {
                offsets.push((
                    b.keypoints[best_j].0 - a.keypoints[i].0,
                    b.keypoints[best_j].1 - a.keypoints[i].1,
                ));
            }
        }

        if offsets.len() <= MIN_GOOD_MATCHES {
            return 0.0;
        }

        // Geometric verification: near-duplicate scans differ by roughly a
        // single translation, so the modal offset bin and its neighbours
        // define the inlier set
        let mut bins: HashMap<(i32, i32), usize> = HashMap::new();
        for &(dx, dy) in &offsets {
            *bins.entry(offset_bin(dx, dy)).or_insert(0) += 1;
        }
        let mut ranked: Vec<((i32, i32), usize)> = bins.into_iter().collect();
        ranked.sort_by(|x, y| y.1.cmp(&x.1).then(x.0.cmp(&y.0)));
        let modal = ranked[0].0;

        let inliers = offsets
            .iter()
            .filter(|&&(dx, dy)| {
                let (bx, by) = offset_bin(dx, dy);
                (bx - modal.0).abs() <= 1 && (by - modal.1).abs() <= 1
            })
            .count();

        inliers as f64 / offsets.len() as f64
    }
}

fn offset_bin(dx: f32, dy: f32) -> (i32, i32) {
    (
        (dx / OFFSET_BIN).round() as i32,
        (dy / OFFSET_BIN).round() as i32,
    )
}

fn keypoint_dist2(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    dx * dx + dy * dy
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn cell_contrast(gray: &GrayImage, x0: u32, y0: u32) -> f32 {
    let n = (CELL * CELL) as f32;
    let mut sum = 0.0f32;
    let mut sum_sq = 0.0f32;
    for y in y0..y0 + CELL {
        for x in x0..x0 + CELL {
            let v = gray.get_pixel(x, y).0[0] as f32;
            sum += v;
            sum_sq += v * v;
        }
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0).sqrt()
}

/// Eight-bin gradient orientation histogram over the cell, L2-normalized.
/// With `smoothed` the gradients are taken on a 3x3 box-filtered signal.
fn gradient_histogram(gray: &GrayImage, x0: u32, y0: u32, smoothed: bool) -> Vec<f32> {
    let sample = |x: u32, y: u32| -> f32 {
        if smoothed {
            let mut sum = 0.0f32;
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let sx = (x as i32 + dx).clamp(0, GRID as i32 - 1) as u32;
                    let sy = (y as i32 + dy).clamp(0, GRID as i32 - 1) as u32;
                    sum += gray.get_pixel(sx, sy).0[0] as f32;
                }
            }
            sum / 9.0
        } else {
            gray.get_pixel(x, y).0[0] as f32
        }
    };

    let mut hist = vec![0.0f32; 8];
    for y in y0.max(1)..(y0 + CELL).min(GRID - 1) {
        for x in x0.max(1)..(x0 + CELL).min(GRID - 1) {
            let gx = sample(x + 1, y) - sample(x - 1, y);
            let gy = sample(x, y + 1) - sample(x, y - 1);
            let magnitude = (gx * gx + gy * gy).sqrt();
            if magnitude == 0.0 {
                continue;
            }
            let angle = gy.atan2(gx);
            let bin = (((angle + std::f32::consts::PI) / (2.0 * std::f32::consts::PI)) * 8.0)
                .floor()
                .clamp(0.0, 7.0) as usize;
            hist[bin] += magnitude;
        }
    }

    let norm = hist.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut hist {
            *v /= norm;
        }
    }
    hist
}

/// Thirty-two binary intensity comparisons between a fixed pseudo-random
/// pixel-pair pattern within the cell
fn binary_pattern(gray: &GrayImage, x0: u32, y0: u32) -> Vec<f32> {
    let mut state: u32 = 0x9E3779B9;
    let mut next = || {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        (state >> 24) % CELL
    };

    let mut desc = Vec::with_capacity(32);
    for _ in 0..32 {
        let (ax, ay, bx, by) = (next(), next(), next(), next());
        let a = gray.get_pixel(x0 + ax, y0 + ay).0[0];
        let b = gray.get_pixel(x0 + bx, y0 + by).0[0];
        desc.push(if a < b { 1.0 } else { 0.0 });
    }
    desc
}

// -- Tests --
