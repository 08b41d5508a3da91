//! No-reference image quality scoring, used to pick a representative image
//! from a finalized duplicate run. Lower scores mean better quality, the
//! usual convention for no-reference metrics such as BRISQUE.

use image::DynamicImage;

/// Scores a single image; lower is better
pub trait QualityScorer {
    fn score(&self, image: &DynamicImage) -> f64;
}

/// Index of the best-quality image in the slice, by minimum score.
/// Returns `None` for an empty slice; earlier images win ties.
pub fn best_of<Q: QualityScorer>(scorer: &Q, images: &[DynamicImage]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, image) in images.iter().enumerate() {
        let score = scorer.score(image);
        match best {
            Some((_, current)) if score >= current => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// Sharpness-based quality scorer.
///
/// Uses Laplacian response variance: blurred rescans respond weakly, so the
/// score (a decreasing function of the variance) stays low for crisp
/// originals.
pub struct SharpnessScorer;

impl QualityScorer for SharpnessScorer {
    fn score(&self, image: &DynamicImage) -> f64 {
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();
        if width < 3 || height < 3 {
            return 1.0;
        }

        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut count = 0.0f64;
        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let center = gray.get_pixel(x, y).0[0] as f64;
                let lap = gray.get_pixel(x - 1, y).0[0] as f64
                    + gray.get_pixel(x + 1, y).0[0] as f64
                    + gray.get_pixel(x, y - 1).0[0] as f64
                    + gray.get_pixel(x, y + 1).0[0] as f64
                    - 4.0 * center;
                sum += lap;
                sum_sq += lap * lap;
                count += 1.0;
            }
        }

        let mean = sum / count;
        let variance = (sum_sq / count - mean * mean).max(0.0);
        1.0 / (1.0 + variance)
    }
}

// -- Tests --
