//! Duplicate-series engine: sequential-anchor grouping of an ordered scan
//! batch.
//!
//! Each candidate is compared against the most recently finalized image
//! (the anchor). A score strictly above the duplicate threshold continues
//! the anchor's run; anything else opens a new run. The engine is strictly
//! sequential because every decision depends on the previous candidate's
//! finalized state, and every finalized image is recorded in the ledger so
//! an interrupted run resumes where it stopped.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::Config;
use crate::discovery::{list_images, load_image};
use crate::error::{Error, Result};
use crate::fsops;
use crate::logging::log_file_error;
use crate::ordering::natural_order;
use crate::persistence::{Ledger, ProcessedImage};
use crate::scoring::SimilarityScorer;

/// Counters for one engine run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SeriesReport {
    /// Candidates finalized (appended to the ledger) this run
    pub finalized: usize,

    /// Finalized candidates classified as duplicates
    pub duplicates: usize,

    /// Series folders materialized this run
    pub new_series: usize,

    /// Candidates skipped for per-candidate errors; they stay candidates
    /// for the next run
    pub skipped: usize,
}

/// The comparison baseline: the ledger row most recently appended, with
/// its extracted features owned by the engine
struct Anchor<F> {
    id: i64,
    record: ProcessedImage,
    features: F,
}

/// Sequential-anchor grouping engine
pub struct DuplicateSeriesEngine<'a, S: SimilarityScorer> {
    scorer: &'a S,
    ledger: &'a Ledger,
    input_dir: PathBuf,
    output_dir: PathBuf,
    duplicate_threshold: f64,
    user: String,
}

impl<'a, S: SimilarityScorer> DuplicateSeriesEngine<'a, S> {
    pub fn new(
        scorer: &'a S,
        ledger: &'a Ledger,
        config: &Config,
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            scorer,
            ledger,
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            duplicate_threshold: config.duplicate_threshold,
            user: config.resolve_user(),
        }
    }

    /// Process every candidate not yet present in the ledger
    pub fn run(&self) -> Result<SeriesReport> {
        fsops::ensure_dir(&self.output_dir)?;

        let names = list_images(&self.input_dir)?;
        let ordered = natural_order(names);

        let existing = self.ledger.list_all()?;
        let finalized: HashSet<String> = existing.iter().map(|r| r.filename.clone()).collect();
        let last_record = existing.into_iter().last();

        let mut candidates = ordered
            .into_iter()
            .filter(|name| !finalized.contains(name))
            .collect::<Vec<_>>()
            .into_iter();
        info!(
            "{} candidates after excluding {} finalized images",
            candidates.len(),
            finalized.len()
        );

        let mut report = SeriesReport::default();

        let mut anchor = match last_record {
            Some(record) => self.recover_anchor(record)?,
            None => {
                let mut seeded = None;
                for name in candidates.by_ref() {
                    if let Some(anchor) = self.seed_anchor(&name, &mut report)? {
                        seeded = Some(anchor);
                        break;
                    }
                }
                match seeded {
                    Some(anchor) => anchor,
                    None => {
                        info!("No decodable candidates; nothing to do");
                        return Ok(report);
                    }
                }
            }
        };

        let remaining: Vec<String> = candidates.collect();
        let progress = ProgressBar::new(remaining.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("[{eta}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
                .unwrap()
                .progress_chars("##-"),
        );

        for name in remaining {
            progress.set_message(name.clone());
            self.process_candidate(&name, &mut anchor, &mut report)?;
            progress.inc(1);
        }

        progress.finish_with_message(format!(
            "{} finalized, {} duplicates, {} skipped",
            report.finalized, report.duplicates, report.skipped
        ));
        info!(
            "Run complete: {} finalized, {} duplicates, {} new series, {} skipped",
            report.finalized, report.duplicates, report.new_series, report.skipped
        );
        Ok(report)
    }

    /// Rebuild the anchor from the ledger's last row and its backing image
    fn recover_anchor(&self, record: ProcessedImage) -> Result<Anchor<S::Features>> {
        let id = record.id.ok_or_else(|| Error::InconsistentState {
            record_id: 0,
            detail: "ledger returned a record without an id".to_string(),
        })?;
        let image = load_image(&record.file_path())?;
        let features = self.scorer.extract(&image)?;
        info!(
            "Resuming with anchor {} (duplicates={})",
            record.filename, record.duplicates
        );
        Ok(Anchor {
            id,
            record,
            features,
        })
    }

    /// Finalize the first candidate of an empty ledger as an anchor,
    /// without comparison. Returns `None` when the candidate has to be
    /// skipped for a per-candidate error.
    fn seed_anchor(
        &self,
        name: &str,
        report: &mut SeriesReport,
    ) -> Result<Option<Anchor<S::Features>>> {
        let src = self.input_dir.join(name);
        let image = match load_image(&src) {
            Ok(image) => image,
            Err(e) => {
                warn!("Skipping {}: {}", name, e);
                report.skipped += 1;
                return Ok(None);
            }
        };
        let features = match self.scorer.extract(&image) {
            Ok(features) => features,
            Err(e) => {
                warn!("Skipping {}: feature extraction failed: {}", name, e);
                report.skipped += 1;
                return Ok(None);
            }
        };
        if let Err(e) = fsops::copy_into(&src, &self.output_dir) {
            log_file_error(&src, "copy", &e);
            report.skipped += 1;
            return Ok(None);
        }

        let mut record = ProcessedImage::new(name, &self.output_dir, 0, name, self.user.as_str());
        let id = self.ledger.append(&record)?;
        record.id = Some(id);
        report.finalized += 1;
        info!("Seeded anchor {}", name);
        Ok(Some(Anchor {
            id,
            record,
            features,
        }))
    }

    fn process_candidate(
        &self,
        name: &str,
        anchor: &mut Anchor<S::Features>,
        report: &mut SeriesReport,
    ) -> Result<()> {
        let src = self.input_dir.join(name);
        let image = match load_image(&src) {
            Ok(image) => image,
            Err(e) => {
                warn!("Skipping {}: {}", name, e);
                report.skipped += 1;
                return Ok(());
            }
        };
        let features = match self.scorer.extract(&image) {
            Ok(features) => features,
            Err(e) => {
                warn!("Skipping {}: feature extraction failed: {}", name, e);
                report.skipped += 1;
                return Ok(());
            }
        };

        let score = self.scorer.compare(&anchor.features, &features);
        debug!(
            "compare({}, {}) = {:.3}",
            anchor.record.filename, name, score
        );
        // Side metrics for offline threshold tuning; never fatal
        if let Err(e) = self
            .ledger
            .record_score(name, &anchor.record.filename, score)
        {
            warn!("Failed to record comparison score for {}: {}", name, e);
        }

        if score > self.duplicate_threshold {
            self.finalize_duplicate(name, &src, features, anchor, report)
        } else {
            self.finalize_new_anchor(name, &src, features, anchor, report)
        }
    }

    /// The candidate continues the run opened by `anchor.main_double`
    fn finalize_duplicate(
        &self,
        name: &str,
        src: &Path,
        features: S::Features,
        anchor: &mut Anchor<S::Features>,
        report: &mut SeriesReport,
    ) -> Result<()> {
        let series_dir = if anchor.record.is_anchor() {
            let dir = self.output_dir.join(file_stem(&anchor.record.filename));
            // First duplicate for this anchor: materialize the series
            // folder and relocate the anchor into it. Folders are never
            // created for images that turn out to have no duplicates.
            if anchor.record.path != dir {
                if let Err(e) = fsops::ensure_dir(&dir) {
                    log_file_error(&dir, "mkdir", &e);
                    report.skipped += 1;
                    return Ok(());
                }
                let anchor_file = anchor.record.file_path();
                if let Err(e) = fsops::move_into(&anchor_file, &dir) {
                    log_file_error(&anchor_file, "move", &e);
                    report.skipped += 1;
                    return Ok(());
                }
                // The anchor's file is relocated; the ledger must follow or
                // the store no longer describes the disk
                match self.ledger.update_path(anchor.id, &dir) {
                    Ok(true) => {}
                    Ok(false) => {
                        return Err(Error::InconsistentState {
                            record_id: anchor.id,
                            detail: format!(
                                "anchor file moved to {} but no ledger row matched",
                                dir.display()
                            ),
                        })
                    }
                    Err(e) => {
                        return Err(Error::InconsistentState {
                            record_id: anchor.id,
                            detail: format!(
                                "anchor file moved to {} but ledger update failed: {}",
                                dir.display(),
                                e
                            ),
                        })
                    }
                }
                anchor.record.relocated_to(&dir);
                report.new_series += 1;
                info!(
                    "Opened series folder {} for {}",
                    dir.display(),
                    anchor.record.filename
                );
            }
            dir
        } else {
            anchor.record.path.clone()
        };

        if let Err(e) = fsops::copy_into(src, &series_dir) {
            log_file_error(src, "copy", &e);
            report.skipped += 1;
            return Ok(());
        }

        let mut record = ProcessedImage::new(
            name,
            &series_dir,
            anchor.record.duplicates + 1,
            anchor.record.main_double.as_str(),
            self.user.as_str(),
        );
        let id = self.ledger.append(&record)?;
        record.id = Some(id);

        report.finalized += 1;
        report.duplicates += 1;
        *anchor = Anchor {
            id,
            record,
            features,
        };
        Ok(())
    }

    /// The candidate closes the previous run and opens its own
    fn finalize_new_anchor(
        &self,
        name: &str,
        src: &Path,
        features: S::Features,
        anchor: &mut Anchor<S::Features>,
        report: &mut SeriesReport,
    ) -> Result<()> {
        if let Err(e) = fsops::copy_into(src, &self.output_dir) {
            log_file_error(src, "copy", &e);
            report.skipped += 1;
            return Ok(());
        }

        let mut record = ProcessedImage::new(name, &self.output_dir, 0, name, self.user.as_str());
        let id = self.ledger.append(&record)?;
        record.id = Some(id);

        report.finalized += 1;
        *anchor = Anchor {
            id,
            record,
            features,
        };
        Ok(())
    }
}

fn file_stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(filename)
}

// -- Tests --

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{write_shade_png, StubScorer};
    use std::fs;
    use tempfile::tempdir;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.duplicate_threshold = 0.7;
        config.user = Some("tester".to_string());
        config
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        input: PathBuf,
        output: PathBuf,
        ledger: Ledger,
        config: Config,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input");
        let output = dir.path().join("output");
        fs::create_dir(&input).unwrap();
        let ledger = Ledger::open(&dir.path().join("test.db")).unwrap();
        Fixture {
            _dir: dir,
            input,
            output,
            ledger,
            config: test_config(),
        }
    }

    #[test]
    fn test_new_series_scenario() {
        let f = fixture();
        write_shade_png(&f.input, "scan1.png", 10);
        write_shade_png(&f.input, "scan2.png", 20);
        write_shade_png(&f.input, "scan3.png", 30);
        let scorer = StubScorer::new(&[(10, 20, 0.9), (20, 30, 0.2)]);

        let engine = DuplicateSeriesEngine::new(&scorer, &f.ledger, &f.config, &f.input, &f.output);
        let report = engine.run().unwrap();

        assert_eq!(report.finalized, 3);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.new_series, 1);
        assert_eq!(report.skipped, 0);

        let rows = f.ledger.list_all().unwrap();
        assert_eq!(rows.len(), 3);

        let series_dir = f.output.join("scan1");
        assert_eq!(rows[0].filename, "scan1.png");
        assert_eq!(rows[0].duplicates, 0);
        assert_eq!(rows[0].main_double, "scan1.png");
        assert_eq!(rows[0].path, series_dir);

        assert_eq!(rows[1].filename, "scan2.png");
        assert_eq!(rows[1].duplicates, 1);
        assert_eq!(rows[1].main_double, "scan1.png");
        assert_eq!(rows[1].path, series_dir);

        assert_eq!(rows[2].filename, "scan3.png");
        assert_eq!(rows[2].duplicates, 0);
        assert_eq!(rows[2].main_double, "scan3.png");
        assert_eq!(rows[2].path, f.output);

        // The anchor was moved into the series folder, the duplicate copied
        assert!(series_dir.join("scan1.png").exists());
        assert!(series_dir.join("scan2.png").exists());
        assert!(!f.output.join("scan1.png").exists());
        assert!(f.output.join("scan3.png").exists());
    }

    #[test]
    fn test_no_series_folder_without_duplicates() {
        let f = fixture();
        write_shade_png(&f.input, "scan1.png", 10);
        write_shade_png(&f.input, "scan2.png", 20);
        let scorer = StubScorer::new(&[(10, 20, 0.1)]);

        let engine = DuplicateSeriesEngine::new(&scorer, &f.ledger, &f.config, &f.input, &f.output);
        let report = engine.run().unwrap();

        assert_eq!(report.finalized, 2);
        assert_eq!(report.new_series, 0);
        assert!(!f.output.join("scan1").exists());
        assert!(f.output.join("scan1.png").exists());
        assert!(f.output.join("scan2.png").exists());
    }

    #[test]
    fn test_threshold_boundary_is_not_a_duplicate() {
        let f = fixture();
        write_shade_png(&f.input, "scan1.png", 10);
        write_shade_png(&f.input, "scan2.png", 20);
        // Exactly at the threshold: strict > required
        let scorer = StubScorer::new(&[(10, 20, 0.7)]);

        let engine = DuplicateSeriesEngine::new(&scorer, &f.ledger, &f.config, &f.input, &f.output);
        engine.run().unwrap();

        let rows = f.ledger.list_all().unwrap();
        assert_eq!(rows[1].duplicates, 0);
        assert_eq!(rows[1].main_double, "scan2.png");
    }

    #[test]
    fn test_run_integrity_over_multiple_runs() {
        let f = fixture();
        for (i, shade) in [10u8, 20, 30, 40, 50].iter().enumerate() {
            write_shade_png(&f.input, &format!("scan{}.png", i + 1), *shade);
        }
        let scorer = StubScorer::new(&[
            (10, 20, 0.9),
            (20, 30, 0.9),
            (30, 40, 0.1),
            (40, 50, 0.9),
        ]);

        let engine = DuplicateSeriesEngine::new(&scorer, &f.ledger, &f.config, &f.input, &f.output);
        engine.run().unwrap();

        let rows = f.ledger.list_all().unwrap();
        let duplicates: Vec<i64> = rows.iter().map(|r| r.duplicates).collect();
        let mains: Vec<&str> = rows.iter().map(|r| r.main_double.as_str()).collect();
        assert_eq!(duplicates, vec![0, 1, 2, 0, 1]);
        assert_eq!(
            mains,
            vec!["scan1.png", "scan1.png", "scan1.png", "scan4.png", "scan4.png"]
        );

        // The whole first run lives in one series folder; the anchor moved once
        let series = f.output.join("scan1");
        assert!(series.join("scan1.png").exists());
        assert!(series.join("scan2.png").exists());
        assert!(series.join("scan3.png").exists());
    }

    #[test]
    fn test_idempotent_resume() {
        let f = fixture();
        write_shade_png(&f.input, "scan1.png", 10);
        write_shade_png(&f.input, "scan2.png", 20);
        write_shade_png(&f.input, "scan3.png", 30);
        let scorer = StubScorer::new(&[(10, 20, 0.9), (20, 30, 0.2)]);

        let engine = DuplicateSeriesEngine::new(&scorer, &f.ledger, &f.config, &f.input, &f.output);
        engine.run().unwrap();
        let before = f.ledger.list_all().unwrap();

        let report = engine.run().unwrap();
        assert_eq!(report.finalized, 0);
        assert_eq!(report.skipped, 0);

        let after = f.ledger.list_all().unwrap();
        assert_eq!(after.len(), before.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.path, b.path);
            assert_eq!(a.duplicates, b.duplicates);
        }
    }

    #[test]
    fn test_crash_resume_finalizes_only_the_remainder() {
        let f = fixture();
        write_shade_png(&f.input, "scan1.png", 10);
        write_shade_png(&f.input, "scan2.png", 20);
        let scorer = StubScorer::new(&[(10, 20, 0.9), (20, 30, 0.2)]);

        // First run sees only the first two candidates, then "crashes"
        let engine = DuplicateSeriesEngine::new(&scorer, &f.ledger, &f.config, &f.input, &f.output);
        engine.run().unwrap();
        assert_eq!(f.ledger.list_all().unwrap().len(), 2);

        // The third scan arrives; the restart must finalize exactly it
        write_shade_png(&f.input, "scan3.png", 30);
        let report = engine.run().unwrap();
        assert_eq!(report.finalized, 1);

        let rows = f.ledger.list_all().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].filename, "scan3.png");
        assert_eq!(rows[2].duplicates, 0);
    }

    #[test]
    fn test_undecodable_candidate_is_skipped_not_finalized() {
        let f = fixture();
        write_shade_png(&f.input, "scan1.png", 10);
        fs::write(f.input.join("scan2.png"), b"NOT A PNG").unwrap();
        write_shade_png(&f.input, "scan3.png", 30);
        let scorer = StubScorer::new(&[(10, 30, 0.9)]);

        let engine = DuplicateSeriesEngine::new(&scorer, &f.ledger, &f.config, &f.input, &f.output);
        let report = engine.run().unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.finalized, 2);

        // The unchanged anchor was compared against the next candidate
        let rows = f.ledger.list_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].filename, "scan3.png");
        assert_eq!(rows[1].duplicates, 1);
        assert_eq!(rows[1].main_double, "scan1.png");
    }

    #[test]
    fn test_comparison_scores_are_recorded() {
        let f = fixture();
        write_shade_png(&f.input, "scan1.png", 10);
        write_shade_png(&f.input, "scan2.png", 20);
        let scorer = StubScorer::new(&[(10, 20, 0.42)]);

        let engine = DuplicateSeriesEngine::new(&scorer, &f.ledger, &f.config, &f.input, &f.output);
        engine.run().unwrap();

        let scores = f.ledger.comparison_scores().unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].0, "scan2.png");
        assert_eq!(scores[0].1, "scan1.png");
        assert!((scores[0].2 - 0.42).abs() < 1e-9);
    }

    #[test]
    fn test_empty_input() {
        let f = fixture();
        let scorer = StubScorer::new(&[]);
        let engine = DuplicateSeriesEngine::new(&scorer, &f.ledger, &f.config, &f.input, &f.output);
        let report = engine.run().unwrap();
        assert_eq!(report.finalized, 0);
        assert!(f.ledger.list_all().unwrap().is_empty());
    }
}
