//! Template-group engine: grouping scans by which reference template
//! ("logo") they match.
//!
//! Templates are loaded and their features extracted once. Candidates are
//! walked in order; the first template at or above the match threshold
//! wins, in template list order, not by maximum score. An open group
//! absorbs non-matching pages between two matching ones (blank sheets,
//! illustrations), and candidates before the first match are dropped.
//!
//! This mode keeps no ledger: each run reprocesses the full input set.

use std::collections::HashMap;
use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::config::Config;
use crate::discovery::{list_images, load_image};
use crate::error::Result;
use crate::fsops;
use crate::logging::log_file_error;
use crate::ordering::natural_order;
use crate::scoring::SimilarityScorer;

/// Counters for one engine run
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateReport {
    /// Candidates copied into a group folder
    pub grouped: usize,

    /// Candidates before the first recognizable match, not copied anywhere
    pub dropped: usize,

    /// Candidates skipped for per-candidate errors
    pub skipped: usize,

    /// Group folders opened
    pub groups_opened: usize,

    /// Templates whose features were successfully extracted
    pub templates_loaded: usize,
}

struct Template<F> {
    name: String,
    stem: String,
    features: F,
}

struct OpenGroup {
    template: String,
    dir: PathBuf,
}

/// Template-anchor grouping engine
pub struct TemplateGroupEngine<'a, S: SimilarityScorer> {
    scorer: &'a S,
    input_dir: PathBuf,
    output_dir: PathBuf,
    templates_dir: PathBuf,
    match_threshold: f64,
}

impl<'a, S: SimilarityScorer> TemplateGroupEngine<'a, S> {
    pub fn new(
        scorer: &'a S,
        config: &Config,
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        templates_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            scorer,
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            templates_dir: templates_dir.into(),
            match_threshold: config.match_threshold,
        }
    }

    /// Group the whole input set against the template set
    pub fn run(&self) -> Result<TemplateReport> {
        fsops::ensure_dir(&self.output_dir)?;

        let mut report = TemplateReport::default();
        let templates = self.load_templates(&mut report)?;
        if templates.is_empty() {
            warn!(
                "No readable templates in {}; nothing to group",
                self.templates_dir.display()
            );
            return Ok(report);
        }

        let candidates = natural_order(list_images(&self.input_dir)?);
        info!(
            "Grouping {} images against {} templates",
            candidates.len(),
            templates.len()
        );

        let progress = ProgressBar::new(candidates.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("[{eta}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
                .unwrap()
                .progress_chars("##-"),
        );

        let mut current: Option<OpenGroup> = None;
        let mut counters: HashMap<String, u32> = HashMap::new();

        for name in candidates {
            progress.set_message(name.clone());
            self.process_candidate(&name, &templates, &mut current, &mut counters, &mut report)?;
            progress.inc(1);
        }

        progress.finish_with_message(format!(
            "{} grouped, {} dropped, {} skipped",
            report.grouped, report.dropped, report.skipped
        ));
        info!(
            "Run complete: {} grouped into {} groups, {} dropped, {} skipped",
            report.grouped, report.groups_opened, report.dropped, report.skipped
        );
        Ok(report)
    }

    /// Load templates in sorted name order and extract features once per
    /// template. Unreadable templates are excluded, not fatal.
    fn load_templates(&self, report: &mut TemplateReport) -> Result<Vec<Template<S::Features>>> {
        let mut names = list_images(&self.templates_dir)?;
        names.sort();

        let mut templates = Vec::new();
        for name in names {
            let path = self.templates_dir.join(&name);
            let image = match load_image(&path) {
                Ok(image) => image,
                Err(e) => {
                    error!("Excluding template {}: {}", name, e);
                    continue;
                }
            };
            let features = match self.scorer.extract(&image) {
                Ok(features) => features,
                Err(e) => {
                    error!("Excluding template {}: feature extraction failed: {}", name, e);
                    continue;
                }
            };
            let stem = std::path::Path::new(&name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&name)
                .to_string();
            debug!("Loaded template {}", name);
            templates.push(Template {
                name,
                stem,
                features,
            });
        }

        report.templates_loaded = templates.len();
        Ok(templates)
    }

    fn process_candidate(
        &self,
        name: &str,
        templates: &[Template<S::Features>],
        current: &mut Option<OpenGroup>,
        counters: &mut HashMap<String, u32>,
        report: &mut TemplateReport,
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

        // First template at or above the threshold wins, in list order
        let matched = templates.iter().find(|template| {
            self.scorer.compare(&template.features, &features) >= self.match_threshold
        });

        match matched {
            Some(template) => {
                let same_group = current
                    .as_ref()
                    .map(|group| group.template == template.name)
                    .unwrap_or(false);
                if !same_group {
                    let counter = counters.entry(template.name.clone()).or_insert(0);
                    *counter += 1;
                    let dir = self.output_dir.join(format!("{}_{}", template.stem, counter));
                    fsops::ensure_dir(&dir)?;
                    info!("Opened group {} for template {}", dir.display(), template.name);
                    *current = Some(OpenGroup {
                        template: template.name.clone(),
                        dir,
                    });
                    report.groups_opened += 1;
                }
            }
            None => {
                if current.is_none() {
                    // Precedes the first recognizable template match
                    debug!("Dropping {}: no open group and no template match", name);
                    report.dropped += 1;
                    return Ok(());
                }
                debug!("{} continues the open group", name);
            }
        }

        // Either the (possibly new) matched group or the continuation of
        // the open one
        if let Some(group) = current.as_ref() {
            if let Err(e) = fsops::copy_into(&src, &group.dir) {
                log_file_error(&src, "copy", &e);
                report.skipped += 1;
                return Ok(());
            }
            report.grouped += 1;
        }
        Ok(())
    }
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
        config.match_threshold = 0.75;
        config
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        input: PathBuf,
        output: PathBuf,
        logos: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input");
        let output = dir.path().join("output");
        let logos = dir.path().join("logos");
        fs::create_dir(&input).unwrap();
        fs::create_dir(&logos).unwrap();
        Fixture {
            _dir: dir,
            input,
            output,
            logos,
        }
    }

    #[test]
    fn test_open_group_absorbs_non_matching_pages() {
        let f = fixture();
        write_shade_png(&f.logos, "logoX.png", 100);
        write_shade_png(&f.input, "p1.png", 10);
        write_shade_png(&f.input, "p2.png", 20);
        write_shade_png(&f.input, "p3.png", 30);
        // p1 and p3 match logoX; p2 matches nothing
        let scorer = StubScorer::new(&[(100, 10, 0.8), (100, 30, 0.9)]);

        let engine =
            TemplateGroupEngine::new(&scorer, &test_config(), &f.input, &f.output, &f.logos);
        let report = engine.run().unwrap();

        assert_eq!(report.grouped, 3);
        assert_eq!(report.groups_opened, 1);
        assert_eq!(report.dropped, 0);

        // Same template still open: one group, not logoX_2
        let group = f.output.join("logoX_1");
        assert!(group.join("p1.png").exists());
        assert!(group.join("p2.png").exists());
        assert!(group.join("p3.png").exists());
        assert!(!f.output.join("logoX_2").exists());
    }

    #[test]
    fn test_match_threshold_boundary_is_a_match() {
        let f = fixture();
        write_shade_png(&f.logos, "logoX.png", 100);
        write_shade_png(&f.input, "p1.png", 10);
        // Exactly at the threshold: >= required
        let scorer = StubScorer::new(&[(100, 10, 0.75)]);

        let engine =
            TemplateGroupEngine::new(&scorer, &test_config(), &f.input, &f.output, &f.logos);
        let report = engine.run().unwrap();

        assert_eq!(report.grouped, 1);
        assert!(f.output.join("logoX_1").join("p1.png").exists());
    }

    #[test]
    fn test_candidates_before_first_match_are_dropped() {
        let f = fixture();
        write_shade_png(&f.logos, "logoX.png", 100);
        write_shade_png(&f.input, "p1.png", 10);
        write_shade_png(&f.input, "p2.png", 20);
        let scorer = StubScorer::new(&[(100, 20, 0.9)]);

        let engine =
            TemplateGroupEngine::new(&scorer, &test_config(), &f.input, &f.output, &f.logos);
        let report = engine.run().unwrap();

        assert_eq!(report.dropped, 1);
        assert_eq!(report.grouped, 1);
        assert!(!f.output.join("logoX_1").join("p1.png").exists());
    }

    #[test]
    fn test_template_reappearance_opens_numbered_group() {
        let f = fixture();
        write_shade_png(&f.logos, "logoX.png", 100);
        write_shade_png(&f.logos, "logoY.png", 110);
        write_shade_png(&f.input, "p1.png", 10);
        write_shade_png(&f.input, "p2.png", 20);
        write_shade_png(&f.input, "p3.png", 30);
        let scorer = StubScorer::new(&[(100, 10, 0.9), (110, 20, 0.9), (100, 30, 0.9)]);

        let engine =
            TemplateGroupEngine::new(&scorer, &test_config(), &f.input, &f.output, &f.logos);
        let report = engine.run().unwrap();

        assert_eq!(report.groups_opened, 3);
        assert!(f.output.join("logoX_1").join("p1.png").exists());
        assert!(f.output.join("logoY_1").join("p2.png").exists());
        assert!(f.output.join("logoX_2").join("p3.png").exists());
    }

    #[test]
    fn test_first_match_wins_over_best_match() {
        let f = fixture();
        // Template list order is sorted: logoA before logoB
        write_shade_png(&f.logos, "logoA.png", 100);
        write_shade_png(&f.logos, "logoB.png", 110);
        write_shade_png(&f.input, "p1.png", 10);
        // Both match; logoB scores higher but logoA is first
        let scorer = StubScorer::new(&[(100, 10, 0.8), (110, 10, 0.99)]);

        let engine =
            TemplateGroupEngine::new(&scorer, &test_config(), &f.input, &f.output, &f.logos);
        engine.run().unwrap();

        assert!(f.output.join("logoA_1").join("p1.png").exists());
        assert!(!f.output.join("logoB_1").exists());
    }

    #[test]
    fn test_unreadable_template_is_excluded() {
        let f = fixture();
        fs::write(f.logos.join("broken.png"), b"NOT A PNG").unwrap();
        write_shade_png(&f.logos, "logoX.png", 100);
        write_shade_png(&f.input, "p1.png", 10);
        let scorer = StubScorer::new(&[(100, 10, 0.9)]);

        let engine =
            TemplateGroupEngine::new(&scorer, &test_config(), &f.input, &f.output, &f.logos);
        let report = engine.run().unwrap();

        assert_eq!(report.templates_loaded, 1);
        assert_eq!(report.grouped, 1);
    }

    #[test]
    fn test_no_readable_templates_groups_nothing() {
        let f = fixture();
        fs::write(f.logos.join("broken.png"), b"NOT A PNG").unwrap();
        write_shade_png(&f.input, "p1.png", 10);
        let scorer = StubScorer::new(&[]);

        let engine =
            TemplateGroupEngine::new(&scorer, &test_config(), &f.input, &f.output, &f.logos);
        let report = engine.run().unwrap();

        assert_eq!(report.templates_loaded, 0);
        assert_eq!(report.grouped, 0);
    }

    #[test]
    fn test_missing_logos_directory_is_fatal() {
        let f = fixture();
        write_shade_png(&f.input, "p1.png", 10);
        let scorer = StubScorer::new(&[]);

        let engine = TemplateGroupEngine::new(
            &scorer,
            &test_config(),
            &f.input,
            &f.output,
            f.logos.join("missing"),
        );
        assert!(matches!(
            engine.run(),
            Err(crate::error::Error::FileNotFound(_))
        ));
    }

    #[test]
    fn test_reruns_reprocess_the_full_input() {
        let f = fixture();
        write_shade_png(&f.logos, "logoX.png", 100);
        write_shade_png(&f.input, "p1.png", 10);
        let scorer = StubScorer::new(&[(100, 10, 0.9)]);

        let engine =
            TemplateGroupEngine::new(&scorer, &test_config(), &f.input, &f.output, &f.logos);
        let first = engine.run().unwrap();
        let second = engine.run().unwrap();

        // No ledger in this mode: the second run does the same work
        assert_eq!(first.grouped, second.grouped);
        assert!(f.output.join("logoX_1").join("p1.png").exists());
    }
}
