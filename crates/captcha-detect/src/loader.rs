//! Rule set loading from TOML files.
//!
//! A rule set directory holds one `<challenge_type>.toml` per profile,
//! e.g. `character.toml`. Files in subdirectories are picked up too.

use crate::{
    error::{DetectError, Result},
    rules::RuleSet,
};
use captcha_core::ChallengeType;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Loader for rule sets stored as TOML files.
pub struct RuleSetLoader {
    /// Directory containing rule set files
    rule_set_dir: PathBuf,
}

impl RuleSetLoader {
    /// Create a loader for the given directory.
    ///
    /// # Errors
    /// Returns error if the directory doesn't exist.
    pub fn new(rule_set_dir: impl Into<PathBuf>) -> Result<Self> {
        let rule_set_dir = rule_set_dir.into();

        if !rule_set_dir.is_dir() {
            return Err(DetectError::DirectoryNotFound {
                path: rule_set_dir.display().to_string(),
            });
        }

        Ok(Self { rule_set_dir })
    }

    /// Load the rule set for one challenge type.
    ///
    /// # Errors
    /// Returns error if the file doesn't exist, can't be read, or is invalid.
    pub fn load(&self, challenge_type: ChallengeType) -> Result<RuleSet> {
        let filename = format!("{}.toml", challenge_type.as_str());
        let path = find_file(&self.rule_set_dir, &filename)?
            .ok_or(DetectError::NotFound(challenge_type))?;

        let rule_set = Self::load_from_path(&path)?;
        if rule_set.challenge_type != challenge_type {
            return Err(DetectError::InvalidRuleSet {
                challenge_type,
                reason: format!(
                    "{} declares challenge type {}",
                    path.display(),
                    rule_set.challenge_type
                ),
            });
        }
        rule_set.validate()?;

        debug!(
            challenge_type = %challenge_type,
            rules = rule_set.rules.len(),
            "loaded rule set"
        );

        Ok(rule_set)
    }

    /// Load every rule set in the directory.
    ///
    /// Invalid files are logged as warnings and skipped. Results are ordered
    /// by challenge type registration order.
    ///
    /// # Errors
    /// Returns error if the directory can't be read.
    pub fn load_all(&self) -> Result<Vec<RuleSet>> {
        let mut rule_sets = Vec::new();
        walk_and_load(&self.rule_set_dir, &mut rule_sets)?;

        rule_sets.sort_by_key(|set| {
            ChallengeType::ALL
                .iter()
                .position(|t| *t == set.challenge_type)
                .unwrap_or(usize::MAX)
        });
        rule_sets.dedup_by_key(|set| set.challenge_type);

        info!(
            count = rule_sets.len(),
            dir = %self.rule_set_dir.display(),
            "loaded rule sets"
        );

        Ok(rule_sets)
    }

    /// Parse a rule set from TOML text and validate it.
    pub fn parse(contents: &str, origin: &str) -> Result<RuleSet> {
        let rule_set: RuleSet = toml::from_str(contents).map_err(|e| DetectError::ParseError {
            path: origin.to_string(),
            source: e,
        })?;
        rule_set.validate()?;
        Ok(rule_set)
    }

    /// Load a rule set from a specific file path.
    fn load_from_path(path: &Path) -> Result<RuleSet> {
        let contents = std::fs::read_to_string(path).map_err(|e| DetectError::LoadError {
            path: path.display().to_string(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| DetectError::ParseError {
            path: path.display().to_string(),
            source: e,
        })
    }
}

fn walk_and_load(dir: &Path, rule_sets: &mut Vec<RuleSet>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if path.is_dir() {
            walk_and_load(&path, rule_sets)?;
        } else if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            match RuleSetLoader::load_from_path(&path) {
                Ok(rule_set) => {
                    if let Err(e) = rule_set.validate() {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "skipping invalid rule set"
                        );
                        continue;
                    }
                    rule_sets.push(rule_set);
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load rule set"
                    );
                }
            }
        }
    }

    Ok(())
}

fn find_file(dir: &Path, filename: &str) -> Result<Option<PathBuf>> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if path.is_dir() {
            if let Some(found) = find_file(&path, filename)? {
                return Ok(Some(found));
            }
        } else if path.file_name().and_then(|s| s.to_str()) == Some(filename) {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SLIDE: &str = r#"
challenge_type = "slide"
threshold = 0.5

[[rules]]
name = "keywords"
points = 60.0
kind = "keywords"
keywords = ["slider", "drag"]

[[rules]]
name = "refresh"
points = 40.0
kind = "nearby_refresh"
"#;

    fn setup() -> TempDir {
        let dir = TempDir::new().expect("create temp dir");
        fs::write(dir.path().join("slide.toml"), SLIDE).expect("write slide");

        let nested = dir.path().join("custom");
        fs::create_dir(&nested).expect("create nested dir");
        fs::write(
            nested.join("character.toml"),
            "challenge_type = \"character\"\nthreshold = 0.5\nrules = []\n",
        )
        .expect("write character");
        fs::write(nested.join("broken.toml"), "not = [valid").expect("write broken");
        dir
    }

    #[test]
    fn test_loader_missing_dir() {
        let result = RuleSetLoader::new("/nonexistent/rule-sets");
        assert!(matches!(result, Err(DetectError::DirectoryNotFound { .. })));
    }

    #[test]
    fn test_load_single() {
        let dir = setup();
        let loader = RuleSetLoader::new(dir.path()).expect("loader");

        let slide = loader.load(ChallengeType::Slide).expect("load slide");
        assert_eq!(slide.rules.len(), 2);
        assert!((slide.max_score() - 100.0).abs() < 1e-9);

        // Present but has no rules
        assert!(matches!(
            loader.load(ChallengeType::Character),
            Err(DetectError::InvalidRuleSet { .. })
        ));
        assert!(matches!(
            loader.load(ChallengeType::Click),
            Err(DetectError::NotFound(ChallengeType::Click))
        ));
    }

    #[test]
    fn test_load_all_skips_invalid() {
        let dir = setup();
        let loader = RuleSetLoader::new(dir.path()).expect("loader");
        let sets = loader.load_all().expect("load all");
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].challenge_type, ChallengeType::Slide);
    }

    #[test]
    fn test_parse_inline() {
        let set = RuleSetLoader::parse(SLIDE, "inline").expect("parse");
        assert_eq!(set.challenge_type, ChallengeType::Slide);
        assert!(matches!(
            RuleSetLoader::parse("threshold = 1", "inline"),
            Err(DetectError::ParseError { .. })
        ));
    }
}
