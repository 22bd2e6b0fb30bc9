//! Release asset selection
//!
//! Scores release file names against a target platform and architecture and
//! keeps the best-scoring subset. The scoring tables live in an immutable
//! [`SelectorProfile`] so they can be tuned from configuration.
//!
//! Scoring, all matches case-insensitive:
//!
//! - every candidate starts at `weights.base`
//! - `weights.platform` if the name contains a platform token
//! - `weights.arch` if the name contains an architecture token
//! - `weights.preference * (N - i)` for every preferred extension the name
//!   ends with, `i` being the extension's rank in a list of `N`
//! - per-platform substring modifiers (e.g. `musl` on Linux and Darwin)
//!
//! Strict selection only keeps candidates scoring at least
//! `weights.platform + weights.arch`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{Arch, Platform, ReleaseAsset};

/// Anything with a file name the selector can score
pub trait AssetName {
    fn asset_name(&self) -> &str;
}

impl AssetName for ReleaseAsset {
    fn asset_name(&self) -> &str {
        &self.name
    }
}

impl AssetName for String {
    fn asset_name(&self) -> &str {
        self
    }
}

impl AssetName for &str {
    fn asset_name(&self) -> &str {
        self
    }
}

/// Score increments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Starting score, above zero so a negative modifier cannot sink a full match
    pub base: i64,
    pub platform: i64,
    pub arch: i64,
    /// Multiplier for extension rank
    pub preference: i64,
}

impl ScoreWeights {
    /// Minimum score a strict match must reach
    pub fn strict_threshold(&self) -> i64 {
        self.platform + self.arch
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            base: 1,
            platform: 11,
            arch: 7,
            preference: 3,
        }
    }
}

/// Scoring rules for one target platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRules {
    /// Substrings identifying the platform
    pub tokens: Vec<String>,
    /// Accepted extensions, most preferred first
    pub extensions: Vec<String>,
    /// Substring score adjustments
    #[serde(default)]
    pub modifiers: BTreeMap<String, i64>,
}

/// Immutable scoring tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorProfile {
    pub platforms: BTreeMap<Platform, PlatformRules>,
    pub arches: BTreeMap<Arch, Vec<String>>,
    #[serde(default)]
    pub weights: ScoreWeights,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for SelectorProfile {
    fn default() -> Self {
        let unix_extensions = strings(&[".tar.gz", ".tgz", ".tar.xz", ".zip", ".bin", ".AppImage"]);
        let unix_modifiers: BTreeMap<String, i64> = [("musl".to_string(), -1)].into_iter().collect();

        let platforms = [
            (
                Platform::Windows,
                PlatformRules {
                    tokens: strings(&["windows", "win64", "win32", "win"]),
                    extensions: strings(&[".zip", ".exe", ".msi", ".bin"]),
                    modifiers: BTreeMap::new(),
                },
            ),
            (
                Platform::Darwin,
                PlatformRules {
                    tokens: strings(&["macos", "darwin", "mac", "osx"]),
                    extensions: unix_extensions.clone(),
                    modifiers: unix_modifiers.clone(),
                },
            ),
            (
                Platform::Linux,
                PlatformRules {
                    tokens: strings(&["linux"]),
                    extensions: unix_extensions,
                    modifiers: unix_modifiers,
                },
            ),
        ]
        .into_iter()
        .collect();

        let arches = [
            (Arch::Amd64, strings(&["amd64", "x86_64", "x64", "64bit", "64-bit"])),
            (Arch::X86, strings(&["386", "x86", "i386", "32bit", "32-bit"])),
            (
                Arch::Arm,
                strings(&["arm64", "aarch64", "armv7", "armv6", "armhf", "armv7l"]),
            ),
        ]
        .into_iter()
        .collect();

        Self {
            platforms,
            arches,
            weights: ScoreWeights::default(),
        }
    }
}

impl SelectorProfile {
    /// Validate the selector configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        for platform in Platform::ALL {
            let rules = self.platforms.get(&platform).ok_or_else(|| {
                crate::Error::config(format!("selector has no rules for {}", platform))
            })?;
            if rules.tokens.iter().all(|t| t.is_empty()) {
                return Err(crate::Error::config(format!(
                    "selector tokens for {} cannot be empty",
                    platform
                )));
            }
        }
        for arch in Arch::ALL {
            if self.arches.get(&arch).is_none_or(|tokens| tokens.is_empty()) {
                return Err(crate::Error::config(format!(
                    "selector has no tokens for {}",
                    arch
                )));
            }
        }
        Ok(())
    }

    /// Score one file name for a target
    pub fn score(&self, name: &str, platform: Platform, arch: Arch) -> i64 {
        let name = name.to_lowercase();
        let weights = &self.weights;
        let mut score = weights.base;

        let rules = self.platforms.get(&platform);

        if rules.is_some_and(|r| contains_any(&name, &r.tokens)) {
            score += weights.platform;
        }

        if self
            .arches
            .get(&arch)
            .is_some_and(|tokens| contains_any(&name, tokens))
        {
            score += weights.arch;
        }

        if let Some(rules) = rules {
            let n = rules.extensions.len() as i64;
            for (i, ext) in rules.extensions.iter().enumerate() {
                if name.ends_with(&ext.to_lowercase()) {
                    score += weights.preference * (n - i as i64);
                }
            }

            for (needle, delta) in &rules.modifiers {
                if name.contains(&needle.to_lowercase()) {
                    score += delta;
                }
            }
        }

        score
    }

    /// Return every candidate tied for the best score
    ///
    /// In strict mode candidates below [`ScoreWeights::strict_threshold`] are
    /// discarded first. No surviving candidate yields an empty result.
    pub fn select_best<'a, T: AssetName>(
        &self,
        candidates: &'a [T],
        platform: Platform,
        arch: Arch,
        strict: bool,
    ) -> Vec<&'a T> {
        let threshold = self.weights.strict_threshold();

        let scored: Vec<(&T, i64)> = candidates
            .iter()
            .map(|c| (c, self.score(c.asset_name(), platform, arch)))
            .filter(|(_, score)| !strict || *score >= threshold)
            .collect();

        let Some(best) = scored.iter().map(|(_, score)| *score).max() else {
            return Vec::new();
        };

        scored
            .into_iter()
            .filter(|(_, score)| *score == best)
            .map(|(c, _)| c)
            .collect()
    }
}

fn contains_any(name: &str, tokens: &[String]) -> bool {
    tokens
        .iter()
        .filter(|t| !t.is_empty())
        .any(|t| name.contains(&t.to_lowercase()))
}
