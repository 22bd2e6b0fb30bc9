//! Domain model for tracked packages
//!
//! - [`TrackedPackage`]: one mirrored `owner/repo` pair and everything the
//!   sync pipeline learned about its latest release
//! - [`PackageStatistics`]: hour-bucketed install/update counters used to rank
//!   packages by popularity
//! - [`Release`] / [`ReleaseAsset`]: transient origin data, consumed within a
//!   single sync pass

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Operating system family a release asset targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
    Darwin,
}

impl Platform {
    /// Every platform the mirror maps assets for
    pub const ALL: [Platform; 3] = [Platform::Windows, Platform::Linux, Platform::Darwin];

    /// Bit used for this platform in a [`PlatformSet`]
    pub const fn bit(self) -> u8 {
        match self {
            Platform::Linux => 1 << 0,
            Platform::Windows => 1 << 1,
            Platform::Darwin => 1 << 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Windows => "windows",
            Platform::Darwin => "darwin",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "windows" | "win" => Ok(Platform::Windows),
            "darwin" | "macos" | "mac" | "osx" => Ok(Platform::Darwin),
            other => Err(crate::Error::invalid_input(format!(
                "unknown platform '{}'",
                other
            ))),
        }
    }
}

/// Processor architecture class
///
/// 32- and 64-bit ARM share one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Amd64,
    X86,
    Arm,
}

impl Arch {
    pub const ALL: [Arch; 3] = [Arch::Amd64, Arch::Arm, Arch::X86];
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Arch::Amd64 => "amd64",
            Arch::X86 => "x86",
            Arch::Arm => "arm",
        };
        f.write_str(name)
    }
}

impl FromStr for Arch {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "amd64" | "x86_64" | "x64" => Ok(Arch::Amd64),
            "x86" | "386" | "i386" | "i686" => Ok(Arch::X86),
            "arm" | "arm64" | "aarch64" | "armv7" | "armv6" | "armhf" => Ok(Arch::Arm),
            other => Err(crate::Error::invalid_input(format!(
                "unknown architecture '{}'",
                other
            ))),
        }
    }
}

/// Bitmask over [`Platform`]; zero means "unknown"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformSet(u8);

impl PlatformSet {
    pub const UNKNOWN: PlatformSet = PlatformSet(0);

    pub fn from_bits(bits: u8) -> Self {
        let mask = Platform::ALL.iter().fold(0, |acc, p| acc | p.bit());
        Self(bits & mask)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_unknown(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, platform: Platform) -> bool {
        self.0 & platform.bit() != 0
    }

    pub fn insert(&mut self, platform: Platform) {
        self.0 |= platform.bit();
    }

    pub fn union(self, other: PlatformSet) -> PlatformSet {
        PlatformSet(self.0 | other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = Platform> {
        Platform::ALL.into_iter().filter(move |p| self.contains(*p))
    }
}

impl FromIterator<Platform> for PlatformSet {
    fn from_iter<I: IntoIterator<Item = Platform>>(iter: I) -> Self {
        let mut set = PlatformSet::UNKNOWN;
        for platform in iter {
            set.insert(platform);
        }
        set
    }
}

impl FromStr for PlatformSet {
    type Err = crate::Error;

    /// Parse a comma separated platform list; an empty string is "unknown"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Platform::from_str)
            .collect()
    }
}

/// A mirrored third-party release source, identified by `owner/repo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedPackage {
    /// Surrogate identifier
    pub id: Uuid,
    pub owner: String,
    pub repo: String,

    /// Tag of the latest release the mirror has republished
    pub version: Option<String>,

    /// Publication time of that release; `None` until the first successful sync
    pub last_released: Option<DateTime<Utc>>,

    /// Origin conditional-fetch validator (entity tag)
    pub etag: Option<String>,

    /// Shared libraries required by the release binaries, per platform
    #[serde(default)]
    pub dependencies: BTreeMap<Platform, BTreeSet<String>>,

    /// Republished asset names that match each platform
    #[serde(default)]
    pub release_assets: BTreeMap<Platform, BTreeSet<String>>,

    #[serde(default)]
    pub supported_platforms: PlatformSet,

    pub last_polled: Option<DateTime<Utc>>,
}

impl TrackedPackage {
    /// Create a package record that has never been synchronized
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            repo: repo.into(),
            version: None,
            last_released: None,
            etag: None,
            dependencies: BTreeMap::new(),
            release_assets: BTreeMap::new(),
            supported_platforms: PlatformSet::UNKNOWN,
            last_polled: None,
        }
    }

    /// `owner/repo` label used in logs
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Object store key for one of this package's assets
    pub fn object_key(&self, asset_name: &str) -> String {
        object_key(&self.owner, &self.repo, asset_name)
    }
}

/// Object store key layout shared by the sync pipeline and download links
pub fn object_key(owner: &str, repo: &str, asset_name: &str) -> String {
    format!("{}/{}/{}", owner, repo, asset_name)
}

/// Which counter an interaction increments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Install,
    Update,
}

/// Hour-bucketed install and update counters for one package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageStatistics {
    pub package_id: Uuid,
    #[serde(default)]
    installs: BTreeMap<DateTime<Utc>, u64>,
    #[serde(default)]
    updates: BTreeMap<DateTime<Utc>, u64>,
}

impl PackageStatistics {
    pub fn new(package_id: Uuid) -> Self {
        Self {
            package_id,
            installs: BTreeMap::new(),
            updates: BTreeMap::new(),
        }
    }

    /// Truncate a timestamp to its UTC hour bucket
    pub fn bucket_for(at: DateTime<Utc>) -> DateTime<Utc> {
        at.duration_trunc(Duration::hours(1)).unwrap_or(at)
    }

    /// Add `amount` to the hour bucket containing `at`
    pub fn track(&mut self, kind: InteractionKind, at: DateTime<Utc>, amount: u64) {
        let bucket = Self::bucket_for(at);
        let counter = self.history_mut(kind).entry(bucket).or_insert(0);
        *counter = counter.saturating_add(amount);
    }

    pub fn history(&self, kind: InteractionKind) -> &BTreeMap<DateTime<Utc>, u64> {
        match kind {
            InteractionKind::Install => &self.installs,
            InteractionKind::Update => &self.updates,
        }
    }

    fn history_mut(&mut self, kind: InteractionKind) -> &mut BTreeMap<DateTime<Utc>, u64> {
        match kind {
            InteractionKind::Install => &mut self.installs,
            InteractionKind::Update => &mut self.updates,
        }
    }

    /// Sum of the buckets in `[start, end]`
    pub fn count_within(&self, kind: InteractionKind, start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
        if start > end {
            return 0;
        }
        self.history(kind).range(start..=end).map(|(_, v)| *v).sum()
    }

    /// Sum across every bucket of one counter
    pub fn count(&self, kind: InteractionKind) -> u64 {
        self.history(kind).values().sum()
    }

    /// Installs plus updates across all buckets
    pub fn total_interactions(&self) -> u64 {
        self.count(InteractionKind::Install) + self.count(InteractionKind::Update)
    }
}

/// Popularity inputs read at a single consistent point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopularitySnapshot {
    /// The package's own total interactions
    pub total_interactions: u64,
    /// Tracked packages with strictly more interactions
    pub higher: u64,
    /// Tracked packages overall
    pub tracked: u64,
}

impl PopularitySnapshot {
    /// `1 - higher / max(tracked, 1)`
    pub fn percentile(&self) -> f64 {
        let tracked = self.tracked.max(1) as f64;
        1.0 - (self.higher as f64 / tracked)
    }
}

/// Latest release metadata returned by the origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub tag: String,
    pub published_at: DateTime<Utc>,
    pub assets: Vec<ReleaseAsset>,
}

/// One downloadable file of a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub download_url: String,
    pub size: u64,
}

impl ReleaseAsset {
    pub fn new(name: impl Into<String>, download_url: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            download_url: download_url.into(),
            size,
        }
    }
}

/// Payload of one sync job firing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncJobArgs {
    pub package_id: Uuid,
    /// Consecutive failed firings that preceded this one
    pub refire_count: u32,
}

impl SyncJobArgs {
    pub fn new(package_id: Uuid) -> Self {
        Self {
            package_id,
            refire_count: 0,
        }
    }

    /// Successor of a firing whose pass failed
    pub fn refired(self) -> Self {
        Self {
            package_id: self.package_id,
            refire_count: self.refire_count.saturating_add(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_platform_set_parse() {
        let set: PlatformSet = "linux, windows".parse().unwrap();
        assert!(set.contains(Platform::Linux));
        assert!(set.contains(Platform::Windows));
        assert!(!set.contains(Platform::Darwin));
        assert_eq!(set.bits(), 0b011);

        let empty: PlatformSet = "".parse().unwrap();
        assert!(empty.is_unknown());

        assert!("plan9".parse::<PlatformSet>().is_err());
    }

    #[test]
    fn test_platform_set_from_bits_masks_unknown_bits() {
        assert_eq!(PlatformSet::from_bits(0xFF).bits(), 0b111);
    }

    #[test]
    fn test_track_aggregates_in_hour_bucket() {
        let mut stats = PackageStatistics::new(Uuid::new_v4());
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 42, 17).unwrap();

        stats.track(InteractionKind::Install, at, 1);
        stats.track(InteractionKind::Install, at + Duration::minutes(5), 2);
        stats.track(InteractionKind::Install, at + Duration::minutes(10), 3);

        let history = stats.history(InteractionKind::Install);
        assert_eq!(history.len(), 1);
        let (bucket, count) = history.iter().next().unwrap();
        assert_eq!(*count, 6);
        assert_eq!(bucket.minute(), 0);
        assert_eq!(bucket.second(), 0);
        assert_eq!(bucket.hour(), 10);
    }

    #[test]
    fn test_total_interactions_is_derived() {
        let mut stats = PackageStatistics::new(Uuid::new_v4());
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();

        stats.track(InteractionKind::Install, at, 4);
        stats.track(InteractionKind::Update, at - Duration::hours(3), 6);

        assert_eq!(stats.count(InteractionKind::Install), 4);
        assert_eq!(stats.count(InteractionKind::Update), 6);
        assert_eq!(stats.total_interactions(), 10);
    }

    #[test]
    fn test_count_within_range() {
        let mut stats = PackageStatistics::new(Uuid::new_v4());
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        stats.track(InteractionKind::Install, now, 10);
        stats.track(InteractionKind::Install, now - Duration::hours(1), 20);
        stats.track(InteractionKind::Install, now - Duration::hours(2), 30);
        stats.track(InteractionKind::Install, now - Duration::hours(5), 40);

        let total = stats.count_within(InteractionKind::Install, now - Duration::hours(2), now);
        assert_eq!(total, 60);
        assert_eq!(stats.count_within(InteractionKind::Install, now, now - Duration::hours(1)), 0);
    }

    #[test]
    fn test_percentile_floors_divisor() {
        let snapshot = PopularitySnapshot {
            total_interactions: 0,
            higher: 0,
            tracked: 0,
        };
        assert_eq!(snapshot.percentile(), 1.0);

        let snapshot = PopularitySnapshot {
            total_interactions: 3,
            higher: 5,
            tracked: 10,
        };
        assert!((snapshot.percentile() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_statistics_json_roundtrip_keeps_buckets() {
        let mut stats = PackageStatistics::new(Uuid::new_v4());
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).unwrap();
        stats.track(InteractionKind::Update, at, 2);

        let json = serde_json::to_string(&stats).unwrap();
        let back: PackageStatistics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }

    #[test]
    fn test_object_key_layout() {
        let pkg = TrackedPackage::new("acme", "tool");
        assert_eq!(pkg.object_key("tool-linux-amd64.tar.gz"), "acme/tool/tool-linux-amd64.tar.gz");
    }

    #[test]
    fn test_refired_args_keep_package() {
        let args = SyncJobArgs::new(Uuid::new_v4());
        let next = args.refired().refired();
        assert_eq!(next.package_id, args.package_id);
        assert_eq!(next.refire_count, 2);
    }
}
