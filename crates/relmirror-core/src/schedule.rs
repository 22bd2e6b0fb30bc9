//! Adaptive re-poll scheduling
//!
//! Packages are re-polled on one of four cadence tiers chosen from the age of
//! their latest release and their popularity percentile:
//!
//! | Tier | Interval | Age ≤ | or percentile ≥ |
//! |------|----------|-------|-----------------|
//! | 1    | 1h       | 14d   | 0.95            |
//! | 2    | 6h       | 90d   | 0.75            |
//! | 3    | 24h      | 365d  | 0.50            |
//! | 4    | 72h      | -     | -               |
//!
//! Rows are evaluated top to bottom and the first match wins.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;

use crate::model::TrackedPackage;
use crate::traits::PackageStore;

/// Re-poll cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Hourly,
    SixHourly,
    Daily,
    ThreeDaily,
}

struct TierRule {
    tier: Tier,
    max_age_days: f64,
    min_percentile: f64,
}

const RULES: [TierRule; 3] = [
    TierRule {
        tier: Tier::Hourly,
        max_age_days: 14.0,
        min_percentile: 0.95,
    },
    TierRule {
        tier: Tier::SixHourly,
        max_age_days: 90.0,
        min_percentile: 0.75,
    },
    TierRule {
        tier: Tier::Daily,
        max_age_days: 365.0,
        min_percentile: 0.50,
    },
];

impl Tier {
    pub fn interval(self) -> Duration {
        match self {
            Tier::Hourly => Duration::hours(1),
            Tier::SixHourly => Duration::hours(6),
            Tier::Daily => Duration::hours(24),
            Tier::ThreeDaily => Duration::hours(72),
        }
    }

    /// Pick the tier for a release age and popularity percentile
    pub fn select(age: Duration, percentile: f64) -> Tier {
        let age_days = age.num_milliseconds() as f64 / Duration::days(1).num_milliseconds() as f64;

        RULES
            .iter()
            .find(|rule| age_days <= rule.max_age_days || percentile >= rule.min_percentile)
            .map(|rule| rule.tier)
            .unwrap_or(Tier::ThreeDaily)
    }
}

/// Computes when a package should be synchronized next
pub struct SchedulingPolicy {
    store: Arc<dyn PackageStore>,
}

impl SchedulingPolicy {
    pub fn new(store: Arc<dyn PackageStore>) -> Self {
        Self { store }
    }

    /// Tier for `package` as of `now`
    ///
    /// Fails with `Error::Scheduling` when the package has no known release
    /// timestamp; callers must not substitute a default silently.
    pub async fn tier(
        &self,
        package: &TrackedPackage,
        now: DateTime<Utc>,
    ) -> Result<Tier, crate::Error> {
        let released = package.last_released.ok_or_else(|| {
            crate::Error::scheduling(format!(
                "{} has no last release timestamp",
                package.slug()
            ))
        })?;

        let snapshot = self.store.popularity(package.id).await?;
        let percentile = snapshot.percentile();
        let age = now - released;
        let tier = Tier::select(age, percentile);

        tracing::debug!(
            "{}: age {}d, {} interactions, percentile {:.3} -> {:?}",
            package.slug(),
            age.num_days(),
            snapshot.total_interactions,
            percentile,
            tier
        );

        Ok(tier)
    }

    /// `now` plus the package's tier interval
    pub async fn next_run(
        &self,
        package: &TrackedPackage,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, crate::Error> {
        Ok(now + self.tier(package, now).await?.interval())
    }
}

/// Shift `at` by a uniformly random whole number of seconds in `[-bound, bound]`
pub fn apply_jitter(at: DateTime<Utc>, bound: Duration) -> DateTime<Utc> {
    let secs = bound.num_seconds().abs();
    if secs == 0 {
        return at;
    }
    let offset = rand::thread_rng().gen_range(-secs..=secs);
    Duration::try_seconds(offset)
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(at)
}
