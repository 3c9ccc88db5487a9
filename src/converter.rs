//! Data converter (spec §4.9, component C9): projects one analytics
//! keyword response into an [`EnrichedRecord`].
//!
//! The monthly series is synthesized with a per-process-deterministic
//! RNG (seeded from the OS process id) rather than a fixed seed —
//! spec §4.9 requires determinism per process but not stability across
//! processes, so re-runs within one process see the same series shape
//! while distinct runs vary.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::pipeline::types::{AnalyticsKeyword, CompetitionLevel, EnrichedRecord, QualityFlags};

const MONTHS: usize = 12;
const SERIES_LOW: f64 = 0.8;
const SERIES_HIGH: f64 = 1.2;

fn process_seed() -> u64 {
    const SALT: u64 = 0x5361_6c74_2d43_3921;
    u64::from(std::process::id()) ^ SALT
}

/// Convert one analytics keyword into an [`EnrichedRecord`] bound to `url`.
#[must_use]
pub fn convert(analytics: &AnalyticsKeyword, url: &str) -> EnrichedRecord {
    let mut rng = StdRng::seed_from_u64(process_seed());
    let base_volume = analytics.search_volume.max(0) as f64;

    let series: Vec<u64> = (0..MONTHS)
        .map(|_| {
            let u = rng.random_range(SERIES_LOW..=SERIES_HIGH);
            (base_volume * u).round() as u64
        })
        .collect();

    let avg = base_volume.round() as u64;
    let latest = *series.last().unwrap_or(&0);
    let max = series.iter().copied().max().unwrap_or(0);

    let competition = analytics.competition.clamp(0.0, 1.0);
    let level = if competition <= 0.33 {
        CompetitionLevel::Low
    } else if competition <= 0.66 {
        CompetitionLevel::Medium
    } else {
        CompetitionLevel::High
    };
    let competition_index = (competition * 100.0).round() as u8;

    let low_bid_micro = (analytics.cpc * 0.8 * 1_000_000.0).round() as u64;
    let high_bid_micro = (analytics.cpc * 1.2 * 1_000_000.0).round() as u64;

    let available = series.iter().filter(|&&v| v > 0).count();
    let missing_months: Vec<u8> = series
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v == 0)
        .map(|(i, _)| i as u8)
        .collect();
    let only_last_month_populated = available == 1 && series.last().is_some_and(|&v| v > 0);
    let has_zero_months = available < MONTHS;

    EnrichedRecord {
        keyword: analytics.word.clone(),
        url: url.to_string(),
        avg_monthly_searches: avg,
        latest_monthly_searches: latest,
        max_monthly_searches: max,
        competition: level,
        competition_index,
        low_bid_micro,
        high_bid_micro,
        monthly_series: series,
        quality: QualityFlags {
            total: MONTHS as u8,
            available: available as u8,
            missing_months,
            only_last_month_populated,
            has_zero_months,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monthly_series_has_twelve_entries_near_base_volume() {
        let analytics = AnalyticsKeyword {
            word: "puzzle 1".to_string(),
            search_volume: 1000,
            competition: 0.5,
            cpc: 2.0,
        };
        let record = convert(&analytics, "https://s/game/puzzle-1");
        assert_eq!(record.monthly_series.len(), 12);
        assert!(record.latest_monthly_searches >= 800 && record.latest_monthly_searches <= 1200);
        assert_eq!(record.avg_monthly_searches, 1000);
    }

    #[test]
    fn competition_level_boundaries_match_spec() {
        let low = AnalyticsKeyword { word: "a".into(), search_volume: 10, competition: 0.1, cpc: 1.0 };
        let medium = AnalyticsKeyword { word: "b".into(), search_volume: 10, competition: 0.5, cpc: 1.0 };
        let high = AnalyticsKeyword { word: "c".into(), search_volume: 10, competition: 0.9, cpc: 1.0 };
        assert!(matches!(convert(&low, "u").competition, CompetitionLevel::Low));
        assert!(matches!(convert(&medium, "u").competition, CompetitionLevel::Medium));
        assert!(matches!(convert(&high, "u").competition, CompetitionLevel::High));
    }

    #[test]
    fn competition_level_exact_boundaries_match_spec() {
        let at = |competition: f64| AnalyticsKeyword { word: "a".into(), search_volume: 10, competition, cpc: 1.0 };
        assert!(matches!(convert(&at(0.33), "u").competition, CompetitionLevel::Low));
        assert!(matches!(convert(&at(0.34), "u").competition, CompetitionLevel::Medium));
        assert!(matches!(convert(&at(0.66), "u").competition, CompetitionLevel::Medium));
        assert!(matches!(convert(&at(0.67), "u").competition, CompetitionLevel::High));
    }

    #[test]
    fn cpc_micro_bids_match_spec_formula() {
        let analytics = AnalyticsKeyword { word: "a".into(), search_volume: 10, competition: 0.5, cpc: 2.0 };
        let record = convert(&analytics, "u");
        assert_eq!(record.low_bid_micro, 1_600_000);
        assert_eq!(record.high_bid_micro, 2_400_000);
    }

    #[test]
    fn quality_flags_report_total_and_available() {
        let analytics = AnalyticsKeyword { word: "a".into(), search_volume: 500, competition: 0.2, cpc: 1.0 };
        let record = convert(&analytics, "u");
        assert_eq!(record.quality.total, 12);
        assert_eq!(record.quality.available, 12); // base_volume > 0 so every month is nonzero
        assert!(!record.quality.has_zero_months);
    }

    #[test]
    fn zero_search_volume_yields_all_zero_months() {
        let analytics = AnalyticsKeyword { word: "a".into(), search_volume: 0, competition: 0.2, cpc: 1.0 };
        let record = convert(&analytics, "u");
        assert_eq!(record.quality.available, 0);
        assert!(record.quality.has_zero_months);
    }
}
