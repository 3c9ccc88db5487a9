//! Core pipeline data model (spec §3): the entities that flow through
//! Phases E/D/Q (§4.7) and the analytics/downstream wire shapes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A feed URL plus its inferred sitemap format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapRef {
    pub url: String,
    pub format: SitemapFormat,
}

/// Sitemap formats dispatched by suffix/pattern (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SitemapFormat {
    Xml,
    XmlGz,
    Txt,
    Rss,
}

impl SitemapFormat {
    /// Dispatch by suffix/pattern: `.xml.gz`, `.txt`, contains
    /// `rss`|`feed`, else `.xml` (spec §6).
    #[must_use]
    pub fn infer(url: &str) -> Self {
        let lower = url.to_lowercase();
        if lower.ends_with(".xml.gz") {
            Self::XmlGz
        } else if lower.ends_with(".txt") {
            Self::Txt
        } else if lower.contains("rss") || lower.contains("feed") {
            Self::Rss
        } else {
            Self::Xml
        }
    }
}

impl SitemapRef {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let format = SitemapFormat::infer(&url);
        Self { url, format }
    }
}

/// One URL yielded from a sitemap during Phase E. Ephemeral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedURL {
    pub sitemap: SitemapRef,
    pub url: String,
}

/// A Phase-D survivor: a globally-deduplicated, URL-filtered keyword
/// (normalized form) bound to the URL its winning candidate came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Survivor {
    pub keyword: String,
    pub url: ExtractedURL,
}

/// Normalize a raw keyword candidate (spec §3 "Keyword"): lower-case,
/// separators `-_.` collapsed to a single space, whitespace collapsed,
/// trimmed. This is the equivalence class used for dedup.
#[must_use]
pub fn normalize(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut last_was_space = false;
    for ch in lower.chars() {
        let mapped = match ch {
            '-' | '_' | '.' => ' ',
            other => other,
        };
        if mapped == ' ' {
            if !last_was_space && !out.is_empty() {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(mapped);
            last_was_space = false;
        }
    }
    out.trim_end().to_string()
}

/// Keyword -> ExtractedURL used at submission time. Last writer wins
/// within a run (spec §3).
pub type KeywordURLBinding = HashMap<String, ExtractedURL>;

/// Competition tier derived from the analytics response's competition
/// fraction (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompetitionLevel {
    Low,
    Medium,
    High,
}

/// Completeness/shape flags over the synthesized monthly series (spec §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityFlags {
    pub total: u8,
    pub available: u8,
    pub missing_months: Vec<u8>,
    pub only_last_month_populated: bool,
    pub has_zero_months: bool,
}

/// Final record handed to the downstream submitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub keyword: String,
    pub url: String,
    pub avg_monthly_searches: u64,
    pub latest_monthly_searches: u64,
    pub max_monthly_searches: u64,
    pub competition: CompetitionLevel,
    pub competition_index: u8,
    pub low_bid_micro: u64,
    pub high_bid_micro: u64,
    pub monthly_series: Vec<u64>,
    pub quality: QualityFlags,
}

/// One keyword's metrics as returned by the analytics collaborator
/// (spec §6). Wire field names follow the analytics API's own
/// convention (`searchVolume`), not this crate's snake_case.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyticsKeyword {
    pub word: String,
    #[serde(rename = "searchVolume")]
    pub search_volume: i64,
    pub competition: f64,
    pub cpc: f64,
}

/// Analytics client response for one batch of keywords (spec §6).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AnalyticsResponse {
    #[serde(alias = "Keywords")]
    pub keywords: Vec<AnalyticsKeyword>,
}
