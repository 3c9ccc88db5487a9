//! URL-path keyword extractor (spec §6 "keyword extractor"). This is
//! an out-of-scope external collaborator per spec §1 ("URL->keywords
//! tokenization"); the real-world heuristic below is a minimal
//! concrete implementation so the pipeline is runnable end to end —
//! tests of the orchestrator itself substitute fakes.

use super::KeywordExtractor;

/// Extensions stripped from the trailing path segment before it's
/// treated as a keyword candidate.
const KNOWN_EXTENSIONS: &[&str] = &[".html", ".htm", ".php", ".aspx", ".jsp"];

/// Categorical path segments that carry no keyword signal on their own
/// and are never candidates.
const CATEGORICAL_SEGMENTS: &[&str] = &["www", "index", "home", "page"];

/// Treats the deepest meaningful path segment as the candidate
/// keyword for a URL, the way a storefront/catalog's "slug" tends to
/// carry the descriptive content while ancestor segments are category
/// scaffolding.
pub struct PathKeywordExtractor;

impl KeywordExtractor for PathKeywordExtractor {
    fn extract(&self, url: &str) -> Vec<String> {
        let Ok(parsed) = url::Url::parse(url) else {
            return Vec::new();
        };
        let segments: Vec<&str> = parsed
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();

        let mut candidates = Vec::new();
        for segment in segments.iter().rev() {
            let stripped = strip_known_extension(segment);
            if stripped.is_empty() || CATEGORICAL_SEGMENTS.contains(&stripped.to_lowercase().as_str()) {
                continue;
            }
            candidates.push(stripped.to_string());
            break;
        }
        candidates
    }
}

fn strip_known_extension(segment: &str) -> &str {
    let lower = segment.to_lowercase();
    for ext in KNOWN_EXTENSIONS {
        if lower.ends_with(ext) {
            return &segment[..segment.len() - ext.len()];
        }
    }
    segment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_the_terminal_segment() {
        let extractor = PathKeywordExtractor;
        assert_eq!(extractor.extract("https://s/game/puzzle-1"), vec!["puzzle-1"]);
        assert_eq!(extractor.extract("https://s/game/action-2"), vec!["action-2"]);
    }

    #[test]
    fn strips_known_extensions() {
        let extractor = PathKeywordExtractor;
        assert_eq!(extractor.extract("https://s/games/racing-car.html"), vec!["racing-car"]);
    }

    #[test]
    fn skips_categorical_trailing_segments() {
        let extractor = PathKeywordExtractor;
        assert_eq!(extractor.extract("https://s/games/puzzle/index"), vec!["puzzle"]);
    }

    #[test]
    fn root_url_yields_no_candidates() {
        let extractor = PathKeywordExtractor;
        assert!(extractor.extract("https://s/").is_empty());
    }
}
