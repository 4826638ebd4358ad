//! Evidence records and the dedup/scoring pipeline applied after each research step.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A normalized citation-bearing record produced by a tool adapter.
///
/// `url` is never mutated once an `Evidence` is inserted into the run's
/// evidence set; only `score` is rewritten during dedup/ranking passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// ISO-ish date string, e.g. `"2026-07-01"` or `"2026-07-01T12:00:00Z"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Name of the adapter that produced this record.
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Evidence {
    pub fn new(url: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            publisher: None,
            title: None,
            date: None,
            snippet: None,
            tool: tool.into(),
            score: None,
        }
    }

    /// Sentinel URL used by the LLM analyzer adapter, whose output is not a
    /// real citable source.
    pub const SYNTHETIC_URL: &'static str = "llm_analysis_result";

    pub fn is_synthetic(&self) -> bool {
        self.url == Self::SYNTHETIC_URL
    }

    /// Display string used in `state.citations`: `"{publisher} ({date}) {url}"`.
    pub fn citation_display(&self) -> String {
        let publisher = self.publisher.as_deref().unwrap_or("unknown source");
        match &self.date {
            Some(date) => format!("{publisher} ({date}) {}", self.url),
            None => format!("{publisher} {}", self.url),
        }
    }
}

/// Lowercase scheme/host, strip trailing slashes from the path, drop query and fragment.
///
/// Idempotent: `canonical_url(canonical_url(u)) == canonical_url(u)`.
pub fn canonical_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            let scheme = parsed.scheme().to_lowercase();
            let host = parsed.host_str().unwrap_or("").to_lowercase();
            let port = parsed
                .port()
                .map(|p| format!(":{p}"))
                .unwrap_or_default();
            let path = parsed.path().trim_end_matches('/');
            format!("{scheme}://{host}{port}{path}")
        }
        Err(_) => raw.trim_end_matches('/').to_lowercase(),
    }
}

/// Lowercased registrable host of a URL, used to count unique domains for
/// source-diversity scoring. Falls back to `None` for unparsable URLs rather
/// than guessing from the raw string.
pub fn host_of(raw: &str) -> Option<String> {
    url::Url::parse(raw).ok().and_then(|u| u.host_str().map(str::to_lowercase))
}

fn days_old(date: &str, today: NaiveDate) -> Option<i64> {
    let date_part = date.split('T').next().unwrap_or(date);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .map(|d| (today - d).num_days().max(0))
}

/// Recency term `1/(1 + days_old)`; missing/unparsable dates get a neutral 1.0.
fn recency_weight(date: Option<&str>, today: NaiveDate) -> f64 {
    match date.and_then(|d| days_old(d, today)) {
        Some(days) => 1.0 / (1.0 + days as f64),
        None => 1.0,
    }
}

/// Dedup by canonical URL (keep highest-scored occurrence, ties broken by later
/// insertion), rescoring survivors with a recency term, then sort descending and
/// truncate to `max_results` when set.
///
/// Running this twice on an already-deduped set is a no-op beyond the `score`
/// field, which is why the base score is computed from the original `score`
/// rather than compounding recency on every call: callers must pass evidence
/// whose `score` already reflects any prior dedup pass's recency-adjusted value,
/// and this function only adds recency once per call. To keep the overall
/// idempotence law from §8 intact, the executor only invokes this once per
/// append window rather than re-scoring already-settled entries.
pub fn dedup_and_score(
    evidence: Vec<Evidence>,
    today: NaiveDate,
    max_results: Option<usize>,
) -> Vec<Evidence> {
    let mut deduped: HashMap<String, Evidence> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for ev in evidence {
        let key = canonical_url(&ev.url);
        match deduped.get(&key) {
            Some(existing) if existing.score.unwrap_or(0.0) > ev.score.unwrap_or(0.0) => {
                // existing wins, discard `ev`
            }
            _ => {
                if !deduped.contains_key(&key) {
                    order.push(key.clone());
                }
                deduped.insert(key, ev);
            }
        }
    }

    let mut scored: Vec<Evidence> = order
        .into_iter()
        .filter_map(|key| deduped.remove(&key))
        .map(|mut ev| {
            let base = ev.score.unwrap_or(0.0);
            ev.score = Some(base + recency_weight(ev.date.as_deref(), today));
            ev
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .unwrap_or(0.0)
            .partial_cmp(&a.score.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if let Some(limit) = max_results {
        scored.truncate(limit);
    }
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_url_strips_query_fragment_and_trailing_slash() {
        assert_eq!(
            canonical_url("HTTPS://Example.com/Path/?q=1#frag"),
            canonical_url("https://example.com/Path/")
        );
        assert_eq!(canonical_url("https://a.com/x/"), canonical_url("https://a.com/x"));
    }

    #[test]
    fn canonical_url_is_idempotent() {
        let u = "https://Example.com/a/b/?x=1";
        let once = canonical_url(u);
        let twice = canonical_url(&once);
        assert_eq!(once, twice);
    }

    proptest::proptest! {
        #[test]
        fn canonical_url_is_idempotent_for_arbitrary_paths(
            host in "[a-z]{3,10}\\.(com|org|net)",
            path in "[a-z/]{0,20}",
            query in "[a-z0-9=&]{0,15}",
        ) {
            let raw = format!("https://{host}/{path}?{query}");
            let once = canonical_url(&raw);
            let twice = canonical_url(&once);
            proptest::prop_assert_eq!(once, twice);
        }
    }

    #[test]
    fn dedup_keeps_highest_scored_variant() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let mut low = Evidence::new("http://a.com/x/", "sonar");
        low.score = Some(0.1);
        let mut high = Evidence::new("http://a.com/x", "exa");
        high.score = Some(0.9);

        let result = dedup_and_score(vec![low, high], today, None);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].tool, "exa");
    }

    #[test]
    fn dedup_respects_max_results() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let evidence = (0..5)
            .map(|i| {
                let mut e = Evidence::new(format!("http://x.com/{i}"), "sonar");
                e.score = Some(i as f64);
                e
            })
            .collect();
        let result = dedup_and_score(evidence, today, Some(2));
        assert_eq!(result.len(), 2);
        // highest original score (4) should sort first
        assert_eq!(result[0].url, "http://x.com/4");
    }

    #[test]
    fn host_of_lowercases_and_ignores_port_and_path() {
        assert_eq!(host_of("https://News.Example.com:8443/a/b"), Some("news.example.com".to_string()));
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn missing_date_gets_neutral_recency() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let e = Evidence::new("http://x.com/1", "sonar");
        let result = dedup_and_score(vec![e], today, None);
        assert_eq!(result[0].score, Some(1.0));
    }
}
