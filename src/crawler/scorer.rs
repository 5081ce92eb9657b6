//! Frontier priority scoring
//!
//! A scorer only changes the order pending URLs are popped in. Depth and
//! page caps are enforced by the frontier regardless of score.

use crate::config::{ScorerConfig, ScorerKind};
use crate::crawler::frontier::default_priority;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// URL fragments that usually lead to content
const CONTENT_PATTERNS: &[&str] = &["article", "blog", "news", "post", "content"];

/// URL fragments that usually lead to utility pages
const UTILITY_PATTERNS: &[&str] = &["login", "register", "cart", "checkout", "admin"];

/// What is known about the page a link was found on
#[derive(Debug, Clone)]
pub struct ParentContext {
    pub url: Url,
    pub depth: u32,
    pub title: Option<String>,
}

/// External scoring capability
///
/// Higher scores are crawled sooner. Errors and non-finite scores fall back
/// to the default breadth-first priority.
pub trait UrlScorer: Send + Sync {
    fn score(&self, url: &Url, parent: &ParentContext) -> anyhow::Result<f64>;
}

/// Keyword and path-pattern heuristic
#[derive(Debug, Clone, Default)]
pub struct HeuristicScorer {
    keywords: Vec<String>,
}

impl HeuristicScorer {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Relevance in `[0, 1]`
    pub fn relevance(&self, url: &Url) -> f64 {
        let haystack = url.as_str().to_lowercase();
        let path = url.path().to_lowercase();

        let mut score = 0.5;
        score += 0.1 * self.keywords.iter().filter(|k| haystack.contains(k.as_str())).count() as f64;
        if CONTENT_PATTERNS.iter().any(|p| path.contains(p)) {
            score += 0.2;
        }
        if UTILITY_PATTERNS.iter().any(|p| path.contains(p)) {
            score -= 0.3;
        }
        score.clamp(0.0, 1.0)
    }
}

/// Priority strategy injected at session start
#[derive(Clone, Default)]
pub enum Scorer {
    /// Breadth-first: priority is `-depth`
    #[default]
    None,
    /// Heuristic relevance; priority is `relevance - depth`, so shallower
    /// pages still come first across depths
    Heuristic(HeuristicScorer),
    /// Caller-supplied scoring
    External(Arc<dyn UrlScorer>),
}

impl fmt::Debug for Scorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("Scorer::None"),
            Self::Heuristic(h) => f.debug_tuple("Scorer::Heuristic").field(h).finish(),
            Self::External(_) => f.write_str("Scorer::External(..)"),
        }
    }
}

impl Scorer {
    pub fn from_config(config: &ScorerConfig) -> Self {
        match config.kind {
            ScorerKind::None => Self::None,
            ScorerKind::Heuristic => Self::Heuristic(HeuristicScorer::new(config.keywords.clone())),
        }
    }

    /// Frontier priority for a link at `depth`
    pub fn priority(&self, url: &Url, depth: u32, parent: &ParentContext) -> f64 {
        let fallback = default_priority(depth);
        match self {
            Self::None => fallback,
            Self::Heuristic(h) => h.relevance(url) + fallback,
            Self::External(scorer) => match scorer.score(url, parent) {
                Ok(score) if score.is_finite() => score,
                Ok(score) => {
                    tracing::debug!("Scorer returned {} for {}, using default", score, url);
                    fallback
                }
                Err(e) => {
                    tracing::debug!("Scorer failed for {}: {:#}, using default", url, e);
                    fallback
                }
            },
        }
    }
}
