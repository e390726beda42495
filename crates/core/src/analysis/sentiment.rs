use crate::domain::news::{NewsArticle, ScoredArticle};
use crate::error::{AnalysisError, Stage};
use crate::llm::cache::{SentimentCache, TextKey};
use crate::llm::error::OracleError;
use crate::llm::SentimentOracle;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Upper bound on concurrent oracle calls.
pub const MAX_WORKERS: usize = 64;

#[derive(Debug, Clone)]
pub struct SentimentConfig {
    /// Maximum concurrent oracle calls.
    pub workers: usize,
    pub oracle_timeout: Duration,
    /// Bound on the whole fan-in; unfinished calls are aborted and count as failures.
    pub deadline: Duration,
    pub max_article_chars: usize,
    /// Articles with fewer characters score neutral without an oracle call. 0 disables.
    pub min_article_chars: usize,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            oracle_timeout: Duration::from_secs(30),
            deadline: Duration::from_secs(120),
            max_article_chars: 5000,
            min_article_chars: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SentimentSummary {
    /// Mean of the successful per-article scores; 0 when there were no articles.
    pub score: f64,
    pub articles: Vec<ScoredArticle>,
    pub scored: usize,
    pub failed: usize,
}

pub struct SentimentAggregator {
    oracle: Arc<dyn SentimentOracle>,
    config: SentimentConfig,
    cache: Option<SentimentCache>,
}

enum Outcome {
    Scored(f64),
    Cached(f64),
    Failed,
}

impl SentimentAggregator {
    pub fn new(oracle: Arc<dyn SentimentOracle>, config: SentimentConfig) -> Self {
        Self {
            oracle,
            config,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: SentimentCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn aggregate(
        &self,
        articles: &[NewsArticle],
    ) -> Result<SentimentSummary, AnalysisError> {
        self.aggregate_until(articles, std::future::pending::<()>())
            .await
    }

    /// Like [`aggregate`](Self::aggregate), but gives up with `Cancelled` as soon as `cancel`
    /// resolves. In-flight oracle calls are aborted and partial results dropped.
    pub async fn aggregate_until<C>(
        &self,
        articles: &[NewsArticle],
        cancel: C,
    ) -> Result<SentimentSummary, AnalysisError>
    where
        C: Future<Output = ()>,
    {
        if articles.is_empty() {
            return Ok(SentimentSummary {
                score: 0.0,
                articles: Vec::new(),
                scored: 0,
                failed: 0,
            });
        }

        let prompts: Vec<String> = articles
            .iter()
            .map(|a| prompt_text(a, self.config.max_article_chars))
            .collect();

        // One slot per article; each task reports back only its own index.
        let mut slots: Vec<Option<Outcome>> = (0..articles.len()).map(|_| None).collect();
        let mut keys: Vec<Option<TextKey>> = vec![None; articles.len()];

        let semaphore = Arc::new(Semaphore::new(self.config.workers.clamp(1, MAX_WORKERS)));
        let mut tasks: JoinSet<(usize, Result<f64, OracleError>)> = JoinSet::new();

        for (idx, (article, prompt)) in articles.iter().zip(&prompts).enumerate() {
            if self.config.min_article_chars > 0
                && article.text.trim().chars().count() < self.config.min_article_chars
            {
                tracing::debug!(idx, article = article.label(), "article too short; neutral score");
                slots[idx] = Some(Outcome::Scored(0.0));
                continue;
            }

            if let Some(cache) = &self.cache {
                let key = TextKey::of(prompt);
                if let Some(score) = cache.get(key).await {
                    slots[idx] = Some(Outcome::Cached(score));
                    continue;
                }
                keys[idx] = Some(key);
            }

            let oracle = Arc::clone(&self.oracle);
            let semaphore = Arc::clone(&semaphore);
            let prompt = prompt.clone();
            let timeout = self.config.oracle_timeout;
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let res = match tokio::time::timeout(timeout, oracle.score_sentiment(&prompt)).await
                {
                    Ok(res) => res.and_then(|score| check_range(oracle.as_ref(), score)),
                    Err(_) => Err(OracleError::timeout(oracle.provider(), timeout)),
                };
                (idx, res)
            });
        }

        let deadline = tokio::time::sleep(self.config.deadline);
        tokio::pin!(deadline);
        tokio::pin!(cancel);

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((idx, Ok(score)))) => slots[idx] = Some(Outcome::Scored(score)),
                    Some(Ok((idx, Err(err)))) => {
                        tracing::warn!(
                            idx,
                            article = articles[idx].label(),
                            error = %err,
                            "sentiment scoring failed; excluding article"
                        );
                        slots[idx] = Some(Outcome::Failed);
                    }
                    Some(Err(join_err)) => {
                        tracing::warn!(error = %join_err, "sentiment task aborted or panicked");
                    }
                },
                _ = &mut deadline => {
                    tracing::warn!(
                        pending = tasks.len(),
                        deadline = ?self.config.deadline,
                        "sentiment deadline reached; aborting stragglers"
                    );
                    tasks.abort_all();
                    break;
                }
                _ = &mut cancel => {
                    tasks.abort_all();
                    return Err(AnalysisError::Cancelled { stage: Stage::Sentiment });
                }
            }
        }

        if let Some(cache) = &self.cache {
            for (slot, key) in slots.iter().zip(&keys) {
                if let (Some(Outcome::Scored(score)), Some(key)) = (slot, key) {
                    cache.insert(*key, *score).await;
                }
            }
        }

        let mut sum = 0.0;
        let mut scored = 0usize;
        let mut out = Vec::with_capacity(articles.len());
        for (article, slot) in articles.iter().zip(slots) {
            let (score, cached) = match slot {
                Some(Outcome::Scored(s)) => (Some(s), false),
                Some(Outcome::Cached(s)) => (Some(s), true),
                Some(Outcome::Failed) | None => (None, false),
            };
            if let Some(s) = score {
                sum += s;
                scored += 1;
            }
            out.push(ScoredArticle {
                article: article.clone(),
                score,
                cached,
            });
        }

        let failed = articles.len() - scored;
        if scored == 0 {
            return Err(AnalysisError::SentimentUnavailable {
                attempted: articles.len(),
                failed,
            });
        }

        let score = (sum / scored as f64).clamp(-1.0, 1.0);
        tracing::info!(articles = articles.len(), scored, failed, score, "aggregated sentiment");

        Ok(SentimentSummary {
            score,
            articles: out,
            scored,
            failed,
        })
    }
}

fn check_range(oracle: &dyn SentimentOracle, score: f64) -> Result<f64, OracleError> {
    if score.is_finite() && (-1.0..=1.0).contains(&score) {
        Ok(score)
    } else {
        Err(OracleError::new(
            oracle.provider(),
            "validate",
            format!("score out of range: {score}"),
        ))
    }
}

/// Text sent to the oracle: optional title line, then the body truncated to `max_chars`.
pub fn prompt_text(article: &NewsArticle, max_chars: usize) -> String {
    let body: String = article.text.trim().chars().take(max_chars).collect();
    match article.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => format!("Title: '{title}'. Content: {body}"),
        None => body,
    }
}
