//! Multi-engine search with per-engine circuit breaking.
//!
//! Engines are consulted in priority order until enough unique results are
//! gathered. An engine whose breaker is open is skipped without being called.
//! Results are deduplicated by canonical URL, keeping the instance from the
//! highest-priority engine, and ordered by `(engine priority, rank)`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::canonical::canonical_key;
use crate::circuit_breaker::{CircuitBreakerError, CircuitBreakerRegistry};
use crate::error::{EngineError, EngineFailure, SearchError};
use crate::models::{SearchOptions, SearchQuery, SearchResult};
use crate::traits::SearchEngine;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Timeout for each engine call.
    pub engine_timeout: Duration,
    /// Deadline for the whole search across every engine.
    pub deadline: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            engine_timeout: Duration::from_secs(10),
            deadline: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct SearchOrchestrator {
    engines: Vec<Arc<dyn SearchEngine>>,
    breakers: CircuitBreakerRegistry,
    config: SearchConfig,
}

impl SearchOrchestrator {
    /// `engines[0]` is the primary; the rest are fallbacks in order.
    pub fn new(
        engines: Vec<Arc<dyn SearchEngine>>,
        breakers: CircuitBreakerRegistry,
        config: SearchConfig,
    ) -> Self {
        Self {
            engines,
            breakers,
            config,
        }
    }

    pub fn engine_names(&self) -> Vec<String> {
        self.engines.iter().map(|e| e.name().to_string()).collect()
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let query = SearchQuery::new(query, options);
        if query.text.is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        tracing::info!(query = %query.text, count = query.count, "Searching");

        match tokio::time::timeout(self.config.deadline, self.run(&query, options.enable_fallback))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(query = %query.text, "Search deadline exceeded");
                Err(SearchError::Timeout {
                    query: query.text,
                    deadline: self.config.deadline,
                })
            }
        }
    }

    async fn run(
        &self,
        query: &SearchQuery,
        enable_fallback: bool,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let chain = if enable_fallback {
            &self.engines[..]
        } else {
            &self.engines[..self.engines.len().min(1)]
        };

        let mut merged: Vec<(usize, SearchResult)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut failures = Vec::new();
        let mut answered = false;

        for (priority, engine) in chain.iter().enumerate() {
            if merged.len() >= query.count {
                break;
            }

            let name = engine.name().to_string();
            let breaker = self.breakers.get(&name);
            let timeout = self.config.engine_timeout;

            let outcome = breaker
                .call(|| async {
                    match tokio::time::timeout(timeout, engine.search(query)).await {
                        Ok(result) => result,
                        Err(_) => Err(EngineError::Timeout {
                            engine: name.clone(),
                            after: timeout,
                        }),
                    }
                })
                .await;

            match outcome {
                Ok(results) => {
                    answered = true;
                    let before = merged.len();
                    for mut result in results {
                        let key = canonical_key(&result.url);
                        if seen.insert(key.clone()) {
                            result.url = key;
                            result.source = name.clone();
                            merged.push((priority, result));
                        }
                    }
                    tracing::info!(
                        engine = %name,
                        added = merged.len() - before,
                        total = merged.len(),
                        "Engine answered"
                    );
                }
                Err(CircuitBreakerError::Open { retry_after, .. }) => {
                    tracing::debug!(
                        engine = %name,
                        retry_after_secs = retry_after.as_secs(),
                        "Engine skipped, circuit open"
                    );
                    failures.push(EngineFailure {
                        engine: name,
                        reason: format!("circuit open, retry after {}s", retry_after.as_secs()),
                    });
                }
                Err(CircuitBreakerError::Inner(err)) => {
                    tracing::warn!(engine = %name, error = %err, "Engine failed");
                    failures.push(EngineFailure {
                        engine: name,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if !answered {
            return Err(SearchError::AllEnginesUnavailable {
                query: query.text.clone(),
                failures,
            });
        }

        merged.sort_by_key(|(priority, result)| (*priority, result.rank));
        let results = merged
            .into_iter()
            .take(query.count)
            .enumerate()
            .map(|(i, (_, mut result))| {
                result.position = i as u32 + 1;
                result
            })
            .collect();
        Ok(results)
    }
}
