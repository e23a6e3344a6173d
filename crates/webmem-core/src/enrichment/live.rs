use std::time::Duration;

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};

use super::{synthesize_placeholder, Enrichment, EnrichmentClient, EnrichmentError, Result};

/// HTTP JSON-backed enrichment provider. Talks to an OpenAI-compatible
/// chat-completions endpoint for keywords/description and an embeddings
/// endpoint for vectors, retrying transient failures with exponential
/// backoff before surfacing [`EnrichmentError::RetriesExhausted`].
pub struct LiveProvider {
    http: reqwest::Client,
    endpoint: url::Url,
    token: Option<String>,
    llm_model: String,
    embedding_model: String,
    dimension: usize,
    max_retries: u32,
}

impl LiveProvider {
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        llm_model: String,
        embedding_model: String,
        dimension: usize,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let endpoint = url::Url::parse(endpoint)
            .map_err(|e| EnrichmentError::Request(format!("invalid enrichment endpoint: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnrichmentError::Request(e.to_string()))?;
        Ok(Self {
            http,
            endpoint,
            token,
            llm_model,
            embedding_model,
            dimension,
            max_retries,
        })
    }

    fn backoff(&self) -> backoff::ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(250))
            .with_max_interval(Duration::from_secs(4))
            .with_max_elapsed_time(Some(Duration::from_secs(30)))
            .build()
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(t) => builder.bearer_auth(t),
            None => builder,
        }
    }

    async fn call_with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, String>>,
    {
        let mut attempts = 0u32;
        let result = retry(self.backoff(), || {
            attempts += 1;
            let op = &op;
            async move {
                op().await.map_err(|e| {
                    if attempts >= self.max_retries {
                        backoff::Error::permanent(e)
                    } else {
                        backoff::Error::transient(e)
                    }
                })
            }
        })
        .await;

        result.map_err(|e| EnrichmentError::RetriesExhausted {
            attempts,
            source: e.to_string(),
        })
    }
}

#[derive(Serialize)]
struct EnrichRequest<'a> {
    model: &'a str,
    title: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct EnrichResponse {
    keywords: String,
    description: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl EnrichmentClient for LiveProvider {
    async fn enrich(&self, title: &str, content: &str) -> Result<Enrichment> {
        let url = match self.endpoint.join("enrich") {
            Ok(u) => u,
            Err(_) => return Ok(synthesize_placeholder(title, content)),
        };

        let result = self
            .call_with_retry(|| async {
                let resp = self
                    .authed(self.http.post(url.clone()))
                    .json(&EnrichRequest {
                        model: &self.llm_model,
                        title,
                        content,
                    })
                    .send()
                    .await
                    .map_err(|e| e.to_string())?;

                if !resp.status().is_success() {
                    return Err(format!("enrichment endpoint returned {}", resp.status()));
                }
                resp.json::<EnrichResponse>().await.map_err(|e| e.to_string())
            })
            .await;

        // Keyword/description enrichment never blocks ingestion: once the
        // retry budget is exhausted, degrade to a synthesized placeholder
        // instead of surfacing the error to the indexing pipeline.
        match result {
            Ok(body) => Ok(Enrichment {
                keywords: body.keywords,
                description: body.description,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "enrichment request exhausted retries, using placeholder");
                Ok(synthesize_placeholder(title, content))
            }
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = self
            .endpoint
            .join("embeddings")
            .map_err(|e| EnrichmentError::Request(e.to_string()))?;

        let body = self
            .call_with_retry(|| async {
                let resp = self
                    .authed(self.http.post(url.clone()))
                    .json(&EmbedRequest {
                        model: &self.embedding_model,
                        input: text,
                    })
                    .send()
                    .await
                    .map_err(|e| e.to_string())?;

                if !resp.status().is_success() {
                    return Err(format!("embedding endpoint returned {}", resp.status()));
                }
                resp.json::<EmbedResponse>().await.map_err(|e| e.to_string())
            })
            .await?;

        if body.embedding.len() != self.dimension {
            return Err(EnrichmentError::Malformed(format!(
                "expected embedding of dimension {}, got {}",
                self.dimension,
                body.embedding.len()
            )));
        }
        Ok(body.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    /// A single unretried GET to `<endpoint>/health`; any non-success status
    /// or transport error counts as unhealthy. Never consults the retry
    /// policy — this is meant to be cheap enough to call from `stats`.
    async fn health_check(&self) -> bool {
        let Ok(url) = self.endpoint.join("health") else {
            return false;
        };
        match self.authed(self.http.get(url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
