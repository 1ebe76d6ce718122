use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SearchError;
use crate::search::embedding::{prepare_text, EmbeddingProvider, RetryPolicy};

/// OpenAI embedding provider. Hits `/v1/embeddings`, which takes a batch of
/// inputs and returns one vector per input, tagged with its index.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    /// `model` is the embedding model name (e.g. `text-embedding-3-small`).
    /// `dimensions` must match the model's output dimensionality.
    pub fn new(base_url: &str, model: &str, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            model: model.to_string(),
            dimensions,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Backoff for transport errors, 429 and 5xx responses.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One request. `Err((retryable, error))` on failure.
    async fn request(&self, body: &EmbedRequest<'_>) -> Result<EmbedResponse, (bool, SearchError)> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let mut req = self.client.post(&url).json(body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| (true, SearchError::Embedding(format!("request failed: {e}"))))?;

        let status = response.status();
        if !status.is_success() {
            let retryable = status.as_u16() == 429 || status.is_server_error();
            let body = response.text().await.unwrap_or_default();
            return Err((
                retryable,
                SearchError::Embedding(format!("openai returned {status}: {body}")),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| (false, SearchError::Embedding(format!("failed to parse response: {e}"))))
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    index: usize,
    embedding: Vec<f32>,
}

/// Order vectors by their input index and check none are missing.
fn collect_embeddings(mut data: Vec<EmbedData>, expected: usize) -> Result<Vec<Vec<f32>>, SearchError> {
    if data.len() != expected {
        return Err(SearchError::Embedding(format!(
            "expected {expected} embeddings, got {}",
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| SearchError::Embedding("empty response from openai".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let body = EmbedRequest {
            model: &self.model,
            input: texts.iter().map(|t| prepare_text(t)).collect(),
        };

        let mut attempt = 0;
        loop {
            match self.request(&body).await {
                Ok(parsed) => return collect_embeddings(parsed.data, texts.len()),
                Err((true, e)) if attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    attempt += 1;
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "embedding request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err((_, e)) => return Err(e),
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `responses` in order, one per connection, and counts requests.
    async fn stub_server(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {status} STUB\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        (url, hits)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    const OK_BODY: &str = r#"{"data": [{"index": 0, "embedding": [0.5, 0.25]}]}"#;

    #[tokio::test]
    async fn retries_overload_then_succeeds() {
        let (url, hits) = stub_server(vec![
            (503, r#"{"error": "overloaded"}"#),
            (429, r#"{"error": "rate limited"}"#),
            (200, OK_BODY),
        ])
        .await;
        let embedder = OpenAiEmbedder::new(&url, "text-embedding-3-small", 2).with_retry(fast_retry(5));

        let vector = embedder.embed("rooftop bar").await.unwrap();
        assert_eq!(vector, vec![0.5, 0.25]);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let (url, hits) = stub_server(vec![(500, "{}"), (502, "{}"), (200, OK_BODY)]).await;
        let embedder = OpenAiEmbedder::new(&url, "text-embedding-3-small", 2).with_retry(fast_retry(1));

        let err = embedder.embed("rooftop bar").await.unwrap_err();
        assert!(err.to_string().contains("502"), "{err}");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (url, hits) = stub_server(vec![(400, r#"{"error": "bad input"}"#), (200, OK_BODY)]).await;
        let embedder = OpenAiEmbedder::new(&url, "text-embedding-3-small", 2).with_retry(fast_retry(5));

        assert!(embedder.embed("rooftop bar").await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn embeddings_follow_input_order() {
        let parsed: EmbedResponse = serde_json::from_str(
            r#"{"data": [{"index": 1, "embedding": [0.2]}, {"index": 0, "embedding": [0.1]}]}"#,
        )
        .unwrap();
        let out = collect_embeddings(parsed.data, 2).unwrap();
        assert_eq!(out, vec![vec![0.1], vec![0.2]]);
    }

    #[test]
    fn count_mismatch_is_an_error() {
        let err = collect_embeddings(Vec::new(), 1).unwrap_err();
        assert!(matches!(err, SearchError::Embedding(_)));
    }
}
