//! Batched HTTP client for the external anomaly scorer.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{NetwatchError, Result};
use crate::features::{vector_to_event, FeatureVector};

/// Client for the scorer's `/batch-score` endpoint. Vectors are sent in
/// bounded batches to respect the service's request-size limit; batching
/// never affects scoring since each vector is scored independently.
pub struct ScorerClient {
    base_url: String,
    batch_size: usize,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct BatchScoreResponse {
    scores: Vec<f64>,
}

impl ScorerClient {
    pub fn new(base_url: impl Into<String>, batch_size: usize, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NetwatchError::ScorerUnavailable(e.to_string()))?;
        Ok(Self::with_http_client(base_url, batch_size, http))
    }

    /// Client with a caller-supplied `reqwest::Client` (used by tests with
    /// a mock server).
    pub fn with_http_client(
        base_url: impl Into<String>,
        batch_size: usize,
        http: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            batch_size: batch_size.max(1),
            http,
        }
    }

    /// Score every vector, preserving input order across batch boundaries.
    pub async fn score_all(&self, vectors: &[FeatureVector]) -> Result<Vec<f64>> {
        let mut scores = Vec::with_capacity(vectors.len());
        for batch in vectors.chunks(self.batch_size) {
            scores.extend(self.score_batch(batch).await?);
        }
        Ok(scores)
    }

    async fn score_batch(&self, batch: &[FeatureVector]) -> Result<Vec<f64>> {
        let events: Vec<_> = batch.iter().map(vector_to_event).collect();
        let url = format!("{}/batch-score", self.base_url);
        debug!(url = %url, events = events.len(), "scoring batch");

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "events": events }))
            .send()
            .await
            .map_err(|e| NetwatchError::ScorerUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetwatchError::ScorerUnavailable(format!(
                "batch-score returned status {status}"
            )));
        }

        let body: BatchScoreResponse = response
            .json()
            .await
            .map_err(|e| NetwatchError::ScorerUnavailable(format!("invalid response: {e}")))?;

        if body.scores.len() != batch.len() {
            return Err(NetwatchError::ScorerUnavailable(format!(
                "score count mismatch: sent {} events, got {} scores",
                batch.len(),
                body.scores.len()
            )));
        }
        Ok(body.scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_COUNT;

    fn vector_of(value: f64) -> FeatureVector {
        [value; FEATURE_COUNT]
    }

    #[tokio::test]
    async fn batches_preserve_input_order() {
        let mut server = mockito::Server::new_async().await;
        // 100 vectors at batch size 40 -> 3 requests of 40/40/20.
        let mock = server
            .mock("POST", "/batch-score")
            .match_request(|req| {
                let body: serde_json::Value = serde_json::from_slice(req.body().unwrap()).unwrap();
                let events = body["events"].as_array().unwrap();
                events.len() == 40 || events.len() == 20
            })
            .with_status(200)
            .with_body_from_request(|req| {
                let body: serde_json::Value = serde_json::from_slice(req.body().unwrap()).unwrap();
                let scores: Vec<f64> = body["events"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|e| e["flow_duration"].as_f64().unwrap())
                    .collect();
                serde_json::json!({ "scores": scores }).to_string().into()
            })
            .expect(3)
            .create_async()
            .await;

        let client =
            ScorerClient::with_http_client(server.url(), 40, reqwest::Client::new());
        let vectors: Vec<_> = (0..100).map(|i| vector_of(i as f64)).collect();
        let scores = client.score_all(&vectors).await.unwrap();

        mock.assert_async().await;
        assert_eq!(scores.len(), 100);
        for (i, score) in scores.iter().enumerate() {
            assert_eq!(*score, i as f64, "score out of order at index {i}");
        }
    }

    #[tokio::test]
    async fn server_error_is_scorer_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/batch-score")
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;

        let client = ScorerClient::with_http_client(server.url(), 10, reqwest::Client::new());
        let err = client.score_all(&[vector_of(1.0)]).await.unwrap_err();
        assert!(matches!(err, NetwatchError::ScorerUnavailable(_)));
    }

    #[tokio::test]
    async fn score_count_mismatch_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/batch-score")
            .with_status(200)
            .with_body(r#"{"scores": [0.1]}"#)
            .create_async()
            .await;

        let client = ScorerClient::with_http_client(server.url(), 10, reqwest::Client::new());
        let err = client
            .score_all(&[vector_of(1.0), vector_of(2.0)])
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("mismatch"), "unexpected error: {message}");
    }

    #[tokio::test]
    async fn unreachable_scorer_is_scorer_unavailable() {
        // Nothing listens on this port.
        let client = ScorerClient::with_http_client(
            "http://127.0.0.1:1",
            10,
            reqwest::Client::new(),
        );
        let err = client.score_all(&[vector_of(1.0)]).await.unwrap_err();
        assert!(matches!(err, NetwatchError::ScorerUnavailable(_)));
    }

    #[test]
    fn trailing_slash_normalized() {
        let client = ScorerClient::with_http_client(
            "http://scorer.internal:8000/",
            10,
            reqwest::Client::new(),
        );
        assert_eq!(client.base_url, "http://scorer.internal:8000");
    }
}
