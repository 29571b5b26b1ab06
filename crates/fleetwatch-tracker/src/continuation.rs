//! The outbound "keep tracking these vessels" request.

use std::time::Duration;

use async_trait::async_trait;
use fleetwatch_core::Imo;
use tracing::info;

use crate::error::TrackerError;

/// Receives the final IMO set of a tracking session.
#[async_trait]
pub trait ContinuationSink: Send + Sync {
    async fn send(&self, imos: &[Imo]) -> Result<(), TrackerError>;
}

/// POSTs the IMO list as a JSON array to an upstream tracker.
pub struct HttpContinuation {
    client: reqwest::Client,
    url: String,
}

impl HttpContinuation {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackerError::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ContinuationSink for HttpContinuation {
    async fn send(&self, imos: &[Imo]) -> Result<(), TrackerError> {
        let response = self
            .client
            .post(&self.url)
            .json(imos)
            .send()
            .await
            .map_err(|e| TrackerError::DownstreamCallFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::DownstreamCallFailed(format!(
                "{} responded {status}",
                self.url
            )));
        }
        Ok(())
    }
}

/// Used when no upstream is configured: the request is only logged.
pub struct LogContinuation;

#[async_trait]
impl ContinuationSink for LogContinuation {
    async fn send(&self, imos: &[Imo]) -> Result<(), TrackerError> {
        info!(imos = ?imos, "continuation request (no upstream configured)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;

    type Received = Arc<Mutex<Vec<Vec<Imo>>>>;

    async fn upstream(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::default();
        let app = Router::new()
            .route(
                "/track",
                post(
                    move |State(received): State<Received>, Json(imos): Json<Vec<Imo>>| async move {
                        received.lock().push(imos);
                        status
                    },
                ),
            )
            .with_state(Arc::clone(&received));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        (format!("http://{addr}/track"), received)
    }

    #[tokio::test]
    async fn http_continuation_posts_json_array() {
        let (url, received) = upstream(StatusCode::OK).await;
        let sink = HttpContinuation::new(url, Duration::from_secs(5)).unwrap();

        sink.send(&[Imo(9074729), Imo(42)]).await.unwrap();

        assert_eq!(*received.lock(), vec![vec![Imo(9074729), Imo(42)]]);
    }

    #[tokio::test]
    async fn http_continuation_maps_error_status() {
        let (url, _received) = upstream(StatusCode::BAD_GATEWAY).await;
        let sink = HttpContinuation::new(url, Duration::from_secs(5)).unwrap();

        let err = sink.send(&[Imo(1)]).await.unwrap_err();
        assert!(matches!(err, TrackerError::DownstreamCallFailed(_)));
        assert!(err.to_string().contains("502"), "got: {err}");
    }

    #[tokio::test]
    async fn http_continuation_maps_transport_error() {
        let sink = HttpContinuation::new("http://127.0.0.1:9/track", Duration::from_secs(2)).unwrap();
        let err = sink.send(&[Imo(1)]).await.unwrap_err();
        assert_eq!(err.error_kind(), "downstream_call_failed");
    }

    #[tokio::test]
    async fn log_continuation_always_succeeds() {
        assert!(LogContinuation.send(&[Imo(5)]).await.is_ok());
    }
}
