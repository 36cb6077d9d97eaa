use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::NotifyError;

#[derive(Debug, Serialize)]
struct MintRequest<'a> {
    #[serde(rename = "nftUri")]
    nft_uri: &'a str,
}

/// Client for the downstream minting endpoint.
pub struct MintClient {
    client: reqwest::Client,
    endpoint: String,
}

impl MintClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(NotifyError::Http)?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    /// POST `{"nftUri": url}`. Any 2xx is success; the body is ignored.
    pub async fn submit(&self, url: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&MintRequest { nft_uri: url })
            .send()
            .await
            .map_err(NotifyError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        debug!(endpoint = self.endpoint, %status, "mint request accepted");
        Ok(())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    pub(crate) type Received = Arc<Mutex<Vec<serde_json::Value>>>;

    /// Local mint endpoint answering every POST with `status`.
    pub(crate) async fn serve(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::default();
        let app = Router::new()
            .route(
                "/mintcollectionnft",
                post(
                    move |State(received): State<Received>, Json(body): Json<serde_json::Value>| async move {
                        received.lock().unwrap().push(body);
                        status
                    },
                ),
            )
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/mintcollectionnft"), received)
    }

    #[tokio::test]
    async fn posts_nft_uri_json() {
        let (endpoint, received) = serve(StatusCode::OK).await;
        let client = MintClient::new(&endpoint, Duration::from_secs(5)).unwrap();

        client
            .submit("https://fire-detector.s3.amazonaws.com/images/a_fire.jpg")
            .await
            .unwrap();

        let bodies = received.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(
            bodies[0],
            serde_json::json!({"nftUri": "https://fire-detector.s3.amazonaws.com/images/a_fire.jpg"})
        );
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (endpoint, _received) = serve(StatusCode::INTERNAL_SERVER_ERROR).await;
        let client = MintClient::new(&endpoint, Duration::from_secs(5)).unwrap();
        let err = client.submit("https://x/y.jpg").await.unwrap_err();
        assert!(matches!(err, NotifyError::Status(500)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client =
            MintClient::new(&format!("http://{addr}/mint"), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            client.submit("https://x/y.jpg").await,
            Err(NotifyError::Http(_))
        ));
    }
}
