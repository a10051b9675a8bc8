use async_trait::async_trait;
use futures_util::{future, SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use crate::collaborators::{FeedStream, FeedTransport};
use crate::error::AppError;

/// Market data feed over WebSocket. One connection per subscription; no
/// reconnection here, that is the caller's decision.
#[derive(Debug, Clone)]
pub struct UpstoxWsClient {
    url: String,
    mode: String,
}

impl UpstoxWsClient {
    pub fn new(ws_url: &str) -> Self {
        Self {
            url: ws_url.to_string(),
            mode: "ltpc".to_string(),
        }
    }

    pub fn subscribe_frame(&self, instrument_key: &str) -> String {
        json!({
            "guid": uuid::Uuid::new_v4().to_string(),
            "method": "sub",
            "data": {
                "mode": self.mode,
                "instrumentKeys": [instrument_key],
            }
        })
        .to_string()
    }
}

#[async_trait]
impl FeedTransport for UpstoxWsClient {
    async fn subscribe(&self, instrument_key: &str, credential: &str) -> Result<FeedStream, AppError> {
        let mut request = self.url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential))
            .map_err(|e| AppError::Connection(format!("invalid credential header: {}", e)))?;
        request.headers_mut().insert("Authorization", bearer);

        tracing::info!(url = %self.url, instrument_key, "Connecting to market feed");
        let (mut ws_stream, _resp) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| AppError::Connection(format!("WebSocket connect failed: {}", e)))?;

        ws_stream
            .send(tungstenite::Message::Binary(
                self.subscribe_frame(instrument_key).into_bytes(),
            ))
            .await
            .map_err(|e| AppError::Connection(format!("subscribe send failed: {}", e)))?;
        tracing::info!(instrument_key, "Market feed subscribed");

        let stream = ws_stream.filter_map(|msg| {
            let item = match msg {
                Ok(tungstenite::Message::Text(text)) => Some(Ok(text)),
                Ok(tungstenite::Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        tracing::debug!("Ignoring non UTF-8 binary frame");
                        None
                    }
                },
                // tokio-tungstenite answers pings itself
                Ok(_) => None,
                Err(e) => Some(Err(AppError::Connection(format!("WebSocket read error: {}", e)))),
            };
            future::ready(item)
        });
        Ok(stream.boxed())
    }
}
