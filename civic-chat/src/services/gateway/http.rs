//! HTTP client for the hosted gateway function.
//!
//! Supports both streaming and non-streaming responses.

use super::{Gateway, GatewayError, GatewayRequest, GatewayResponse, GatewayStream};
use crate::config::{BackendConfig, GatewaySettings};
use crate::services::sse::{SseDecoder, StreamEvent};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Gateway reached over HTTPS.
pub struct HttpGateway {
    client: Client,
    endpoint: String,
    anon_key: Secret<String>,
    bearer: Secret<String>,
    settings: GatewaySettings,
}

impl HttpGateway {
    pub fn new(backend: &BackendConfig, settings: GatewaySettings) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| {
                GatewayError::NotConfigured(format!("Failed to create HTTP client: {}", e))
            })?;

        if backend.functions_url.trim().is_empty() {
            return Err(GatewayError::NotConfigured(
                "Functions URL not configured".to_string(),
            ));
        }

        let endpoint = format!(
            "{}/{}",
            backend.functions_url.trim_end_matches('/'),
            settings.function_name
        );
        let bearer = backend
            .access_token
            .clone()
            .unwrap_or_else(|| backend.anon_key.clone());

        Ok(Self {
            client,
            endpoint,
            anon_key: backend.anon_key.clone(),
            bearer,
            settings,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fill in the configured model and flags the caller left unset.
    fn prepare(&self, request: &GatewayRequest, stream: bool) -> GatewayRequest {
        let mut request = request.clone();
        request.stream = stream;
        if request.model.is_none() {
            request.model = Some(self.settings.model.clone());
        }
        if request.fast_mode.is_none() && self.settings.fast_mode {
            request.fast_mode = Some(true);
        }
        if request.enhance_with_nys_data.is_none() {
            request.enhance_with_nys_data = Some(self.settings.enhance_with_nys_data);
        }
        request
    }

    async fn post(&self, body: &GatewayRequest) -> Result<reqwest::Response, GatewayError> {
        body.check()?;

        tracing::debug!(
            endpoint = %self.endpoint,
            request_type = ?body.request_type,
            stream = body.stream,
            prompt_len = body.prompt.len(),
            context_len = body.context.previous_messages.len(),
            "Sending request to gateway"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.bearer.expose_secret())
            .header("apikey", self.anon_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(GatewayError::RateLimited);
            }

            return Err(GatewayError::ApiError {
                status: status.as_u16(),
                body: error_text,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn complete(&self, request: &GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let body = self.prepare(request, false);
        let response = self.post(&body).await?;

        response.json::<GatewayResponse>().await.map_err(|e| GatewayError::ApiError {
            status: 200,
            body: format!("Failed to parse response: {}", e),
        })
    }

    async fn stream(
        &self,
        request: &GatewayRequest,
        cancel: CancellationToken,
    ) -> Result<GatewayStream, GatewayError> {
        let body = self.prepare(request, true);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            response = self.post(&body) => response?,
        };

        let (tx, rx) = mpsc::channel(32);

        // Dropping `bytes` on exit aborts the HTTP request.
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            loop {
                let chunk = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!("Gateway stream cancelled by caller");
                        return;
                    }
                    chunk = bytes.next() => chunk,
                };

                match chunk {
                    Some(Ok(chunk)) => {
                        for event in decoder.push(&chunk) {
                            let done = event == StreamEvent::Done;
                            if tx.send(Ok(event)).await.is_err() || done {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Err(GatewayError::NetworkError(e.to_string()))).await;
                        return;
                    }
                    None => break,
                }
            }

            for event in decoder.finish() {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
            if !decoder.is_finished() {
                let _ = tx.send(Ok(StreamEvent::Done)).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)) as GatewayStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::{GatewayContext, RequestType};

    fn backend(url: &str) -> BackendConfig {
        BackendConfig {
            rest_url: "http://localhost/rest/v1".to_string(),
            functions_url: url.to_string(),
            anon_key: Secret::new("anon".to_string()),
            access_token: None,
        }
    }

    #[test]
    fn endpoint_joins_function_name() {
        let gateway =
            HttpGateway::new(&backend("http://localhost/functions/v1/"), GatewaySettings::default())
                .unwrap();
        assert_eq!(
            gateway.endpoint(),
            "http://localhost/functions/v1/generate-with-openai"
        );
    }

    #[test]
    fn missing_functions_url_is_not_configured() {
        let result = HttpGateway::new(&backend(" "), GatewaySettings::default());
        assert!(matches!(result, Err(GatewayError::NotConfigured(_))));
    }

    #[test]
    fn prepare_fills_configured_defaults() {
        let settings = GatewaySettings {
            fast_mode: true,
            ..GatewaySettings::default()
        };
        let gateway =
            HttpGateway::new(&backend("http://localhost/functions/v1"), settings).unwrap();

        let mut request = GatewayRequest::new("Hi", RequestType::Chat, GatewayContext::default());
        request.model = Some("claude-sonnet-4-5-20250929".to_string());

        let prepared = gateway.prepare(&request, true);
        assert!(prepared.stream);
        assert_eq!(prepared.model.as_deref(), Some("claude-sonnet-4-5-20250929"));
        assert_eq!(prepared.fast_mode, Some(true));
        assert_eq!(prepared.enhance_with_nys_data, Some(true));
    }
}
