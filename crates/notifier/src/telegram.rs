use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use chainwatch_common::retry::Attempt;
use chainwatch_common::types::Destination;

use crate::NotificationSender;
use crate::error::DeliveryError;

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    /// Forum topic; omitted from the request entirely when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Telegram Bot API sender.
///
/// Holds the bot token for its whole lifetime; nothing about the bot is
/// global state.
pub struct TelegramBotApi {
    send_url: String,
    http: reqwest::Client,
}

impl TelegramBotApi {
    /// `api_url` is normally `https://api.telegram.org`.
    pub fn new(api_url: &str, bot_token: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            send_url: format!(
                "{}/bot{}/sendMessage",
                api_url.trim_end_matches('/'),
                bot_token
            ),
            http,
        })
    }
}

#[async_trait]
impl NotificationSender for TelegramBotApi {
    async fn send(&self, destination: &Destination, text: &str) -> Attempt<(), DeliveryError> {
        let request = SendMessageRequest {
            chat_id: &destination.chat_id,
            message_thread_id: destination.topic_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let response = match self.http.post(&self.send_url).json(&request).send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => return Attempt::Permanent(DeliveryError::Http(e)),
            Err(e) => return Attempt::transient(DeliveryError::Http(e)),
        };

        let status = response.status();
        let body: Option<ApiResponse> = response.json().await.ok();

        if status.is_success() && body.as_ref().is_none_or(|b| b.ok) {
            return Attempt::Success(());
        }

        let description = body
            .as_ref()
            .and_then(|b| b.description.clone())
            .unwrap_or_else(|| status.to_string());

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = body
                .as_ref()
                .and_then(|b| b.parameters.as_ref())
                .and_then(|p| p.retry_after)
                .map(Duration::from_secs);
            return Attempt::Transient {
                error: DeliveryError::RateLimited,
                retry_after,
            };
        }

        let error = DeliveryError::Api {
            status: status.as_u16(),
            description,
        };
        if status.is_server_error() {
            Attempt::transient(error)
        } else {
            // Bad chat, missing topic, bot kicked or bad token: retrying cannot help.
            Attempt::Permanent(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123456:TEST";

    fn api(server: &MockServer) -> TelegramBotApi {
        TelegramBotApi::new(&server.uri(), TOKEN, Duration::from_secs(5)).unwrap()
    }

    fn send_path() -> String {
        format!("/bot{}/sendMessage", TOKEN)
    }

    #[tokio::test]
    async fn test_send_with_topic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(send_path()))
            .and(body_partial_json(json!({
                "chat_id": "-1001",
                "message_thread_id": 42,
                "text": "hello",
                "parse_mode": "HTML"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let result = api(&server)
            .send(&Destination::new("-1001", Some(42)), "hello")
            .await;
        assert!(matches!(result, Attempt::Success(())));
    }

    #[tokio::test]
    async fn test_topic_omitted_when_absent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(send_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let result = api(&server).send(&Destination::new("77", None), "hi").await;
        assert!(matches!(result, Attempt::Success(())));

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["chat_id"], "77");
        assert!(body.get("message_thread_id").is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "ok": false,
                "error_code": 429,
                "description": "Too Many Requests: retry after 3",
                "parameters": {"retry_after": 3}
            })))
            .mount(&server)
            .await;

        match api(&server).send(&Destination::new("1", None), "x").await {
            Attempt::Transient {
                error: DeliveryError::RateLimited,
                retry_after,
            } => assert_eq!(retry_after, Some(Duration::from_secs(3))),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_not_found_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        match api(&server).send(&Destination::new("1", None), "x").await {
            Attempt::Permanent(DeliveryError::Api { status, description }) => {
                assert_eq!(status, 400);
                assert!(description.contains("chat not found"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        assert!(matches!(
            api(&server).send(&Destination::new("1", None), "x").await,
            Attempt::Transient {
                error: DeliveryError::Api { status: 502, .. },
                retry_after: None
            }
        ));
    }

    #[tokio::test]
    async fn test_ok_false_on_success_status_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": false,
                "description": "message thread not found"
            })))
            .mount(&server)
            .await;

        assert!(matches!(
            api(&server).send(&Destination::new("1", Some(9)), "x").await,
            Attempt::Permanent(DeliveryError::Api { status: 200, .. })
        ));
    }
}
