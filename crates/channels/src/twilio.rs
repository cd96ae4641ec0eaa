//! Twilio Messages API provider (WhatsApp and SMS).

use crate::provider::{ProviderError, SendProvider, SendRequest};
use async_trait::async_trait;
use campaign_core::config::ProviderConfig;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

pub struct TwilioProvider {
    client: reqwest::Client,
    api_base_url: String,
    account_sid: String,
    auth_token: String,
    status_callback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

impl TwilioProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        if config.account_sid.is_empty() || config.auth_token.is_empty() {
            return Err(ProviderError::Permanent(
                "twilio provider requires account_sid and auth_token".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ProviderError::Permanent(format!("http client: {e}")))?;

        info!(
            account_sid = %config.account_sid,
            api_base_url = %config.api_base_url,
            "Twilio provider initialized"
        );

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            status_callback_url: config.status_callback_url.clone(),
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base_url, self.account_sid
        )
    }

    /// Form fields for the Messages API. Requests with a content template
    /// send `ContentSid` + `ContentVariables`; others send a plain `Body`.
    fn form_params(
        &self,
        request: &SendRequest,
    ) -> Result<Vec<(&'static str, String)>, ProviderError> {
        let mut params = vec![("From", request.from.clone()), ("To", request.to.clone())];
        match &request.content_ref {
            Some(content_sid) => {
                let variables = serde_json::to_string(&request.variables)
                    .map_err(|e| ProviderError::Permanent(format!("content variables: {e}")))?;
                params.push(("ContentSid", content_sid.clone()));
                params.push(("ContentVariables", variables));
            }
            None => params.push(("Body", request.body.clone())),
        }
        if let Some(url) = &self.status_callback_url {
            params.push(("StatusCallback", url.clone()));
        }
        Ok(params)
    }
}

/// Map a non-success response onto a provider error. Throttling and server
/// errors are retryable; any other client error is a rejection.
fn classify(status: StatusCode, body: &str) -> ProviderError {
    let detail = match serde_json::from_str::<ApiError>(body) {
        Ok(ApiError {
            code: Some(code),
            message: Some(message),
        }) => format!("{message} (code {code})"),
        Ok(ApiError {
            message: Some(message),
            ..
        }) => message,
        _ => format!("HTTP {}", status.as_u16()),
    };
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Transient(detail)
    } else {
        ProviderError::Permanent(detail)
    }
}

#[async_trait]
impl SendProvider for TwilioProvider {
    async fn send(&self, request: &SendRequest) -> Result<String, ProviderError> {
        let params = self.form_params(request)?;
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }

        let message: MessageResource = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("unreadable response: {e}")))?;
        debug!(to = %request.to, sid = %message.sid, "Twilio accepted message");
        Ok(message.sid)
    }

    fn name(&self) -> &'static str {
        "twilio"
    }
}
