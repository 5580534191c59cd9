//! HTTPS client for the Duo Auth API v2.

use std::time::Duration;

use protocol::messages::{self, AuthResult, ProviderResponse};
use protocol::signing::{self, Credentials, Params};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, DATE};

use super::{Approval, PushAuthError, PushAuthenticator, Step};
use crate::config::PushAuthConfig;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Push-auth client for one provider account and principal.
#[derive(Debug, Clone)]
pub struct DuoClient {
    http: reqwest::Client,
    host: String,
    base_url: String,
    credentials: Credentials,
    username: String,
    push_timeout: Duration,
}

impl DuoClient {
    /// Builds a client for `https://<host>`.
    pub fn new(config: &PushAuthConfig) -> Result<Self, PushAuthError> {
        if !config.is_configured() {
            return Err(PushAuthError::NotConfigured);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("usb2fa/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(PushAuthError::Client)?;

        Ok(Self {
            http,
            host: config.host.to_lowercase(),
            base_url: format!("https://{}", config.host),
            credentials: Credentials {
                integration_key: config.integration_key.clone(),
                secret_key: config.secret_key.clone(),
            },
            username: config.username.clone(),
            push_timeout: Duration::from_secs(config.push_timeout_secs),
        })
    }

    /// Sends requests to `base_url` instead of `https://<host>`.
    ///
    /// Signatures still cover the configured host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Step 1: unauthenticated liveness probe.
    pub async fn ping(&self) -> Result<ProviderResponse, PushAuthError> {
        self.call(Step::Ping, &Params::new(), false).await
    }

    /// Step 2: signed probe validating the credentials.
    pub async fn check(&self) -> Result<ProviderResponse, PushAuthError> {
        self.call(Step::Check, &Params::new(), true).await
    }

    /// Step 3: confirms the principal can receive a push.
    pub async fn preauth(&self) -> Result<ProviderResponse, PushAuthError> {
        self.call(Step::Preauth, &messages::preauth_params(&self.username), true)
            .await
    }

    /// Step 4: sends the push and waits for the answer.
    pub async fn push(&self, description: &str) -> Result<AuthResult, PushAuthError> {
        let params = messages::push_params(&self.username, description);
        let response = self.call(Step::Auth, &params, true).await?;
        response.auth_result().ok_or_else(|| PushAuthError::Malformed {
            step: Step::Auth,
            reason: "missing response.result".to_string(),
        })
    }

    /// Runs all four steps in order, stopping at the first failure.
    pub async fn handshake(&self, description: &str) -> Result<AuthResult, PushAuthError> {
        self.ping().await?;
        self.check().await?;
        self.preauth().await?;
        self.push(description).await
    }

    async fn call(
        &self,
        step: Step,
        params: &Params,
        signed: bool,
    ) -> Result<ProviderResponse, PushAuthError> {
        let method = step.method();
        let encoded = signing::encode_params(params);
        let mut url = format!("{}{}", self.base_url, step.path());

        let mut request = if method == "POST" {
            self.http
                .post(&url)
                .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                .body(encoded)
        } else {
            if !encoded.is_empty() {
                url.push('?');
                url.push_str(&encoded);
            }
            self.http.get(&url)
        };

        // The push blocks until the approver answers.
        if step == Step::Auth {
            request = request.timeout(self.push_timeout);
        }

        if signed {
            let headers =
                signing::sign(&self.credentials, method, &self.host, step.path(), params)?;
            request = request
                .header(DATE, headers.date)
                .header(AUTHORIZATION, headers.authorization);
        }

        tracing::debug!("Push-auth {}: {} {}", step, method, url);

        let response = request.send().await.map_err(|e| http_error(step, e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| http_error(step, e))?;

        if !status.is_success() {
            let detail = ProviderResponse::from_json(&body)
                .map(|r| r.failure_summary())
                .unwrap_or_else(|_| body.chars().take(200).collect());
            return Err(PushAuthError::Status {
                step,
                status: status.as_u16(),
                detail,
            });
        }

        let parsed = ProviderResponse::from_json(&body).map_err(|e| PushAuthError::Malformed {
            step,
            reason: e.to_string(),
        })?;

        if !parsed.is_ok() {
            tracing::debug!("Push-auth {} failed: {}", step, parsed.failure_summary());
            return Err(PushAuthError::BadStat {
                step,
                stat: parsed.stat,
            });
        }

        tracing::debug!("Push-auth {}: {}", step, parsed.stat);
        Ok(parsed)
    }
}

fn http_error(step: Step, source: reqwest::Error) -> PushAuthError {
    if source.is_timeout() {
        PushAuthError::Timeout { step }
    } else {
        PushAuthError::Http { step, source }
    }
}

impl PushAuthenticator for DuoClient {
    async fn authorize(&self, description: &str) -> Approval {
        match self.handshake(description).await {
            Ok(result) if result.is_allow() => {
                tracing::info!("Push approved for \"{}\"", description);
                Approval::Approved
            }
            Ok(result) => {
                let reason = match &result.status_msg {
                    Some(msg) => format!("{} ({})", result.result, msg),
                    None => result.result.clone(),
                };
                tracing::warn!("Push not approved for \"{}\": {}", description, reason);
                Approval::Denied { reason }
            }
            Err(e) => {
                tracing::warn!("Push-auth handshake for \"{}\" failed: {}", description, e);
                Approval::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }
}
