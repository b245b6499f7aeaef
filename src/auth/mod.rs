//! Per-subscription authorization.
//!
//! Modeled as a tagged variant (`AuthMode`) dispatched by a pure function
//! (`build_auth_headers`) rather than a trait-object hierarchy: there is
//! exactly one arm per mode and no caller-extensible behavior, so a `match`
//! is simpler than a vtable.

pub mod iam;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use aws_credential_types::Credentials;
use chrono::Utc;

use crate::error::AuthError;

/// The six authorization modes AppSync subscriptions support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthMode {
    ApiKey,
    Iam,
    Oidc,
    UserPool,
    Lambda,
    None,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Resolves a bearer token for the `oidc`/`userPool` modes. The concrete
/// token-acquisition mechanism (refresh, caching, Cognito/OIDC client) is
/// an external collaborator; this crate only defines the seam.
pub trait SessionTokenProvider: Send + Sync {
    fn access_token<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<String, AuthError>> + Send + 'a>>;
}

/// Caller-supplied headers merged into every handshake/start frame, either a
/// static map or an async function of the request context.
#[derive(Clone)]
pub enum ExtraHeaders {
    Static(HashMap<String, String>),
    Async(Arc<dyn ExtraHeadersSupplier>),
}

/// Context passed to an async extra-headers supplier: the handshake URL and
/// its query string.
#[derive(Debug, Clone)]
pub struct ExtraHeadersContext {
    pub url: String,
    pub query_string: String,
}

pub trait ExtraHeadersSupplier: Send + Sync {
    fn headers<'a>(
        &'a self,
        ctx: ExtraHeadersContext,
    ) -> Pin<Box<dyn Future<Output = HashMap<String, String>> + Send + 'a>>;
}

impl ExtraHeaders {
    pub async fn resolve(&self, ctx: ExtraHeadersContext) -> HashMap<String, String> {
        match self {
            ExtraHeaders::Static(map) => map.clone(),
            ExtraHeaders::Async(supplier) => supplier.headers(ctx).await,
        }
    }
}

/// Everything `build_auth_headers` needs to produce headers for one frame.
pub struct AuthHeaderRequest<'a> {
    pub mode: AuthMode,
    pub endpoint_host: &'a str,
    pub region: Option<&'a str>,
    /// The request body to sign under `iam` (`"{}"` for the handshake,
    /// `{query,variables}` JSON for a `start` frame).
    pub payload: &'a str,
    pub canonical_uri: &'a str,
    pub api_key: Option<&'a str>,
    pub auth_token: Option<&'a str>,
    pub iam_credentials: Option<&'a Credentials>,
    pub session_provider: Option<&'a dyn SessionTokenProvider>,
    pub extra_headers: Option<&'a ExtraHeaders>,
    pub extra_headers_ctx: ExtraHeadersContext,
}

/// Builds the per-mode authorization header object.
///
/// The explicit bearer (`auth_token`) always takes precedence over any
/// `Authorization` key produced by `extra_headers`.
pub async fn build_auth_headers(
    request: AuthHeaderRequest<'_>,
) -> Result<HashMap<String, String>, AuthError> {
    let mut headers = match request.mode {
        AuthMode::ApiKey => {
            let api_key = request
                .api_key
                .ok_or(AuthError::MissingBearerToken(AuthMode::ApiKey))?;
            let mut headers = HashMap::new();
            headers.insert("host".to_string(), request.endpoint_host.to_string());
            headers.insert(
                "x-amz-date".to_string(),
                Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
            );
            headers.insert("x-api-key".to_string(), api_key.to_string());
            headers
        }
        AuthMode::Iam => {
            let credentials = request
                .iam_credentials
                .ok_or(AuthError::MissingSessionProvider(AuthMode::Iam))?;
            let region = request.region.unwrap_or("us-east-1");
            iam::sign_iam_headers(iam::IamSigningRequest {
                endpoint_host: request.endpoint_host,
                canonical_uri: request.canonical_uri,
                payload: request.payload,
                region,
                credentials,
            })?
        }
        AuthMode::Oidc | AuthMode::UserPool => {
            let provider = request
                .session_provider
                .ok_or(AuthError::MissingSessionProvider(request.mode))?;
            let token = provider.access_token().await?;
            let mut headers = HashMap::new();
            headers.insert("Authorization".to_string(), token);
            headers.insert("host".to_string(), request.endpoint_host.to_string());
            headers
        }
        AuthMode::Lambda | AuthMode::None => {
            let token = request
                .auth_token
                .ok_or(AuthError::MissingBearerToken(request.mode))?;
            let mut headers = HashMap::new();
            headers.insert("Authorization".to_string(), token.to_string());
            headers.insert("host".to_string(), request.endpoint_host.to_string());
            headers
        }
    };

    if let Some(extra_headers) = request.extra_headers {
        let extra = extra_headers.resolve(request.extra_headers_ctx.clone()).await;
        for (key, value) in extra {
            if key.eq_ignore_ascii_case("authorization") && request.auth_token.is_some() {
                // explicit bearer wins over extra-headers Authorization.
                continue;
            }
            headers.insert(key, value);
        }
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn api_key_mode_produces_required_fields() {
        let headers = build_auth_headers(AuthHeaderRequest {
            mode: AuthMode::ApiKey,
            endpoint_host: "abcdefghijklmnopqrstuvwxyz.appsync-api.us-east-1.amazonaws.com",
            region: None,
            payload: "{}",
            canonical_uri: "/connect",
            api_key: Some("FAKE"),
            auth_token: None,
            iam_credentials: None,
            session_provider: None,
            extra_headers: None,
            extra_headers_ctx: ExtraHeadersContext {
                url: String::new(),
                query_string: String::new(),
            },
        })
        .await
        .unwrap();

        assert_eq!(headers.get("x-api-key").unwrap(), "FAKE");
        assert!(headers.contains_key("host"));
        assert!(headers.contains_key("x-amz-date"));
    }

    #[tokio::test]
    async fn api_key_mode_without_key_fails() {
        let err = build_auth_headers(AuthHeaderRequest {
            mode: AuthMode::ApiKey,
            endpoint_host: "host",
            region: None,
            payload: "{}",
            canonical_uri: "/connect",
            api_key: None,
            auth_token: None,
            iam_credentials: None,
            session_provider: None,
            extra_headers: None,
            extra_headers_ctx: ExtraHeadersContext {
                url: String::new(),
                query_string: String::new(),
            },
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::MissingBearerToken(AuthMode::ApiKey)));
    }

    #[tokio::test]
    async fn lambda_mode_requires_explicit_token() {
        let err = build_auth_headers(AuthHeaderRequest {
            mode: AuthMode::Lambda,
            endpoint_host: "host",
            region: None,
            payload: "{}",
            canonical_uri: "/connect",
            api_key: None,
            auth_token: None,
            iam_credentials: None,
            session_provider: None,
            extra_headers: None,
            extra_headers_ctx: ExtraHeadersContext {
                url: String::new(),
                query_string: String::new(),
            },
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::MissingBearerToken(AuthMode::Lambda)));
    }

    #[tokio::test]
    async fn explicit_bearer_wins_over_extra_headers_authorization() {
        let mut extra = HashMap::new();
        extra.insert("Authorization".to_string(), "from-extra".to_string());
        extra.insert("x-custom".to_string(), "value".to_string());

        let headers = build_auth_headers(AuthHeaderRequest {
            mode: AuthMode::None,
            endpoint_host: "host",
            region: None,
            payload: "{}",
            canonical_uri: "/connect",
            api_key: None,
            auth_token: Some("explicit-token"),
            iam_credentials: None,
            session_provider: None,
            extra_headers: Some(&ExtraHeaders::Static(extra)),
            extra_headers_ctx: ExtraHeadersContext {
                url: String::new(),
                query_string: String::new(),
            },
        })
        .await
        .unwrap();

        assert_eq!(headers.get("Authorization").unwrap(), "explicit-token");
        assert_eq!(headers.get("x-custom").unwrap(), "value");
    }
}
