//! IAM/SIGV4 header construction.
//!
//! AppSync's IAM auth mode signs a synthetic HTTP request, not the real
//! WebSocket upgrade: a `POST` built from the endpoint, a fixed
//! `canonicalUri`, and the payload the caller wants authorized (`"{}"` for
//! the handshake itself, `{query,variables}` for each `start` frame), and
//! forwards the resulting signature headers as the `authorization` object.

use std::collections::HashMap;
use std::time::SystemTime;

use aws_credential_types::Credentials;
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;

use crate::error::AuthError;

const APPSYNC_REALTIME_SERVICE: &str = "appsync";

/// Inputs required to sign the synthetic request.
pub struct IamSigningRequest<'a> {
    pub endpoint_host: &'a str,
    pub canonical_uri: &'a str,
    pub payload: &'a str,
    pub region: &'a str,
    pub credentials: &'a Credentials,
}

/// Signs a synthetic `POST {endpoint}{canonical_uri}` request with the
/// AppSync realtime headers fixed by the protocol, returning the signed
/// header map.
pub fn sign_iam_headers(request: IamSigningRequest<'_>) -> Result<HashMap<String, String>, AuthError> {
    let url = format!("https://{}{}", request.endpoint_host, request.canonical_uri);

    let identity = request.credentials.clone().into();
    let signing_params = v4::SigningParams::builder()
        .identity(&identity)
        .region(request.region)
        .name(APPSYNC_REALTIME_SERVICE)
        .time(SystemTime::now())
        .settings(SigningSettings::default())
        .build()
        .map_err(|e| AuthError::SigningFailure(e.to_string()))?
        .into();

    let signable_request = SignableRequest::new(
        "POST",
        &url,
        std::iter::once(("accept", "application/json"))
            .chain(std::iter::once(("content-encoding", "amz-1.0")))
            .chain(std::iter::once(("content-type", "application/json; charset=UTF-8"))),
        SignableBody::Bytes(request.payload.as_bytes()),
    )
    .map_err(|e| AuthError::SigningFailure(e.to_string()))?;

    let (signing_instructions, _signature) =
        sign(signable_request, &signing_params).map_err(|e| AuthError::SigningFailure(e.to_string()))?
            .into_parts();

    let mut headers = HashMap::new();
    headers.insert("host".to_string(), request.endpoint_host.to_string());
    for (name, value) in signing_instructions.headers() {
        headers.insert(
            name.to_string(),
            value
                .to_str()
                .map_err(|e| AuthError::SigningFailure(e.to_string()))?
                .to_string(),
        );
    }

    Ok(headers)
}
