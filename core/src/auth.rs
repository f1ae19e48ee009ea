//! Password-grant login against the OAuth token endpoint.
//!
//! # Design
//! Split like the data calls: `build_token_request` produces an
//! `HttpRequest`, `parse_token_response` consumes the `HttpResponse`, and
//! `authenticate` runs the round-trip through a [`Transport`]. No retry
//! happens here; the execution loop owns retry policy.

use reqwest::Url;
use serde::Deserialize;

use crate::config::Credentials;
use crate::error::ApiError;
use crate::http::{BodyMode, HttpMethod, HttpRequest, HttpResponse, ResponseBody};
use crate::transport::Transport;
use crate::url::encode_query;

pub const TOKEN_PATH: &str = "/services/oauth2/token";

/// Access token plus the tenant host every data call goes to.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenBundle {
    pub access_token: String,
    pub instance_host: String,
}

impl std::fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBundle")
            .field("access_token", &"<redacted>")
            .field("instance_host", &self.instance_host)
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}

pub fn build_token_request(credentials: &Credentials) -> HttpRequest {
    let password = format!("{}{}", credentials.password, credentials.credential);
    let query = encode_query(&[
        ("grant_type", "password"),
        ("client_id", &credentials.client_id),
        ("client_secret", &credentials.client_secret),
        ("username", &credentials.username),
        ("password", &password),
        ("format", "json"),
    ]);
    HttpRequest {
        method: HttpMethod::Post,
        host: credentials.login_host.clone(),
        path: format!("{TOKEN_PATH}?{query}"),
        headers: vec![("Content-Length".to_string(), "0".to_string())],
        body: None,
    }
}

pub fn parse_token_response(response: HttpResponse) -> Result<TokenBundle, ApiError> {
    if !(200..=299).contains(&response.status) {
        return Err(ApiError::auth(false, format!("invalid login: {}", response.status)));
    }
    let ResponseBody::Buffered(bytes) = response.body else {
        return Err(ApiError::auth(false, "token response was not buffered"));
    };
    let token: TokenResponse =
        serde_json::from_slice(&bytes).map_err(|e| ApiError::auth(false, format!("unreadable token response: {e}")))?;
    let instance_host = instance_authority(&token.instance_url)?;
    Ok(TokenBundle {
        access_token: token.access_token,
        instance_host,
    })
}

/// Host of `instance_url`, with the port when one is given explicitly.
fn instance_authority(instance_url: &str) -> Result<String, ApiError> {
    let url = Url::parse(instance_url).map_err(|e| ApiError::auth(false, format!("bad instance_url {instance_url:?}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| ApiError::auth(false, format!("instance_url {instance_url:?} has no host")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Exchange `credentials` for a token bundle.
pub async fn authenticate<T>(transport: &T, credentials: &Credentials) -> Result<TokenBundle, ApiError>
where
    T: Transport + ?Sized,
{
    let request = build_token_request(credentials);
    let response = transport.send(request, BodyMode::Buffered).await?;
    parse_token_response(response)
}
