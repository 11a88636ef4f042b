//! Token endpoint calls
//!
//! The authorization code grant is a plain form POST so the endpoint's error
//! body reaches the user verbatim. The refresh grant goes through `oauth2`.

use anyhow::{anyhow, Context, Result};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthType, AuthUrl, ClientId, ClientSecret, RedirectUrl, RefreshToken, RequestTokenError,
    Scope, TokenResponse as _, TokenUrl,
};
use serde::Deserialize;

use super::{AuthConfig, AuthError};

/// Token endpoint payload. Every field is optional; callers decide what is
/// required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub token_type: Option<String>,
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    http: &reqwest::Client,
    auth: &AuthConfig,
    code: &str,
) -> Result<TokenResponse> {
    let url = auth.token_endpoint();
    let scope = auth.scope();
    let params = [
        ("client_id", auth.client_id.as_str()),
        ("client_secret", auth.client_secret.as_str()),
        ("code", code),
        ("redirect_uri", auth.redirect_uri.as_str()),
        ("grant_type", "authorization_code"),
        ("scope", scope.as_str()),
    ];

    tracing::debug!("Token POST {}", url);

    let resp = http
        .post(&url)
        .form(&params)
        .send()
        .await
        .with_context(|| format!("Token POST {} failed", url))?;

    let resp = check_response(resp).await?;
    resp.json()
        .await
        .context("Failed to parse token response")
}

/// Check the token endpoint status and surface the body on failure.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        tracing::error!("Token request failed: HTTP {}", status);
        tracing::error!("Response body: {}", body);
        return Err(AuthError::TokenEndpoint {
            status: status.as_u16(),
            body,
        }
        .into());
    }
    Ok(resp)
}

/// Build the OAuth2 client from an AuthConfig
fn build_client(auth: &AuthConfig) -> Result<BasicClient> {
    let auth_url = AuthUrl::new(auth.authorize_endpoint())?;
    let token_url = TokenUrl::new(auth.token_endpoint())?;
    let redirect_url = RedirectUrl::new(auth.redirect_uri.clone())?;

    Ok(BasicClient::new(
        ClientId::new(auth.client_id.clone()),
        Some(ClientSecret::new(auth.client_secret.clone())),
        auth_url,
        Some(token_url),
    )
    .set_auth_type(AuthType::RequestBody)
    .set_redirect_uri(redirect_url))
}

/// Run an `oauth2` request through our (proxied) reqwest client.
async fn send(
    http: &reqwest::Client,
    request: oauth2::HttpRequest,
) -> Result<oauth2::HttpResponse, reqwest::Error> {
    let response = http
        .request(request.method, request.url.as_str())
        .headers(request.headers)
        .body(request.body)
        .send()
        .await?;

    let status_code = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    Ok(oauth2::HttpResponse {
        status_code,
        headers,
        body,
    })
}

/// Exchange a stored refresh token for a fresh token pair.
pub async fn refresh_tokens(
    http: &reqwest::Client,
    auth: &AuthConfig,
    refresh_token: &str,
) -> Result<TokenResponse> {
    let client = build_client(auth)?;

    let refresh_token = RefreshToken::new(refresh_token.to_string());
    let mut request = client.exchange_refresh_token(&refresh_token);
    for scope in &auth.scopes {
        request = request.add_scope(Scope::new(scope.clone()));
    }

    let token_response = request
        .request_async(|req| send(http, req))
        .await
        .map_err(|e| match e {
            RequestTokenError::ServerResponse(resp) => {
                anyhow!("Token endpoint rejected the refresh token: {}", resp)
            }
            other => anyhow::Error::new(other).context("Failed to refresh token"),
        })?;

    Ok(TokenResponse {
        access_token: Some(token_response.access_token().secret().to_string()),
        refresh_token: token_response
            .refresh_token()
            .map(|t| t.secret().to_string()),
        expires_in: token_response.expires_in().map(|d| d.as_secs()),
        token_type: None,
    })
}
