//! Browser-mediated OIDC login flow.
//!
//! A CLI that cannot host a browser starts a pending login here, hands the
//! returned URL to the user's browser, and polls until the callback has
//! deposited an ID token:
//!
//! - `POST /api/auth/login`: start a pending login, returns the auth URL
//! - `GET /api/auth/authorize?session=ID`: 302 to the provider
//! - `GET|POST /api/auth/callback`: code exchange, renders an HTML page
//! - `GET /api/auth/poll?session=ID`: single-use token pickup

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Query};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, warn};
use url::Url;

use crate::auth::Verifier;
use crate::config::RelaySettings;
use crate::relay::AuthSessionStore;

// --- PKCE helpers ---

fn generate_code_verifier() -> String {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

// --- Request/Response types ---

#[derive(Debug, Deserialize)]
struct LoginRequest {
    provider: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    session_id: String,
    auth_url: String,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    #[serde(default)]
    session: String,
}

/// Callback parameters, from either the query string (GET) or a form body
/// (POST, used by providers that require `form_post`).
#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    #[serde(default)]
    code: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

#[derive(Debug, Deserialize)]
struct TokenExchangeResponse {
    #[serde(default)]
    id_token: String,
    #[serde(default)]
    error: String,
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

/// Start a relay-mediated browser auth flow.
async fn auth_login(
    Extension(verifier): Extension<Arc<Verifier>>,
    Extension(store): Extension<Arc<AuthSessionStore>>,
    Extension(settings): Extension<RelaySettings>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(_) => return bad_request("invalid request body"),
    };

    if !verifier.has_provider(&req.provider) {
        return bad_request("unknown provider");
    }

    let code_verifier = generate_code_verifier();
    let session = store.create(&req.provider, &code_verifier).await;

    let auth_url = format!(
        "{}/api/auth/authorize?session={}",
        settings.base_url, session.id
    );

    Json(LoginResponse {
        session_id: session.id,
        auth_url,
    })
    .into_response()
}

/// Redirect the browser to the provider's authorize endpoint.
async fn auth_authorize(
    Extension(verifier): Extension<Arc<Verifier>>,
    Extension(store): Extension<Arc<AuthSessionStore>>,
    Extension(settings): Extension<RelaySettings>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let session = match store.get(&query.session).await {
        Some(session) => session,
        None => return bad_request("invalid or expired session"),
    };

    let auth_endpoint = match verifier.auth_endpoint(&session.provider) {
        Some(endpoint) => endpoint,
        None => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "provider auth endpoint not found",
            )
                .into_response()
        }
    };
    let config = match verifier.provider(&session.provider) {
        Some(config) => config,
        None => return bad_request("unknown provider"),
    };

    let mut target = match Url::parse(&auth_endpoint) {
        Ok(url) => url,
        Err(e) => {
            error!(provider = %session.provider, error = %e, "bad authorize endpoint");
            return (StatusCode::INTERNAL_SERVER_ERROR, "bad authorize endpoint").into_response();
        }
    };

    let redirect_uri = format!("{}/api/auth/callback", settings.base_url);
    target
        .query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", "openid email profile")
        .append_pair("state", &session.id)
        .append_pair("code_challenge", &code_challenge(&session.code_verifier))
        .append_pair("code_challenge_method", "S256");

    if session.provider == "apple" {
        target
            .query_pairs_mut()
            .append_pair("response_mode", "form_post");
    }

    (
        StatusCode::FOUND,
        [(header::LOCATION, target.to_string())],
    )
        .into_response()
}

async fn auth_callback_get(
    verifier: Extension<Arc<Verifier>>,
    store: Extension<Arc<AuthSessionStore>>,
    settings: Extension<RelaySettings>,
    http: Extension<reqwest::Client>,
    Query(params): Query<CallbackParams>,
) -> Html<String> {
    handle_callback(verifier.0, store.0, settings.0, http.0, params).await
}

async fn auth_callback_post(
    verifier: Extension<Arc<Verifier>>,
    store: Extension<Arc<AuthSessionStore>>,
    settings: Extension<RelaySettings>,
    http: Extension<reqwest::Client>,
    Form(params): Form<CallbackParams>,
) -> Html<String> {
    handle_callback(verifier.0, store.0, settings.0, http.0, params).await
}

/// Complete the authorization-code exchange and render the result page.
async fn handle_callback(
    verifier: Arc<Verifier>,
    store: Arc<AuthSessionStore>,
    settings: RelaySettings,
    http: reqwest::Client,
    params: CallbackParams,
) -> Html<String> {
    if params.code.is_empty() || params.state.is_empty() {
        let mut message = params.error_description;
        if message.is_empty() {
            message = params.error;
        }
        if message.is_empty() {
            message = "missing code or state".into();
        }
        return render_auth_result(false, &message);
    }

    let session = match store.get(&params.state).await {
        Some(session) => session,
        None => return render_auth_result(false, "session expired or invalid"),
    };

    let config = match verifier.provider(&session.provider) {
        Some(config) => config,
        None => return render_auth_result(false, "unknown provider"),
    };
    let token_endpoint = match verifier.token_endpoint(&session.provider) {
        Some(endpoint) => endpoint,
        None => return render_auth_result(false, "provider token endpoint not found"),
    };

    let redirect_uri = format!("{}/api/auth/callback", settings.base_url);
    let mut form: Vec<(&str, String)> = vec![
        ("client_id", config.client_id.clone()),
        ("code", params.code),
        ("grant_type", "authorization_code".into()),
        ("redirect_uri", redirect_uri),
        ("code_verifier", session.code_verifier.clone()),
    ];

    match verifier.exchange_client_secret(&session.provider) {
        Ok(Some(secret)) => form.push(("client_secret", secret)),
        Ok(None) => {}
        Err(e) => {
            error!(provider = %session.provider, error = %e, "client secret generation failed");
            return render_auth_result(false, "internal error");
        }
    }

    let response = match http.post(&token_endpoint).form(&form).send().await {
        Ok(response) => response,
        Err(e) => {
            error!(provider = %session.provider, error = %e, "token exchange request failed");
            return render_auth_result(false, "token exchange failed");
        }
    };

    let result: TokenExchangeResponse = match response.json().await {
        Ok(result) => result,
        Err(e) => {
            warn!(provider = %session.provider, error = %e, "token response parse failed");
            return render_auth_result(false, "invalid token response");
        }
    };

    if !result.error.is_empty() {
        return render_auth_result(false, &format!("token error: {}", result.error));
    }
    if result.id_token.is_empty() {
        return render_auth_result(false, "no id_token in response");
    }

    store.complete(&params.state, &result.id_token).await;
    render_auth_result(true, "")
}

/// Check whether a pending login has completed. Consumes the token.
async fn auth_poll(
    Extension(store): Extension<Arc<AuthSessionStore>>,
    Query(query): Query<SessionQuery>,
) -> Json<serde_json::Value> {
    match store.consume(&query.session).await {
        Some(id_token) => Json(serde_json::json!({
            "status": "complete",
            "id_token": id_token,
        })),
        None => Json(serde_json::json!({ "status": "pending" })),
    }
}

fn render_auth_result(success: bool, error_message: &str) -> Html<String> {
    let page = if success {
        concat!(
            r#"<!DOCTYPE html><html><body style="background:#0a0a0a;color:#00ff41;"#,
            r#"font-family:monospace;display:flex;justify-content:center;align-items:center;"#,
            r#"height:100vh;margin:0"><div style="text-align:center">"#,
            r#"<h2>Authentication Complete</h2>"#,
            r#"<p>You can close this tab and return to your terminal.</p></div></body></html>"#,
        )
        .to_string()
    } else {
        format!(
            concat!(
                r#"<!DOCTYPE html><html><body style="background:#0a0a0a;color:#ff4444;"#,
                r#"font-family:monospace;display:flex;justify-content:center;align-items:center;"#,
                r#"height:100vh;margin:0"><div style="text-align:center">"#,
                r#"<h2>Authentication Failed</h2><p>{}</p></div></body></html>"#,
            ),
            escape_html(error_message)
        )
    };
    Html(page)
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Create auth flow routes.
pub fn auth_routes() -> Router {
    Router::new()
        .route("/api/auth/login", post(auth_login))
        .route("/api/auth/authorize", get(auth_authorize))
        .route(
            "/api/auth/callback",
            get(auth_callback_get).post(auth_callback_post),
        )
        .route("/api/auth/poll", get(auth_poll))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_challenge_is_s256_of_the_verifier() {
        // RFC 7636 appendix B test vector.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn code_verifier_is_url_safe_and_high_entropy() {
        let verifier = generate_code_verifier();
        // 32 bytes base64url without padding.
        assert_eq!(verifier.len(), 43);
        assert!(!verifier.contains('+'));
        assert!(!verifier.contains('/'));
        assert!(!verifier.contains('='));
        assert_ne!(verifier, generate_code_verifier());
    }

    #[test]
    fn escape_html_neutralizes_markup() {
        assert_eq!(
            escape_html(r#"<script>alert("x")</script>"#),
            "&lt;script&gt;alert(&quot;x&quot;)&lt;/script&gt;"
        );
        assert_eq!(escape_html("a&b'c"), "a&amp;b&#39;c");
    }

    #[test]
    fn failure_page_escapes_the_provider_message() {
        let Html(page) = render_auth_result(false, "<img src=x>");
        assert!(page.contains("Authentication Failed"));
        assert!(page.contains("&lt;img src=x&gt;"));
        assert!(!page.contains("<img"));
    }

    #[test]
    fn success_page_mentions_returning_to_the_terminal() {
        let Html(page) = render_auth_result(true, "");
        assert!(page.contains("Authentication Complete"));
    }

    #[test]
    fn callback_params_accept_partial_input() {
        let params: CallbackParams = serde_json::from_str(r#"{"state":"abc"}"#).unwrap();
        assert!(params.code.is_empty());
        assert_eq!(params.state, "abc");
    }

    #[test]
    fn login_response_serialization() {
        let resp = LoginResponse {
            session_id: "s1".into(),
            auth_url: "http://relay/api/auth/authorize?session=s1".into(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"session_id\":\"s1\""));
        assert!(json.contains("authorize?session=s1"));
    }
}
