//! Password login and the session cookie that gates the uploader.
//!
//! - GET  /login   -> login page
//! - POST /login   -> check the shared password, set the session cookie
//! - GET  /logout  -> clear the cookie
//!
//! The cookie carries a random nonce and its HMAC-SHA256 under the session
//! secret, so it cannot be forged without the secret. Nothing is stored
//! server side.

use crate::{errors::AppError, state::AppState};
use anyhow::{Result, anyhow};
use axum::{
    Form,
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "relay_session";

/// Issues and checks session tokens.
pub struct SessionGate {
    password: String,
    mac: HmacSha256,
}

impl SessionGate {
    pub fn new(password: impl Into<String>, secret: &str) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| anyhow!("session secret cannot be used as an HMAC key"))?;
        Ok(Self {
            password: password.into(),
            mac,
        })
    }

    pub fn check_password(&self, candidate: &str) -> bool {
        candidate == self.password
    }

    /// A fresh token of the form `{nonce}.{signature}`.
    pub fn issue(&self) -> String {
        let nonce = Uuid::new_v4().simple().to_string();
        format!("{nonce}.{}", URL_SAFE_NO_PAD.encode(self.sign(&nonce)))
    }

    pub fn verify(&self, token: &str) -> bool {
        let Some((nonce, signature)) = token.split_once('.') else {
            return false;
        };
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(nonce.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }

    /// True when any `Cookie` header carries a valid session token.
    pub fn verify_headers(&self, headers: &HeaderMap) -> bool {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .any(|(name, value)| name == SESSION_COOKIE && self.verify(value))
    }

    fn sign(&self, nonce: &str) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(nonce.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub password: String,
}

/// `GET /login`
pub async fn login_page() -> Html<String> {
    Html(render_login(None))
}

/// `POST /login`
pub async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    if !state.sessions.check_password(&form.password) {
        warn!("Rejected login attempt");
        return Html(render_login(Some("Invalid password. Please try again."))).into_response();
    }

    info!("User logged in");
    let cookie = format!(
        "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax",
        state.sessions.issue()
    );
    ([(header::SET_COOKIE, cookie)], Redirect::to("/")).into_response()
}

/// `GET /logout`
pub async fn logout() -> Response {
    let cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    ([(header::SET_COOKIE, cookie)], Redirect::to("/login")).into_response()
}

/// Let requests with a valid session through. API callers get a JSON 401,
/// browsers are sent to the login page.
pub async fn require_session(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.sessions.verify_headers(request.headers()) {
        return next.run(request).await;
    }

    if request.uri().path().starts_with("/api/") {
        AppError::unauthorized().into_response()
    } else {
        Redirect::to("/login").into_response()
    }
}

fn render_login(error: Option<&str>) -> String {
    let error = error
        .map(|msg| format!(r#"<div class="error-message">{msg}</div>"#))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Login - Digital Ocean Folder Uploader</title>
    <link rel="stylesheet" href="/style.css">
    <link rel="stylesheet" href="https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.2.1/css/all.min.css">
    <style>
        .login-container {{
            max-width: 400px;
            margin: 100px auto;
            padding: 30px;
            background-color: white;
            border-radius: 10px;
            box-shadow: 0 2px 10px rgba(0, 0, 0, 0.1);
            text-align: center;
        }}
        .login-form {{ margin-top: 20px; }}
        .login-form input[type="password"] {{
            width: 100%;
            padding: 12px;
            margin: 10px 0;
            border: 1px solid var(--border-color);
            border-radius: 5px;
            font-size: 16px;
        }}
        .error-message {{
            color: var(--error-color);
            margin-bottom: 15px;
        }}
    </style>
</head>
<body>
    <div class="container">
        <div class="login-container">
            <h1 style="color: var(--primary-color);">Folder Uploader</h1>
            <p>Please enter the password to access this tool</p>
            {error}
            <form class="login-form" method="post">
                <div>
                    <input type="password" name="password" placeholder="Enter password" required autofocus>
                </div>
                <button type="submit" class="btn">
                    <i class="fas fa-sign-in-alt"></i> Login
                </button>
            </form>
        </div>
    </div>
</body>
</html>
"#
    )
}
