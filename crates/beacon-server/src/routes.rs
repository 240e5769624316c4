use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use beacon_core::{PluginUserId, Provider, ServerEvent};

use crate::server::AppState;

const LINKED_DM: &str = "Your plugin has been successfully linked!";
const PARTY_FULL_DM: &str = "Your party is full! Time to queue!";

/// GET /health
pub async fn health() -> Response {
    Json(json!({ "status": "healthy" })).into_response()
}

/// Query for GET /callback. The OAuth provider redirects here with
/// either a success shape (`code` + `state`) or an error shape
/// (`error` + optional `error_description` + `state`); `state` carries
/// the plugin user id in both.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /callback — complete (or report) the OAuth flow.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some(user_id) = query
        .state
        .as_deref()
        .and_then(|raw| PluginUserId::parse(raw).ok())
    else {
        return bad_request("Missing code or state");
    };

    if let Some(error) = query.error {
        return oauth_denied(&state, user_id, error, query.error_description);
    }

    let Some(code) = query.code else {
        return bad_request("Missing code or state");
    };

    let account = match state.discord.exchange_code(&code).await {
        Ok(account) => account,
        Err(err) => {
            error!(user_id = %user_id, %err, "oauth code exchange failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "OAuth failed" })),
            )
                .into_response();
        }
    };

    if let Err(err) = state.links.link(&user_id, &account.discord_id) {
        error!(user_id = %user_id, %err, "failed to persist link");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "OAuth failed" })),
        )
            .into_response();
    }

    info!(user_id = %user_id, discord_id = %account.discord_id, "plugin user linked");

    // Courtesies past this point are best-effort; the link is durable.
    if let Err(err) = state.discord.send_dm(&account.discord_id, LINKED_DM).await {
        warn!(discord_id = %account.discord_id, %err, "link confirmation dm failed");
    }

    let pushed = state.delivery.push(
        &user_id,
        &ServerEvent::AuthComplete {
            provider: Provider::Discord,
            plugin_user_id: user_id.clone(),
        },
    );
    if !pushed.is_delivered() {
        info!(user_id = %user_id, "no live connection; auth state replays on next register");
    }

    Json(json!({ "message": "Account linked! You can close this window." })).into_response()
}

fn oauth_denied(
    state: &AppState,
    user_id: PluginUserId,
    error: String,
    description: Option<String>,
) -> Response {
    if !is_oauth_error_code(&error) {
        return bad_request("OAuth authorization failed");
    }

    warn!(user_id = %user_id, error = %error, "oauth authorization denied");

    state.delivery.push(
        &user_id,
        &ServerEvent::AuthError {
            provider: Provider::Discord,
            plugin_user_id: user_id.clone(),
            error: error.clone(),
        },
    );

    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": "OAuth authorization failed",
            "details": description.unwrap_or(error),
        })),
    )
        .into_response()
}

/// Body of POST /notify.
#[derive(Debug, Deserialize)]
pub struct NotifyBody {
    #[serde(rename = "pluginUserId")]
    plugin_user_id: PluginUserId,
    #[serde(rename = "partySize")]
    party_size: Option<u32>,
    #[serde(rename = "maxSize")]
    max_size: Option<u32>,
}

/// POST /notify — party-ready alert, delivered as a Discord DM.
/// Requires the shared API key in `x-api-key`.
pub async fn notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NotifyBody>,
) -> Response {
    if !api_key_ok(&headers, state.api_key.expose_secret()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response();
    }

    let discord_id = match state.links.discord_id(&body.plugin_user_id) {
        Ok(Some(id)) => id,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "User not linked to Discord" })),
            )
                .into_response();
        }
        Err(err) => {
            error!(user_id = %body.plugin_user_id, %err, "link lookup failed");
            return internal_error();
        }
    };

    if let (Some(party_size), Some(max_size)) = (body.party_size, body.max_size) {
        if party_size < max_size {
            return Json(json!({ "status": "Party not full yet" })).into_response();
        }
    }

    match state.discord.send_dm(&discord_id, PARTY_FULL_DM).await {
        Ok(()) => {
            info!(user_id = %body.plugin_user_id, "party full dm sent");
            Json(json!({ "status": "Notification sent" })).into_response()
        }
        Err(err) => {
            error!(user_id = %body.plugin_user_id, %err, "party full dm failed");
            internal_error()
        }
    }
}

/// Query for GET /platforms.
#[derive(Debug, Deserialize)]
pub struct PlatformsQuery {
    #[serde(rename = "userId")]
    user_id: String,
}

/// GET /platforms — which chat platforms the user has linked.
pub async fn platforms(
    State(state): State<AppState>,
    Query(query): Query<PlatformsQuery>,
) -> Response {
    let Ok(user_id) = PluginUserId::parse(&query.user_id) else {
        return bad_request("Missing or invalid userId");
    };

    match state.links.platforms(&user_id) {
        Ok(platforms) => Json(json!({ "platforms": platforms })).into_response(),
        Err(err) => {
            error!(user_id = %user_id, %err, "platform status lookup failed");
            internal_error()
        }
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
        .into_response()
}

/// OAuth error codes are lowercase-with-underscores identifiers; anything
/// else in the `error` parameter is noise and never echoed anywhere.
fn is_oauth_error_code(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s.chars().all(|c| c.is_ascii_alphabetic() || c == '_')
}

fn api_key_ok(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|got| timing_safe_eq(got, expected))
}

/// Compare SHA-256 digests of the two strings rather than the strings
/// themselves, so the comparison cannot leak a matching prefix through
/// timing.
fn timing_safe_eq(a: &str, b: &str) -> bool {
    Sha256::digest(a.as_bytes()) == Sha256::digest(b.as_bytes())
}
