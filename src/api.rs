use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use rocket::{Route, State, get, post, routes};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::assinafy::PackageId;
use crate::config::Config;
use crate::coordinator::SignatureCoordinator;

const SIGNATURE_HEADER: &str = "X-Assinafy-Signature";

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    timestamp: DateTime<Utc>,
}

#[get("/health")]
fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
    })
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    package: Option<WebhookPackage>,
}

#[derive(Debug, Deserialize)]
struct WebhookPackage {
    id: String,
}

#[derive(Serialize, Deserialize)]
struct WebhookAck {
    status: String,
}

fn ack() -> Json<WebhookAck> {
    Json(WebhookAck {
        status: "success".to_string(),
    })
}

/// Raw `X-Assinafy-Signature` header, when present.
struct WebhookSignature(Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for WebhookSignature {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(Self(
            request.headers().get_one(SIGNATURE_HEADER).map(str::to_owned),
        ))
    }
}

fn signature_is_valid(secret: &str, body: &str, provided: Option<&str>) -> bool {
    let Some(provided) = provided else {
        return false;
    };
    let Ok(expected) = hex::decode(provided) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };

    mac.update(body.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Inbound provider event notifications.
///
/// Every well-formed delivery is acknowledged with 200 regardless of
/// whether we acted on it, so the provider never retries events this
/// system simply ignores. The only rejection is an invalid HMAC when a
/// webhook secret is configured — an unauthenticated sender gets 401.
#[post("/webhooks/assinafy", data = "<body>")]
async fn assinafy_webhook(
    body: &str,
    signature: WebhookSignature,
    config: &State<Config>,
    coordinator: &State<Arc<SignatureCoordinator>>,
) -> Result<Json<WebhookAck>, Status> {
    if let Some(secret) = &config.webhook_secret
        && !signature_is_valid(secret, body, signature.0.as_deref())
    {
        warn!("webhook rejected: missing or invalid signature");
        return Err(Status::Unauthorized);
    }

    let event: WebhookEvent = match serde_json::from_str(body) {
        Ok(event) => event,
        Err(e) => {
            warn!("ignoring malformed webhook payload: {e}");
            return Ok(ack());
        }
    };

    match event.event.as_str() {
        "package.signed" => {
            let Some(package) = event.package else {
                warn!("package.signed event without a package id, ignoring");
                return Ok(ack());
            };

            let package_id = PackageId::from(package.id);
            info!("webhook: package {package_id} reported signed");

            // Failures here are picked up by the next poller cycle; the
            // delivery itself is still acknowledged.
            if let Err(e) = coordinator.reconcile_package(&package_id).await {
                error!("webhook reconciliation for package {package_id} failed: {e}");
            }
        }
        other => {
            debug!("ignoring webhook event {other}");
        }
    }

    Ok(ack())
}

pub(crate) fn routes() -> Vec<Route> {
    routes![health, assinafy_webhook]
}
