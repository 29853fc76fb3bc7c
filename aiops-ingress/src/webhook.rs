use aiops_core::EventStore;
use aiops_types::{ClusterEvent, EventType, ResourceRef, Severity};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// The allowed drift between the request timestamp and the receiving
/// instant before a payload is rejected as a replay.
pub const REPLAY_WINDOW_SECONDS: i64 = 300;

#[derive(Clone)]
pub struct IngressConfig {
    pub webhook_secret: Option<String>,
    pub webhook_header: String,
    pub timestamp_header: Option<String>,
}

#[derive(Clone)]
pub struct IngressState {
    pub config: IngressConfig,
    pub event_store: Arc<dyn EventStore>,
    pub dispatch: Arc<dyn Fn(ClusterEvent) + Send + Sync>,
}

#[derive(Debug, Deserialize)]
pub struct AlertmanagerPayload {
    #[serde(default)]
    pub alerts: Vec<AlertmanagerAlert>,
}

#[derive(Debug, Deserialize)]
pub struct AlertmanagerAlert {
    pub status: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(rename = "startsAt")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(rename = "endsAt")]
    pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, serde::Serialize)]
pub struct WebhookResponse {
    pub processed: usize,
}

pub async fn handle_webhook(
    State(state): State<IngressState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Err((status, message)) = verify_signature(&state.config, &headers, &body) {
        aiops_common::metrics::webhook_request(status.as_u16());
        return (status, message).into_response();
    }

    if let Err((status, message)) = verify_timestamp(&state.config, &headers) {
        aiops_common::metrics::webhook_request(status.as_u16());
        return (status, message).into_response();
    }

    let payload: AlertmanagerPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(err) => {
            aiops_common::metrics::webhook_request(400);
            return (StatusCode::BAD_REQUEST, format!("malformed payload: {err}")).into_response();
        }
    };

    let mut processed = 0;
    for alert in payload.alerts {
        let event = normalize_alert(alert);
        if let Err(err) = state.event_store.append(&event).await {
            tracing::error!(error = %err, "failed to persist alert event");
        }
        (state.dispatch)(event);
        processed += 1;
    }

    aiops_common::metrics::webhook_request(200);
    aiops_common::metrics::webhook_alerts_processed(processed);
    (StatusCode::OK, Json(WebhookResponse { processed })).into_response()
}

fn verify_signature(config: &IngressConfig, headers: &HeaderMap, body: &[u8]) -> Result<(), (StatusCode, String)> {
    let Some(secret) = &config.webhook_secret else { return Ok(()) };

    let provided = headers
        .get(config.webhook_header.as_str())
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| (StatusCode::FORBIDDEN, "missing signature header".to_string()))?;
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    if constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err((StatusCode::FORBIDDEN, "signature mismatch".to_string()))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn verify_timestamp(config: &IngressConfig, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let Some(header_name) = &config.timestamp_header else { return Ok(()) };
    let Some(raw) = headers.get(header_name.as_str()).and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };
    let Ok(ts) = raw.parse::<i64>() else {
        return Err((StatusCode::BAD_REQUEST, "malformed timestamp header".to_string()));
    };
    let now = Utc::now().timestamp();
    if (now - ts).abs() > REPLAY_WINDOW_SECONDS {
        return Err((StatusCode::BAD_REQUEST, "timestamp outside replay window".to_string()));
    }
    Ok(())
}

fn normalize_alert(alert: AlertmanagerAlert) -> ClusterEvent {
    let severity = alert
        .labels
        .get("severity")
        .and_then(|s| serde_json::from_value(serde_json::Value::String(s.clone())).ok())
        .unwrap_or(Severity::Warning);

    let name = alert
        .labels
        .get("pod")
        .or_else(|| alert.labels.get("instance"))
        .cloned()
        .unwrap_or_default();
    let namespace = alert.labels.get("namespace").cloned().unwrap_or_default();

    let message = alert
        .annotations
        .get("summary")
        .or_else(|| alert.annotations.get("description"))
        .cloned()
        .unwrap_or_else(|| format!("alertmanager alert ({})", alert.status));

    ClusterEvent {
        event_type: EventType::AlertmanagerFiring,
        severity,
        resource: ResourceRef::new("", namespace, name),
        message,
        labels: alert.labels,
        detected_at: alert.starts_at.unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiops_core::stores::memory::MemoryEventStore;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request};
    use axum::Router;
    use tower::ServiceExt;

    fn router(secret: Option<&str>, timestamp_header: Option<&str>) -> (Router, Arc<MemoryEventStore>) {
        let store = Arc::new(MemoryEventStore::new());
        let state = IngressState {
            config: IngressConfig {
                webhook_secret: secret.map(|s| s.to_string()),
                webhook_header: "X-Hub-Signature-256".to_string(),
                timestamp_header: timestamp_header.map(|s| s.to_string()),
            },
            event_store: store.clone(),
            dispatch: Arc::new(|_event| {}),
        };
        let router = Router::new()
            .route("/webhook", axum::routing::post(handle_webhook))
            .with_state(state);
        (router, store)
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn payload() -> Vec<u8> {
        serde_json::json!({
            "alerts": [{
                "status": "firing",
                "labels": {"severity": "critical", "namespace": "prod", "pod": "api-7"},
                "annotations": {"summary": "pod crashlooping"},
                "startsAt": Utc::now().to_rfc3339(),
            }]
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn rejects_mismatched_signature() {
        let (router, store) = router(Some("s3cret"), None);
        let body = payload();
        let request = Request::post("/webhook")
            .header("X-Hub-Signature-256", "sha256=deadbeef")
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(store.events().is_empty());
    }

    #[tokio::test]
    async fn accepts_valid_signature_and_persists() {
        let (router, store) = router(Some("s3cret"), None);
        let body = payload();
        let signature = sign("s3cret", &body);
        let request = Request::post("/webhook")
            .header("X-Hub-Signature-256", HeaderValue::from_str(&signature).unwrap())
            .body(Body::from(body))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.events().len(), 1);
    }

    #[tokio::test]
    async fn timestamp_exactly_at_boundary_is_accepted() {
        let (router, _store) = router(None, Some("X-Timestamp"));
        let ts = (Utc::now().timestamp() - REPLAY_WINDOW_SECONDS).to_string();
        let request = Request::post("/webhook")
            .header("X-Timestamp", ts)
            .body(Body::from(payload()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn timestamp_past_boundary_is_rejected() {
        let (router, _store) = router(None, Some("X-Timestamp"));
        let ts = (Utc::now().timestamp() - REPLAY_WINDOW_SECONDS - 1).to_string();
        let request = Request::post("/webhook")
            .header("X-Timestamp", ts)
            .body(Body::from(payload()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
