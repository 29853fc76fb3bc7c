use crate::health::{healthz, readyz, Readiness};
use crate::webhook::{handle_webhook, IngressState};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};

/// Assembles the ambient HTTP surface: the Alertmanager webhook plus
/// healthz/readyz/metrics, each its own sub-router with its own state,
/// merged the way the teacher's `meta::server` builds its public/protected
/// routers.
pub fn build_router(ingress_state: IngressState, readiness: Readiness, metrics_handle: PrometheusHandle) -> Router {
    let webhook_router = Router::new().route("/webhook", post(handle_webhook)).with_state(ingress_state);
    let ready_router = Router::new().route("/readyz", get(readyz)).with_state(readiness);
    let health_router: Router<()> = Router::new().route("/healthz", get(healthz));
    let metrics_router: Router<()> =
        Router::new().route("/metrics", get(move || { let handle = metrics_handle.clone(); async move { handle.render() } }));

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    webhook_router.merge(ready_router).merge(health_router).merge(metrics_router).layer(cors)
}
