//! §6: `GET /api/vpn/health` admin surface. Shape grounded in
//! `src/admin.rs`'s `Router::new().route("/targets", get(...))` pattern and
//! its handlers' `Result<String, StatusCode>` return type.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use crate::config::VpnConfig;
use crate::vpn::VpnHandle;

#[derive(Clone)]
pub struct AdminState {
	pub vpn_config: Option<VpnConfig>,
	pub vpn_handle: VpnHandle,
}

pub fn router(state: AdminState) -> Router {
	Router::new().route("/api/vpn/health", get(vpn_health_handler)).with_state(state)
}

async fn vpn_health_handler(State(state): State<AdminState>) -> (StatusCode, String) {
	let report = match &state.vpn_config {
		Some(cfg) => crate::vpn::health::probe(cfg, &state.vpn_handle).await,
		None => crate::vpn::health::HealthReport::disabled(),
	};
	let status = StatusCode::from_u16(report.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
	let body = serde_json::to_string(&report).unwrap_or_else(|_| "{}".to_string());
	(status, body)
}
