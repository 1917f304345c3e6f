//! Core of the internal LLM gateway: a multi-key provider pool fronting
//! Gemini/OpenRouter, and an egress VPN controller that brings up one of
//! four tunnel backends and programs the host routing table.
//!
//! Everything here is built from an explicit [`Config`], a [`tracing`]
//! subscriber the host installs, and process/OS primitives. There are no
//! module-level singletons: callers construct a [`Core`] and hold it for
//! the life of the process.

pub mod admin;
pub mod breaker;
pub mod config;
pub mod error;
pub mod keypool;
pub mod llm;
pub mod pool;
pub mod ratelimit;
pub mod transport;
pub mod vpn;

pub use config::Config;
pub use error::{GatewayError, TypedError};
pub use pool::{PoolClient, PoolStats};
pub use vpn::health::HealthReport;

/// Everything the host process needs: the provider pool and a handle to
/// whatever VPN state `BootstrapVPN` produced.
///
/// Constructed once at startup; cheap to clone (internals are `Arc`-backed).
#[derive(Clone)]
pub struct Core {
	pub pool: PoolClient,
	pub vpn: vpn::VpnHandle,
}

impl Core {
	pub fn new(cfg: &Config) -> anyhow::Result<Self> {
		let transport = transport::HttpTransport::new(cfg.vpn.as_ref().and_then(|v| v.socks5_proxy()))?;
		let pool = PoolClient::new(cfg, transport)?;
		Ok(Self {
			pool,
			vpn: vpn::VpnHandle::new(),
		})
	}

	/// §1: `Call(prompt, image?, opts) -> Response | Error`.
	pub async fn call(&self, req: llm::RequestFingerprint) -> Result<llm::Response, GatewayError> {
		self.pool.call(req).await
	}

	/// §1: `GetPoolStats() -> Stats`.
	pub fn pool_stats(&self) -> PoolStats {
		self.pool.stats()
	}

	/// §1: `BootstrapVPN(cfg) -> error`.
	pub async fn bootstrap_vpn(&self, cfg: &config::VpnConfig) -> Result<(), vpn::VpnError> {
		vpn::bootstrap::bootstrap(cfg, &self.vpn).await
	}

	/// §1: `ProbeVPN() -> HealthReport`.
	pub async fn probe_vpn(&self, cfg: &config::VpnConfig) -> HealthReport {
		vpn::health::probe(cfg, &self.vpn).await
	}
}
