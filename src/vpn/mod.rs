//! Egress VPN Controller: §4.7 Bootstrap (C7), §4.8 Route Programmer (C8),
//! §4.9 Health (C9), plus the shared data model from §3.

pub mod bootstrap;
pub mod health;
pub(crate) mod mocks;
pub mod routes;
pub mod shell;

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::config::VpnKind;
use shell::ShellError;

#[derive(Debug, Error)]
pub enum VpnError {
	#[error("required binary missing: {0}")]
	BinaryMissing(String),
	#[error("config file missing: {0}")]
	ConfigMissing(String),
	#[error("invalid config: {0}")]
	InvalidConfig(String),
	#[error("timed out waiting for {0}")]
	TimedOut(String),
	#[error("dns resolution failed for {domain}: {reason}")]
	DnsFailed { domain: String, reason: String },
	#[error("failed to program route: {0}")]
	RouteFailed(String),
	#[error(transparent)]
	Shell(#[from] ShellError),
}

/// §3 `RouteState`: snapshot of the default route captured before bringing
/// the tunnel up, used to restore it afterward in split-tunnel mode.
#[derive(Debug, Clone)]
pub struct RouteState {
	pub gateway: String,
	pub dev: String,
	pub metric: Option<u32>,
}

/// §3 `TunnelDescriptor`.
#[derive(Debug, Clone)]
pub enum TunnelDescriptor {
	WireGuard { config_path: String, interface: String },
	Awg { config_path: String, interface: String, obfuscation_degraded: bool },
	OpenVpn { config_path: String, interface: String },
	Hysteria2 { uri: String, socks5_port: u16, http_port: u16, config_path: String },
}

impl TunnelDescriptor {
	pub fn kind(&self) -> VpnKind {
		match self {
			TunnelDescriptor::WireGuard { .. } => VpnKind::WireGuard,
			TunnelDescriptor::Awg { .. } => VpnKind::Awg,
			TunnelDescriptor::OpenVpn { .. } => VpnKind::OpenVpn,
			TunnelDescriptor::Hysteria2 { .. } => VpnKind::Hysteria2,
		}
	}

	/// §3: "Hysteria2 contributes a proxy URL ... that the HTTP Transport reads."
	pub fn proxy_url(&self) -> Option<String> {
		match self {
			TunnelDescriptor::Hysteria2 { socks5_port, .. } => Some(format!("socks5://127.0.0.1:{socks5_port}")),
			_ => None,
		}
	}

	pub fn interface(&self) -> Option<&str> {
		match self {
			TunnelDescriptor::WireGuard { interface, .. } => Some(interface),
			TunnelDescriptor::Awg { interface, .. } => Some(interface),
			TunnelDescriptor::OpenVpn { interface, .. } => Some(interface),
			TunnelDescriptor::Hysteria2 { .. } => None,
		}
	}
}

#[derive(Default)]
struct State {
	route_state: Option<RouteState>,
	tunnel: Option<TunnelDescriptor>,
	obfuscation_degraded: bool,
}

/// Holds the state `BootstrapVPN` produces: the captured pre-bootstrap
/// route and the resulting tunnel descriptor. Replaces the source's
/// module-level mutable caches (§9 "State, not singletons") with an
/// explicit value the host's `Core` owns.
#[derive(Clone, Default)]
pub struct VpnHandle {
	state: Arc<Mutex<State>>,
}

impl VpnHandle {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_route_state(&self, route: Option<RouteState>) {
		self.state.lock().route_state = route;
	}

	pub fn route_state(&self) -> Option<RouteState> {
		self.state.lock().route_state.clone()
	}

	pub fn set_tunnel(&self, tunnel: TunnelDescriptor) {
		self.state.lock().tunnel = Some(tunnel);
	}

	pub fn tunnel(&self) -> Option<TunnelDescriptor> {
		self.state.lock().tunnel.clone()
	}

	/// §B.5: AWG fell back to `wg-quick` with obfuscation stripped.
	pub fn set_obfuscation_degraded(&self, degraded: bool) {
		self.state.lock().obfuscation_degraded = degraded;
	}

	pub fn obfuscation_degraded(&self) -> bool {
		self.state.lock().obfuscation_degraded
	}
}
