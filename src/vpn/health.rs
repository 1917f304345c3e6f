//! §4.9 VPN Health / §3 `HealthReport`. Grounded in `vpn_health.py`'s
//! `collect_interface_status`/`collect_routes`/`collect_wireguard_overview`/
//! `collect_hysteria2_status`/`perform_gemini_probe`/`gather_vpn_health`.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{VpnConfig, VpnKind};

use super::shell::{RealShellOps, ShellOps};
use super::VpnHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
	Healthy,
	Degraded,
	Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeOutcome {
	Ok,
	Fail,
	Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterfaceStatus {
	pub name: String,
	pub is_up: bool,
	pub state: Option<String>,
	pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireGuardPeer {
	pub public_key: String,
	pub endpoint: Option<String>,
	pub allowed_ips: Vec<String>,
	pub latest_handshake: Option<String>,
	pub transfer_rx_bytes: Option<u64>,
	pub transfer_tx_bytes: Option<u64>,
	pub persistent_keepalive: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireGuardOverview {
	pub public_key: Option<String>,
	pub listen_port: Option<u16>,
	pub peers: Vec<WireGuardPeer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Hysteria2Status {
	pub is_running: bool,
	pub socks5_accessible: bool,
	pub http_accessible: bool,
	pub server_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
	pub domain: String,
	pub outcome: ProbeOutcome,
	pub http_status: Option<u16>,
	pub latency_millis: Option<u64>,
	pub error: Option<String>,
}

/// §3 `HealthReport`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
	pub status: Status,
	pub vpn_type: Option<VpnKindView>,
	pub interface: Option<InterfaceStatus>,
	pub wireguard: Option<WireGuardOverview>,
	pub routes: Vec<String>,
	pub hysteria2: Option<Hysteria2Status>,
	pub probe: ProbeResult,
	pub details: Vec<String>,
	/// §B.5: surfaced durably, not just as a log line.
	pub obfuscation_degraded: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnKindView {
	WireGuard,
	Awg,
	OpenVpn,
	Hysteria2,
}

impl From<VpnKind> for VpnKindView {
	fn from(k: VpnKind) -> Self {
		match k {
			VpnKind::WireGuard => VpnKindView::WireGuard,
			VpnKind::Awg => VpnKindView::Awg,
			VpnKind::OpenVpn => VpnKindView::OpenVpn,
			VpnKind::Hysteria2 => VpnKindView::Hysteria2,
		}
	}
}

impl HealthReport {
	pub fn disabled() -> Self {
		Self {
			status: Status::Disabled,
			vpn_type: None,
			interface: None,
			wireguard: None,
			routes: Vec::new(),
			hysteria2: None,
			probe: ProbeResult {
				domain: String::new(),
				outcome: ProbeOutcome::Skipped,
				http_status: None,
				latency_millis: None,
				error: None,
			},
			details: vec!["vpn disabled".to_string()],
			obfuscation_degraded: false,
		}
	}

	/// §6: "status code is 200 if Healthy, 503 otherwise."
	pub fn http_status_code(&self) -> u16 {
		if self.status == Status::Healthy {
			200
		} else {
			503
		}
	}
}

async fn collect_interface_status<S: ShellOps>(shell: &S, iface: &str) -> InterfaceStatus {
	let link = shell.run("ip", &["link", "show", "dev", iface]).await.map(|o| o.stdout).unwrap_or_default();
	let is_up = link.contains("state UP") || (link.contains("UP") && link.contains("LOWER_UP"));
	let state = link.find("state ").map(|i| link[i + 6..].split_whitespace().next().unwrap_or("").to_string());

	let addr_out = shell.run("ip", &["-o", "addr", "show", "dev", iface]).await.map(|o| o.stdout).unwrap_or_default();
	let addresses = addr_out
		.lines()
		.filter_map(|line| {
			let tokens: Vec<&str> = line.split_whitespace().collect();
			tokens.iter().position(|t| *t == "inet" || *t == "inet6").and_then(|i| tokens.get(i + 1)).map(|s| s.to_string())
		})
		.collect();

	InterfaceStatus {
		name: iface.to_string(),
		is_up,
		state,
		addresses,
	}
}

async fn collect_routes<S: ShellOps>(shell: &S, iface: &str) -> Vec<String> {
	let output = shell.run("ip", &["route", "show"]).await.map(|o| o.stdout).unwrap_or_default();
	output.lines().filter(|line| line.contains(&format!(" dev {iface}"))).map(|s| s.to_string()).collect()
}

/// Parses `B|KiB|MiB|GiB|TiB` unit suffixes from `wg show` transfer lines.
fn parse_size_to_bytes(s: &str) -> Option<u64> {
	let s = s.trim();
	let units: &[(&str, f64)] = &[("TiB", 1024f64.powi(4)), ("GiB", 1024f64.powi(3)), ("MiB", 1024f64.powi(2)), ("KiB", 1024f64), ("B", 1.0)];
	for (suffix, multiplier) in units {
		if let Some(value) = s.strip_suffix(suffix) {
			return value.trim().parse::<f64>().ok().map(|n| (n * multiplier) as u64);
		}
	}
	None
}

fn parse_wireguard_output(text: &str) -> WireGuardOverview {
	let mut public_key = None;
	let mut listen_port = None;
	let mut peers = Vec::new();
	let mut current: Option<WireGuardPeer> = None;

	for line in text.lines() {
		let trimmed = line.trim();
		if let Some(rest) = trimmed.strip_prefix("public key:") {
			if current.is_none() {
				public_key = Some(rest.trim().to_string());
			}
			continue;
		}
		if let Some(rest) = trimmed.strip_prefix("listening port:") {
			listen_port = rest.trim().parse().ok();
			continue;
		}
		if let Some(rest) = trimmed.strip_prefix("peer:") {
			if let Some(p) = current.take() {
				peers.push(p);
			}
			current = Some(WireGuardPeer {
				public_key: rest.trim().to_string(),
				endpoint: None,
				allowed_ips: Vec::new(),
				latest_handshake: None,
				transfer_rx_bytes: None,
				transfer_tx_bytes: None,
				persistent_keepalive: None,
			});
			continue;
		}
		let Some(peer) = current.as_mut() else { continue };
		if let Some(rest) = trimmed.strip_prefix("endpoint:") {
			peer.endpoint = Some(rest.trim().to_string());
		} else if let Some(rest) = trimmed.strip_prefix("allowed ips:") {
			peer.allowed_ips = rest.split(',').map(|s| s.trim().to_string()).collect();
		} else if let Some(rest) = trimmed.strip_prefix("latest handshake:") {
			peer.latest_handshake = Some(rest.trim().to_string());
		} else if let Some(rest) = trimmed.strip_prefix("transfer:") {
			let parts: Vec<&str> = rest.split("received,").collect();
			if parts.len() == 2 {
				peer.transfer_rx_bytes = parse_size_to_bytes(parts[0]);
				let sent = parts[1].trim_end_matches("sent").trim();
				peer.transfer_tx_bytes = parse_size_to_bytes(sent);
			}
		} else if let Some(rest) = trimmed.strip_prefix("persistent keepalive:") {
			peer.persistent_keepalive = Some(rest.trim().to_string());
		}
	}
	if let Some(p) = current.take() {
		peers.push(p);
	}

	WireGuardOverview { public_key, listen_port, peers }
}

async fn collect_wireguard_overview<S: ShellOps>(shell: &S, iface: &str) -> Option<WireGuardOverview> {
	let output = shell.run("wg", &["show", iface]).await.ok()?;
	if !output.success() {
		return None;
	}
	Some(parse_wireguard_output(&output.stdout))
}

async fn hysteria_process_running<S: ShellOps>(shell: &S) -> bool {
	if let Ok(out) = shell.run("pgrep", &["-f", "hysteria"]).await {
		if out.success() {
			return true;
		}
	}
	shell.run("ps", &["aux"]).await.map(|o| o.stdout.contains("hysteria")).unwrap_or(false)
}

async fn collect_hysteria2_status<S: ShellOps>(shell: &S, cfg: &VpnConfig) -> Hysteria2Status {
	Hysteria2Status {
		is_running: hysteria_process_running(shell).await,
		socks5_accessible: shell.tcp_connect_ok("127.0.0.1", cfg.hysteria2_socks5_port).await,
		http_accessible: shell.tcp_connect_ok("127.0.0.1", cfg.hysteria2_http_port).await,
		server_ref: cfg.hysteria2_uri.clone(),
	}
}

/// §4.9: `GET https://<probeDomain>/` with a 5s timeout; HTTP < 500 maps to
/// `Ok`.
async fn probe_domain(domain: &str) -> ProbeResult {
	let url = format!("https://{domain}/");
	let client = match reqwest::Client::builder().timeout(Duration::from_secs(5)).build() {
		Ok(c) => c,
		Err(e) => {
			return ProbeResult {
				domain: domain.to_string(),
				outcome: ProbeOutcome::Fail,
				http_status: None,
				latency_millis: None,
				error: Some(e.to_string()),
			}
		}
	};
	let started = Instant::now();
	match client.get(&url).send().await {
		Ok(resp) => {
			let status = resp.status().as_u16();
			ProbeResult {
				domain: domain.to_string(),
				outcome: if status < 500 { ProbeOutcome::Ok } else { ProbeOutcome::Fail },
				http_status: Some(status),
				latency_millis: Some(started.elapsed().as_millis() as u64),
				error: None,
			}
		}
		Err(e) => ProbeResult {
			domain: domain.to_string(),
			outcome: ProbeOutcome::Fail,
			http_status: None,
			latency_millis: None,
			error: Some(e.to_string()),
		},
	}
}

/// §1 `ProbeVPN() -> HealthReport`.
pub async fn probe(cfg: &VpnConfig, handle: &VpnHandle) -> HealthReport {
	if !cfg.enabled {
		return HealthReport::disabled();
	}
	probe_with_shell(&RealShellOps, cfg, handle).await
}

async fn probe_with_shell<S: ShellOps>(shell: &S, cfg: &VpnConfig, handle: &VpnHandle) -> HealthReport {
	let mut details = Vec::new();
	let mut degraded = false;

	let (interface, wireguard, hysteria2, routes_snapshot) = if cfg.kind == VpnKind::Hysteria2 {
		let h2 = collect_hysteria2_status(shell, cfg).await;
		if !h2.is_running {
			degraded = true;
			details.push("hysteria2 process not running".to_string());
		}
		if !h2.socks5_accessible {
			degraded = true;
			details.push("hysteria2 socks5 port not accepting connections".to_string());
		}
		if !h2.http_accessible {
			degraded = true;
			details.push("hysteria2 http proxy port not accepting connections".to_string());
		}
		(None, None, Some(h2), Vec::new())
	} else {
		let iface_name = match cfg.kind {
			VpnKind::OpenVpn => cfg.openvpn_interface.as_str(),
			_ => cfg.wg_interface.as_str(),
		};
		let iface = collect_interface_status(shell, iface_name).await;
		if !iface.is_up {
			degraded = true;
			details.push(format!("interface {iface_name} is down"));
		}
		let wg = if matches!(cfg.kind, VpnKind::WireGuard | VpnKind::Awg) {
			let overview = collect_wireguard_overview(shell, iface_name).await;
			if overview.is_none() {
				degraded = true;
				details.push("wg show failed".to_string());
			}
			overview
		} else {
			None
		};
		let routes = collect_routes(shell, iface_name).await;
		(Some(iface), wg, None, routes)
	};

	let probe = probe_domain(&cfg.probe_domain).await;
	if probe.outcome == ProbeOutcome::Fail {
		degraded = true;
		details.push(format!("probe of {} failed", cfg.probe_domain));
	}

	let obfuscation_degraded = handle.obfuscation_degraded();
	if obfuscation_degraded {
		degraded = true;
		details.push("AmneziaWG obfuscation is disabled: running plain WireGuard via wg-quick fallback".to_string());
	}

	HealthReport {
		status: if degraded { Status::Degraded } else { Status::Healthy },
		vpn_type: Some(cfg.kind.into()),
		interface,
		wireguard,
		routes: routes_snapshot,
		hysteria2,
		probe,
		details,
		obfuscation_degraded,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::vpn::mocks::FakeShellOps;
	use crate::vpn::shell::CommandOutput;

	#[tokio::test]
	async fn collect_interface_status_reports_up_with_addresses() {
		let shell = FakeShellOps::new();
		shell.mark_interface_up("wg0");
		shell.set_response(
			"ip",
			&["-o", "addr", "show", "dev", "wg0"],
			CommandOutput {
				status_code: Some(0),
				stdout: "3: wg0    inet 10.0.0.2/32 scope global wg0\n".to_string(),
				stderr: String::new(),
			},
		);

		let status = collect_interface_status(&shell, "wg0").await;
		assert!(status.is_up);
		assert_eq!(status.addresses, vec!["10.0.0.2/32".to_string()]);
	}

	#[tokio::test]
	async fn collect_interface_status_reports_down_when_link_is_down() {
		let shell = FakeShellOps::new();
		let status = collect_interface_status(&shell, "wg0").await;
		assert!(!status.is_up);
	}

	#[tokio::test]
	async fn collect_wireguard_overview_parses_through_shell() {
		let shell = FakeShellOps::new();
		shell.set_response(
			"wg",
			&["show", "wg0"],
			CommandOutput {
				status_code: Some(0),
				stdout: "interface: wg0\n  public key: abc123\n  listening port: 51820\n\npeer: peerkey1\n  endpoint: 1.2.3.4:51820\n  allowed ips: 0.0.0.0/0\n"
					.to_string(),
				stderr: String::new(),
			},
		);

		let overview = collect_wireguard_overview(&shell, "wg0").await.expect("wg show should succeed");
		assert_eq!(overview.public_key.as_deref(), Some("abc123"));
		assert_eq!(overview.peers.len(), 1);
	}

	#[tokio::test]
	async fn collect_wireguard_overview_is_none_when_wg_show_fails() {
		let shell = FakeShellOps::new();
		shell.set_response(
			"wg",
			&["show", "wg0"],
			CommandOutput { status_code: Some(1), stdout: String::new(), stderr: "no such device".to_string() },
		);

		assert!(collect_wireguard_overview(&shell, "wg0").await.is_none());
	}

	#[tokio::test]
	async fn collect_hysteria2_status_checks_process_and_ports() {
		let shell = FakeShellOps::new();
		shell.set_response("pgrep", &["-f", "hysteria"], CommandOutput { status_code: Some(0), stdout: "1234\n".to_string(), stderr: String::new() });
		shell.open_port(1080);

		let cfg = VpnConfig {
			enabled: true,
			kind: VpnKind::Hysteria2,
			wg_config_path: None,
			wg_interface: "wg0".to_string(),
			openvpn_config_path: None,
			openvpn_interface: "tun0".to_string(),
			hysteria2_uri: Some("hysteria2://secret@example.com:443/".to_string()),
			hysteria2_socks5_port: 1080,
			hysteria2_http_port: 8080,
			hysteria2_config_path: "/tmp/hysteria-client-unused.yaml".to_string(),
			route_mode: crate::config::RouteMode::All,
			route_domains: Vec::new(),
			route_cidrs: Vec::new(),
			bypass_cidrs: Vec::new(),
			bootstrap_timeout: Duration::from_secs(5),
			probe_domain: "example.com".to_string(),
		};

		let status = collect_hysteria2_status(&shell, &cfg).await;
		assert!(status.is_running);
		assert!(status.socks5_accessible);
		assert!(!status.http_accessible);
	}

	#[test]
	fn parses_size_units() {
		assert_eq!(parse_size_to_bytes("1.50 KiB"), Some(1536));
		assert_eq!(parse_size_to_bytes("2 GiB"), Some(2 * 1024 * 1024 * 1024));
		assert_eq!(parse_size_to_bytes("500 B"), Some(500));
	}

	#[test]
	fn parses_wg_show_output() {
		let text = "interface: wg0\n  public key: abc123\n  listening port: 51820\n\npeer: peerkey1\n  endpoint: 1.2.3.4:51820\n  allowed ips: 0.0.0.0/0\n  latest handshake: 2 minutes ago\n  transfer: 1.50 KiB received, 2.00 KiB sent\n  persistent keepalive: every 25 seconds\n";
		let overview = parse_wireguard_output(text);
		assert_eq!(overview.listen_port, Some(51820));
		assert_eq!(overview.peers.len(), 1);
		let peer = &overview.peers[0];
		assert_eq!(peer.endpoint.as_deref(), Some("1.2.3.4:51820"));
		assert_eq!(peer.transfer_rx_bytes, Some(1536));
		assert_eq!(peer.transfer_tx_bytes, Some(2048));
	}

	#[test]
	fn disabled_report_has_disabled_status_and_skipped_probe() {
		let report = HealthReport::disabled();
		assert_eq!(report.status, Status::Disabled);
		assert_eq!(report.probe.outcome, ProbeOutcome::Skipped);
		assert_eq!(report.http_status_code(), 503);
	}
}
