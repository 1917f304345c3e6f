//! §4.8 Route Programmer. Grounded in `vpn_bootstrap.py`'s
//! `_resolve_domains`/`configure_split_tunnel`: the Google CDN CIDR
//! shortcut, the 3-attempt-union DNS resolution, and the `all`/`domains`/
//! `cidr` dispatch are all carried over verbatim.

use std::net::IpAddr;

use hickory_resolver::TokioAsyncResolver;

use crate::config::{RouteMode, VpnConfig};

use super::shell::{command_error, ShellOps};
use super::{RouteState, VpnError};

/// §4.8: "any `googleapis.com` and `generativelanguage.googleapis.com`" is
/// expanded to these Anycast CIDR blocks instead of per-A-record resolution.
const GOOGLE_CIDRS: &[&str] = &["142.250.0.0/15", "172.217.0.0/16", "216.58.192.0/19"];

fn is_google_domain(domain: &str) -> bool {
	domain.ends_with("googleapis.com")
}

/// §4.8: "DNS resolution must attempt each domain up to 3 times and union
/// the results."
pub async fn resolve_domain(domain: &str) -> Result<Vec<IpAddr>, VpnError> {
	if is_google_domain(domain) {
		return Ok(GOOGLE_CIDRS.iter().map(|c| c.split('/').next().unwrap().parse().unwrap()).collect());
	}

	let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| VpnError::DnsFailed {
		domain: domain.to_string(),
		reason: e.to_string(),
	})?;

	let mut addrs = std::collections::HashSet::new();
	let mut last_err = None;
	for _ in 0..3 {
		match resolver.lookup_ip(domain).await {
			Ok(lookup) => addrs.extend(lookup.iter()),
			Err(e) => last_err = Some(e.to_string()),
		}
	}
	if addrs.is_empty() {
		return Err(VpnError::DnsFailed {
			domain: domain.to_string(),
			reason: last_err.unwrap_or_else(|| "no records returned".to_string()),
		});
	}
	Ok(addrs.into_iter().collect())
}

/// Route targets for `routeMode = domains`: the domain-or-CIDR expansion,
/// Google domains collapsed to their well-known CIDRs.
pub async fn resolve_route_targets(domains: &[String]) -> Result<Vec<String>, VpnError> {
	let mut targets = Vec::new();
	for domain in domains {
		if is_google_domain(domain) {
			targets.extend(GOOGLE_CIDRS.iter().map(|s| s.to_string()));
			continue;
		}
		for addr in resolve_domain(domain).await? {
			targets.push(format!("{addr}/32"));
		}
	}
	Ok(targets)
}

/// §4.8: capture the current default route before the tunnel mutates it.
/// `ip route show default` prints e.g. `default via 192.168.1.1 dev eth0
/// metric 100`.
pub async fn capture_default_route<S: ShellOps>(shell: &S) -> Result<Option<RouteState>, VpnError> {
	let output = shell.run("ip", &["route", "show", "default"]).await?;
	Ok(parse_default_route(&output.stdout))
}

fn parse_default_route(stdout: &str) -> Option<RouteState> {
	let line = stdout.lines().next()?;
	let tokens: Vec<&str> = line.split_whitespace().collect();
	let gateway = tokens.iter().position(|t| *t == "via").and_then(|i| tokens.get(i + 1)).map(|s| s.to_string())?;
	let dev = tokens.iter().position(|t| *t == "dev").and_then(|i| tokens.get(i + 1)).map(|s| s.to_string())?;
	let metric = tokens
		.iter()
		.position(|t| *t == "metric")
		.and_then(|i| tokens.get(i + 1))
		.and_then(|s| s.parse().ok());
	Some(RouteState { gateway, dev, metric })
}

/// §4.8 full dispatch for `all`/`domains`/`cidr`.
pub async fn configure_routes<S: ShellOps>(shell: &S, cfg: &VpnConfig, tun_if: &str, original: &Option<RouteState>) -> Result<(), VpnError> {
	match cfg.route_mode {
		RouteMode::All => {
			apply_bypass_cidrs(shell, cfg, original).await?;
		}
		RouteMode::Domains => {
			let targets = resolve_route_targets(&cfg.route_domains).await?;
			install_targets(shell, &targets, tun_if).await?;
			restore_default_route(shell, tun_if, original).await?;
			apply_bypass_cidrs(shell, cfg, original).await?;
		}
		RouteMode::Cidr => {
			install_targets(shell, &cfg.route_cidrs, tun_if).await?;
			restore_default_route(shell, tun_if, original).await?;
			apply_bypass_cidrs(shell, cfg, original).await?;
		}
	}
	Ok(())
}

async fn install_targets<S: ShellOps>(shell: &S, targets: &[String], tun_if: &str) -> Result<(), VpnError> {
	for target in targets {
		let output = shell.run("ip", &["route", "replace", target, "dev", tun_if]).await?;
		if !output.success() {
			return Err(VpnError::RouteFailed(format!("route replace {target} dev {tun_if}: {}", output.stderr)));
		}
	}
	Ok(())
}

/// §4.8 `domains`/`cidr`: "delete the default route ... and restore the
/// original default route."
async fn restore_default_route<S: ShellOps>(shell: &S, tun_if: &str, original: &Option<RouteState>) -> Result<(), VpnError> {
	let _ = shell.run("ip", &["route", "del", "default", "dev", tun_if]).await;
	if let Some(orig) = original {
		let mut args = vec!["route", "replace", "default", "via", orig.gateway.as_str(), "dev", orig.dev.as_str()];
		let metric_str;
		if let Some(metric) = orig.metric {
			metric_str = metric.to_string();
			args.push("metric");
			args.push(&metric_str);
		}
		let output = shell.run("ip", &args).await?;
		if !output.success() {
			return Err(VpnError::RouteFailed(format!("restore default route: {}", output.stderr)));
		}
	}
	Ok(())
}

async fn apply_bypass_cidrs<S: ShellOps>(shell: &S, cfg: &VpnConfig, original: &Option<RouteState>) -> Result<(), VpnError> {
	let Some(orig) = original else { return Ok(()) };
	for cidr in &cfg.bypass_cidrs {
		let output = shell.run("ip", &["route", "replace", cidr, "via", &orig.gateway, "dev", &orig.dev]).await?;
		if !output.success() {
			return Err(command_error("ip route replace (bypass)", &output).into());
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::RouteMode;
	use crate::vpn::mocks::FakeShellOps;

	fn base_vpn_config(route_mode: RouteMode) -> VpnConfig {
		VpnConfig {
			enabled: true,
			kind: crate::config::VpnKind::WireGuard,
			wg_config_path: None,
			wg_interface: "wg0".to_string(),
			openvpn_config_path: None,
			openvpn_interface: "tun0".to_string(),
			hysteria2_uri: None,
			hysteria2_socks5_port: 1080,
			hysteria2_http_port: 8080,
			hysteria2_config_path: "/tmp/hysteria-client-unused.yaml".to_string(),
			route_mode,
			route_domains: Vec::new(),
			route_cidrs: vec!["10.0.0.0/24".to_string()],
			bypass_cidrs: vec!["192.168.1.1/32".to_string()],
			bootstrap_timeout: std::time::Duration::from_secs(5),
			probe_domain: "example.com".to_string(),
		}
	}

	/// §4.8 `cidr` dispatch: install the configured CIDRs on the tunnel
	/// interface, tear down the tunnel's default route, restore the captured
	/// original, then lay the bypass CIDRs back over the original gateway.
	#[tokio::test]
	async fn configure_routes_cidr_mode_installs_then_restores_then_bypasses() {
		let shell = FakeShellOps::new();
		let cfg = base_vpn_config(RouteMode::Cidr);
		let original = Some(RouteState { gateway: "192.168.1.1".to_string(), dev: "eth0".to_string(), metric: Some(100) });

		configure_routes(&shell, &cfg, "wg0", &original).await.unwrap();

		let calls = shell.calls();
		assert!(
			calls.iter().any(|(c, a)| c == "ip" && a == &["route", "replace", "10.0.0.0/24", "dev", "wg0"]),
			"expected the configured CIDR to be installed on the tunnel interface: {calls:?}"
		);
		assert!(
			calls.iter().any(|(c, a)| c == "ip" && a == &["route", "del", "default", "dev", "wg0"]),
			"expected the tunnel's default route to be deleted: {calls:?}"
		);
		assert!(
			calls
				.iter()
				.any(|(c, a)| c == "ip" && a == &["route", "replace", "default", "via", "192.168.1.1", "dev", "eth0", "metric", "100"]),
			"expected the original default route to be restored: {calls:?}"
		);
		assert!(
			calls.iter().any(|(c, a)| c == "ip" && a == &["route", "replace", "192.168.1.1/32", "via", "192.168.1.1", "dev", "eth0"]),
			"expected the bypass CIDR to be routed over the original gateway: {calls:?}"
		);
	}

	/// §4.8 `all` mode never touches the tunnel's own default route, only the
	/// bypass CIDRs.
	#[tokio::test]
	async fn configure_routes_all_mode_only_applies_bypass_cidrs() {
		let shell = FakeShellOps::new();
		let cfg = base_vpn_config(RouteMode::All);
		let original = Some(RouteState { gateway: "192.168.1.1".to_string(), dev: "eth0".to_string(), metric: None });

		configure_routes(&shell, &cfg, "wg0", &original).await.unwrap();

		let calls = shell.calls();
		assert!(calls.iter().all(|(c, a)| !(c == "ip" && a.first().map(String::as_str) == Some("route") && a.get(1).map(String::as_str) == Some("del"))));
		assert!(calls.iter().any(|(c, a)| c == "ip" && a == &["route", "replace", "192.168.1.1/32", "via", "192.168.1.1", "dev", "eth0"]));
	}

	#[test]
	fn parses_default_route_with_metric() {
		let route = parse_default_route("default via 192.168.1.1 dev eth0 metric 100\n").unwrap();
		assert_eq!(route.gateway, "192.168.1.1");
		assert_eq!(route.dev, "eth0");
		assert_eq!(route.metric, Some(100));
	}

	#[test]
	fn parses_default_route_without_metric() {
		let route = parse_default_route("default via 10.0.0.1 dev wlan0\n").unwrap();
		assert_eq!(route.gateway, "10.0.0.1");
		assert_eq!(route.metric, None);
	}

	#[tokio::test]
	async fn google_domains_expand_to_known_cidrs() {
		let targets = resolve_route_targets(&["generativelanguage.googleapis.com".to_string()]).await.unwrap();
		assert_eq!(targets, vec!["142.250.0.0/15", "172.217.0.0/16", "216.58.192.0/19"]);
	}
}
