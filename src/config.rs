//! Environment-driven configuration, assembled with small `parse`/
//! `parse_default` helpers rather than a derive-based env crate — the shape
//! `agentgateway/src/config.rs` uses for its own `Config::new`.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::keypool::SelectionStrategy;

fn parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
	T::Err: std::fmt::Display,
{
	match env::var(key) {
		Ok(v) if v.trim().is_empty() => Ok(None),
		Ok(v) => v.trim().parse::<T>().map(Some).map_err(|e| anyhow::anyhow!("invalid {key}={v:?}: {e}")),
		Err(env::VarError::NotPresent) => Ok(None),
		Err(e) => bail!("reading {key}: {e}"),
	}
}

fn parse_default<T: FromStr>(key: &str, default: T) -> Result<T>
where
	T::Err: std::fmt::Display,
{
	Ok(parse(key)?.unwrap_or(default))
}

fn parse_duration_default(key: &str, default_secs: u64) -> Result<Duration> {
	let secs: u64 = parse_default(key, default_secs)?;
	Ok(Duration::from_secs(secs))
}

/// CSV env lists: trim each entry, drop empties — matches the original's
/// `_parse_csv`.
fn parse_csv(key: &str) -> Vec<String> {
	env::var(key)
		.ok()
		.map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
		.unwrap_or_default()
}

fn empty_to_none(s: String) -> Option<String> {
	if s.trim().is_empty() {
		None
	} else {
		Some(s)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiProvider {
	Gemini,
	OpenRouter,
}

impl FromStr for AiProvider {
	type Err = anyhow::Error;
	fn from_str(s: &str) -> Result<Self> {
		match s.to_ascii_lowercase().as_str() {
			"gemini" => Ok(AiProvider::Gemini),
			"openrouter" => Ok(AiProvider::OpenRouter),
			other => bail!("unknown AI_PROVIDER {other:?}"),
		}
	}
}

/// Per-provider knobs named in §6: keys, models, timeout, rate-limit params,
/// selection strategy, plus the OpenRouter-only attribution headers.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
	pub api_keys: Vec<String>,
	pub model_text: String,
	pub model_vision: String,
	pub timeout: Duration,
	pub qps_per_key: f64,
	pub burst_multiplier: f64,
	pub strategy: SelectionStrategy,
	pub base_url: Option<String>,
	pub app_url: Option<String>,
	pub app_name: Option<String>,
}

impl ProviderConfig {
	/// §6: `burstSize = max(1, floor(qps * mult))`.
	pub fn burst_size(&self) -> u32 {
		((self.qps_per_key * self.burst_multiplier).floor() as i64).max(1) as u32
	}

	fn load(prefix: &str) -> Result<Self> {
		let strategy: String = parse_default(&format!("{prefix}_STRATEGY"), "ROUND_ROBIN".to_string())?;
		Ok(Self {
			api_keys: parse_csv(&format!("{prefix}_API_KEYS")),
			model_text: parse_default(&format!("{prefix}_MODEL_TEXT"), default_model_text(prefix))?,
			model_vision: parse_default(&format!("{prefix}_MODEL_VISION"), default_model_vision(prefix))?,
			timeout: parse_duration_default(&format!("{prefix}_TIMEOUT_S"), 30)?,
			qps_per_key: parse_default(&format!("{prefix}_QPS_PER_KEY"), 1.0)?,
			burst_multiplier: parse_default(&format!("{prefix}_BURST_MULTIPLIER"), 1.0)?,
			strategy: SelectionStrategy::from_str(&strategy)?,
			base_url: env::var(format!("{prefix}_BASE_URL")).ok().and_then(empty_to_none),
			app_url: env::var(format!("{prefix}_APP_URL")).ok().and_then(empty_to_none),
			app_name: env::var(format!("{prefix}_APP_NAME")).ok().and_then(empty_to_none),
		})
	}
}

fn default_model_text(prefix: &str) -> String {
	match prefix {
		"GEMINI" => "gemini-1.5-flash".to_string(),
		_ => "openrouter/auto".to_string(),
	}
}

fn default_model_vision(prefix: &str) -> String {
	match prefix {
		"GEMINI" => "gemini-1.5-flash".to_string(),
		_ => "openrouter/auto".to_string(),
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpnKind {
	WireGuard,
	Awg,
	OpenVpn,
	Hysteria2,
}

impl FromStr for VpnKind {
	type Err = anyhow::Error;
	fn from_str(s: &str) -> Result<Self> {
		match s.to_ascii_lowercase().as_str() {
			"wireguard" => Ok(VpnKind::WireGuard),
			"awg" => Ok(VpnKind::Awg),
			"openvpn" => Ok(VpnKind::OpenVpn),
			"hysteria2" => Ok(VpnKind::Hysteria2),
			other => bail!("unknown VPN_TYPE {other:?}"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
	All,
	Domains,
	Cidr,
}

impl FromStr for RouteMode {
	type Err = anyhow::Error;
	fn from_str(s: &str) -> Result<Self> {
		match s.to_ascii_lowercase().as_str() {
			"all" => Ok(RouteMode::All),
			"domains" => Ok(RouteMode::Domains),
			"cidr" => Ok(RouteMode::Cidr),
			other => bail!("unknown VPN_ROUTE_MODE {other:?}"),
		}
	}
}

#[derive(Debug, Clone)]
pub struct VpnConfig {
	pub enabled: bool,
	pub kind: VpnKind,
	pub wg_config_path: Option<String>,
	pub wg_interface: String,
	pub openvpn_config_path: Option<String>,
	pub openvpn_interface: String,
	pub hysteria2_uri: Option<String>,
	pub hysteria2_socks5_port: u16,
	pub hysteria2_http_port: u16,
	pub hysteria2_config_path: String,
	pub route_mode: RouteMode,
	pub route_domains: Vec<String>,
	pub route_cidrs: Vec<String>,
	pub bypass_cidrs: Vec<String>,
	pub bootstrap_timeout: Duration,
	pub probe_domain: String,
}

impl VpnConfig {
	/// C4's SOCKS5 proxy channel, populated only by a running Hysteria2 tunnel.
	pub fn socks5_proxy(&self) -> Option<String> {
		if self.enabled && self.kind == VpnKind::Hysteria2 {
			Some(format!("socks5://127.0.0.1:{}", self.hysteria2_socks5_port))
		} else {
			None
		}
	}

	fn load() -> Result<Self> {
		let kind: String = parse_default("VPN_TYPE", "wireguard".to_string())?;
		let route_mode: String = parse_default("VPN_ROUTE_MODE", "all".to_string())?;
		Ok(Self {
			enabled: parse_default("VPN_ENABLED", false)?,
			kind: VpnKind::from_str(&kind)?,
			wg_config_path: env::var("WG_CONFIG_PATH").ok().and_then(empty_to_none),
			wg_interface: parse_default("WG_INTERFACE", "wg0".to_string())?,
			openvpn_config_path: env::var("OPENVPN_CONFIG_PATH").ok().and_then(empty_to_none),
			openvpn_interface: parse_default("OPENVPN_INTERFACE", "tun0".to_string())?,
			hysteria2_uri: env::var("HYSTERIA2_URI").ok().and_then(empty_to_none),
			hysteria2_socks5_port: parse_default("HYSTERIA2_SOCKS5_PORT", 1080u16)?,
			hysteria2_http_port: parse_default("HYSTERIA2_HTTP_PORT", 8080u16)?,
			hysteria2_config_path: parse_default("HYSTERIA2_CONFIG_PATH", "/etc/hysteria/client.yaml".to_string())?,
			route_mode: RouteMode::from_str(&route_mode)?,
			route_domains: parse_csv("VPN_ROUTE_DOMAINS"),
			route_cidrs: parse_csv("VPN_ROUTE_CIDRS"),
			bypass_cidrs: parse_csv("VPN_BYPASS_CIDRS"),
			bootstrap_timeout: parse_duration_default("VPN_BOOTSTRAP_TIMEOUT_S", 30)?,
			probe_domain: parse_default("VPN_PROBE_DOMAIN", "generativelanguage.googleapis.com".to_string())?,
		})
	}
}

#[derive(Debug, Clone)]
pub struct Config {
	pub ai_provider: AiProvider,
	pub gemini: Option<ProviderConfig>,
	pub openrouter: Option<ProviderConfig>,
	pub vpn: Option<VpnConfig>,
}

impl Config {
	pub fn from_env() -> Result<Self> {
		let ai_provider: String = parse_default("AI_PROVIDER", "gemini".to_string())?;
		let ai_provider = AiProvider::from_str(&ai_provider)?;

		let gemini = ProviderConfig::load("GEMINI").context("loading GEMINI_* config")?;
		let openrouter = ProviderConfig::load("OPENROUTER").context("loading OPENROUTER_* config")?;

		match ai_provider {
			AiProvider::Gemini if gemini.api_keys.is_empty() => bail!("AI_PROVIDER=gemini but GEMINI_API_KEYS is empty"),
			AiProvider::OpenRouter if openrouter.api_keys.is_empty() => {
				bail!("AI_PROVIDER=openrouter but OPENROUTER_API_KEYS is empty")
			}
			_ => {}
		}

		let vpn_enabled: bool = parse_default("VPN_ENABLED", false)?;
		let vpn = if vpn_enabled { Some(VpnConfig::load()?) } else { None };

		Ok(Self {
			ai_provider,
			gemini: Some(gemini),
			openrouter: Some(openrouter),
			vpn,
		})
	}

	pub fn active_provider(&self) -> &ProviderConfig {
		match self.ai_provider {
			AiProvider::Gemini => self.gemini.as_ref().expect("gemini config always loaded"),
			AiProvider::OpenRouter => self.openrouter.as_ref().expect("openrouter config always loaded"),
		}
	}
}
