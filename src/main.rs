//! Binary entry point: loads config, brings up the VPN (if enabled), starts
//! the admin health endpoint, and exposes the pool client for callers in the
//! same process. Structured the way the teacher's root `main.rs` wires
//! tracing + clap + a single `tokio::main` async fn.

use std::net::SocketAddr;

use clap::Parser;
use gateway_core::{admin, config::Config, Core};

#[derive(Parser, Debug)]
#[command(name = "gateway-core", about = "LLM provider pool + egress VPN controller")]
struct Args {
	/// Address the admin health endpoint binds to.
	#[arg(long, env = "ADMIN_BIND_ADDR", default_value = "127.0.0.1:9091")]
	admin_bind_addr: SocketAddr,

	/// Skip VPN bootstrap even if VPN_ENABLED is set; useful for local runs.
	#[arg(long, env = "SKIP_VPN_BOOTSTRAP", default_value_t = false)]
	skip_vpn_bootstrap: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();

	let args = Args::parse();
	let cfg = Config::from_env()?;
	let core = Core::new(&cfg)?;

	if let Some(vpn_cfg) = &cfg.vpn {
		if !args.skip_vpn_bootstrap {
			tracing::info!(vpn_type = ?vpn_cfg.kind, "bootstrapping vpn");
			if let Err(e) = core.bootstrap_vpn(vpn_cfg).await {
				tracing::error!(error = %e, "vpn bootstrap failed, continuing without egress isolation");
			}
		}
	}

	let admin_state = admin::AdminState {
		vpn_config: cfg.vpn.clone(),
		vpn_handle: core.vpn.clone(),
	};
	let app = admin::router(admin_state);
	let listener = tokio::net::TcpListener::bind(args.admin_bind_addr).await?;
	tracing::info!(addr = %args.admin_bind_addr, "admin endpoint listening");

	axum::serve(listener, app).await?;
	Ok(())
}
