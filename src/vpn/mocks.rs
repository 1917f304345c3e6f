//! Stateful `ShellOps` fake for exercising bootstrap/route/health control
//! flow without touching real `ip`/`wg-quick`/`wg` binaries. Grounded in
//! `gnosis_vpn-root/src/routing/mocks.rs`'s stateful-mock pattern: state is
//! tracked (interfaces, open ports, canned responses), not just a call
//! sequence, so tests can assert on what a lifecycle actually produced.
#![cfg(test)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::shell::{CommandOutput, ShellError, ShellOps};

#[derive(Default)]
struct FakeState {
	binaries: HashSet<String>,
	interfaces_up: HashSet<String>,
	open_ports: HashSet<u16>,
	responses: HashMap<String, CommandOutput>,
	/// Command key -> interface name: marks that interface up the first time
	/// the matching command succeeds, simulating the real side effect of
	/// `wg-quick up`/`amneziawg up`/the manual `ip link set ... up` step.
	auto_up: HashMap<String, String>,
	/// Interface -> number of `ip link show` queries for it before it reports
	/// up, independent of `interfaces_up`. Lets a test simulate an interface
	/// that comes up asynchronously (e.g. a few hundred ms after a daemon
	/// that exits non-zero), rather than instantly on the first poll.
	up_after_checks: HashMap<String, u32>,
	link_show_counts: HashMap<String, u32>,
	calls: Vec<(String, Vec<String>)>,
	spawn_count: u32,
}

fn call_key(cmd: &str, args: &[&str]) -> String {
	format!("{cmd} {}", args.join(" "))
}

#[derive(Clone)]
pub struct FakeShellOps {
	state: Arc<Mutex<FakeState>>,
}

impl FakeShellOps {
	pub fn new() -> Self {
		Self { state: Arc::new(Mutex::new(FakeState::default())) }
	}

	pub fn with_binaries(names: &[&str]) -> Self {
		let fake = Self::new();
		fake.state.lock().unwrap().binaries.extend(names.iter().map(|s| s.to_string()));
		fake
	}

	pub fn set_response(&self, cmd: &str, args: &[&str], output: CommandOutput) {
		self.state.lock().unwrap().responses.insert(call_key(cmd, args), output);
	}

	/// Registers that a successful run of `cmd args...` should mark `iface` up.
	pub fn auto_up_on(&self, cmd: &str, args: &[&str], iface: &str) {
		self.state.lock().unwrap().auto_up.insert(call_key(cmd, args), iface.to_string());
	}

	pub fn mark_interface_up(&self, iface: &str) {
		self.state.lock().unwrap().interfaces_up.insert(iface.to_string());
	}

	/// `iface` reports down for the first `n - 1` `ip link show` queries,
	/// then up from the `n`th query onward.
	pub fn mark_interface_up_after_checks(&self, iface: &str, n: u32) {
		self.state.lock().unwrap().up_after_checks.insert(iface.to_string(), n);
	}

	pub fn open_port(&self, port: u16) {
		self.state.lock().unwrap().open_ports.insert(port);
	}

	pub fn calls(&self) -> Vec<(String, Vec<String>)> {
		self.state.lock().unwrap().calls.clone()
	}

	pub fn spawn_count(&self) -> u32 {
		self.state.lock().unwrap().spawn_count
	}
}

#[async_trait]
impl ShellOps for FakeShellOps {
	async fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput, ShellError> {
		let mut s = self.state.lock().unwrap();
		s.calls.push((cmd.to_string(), args.iter().map(|a| a.to_string()).collect()));

		// `ip link show [dev] <iface>`: always answer from current state rather
		// than a canned response, since bootstrap/health poll this repeatedly.
		if cmd == "ip" && args.contains(&"link") && args.contains(&"show") {
			let iface = args.last().copied().unwrap_or_default();
			let count = s.link_show_counts.entry(iface.to_string()).or_insert(0);
			*count += 1;
			let up = s.interfaces_up.contains(iface) || s.up_after_checks.get(iface).is_some_and(|n| *count >= *n);
			let stdout = if up {
				format!("2: {iface}: <POINTOPOINT,UP,LOWER_UP> state UP")
			} else {
				format!("2: {iface}: <POINTOPOINT,NOARP> state DOWN")
			};
			return Ok(CommandOutput { status_code: Some(0), stdout, stderr: String::new() });
		}

		let key = call_key(cmd, args);
		let output = s
			.responses
			.get(&key)
			.cloned()
			.unwrap_or(CommandOutput { status_code: Some(0), stdout: String::new(), stderr: String::new() });

		if output.success() {
			if let Some(iface) = s.auto_up.get(&key).cloned() {
				s.interfaces_up.insert(iface);
			}
		}
		Ok(output)
	}

	async fn run_with_stdin(&self, cmd: &str, args: &[&str], _stdin: &str) -> Result<CommandOutput, ShellError> {
		self.run(cmd, args).await
	}

	async fn binary_exists(&self, name: &str) -> bool {
		self.state.lock().unwrap().binaries.contains(name)
	}

	async fn spawn_detached(&self, cmd: &str, args: &[&str]) -> Result<u32, ShellError> {
		let mut s = self.state.lock().unwrap();
		s.calls.push((cmd.to_string(), args.iter().map(|a| a.to_string()).collect()));
		s.spawn_count += 1;
		Ok(4242)
	}

	async fn tcp_connect_ok(&self, _host: &str, port: u16) -> bool {
		self.state.lock().unwrap().open_ports.contains(&port)
	}
}
