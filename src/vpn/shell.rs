//! Thin async wrapper around the external binaries C7-C9 shell out to
//! (`ip`, `wg-quick`, `wg`, `openvpn`, `hysteria`, `sysctl`, `pgrep`, `ps`).
//! Grounded directly on `gnosis_vpn-root/src/routing/shell_ops.rs`'s
//! `ShellOps` trait + `RealShellOps` impl: the same shape (one async method
//! per command, `Clone + Send + Sync` so it can be shared across tasks),
//! widened to the commands this spec needs.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
	#[error("binary not found: {0}")]
	BinaryMissing(String),
	#[error("command {cmd} failed (status {status:?}): {stderr}")]
	CommandFailed { cmd: String, status: Option<i32>, stderr: String },
	#[error("io error running {cmd}: {source}")]
	Io { cmd: String, #[source] source: std::io::Error },
}

#[derive(Clone)]
pub struct CommandOutput {
	pub status_code: Option<i32>,
	pub stdout: String,
	pub stderr: String,
}

impl CommandOutput {
	pub fn success(&self) -> bool {
		self.status_code == Some(0)
	}
}

/// Everything C7-C9 need from the OS, abstracted so bootstrap/health logic
/// can be unit-tested against a fake.
#[async_trait]
pub trait ShellOps: Send + Sync + Clone {
	async fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput, ShellError>;
	async fn run_with_stdin(&self, cmd: &str, args: &[&str], stdin: &str) -> Result<CommandOutput, ShellError>;
	async fn binary_exists(&self, name: &str) -> bool;
	async fn spawn_detached(&self, cmd: &str, args: &[&str]) -> Result<u32, ShellError>;
	async fn tcp_connect_ok(&self, host: &str, port: u16) -> bool;
}

#[derive(Clone, Default)]
pub struct RealShellOps;

#[async_trait]
impl ShellOps for RealShellOps {
	async fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput, ShellError> {
		let output = Command::new(cmd)
			.args(args)
			.output()
			.await
			.map_err(|source| ShellError::Io { cmd: cmd.to_string(), source })?;
		Ok(CommandOutput {
			status_code: output.status.code(),
			stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		})
	}

	async fn run_with_stdin(&self, cmd: &str, args: &[&str], stdin: &str) -> Result<CommandOutput, ShellError> {
		let mut child = Command::new(cmd)
			.args(args)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()
			.map_err(|source| ShellError::Io { cmd: cmd.to_string(), source })?;

		if let Some(mut pipe) = child.stdin.take() {
			pipe.write_all(stdin.as_bytes())
				.await
				.map_err(|source| ShellError::Io { cmd: cmd.to_string(), source })?;
		}

		let output = child
			.wait_with_output()
			.await
			.map_err(|source| ShellError::Io { cmd: cmd.to_string(), source })?;
		Ok(CommandOutput {
			status_code: output.status.code(),
			stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		})
	}

	async fn binary_exists(&self, name: &str) -> bool {
		Command::new("which").arg(name).output().await.map(|o| o.status.success()).unwrap_or(false)
	}

	async fn spawn_detached(&self, cmd: &str, args: &[&str]) -> Result<u32, ShellError> {
		let child = Command::new(cmd)
			.args(args)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.spawn()
			.map_err(|source| ShellError::Io { cmd: cmd.to_string(), source })?;
		child.id().ok_or_else(|| ShellError::BinaryMissing(cmd.to_string()))
	}

	async fn tcp_connect_ok(&self, host: &str, port: u16) -> bool {
		tokio::time::timeout(std::time::Duration::from_secs(1), tokio::net::TcpStream::connect((host, port)))
			.await
			.map(|r| r.is_ok())
			.unwrap_or(false)
	}
}

pub fn command_error(cmd: &str, output: &CommandOutput) -> ShellError {
	ShellError::CommandFailed {
		cmd: cmd.to_string(),
		status: output.status_code,
		stderr: output.stderr.clone(),
	}
}
