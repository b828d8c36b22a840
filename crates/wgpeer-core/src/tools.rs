//! External collaborators: the provisioning script and interface control.
//!
//! Both are opaque commands. Every invocation is bounded by a timeout and any
//! non-zero exit, spawn failure or expiry surfaces as
//! [`RegistryError::ExternalTool`].

use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};

/// Provisions a new peer: keys, client config, server stanza.
#[allow(async_fn_in_trait)]
pub trait Provisioner {
    /// Creates peer `name` at `octet`.
    async fn create(&self, name: &str, octet: u8) -> Result<()>;
}

/// Brings the WireGuard interface down and up.
#[allow(async_fn_in_trait)]
pub trait InterfaceControl {
    /// Stops the interface.
    async fn down(&self) -> Result<()>;

    /// Starts the interface.
    async fn up(&self) -> Result<()>;
}

/// Exit status and stderr of a finished tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit code; `None` if killed by a signal.
    pub code: Option<i32>,
    /// Captured standard error.
    pub stderr: String,
}

impl ToolOutput {
    /// Returns `true` on a zero exit.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs `program args...` and waits at most `timeout`.
///
/// # Errors
///
/// Returns `ExternalTool` if the program cannot be spawned or does not finish in time.
pub async fn run_tool(program: &str, args: &[&str], timeout: Duration) -> Result<ToolOutput> {
    let rendered = describe(program, args);
    debug!(command = %rendered, "running external tool");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| {
            RegistryError::external_tool(
                &rendered,
                format!("timed out after {} seconds", timeout.as_secs()),
            )
        })?
        .map_err(|e| RegistryError::external_tool(&rendered, format!("failed to spawn: {e}")))?;

    Ok(ToolOutput {
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Runs a tool and turns a non-zero exit into an error.
///
/// # Errors
///
/// Returns `ExternalTool` on spawn failure, timeout or non-zero exit.
pub async fn run_checked(program: &str, args: &[&str], timeout: Duration) -> Result<()> {
    let output = run_tool(program, args, timeout).await?;
    if output.success() {
        return Ok(());
    }

    let mut message = match output.code {
        Some(code) => format!("exited with {code}"),
        None => "terminated by signal".to_string(),
    };
    if !output.stderr.is_empty() {
        let _ = write!(message, ": {}", output.stderr);
    }
    warn!(command = %describe(program, args), %message, "external tool failed");
    Err(RegistryError::external_tool(describe(program, args), message))
}

fn describe(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs the provisioning shell script as `<script> <name> <octet>`.
#[derive(Debug, Clone)]
pub struct ScriptProvisioner {
    script: PathBuf,
    timeout: Duration,
}

impl ScriptProvisioner {
    /// Creates a provisioner for the configured script.
    #[must_use]
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            script: config.provision_script.clone(),
            timeout: config.tool_timeout(),
        }
    }
}

impl Provisioner for ScriptProvisioner {
    async fn create(&self, name: &str, octet: u8) -> Result<()> {
        let script = self.script.to_string_lossy();
        run_checked(&script, &[name, &octet.to_string()], self.timeout).await
    }
}

/// Controls the interface through `wg-quick`.
#[derive(Debug, Clone)]
pub struct WgQuickControl {
    interface: String,
    timeout: Duration,
}

impl WgQuickControl {
    /// Creates a controller for the configured interface.
    #[must_use]
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            interface: config.interface.clone(),
            timeout: config.tool_timeout(),
        }
    }
}

impl InterfaceControl for WgQuickControl {
    async fn down(&self) -> Result<()> {
        run_checked("wg-quick", &["down", &self.interface], self.timeout).await
    }

    async fn up(&self) -> Result<()> {
        run_checked("wg-quick", &["up", &self.interface], self.timeout).await
    }
}

#[derive(Debug, Default)]
struct FakeProvisionerState {
    calls: Vec<(String, u8)>,
    fail: HashSet<String>,
    silent: HashSet<String>,
}

/// A provisioner that writes the same files the real script does, for tests.
///
/// Client configs get an `Address` line, key files are written, a stanza is
/// appended to the server document and a line to the summary file.
#[derive(Debug, Clone)]
pub struct FakeProvisioner {
    config: RegistryConfig,
    state: Arc<Mutex<FakeProvisionerState>>,
}

impl FakeProvisioner {
    /// Creates a fake writing into the configured layout.
    #[must_use]
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            config: config.clone(),
            state: Arc::new(Mutex::new(FakeProvisionerState::default())),
        }
    }

    /// Makes creation of `name` exit non-zero.
    pub fn fail_for(&self, name: &str) {
        self.state.lock().fail.insert(name.to_string());
    }

    /// Makes creation of `name` exit zero without writing anything.
    pub fn silent_for(&self, name: &str) {
        self.state.lock().silent.insert(name.to_string());
    }

    /// Every `(name, octet)` the fake was invoked with.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, u8)> {
        self.state.lock().calls.clone()
    }

    fn write_peer(&self, name: &str, octet: u8) -> std::io::Result<()> {
        let address = self.config.address_for(octet);
        fs::create_dir_all(&self.config.config_dir)?;
        fs::write(
            self.config.client_config(name),
            format!(
                "[Interface]\nPrivateKey = {name}-private\nAddress = {address}/32\nDNS = 1.1.1.1\n\n\
                 [Peer]\nPublicKey = server-public\nEndpoint = 203.0.113.1:{}\nAllowedIPs = 0.0.0.0/0\n",
                self.config.listen_port
            ),
        )?;
        fs::write(self.config.client_private_key(name), format!("{name}-private\n"))?;
        fs::write(self.config.client_public_key(name), format!("{name}-public\n"))?;

        let mut server = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.config.server_document())?;
        write!(server, "\n[Peer]\nPublicKey = {name}-public\nAllowedIPs = {address}/32\n")?;

        let mut summary = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.summary_file)?;
        writeln!(summary, "{address} {name}")?;
        Ok(())
    }
}

impl Provisioner for FakeProvisioner {
    async fn create(&self, name: &str, octet: u8) -> Result<()> {
        let (fail, silent) = {
            let mut state = self.state.lock();
            state.calls.push((name.to_string(), octet));
            (state.fail.contains(name), state.silent.contains(name))
        };

        let command = format!("fake-provision {name} {octet}");
        if fail {
            return Err(RegistryError::external_tool(command, "exited with 1: simulated failure"));
        }
        if silent {
            return Ok(());
        }
        self.write_peer(name, octet)
            .map_err(|e| RegistryError::external_tool(command, e.to_string()))
    }
}

#[derive(Debug, Default)]
struct FakeInterfaceState {
    events: Vec<&'static str>,
    fail_down: bool,
    fail_up: bool,
}

/// Records interface cycles instead of running `wg-quick`.
#[derive(Debug, Clone, Default)]
pub struct FakeInterfaceControl {
    state: Arc<Mutex<FakeInterfaceState>>,
}

impl FakeInterfaceControl {
    /// Creates a fake that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `down` fail.
    pub fn fail_down(&self) {
        self.state.lock().fail_down = true;
    }

    /// Makes `up` fail.
    pub fn fail_up(&self) {
        self.state.lock().fail_up = true;
    }

    /// `"down"` / `"up"` in call order.
    #[must_use]
    pub fn events(&self) -> Vec<&'static str> {
        self.state.lock().events.clone()
    }
}

impl InterfaceControl for FakeInterfaceControl {
    async fn down(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.events.push("down");
        if state.fail_down {
            return Err(RegistryError::external_tool("fake down", "exited with 1"));
        }
        Ok(())
    }

    async fn up(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.events.push("up");
        if state.fail_up {
            return Err(RegistryError::external_tool("fake up", "exited with 1"));
        }
        Ok(())
    }
}
