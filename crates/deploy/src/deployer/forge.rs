//! Deploy contracts with `forge create`.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use tokio::process::Command;

use super::{ContractDeployer, DeployError, DeployParams, DeployRequest};
use crate::config::ProjectConfig;

/// Default time allowed for one deployment transaction to be sent and confirmed.
pub const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(300);

/// JSON printed by `forge create --json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgeOutput {
    pub deployer: String,
    pub deployed_to: String,
    pub transaction_hash: String,
}

impl ForgeOutput {
    /// Extract the JSON summary from forge's stdout, which may be preceded by
    /// compiler output.
    pub fn parse(stdout: &str) -> anyhow::Result<Self> {
        let line = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| line.starts_with('{'))
            .context("No JSON output found in forge stdout")?;

        serde_json::from_str(line).context("Failed to parse forge output")
    }
}

/// Deploys contracts by running `forge create` inside the contracts project.
#[derive(Debug, Clone)]
pub struct ForgeDeployer {
    config: Arc<ProjectConfig>,
    forge_bin: PathBuf,
    project_root: PathBuf,
    timeout: Duration,
}

impl ForgeDeployer {
    pub fn new(config: Arc<ProjectConfig>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            forge_bin: PathBuf::from("forge"),
            project_root: project_root.into(),
            timeout: DEFAULT_DEPLOY_TIMEOUT,
        }
    }

    pub fn forge_bin(mut self, forge_bin: impl Into<PathBuf>) -> Self {
        self.forge_bin = forge_bin.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    fn command(&self, request: &DeployRequest, rpc_url: &str, private_key: &str) -> Command {
        let mut cmd = Command::new(&self.forge_bin);
        cmd.current_dir(&self.project_root)
            .arg("create")
            .arg(format!(
                "{}:{}",
                request.kind.artifact(),
                request.kind.contract_name()
            ))
            .args(["--rpc-url", rpc_url])
            .args(["--private-key", private_key])
            .arg("--broadcast")
            .arg("--json");

        if !request.args.is_empty() {
            cmd.arg("--constructor-args").args(&request.args);
        }

        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl ContractDeployer for ForgeDeployer {
    async fn deploy(
        &self,
        request: &DeployRequest,
        params: &DeployParams,
    ) -> Result<String, DeployError> {
        let rpc_url = self.config.rpc_url(params.chain_id).ok_or_else(|| {
            DeployError::misconfigured(
                request.kind,
                format!("no rpc_url configured for chain {}", params.chain_id),
            )
        })?;
        if params.signer.is_empty() {
            return Err(DeployError::misconfigured(
                request.kind,
                "no signer key configured",
            ));
        }

        let mut cmd = self.command(request, rpc_url.as_str(), params.signer.expose());

        tracing::debug!(
            chain = params.chain_id,
            kind = %request.kind,
            project_root = %self.project_root.display(),
            "Running forge create"
        );

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                DeployError::failed(
                    request.kind,
                    anyhow::anyhow!("forge create timed out after {:?}", self.timeout),
                )
            })?
            .context("Failed to run forge")
            .map_err(|e| DeployError::failed(request.kind, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeployError::failed(
                request.kind,
                anyhow::anyhow!("forge create exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let forge_output =
            ForgeOutput::parse(&stdout).map_err(|e| DeployError::failed(request.kind, e))?;

        tracing::debug!(
            chain = params.chain_id,
            kind = %request.kind,
            tx = %forge_output.transaction_hash,
            "Deployment transaction confirmed"
        );

        Ok(forge_output.deployed_to)
    }
}
