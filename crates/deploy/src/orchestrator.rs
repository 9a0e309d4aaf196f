//! Concurrent convergence loops, one per chain.

use std::{fmt, sync::Arc};

use backon::{BackoffBuilder, ExponentialBuilder};
use futures::future::join_all;

use crate::{
    config::RetryConfig,
    deployer::{ContractDeployer, SignerKey},
    driver::DeploymentDriver,
    types::ChainId,
};

/// How a chain's convergence loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    /// Every contract of the chain is deployed.
    Complete { passes: usize },
    /// The retry budget ran out before the chain converged.
    Stalled { passes: usize, last_error: String },
    /// The configuration cannot produce a complete deployment; retrying is pointless.
    Misconfigured { passes: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOutcome {
    pub chain: ChainId,
    pub status: ChainStatus,
}

impl ChainOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self.status, ChainStatus::Complete { .. })
    }
}

impl fmt::Display for ChainOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            ChainStatus::Complete { passes } => {
                write!(f, "chain {}: complete after {} pass(es)", self.chain, passes)
            }
            ChainStatus::Stalled { passes, last_error } => write!(
                f,
                "chain {}: stalled after {} pass(es): {}",
                self.chain, passes, last_error
            ),
            ChainStatus::Misconfigured { passes, reason } => write!(
                f,
                "chain {}: misconfigured after {} pass(es): {}",
                self.chain, passes, reason
            ),
        }
    }
}

/// Exponential backoff between two passes of the same chain.
pub fn backoff_policy(retry: &RetryConfig) -> ExponentialBuilder {
    let builder = ExponentialBuilder::default()
        .with_min_delay(retry.min_delay())
        .with_max_delay(retry.max_delay())
        .with_max_times(retry.max_attempts);
    if retry.jitter {
        builder.with_jitter()
    } else {
        builder
    }
}

/// Runs the [`DeploymentDriver`] of every chain concurrently until each converges.
pub struct Orchestrator<D> {
    driver: Arc<DeploymentDriver<D>>,
    retry: RetryConfig,
    signer: SignerKey,
}

impl<D: ContractDeployer> Orchestrator<D> {
    pub fn new(driver: Arc<DeploymentDriver<D>>, retry: RetryConfig, signer: SignerKey) -> Self {
        Self {
            driver,
            retry,
            signer,
        }
    }

    /// Converge every chain of the deployment, hub first.
    pub async fn run_all(&self) -> Vec<ChainOutcome> {
        let chains = self.driver.roles().chains();
        self.run(&chains).await
    }

    /// Launch one convergence loop per chain and wait for all of them.
    ///
    /// Loops are independent: a chain that stalls or is misconfigured does not stop
    /// the others.
    pub async fn run(&self, chains: &[ChainId]) -> Vec<ChainOutcome> {
        tracing::info!(?chains, "Starting deployment");

        let handles: Vec<_> = chains
            .iter()
            .map(|&chain| {
                let driver = self.driver.clone();
                let signer = self.signer.clone();
                let backoff = backoff_policy(&self.retry);
                tokio::spawn(async move { converge(driver, chain, signer, backoff).await })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(chains)
            .map(|(result, &chain)| match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(chain, error = %e, "Deployment task panicked");
                    ChainOutcome {
                        chain,
                        status: ChainStatus::Stalled {
                            passes: 0,
                            last_error: format!("deployment task failed: {e}"),
                        },
                    }
                }
            })
            .collect()
    }
}

async fn converge<D: ContractDeployer>(
    driver: Arc<DeploymentDriver<D>>,
    chain: ChainId,
    signer: SignerKey,
    backoff: ExponentialBuilder,
) -> ChainOutcome {
    let mut params = match driver.params_for(chain, signer).await {
        Ok(params) => params,
        Err(e) => {
            tracing::error!(chain, error = %e, "Cannot deploy chain");
            return ChainOutcome {
                chain,
                status: ChainStatus::Misconfigured {
                    passes: 0,
                    reason: e.to_string(),
                },
            };
        }
    };

    let mut delays = backoff.build();
    let mut passes = 0;

    loop {
        passes += 1;

        let last_error = match driver.run_once(&mut params).await {
            Ok(report) if report.is_complete() => {
                return ChainOutcome {
                    chain,
                    status: ChainStatus::Complete { passes },
                };
            }
            Ok(report) => {
                if let Some(e) = report.permanent_failure() {
                    tracing::error!(chain, error = %e, "Chain is misconfigured, giving up");
                    return ChainOutcome {
                        chain,
                        status: ChainStatus::Misconfigured {
                            passes,
                            reason: e.to_string(),
                        },
                    };
                }
                report.summary()
            }
            Err(e) if !e.is_retryable() => {
                return ChainOutcome {
                    chain,
                    status: ChainStatus::Misconfigured {
                        passes,
                        reason: e.to_string(),
                    },
                };
            }
            Err(e) => {
                tracing::warn!(chain, error = %e, "Deployment pass failed");
                e.to_string()
            }
        };

        match delays.next() {
            Some(delay) => {
                tracing::info!(chain, passes, ?delay, "Chain not fully deployed, retrying");
                tokio::time::sleep(delay).await;
            }
            None => {
                tracing::error!(chain, passes, error = %last_error, "Retry budget exhausted");
                return ChainOutcome {
                    chain,
                    status: ChainStatus::Stalled { passes, last_error },
                };
            }
        }
    }
}
