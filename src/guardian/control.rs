//! Running the guardian on a timer
//!
//! `start` spawns one task that owns the schedule. Timer ticks and control
//! commands are handled one at a time by that task.

use crate::errors::{GatekeepError, Result};
use crate::guardian::agent::{Guardian, GuardianMode, TickReport};
use crate::vault::OpId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub enum GuardianCommand {
    Stop {
        reply: oneshot::Sender<()>,
    },
    SetMode {
        mode: GuardianMode,
        reply: oneshot::Sender<()>,
    },
    CancelByChallenge {
        code: String,
        reply: oneshot::Sender<Result<Vec<OpId>>>,
    },
    /// Run a tick now instead of waiting for the timer
    Tick {
        reply: oneshot::Sender<TickReport>,
    },
}

/// Handle to a running guardian task
pub struct GuardianHandle {
    tx: mpsc::Sender<GuardianCommand>,
    task: JoinHandle<()>,
}

/// Spawn the guardian loop, ticking every `poll_interval`
pub fn start(guardian: Arc<Guardian>, poll_interval: Duration, command_capacity: usize) -> GuardianHandle {
    let (tx, mut rx) = mpsc::channel(command_capacity.max(1));

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Guardian started, polling every {:?}", poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = guardian.tick().await;
                    for err in &report.errors {
                        debug!(account = %err.account, action = err.action.as_str(), "{}", err.message);
                    }
                }
                command = rx.recv() => match command {
                    Some(GuardianCommand::Stop { reply }) => {
                        let _ = reply.send(());
                        break;
                    }
                    Some(GuardianCommand::SetMode { mode, reply }) => {
                        guardian.set_mode(mode);
                        let _ = reply.send(());
                    }
                    Some(GuardianCommand::CancelByChallenge { code, reply }) => {
                        let result = guardian.cancel_by_challenge(&code).await;
                        if let Err(e) = &result {
                            warn!(error = %e, "Challenge cancel rejected");
                        }
                        let _ = reply.send(result);
                    }
                    Some(GuardianCommand::Tick { reply }) => {
                        let _ = reply.send(guardian.tick().await);
                    }
                    None => break,
                },
            }
        }

        info!("Guardian stopped");
    });

    GuardianHandle { tx, task }
}

impl GuardianHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> GuardianCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| GatekeepError::InternalError("guardian is not running".to_string()))?;
        rx.await
            .map_err(|_| GatekeepError::InternalError("guardian dropped the request".to_string()))
    }

    pub async fn set_mode(&self, mode: GuardianMode) -> Result<()> {
        self.request(|reply| GuardianCommand::SetMode { mode, reply })
            .await
    }

    pub async fn cancel_by_challenge(&self, code: &str) -> Result<Vec<OpId>> {
        let code = code.to_string();
        self.request(|reply| GuardianCommand::CancelByChallenge { code, reply })
            .await?
    }

    pub async fn tick_now(&self) -> Result<TickReport> {
        self.request(|reply| GuardianCommand::Tick { reply }).await
    }

    /// Stop the loop and wait for the task to finish
    pub async fn stop(self) -> Result<()> {
        self.request(|reply| GuardianCommand::Stop { reply }).await?;
        self.task
            .await
            .map_err(|e| GatekeepError::InternalError(format!("guardian task failed: {}", e)))
    }
}
