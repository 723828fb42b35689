//! Bounded submit-and-confirm loop for outbound transfers.
//!
//! Every resubmission is preceded by a status check of the previous signature, so a transfer
//! that might still land is never sent twice. Outcomes distinguish "definitely not executed"
//! (safe to release funds) from "maybe executed" (must be resolved before anything else).

use std::{future::Future, time::Duration};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{backoff::Backoff, ChainError, ChainGateway, Error, TransferRequest, TxStatus};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Upper bound for any single gateway call.
    pub call_timeout: Duration,
    /// Submissions per transfer, including ones made in earlier runs.
    pub max_attempts: u32,
    /// Status checks after each submission before reporting it unconfirmed.
    pub status_polls: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(15),
            max_attempts: 3,
            status_polls: 10,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Final state of one drive of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferResult {
    Confirmed { signature: String, attempts: u32 },
    /// Nothing was executed on chain.
    Failed { reason: String, attempts: u32 },
    /// Submitted, but not observed confirmed yet. Resume later by status check.
    Unconfirmed { signature: String, attempts: u32 },
    /// A submission timed out; whether it was broadcast is unknown.
    Stuck { reason: String, attempts: u32 },
}

/// Durable bookkeeping for a transfer in flight.
pub trait TransferLog: Send {
    /// Called right after a signature is returned, before any polling.
    fn submitted(
        &mut self,
        signature: &str,
        attempts: u32,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}

enum Poll {
    Confirmed,
    Failed,
    Pending,
}

async fn poll_status<G: ChainGateway>(gateway: &G, policy: &RetryPolicy, signature: &str) -> Poll {
    let mut backoff = Backoff::new(policy.initial_backoff, policy.max_backoff);
    for poll in 0..policy.status_polls.max(1) {
        if poll > 0 {
            backoff.wait().await;
        }
        match timeout(policy.call_timeout, gateway.get_transaction_status(signature)).await {
            Ok(Ok(status)) if status.is_confirmed() => return Poll::Confirmed,
            Ok(Ok(TxStatus::Failed)) => return Poll::Failed,
            Ok(Ok(_)) => debug!(signature, poll, "transfer pending"),
            // A timed out or failed status read says nothing about the transfer.
            Ok(Err(err)) => debug!(signature, poll, ?err, "status check failed"),
            Err(_) => debug!(signature, poll, "status check timed out"),
        }
    }
    Poll::Pending
}

/// Drives `request` until it resolves or the attempt budget is used up.
///
/// `previous` is the last signature recorded for this transfer (if any) and `attempts` the number
/// of submissions already made for it.
pub async fn drive<G: ChainGateway, L: TransferLog>(
    gateway: &G,
    policy: &RetryPolicy,
    request: &TransferRequest,
    previous: Option<String>,
    mut attempts: u32,
    log: &mut L,
) -> Result<TransferResult, Error> {
    let mut signature = previous;
    let mut backoff = Backoff::new(policy.initial_backoff, policy.max_backoff);
    let mut last_error = String::from("attempts exhausted");

    loop {
        if let Some(sig) = signature.take() {
            match poll_status(gateway, policy, &sig).await {
                Poll::Confirmed => {
                    info!(signature = %sig, amount = request.amount, "transfer confirmed");
                    return Ok(TransferResult::Confirmed {
                        signature: sig,
                        attempts,
                    });
                }
                Poll::Pending => {
                    warn!(signature = %sig, amount = request.amount, "transfer unconfirmed");
                    return Ok(TransferResult::Unconfirmed {
                        signature: sig,
                        attempts,
                    });
                }
                Poll::Failed => {
                    warn!(signature = %sig, attempts, "transfer failed on chain");
                    last_error = format!("transaction {sig} failed on chain");
                }
            }
        }

        if attempts >= policy.max_attempts {
            return Ok(TransferResult::Failed {
                reason: last_error,
                attempts,
            });
        }
        attempts += 1;

        match timeout(policy.call_timeout, gateway.submit_transfer(request)).await {
            Ok(Ok(sig)) => {
                info!(
                    signature = %sig,
                    attempts,
                    amount = request.amount,
                    destination = %request.destination,
                    "transfer submitted"
                );
                log.submitted(&sig, attempts).await?;
                signature = Some(sig);
            }
            Ok(Err(ChainError::Rejected(reason))) => {
                warn!(attempts, %reason, "transfer rejected");
                return Ok(TransferResult::Failed { reason, attempts });
            }
            Ok(Err(ChainError::Rpc(reason))) => {
                warn!(attempts, %reason, "transfer submission failed, retrying");
                last_error = reason;
                backoff.wait().await;
            }
            Ok(Err(ChainError::Timeout)) | Err(_) => {
                warn!(attempts, amount = request.amount, "transfer submission timed out");
                return Ok(TransferResult::Stuck {
                    reason: "submission timed out".to_string(),
                    attempts,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockGateway, SubmitScript};
    use crate::TransferSource;

    #[derive(Default)]
    struct Recorder {
        submitted: Vec<(String, u32)>,
    }

    impl TransferLog for Recorder {
        async fn submitted(&mut self, signature: &str, attempts: u32) -> Result<(), Error> {
            self.submitted.push((signature.to_string(), attempts));
            Ok(())
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            call_timeout: Duration::from_millis(50),
            max_attempts: 3,
            status_polls: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn request() -> TransferRequest {
        TransferRequest {
            source: TransferSource::House,
            destination: "dest".into(),
            amount: 10,
        }
    }

    #[tokio::test]
    async fn status_timeout_is_treated_as_pending() {
        let gateway = MockGateway::default();
        gateway.script_submit(SubmitScript::Ok("sig-1".into()));
        gateway.script_status("sig-1", [None, Some(TxStatus::Confirmed)]);
        let mut log = Recorder::default();

        let result = drive(&gateway, &policy(), &request(), None, 0, &mut log)
            .await
            .unwrap();
        assert_eq!(
            result,
            TransferResult::Confirmed {
                signature: "sig-1".into(),
                attempts: 1
            }
        );
        assert_eq!(gateway.submissions(), 1);
        assert_eq!(log.submitted, vec![("sig-1".to_string(), 1)]);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let gateway = MockGateway::default();
        gateway.script_submit(SubmitScript::Err(ChainError::Rejected("no fee reserve".into())));
        let mut log = Recorder::default();

        let result = drive(&gateway, &policy(), &request(), None, 0, &mut log)
            .await
            .unwrap();
        assert!(matches!(result, TransferResult::Failed { attempts: 1, .. }));
        assert_eq!(gateway.submissions(), 1);
    }

    #[tokio::test]
    async fn transient_errors_retry_up_to_budget() {
        let gateway = MockGateway::default();
        for _ in 0..3 {
            gateway.script_submit(SubmitScript::Err(ChainError::Rpc("blockhash".into())));
        }
        let mut log = Recorder::default();

        let result = drive(&gateway, &policy(), &request(), None, 0, &mut log)
            .await
            .unwrap();
        assert!(matches!(result, TransferResult::Failed { attempts: 3, .. }));
        assert_eq!(gateway.submissions(), 3);
        assert!(log.submitted.is_empty());
    }

    #[tokio::test]
    async fn never_confirmed_is_not_resubmitted() {
        let gateway = MockGateway::default();
        gateway.script_submit(SubmitScript::Ok("sig-1".into()));
        gateway.script_status("sig-1", [Some(TxStatus::Pending); 3]);
        let mut log = Recorder::default();

        let result = drive(&gateway, &policy(), &request(), None, 0, &mut log)
            .await
            .unwrap();
        assert_eq!(
            result,
            TransferResult::Unconfirmed {
                signature: "sig-1".into(),
                attempts: 1
            }
        );
        assert_eq!(gateway.submissions(), 1);
    }

    #[tokio::test]
    async fn resume_checks_before_resubmitting() {
        let gateway = MockGateway::default();
        gateway.script_status("sig-1", [Some(TxStatus::Finalized)]);
        let mut log = Recorder::default();

        let result = drive(
            &gateway,
            &policy(),
            &request(),
            Some("sig-1".into()),
            1,
            &mut log,
        )
        .await
        .unwrap();
        assert!(matches!(result, TransferResult::Confirmed { .. }));
        assert_eq!(gateway.submissions(), 0);
    }

    #[tokio::test]
    async fn failed_on_chain_is_resubmitted() {
        let gateway = MockGateway::default();
        gateway.script_status("sig-1", [Some(TxStatus::Failed)]);
        gateway.script_submit(SubmitScript::Ok("sig-2".into()));
        gateway.script_status("sig-2", [Some(TxStatus::Confirmed)]);
        let mut log = Recorder::default();

        let result = drive(
            &gateway,
            &policy(),
            &request(),
            Some("sig-1".into()),
            1,
            &mut log,
        )
        .await
        .unwrap();
        assert_eq!(
            result,
            TransferResult::Confirmed {
                signature: "sig-2".into(),
                attempts: 2
            }
        );
    }

    #[tokio::test]
    async fn submit_timeout_is_stuck() {
        let gateway = MockGateway::default();
        gateway.script_submit(SubmitScript::Hang);
        let mut log = Recorder::default();

        let result = drive(&gateway, &policy(), &request(), None, 0, &mut log)
            .await
            .unwrap();
        assert!(matches!(result, TransferResult::Stuck { attempts: 1, .. }));
    }
}
