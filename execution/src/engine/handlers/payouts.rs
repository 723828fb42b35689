use super::*;
use crate::{transfer, TransferRequest, TransferResult, TransferSource};

impl<S: State + 'static, G: ChainGateway, K: KeyProvider> Engine<S, G, K> {
    // === Fee payouts ===

    pub async fn payout(&self, id: u64) -> Result<Option<FeePayout>, Error> {
        as_payout(self.store.read(&Key::FeePayout(id)).await?)
    }

    /// Queued fee payouts that are not confirmed, including failed and stuck ones awaiting an
    /// operator.
    pub async fn pending_payouts(&self) -> Result<Vec<FeePayout>, Error> {
        let mut payouts = Vec::new();
        for id in self.ids(&Key::PayoutQueue).await? {
            payouts.push(required(self.payout(id).await?, format!("fee payout {id}"))?);
        }
        Ok(payouts)
    }

    /// Sends one fee payout from the house wallet. Checks any recorded signature first.
    pub async fn dispatch_payout(&self, id: u64, now: u64) -> Result<TransferStatus, Error> {
        let key = Key::FeePayout(id);
        let payout = self.payout(id).await?.ok_or(Error::PayoutNotFound(id))?;
        let Some(_claim) = self.claim(key.clone()) else {
            debug!(payout = id, "payout already in flight");
            return Ok(payout.status);
        };
        // Re-read under the claim: a previous driver may have just finished.
        let payout = self.payout(id).await?.ok_or(Error::PayoutNotFound(id))?;
        if !payout.is_dispatchable() {
            return Ok(payout.status);
        }
        let Some(destination) = payout.destination.clone() else {
            return Ok(payout.status);
        };

        let request = TransferRequest {
            source: TransferSource::House,
            destination,
            amount: payout.amount,
        };
        let mut log = RecordLog {
            engine: self,
            key: key.clone(),
            now,
        };
        let result = transfer::drive(
            &self.gateway,
            &self.retry,
            &request,
            payout.signature.clone(),
            payout.attempts,
            &mut log,
        )
        .await?;
        self.finish_payout(id, result, now).await
    }

    async fn finish_payout(&self, id: u64, result: TransferResult, now: u64) -> Result<TransferStatus, Error> {
        let key = Key::FeePayout(id);
        let mut txn = self.store.lock(&[key.clone(), Key::PayoutQueue]).await?;
        let mut payout = required(as_payout(txn.get(&key).await?)?, format!("fee payout {id}"))?;
        if payout.status.is_resolved() {
            return Ok(payout.status);
        }

        let mut dequeue = false;
        match result {
            TransferResult::Confirmed {
                signature,
                attempts,
            } => {
                payout.status = TransferStatus::Confirmed;
                payout.signature = Some(signature);
                payout.attempts = attempts;
                payout.last_error = None;
                dequeue = true;
                info!(payout = id, wager = payout.wager, amount = payout.amount, kind = ?payout.kind, "fee payout confirmed");
            }
            TransferResult::Failed { reason, attempts } => {
                payout.status = TransferStatus::Failed;
                payout.attempts = attempts;
                error!(payout = id, wager = payout.wager, amount = payout.amount, %reason, "fee payout failed, needs reconciliation");
                payout.last_error = Some(reason);
            }
            TransferResult::Unconfirmed {
                signature,
                attempts,
            } => {
                payout.status = TransferStatus::Unconfirmed;
                payout.signature = Some(signature);
                payout.attempts = attempts;
            }
            TransferResult::Stuck { reason, attempts } => {
                payout.status = TransferStatus::Stuck;
                payout.attempts = attempts;
                error!(payout = id, wager = payout.wager, amount = payout.amount, %reason, "fee payout stuck, needs reconciliation");
                payout.last_error = Some(reason);
            }
        }
        payout.updated_at = now;
        let status = payout.status;

        if dequeue {
            let mut queue = as_ids(txn.get(&Key::PayoutQueue).await?)?.unwrap_or_default();
            queue.retain(|queued| *queued != id);
            txn.put(Key::PayoutQueue, Value::Ids(queue))?;
        }
        txn.put(key, Value::FeePayout(payout))?;
        txn.commit().await?;
        Ok(status)
    }

    /// Retries every dispatchable payout in the queue. Returns the resulting status per payout.
    pub async fn retry_payouts(&self, now: u64) -> Result<Vec<(u64, TransferStatus)>, Error> {
        let mut results = Vec::new();
        for payout in self.pending_payouts().await? {
            if !payout.is_dispatchable() {
                continue;
            }
            match self.dispatch_payout(payout.id, now).await {
                Ok(status) => results.push((payout.id, status)),
                Err(err) if err.is_retriable() => {
                    warn!(payout = payout.id, ?err, "payout retry deferred");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(results)
    }
}
