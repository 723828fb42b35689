use super::*;
use crate::TransferLog;
use growbet_types::TransferStatus;

mod ledger;
mod payouts;
mod purchase;
mod pvp;
mod settings;
mod token_wager;
mod wallet;
mod withdrawal;

/// Persists each submitted signature on the withdrawal or payout record it belongs to.
struct RecordLog<'a, S: State, G: ChainGateway, K: KeyProvider> {
    engine: &'a Engine<S, G, K>,
    key: Key,
    now: u64,
}

impl<S: State + 'static, G: ChainGateway, K: KeyProvider> TransferLog for RecordLog<'_, S, G, K> {
    async fn submitted(&mut self, signature: &str, attempts: u32) -> Result<(), Error> {
        let mut txn = self.engine.store.lock(std::slice::from_ref(&self.key)).await?;
        let value = match txn.get(&self.key).await? {
            Some(Value::Withdrawal(mut record)) => {
                record.signature = Some(signature.to_string());
                record.attempts = attempts;
                record.status = TransferStatus::Submitted;
                record.updated_at = self.now;
                Value::Withdrawal(record)
            }
            Some(Value::FeePayout(mut payout)) => {
                payout.signature = Some(signature.to_string());
                payout.attempts = attempts;
                payout.status = TransferStatus::Submitted;
                payout.updated_at = self.now;
                Value::FeePayout(payout)
            }
            other => {
                return Err(Error::Invariant(format!(
                    "no transfer record at {:?}: {other:?}",
                    self.key
                )))
            }
        };
        txn.put(self.key.clone(), value)?;
        txn.commit().await
    }
}
