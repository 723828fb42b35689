use super::*;
use crate::{transfer, TransferRequest, TransferResult, TransferSource};
use growbet_types::{token, DraftStep, Sequence, UserId, WithdrawalOutcome};

impl<S: State + 'static, G: ChainGateway, K: KeyProvider> Engine<S, G, K> {
    // === Withdrawals ===

    pub async fn withdrawal(&self, id: u64) -> Result<Option<WithdrawalRecord>, Error> {
        as_withdrawal(self.store.read(&Key::Withdrawal(id)).await?)
    }

    /// Withdrawals that are neither confirmed nor failed.
    pub async fn unresolved_withdrawals(&self) -> Result<Vec<WithdrawalRecord>, Error> {
        let mut records = Vec::new();
        for id in self.ids(&Key::WithdrawalQueue).await? {
            records.push(required(self.withdrawal(id).await?, format!("withdrawal {id}"))?);
        }
        Ok(records)
    }

    /// Sends `amount` from the user's custodial wallet to `destination`.
    ///
    /// The cached balance is debited only once the transfer is confirmed on chain. A transfer
    /// that is submitted but not yet confirmed is reported as pending and left for
    /// [`Engine::resume_withdrawal`].
    pub async fn withdraw(
        &self,
        user: UserId,
        amount: u64,
        destination: &str,
        now: u64,
    ) -> Result<WithdrawalOutcome, Error> {
        if amount < self.policy.min_withdrawal {
            return Err(Error::BelowMinimum {
                amount,
                minimum: self.policy.min_withdrawal,
            });
        }
        let destination = token::validate_address(destination).map_err(Error::InvalidAddress)?;
        if let Some(active) = self.active_withdrawal(user).await? {
            return Err(Error::WithdrawalInProgress(active));
        }

        // The cache is never trusted for sizing a withdrawal.
        self.check_deposit(user, now).await?;

        let id = self.store.next_id(Sequence::Withdrawal).await?;
        let mut txn = self
            .store
            .lock(&[
                Key::Wallet(user),
                Key::ActiveWithdrawal(user),
                Key::Withdrawal(id),
                Key::WithdrawalQueue,
            ])
            .await?;
        if let Some(active) = as_ids(txn.get(&Key::ActiveWithdrawal(user)).await?)?
            .and_then(|ids| ids.first().copied())
        {
            return Err(Error::WithdrawalInProgress(active));
        }
        let wallet = as_wallet(txn.get(&Key::Wallet(user)).await?)?.ok_or(Error::WalletNotFound)?;
        if amount > wallet.cached_balance {
            return Err(Error::InsufficientBalance {
                required: amount,
                available: wallet.cached_balance,
            });
        }
        let record = WithdrawalRecord {
            id,
            user,
            destination,
            amount,
            status: TransferStatus::Pending,
            signature: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        let mut queue = as_ids(txn.get(&Key::WithdrawalQueue).await?)?.unwrap_or_default();
        queue.push(id);
        txn.put(Key::WithdrawalQueue, Value::Ids(queue))?;
        txn.put(Key::ActiveWithdrawal(user), Value::Ids(vec![id]))?;
        txn.put(Key::Withdrawal(id), Value::Withdrawal(record))?;
        txn.commit().await?;
        info!(withdrawal = id, user = %user, amount, "withdrawal recorded");

        match self.resume_withdrawal(id, now).await? {
            WithdrawalOutcome::Pending {
                status: TransferStatus::Failed,
                ..
            } => {
                let reason = self
                    .withdrawal(id)
                    .await?
                    .and_then(|record| record.last_error)
                    .unwrap_or_else(|| "transfer failed".to_string());
                Err(Error::TransferRejected(reason))
            }
            outcome => Ok(outcome),
        }
    }

    async fn active_withdrawal(&self, user: UserId) -> Result<Option<u64>, Error> {
        Ok(as_ids(self.store.read(&Key::ActiveWithdrawal(user)).await?)?
            .and_then(|ids| ids.first().copied()))
    }

    /// Drives an unresolved withdrawal. Safe to call repeatedly: a recorded signature is always
    /// checked before anything is resubmitted, and the balance is debited at most once.
    pub async fn resume_withdrawal(&self, id: u64, now: u64) -> Result<WithdrawalOutcome, Error> {
        let key = Key::Withdrawal(id);
        let Some(_claim) = self.claim(key.clone()) else {
            let record = self.withdrawal(id).await?.ok_or(Error::WithdrawalNotFound(id))?;
            return Ok(WithdrawalOutcome::Pending {
                id,
                signature: record.signature,
                status: record.status,
            });
        };
        let record = self.withdrawal(id).await?.ok_or(Error::WithdrawalNotFound(id))?;
        if record.status.is_resolved() || record.status == TransferStatus::Stuck {
            return self.withdrawal_outcome(&record).await;
        }
        let wallet = required(self.wallet(record.user).await?, format!("wallet {}", record.user))?;

        let request = TransferRequest {
            source: TransferSource::Custodial {
                address: wallet.address,
                encrypted_key: wallet.encrypted_key,
            },
            destination: record.destination.clone(),
            amount: record.amount,
        };
        let mut log = RecordLog {
            engine: self,
            key,
            now,
        };
        let result = transfer::drive(
            &self.gateway,
            &self.retry,
            &request,
            record.signature.clone(),
            record.attempts,
            &mut log,
        )
        .await?;
        let record = self.finish_withdrawal(id, result, now).await?;
        self.withdrawal_outcome(&record).await
    }

    async fn withdrawal_outcome(&self, record: &WithdrawalRecord) -> Result<WithdrawalOutcome, Error> {
        match (record.status, &record.signature) {
            (TransferStatus::Confirmed, Some(signature)) => {
                let balance = self
                    .wallet(record.user)
                    .await?
                    .map_or(0, |wallet| wallet.cached_balance);
                Ok(WithdrawalOutcome::Confirmed {
                    id: record.id,
                    signature: signature.clone(),
                    amount: record.amount,
                    balance,
                })
            }
            (status, signature) => Ok(WithdrawalOutcome::Pending {
                id: record.id,
                signature: signature.clone(),
                status,
            }),
        }
    }

    /// Records the result of a drive. The debit happens here, exactly once, under the wallet lock.
    async fn finish_withdrawal(
        &self,
        id: u64,
        result: TransferResult,
        now: u64,
    ) -> Result<WithdrawalRecord, Error> {
        let snapshot = self.withdrawal(id).await?.ok_or(Error::WithdrawalNotFound(id))?;
        let user = snapshot.user;
        let mut txn = self
            .store
            .lock(&[
                Key::Withdrawal(id),
                Key::Wallet(user),
                Key::ActiveWithdrawal(user),
                Key::WithdrawalQueue,
            ])
            .await?;
        let mut record = required(
            as_withdrawal(txn.get(&Key::Withdrawal(id)).await?)?,
            format!("withdrawal {id}"),
        )?;
        if record.status.is_resolved() {
            return Ok(record);
        }

        let mut release = false;
        match result {
            TransferResult::Confirmed {
                signature,
                attempts,
            } => {
                let mut wallet = required(
                    as_wallet(txn.get(&Key::Wallet(user)).await?)?,
                    format!("wallet {user}"),
                )?;
                match wallet.cached_balance.checked_sub(record.amount) {
                    Some(balance) => wallet.cached_balance = balance,
                    None => {
                        error!(
                            withdrawal = id,
                            user = %user,
                            cached = wallet.cached_balance,
                            amount = record.amount,
                            "confirmed withdrawal exceeds cached balance"
                        );
                        wallet.cached_balance = 0;
                    }
                }
                wallet.total_withdrawn = wallet.total_withdrawn.saturating_add(record.amount);
                info!(
                    withdrawal = id,
                    user = %user,
                    amount = record.amount,
                    signature = %signature,
                    balance = wallet.cached_balance,
                    "withdrawal confirmed"
                );
                txn.put(Key::Wallet(user), Value::Wallet(wallet))?;
                record.status = TransferStatus::Confirmed;
                record.signature = Some(signature);
                record.attempts = attempts;
                record.last_error = None;
                release = true;
            }
            TransferResult::Failed { reason, attempts } => {
                warn!(withdrawal = id, user = %user, %reason, "withdrawal failed, balance untouched");
                record.status = TransferStatus::Failed;
                record.attempts = attempts;
                record.last_error = Some(reason);
                release = true;
            }
            TransferResult::Unconfirmed {
                signature,
                attempts,
            } => {
                warn!(withdrawal = id, user = %user, signature = %signature, "withdrawal unconfirmed");
                record.status = TransferStatus::Unconfirmed;
                record.signature = Some(signature);
                record.attempts = attempts;
            }
            TransferResult::Stuck { reason, attempts } => {
                error!(withdrawal = id, user = %user, %reason, "withdrawal stuck, needs reconciliation");
                record.status = TransferStatus::Stuck;
                record.attempts = attempts;
                record.last_error = Some(reason);
            }
        }
        record.updated_at = now;

        if release {
            txn.delete(&Key::ActiveWithdrawal(user))?;
            let mut queue = as_ids(txn.get(&Key::WithdrawalQueue).await?)?.unwrap_or_default();
            queue.retain(|queued| *queued != id);
            txn.put(Key::WithdrawalQueue, Value::Ids(queue))?;
        }
        txn.put(Key::Withdrawal(id), Value::Withdrawal(record.clone()))?;
        txn.commit().await?;
        Ok(record)
    }

    /// Resumes every unresolved withdrawal that is not stuck.
    pub async fn resume_withdrawals(&self, now: u64) -> Result<Vec<WithdrawalOutcome>, Error> {
        let mut outcomes = Vec::new();
        for record in self.unresolved_withdrawals().await? {
            if record.status == TransferStatus::Stuck {
                continue;
            }
            match self.resume_withdrawal(record.id, now).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) if err.is_retriable() => {
                    warn!(withdrawal = record.id, ?err, "withdrawal resume deferred");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(outcomes)
    }

    // === Withdrawal wizard ===

    /// Current non-expired draft of the user, if any.
    pub async fn withdrawal_draft(&self, user: UserId, now: u64) -> Result<Option<WithdrawalDraft>, Error> {
        Ok(as_draft(self.store.read(&Key::WithdrawalDraft(user)).await?)?
            .filter(|draft| !draft.is_expired(now, self.policy.draft_ttl_secs)))
    }

    pub async fn begin_withdrawal(&self, user: UserId, now: u64) -> Result<WithdrawalDraft, Error> {
        if self.wallet(user).await?.is_none() {
            return Err(Error::WalletNotFound);
        }
        let mut txn = self.store.lock(&[Key::WithdrawalDraft(user)]).await?;
        let draft = WithdrawalDraft::new(user, now);
        txn.put(Key::WithdrawalDraft(user), Value::WithdrawalDraft(draft.clone()))?;
        txn.commit().await?;
        Ok(draft)
    }

    pub async fn draft_amount(&self, user: UserId, input: &str, now: u64) -> Result<WithdrawalDraft, Error> {
        let amount = token::parse_amount(input, self.policy.token_decimals)
            .map_err(|err| Error::InvalidAmount(err.to_string()))?;
        if amount < self.policy.min_withdrawal {
            return Err(Error::BelowMinimum {
                amount,
                minimum: self.policy.min_withdrawal,
            });
        }
        self.advance_draft(user, DraftStep::AwaitingAmount, now, |draft| {
            draft.amount = Some(amount);
            draft.step = DraftStep::AwaitingAddress;
        })
        .await
    }

    pub async fn draft_destination(
        &self,
        user: UserId,
        input: &str,
        now: u64,
    ) -> Result<WithdrawalDraft, Error> {
        let destination = token::validate_address(input).map_err(Error::InvalidAddress)?;
        self.advance_draft(user, DraftStep::AwaitingAddress, now, |draft| {
            draft.destination = Some(destination);
            draft.step = DraftStep::AwaitingConfirmation;
        })
        .await
    }

    /// Consumes the draft and performs the withdrawal.
    pub async fn confirm_withdrawal(&self, user: UserId, now: u64) -> Result<WithdrawalOutcome, Error> {
        let mut txn = self.store.lock(&[Key::WithdrawalDraft(user)]).await?;
        let draft = self.live_draft(&txn, user, now).await?;
        if draft.step != DraftStep::AwaitingConfirmation {
            return Err(Error::DraftStep);
        }
        let (Some(amount), Some(destination)) = (draft.amount, draft.destination) else {
            return Err(Error::Invariant(format!("draft of {user} is incomplete")));
        };
        txn.delete(&Key::WithdrawalDraft(user))?;
        txn.commit().await?;
        self.withdraw(user, amount, &destination, now).await
    }

    pub async fn cancel_withdrawal_draft(&self, user: UserId) -> Result<(), Error> {
        let mut txn = self.store.lock(&[Key::WithdrawalDraft(user)]).await?;
        if txn.get(&Key::WithdrawalDraft(user)).await?.is_none() {
            return Err(Error::NoDraft);
        }
        txn.delete(&Key::WithdrawalDraft(user))?;
        txn.commit().await
    }

    async fn live_draft(&self, txn: &Txn<'_, S>, user: UserId, now: u64) -> Result<WithdrawalDraft, Error> {
        let draft = as_draft(txn.get(&Key::WithdrawalDraft(user)).await?)?.ok_or(Error::NoDraft)?;
        if draft.is_expired(now, self.policy.draft_ttl_secs) {
            return Err(Error::NoDraft);
        }
        Ok(draft)
    }

    async fn advance_draft(
        &self,
        user: UserId,
        expected: DraftStep,
        now: u64,
        update: impl FnOnce(&mut WithdrawalDraft),
    ) -> Result<WithdrawalDraft, Error> {
        let mut txn = self.store.lock(&[Key::WithdrawalDraft(user)]).await?;
        let mut draft = match self.live_draft(&txn, user, now).await {
            Ok(draft) => draft,
            Err(Error::NoDraft) => {
                // Drop an expired draft so the next message starts clean.
                if txn.get(&Key::WithdrawalDraft(user)).await?.is_some() {
                    txn.delete(&Key::WithdrawalDraft(user))?;
                    txn.commit().await?;
                }
                return Err(Error::NoDraft);
            }
            Err(err) => return Err(err),
        };
        if draft.step != expected {
            return Err(Error::DraftStep);
        }
        update(&mut draft);
        draft.updated_at = now;
        txn.put(Key::WithdrawalDraft(user), Value::WithdrawalDraft(draft.clone()))?;
        txn.commit().await?;
        Ok(draft)
    }
}
