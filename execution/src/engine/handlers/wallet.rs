use super::*;
use growbet_types::{token, ChatId, ReconcileOutcome, UserId};

impl<S: State + 'static, G: ChainGateway, K: KeyProvider> Engine<S, G, K> {
    // === Custodial wallets ===

    pub async fn wallet(&self, user: UserId) -> Result<Option<CustodialWallet>, Error> {
        as_wallet(self.store.read(&Key::Wallet(user)).await?)
    }

    /// Returns the user's wallet, provisioning one on first use.
    pub async fn open_wallet(&self, user: UserId, now: u64) -> Result<CustodialWallet, Error> {
        if let Some(wallet) = self.wallet(user).await? {
            return Ok(wallet);
        }
        let provisioned = self.keys.generate().await.map_err(Error::KeyProvider)?;

        let mut txn = self.store.lock(&[Key::Wallet(user)]).await?;
        if let Some(existing) = as_wallet(txn.get(&Key::Wallet(user)).await?)? {
            debug!(user = %user, "concurrent wallet creation, keeping existing");
            return Ok(existing);
        }
        let wallet = CustodialWallet::new(user, provisioned.address, provisioned.encrypted_key, now);
        txn.put(Key::Wallet(user), Value::Wallet(wallet.clone()))?;
        txn.commit().await?;
        info!(user = %user, address = %wallet.address, "custodial wallet created");
        Ok(wallet)
    }

    /// Replaces the cached balance with the on-chain balance of the deposit address.
    ///
    /// Refused while a withdrawal is unresolved: the chain may already reflect the transfer
    /// that the withdrawal debits on confirmation.
    pub async fn check_deposit(&self, user: UserId, now: u64) -> Result<ReconcileOutcome, Error> {
        let wallet = self.wallet(user).await?.ok_or(Error::WalletNotFound)?;
        let on_chain = self
            .chain(self.gateway.get_address_balance(&wallet.address))
            .await?;

        let mut txn = self
            .store
            .lock(&[Key::Wallet(user), Key::ActiveWithdrawal(user)])
            .await?;
        if let Some(active) = as_ids(txn.get(&Key::ActiveWithdrawal(user)).await?)?
            .and_then(|ids| ids.first().copied())
        {
            return Err(Error::WithdrawalInProgress(active));
        }
        let mut wallet = as_wallet(txn.get(&Key::Wallet(user)).await?)?.ok_or(Error::WalletNotFound)?;
        let outcome = wallet.reconcile(on_chain, now);
        txn.put(Key::Wallet(user), Value::Wallet(wallet))?;
        txn.commit().await?;
        match outcome {
            ReconcileOutcome::Deposited { amount, balance } => {
                info!(user = %user, amount, balance, "deposit detected")
            }
            ReconcileOutcome::Synced { previous, balance } => {
                warn!(user = %user, previous, balance, "cached balance synced down")
            }
            ReconcileOutcome::Unchanged { .. } => {}
        }
        Ok(outcome)
    }

    /// Deletes a wallet whose cached balance is exactly zero.
    pub async fn delete_wallet(&self, user: UserId) -> Result<(), Error> {
        let mut txn = self
            .store
            .lock(&[Key::Wallet(user), Key::ActiveWithdrawal(user)])
            .await?;
        let wallet = as_wallet(txn.get(&Key::Wallet(user)).await?)?.ok_or(Error::WalletNotFound)?;
        if let Some(active) = as_ids(txn.get(&Key::ActiveWithdrawal(user)).await?)?
            .and_then(|ids| ids.first().copied())
        {
            return Err(Error::WithdrawalInProgress(active));
        }
        if wallet.cached_balance != 0 {
            return Err(Error::WalletNotEmpty(wallet.cached_balance));
        }
        txn.delete(&Key::Wallet(user))?;
        txn.commit().await?;
        info!(user = %user, address = %wallet.address, "custodial wallet deleted");
        Ok(())
    }

    /// Zeroes the cached balance in its own committed step, then deletes the wallet.
    pub async fn force_delete_wallet(&self, user: UserId) -> Result<u64, Error> {
        let mut txn = self.store.lock(&[Key::Wallet(user)]).await?;
        let mut wallet = as_wallet(txn.get(&Key::Wallet(user)).await?)?.ok_or(Error::WalletNotFound)?;
        let discarded = wallet.cached_balance;
        wallet.cached_balance = 0;
        txn.put(Key::Wallet(user), Value::Wallet(wallet))?;
        txn.commit().await?;
        warn!(user = %user, discarded, "wallet balance zeroed for forced delete");

        self.delete_wallet(user).await?;
        Ok(discarded)
    }

    /// Sets the payout address for a chat's fee share. Last writer wins.
    pub async fn set_group_wallet(
        &self,
        chat: ChatId,
        address: &str,
        set_by: UserId,
        now: u64,
    ) -> Result<GroupOwnerWallet, Error> {
        let address = token::validate_address(address).map_err(Error::InvalidAddress)?;
        let mut txn = self.store.lock(&[Key::GroupWallet(chat)]).await?;
        let wallet = GroupOwnerWallet {
            chat,
            address,
            set_by,
            updated_at: now,
        };
        txn.put(Key::GroupWallet(chat), Value::GroupWallet(wallet.clone()))?;
        txn.commit().await?;
        info!(chat = %chat, set_by = %set_by, address = %wallet.address, "group wallet set");
        Ok(wallet)
    }

    pub async fn group_wallet(&self, chat: ChatId) -> Result<Option<GroupOwnerWallet>, Error> {
        as_group_wallet(self.store.read(&Key::GroupWallet(chat)).await?)
    }

    /// Stores the user's own external wallet (the payer of purchases).
    pub async fn register_wallet(&self, user: UserId, address: &str) -> Result<Profile, Error> {
        let address = token::validate_address(address).map_err(Error::InvalidAddress)?;
        let mut txn = self.store.lock(&[Key::Profile(user)]).await?;
        let mut profile = required(
            as_profile(txn.get(&Key::Profile(user)).await?)?,
            format!("profile {user}"),
        )?;
        profile.wallet_address = Some(address);
        txn.put(Key::Profile(user), Value::Profile(profile.clone()))?;
        txn.commit().await?;
        info!(user = %user, "external wallet registered");
        Ok(profile)
    }
}
