use super::*;
use growbet_types::{
    token, ChatId, PlayerRef, PurchaseOutcome, PurchaseRequest, PurchaseStatus, Sequence, UserId,
};

impl<S: State + 'static, G: ChainGateway, K: KeyProvider> Engine<S, G, K> {
    // === Purchases ===

    pub async fn purchase(&self, id: u64) -> Result<Option<PendingPurchase>, Error> {
        as_purchase(self.store.read(&Key::Purchase(id)).await?)
    }

    /// Unconfirmed purchases of the user, oldest first.
    pub async fn pending_purchases(&self, user: UserId) -> Result<Vec<PendingPurchase>, Error> {
        let mut purchases = Vec::new();
        for id in self.ids(&Key::PurchaseQueue(user)).await? {
            purchases.push(required(self.purchase(id).await?, format!("purchase {id}"))?);
        }
        Ok(purchases)
    }

    /// Queues a purchase of `package` and returns the payment instructions.
    pub async fn request_purchase(
        &self,
        player: &PlayerRef,
        chat: ChatId,
        package: u8,
        now: u64,
    ) -> Result<PurchaseRequest, Error> {
        let package = self
            .packages()
            .await?
            .into_iter()
            .find(|p| p.number == package)
            .ok_or(Error::UnknownPackage(package))?;
        let user = player.id;
        self.touch(player, chat, now).await?;
        if self
            .profile(user)
            .await?
            .and_then(|profile| profile.wallet_address)
            .is_none()
        {
            return Err(Error::NoRegisteredWallet);
        }
        let recipient = self.treasury_address().await?.ok_or(Error::NoTreasuryAddress)?;
        let price = package
            .price
            .checked_mul(token::unit(self.policy.token_decimals))
            .ok_or_else(|| Error::InvalidAmount(format!("price of package {}", package.number)))?;

        let id = self.store.next_id(Sequence::Purchase).await?;
        let mut txn = self
            .store
            .lock(&[Key::Purchase(id), Key::PurchaseQueue(user)])
            .await?;
        let mut queue = as_ids(txn.get(&Key::PurchaseQueue(user)).await?)?.unwrap_or_default();
        let queued_ahead = queue.len();
        let purchase = PendingPurchase {
            id,
            user,
            chat,
            package: package.number,
            price,
            growth: package.growth,
            recipient: recipient.clone(),
            status: PurchaseStatus::Pending,
            reference: None,
            created_at: now,
            confirmed_at: None,
        };
        queue.push(id);
        txn.put(Key::PurchaseQueue(user), Value::Ids(queue))?;
        txn.put(Key::Purchase(id), Value::Purchase(purchase))?;
        txn.commit().await?;
        info!(purchase = id, user = %user, chat = %chat, package = package.number, price, "purchase requested");

        Ok(PurchaseRequest {
            id,
            package: package.number,
            price,
            growth: package.growth,
            recipient,
            queued_ahead,
        })
    }

    /// Verifies `reference` against the user's oldest pending purchase and credits paid length.
    ///
    /// A reference confirms at most one purchase, ever. Nothing is mutated unless the
    /// transaction pays at least the tolerated price to the expected recipient.
    pub async fn verify_purchase(
        &self,
        user: UserId,
        reference: &str,
        now: u64,
    ) -> Result<PurchaseOutcome, Error> {
        let reference = token::validate_signature(reference).map_err(Error::InvalidReference)?;
        let used = Key::ConfirmedReference(reference.clone());
        if self.store.read(&used).await?.is_some() {
            return Err(Error::ReferenceAlreadyUsed);
        }
        let oldest = self
            .ids(&Key::PurchaseQueue(user))
            .await?
            .first()
            .copied()
            .ok_or(Error::NoPendingPurchase)?;
        let purchase = required(self.purchase(oldest).await?, format!("purchase {oldest}"))?;

        let transaction = self
            .chain(self.gateway.get_transaction(&reference))
            .await?
            .ok_or(Error::TransactionNotFound)?;
        if transaction.failed {
            return Err(Error::TransactionFailedOnChain);
        }
        let threshold = self.policy.purchase_threshold(purchase.price);
        let paid = transaction.transfers.iter().any(|transfer| {
            token::addresses_match(&transfer.destination, &purchase.recipient)
                && transfer.amount >= threshold
        });
        if !paid {
            debug!(purchase = oldest, threshold, recipient = %purchase.recipient, "no matching transfer");
            return Err(Error::TransferNotFound);
        }

        let account = AccountKey::new(user, purchase.chat);
        let mut txn = self
            .store
            .lock(&[
                Key::Account(account),
                Key::Purchase(oldest),
                Key::PurchaseQueue(user),
                used.clone(),
            ])
            .await?;
        if txn.get(&used).await?.is_some() {
            return Err(Error::ReferenceAlreadyUsed);
        }
        let mut queue = as_ids(txn.get(&Key::PurchaseQueue(user)).await?)?.unwrap_or_default();
        if queue.first() != Some(&oldest) {
            // Another verification consumed it between the read and the lock.
            return Err(Error::NoPendingPurchase);
        }
        let mut purchase = required(
            as_purchase(txn.get(&Key::Purchase(oldest)).await?)?,
            format!("purchase {oldest}"),
        )?;
        let mut credited = Self::locked_account(&txn, account).await?;
        credited.paid_length += f64::from(purchase.growth);

        purchase.status = PurchaseStatus::Confirmed;
        purchase.reference = Some(reference.clone());
        purchase.confirmed_at = Some(now);
        queue.remove(0);

        let outcome = PurchaseOutcome {
            purchase: oldest,
            reference: reference.clone(),
            growth: purchase.growth,
            paid_length: credited.paid_length,
            total: credited.total(),
        };
        txn.put(
            used,
            Value::Reference {
                purchase: oldest,
                user,
            },
        )?;
        txn.put(Key::PurchaseQueue(user), Value::Ids(queue))?;
        txn.put(Key::Purchase(oldest), Value::Purchase(purchase))?;
        Self::put_account(&mut txn, credited)?;
        txn.commit().await?;
        info!(purchase = oldest, user = %user, reference = %reference, growth = outcome.growth, "purchase confirmed");
        Ok(outcome)
    }
}
