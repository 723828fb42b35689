use super::*;
use growbet_types::{
    ChatId, FeeSplit, Opponent, OpponentRef, PayoutKind, PlayerRef, Sequence, TokenWagerOutcome,
    TokenWagerStatus, TransferStatus, UserId,
};

impl<S: State + 'static, G: ChainGateway, K: KeyProvider> Engine<S, G, K> {
    // === Token wagers ===

    pub async fn token_wager(&self, id: u64) -> Result<Option<TokenWager>, Error> {
        as_token_wager(self.store.read(&Key::TokenWager(id)).await?)
    }

    pub async fn create_token_wager(
        &self,
        challenger: &PlayerRef,
        opponent: &OpponentRef,
        chat: ChatId,
        bet: u64,
        now: u64,
    ) -> Result<TokenWager, Error> {
        if bet < self.policy.min_token_wager {
            return Err(Error::BelowMinimum {
                amount: bet,
                minimum: self.policy.min_token_wager,
            });
        }
        if bet > self.policy.max_token_wager {
            return Err(Error::AboveMaximum {
                amount: bet,
                maximum: self.policy.max_token_wager,
            });
        }
        let opponent = self.resolve_opponent(challenger.id, opponent).await?;

        let id = self.store.next_id(Sequence::TokenWager).await?;
        let mut txn = self
            .store
            .lock(&[Key::Wallet(challenger.id), Key::TokenWager(id)])
            .await?;
        let wallet = as_wallet(txn.get(&Key::Wallet(challenger.id)).await?)?
            .ok_or(Error::WalletNotFound)?;
        if wallet.cached_balance < bet {
            return Err(Error::InsufficientBalance {
                required: bet,
                available: wallet.cached_balance,
            });
        }

        let wager = TokenWager {
            id,
            chat,
            challenger: challenger.id,
            opponent,
            bet,
            status: TokenWagerStatus::Pending,
            rolls: None,
            winner: None,
            split: None,
            created_at: now,
            resolved_at: None,
        };
        txn.put(Key::TokenWager(id), Value::TokenWager(wager.clone()))?;
        txn.commit().await?;
        info!(wager = id, challenger = %challenger.id, chat = %chat, bet, "token wager created");
        Ok(wager)
    }

    /// Accepts a pending token wager: escrows both bets, rolls, and settles the pot.
    ///
    /// Fee shares are recorded as payouts in the same transaction and sent from a background
    /// task after commit. Payout failures never reverse the wager.
    pub async fn accept_token_wager(
        self: &Arc<Self>,
        id: u64,
        acceptor: &PlayerRef,
        now: u64,
    ) -> Result<TokenWagerOutcome, Error> {
        let snapshot = self.token_wager(id).await?.ok_or(Error::WagerNotFound(id))?;
        if acceptor.id == snapshot.challenger {
            return Err(Error::SelfTarget);
        }
        let treasury = self.treasury_address().await?;
        let treasury_payout = self.store.next_id(Sequence::FeePayout).await?;
        let group_payout = self.store.next_id(Sequence::FeePayout).await?;

        let chat = snapshot.chat;
        let mut txn = self
            .store
            .lock(&[
                Key::TokenWager(id),
                Key::Wallet(snapshot.challenger),
                Key::Wallet(acceptor.id),
                Key::GroupWallet(chat),
                Key::PayoutQueue,
                Key::FeePayout(treasury_payout),
                Key::FeePayout(group_payout),
            ])
            .await?;
        let mut wager = required(
            as_token_wager(txn.get(&Key::TokenWager(id)).await?)?,
            format!("token wager {id}"),
        )?;
        if wager.status != TokenWagerStatus::Pending {
            return Err(Error::NoLongerAvailable);
        }
        if !wager.opponent.matches(acceptor) {
            return Err(Error::NotParticipant);
        }
        let mut opponent = as_wallet(txn.get(&Key::Wallet(acceptor.id)).await?)?
            .ok_or(Error::WalletNotFound)?;
        let challenger = as_wallet(txn.get(&Key::Wallet(wager.challenger)).await?)?;

        // Either side short at acceptance cancels the wager before any debit.
        let bet = wager.bet;
        let shortfall = if opponent.cached_balance < bet {
            Some(Error::InsufficientBalance {
                required: bet,
                available: opponent.cached_balance,
            })
        } else if challenger.as_ref().map_or(true, |w| w.cached_balance < bet) {
            Some(Error::CounterpartyInsufficient)
        } else {
            None
        };
        let Some(mut challenger) = challenger.filter(|_| shortfall.is_none()) else {
            wager.opponent = Opponent::User(acceptor.id);
            wager.status = TokenWagerStatus::Cancelled;
            wager.resolved_at = Some(now);
            txn.put(Key::TokenWager(id), Value::TokenWager(wager))?;
            txn.commit().await?;
            warn!(wager = id, "token wager cancelled for insufficient balance");
            return Err(shortfall.unwrap_or(Error::CounterpartyInsufficient));
        };

        // Escrow.
        challenger.cached_balance -= bet;
        opponent.cached_balance -= bet;
        wager.opponent = Opponent::User(acceptor.id);
        let rolls = self.roll_pair();
        wager.rolls = Some(rolls);
        wager.status = TokenWagerStatus::Completed;
        wager.resolved_at = Some(now);

        if rolls.is_draw() {
            challenger.cached_balance += bet;
            opponent.cached_balance += bet;
            txn.put(Key::Wallet(challenger.user), Value::Wallet(challenger))?;
            txn.put(Key::Wallet(opponent.user), Value::Wallet(opponent))?;
            txn.put(Key::TokenWager(id), Value::TokenWager(wager))?;
            txn.commit().await?;
            info!(wager = id, roll = rolls.challenger, "token wager draw, bets refunded");
            return Ok(TokenWagerOutcome::Draw { rolls, bet });
        }

        let group_wallet = as_group_wallet(txn.get(&Key::GroupWallet(chat)).await?)?;
        let (treasury_bps, group_owner_bps) = self.policy.fee_rates(chat);
        let split = FeeSplit::compute(bet, treasury_bps, group_owner_bps, group_wallet.is_some());

        let (winner, loser) = if rolls.challenger_wins() {
            (&mut challenger, &mut opponent)
        } else {
            (&mut opponent, &mut challenger)
        };
        winner.cached_balance = winner.cached_balance.saturating_add(split.winner_payout);
        winner.record_win(split.winner_payout.saturating_sub(bet));
        loser.record_loss(bet);
        let (winner_id, loser_id) = (winner.user, loser.user);
        wager.winner = Some(winner_id);
        wager.split = Some(split);

        let mut queue = as_ids(txn.get(&Key::PayoutQueue).await?)?.unwrap_or_default();
        let mut payouts = Vec::new();
        let shares = [
            (treasury_payout, PayoutKind::Treasury, split.treasury_fee, treasury),
            (
                group_payout,
                PayoutKind::GroupOwner,
                split.group_owner_fee,
                group_wallet.map(|w| w.address),
            ),
        ];
        for (payout_id, kind, amount, destination) in shares {
            if amount == 0 {
                continue;
            }
            let (status, last_error) = match destination {
                Some(_) => (TransferStatus::Pending, None),
                None => {
                    error!(wager = id, payout = payout_id, amount, "no destination for fee share");
                    (TransferStatus::Failed, Some("no destination configured".to_string()))
                }
            };
            let payout = FeePayout {
                id: payout_id,
                wager: id,
                chat,
                kind,
                destination,
                amount,
                status,
                signature: None,
                attempts: 0,
                last_error,
                created_at: now,
                updated_at: now,
            };
            queue.push(payout_id);
            payouts.push(payout_id);
            txn.put(Key::FeePayout(payout_id), Value::FeePayout(payout))?;
        }
        txn.put(Key::PayoutQueue, Value::Ids(queue))?;
        txn.put(Key::Wallet(challenger.user), Value::Wallet(challenger))?;
        txn.put(Key::Wallet(opponent.user), Value::Wallet(opponent))?;
        txn.put(Key::TokenWager(id), Value::TokenWager(wager))?;
        txn.commit().await?;
        info!(
            wager = id,
            chat = %chat,
            winner = %winner_id,
            payout = split.winner_payout,
            treasury_fee = split.treasury_fee,
            group_owner_fee = split.group_owner_fee,
            "token wager settled"
        );

        if !payouts.is_empty() {
            let engine = Arc::clone(self);
            let ids = payouts.clone();
            tokio::spawn(async move {
                for payout in ids {
                    if let Err(err) = engine.dispatch_payout(payout, now).await {
                        warn!(payout, ?err, "fee payout dispatch failed");
                    }
                }
            });
        }

        Ok(TokenWagerOutcome::Decided {
            rolls,
            winner: winner_id,
            loser: loser_id,
            split,
            payouts,
        })
    }

    pub async fn decline_token_wager(
        &self,
        id: u64,
        actor: &PlayerRef,
        now: u64,
    ) -> Result<TokenWager, Error> {
        self.close_token_wager(id, now, TokenWagerStatus::Declined, |wager| {
            wager.opponent.matches(actor)
        })
        .await
    }

    pub async fn cancel_token_wager(&self, id: u64, actor: UserId, now: u64) -> Result<TokenWager, Error> {
        self.close_token_wager(id, now, TokenWagerStatus::Cancelled, |wager| {
            wager.challenger == actor
        })
        .await
    }

    async fn close_token_wager(
        &self,
        id: u64,
        now: u64,
        status: TokenWagerStatus,
        allowed: impl FnOnce(&TokenWager) -> bool,
    ) -> Result<TokenWager, Error> {
        let mut txn = self.store.lock(&[Key::TokenWager(id)]).await?;
        let mut wager = as_token_wager(txn.get(&Key::TokenWager(id)).await?)?
            .ok_or(Error::WagerNotFound(id))?;
        if wager.status.is_terminal() {
            return Err(Error::NoLongerAvailable);
        }
        if !allowed(&wager) {
            return Err(Error::NotParticipant);
        }
        wager.status = status;
        wager.resolved_at = Some(now);
        txn.put(Key::TokenWager(id), Value::TokenWager(wager.clone()))?;
        txn.commit().await?;
        info!(wager = id, status = ?status, "token wager closed");
        Ok(wager)
    }
}
