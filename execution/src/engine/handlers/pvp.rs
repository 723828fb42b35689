use super::*;
use growbet_types::{
    ChatId, Opponent, OpponentRef, PlayerRef, PvpOutcome, PvpStatus, Sequence, UserId,
};

impl<S: State + 'static, G: ChainGateway, K: KeyProvider> Engine<S, G, K> {
    // === PvP wagers ===

    /// Binds a challenge target to a user id when one is known.
    pub(super) async fn resolve_opponent(
        &self,
        challenger: UserId,
        opponent: &OpponentRef,
    ) -> Result<Opponent, Error> {
        let resolved = match opponent {
            OpponentRef::Player(player) => Opponent::User(player.id),
            OpponentRef::Username(name) => {
                let opponent = Opponent::from_username(name)
                    .ok_or_else(|| Error::InvalidUsername(name.clone()))?;
                match self.lookup_username(name).await? {
                    Some(user) => Opponent::User(user),
                    None => opponent,
                }
            }
        };
        if resolved.user() == Some(challenger) {
            return Err(Error::SelfTarget);
        }
        Ok(resolved)
    }

    pub async fn pvp_wager(&self, id: u64) -> Result<Option<PvpWager>, Error> {
        as_pvp_wager(self.store.read(&Key::PvpWager(id)).await?)
    }

    pub async fn create_pvp_wager(
        &self,
        challenger: &PlayerRef,
        opponent: &OpponentRef,
        chat: ChatId,
        bet: u32,
        now: u64,
    ) -> Result<PvpWager, Error> {
        if bet < self.policy.min_pvp_bet {
            return Err(Error::BelowMinimum {
                amount: u64::from(bet),
                minimum: u64::from(self.policy.min_pvp_bet),
            });
        }
        if bet > self.policy.max_pvp_bet {
            return Err(Error::AboveMaximum {
                amount: u64::from(bet),
                maximum: u64::from(self.policy.max_pvp_bet),
            });
        }
        let opponent = self.resolve_opponent(challenger.id, opponent).await?;

        let id = self.store.next_id(Sequence::PvpWager).await?;
        let key = AccountKey::new(challenger.id, chat);
        let mut txn = self
            .store
            .lock(&[Key::Account(key), Key::PvpWager(id)])
            .await?;
        let account = Self::locked_account(&txn, key).await?;
        let available = account.total();
        if available < f64::from(bet) {
            return Err(Error::InsufficientFunds {
                required: f64::from(bet),
                available,
            });
        }

        let wager = PvpWager {
            id,
            chat,
            challenger: challenger.id,
            opponent,
            bet,
            status: PvpStatus::Pending,
            rolls: None,
            winner: None,
            created_at: now,
            resolved_at: None,
        };
        txn.put(Key::PvpWager(id), Value::PvpWager(wager.clone()))?;
        txn.commit().await?;
        info!(wager = id, challenger = %challenger.id, chat = %chat, bet, "pvp wager created");
        Ok(wager)
    }

    /// Accepts a pending challenge and resolves it in the same transaction.
    pub async fn accept_pvp_wager(
        &self,
        id: u64,
        acceptor: &PlayerRef,
        now: u64,
    ) -> Result<PvpOutcome, Error> {
        let snapshot = self.pvp_wager(id).await?.ok_or(Error::WagerNotFound(id))?;
        let challenger_key = AccountKey::new(snapshot.challenger, snapshot.chat);
        let acceptor_key = AccountKey::new(acceptor.id, snapshot.chat);
        if acceptor.id == snapshot.challenger {
            return Err(Error::SelfTarget);
        }

        let mut txn = self
            .store
            .lock(&[
                Key::PvpWager(id),
                Key::Account(challenger_key),
                Key::Account(acceptor_key),
            ])
            .await?;
        let mut wager = required(as_pvp_wager(txn.get(&Key::PvpWager(id)).await?)?, format!("pvp wager {id}"))?;
        if wager.status != PvpStatus::Pending {
            return Err(Error::NoLongerAvailable);
        }
        if !wager.opponent.matches(acceptor) {
            return Err(Error::NotParticipant);
        }

        let mut challenger = Self::locked_account(&txn, challenger_key).await?;
        let mut opponent = Self::locked_account(&txn, acceptor_key).await?;
        let bet = f64::from(wager.bet);
        let available = opponent.total();
        if available < bet {
            return Err(Error::InsufficientFunds {
                required: bet,
                available,
            });
        }
        if challenger.total() < bet {
            return Err(Error::CounterpartyInsufficient);
        }

        // Late binding happens here, once.
        wager.opponent = Opponent::User(acceptor.id);
        Self::transition_pvp(&mut wager, PvpStatus::Accepted)?;

        let rolls = self.roll_pair();
        wager.rolls = Some(rolls);
        wager.resolved_at = Some(now);

        let outcome = if rolls.is_draw() {
            Self::transition_pvp(&mut wager, PvpStatus::Draw)?;
            PvpOutcome::Draw { rolls }
        } else {
            let (winner, loser) = if rolls.challenger_wins() {
                (&mut challenger, &mut opponent)
            } else {
                (&mut opponent, &mut challenger)
            };
            winner.free_length += bet;
            loser.free_length -= bet;
            winner.pvp.record_win();
            loser.pvp.record_loss();
            winner.last_active = now;
            loser.last_active = now;
            wager.winner = Some(winner.user);
            Self::transition_pvp(&mut wager, PvpStatus::Resolved)?;
            PvpOutcome::Decided {
                rolls,
                winner: winner.user,
                loser: loser.user,
                bet: wager.bet,
                winner_total: winner.total(),
                loser_total: loser.total(),
                winner_streak: winner.pvp.streak,
            }
        };

        Self::put_account(&mut txn, challenger)?;
        Self::put_account(&mut txn, opponent)?;
        txn.put(Key::PvpWager(id), Value::PvpWager(wager.clone()))?;
        txn.commit().await?;
        info!(
            wager = id,
            chat = %wager.chat,
            status = ?wager.status,
            winner = ?wager.winner,
            challenger_roll = rolls.challenger,
            opponent_roll = rolls.opponent,
            "pvp wager resolved"
        );
        Ok(outcome)
    }

    /// Declines a pending challenge addressed to `actor`.
    pub async fn decline_pvp_wager(&self, id: u64, actor: &PlayerRef, now: u64) -> Result<PvpWager, Error> {
        self.close_pvp_wager(id, now, |wager| wager.opponent.matches(actor))
            .await
    }

    /// Withdraws a pending challenge made by `actor`.
    pub async fn cancel_pvp_wager(&self, id: u64, actor: UserId, now: u64) -> Result<PvpWager, Error> {
        self.close_pvp_wager(id, now, |wager| wager.challenger == actor)
            .await
    }

    async fn close_pvp_wager(
        &self,
        id: u64,
        now: u64,
        allowed: impl FnOnce(&PvpWager) -> bool,
    ) -> Result<PvpWager, Error> {
        let mut txn = self.store.lock(&[Key::PvpWager(id)]).await?;
        let mut wager = as_pvp_wager(txn.get(&Key::PvpWager(id)).await?)?
            .ok_or(Error::WagerNotFound(id))?;
        if wager.status != PvpStatus::Pending {
            return Err(Error::NoLongerAvailable);
        }
        if !allowed(&wager) {
            return Err(Error::NotParticipant);
        }
        Self::transition_pvp(&mut wager, PvpStatus::Declined)?;
        wager.resolved_at = Some(now);
        txn.put(Key::PvpWager(id), Value::PvpWager(wager.clone()))?;
        txn.commit().await?;
        info!(wager = id, "pvp wager declined");
        Ok(wager)
    }

    fn transition_pvp(wager: &mut PvpWager, next: PvpStatus) -> Result<(), Error> {
        if !wager.status.can_transition(next) {
            return Err(Error::Invariant(format!(
                "pvp wager {} cannot move from {:?} to {next:?}",
                wager.id, wager.status
            )));
        }
        wager.status = next;
        Ok(())
    }
}
