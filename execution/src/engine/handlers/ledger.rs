use super::*;
use growbet_types::{
    normalize_username, utc_day, ChatId, DailyWinnerOutcome, GiftOutcome, GrowOutcome,
    LeaderboardEntry, LoanOutcome, PlayerRef, UserId,
};
use std::collections::HashMap;

impl<S: State + 'static, G: ChainGateway, K: KeyProvider> Engine<S, G, K> {
    // === In-game ledger ===

    /// Registers activity of `player` in `chat`, creating the account, roster entry, profile and
    /// username index on first sight.
    pub async fn touch(&self, player: &PlayerRef, chat: ChatId, now: u64) -> Result<Account, Error> {
        let key = AccountKey::new(player.id, chat);
        let previous_username = as_profile(self.store.read(&Key::Profile(player.id)).await?)?
            .and_then(|profile| profile.normalized_username());
        let username = player.normalized_username();

        let mut keys = vec![
            Key::Account(key),
            Key::Profile(player.id),
            Key::ChatRoster(chat),
        ];
        keys.extend(username.iter().cloned().map(Key::Username));
        keys.extend(previous_username.iter().cloned().map(Key::Username));
        let mut txn = self.store.lock(&keys).await?;

        let account = match as_account(txn.get(&Key::Account(key)).await?)? {
            Some(mut account) => {
                account.last_active = now;
                account
            }
            None => {
                info!(user = %player.id, chat = %chat, "account created");
                Account::new(key, now)
            }
        };
        Self::put_account(&mut txn, account.clone())?;

        let mut roster = as_roster(txn.get(&Key::ChatRoster(chat)).await?)?.unwrap_or_default();
        if !roster.contains(&player.id) {
            roster.push(player.id);
            txn.put(Key::ChatRoster(chat), Value::Roster(roster))?;
        }

        let profile = match as_profile(txn.get(&Key::Profile(player.id)).await?)? {
            Some(mut profile) => {
                profile.refresh(player);
                profile
            }
            None => Profile::new(player, now),
        };
        let current = profile.normalized_username();
        txn.put(Key::Profile(player.id), Value::Profile(profile))?;

        if let Some(old) = previous_username.filter(|old| Some(old) != current.as_ref()) {
            let old_key = Key::Username(old);
            if as_user(txn.get(&old_key).await?)? == Some(player.id) {
                txn.delete(&old_key)?;
            }
        }
        if let Some(name) = current {
            let name_key = Key::Username(name);
            if txn.holds(&name_key) {
                txn.put(name_key, Value::User(player.id))?;
            }
        }

        txn.commit().await?;
        Ok(account)
    }

    /// Resolves a username (with or without `@`) to a known user.
    pub async fn lookup_username(&self, username: &str) -> Result<Option<UserId>, Error> {
        let Some(name) = normalize_username(username) else {
            return Ok(None);
        };
        as_user(self.store.read(&Key::Username(name)).await?)
    }

    pub async fn profile(&self, user: UserId) -> Result<Option<Profile>, Error> {
        as_profile(self.store.read(&Key::Profile(user)).await?)
    }

    pub async fn get_account(&self, user: UserId, chat: ChatId) -> Result<Account, Error> {
        let key = AccountKey::new(user, chat);
        required(
            self.account(key).await?,
            format!("account {user}/{chat}"),
        )
    }

    pub async fn can_grow_today(&self, user: UserId, chat: ChatId, now: u64) -> Result<bool, Error> {
        Ok(self.get_account(user, chat).await?.can_grow_at(now))
    }

    /// Daily grow with a delta drawn uniformly from the configured range.
    pub async fn grow(&self, user: UserId, chat: ChatId, now: u64) -> Result<GrowOutcome, Error> {
        let (low, high) = (self.policy.grow_min, self.policy.grow_max);
        let raw_delta = self.with_dice(|dice| dice.range_i32(low, high));
        self.grow_with(user, chat, raw_delta, now).await
    }

    /// Daily grow with a caller-supplied delta. The once-per-day check and the update happen
    /// under the same row lock.
    pub async fn grow_with(
        &self,
        user: UserId,
        chat: ChatId,
        raw_delta: i32,
        now: u64,
    ) -> Result<GrowOutcome, Error> {
        let key = AccountKey::new(user, chat);
        let mut txn = self.store.lock(&[Key::Account(key)]).await?;
        let mut account = Self::locked_account(&txn, key).await?;
        if !account.can_grow_at(now) {
            return Err(Error::AlreadyGrewToday);
        }
        let outcome = account.apply_grow(raw_delta, now);
        Self::put_account(&mut txn, account)?;
        txn.commit().await?;
        info!(
            user = %user,
            chat = %chat,
            raw_delta,
            bonus = outcome.bonus,
            repaid = outcome.repaid,
            length = outcome.new_length,
            "grew"
        );
        Ok(outcome)
    }

    pub async fn apply_loan(&self, user: UserId, chat: ChatId, now: u64) -> Result<LoanOutcome, Error> {
        let key = AccountKey::new(user, chat);
        let mut txn = self.store.lock(&[Key::Account(key)]).await?;
        let mut account = Self::locked_account(&txn, key).await?;
        let outcome = account.apply_loan(now);
        if let LoanOutcome::Applied { borrowed, debt } = &outcome {
            Self::put_account(&mut txn, account)?;
            txn.commit().await?;
            info!(user = %user, chat = %chat, borrowed, debt, "loan applied");
        }
        Ok(outcome)
    }

    /// Moves `amount` of length from `sender` to `receiver`, free length first.
    pub async fn gift(
        &self,
        sender: UserId,
        receiver: UserId,
        chat: ChatId,
        amount: f64,
        now: u64,
    ) -> Result<GiftOutcome, Error> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(Error::InvalidAmount(amount.to_string()));
        }
        if sender == receiver {
            return Err(Error::SelfTarget);
        }
        let from = AccountKey::new(sender, chat);
        let to = AccountKey::new(receiver, chat);
        let mut txn = self
            .store
            .lock(&[Key::Account(from), Key::Account(to)])
            .await?;
        let mut giver = Self::locked_account(&txn, from).await?;
        let mut taker = Self::locked_account(&txn, to).await?;

        let available = giver.total();
        if available < amount {
            return Err(Error::InsufficientFunds {
                required: amount,
                available,
            });
        }
        let debit = giver.debit_for_gift(amount);
        giver.last_active = now;
        taker.free_length += amount;

        let outcome = GiftOutcome {
            amount,
            debit,
            sender_total: giver.total(),
            receiver_total: taker.total(),
        };
        Self::put_account(&mut txn, giver)?;
        Self::put_account(&mut txn, taker)?;
        txn.commit().await?;
        info!(sender = %sender, receiver = %receiver, chat = %chat, amount, "gift");
        Ok(outcome)
    }

    /// Top accounts of a chat by total length, one entry per user and per username.
    pub async fn leaderboard(&self, chat: ChatId, limit: usize) -> Result<Vec<LeaderboardEntry>, Error> {
        let roster = as_roster(self.store.read(&Key::ChatRoster(chat)).await?)?.unwrap_or_default();

        let mut by_name: HashMap<String, LeaderboardEntry> = HashMap::new();
        let mut seen = HashSet::new();
        let mut anonymous = Vec::new();
        for user in roster {
            if !seen.insert(user) {
                continue;
            }
            let Some(account) = self.account(AccountKey::new(user, chat)).await? else {
                continue;
            };
            let profile = self.profile(user).await?;
            let entry = LeaderboardEntry {
                rank: 0,
                user,
                username: profile.as_ref().and_then(|p| p.username.clone()),
                display_name: profile.as_ref().and_then(|p| p.display_name.clone()),
                total: account.total(),
            };
            match profile.and_then(|p| p.normalized_username()) {
                Some(name) => {
                    let keep = by_name
                        .get(&name)
                        .map_or(true, |existing| existing.total < entry.total);
                    if keep {
                        by_name.insert(name, entry);
                    }
                }
                None => anonymous.push(entry),
            }
        }

        let mut entries: Vec<LeaderboardEntry> = by_name.into_values().chain(anonymous).collect();
        entries.sort_by(|a, b| b.total.total_cmp(&a.total).then(a.user.cmp(&b.user)));
        entries.truncate(limit);
        for (index, entry) in entries.iter_mut().enumerate() {
            entry.rank = index as u32 + 1;
        }
        Ok(entries)
    }

    /// Picks and credits the chat's winner of the day. Repeated calls on the same UTC day report
    /// the stored winner.
    pub async fn select_daily_winner(&self, chat: ChatId, now: u64) -> Result<DailyWinnerOutcome, Error> {
        let today = utc_day(now);
        if let Some(winner) = as_daily_winner(self.store.read(&Key::DailyWinner(chat)).await?)? {
            if winner.day == today {
                return Ok(DailyWinnerOutcome::AlreadySelected(winner));
            }
        }

        let roster = as_roster(self.store.read(&Key::ChatRoster(chat)).await?)?.unwrap_or_default();
        let mut eligible = Vec::new();
        for user in roster {
            if let Some(account) = self.account(AccountKey::new(user, chat)).await? {
                if account.grew_within(now, self.policy.eligibility_days) {
                    eligible.push(user);
                }
            }
        }
        if eligible.is_empty() {
            return Ok(DailyWinnerOutcome::NoEligibleAccounts);
        }
        let (low, high) = (self.policy.daily_bonus_min, self.policy.daily_bonus_max);
        let (index, bonus) = self.with_dice(|dice| (dice.pick(eligible.len()), dice.range_u32(low, high)));
        let user = eligible[index];

        let key = AccountKey::new(user, chat);
        let mut txn = self
            .store
            .lock(&[Key::DailyWinner(chat), Key::Account(key)])
            .await?;
        if let Some(winner) = as_daily_winner(txn.get(&Key::DailyWinner(chat)).await?)? {
            if winner.day == today {
                return Ok(DailyWinnerOutcome::AlreadySelected(winner));
            }
        }
        let mut account = Self::locked_account(&txn, key).await?;
        let bonus = f64::from(bonus);
        account.free_length += bonus;
        let new_total = account.total();
        let winner = DailyWinner {
            chat,
            user,
            day: today,
            bonus,
            selected_at: now,
        };
        Self::put_account(&mut txn, account)?;
        txn.put(Key::DailyWinner(chat), Value::DailyWinner(winner.clone()))?;
        txn.commit().await?;
        info!(chat = %chat, user = %user, bonus, "daily winner selected");
        Ok(DailyWinnerOutcome::Selected { winner, new_total })
    }
}
