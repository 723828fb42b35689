use serde::{Deserialize, Serialize};

use crate::{
    token, ChatId, BPS_DENOMINATOR, DAILY_BONUS_MAX, DAILY_BONUS_MIN, DAILY_ELIGIBILITY_DAYS,
    DEFAULT_TOKEN_DECIMALS, GROUP_OWNER_FEE_BPS, GROW_MAX, GROW_MIN, PRIMARY_TREASURY_FEE_BPS,
    PURCHASE_TOLERANCE_BPS, TREASURY_FEE_BPS, WITHDRAWAL_DRAFT_TTL_SECS,
};

/// A purchasable amount of paid length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub number: u8,
    /// Price in whole tokens.
    pub price: u64,
    /// Paid length credited on verification.
    pub growth: u32,
}

fn default_packages() -> Vec<Package> {
    [(1, 5_000, 20), (2, 10_000, 40), (3, 15_000, 60), (4, 20_000, 80), (5, 25_000, 100)]
        .into_iter()
        .map(|(number, price, growth)| Package {
            number,
            price,
            growth,
        })
        .collect()
}

fn default_token_decimals() -> u8 {
    DEFAULT_TOKEN_DECIMALS
}

fn default_min_pvp_bet() -> u32 {
    1
}

fn default_max_pvp_bet() -> u32 {
    1_000
}

fn default_min_token_wager() -> u64 {
    token::unit(DEFAULT_TOKEN_DECIMALS)
}

fn default_max_token_wager() -> u64 {
    100_000 * token::unit(DEFAULT_TOKEN_DECIMALS)
}

fn default_min_withdrawal() -> u64 {
    10 * token::unit(DEFAULT_TOKEN_DECIMALS)
}

fn default_treasury_fee_bps() -> u16 {
    TREASURY_FEE_BPS
}

fn default_group_owner_fee_bps() -> u16 {
    GROUP_OWNER_FEE_BPS
}

fn default_primary_treasury_fee_bps() -> u16 {
    PRIMARY_TREASURY_FEE_BPS
}

fn default_grow_min() -> i32 {
    GROW_MIN
}

fn default_grow_max() -> i32 {
    GROW_MAX
}

fn default_daily_bonus_min() -> u32 {
    DAILY_BONUS_MIN
}

fn default_daily_bonus_max() -> u32 {
    DAILY_BONUS_MAX
}

fn default_eligibility_days() -> u64 {
    DAILY_ELIGIBILITY_DAYS
}

fn default_purchase_tolerance_bps() -> u16 {
    PURCHASE_TOLERANCE_BPS
}

fn default_draft_ttl_secs() -> u64 {
    WITHDRAWAL_DRAFT_TTL_SECS
}

/// Economic configuration scalars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u8,
    #[serde(default = "default_min_pvp_bet")]
    pub min_pvp_bet: u32,
    #[serde(default = "default_max_pvp_bet")]
    pub max_pvp_bet: u32,
    /// Token wager limits in minor units.
    #[serde(default = "default_min_token_wager")]
    pub min_token_wager: u64,
    #[serde(default = "default_max_token_wager")]
    pub max_token_wager: u64,
    #[serde(default = "default_min_withdrawal")]
    pub min_withdrawal: u64,
    #[serde(default = "default_treasury_fee_bps")]
    pub treasury_fee_bps: u16,
    #[serde(default = "default_group_owner_fee_bps")]
    pub group_owner_fee_bps: u16,
    #[serde(default = "default_primary_treasury_fee_bps")]
    pub primary_treasury_fee_bps: u16,
    #[serde(default)]
    pub primary_chat: Option<ChatId>,
    /// Fallback treasury address. The `treasury_address` setting overrides it.
    #[serde(default)]
    pub treasury_address: Option<String>,
    #[serde(default = "default_packages")]
    pub packages: Vec<Package>,
    #[serde(default = "default_grow_min")]
    pub grow_min: i32,
    #[serde(default = "default_grow_max")]
    pub grow_max: i32,
    #[serde(default = "default_daily_bonus_min")]
    pub daily_bonus_min: u32,
    #[serde(default = "default_daily_bonus_max")]
    pub daily_bonus_max: u32,
    #[serde(default = "default_eligibility_days")]
    pub eligibility_days: u64,
    #[serde(default = "default_purchase_tolerance_bps")]
    pub purchase_tolerance_bps: u16,
    #[serde(default = "default_draft_ttl_secs")]
    pub draft_ttl_secs: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            token_decimals: default_token_decimals(),
            min_pvp_bet: default_min_pvp_bet(),
            max_pvp_bet: default_max_pvp_bet(),
            min_token_wager: default_min_token_wager(),
            max_token_wager: default_max_token_wager(),
            min_withdrawal: default_min_withdrawal(),
            treasury_fee_bps: default_treasury_fee_bps(),
            group_owner_fee_bps: default_group_owner_fee_bps(),
            primary_treasury_fee_bps: default_primary_treasury_fee_bps(),
            primary_chat: None,
            treasury_address: None,
            packages: default_packages(),
            grow_min: default_grow_min(),
            grow_max: default_grow_max(),
            daily_bonus_min: default_daily_bonus_min(),
            daily_bonus_max: default_daily_bonus_max(),
            eligibility_days: default_eligibility_days(),
            purchase_tolerance_bps: default_purchase_tolerance_bps(),
            draft_ttl_secs: default_draft_ttl_secs(),
        }
    }
}

impl Policy {
    pub fn is_primary(&self, chat: ChatId) -> bool {
        self.primary_chat == Some(chat)
    }

    /// Fee rates (treasury, group owner) for wagers settled in `chat`.
    pub fn fee_rates(&self, chat: ChatId) -> (u16, u16) {
        if self.is_primary(chat) {
            (self.primary_treasury_fee_bps, 0)
        } else {
            (self.treasury_fee_bps, self.group_owner_fee_bps)
        }
    }

    pub fn package(&self, number: u8) -> Option<&Package> {
        self.packages.iter().find(|p| p.number == number)
    }

    /// Minimum transferred amount (minor units) that verifies a purchase of `price` minor units.
    pub fn purchase_threshold(&self, price: u64) -> u64 {
        let scaled = u128::from(price) * u128::from(self.purchase_tolerance_bps);
        let denominator = u128::from(BPS_DENOMINATOR);
        // Round up so the comparison stays `amount >= price * tolerance`.
        let threshold = scaled.div_ceil(denominator);
        u64::try_from(threshold).unwrap_or(u64::MAX)
    }
}
