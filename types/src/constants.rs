/// Seconds in one UTC calendar day.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Daily growth is drawn uniformly from `[GROW_MIN, GROW_MAX]`.
pub const GROW_MIN: i32 = -5;
pub const GROW_MAX: i32 = 20;

/// Debt-relief bonus rate applied per unit of negative length and per unit of growth.
pub const DEBT_RELIEF_RATE: f64 = 0.002;

/// Share of positive growth diverted to debt repayment.
pub const DEBT_REPAYMENT_RATE: f64 = 0.2;

/// Daily winner bonus range (inclusive).
pub const DAILY_BONUS_MIN: u32 = 5;
pub const DAILY_BONUS_MAX: u32 = 15;

/// Accounts that grew within this many days are eligible for the daily winner draw.
pub const DAILY_ELIGIBILITY_DAYS: u64 = 7;

/// Wager dice are `[1, DICE_SIDES]`.
pub const DICE_SIDES: u8 = 100;

/// Basis point denominator.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Default fee split (basis points of the pot).
pub const TREASURY_FEE_BPS: u16 = 100;
pub const GROUP_OWNER_FEE_BPS: u16 = 100;
/// In the primary chat the whole fee goes to the treasury.
pub const PRIMARY_TREASURY_FEE_BPS: u16 = 200;

/// Purchases verify when the transferred amount is at least 99% of the price.
pub const PURCHASE_TOLERANCE_BPS: u16 = 9_900;

/// Token precision (minor units per whole token = 10^decimals).
pub const DEFAULT_TOKEN_DECIMALS: u8 = 6;

/// Maximum length of a stored username or display name.
pub const MAX_NAME_LENGTH: usize = 64;

/// Withdrawal wizard drafts expire after this many seconds of inactivity.
pub const WITHDRAWAL_DRAFT_TTL_SECS: u64 = 10 * 60;
