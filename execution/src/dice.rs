use growbet_types::DICE_SIDES;
use rand::{Rng, RngCore};

/// Source of game randomness.
pub trait Dice: Send {
    /// Uniform in `[1, DICE_SIDES]`.
    fn roll(&mut self) -> u8;

    /// Uniform in `[low, high]`.
    fn range_i32(&mut self, low: i32, high: i32) -> i32;

    /// Uniform in `[low, high]`.
    fn range_u32(&mut self, low: u32, high: u32) -> u32;

    /// Uniform index in `[0, len)`. `len` must be non-zero.
    fn pick(&mut self, len: usize) -> usize;
}

impl<R: RngCore + Send> Dice for R {
    fn roll(&mut self) -> u8 {
        self.gen_range(1..=DICE_SIDES)
    }

    fn range_i32(&mut self, low: i32, high: i32) -> i32 {
        self.gen_range(low..=high.max(low))
    }

    fn range_u32(&mut self, low: u32, high: u32) -> u32 {
        self.gen_range(low..=high.max(low))
    }

    fn pick(&mut self, len: usize) -> usize {
        self.gen_range(0..len.max(1))
    }
}

/// Replays fixed outcomes, then falls back to the lowest value of each range.
#[cfg(any(test, feature = "mocks"))]
#[derive(Debug, Default, Clone)]
pub struct ScriptedDice {
    values: std::collections::VecDeque<i64>,
}

#[cfg(any(test, feature = "mocks"))]
impl ScriptedDice {
    pub fn new(values: impl IntoIterator<Item = i64>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    fn next_or(&mut self, fallback: i64) -> i64 {
        self.values.pop_front().unwrap_or(fallback)
    }
}

#[cfg(any(test, feature = "mocks"))]
impl Dice for ScriptedDice {
    fn roll(&mut self) -> u8 {
        self.next_or(1).clamp(1, i64::from(DICE_SIDES)) as u8
    }

    fn range_i32(&mut self, low: i32, high: i32) -> i32 {
        self.next_or(i64::from(low))
            .clamp(i64::from(low), i64::from(high.max(low))) as i32
    }

    fn range_u32(&mut self, low: u32, high: u32) -> u32 {
        self.next_or(i64::from(low))
            .clamp(i64::from(low), i64::from(high.max(low))) as u32
    }

    fn pick(&mut self, len: usize) -> usize {
        let last = len.saturating_sub(1) as i64;
        self.next_or(0).clamp(0, last) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn rolls_stay_on_the_die() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1_000 {
            let roll = rng.roll();
            assert!((1..=DICE_SIDES).contains(&roll));
        }
    }

    #[test]
    fn scripted_values_are_clamped() {
        let mut dice = ScriptedDice::new([150, 0, 30]);
        assert_eq!(dice.roll(), 100);
        assert_eq!(dice.roll(), 1);
        assert_eq!(dice.range_i32(-5, 20), 20);
        assert_eq!(dice.range_i32(-5, 20), -5);
    }
}
