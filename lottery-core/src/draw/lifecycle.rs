//! Draw lifecycle rules and result generation.
//!
//! A draw moves `open -> closed -> completed` and never back. `completed`
//! is only reachable by generating results, which happens exactly once.

use super::DrawError;
use crate::entities::DrawStatus;
use crate::entities::draw::Draw;
use rand::Rng;
use serde::Serialize;
use std::ops::RangeInclusive;

/// How many main numbers a draw and a bet have.
pub const NUMBER_COUNT: usize = 5;
pub const NUMBER_RANGE: RangeInclusive<i32> = 1..=49;
pub const COMPLEMENTARY_RANGE: RangeInclusive<i32> = 1..=10;

/// The winning combination of a completed draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrawResult {
    numbers: [i32; NUMBER_COUNT],
    complementary: i32,
}

impl DrawResult {
    /// Draw five distinct numbers from 1..=49 and one complementary number
    /// from 1..=10.
    ///
    /// Distinctness comes from rejection sampling: a value already drawn is
    /// simply drawn again.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut numbers = [0; NUMBER_COUNT];
        let mut drawn = 0;
        while drawn < NUMBER_COUNT {
            let candidate = rng.random_range(NUMBER_RANGE);
            if !numbers[..drawn].contains(&candidate) {
                numbers[drawn] = candidate;
                drawn += 1;
            }
        }
        numbers.sort_unstable();

        Self {
            numbers,
            complementary: rng.random_range(COMPLEMENTARY_RANGE),
        }
    }

    /// Winning numbers, ascending.
    pub fn numbers(&self) -> &[i32; NUMBER_COUNT] {
        &self.numbers
    }

    pub fn complementary(&self) -> i32 {
        self.complementary
    }

    /// The stored result of a draw, if it has one.
    pub fn of(draw: &Draw) -> Option<Self> {
        let numbers = draw.numbers.as_deref()?.try_into().ok()?;
        Some(Self {
            numbers,
            complementary: draw.complementary_number?,
        })
    }
}

/// A validated bet selection: five distinct numbers, kept ascending, and a
/// complementary number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    numbers: [i32; NUMBER_COUNT],
    complementary: i32,
}

impl Selection {
    pub fn new(numbers: &[i32], complementary: i32) -> Result<Self, DrawError> {
        let Ok(mut numbers) = <[i32; NUMBER_COUNT]>::try_from(numbers) else {
            return Err(DrawError::Validation(format!(
                "must provide exactly {NUMBER_COUNT} numbers, got {}",
                numbers.len()
            )));
        };
        if let Some(out_of_range) = numbers.iter().find(|n| !NUMBER_RANGE.contains(*n)) {
            return Err(DrawError::Validation(format!(
                "numbers must be between 1 and 49, got {out_of_range}"
            )));
        }
        numbers.sort_unstable();
        if numbers.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(DrawError::Validation("numbers must be distinct".to_string()));
        }
        if !COMPLEMENTARY_RANGE.contains(&complementary) {
            return Err(DrawError::Validation(format!(
                "complementary number must be between 1 and 10, got {complementary}"
            )));
        }
        Ok(Self {
            numbers,
            complementary,
        })
    }

    pub fn numbers(&self) -> &[i32; NUMBER_COUNT] {
        &self.numbers
    }

    pub fn complementary(&self) -> i32 {
        self.complementary
    }
}

/// Check a manual status change.
///
/// Setting the current status again is allowed. Going backwards is not,
/// and `completed` is reserved for result generation.
pub fn check_transition(from: DrawStatus, to: DrawStatus) -> Result<(), DrawError> {
    if to < from || (to == DrawStatus::Completed && from != DrawStatus::Completed) {
        return Err(DrawError::IllegalTransition { from, to });
    }
    Ok(())
}

/// Check that results may be generated for `draw`.
///
/// A draw that already has results reports `AlreadyGenerated` even though its
/// status is no longer `closed`.
pub fn check_can_complete(draw: &Draw) -> Result<(), DrawError> {
    if draw.numbers.is_some() {
        return Err(DrawError::AlreadyGenerated(draw.id));
    }
    if draw.status != DrawStatus::Closed {
        return Err(DrawError::NotClosed(draw.id));
    }
    Ok(())
}
