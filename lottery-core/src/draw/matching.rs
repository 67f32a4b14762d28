//! Winner matching and prize distribution.
//!
//! Only an exact match wins: all five numbers as a set plus the
//! complementary number. The prize pool is split evenly between winners and
//! nothing carries over when nobody wins.

use super::DrawResult;
use crate::entities::bet::Bet;
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places of a stored prize.
const PRIZE_SCALE: u32 = 2;

/// Outcome of matching every bet of a draw against its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// Ids of the winning bets.
    pub winner_ids: Vec<i64>,
    /// Prize credited to each winning bet; zero when nobody won.
    pub prize_per_winner: Decimal,
}

impl Settlement {
    pub fn winners_count(&self) -> usize {
        self.winner_ids.len()
    }
}

/// Whether a selection wins against `result`.
///
/// The selection is sorted before comparing, so callers may pass stored or
/// raw numbers alike.
pub fn is_winning(result: &DrawResult, numbers: &[i32], complementary: i32) -> bool {
    let mut sorted = numbers.to_vec();
    sorted.sort_unstable();
    sorted == result.numbers() && complementary == result.complementary()
}

/// Match `bets` against `result` and split `prize_amount` between winners.
///
/// Each share is rounded down to cents, so the total paid out never exceeds
/// the pool.
pub fn settle(result: &DrawResult, prize_amount: Decimal, bets: &[Bet]) -> Settlement {
    let winner_ids: Vec<i64> = bets
        .iter()
        .filter(|bet| is_winning(result, &bet.numbers, bet.complementary_number))
        .map(|bet| bet.id)
        .collect();

    let prize_per_winner = if winner_ids.is_empty() {
        Decimal::ZERO
    } else {
        (prize_amount / Decimal::from(winner_ids.len()))
            .round_dp_with_strategy(PRIZE_SCALE, RoundingStrategy::ToZero)
    };

    Settlement {
        winner_ids,
        prize_per_winner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::bet_fixture;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn fixed_result() -> DrawResult {
        let mut rng = StdRng::seed_from_u64(2099);
        DrawResult::generate(&mut rng)
    }

    #[test]
    fn test_exact_match_wins_regardless_of_order() {
        let result = fixed_result();
        let mut shuffled = result.numbers().to_vec();
        shuffled.reverse();

        assert!(is_winning(&result, result.numbers(), result.complementary()));
        assert!(is_winning(&result, &shuffled, result.complementary()));
    }

    #[test]
    fn test_partial_matches_lose() {
        let result = fixed_result();
        let other_complementary = result.complementary() % 10 + 1;
        assert!(!is_winning(&result, result.numbers(), other_complementary));

        let mut four_of_five = *result.numbers();
        four_of_five[0] = (1..=49)
            .find(|n| !result.numbers().contains(n))
            .unwrap();
        assert!(!is_winning(&result, &four_of_five, result.complementary()));
    }

    #[test]
    fn test_prize_is_split_between_winners() {
        let result = fixed_result();
        let winning = result.numbers().to_vec();
        let bets = vec![
            bet_fixture(1, 10, winning.clone(), result.complementary()),
            bet_fixture(2, 11, vec![1, 2, 3, 4, 5], result.complementary()),
            bet_fixture(3, 12, winning.clone(), result.complementary()),
            bet_fixture(4, 13, winning, result.complementary()),
        ];

        let settlement = settle(&result, Decimal::from(1000), &bets);

        assert_eq!(settlement.winner_ids, vec![1, 3, 4]);
        assert_eq!(settlement.prize_per_winner, Decimal::new(33333, 2));
        let winners = Decimal::from(settlement.winners_count());
        let paid = settlement.prize_per_winner * winners;
        assert!(paid <= Decimal::from(1000));
        assert!(Decimal::from(1000) - paid < Decimal::new(1, 2) * winners);
    }

    #[test]
    fn test_single_winner_takes_whole_pool() {
        let result = fixed_result();
        let bets = vec![bet_fixture(
            9,
            1,
            result.numbers().to_vec(),
            result.complementary(),
        )];

        let settlement = settle(&result, Decimal::from(1000), &bets);

        assert_eq!(settlement.winner_ids, vec![9]);
        assert_eq!(settlement.prize_per_winner, Decimal::from(1000));
    }

    #[test]
    fn test_no_winner_distributes_nothing() {
        let result = fixed_result();
        let bets = vec![bet_fixture(1, 1, vec![1, 2, 3, 4, 5], 1)]
            .into_iter()
            .filter(|bet| !is_winning(&result, &bet.numbers, bet.complementary_number))
            .collect::<Vec<_>>();

        let settlement = settle(&result, Decimal::from(1000), &bets);

        assert!(settlement.winner_ids.is_empty());
        assert_eq!(settlement.prize_per_winner, Decimal::ZERO);
        assert_eq!(
            settle(&result, Decimal::from(1000), &[]).prize_per_winner,
            Decimal::ZERO
        );
    }
}
