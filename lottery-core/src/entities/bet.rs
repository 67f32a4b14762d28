use crate::entities::DrawStatus;
use crate::framework::{DatabaseProcessor, StoreError};
use kanau::processor::Processor;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Bet {
    pub id: i64,
    pub draw_id: i64,
    pub user_id: i64,
    /// Chosen numbers, stored ascending.
    pub numbers: Vec<i32>,
    pub complementary_number: i32,
    pub is_winner: bool,
    pub prize_won: Decimal,
    pub created_at: time::PrimitiveDateTime,
}

/// A user's bet joined with the draw it was placed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct UserBet {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub bet: Bet,
    pub draw_date: time::Date,
    pub prize_amount: Decimal,
    pub status: DrawStatus,
    pub winning_numbers: Option<Vec<i32>>,
    pub winning_complementary: Option<i32>,
}

#[derive(Debug, Clone)]
/// Insert a bet, but only while the draw is still `open`.
///
/// Returns `None` when the draw is missing or no longer open at write time.
/// A second bet for the same (draw, user) pair fails with
/// [`StoreError::UniqueViolation`].
pub struct InsertBet {
    pub draw_id: i64,
    pub user_id: i64,
    pub numbers: Vec<i32>,
    pub complementary_number: i32,
}

impl Processor<InsertBet> for DatabaseProcessor {
    type Output = Option<Bet>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertBet")]
    async fn process(&self, insert: InsertBet) -> Result<Option<Bet>, StoreError> {
        let bet = sqlx::query_as::<_, Bet>(
            r#"
            INSERT INTO bets (draw_id, user_id, numbers, complementary_number)
            SELECT $1, $2, $3, $4
            WHERE EXISTS (
                SELECT 1 FROM lottery_draws WHERE id = $1 AND status = 'open'
            )
            RETURNING
                id, draw_id, user_id, numbers, complementary_number,
                is_winner, prize_won, created_at
            "#,
        )
        .bind(insert.draw_id)
        .bind(insert.user_id)
        .bind(insert.numbers)
        .bind(insert.complementary_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(bet)
    }
}

impl Bet {
    /// All bets of a draw, oldest first.
    pub async fn list_for_draw_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        draw_id: i64,
    ) -> Result<Vec<Bet>, sqlx::Error> {
        sqlx::query_as::<_, Bet>(
            r#"
            SELECT
                id, draw_id, user_id, numbers, complementary_number,
                is_winner, prize_won, created_at
            FROM bets
            WHERE draw_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(draw_id)
        .fetch_all(&mut **tx)
        .await
    }

    /// Flag every listed bet as a winner with the same prize, in one
    /// statement. Returns the number of rows updated.
    pub async fn award_winners_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        bet_ids: &[i64],
        prize_per_winner: Decimal,
    ) -> Result<u64, sqlx::Error> {
        if bet_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE bets
            SET is_winner = true, prize_won = $1
            WHERE id = ANY($2) AND is_winner = false
            "#,
        )
        .bind(prize_per_winner)
        .bind(bet_ids)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// All bets of a user with their draw details, newest draw first.
pub struct ListUserBets {
    pub user_id: i64,
}

impl Processor<ListUserBets> for DatabaseProcessor {
    type Output = Vec<UserBet>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:ListUserBets")]
    async fn process(&self, query: ListUserBets) -> Result<Vec<UserBet>, StoreError> {
        let bets = sqlx::query_as::<_, UserBet>(
            r#"
            SELECT
                b.id, b.draw_id, b.user_id, b.numbers, b.complementary_number,
                b.is_winner, b.prize_won, b.created_at,
                ld.draw_date,
                ld.prize_amount,
                ld.status,
                ld.numbers AS winning_numbers,
                ld.complementary_number AS winning_complementary
            FROM bets b
            JOIN lottery_draws ld ON b.draw_id = ld.id
            WHERE b.user_id = $1
            ORDER BY ld.draw_date DESC
            "#,
        )
        .bind(query.user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(bets)
    }
}
