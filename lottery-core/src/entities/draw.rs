use crate::draw::matching::settle;
use crate::draw::{DrawResult, Settlement};
use crate::entities::DrawStatus;
use crate::entities::bet::Bet;
use crate::framework::{DatabaseProcessor, StoreError};
use kanau::processor::Processor;
use rust_decimal::Decimal;
use serde::Serialize;

const DRAW_COLUMNS: &str =
    "id, draw_date, prize_amount, status, numbers, complementary_number, created_at";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Draw {
    pub id: i64,
    pub draw_date: time::Date,
    pub prize_amount: Decimal,
    pub status: DrawStatus,
    /// Winning numbers, ascending. Only present once the draw is completed.
    pub numbers: Option<Vec<i32>>,
    pub complementary_number: Option<i32>,
    pub created_at: time::PrimitiveDateTime,
}

/// A draw together with its participation counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DrawSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub draw: Draw,
    pub total_bettors: i64,
    pub winners: i64,
}

#[derive(Debug, Clone)]
/// Insert a new draw in the `open` state.
///
/// Fails with [`StoreError::UniqueViolation`] when a draw already exists
/// for the date.
pub struct InsertDraw {
    pub draw_date: time::Date,
    pub prize_amount: Decimal,
}

impl Processor<InsertDraw> for DatabaseProcessor {
    type Output = Draw;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertDraw")]
    async fn process(&self, insert: InsertDraw) -> Result<Draw, StoreError> {
        let draw = sqlx::query_as::<_, Draw>(&format!(
            "INSERT INTO lottery_draws (draw_date, prize_amount) VALUES ($1, $2) \
             RETURNING {DRAW_COLUMNS}"
        ))
        .bind(insert.draw_date)
        .bind(insert.prize_amount)
        .fetch_one(&self.pool)
        .await?;
        Ok(draw)
    }
}

#[derive(Debug, Clone)]
pub struct GetDrawById {
    pub draw_id: i64,
}

impl Processor<GetDrawById> for DatabaseProcessor {
    type Output = Option<Draw>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDrawById")]
    async fn process(&self, query: GetDrawById) -> Result<Option<Draw>, StoreError> {
        let draw = sqlx::query_as::<_, Draw>(&format!(
            "SELECT {DRAW_COLUMNS} FROM lottery_draws WHERE id = $1"
        ))
        .bind(query.draw_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(draw)
    }
}

#[derive(Debug, Clone)]
/// List every draw, newest draw date first, with bettor and winner counts.
pub struct ListDraws;

impl Processor<ListDraws> for DatabaseProcessor {
    type Output = Vec<DrawSummary>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:ListDraws")]
    async fn process(&self, _query: ListDraws) -> Result<Vec<DrawSummary>, StoreError> {
        let draws = sqlx::query_as::<_, DrawSummary>(
            r#"
            SELECT
                ld.id,
                ld.draw_date,
                ld.prize_amount,
                ld.status,
                ld.numbers,
                ld.complementary_number,
                ld.created_at,
                COUNT(DISTINCT b.user_id) AS total_bettors,
                COUNT(DISTINCT b.user_id) FILTER (WHERE b.is_winner) AS winners
            FROM lottery_draws ld
            LEFT JOIN bets b ON ld.id = b.draw_id
            GROUP BY ld.id
            ORDER BY ld.draw_date DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(draws)
    }
}

#[derive(Debug, Clone)]
/// Move a draw from `from` to `to`.
///
/// The row is only touched while its status still equals `from`, so a
/// concurrent transition makes this return `None` instead of overwriting it.
pub struct UpdateDrawStatus {
    pub draw_id: i64,
    pub from: DrawStatus,
    pub to: DrawStatus,
}

impl Processor<UpdateDrawStatus> for DatabaseProcessor {
    type Output = Option<Draw>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:UpdateDrawStatus")]
    async fn process(&self, update: UpdateDrawStatus) -> Result<Option<Draw>, StoreError> {
        let draw = sqlx::query_as::<_, Draw>(&format!(
            "UPDATE lottery_draws SET status = $1 WHERE id = $2 AND status = $3 \
             RETURNING {DRAW_COLUMNS}"
        ))
        .bind(update.to)
        .bind(update.draw_id)
        .bind(update.from)
        .fetch_optional(&self.pool)
        .await?;
        Ok(draw)
    }
}

impl Draw {
    /// Store the winning numbers and mark the draw completed.
    ///
    /// Only touches the row while it is `closed` with no numbers yet; of two
    /// concurrent callers exactly one gets `Some`.
    pub async fn complete_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        draw_id: i64,
        result: &DrawResult,
    ) -> Result<Option<Draw>, sqlx::Error> {
        sqlx::query_as::<_, Draw>(&format!(
            "UPDATE lottery_draws \
             SET numbers = $1, complementary_number = $2, status = 'completed' \
             WHERE id = $3 AND status = 'closed' AND numbers IS NULL \
             RETURNING {DRAW_COLUMNS}"
        ))
        .bind(result.numbers().to_vec())
        .bind(result.complementary())
        .bind(draw_id)
        .fetch_optional(&mut **tx)
        .await
    }
}

/// A completed draw and how its prize was distributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledDraw {
    pub draw: Draw,
    pub settlement: Settlement,
}

/// Complete a closed draw with `result` and award its winning bets.
///
/// Runs in one transaction: either the draw is completed and every winner
/// is paid, or nothing is written. Returns `None` when the draw cannot be
/// completed any more.
#[derive(Debug, Clone)]
pub struct SettleDraw {
    pub draw_id: i64,
    pub result: DrawResult,
}

impl Processor<SettleDraw> for DatabaseProcessor {
    type Output = Option<SettledDraw>;
    type Error = StoreError;
    #[tracing::instrument(skip_all, err, name = "SQL:SettleDraw")]
    async fn process(&self, cmd: SettleDraw) -> Result<Option<SettledDraw>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Dropping the transaction rolls it back.
        let Some(draw) = Draw::complete_tx(&mut tx, cmd.draw_id, &cmd.result).await? else {
            return Ok(None);
        };
        let bets = Bet::list_for_draw_tx(&mut tx, cmd.draw_id).await?;
        let settlement = settle(&cmd.result, draw.prize_amount, &bets);
        Bet::award_winners_tx(&mut tx, &settlement.winner_ids, settlement.prize_per_winner)
            .await?;

        tx.commit().await?;
        Ok(Some(SettledDraw { draw, settlement }))
    }
}
