//! DrawEngine.
//!
//! The DrawEngine is responsible for:
//! - Creating draws and moving them through their lifecycle
//! - Generating results exactly once and settling the bets of a draw
//! - Accepting one bet per user and draw
//! - Emitting a notification after every successful change
//!
//! Every write is conditional on the state it was checked against, so the
//! persisted row is the source of truth when two requests race. Settling a
//! draw runs in one transaction. Notifications go through the
//! [`ResilientPublisher`] and never affect the outcome of an operation.

use super::DrawError;
use super::lifecycle::{DrawResult, Selection, check_can_complete, check_transition};
use crate::broker::ResilientPublisher;
use crate::entities::bet::{Bet, InsertBet, ListUserBets, UserBet};
use crate::entities::draw::{
    Draw, DrawSummary, GetDrawById, InsertDraw, ListDraws, SettleDraw, SettledDraw,
    UpdateDrawStatus,
};
use crate::entities::{DrawStatus, UnknownStatus};
use crate::events::{CompletedDraw, LotteryEvent};
use crate::framework::StoreError;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

/// Persistence required by the [`DrawEngine`].
///
/// Implemented for any type that processes every draw and bet query, most
/// notably [`DatabaseProcessor`](crate::framework::DatabaseProcessor).
pub trait LotteryStore:
    Processor<InsertDraw, Output = Draw, Error = StoreError>
    + Processor<GetDrawById, Output = Option<Draw>, Error = StoreError>
    + Processor<ListDraws, Output = Vec<DrawSummary>, Error = StoreError>
    + Processor<UpdateDrawStatus, Output = Option<Draw>, Error = StoreError>
    + Processor<SettleDraw, Output = Option<SettledDraw>, Error = StoreError>
    + Processor<InsertBet, Output = Option<Bet>, Error = StoreError>
    + Processor<ListUserBets, Output = Vec<UserBet>, Error = StoreError>
    + Send
    + Sync
{
}

impl<T> LotteryStore for T where
    T: Processor<InsertDraw, Output = Draw, Error = StoreError>
        + Processor<GetDrawById, Output = Option<Draw>, Error = StoreError>
        + Processor<ListDraws, Output = Vec<DrawSummary>, Error = StoreError>
        + Processor<UpdateDrawStatus, Output = Option<Draw>, Error = StoreError>
        + Processor<SettleDraw, Output = Option<SettledDraw>, Error = StoreError>
        + Processor<InsertBet, Output = Option<Bet>, Error = StoreError>
        + Processor<ListUserBets, Output = Vec<UserBet>, Error = StoreError>
        + Send
        + Sync
{
}

pub struct DrawEngine<S> {
    store: S,
    publisher: Arc<ResilientPublisher>,
}

impl<S: LotteryStore> DrawEngine<S> {
    pub fn new(store: S, publisher: Arc<ResilientPublisher>) -> Self {
        Self { store, publisher }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn publisher(&self) -> &Arc<ResilientPublisher> {
        &self.publisher
    }

    /// Create an `open` draw for `draw_date`.
    pub async fn create_draw(
        &self,
        draw_date: time::Date,
        prize_amount: Decimal,
    ) -> Result<Draw, DrawError> {
        if prize_amount < Decimal::ZERO {
            return Err(DrawError::Validation(format!(
                "prize amount must not be negative, got {prize_amount}"
            )));
        }

        let draw = match self
            .query(InsertDraw {
                draw_date,
                prize_amount,
            })
            .await
        {
            Ok(draw) => draw,
            Err(StoreError::UniqueViolation { .. }) => {
                return Err(DrawError::DuplicateDraw(draw_date));
            }
            Err(e) => return Err(e.into()),
        };

        info!(draw_id = draw.id, %draw_date, "Draw created");
        self.emit(LotteryEvent::DrawCreated(&draw));
        Ok(draw)
    }

    /// Set the status of a draw by name.
    ///
    /// Only forward moves are accepted. `completed` is always refused with
    /// [`DrawError::IllegalTransition`], even from `closed`: a draw is only
    /// completed by [`generate_results`](Self::generate_results), which
    /// stores its numbers at the same time.
    pub async fn set_status(&self, draw_id: i64, new_status: &str) -> Result<Draw, DrawError> {
        let to: DrawStatus = new_status
            .parse()
            .map_err(|UnknownStatus(status)| DrawError::InvalidStatus(status))?;

        // The update only applies while the status we checked is still the
        // persisted one. If another request moved the draw in between, check
        // again against the new status.
        loop {
            let current = self
                .query(GetDrawById { draw_id })
                .await?
                .ok_or(DrawError::NotFound(draw_id))?;
            check_transition(current.status, to)?;

            let updated = self
                .query(UpdateDrawStatus {
                    draw_id,
                    from: current.status,
                    to,
                })
                .await?;
            if let Some(draw) = updated {
                info!(draw_id, from = %current.status, %to, "Draw status changed");
                self.emit(LotteryEvent::DrawStatusChanged(&draw));
                return Ok(draw);
            }
        }
    }

    /// Generate the winning numbers of a closed draw and settle its bets.
    pub async fn generate_results(&self, draw_id: i64) -> Result<CompletedDraw, DrawError> {
        let draw = self
            .query(GetDrawById { draw_id })
            .await?
            .ok_or(DrawError::NotFound(draw_id))?;
        check_can_complete(&draw)?;

        let result = DrawResult::generate(&mut rand::rng());
        self.complete_with(draw_id, result).await
    }

    async fn complete_with(
        &self,
        draw_id: i64,
        result: DrawResult,
    ) -> Result<CompletedDraw, DrawError> {
        let settled = self.query(SettleDraw { draw_id, result }).await?;

        let Some(SettledDraw { draw, settlement }) = settled else {
            // Lost against a concurrent change: report what the row says now.
            let current = self
                .query(GetDrawById { draw_id })
                .await?
                .ok_or(DrawError::NotFound(draw_id))?;
            check_can_complete(&current)?;
            return Err(DrawError::AlreadyGenerated(draw_id));
        };

        info!(
            draw_id,
            numbers = ?result.numbers(),
            complementary = result.complementary(),
            winners = settlement.winners_count(),
            prize_per_winner = %settlement.prize_per_winner,
            "Draw results generated"
        );

        let completed = CompletedDraw {
            draw,
            winners_count: settlement.winners_count() as u64,
        };
        self.emit(LotteryEvent::DrawCompleted(&completed));
        Ok(completed)
    }

    /// Place a bet for `user_id` on an open draw.
    ///
    /// The selection is validated before any query runs, and the numbers are
    /// stored ascending.
    pub async fn place_wager(
        &self,
        draw_id: i64,
        user_id: i64,
        numbers: &[i32],
        complementary: i32,
    ) -> Result<Bet, DrawError> {
        let selection = Selection::new(numbers, complementary)?;

        let inserted = match self
            .query(InsertBet {
                draw_id,
                user_id,
                numbers: selection.numbers().to_vec(),
                complementary_number: selection.complementary(),
            })
            .await
        {
            Ok(inserted) => inserted,
            Err(StoreError::UniqueViolation { .. }) => {
                return Err(DrawError::DuplicateWager { draw_id, user_id });
            }
            Err(e) => return Err(e.into()),
        };

        let Some(bet) = inserted else {
            return match self.query(GetDrawById { draw_id }).await? {
                None => Err(DrawError::NotFound(draw_id)),
                Some(_) => Err(DrawError::NotOpen(draw_id)),
            };
        };

        info!(bet_id = bet.id, draw_id, user_id, "Bet placed");
        self.emit(LotteryEvent::BetPlaced(&bet));
        Ok(bet)
    }

    /// Every draw with its bettor and winner counts, newest first.
    pub async fn list_draws(&self) -> Result<Vec<DrawSummary>, DrawError> {
        Ok(self.query(ListDraws).await?)
    }

    /// Every bet of `user_id` with the details of its draw, newest first.
    pub async fn user_bets(&self, user_id: i64) -> Result<Vec<UserBet>, DrawError> {
        Ok(self.query(ListUserBets { user_id }).await?)
    }

    async fn query<Q>(&self, query: Q) -> Result<<S as Processor<Q>>::Output, StoreError>
    where
        S: Processor<Q, Error = StoreError>,
        Q: Send,
    {
        <S as Processor<Q>>::process(&self.store, query).await
    }

    fn emit(&self, event: LotteryEvent<'_>) {
        self.publisher.publish(event.routing_key(), &event);
    }
}
