//! In-memory store and record fixtures for unit tests.

use crate::entities::DrawStatus;
use crate::draw::matching::settle;
use crate::entities::bet::{Bet, InsertBet, ListUserBets, UserBet};
use crate::entities::draw::{
    Draw, DrawSummary, GetDrawById, InsertDraw, ListDraws, SettleDraw, SettledDraw,
    UpdateDrawStatus,
};
use crate::framework::StoreError;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::PrimitiveDateTime;
use time::macros::{date, datetime};

const CREATED_AT: PrimitiveDateTime = datetime!(2099-01-01 0:00);

pub(crate) fn draw_fixture(id: i64, status: DrawStatus) -> Draw {
    Draw {
        id,
        draw_date: date!(2099 - 01 - 01),
        prize_amount: Decimal::from(1000),
        status,
        numbers: None,
        complementary_number: None,
        created_at: CREATED_AT,
    }
}

pub(crate) fn bet_fixture(id: i64, user_id: i64, numbers: Vec<i32>, complementary: i32) -> Bet {
    Bet {
        id,
        draw_id: 1,
        user_id,
        numbers,
        complementary_number: complementary,
        is_winner: false,
        prize_won: Decimal::ZERO,
        created_at: CREATED_AT,
    }
}

#[derive(Clone, Default)]
struct Tables {
    draws: Vec<Draw>,
    bets: Vec<Bet>,
}

/// Store with the same constraint and conditional-write behavior as the
/// Postgres queries.
///
/// Every query yields to the scheduler first, so concurrent callers in a
/// test interleave the way they would against a real database.
#[derive(Default)]
pub(crate) struct MemoryStore {
    tables: Mutex<Tables>,
    calls: AtomicUsize,
    fail_at: Mutex<Option<FailPoint>>,
}

/// Steps that can be made to fail with a non-constraint database error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailPoint {
    InsertDraw,
    InsertBet,
    /// The winner update inside draw settlement.
    AwardWinners,
}

impl MemoryStore {
    /// Number of queries processed so far.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn bets(&self) -> Vec<Bet> {
        self.tables.lock().unwrap().bets.clone()
    }

    pub(crate) fn draws(&self) -> Vec<Draw> {
        self.tables.lock().unwrap().draws.clone()
    }

    /// Make the next run of `point` fail as if the connection dropped.
    pub(crate) fn fail_once(&self, point: FailPoint) {
        *self.fail_at.lock().unwrap() = Some(point);
    }

    fn check(&self, point: FailPoint) -> Result<(), StoreError> {
        let mut fail_at = self.fail_at.lock().unwrap();
        if *fail_at == Some(point) {
            *fail_at = None;
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}

fn unique_violation(constraint: &str) -> StoreError {
    StoreError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

impl Processor<InsertDraw> for MemoryStore {
    type Output = Draw;
    type Error = StoreError;
    async fn process(&self, insert: InsertDraw) -> Result<Draw, StoreError> {
        self.enter().await;
        self.check(FailPoint::InsertDraw)?;
        let mut tables = self.tables.lock().unwrap();
        if tables
            .draws
            .iter()
            .any(|draw| draw.draw_date == insert.draw_date)
        {
            return Err(unique_violation("lottery_draws_draw_date_key"));
        }
        let draw = Draw {
            id: tables.draws.len() as i64 + 1,
            draw_date: insert.draw_date,
            prize_amount: insert.prize_amount,
            status: DrawStatus::Open,
            numbers: None,
            complementary_number: None,
            created_at: CREATED_AT,
        };
        tables.draws.push(draw.clone());
        Ok(draw)
    }
}

impl Processor<GetDrawById> for MemoryStore {
    type Output = Option<Draw>;
    type Error = StoreError;
    async fn process(&self, query: GetDrawById) -> Result<Option<Draw>, StoreError> {
        self.enter().await;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .draws
            .iter()
            .find(|draw| draw.id == query.draw_id)
            .cloned())
    }
}

impl Processor<ListDraws> for MemoryStore {
    type Output = Vec<DrawSummary>;
    type Error = StoreError;
    async fn process(&self, _query: ListDraws) -> Result<Vec<DrawSummary>, StoreError> {
        self.enter().await;
        let tables = self.tables.lock().unwrap();
        let mut summaries: Vec<DrawSummary> = tables
            .draws
            .iter()
            .map(|draw| {
                let bets = tables.bets.iter().filter(|bet| bet.draw_id == draw.id);
                DrawSummary {
                    draw: draw.clone(),
                    total_bettors: bets.clone().count() as i64,
                    winners: bets.filter(|bet| bet.is_winner).count() as i64,
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.draw.draw_date.cmp(&a.draw.draw_date));
        Ok(summaries)
    }
}

impl Processor<UpdateDrawStatus> for MemoryStore {
    type Output = Option<Draw>;
    type Error = StoreError;
    async fn process(&self, update: UpdateDrawStatus) -> Result<Option<Draw>, StoreError> {
        self.enter().await;
        let mut tables = self.tables.lock().unwrap();
        Ok(tables
            .draws
            .iter_mut()
            .find(|draw| draw.id == update.draw_id && draw.status == update.from)
            .map(|draw| {
                draw.status = update.to;
                draw.clone()
            }))
    }
}

impl Processor<SettleDraw> for MemoryStore {
    type Output = Option<SettledDraw>;
    type Error = StoreError;
    async fn process(&self, cmd: SettleDraw) -> Result<Option<SettledDraw>, StoreError> {
        self.enter().await;
        let mut tables = self.tables.lock().unwrap();
        // Work on a copy and only keep it on success, like a transaction.
        let mut staged = tables.clone();

        let Some(draw) = staged
            .draws
            .iter_mut()
            .find(|draw| {
                draw.id == cmd.draw_id && draw.status == DrawStatus::Closed && draw.numbers.is_none()
            })
            .map(|draw| {
                draw.status = DrawStatus::Completed;
                draw.numbers = Some(cmd.result.numbers().to_vec());
                draw.complementary_number = Some(cmd.result.complementary());
                draw.clone()
            })
        else {
            return Ok(None);
        };

        let bets: Vec<Bet> = staged
            .bets
            .iter()
            .filter(|bet| bet.draw_id == cmd.draw_id)
            .cloned()
            .collect();
        let settlement = settle(&cmd.result, draw.prize_amount, &bets);

        self.check(FailPoint::AwardWinners)?;
        for bet in staged
            .bets
            .iter_mut()
            .filter(|bet| settlement.winner_ids.contains(&bet.id) && !bet.is_winner)
        {
            bet.is_winner = true;
            bet.prize_won = settlement.prize_per_winner;
        }

        *tables = staged;
        Ok(Some(SettledDraw { draw, settlement }))
    }
}

impl Processor<InsertBet> for MemoryStore {
    type Output = Option<Bet>;
    type Error = StoreError;
    async fn process(&self, insert: InsertBet) -> Result<Option<Bet>, StoreError> {
        self.enter().await;
        self.check(FailPoint::InsertBet)?;
        let mut tables = self.tables.lock().unwrap();
        let open = tables
            .draws
            .iter()
            .any(|draw| draw.id == insert.draw_id && draw.status == DrawStatus::Open);
        if !open {
            return Ok(None);
        }
        if tables
            .bets
            .iter()
            .any(|bet| bet.draw_id == insert.draw_id && bet.user_id == insert.user_id)
        {
            return Err(unique_violation("bets_draw_id_user_id_key"));
        }
        let bet = Bet {
            id: tables.bets.len() as i64 + 1,
            draw_id: insert.draw_id,
            user_id: insert.user_id,
            numbers: insert.numbers,
            complementary_number: insert.complementary_number,
            is_winner: false,
            prize_won: Decimal::ZERO,
            created_at: CREATED_AT,
        };
        tables.bets.push(bet.clone());
        Ok(Some(bet))
    }
}

impl Processor<ListUserBets> for MemoryStore {
    type Output = Vec<UserBet>;
    type Error = StoreError;
    async fn process(&self, query: ListUserBets) -> Result<Vec<UserBet>, StoreError> {
        self.enter().await;
        let tables = self.tables.lock().unwrap();
        let mut bets: Vec<UserBet> = tables
            .bets
            .iter()
            .filter(|bet| bet.user_id == query.user_id)
            .filter_map(|bet| {
                let draw = tables.draws.iter().find(|draw| draw.id == bet.draw_id)?;
                Some(UserBet {
                    bet: bet.clone(),
                    draw_date: draw.draw_date,
                    prize_amount: draw.prize_amount,
                    status: draw.status,
                    winning_numbers: draw.numbers.clone(),
                    winning_complementary: draw.complementary_number,
                })
            })
            .collect();
        bets.sort_by(|a, b| b.draw_date.cmp(&a.draw_date));
        Ok(bets)
    }
}
