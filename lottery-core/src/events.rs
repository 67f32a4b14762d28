//! Notifications emitted after successful draw and bet operations.
//!
//! Payloads are the records themselves, serialized as JSON. The routing key
//! identifies the kind of event, so the payload carries no tag of its own.

use crate::entities::bet::Bet;
use crate::entities::draw::Draw;
use serde::Serialize;

/// A draw whose results have been generated, with its winner count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedDraw {
    #[serde(flatten)]
    pub draw: Draw,
    pub winners_count: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum LotteryEvent<'a> {
    DrawCreated(&'a Draw),
    DrawStatusChanged(&'a Draw),
    DrawCompleted(&'a CompletedDraw),
    BetPlaced(&'a Bet),
}

impl LotteryEvent<'_> {
    pub fn routing_key(&self) -> &'static str {
        match self {
            LotteryEvent::DrawCreated(_) => "draw.created",
            LotteryEvent::DrawStatusChanged(_) => "draw.status_changed",
            LotteryEvent::DrawCompleted(_) => "draw.completed",
            LotteryEvent::BetPlaced(_) => "bet.placed",
        }
    }
}
