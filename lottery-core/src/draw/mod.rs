//! Draw lifecycle, winner matching and the engine that ties them to the
//! store and the publisher.

pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod matching;

pub use engine::{DrawEngine, LotteryStore};
pub use error::{DrawError, ErrorKind};
pub use lifecycle::{DrawResult, Selection};
pub use matching::Settlement;
