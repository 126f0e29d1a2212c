pub mod engine;

pub use engine::{MatchError, MatchingEngine, PostedRide};
