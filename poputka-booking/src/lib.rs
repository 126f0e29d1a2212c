pub mod service;

pub use service::{ActionOutcome, ActionResult, BookingError, BookingService};
