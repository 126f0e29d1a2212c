pub mod models;
pub mod pii;

pub use models::{
    ActionRef, Booking, BookingStatus, NewBooking, NewRide, NotificationIntent, Resolution, Ride,
    Role, Settlement, StartTime, TransitionError, User,
};
