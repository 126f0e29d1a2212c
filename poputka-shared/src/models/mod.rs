pub mod action;
pub mod booking;
pub mod notification;
pub mod ride;
pub mod user;

pub use action::{ActionRef, ParseActionError};
pub use booking::{Booking, BookingStatus, NewBooking, Resolution, Settlement, TransitionError};
pub use notification::NotificationIntent;
pub use ride::{NewRide, Ride, Role, StartTime, UnknownVariant};
pub use user::User;
