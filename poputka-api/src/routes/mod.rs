pub mod actions;
pub mod notifications;
pub mod rides;
pub mod users;
