//! Plain-text bodies for outbound notifications. Markup and keyboards are the
//! transport's business.

use chrono::NaiveDate;
use poputka_shared::{Ride, User};

pub const RIDE_SAVED: &str = "✅ Поездка сохранена!";
pub const RIDE_NOT_SAVED: &str = "🤷🏻‍♂️ Поездка не сохранена! Я не понял детали маршрута. \
                                  Попробуйте еще раз, указав Откуда, Куда и Дату.";
pub const SEATS_EXHAUSTED: &str = "Места закончились!";
pub const TEMPORARILY_UNAVAILABLE: &str = "Извините, сервис временно недоступен.";

pub fn fmt_date(date: NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

/// Sent to a driver who just posted, once per compatible passenger
pub fn passenger_on_the_way(passenger_ride: &Ride, passenger: &User) -> String {
    format!(
        "🔔 Найден попутчик (по пути)!\n📍 {} ➡️ {}\n📅 {} | {}\n👥 Нужно мест: {}\n👤 @{}",
        passenger_ride.origin,
        passenger_ride.destination,
        fmt_date(passenger_ride.ride_date),
        passenger_ride.start_time,
        passenger_ride.initial_seats,
        passenger.display_handle(),
    )
}

/// Sent to every compatible driver when a passenger posts
pub fn passenger_for_you(passenger_ride: &Ride, passenger: &User) -> String {
    format!(
        "🔔 Для вас найден пассажир!\n📍 {} ➡️ {}\n📅 {} | {}\n👥 Нужно мест: {}\n👤 Контакт: @{}",
        passenger_ride.origin,
        passenger_ride.destination,
        fmt_date(passenger_ride.ride_date),
        passenger_ride.start_time,
        passenger_ride.initial_seats,
        passenger.display_handle(),
    )
}

/// Sent to the passenger when a booking is opened for them
pub fn driver_ready(driver_ride: &Ride, driver: &User) -> String {
    format!(
        "🔔 Водитель готов вас подвезти!\n📍 {} ➡️ {}\n📅 Дата: {}\n🕒 Время: {}\n👤 Контакт: @{}",
        driver_ride.origin,
        driver_ride.destination,
        fmt_date(driver_ride.ride_date),
        driver_ride.start_time,
        driver.display_handle(),
    )
}

pub fn booking_confirmed(seats: i32) -> String {
    format!(
        "🎉 Пассажир подтвердил поездку! Занято мест: {}. Приятного пути!",
        seats
    )
}

pub fn booking_rejected(needed: i32, available: i32) -> String {
    format!(
        "❌ К сожалению, мест недостаточно: нужно {}, свободно {}.",
        needed, available
    )
}
