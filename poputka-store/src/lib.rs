pub mod app_config;
pub mod database;
pub mod memory;
pub mod redis_repo;
pub mod ride_repo;

pub use database::DbClient;
pub use memory::{InMemoryRideRepository, InMemorySessionStore};
pub use redis_repo::RedisSessionStore;
pub use ride_repo::PostgresRideRepository;
