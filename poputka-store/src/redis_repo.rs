use async_trait::async_trait;
use poputka_core::session::{SessionError, SessionStore};
use poputka_shared::Role;
use redis::AsyncCommands;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct RedisSessionStore {
    client: redis::Client,
    ttl_seconds: u64,
}

impl RedisSessionStore {
    pub fn new(connection_string: &str, ttl_seconds: u64) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            ttl_seconds,
        })
    }

    fn role_key(conversation: i64) -> String {
        format!("session:{}:role", conversation)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, SessionError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SessionError(Box::new(e)))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn role(&self, conversation: i64) -> Result<Option<Role>, SessionError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(Self::role_key(conversation))
            .await
            .map_err(|e| SessionError(Box::new(e)))?;

        // A garbled value is treated as missing so the role gets re-seeded
        Ok(raw.and_then(|r| match r.parse::<Role>() {
            Ok(role) => Some(role),
            Err(e) => {
                warn!("Ignoring session value for {}: {}", conversation, e);
                None
            }
        }))
    }

    async fn set_role(&self, conversation: i64, role: Role) -> Result<(), SessionError> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(Self::role_key(conversation), role.as_str(), self.ttl_seconds)
            .await
            .map_err(|e| SessionError(Box::new(e)))?;
        debug!("Session {} role set to {}", conversation, role);
        Ok(())
    }

    async fn clear(&self, conversation: i64) -> Result<(), SessionError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(Self::role_key(conversation))
            .await
            .map_err(|e| SessionError(Box::new(e)))?;
        Ok(())
    }
}
