//! Account storage backing registration and login.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::RunQueryDsl;

use crate::db::pool::DbPool;
use crate::db::schema::users;
use crate::db::StoreError;
use crate::models::user::{NewUser, User};

pub const USERNAME_TAKEN: &str = "Username already registered";

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new account. Fails with [`StoreError::Conflict`] when the
    /// username already exists.
    async fn create(&self, user: NewUser<'_>) -> Result<User, StoreError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL implementation
// ---------------------------------------------------------------------------

pub struct PgUserStore {
    pool: DbPool,
}

impl PgUserStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: NewUser<'_>) -> Result<User, StoreError> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(users::table)
            .values(&user)
            .returning(User::as_returning())
            .get_result(&mut conn)
            .await
            .map_err(|e| match e {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    StoreError::Conflict(USERNAME_TAKEN)
                }
                other => StoreError::from(other),
            })
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let mut conn = self.pool.get().await?;
        let user = users::table
            .filter(users::username.eq(username))
            .select(User::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(user)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (no DATABASE_URL / tests)
// ---------------------------------------------------------------------------

pub struct MemoryUserStore {
    users: DashMap<String, User>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: NewUser<'_>) -> Result<User, StoreError> {
        match self.users.entry(user.username.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(USERNAME_TAKEN)),
            Entry::Vacant(slot) => Ok(slot.insert(user.to_user()).clone()),
        }
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(username).map(|u| u.value().clone()))
    }
}
