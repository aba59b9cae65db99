use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::schema::users;

/// Registered account row.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub id: &'a str,
    pub username: &'a str,
    pub password_hash: &'a str,
    pub created_at: DateTime<Utc>,
}

impl NewUser<'_> {
    pub fn to_user(&self) -> User {
        User {
            id: self.id.to_string(),
            username: self.username.to_string(),
            password_hash: self.password_hash.to_string(),
            created_at: self.created_at,
        }
    }
}
