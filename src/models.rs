// src/models.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Closed role enumeration. Stored as TEXT, matched exhaustively everywhere a
/// privilege decision is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown role: {0}")]
pub struct ParseRoleError(String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for Role {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <&str as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <&str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for Role {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<'q, sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Role {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<'r, sqlx::Postgres>>::decode(value)?;
        Ok(s.parse()?)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// What the session cookie carries. The role here is a cached snapshot and can
/// drift from the persisted row until the next login; privileged operations
/// re-check the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PollRow {
    pub id: Uuid,
    pub question: String,
    pub created_by: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PollOption {
    #[serde(skip_serializing)]
    pub poll_id: Uuid,
    pub idx: i32,
    pub text: String,
    pub votes: i32,
}

/// A poll with its ordered options, as handed to clients. Option identity is
/// its position.
#[derive(Debug, Clone, Serialize)]
pub struct Poll {
    pub id: Uuid,
    pub question: String,
    pub created_by: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub options: Vec<PollOption>,
}

impl Poll {
    pub fn from_parts(row: PollRow, options: Vec<PollOption>) -> Self {
        Self {
            id: row.id,
            question: row.question,
            created_by: row.created_by,
            expires_at: row.expires_at,
            created_at: row.created_at,
            options,
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Vote {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub user_id: Uuid,
    pub option_idx: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PollResults {
    pub id: Uuid,
    pub question: String,
    pub options: Vec<PollOption>,
    pub total_votes: i64,
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub redirect: Option<String>,
}

/// `new_role` stays a plain string so an unknown value fails role parsing in
/// the handler (a 400) instead of dying in body deserialization.
#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub user_id: Uuid,
    pub new_role: String,
}

/// Option lists arrive either as a JSON array or as one newline-separated
/// blob (the textarea form of the create page).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OptionsInput {
    List(Vec<String>),
    Text(String),
}

#[derive(Debug, Deserialize)]
pub struct CreatePollRequest {
    pub question: String,
    pub options: OptionsInput,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub option: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_text() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!(Role::Admin.as_str(), "admin");
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let parsed: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(parsed, Role::User);
    }

    #[test]
    fn session_user_omits_password_hash() {
        let user = User {
            id: Uuid::new_v4(),
            name: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            role: Role::Admin,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2id"));
        let snapshot = SessionUser::from(&user);
        assert_eq!(snapshot.role, Role::Admin);
        assert_eq!(snapshot.email, user.email);
    }

    #[test]
    fn change_role_request_tolerates_unknown_role_strings() {
        // Deserialization must not reject the body; the handler turns the bad
        // role into a validation error.
        let req: ChangeRoleRequest = serde_json::from_str(&format!(
            r#"{{"user_id": "{}", "new_role": "superuser"}}"#,
            Uuid::new_v4()
        ))
        .unwrap();
        assert!(req.new_role.parse::<Role>().is_err());
    }

    #[test]
    fn options_input_accepts_both_shapes() {
        let list: OptionsInput = serde_json::from_str(r#"["X", "Y"]"#).unwrap();
        assert!(matches!(list, OptionsInput::List(v) if v.len() == 2));
        let text: OptionsInput = serde_json::from_str(r#""X\nY""#).unwrap();
        assert!(matches!(text, OptionsInput::Text(_)));
    }
}
