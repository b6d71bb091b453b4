// src/auth.rs
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{is_unique_violation, AppError};
use crate::models::{Role, User};

const USER_COLUMNS: &str = "id, name, email, password_hash, role, created_at";

/// Hashes on the blocking pool so Argon2 work never stalls the executor.
pub async fn hash_password(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|_| AppError::PasswordHash)
    })
    .await
    .map_err(|_| AppError::PasswordHash)?
}

pub async fn verify_password(hash: String, password: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash).map_err(|_| AppError::PasswordHash)?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|_| AppError::PasswordHash)?
}

pub async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn find_user_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn count_users(pool: &PgPool, role: Option<Role>) -> Result<i64, AppError> {
    let count = match role {
        Some(role) => {
            sqlx::query_scalar("SELECT count(*) FROM users WHERE role = $1")
                .bind(role)
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT count(*) FROM users")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count)
}

pub async fn list_users(pool: &PgPool) -> Result<Vec<User>, AppError> {
    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(users)
}

/// Registers a new user. The role is decided inside the INSERT itself: the row
/// becomes admin iff no admin row exists at that instant. A single statement,
/// so two concurrent first signups cannot both observe an empty admin set and
/// race past a separate count.
pub async fn signup(
    pool: &PgPool,
    name: &str,
    email: &str,
    password: &str,
) -> Result<User, AppError> {
    let (name, email) = (name.trim(), email.trim());
    if name.is_empty() || email.is_empty() || password.is_empty() {
        return Err(AppError::Validation("all fields required".into()));
    }

    let password_hash = hash_password(password.to_string()).await?;

    let inserted = sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (id, name, email, password_hash, role) \
         VALUES ($1, $2, $3, $4, \
             CASE WHEN EXISTS (SELECT 1 FROM users WHERE role = 'admin') \
                  THEN 'user' ELSE 'admin' END) \
         RETURNING {USER_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(email)
    .bind(&password_hash)
    .fetch_one(pool)
    .await;

    match inserted {
        Ok(user) => {
            tracing::info!(email = %user.email, role = %user.role, "new user created");
            Ok(user)
        }
        Err(err) if is_unique_violation(&err) => {
            Err(AppError::Conflict("email already registered".into()))
        }
        Err(err) => Err(err.into()),
    }
}

/// Verifies credentials. Unknown email and wrong password are reported with
/// the same message so the endpoint cannot be used to enumerate accounts.
pub async fn login(pool: &PgPool, email: &str, password: &str) -> Result<User, AppError> {
    let user = find_user_by_email(pool, email)
        .await?
        .ok_or_else(|| AppError::Auth("invalid credentials".into()))?;

    let ok = verify_password(user.password_hash.clone(), password.to_string()).await?;
    if !ok {
        return Err(AppError::Auth("invalid credentials".into()));
    }
    Ok(user)
}

/// Promotes the earliest-created user to admin, but only while no admin
/// exists. Check and promotion are one conditional UPDATE, so two concurrent
/// calls cannot both succeed.
pub async fn bootstrap_admin(pool: &PgPool) -> Result<User, AppError> {
    let promoted = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET role = 'admin' \
         WHERE id = (SELECT id FROM users ORDER BY created_at ASC, id ASC LIMIT 1) \
           AND NOT EXISTS (SELECT 1 FROM users WHERE role = 'admin') \
         RETURNING {USER_COLUMNS}"
    ))
    .fetch_optional(pool)
    .await?;

    match promoted {
        Some(user) => {
            tracing::info!(email = %user.email, "bootstrapped admin");
            Ok(user)
        }
        None => {
            if count_users(pool, None).await? == 0 {
                Err(AppError::NotFound("no users found, signup first".into()))
            } else {
                Err(AppError::Conflict("admin already exists".into()))
            }
        }
    }
}

/// Refuses a demotion that would leave zero admins. `admin_count` must come
/// from rows the caller has locked.
fn guard_last_admin(
    target_role: Role,
    new_role: Role,
    admin_count: usize,
) -> Result<(), AppError> {
    if target_role == Role::Admin && new_role == Role::User && admin_count <= 1 {
        return Err(AppError::InvariantViolation(
            "cannot remove last admin".into(),
        ));
    }
    Ok(())
}

/// Changes a user's role. The acting user's privilege is re-validated against
/// the persisted row, not the session snapshot. A demotion first locks every
/// admin row, so concurrent demotions serialize and the second one recounts
/// after the first commits; the admin count cannot reach zero.
pub async fn change_role(
    pool: &PgPool,
    acting_user_id: Uuid,
    target_user_id: Uuid,
    new_role: Role,
) -> Result<User, AppError> {
    let acting = find_user_by_id(pool, acting_user_id)
        .await?
        .ok_or_else(|| AppError::Auth("login required".into()))?;
    match acting.role {
        Role::Admin => {}
        Role::User => return Err(AppError::Auth("only admin can change roles".into())),
    }

    let mut tx = pool.begin().await?;

    // Lock the admin set before touching the target row. Demotions always
    // take these locks in the same order, so they cannot deadlock with each
    // other, and FOR UPDATE re-reads the latest committed role of each row.
    let mut admin_count = 0;
    if new_role == Role::User {
        let admins: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM users WHERE role = 'admin' ORDER BY id FOR UPDATE",
        )
        .fetch_all(&mut *tx)
        .await?;
        admin_count = admins.len();
    }

    let target = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
    ))
    .bind(target_user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("user not found".into()))?;

    guard_last_admin(target.role, new_role, admin_count)?;

    let updated = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
    ))
    .bind(target_user_id)
    .bind(new_role)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(email = %updated.email, role = %updated.role, "role changed");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn password_hash_verifies_and_rejects() {
        let hash = hash_password("hunter2".into()).await.unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(hash.clone(), "hunter2".into()).await.unwrap());
        assert!(!verify_password(hash, "hunter3".into()).await.unwrap());
    }

    #[tokio::test]
    async fn hashes_are_salted() {
        let a = hash_password("same".into()).await.unwrap();
        let b = hash_password("same".into()).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn garbage_hash_is_an_error_not_a_mismatch() {
        let err = verify_password("not-a-phc-string".into(), "pw".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PasswordHash));
    }

    #[test]
    fn demoting_the_sole_admin_is_refused() {
        let err = guard_last_admin(Role::Admin, Role::User, 1).unwrap_err();
        assert!(matches!(err, AppError::InvariantViolation(_)));
        // An empty count can only mean stale state; still refuse.
        assert!(guard_last_admin(Role::Admin, Role::User, 0).is_err());
    }

    #[test]
    fn other_role_changes_pass_the_guard() {
        assert!(guard_last_admin(Role::Admin, Role::User, 2).is_ok());
        assert!(guard_last_admin(Role::User, Role::Admin, 0).is_ok());
        assert!(guard_last_admin(Role::User, Role::User, 1).is_ok());
        assert!(guard_last_admin(Role::Admin, Role::Admin, 1).is_ok());
    }
}
