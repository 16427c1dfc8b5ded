use crate::{datetime_from_db_text, datetime_to_db_text, is_unique_violation, DbError, DbPool};
use chrono::{DateTime, Utc};
use parley_models::user::{User, UserRole, UserSummary};
use sqlx::Row;

const USER_COLUMNS: &str = "id, name, email, password_hash, role, created_at";

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for UserRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let role_raw: String = row.try_get("role")?;
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            role: UserRole::parse(&role_raw),
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

impl UserRow {
    pub fn to_model(&self) -> User {
        User {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            created_at: self.created_at,
        }
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: Some(self.name.clone()),
            email: Some(self.email.clone()),
        }
    }
}

/// Create a user and atomically promote to admin if this is the first user.
/// Uses a transaction so two simultaneous registrations cannot both see an
/// empty table. A duplicate email yields `DbError::Conflict`.
pub async fn create_user(
    pool: &DbPool,
    id: i64,
    name: &str,
    email: &str,
    password_hash: &str,
) -> Result<UserRow, DbError> {
    let mut tx = pool.begin().await?;

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(&mut *tx)
        .await?;
    let role = if count == 0 {
        UserRole::Admin
    } else {
        UserRole::User
    };

    let inserted = sqlx::query_as::<_, UserRow>(&format!(
        "INSERT INTO users (id, name, email, password_hash, role, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {USER_COLUMNS}"
    ))
    .bind(id)
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(role.as_str())
    .bind(datetime_to_db_text(Utc::now()))
    .fetch_one(&mut *tx)
    .await;

    let row = match inserted {
        Ok(row) => row,
        Err(err) if is_unique_violation(&err) => {
            return Err(DbError::Conflict("email already registered".into()))
        }
        Err(err) => return Err(DbError::Sqlx(err)),
    };

    tx.commit().await?;
    Ok(row)
}

pub async fn get_user_by_id(pool: &DbPool, id: i64) -> Result<Option<UserRow>, DbError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_user_by_email(pool: &DbPool, email: &str) -> Result<Option<UserRow>, DbError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Every user except `user_id`, ordered by name.
pub async fn list_users_except(pool: &DbPool, user_id: i64) -> Result<Vec<UserRow>, DbError> {
    let rows = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id != $1 ORDER BY name ASC, id ASC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;

    #[tokio::test]
    async fn first_user_becomes_admin() {
        let pool = test_pool().await;
        let first = create_user(&pool, 1, "Ada", "ada@example.com", "h").await.unwrap();
        let second = create_user(&pool, 2, "Bob", "bob@example.com", "h").await.unwrap();
        assert_eq!(first.role, UserRole::Admin);
        assert_eq!(second.role, UserRole::User);
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict() {
        let pool = test_pool().await;
        create_user(&pool, 1, "Ada", "ada@example.com", "h").await.unwrap();
        let err = create_user(&pool, 2, "Ada 2", "ada@example.com", "h")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn lookup_and_listing() {
        let pool = test_pool().await;
        create_user(&pool, 1, "Zed", "zed@example.com", "h").await.unwrap();
        create_user(&pool, 2, "Amy", "amy@example.com", "h").await.unwrap();
        create_user(&pool, 3, "Kim", "kim@example.com", "h").await.unwrap();

        let by_email = get_user_by_email(&pool, "kim@example.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, 3);
        assert!(get_user_by_id(&pool, 99).await.unwrap().is_none());

        let others: Vec<String> = list_users_except(&pool, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.name)
            .collect();
        assert_eq!(others, vec!["Amy".to_string(), "Kim".to_string()]);
    }
}
