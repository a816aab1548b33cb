use crate::models::{NewUser, User};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

pub type RepoResult<T> = Result<T, sqlx::Error>;

/// Repository Trait
///
/// Abstract contract for the user store. Handlers and the auth gate only see this
/// trait, so tests swap in an in-memory implementation.
///
/// **Send + Sync + async_trait** are required to make the trait object
/// (`Arc<dyn Repository>`) shareable across Axum's task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Looks up a user by primary key. Used by the auth gate on every protected request.
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>>;

    /// Looks up a user by (case-insensitive) email. Used at login.
    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;

    /// Inserts a user. A duplicate email surfaces as a unique-violation database error.
    async fn create_user(&self, user: NewUser) -> RepoResult<User>;

    /// All users, newest first.
    async fn list_users(&self) -> RepoResult<Vec<User>>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// Whether `e` is a unique-constraint violation (duplicate email).
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"SELECT id, name, email, password_hash, role, created_at
               FROM users
               WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .inspect_err(|e| tracing::error!("get_user error: {:?}", e))
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"SELECT id, name, email, password_hash, role, created_at
               FROM users
               WHERE lower(email) = lower($1)"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .inspect_err(|e| tracing::error!("find_user_by_email error: {:?}", e))
    }

    /// create_user
    ///
    /// The id is generated here so the row never depends on database-side defaults.
    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        sqlx::query_as::<_, User>(
            r#"INSERT INTO users (id, name, email, password_hash, role)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING id, name, email, password_hash, role, created_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.name)
        .bind(user.email.to_lowercase())
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .fetch_one(&self.pool)
        .await
        .inspect_err(|e| {
            if !is_unique_violation(e) {
                tracing::error!("create_user error: {:?}", e);
            }
        })
    }

    async fn list_users(&self) -> RepoResult<Vec<User>> {
        sqlx::query_as::<_, User>(
            r#"SELECT id, name, email, password_hash, role, created_at
               FROM users
               ORDER BY created_at DESC"#,
        )
        .fetch_all(&self.pool)
        .await
        .inspect_err(|e| tracing::error!("list_users error: {:?}", e))
    }
}
