//! `PostgreSQL` Storage Engine
//!
//! Each operation is a single statement, which gives per-entity atomicity
//! without a process-wide lock. Nested values (profile, metadata,
//! addresses) are stored as JSONB, tags as `TEXT[]`.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roster_common::{Address, Profile, Role, User, UserStatus};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::{error, info};

use super::{with_add_defaults, ListFilter, StorageError, StorageResult, UserStorage};

/// Log a failed query with its name and key fields, passing the error through.
macro_rules! db_error {
    ($query:expr, $($field:tt)*) => {
        |e| {
            error!(query = $query, $($field)*, error = %e, "Database query failed");
            e
        }
    };
}

const COLUMNS: &str = "id, username, role, status, email, phone, profile, tags, metadata, \
                       addresses, create_date, last_login";

/// Create `PostgreSQL` connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations completed");
    Ok(())
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    username: String,
    role: i32,
    status: Option<i32>,
    email: Option<String>,
    phone: Option<String>,
    profile: Option<Json<Profile>>,
    tags: Vec<String>,
    metadata: Json<HashMap<String, String>>,
    addresses: Json<Vec<Address>>,
    create_date: DateTime<Utc>,
    last_login: Option<DateTime<Utc>>,
}

impl TryFrom<UserRow> for User {
    type Error = StorageError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let id = u32::try_from(row.id)
            .map_err(|_| StorageError::Corrupt(format!("user id {} out of range", row.id)))?;
        let role = Role::from_code(row.role)
            .ok_or_else(|| StorageError::Corrupt(format!("user {id}: role code {}", row.role)))?;
        let status = row
            .status
            .map(|code| {
                UserStatus::from_code(code)
                    .ok_or_else(|| StorageError::Corrupt(format!("user {id}: status code {code}")))
            })
            .transpose()?;

        Ok(Self {
            id,
            username: row.username,
            role,
            status,
            email: row.email,
            phone: row.phone,
            profile: row.profile.map(|Json(profile)| profile),
            tags: row.tags,
            metadata: row.metadata.0,
            addresses: row.addresses.0,
            create_date: Some(row.create_date),
            last_login: row.last_login,
        })
    }
}

/// Report a unique-key violation on `username` as a taken name.
fn username_conflict(e: sqlx::Error, username: &str) -> StorageError {
    if e
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
    {
        return StorageError::UsernameTaken(username.to_string());
    }
    StorageError::Database(e)
}

fn into_users(rows: Vec<UserRow>) -> StorageResult<Vec<User>> {
    rows.into_iter().map(User::try_from).collect()
}

/// Storage engine backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and bring the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UserStorage for PostgresStorage {
    async fn add(&self, user: User) -> StorageResult<()> {
        let user = with_add_defaults(user);

        let inserted: Option<i64> = sqlx::query_scalar(
            r"
            INSERT INTO users (
                id, username, role, status, email, phone, profile,
                tags, metadata, addresses, create_date, last_login
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            RETURNING id
            ",
        )
        .bind(i64::from(user.id))
        .bind(&user.username)
        .bind(user.role.code())
        .bind(user.status.map(|s| s.code()))
        .bind(&user.email)
        .bind(&user.phone)
        .bind(user.profile.as_ref().map(Json))
        .bind(&user.tags)
        .bind(Json(&user.metadata))
        .bind(Json(&user.addresses))
        .bind(user.create_date)
        .bind(user.last_login)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error!("add_user", user_id = user.id))
        .map_err(|e| username_conflict(e, &user.username))?;

        inserted.map(drop).ok_or(StorageError::AlreadyExists(user.id))
    }

    async fn get(&self, id: u32) -> StorageResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {COLUMNS} FROM users WHERE id = $1"))
            .bind(i64::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error!("get_user", user_id = id))?
            .ok_or(StorageError::NotFound(id))?;

        row.try_into()
    }

    async fn update(&self, user: User) -> StorageResult<()> {
        let result = sqlx::query(
            r"
            UPDATE users SET
                username = $2,
                role = $3,
                status = $4,
                email = $5,
                phone = $6,
                profile = $7,
                tags = $8,
                metadata = $9,
                addresses = $10,
                create_date = COALESCE($11, create_date),
                last_login = $12
            WHERE id = $1
            ",
        )
        .bind(i64::from(user.id))
        .bind(&user.username)
        .bind(user.role.code())
        .bind(user.status.map(|s| s.code()))
        .bind(&user.email)
        .bind(&user.phone)
        .bind(user.profile.as_ref().map(Json))
        .bind(&user.tags)
        .bind(Json(&user.metadata))
        .bind(Json(&user.addresses))
        .bind(user.create_date)
        .bind(user.last_login)
        .execute(&self.pool)
        .await
        .map_err(db_error!("update_user", user_id = user.id))
        .map_err(|e| username_conflict(e, &user.username))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(user.id));
        }
        Ok(())
    }

    async fn delete(&self, id: u32) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(i64::from(id))
            .execute(&self.pool)
            .await
            .map_err(db_error!("delete_user", user_id = id))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id));
        }
        Ok(())
    }

    async fn list(&self, filter: &ListFilter) -> StorageResult<Vec<User>> {
        let cursor = filter.cursor()?;

        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM users WHERE TRUE"));
        if let Some(after) = cursor {
            query.push(" AND id > ").push_bind(i64::from(after));
        }
        if let Some(since) = filter.created_since {
            query.push(" AND create_date >= ").push_bind(since);
        }
        if let Some(before) = filter.older_than {
            query.push(" AND create_date < ").push_bind(before);
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.code());
        }
        query.push(" ORDER BY id");
        if filter.page_size > 0 {
            query.push(" LIMIT ").push_bind(i64::from(filter.page_size));
        }

        let rows = query
            .build_query_as::<UserRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error!("list_users", page_size = filter.page_size))?;

        into_users(rows)
    }

    async fn list_by_role(&self, role: Role) -> StorageResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {COLUMNS} FROM users WHERE role = $1 ORDER BY id"
        ))
        .bind(role.code())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error!("list_users_by_role", role = %role))?;

        into_users(rows)
    }

    async fn exists(&self, id: u32) -> StorageResult<bool> {
        let exists = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(i64::from(id))
            .fetch_one(&self.pool)
            .await
            .map_err(db_error!("user_exists", user_id = id))?;

        Ok(exists)
    }

    async fn count(&self) -> StorageResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error!("count_users", table = "users"))?;

        usize::try_from(count).map_err(|_| StorageError::Corrupt(format!("user count {count}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page_token_after;

    fn sample(id: u32, role: Role) -> User {
        User {
            email: Some(format!("user{id}@example.com")),
            tags: vec!["a".into(), "b".into()],
            metadata: HashMap::from([("team".to_string(), "core".to_string())]),
            addresses: vec![Address {
                city: "Lisbon".into(),
                is_primary: true,
                ..Address::default()
            }],
            profile: Some(Profile {
                display_name: format!("User {id}"),
                preferences: HashMap::from([("theme".to_string(), 1)]),
                ..Profile::default()
            }),
            ..User::new(id, format!("user{id}"), role)
        }
    }

    #[sqlx::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_add_and_get(pool: PgPool) {
        let store = PostgresStorage::new(pool);
        store.add(sample(1, Role::Admin)).await.unwrap();

        let stored = store.get(1).await.unwrap();
        assert_eq!(stored.username, "user1");
        assert_eq!(stored.status, Some(UserStatus::Active));
        assert_eq!(stored.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(stored.profile.unwrap().preferences["theme"], 1);
        assert_eq!(stored.addresses[0].city, "Lisbon");

        assert!(matches!(
            store.add(sample(1, Role::Admin)).await,
            Err(StorageError::AlreadyExists(1))
        ));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[sqlx::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_update_delete_missing(pool: PgPool) {
        let store = PostgresStorage::new(pool);
        assert!(matches!(
            store.update(sample(5, Role::Member)).await,
            Err(StorageError::NotFound(5))
        ));
        assert!(matches!(store.delete(5).await, Err(StorageError::NotFound(5))));
        assert!(!store.exists(5).await.unwrap());
    }

    #[sqlx::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_username_is_unique(pool: PgPool) {
        let store = PostgresStorage::new(pool);
        store.add(sample(1, Role::Admin)).await.unwrap();
        store.add(sample(2, Role::Member)).await.unwrap();

        let clash = User {
            username: "user1".into(),
            ..sample(3, Role::Member)
        };
        assert!(matches!(
            store.add(clash).await,
            Err(StorageError::UsernameTaken(ref name)) if name == "user1"
        ));

        let renamed = User {
            username: "user1".into(),
            ..sample(2, Role::Member)
        };
        assert!(matches!(
            store.update(renamed).await,
            Err(StorageError::UsernameTaken(_))
        ));
        assert_eq!(store.get(2).await.unwrap().username, "user2");
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[sqlx::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_list_pages(pool: PgPool) {
        let store = PostgresStorage::new(pool);
        for id in 1..=4 {
            store.add(sample(id, Role::Member)).await.unwrap();
        }

        let page = store
            .list(&ListFilter {
                page_size: 2,
                page_token: Some(page_token_after(1)),
                ..ListFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.iter().map(|u| u.id).collect::<Vec<_>>(), [2, 3]);
        assert_eq!(store.list_by_role(Role::Member).await.unwrap().len(), 4);
    }
}
