use std::{str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use thiserror::Error;
use uuid::Uuid;

use domain_watch_core::{
    DomainStatus, InvalidDomainStatus, NotificationOutcome, NotificationRecord, TrackedDomain,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// Pragmas are set on the connect options so that every pooled connection
    /// enforces foreign keys (needed for the notification log cascade).
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for interacting with tracked domains.
    pub fn tracked_domains(&self) -> TrackedDomainRepository {
        TrackedDomainRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for interacting with the notification log.
    pub fn notification_log(&self) -> NotificationLogRepository {
        NotificationLogRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the `tracked_domains` table.
#[derive(Clone)]
pub struct TrackedDomainRepository {
    pool: SqlitePool,
}

const TRACKED_DOMAIN_COLUMNS: &str =
    "id, name, status, active, last_checked_at, created_at, updated_at";

impl TrackedDomainRepository {
    /// Lists active domains, least recently checked first.
    ///
    /// Never-checked domains sort ahead of everything else so that a pass cut
    /// short by its time budget resumes with the stalest entries next time.
    pub async fn list_active_by_staleness(&self) -> Result<Vec<TrackedDomain>, TrackedDomainError> {
        let rows = sqlx::query_as::<_, TrackedDomainRow>(&format!(
            "SELECT {TRACKED_DOMAIN_COLUMNS} FROM tracked_domains \
             WHERE active = 1 \
             ORDER BY last_checked_at IS NOT NULL, last_checked_at ASC, name ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TrackedDomainRow::into_domain).collect()
    }

    /// Lists every tracked domain ordered by name.
    pub async fn list_all(&self) -> Result<Vec<TrackedDomain>, TrackedDomainError> {
        let rows = sqlx::query_as::<_, TrackedDomainRow>(&format!(
            "SELECT {TRACKED_DOMAIN_COLUMNS} FROM tracked_domains ORDER BY name ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TrackedDomainRow::into_domain).collect()
    }

    /// Loads a single domain by its normalized name.
    pub async fn fetch_by_name(
        &self,
        name: &str,
    ) -> Result<Option<TrackedDomain>, TrackedDomainError> {
        let row = sqlx::query_as::<_, TrackedDomainRow>(&format!(
            "SELECT {TRACKED_DOMAIN_COLUMNS} FROM tracked_domains WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TrackedDomainRow::into_domain).transpose()
    }

    /// Inserts a new domain in status `unknown`.
    pub async fn insert(
        &self,
        record: NewTrackedDomain<'_>,
    ) -> Result<TrackedDomain, TrackedDomainError> {
        let domain = TrackedDomain {
            id: Uuid::new_v4().to_string(),
            name: record.name.to_string(),
            status: DomainStatus::Unknown,
            active: record.active,
            last_checked_at: None,
            created_at: record.created_at,
            updated_at: record.created_at,
        };

        sqlx::query(
            "INSERT INTO tracked_domains \
             (id, name, status, active, last_checked_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(&domain.id)
        .bind(&domain.name)
        .bind(domain.status.as_str())
        .bind(domain.active)
        .bind(to_rfc3339(domain.created_at))
        .bind(to_rfc3339(domain.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err)
                if db_err.code().as_deref() == Some(SQLITE_CONSTRAINT_UNIQUE) =>
            {
                TrackedDomainError::Duplicate
            }
            other => TrackedDomainError::Database(other),
        })?;

        Ok(domain)
    }

    /// Writes the outcome of a successful check: status, `last_checked_at`
    /// and `updated_at` change together in one statement.
    pub async fn update_status(
        &self,
        id: &str,
        status: DomainStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), TrackedDomainError> {
        let timestamp = to_rfc3339(checked_at);
        let result = sqlx::query(
            "UPDATE tracked_domains \
             SET status = ?, last_checked_at = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(&timestamp)
        .bind(&timestamp)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TrackedDomainError::NotFound);
        }
        Ok(())
    }

    /// Toggles whether reconciliation considers the domain.
    pub async fn set_active(
        &self,
        id: &str,
        active: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<(), TrackedDomainError> {
        let result =
            sqlx::query("UPDATE tracked_domains SET active = ?, updated_at = ? WHERE id = ?")
                .bind(active)
                .bind(to_rfc3339(updated_at))
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(TrackedDomainError::NotFound);
        }
        Ok(())
    }

    /// Deletes a domain by name; its notification log goes with it.
    pub async fn delete_by_name(&self, name: &str) -> Result<(), TrackedDomainError> {
        let result = sqlx::query("DELETE FROM tracked_domains WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TrackedDomainError::NotFound);
        }
        Ok(())
    }
}

/// Data required to start tracking a domain.
pub struct NewTrackedDomain<'a> {
    /// Already normalized hostname.
    pub name: &'a str,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct TrackedDomainRow {
    id: String,
    name: String,
    status: String,
    active: bool,
    last_checked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TrackedDomainRow {
    fn into_domain(self) -> Result<TrackedDomain, TrackedDomainError> {
        Ok(TrackedDomain {
            status: self.status.parse()?,
            id: self.id,
            name: self.name,
            active: self.active,
            last_checked_at: self.last_checked_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Errors raised by [`TrackedDomainRepository`].
#[derive(Debug, Error)]
pub enum TrackedDomainError {
    #[error("a domain with the same name is already tracked")]
    Duplicate,
    #[error("domain not found")]
    NotFound,
    #[error(transparent)]
    InvalidStatus(#[from] InvalidDomainStatus),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for the append-only `notification_log` table.
#[derive(Clone)]
pub struct NotificationLogRepository {
    pool: SqlitePool,
}

impl NotificationLogRepository {
    /// Appends one notification attempt.
    pub async fn append(
        &self,
        record: NewNotificationRecord<'_>,
    ) -> Result<NotificationRecord, NotificationLogError> {
        let entry = NotificationRecord {
            id: Uuid::new_v4().to_string(),
            domain_id: record.domain_id.to_string(),
            sent_at: record.sent_at,
            outcome: record.outcome,
            error_detail: record.error_detail.map(str::to_string),
            provider_message_id: record.provider_message_id.map(str::to_string),
        };

        sqlx::query(
            "INSERT INTO notification_log \
             (id, domain_id, sent_at, outcome, error_detail, provider_message_id) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.domain_id)
        .bind(to_rfc3339(entry.sent_at))
        .bind(entry.outcome.as_str())
        .bind(&entry.error_detail)
        .bind(&entry.provider_message_id)
        .execute(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err)
                if db_err.code().as_deref() == Some(SQLITE_CONSTRAINT_FOREIGNKEY) =>
            {
                NotificationLogError::MissingDomain
            }
            other => NotificationLogError::Database(other),
        })?;

        Ok(entry)
    }

    /// Lists the log for one domain, newest first.
    pub async fn list_for_domain(
        &self,
        domain_id: &str,
    ) -> Result<Vec<NotificationRecord>, NotificationLogError> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            "SELECT id, domain_id, sent_at, outcome, error_detail, provider_message_id \
             FROM notification_log WHERE domain_id = ? ORDER BY sent_at DESC, id ASC",
        )
        .bind(domain_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NotificationRow::into_domain).collect()
    }
}

/// Payload for [`NotificationLogRepository::append`].
pub struct NewNotificationRecord<'a> {
    pub domain_id: &'a str,
    pub sent_at: DateTime<Utc>,
    pub outcome: NotificationOutcome,
    pub error_detail: Option<&'a str>,
    pub provider_message_id: Option<&'a str>,
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: String,
    domain_id: String,
    sent_at: DateTime<Utc>,
    outcome: String,
    error_detail: Option<String>,
    provider_message_id: Option<String>,
}

impl NotificationRow {
    fn into_domain(self) -> Result<NotificationRecord, NotificationLogError> {
        Ok(NotificationRecord {
            outcome: self
                .outcome
                .parse()
                .map_err(NotificationLogError::InvalidOutcome)?,
            id: self.id,
            domain_id: self.domain_id,
            sent_at: self.sent_at,
            error_detail: self.error_detail,
            provider_message_id: self.provider_message_id,
        })
    }
}

/// Errors raised by [`NotificationLogRepository`].
#[derive(Debug, Error)]
pub enum NotificationLogError {
    #[error("notification references a domain that does not exist")]
    MissingDomain,
    #[error("{0}")]
    InvalidOutcome(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    async fn setup_db() -> Database {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("connect");
        db.run_migrations().await.expect("migrations");
        db
    }

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .expect("fixed time")
            .with_timezone(&Utc)
    }

    async fn track(db: &Database, name: &str) -> TrackedDomain {
        db.tracked_domains()
            .insert(NewTrackedDomain {
                name,
                active: true,
                created_at: fixed_now(),
            })
            .await
            .expect("insert domain")
    }

    #[tokio::test]
    async fn migrations_apply() {
        let db = setup_db().await;

        let tables: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('tracked_domains', 'notification_log')",
        )
        .fetch_one(db.pool())
        .await
        .expect("fetch tables");
        assert_eq!(tables.0, 2);
    }

    #[tokio::test]
    async fn insert_starts_unknown_and_rejects_duplicates() {
        let db = setup_db().await;
        let domain = track(&db, "example.com").await;
        assert_eq!(domain.status, DomainStatus::Unknown);
        assert!(domain.last_checked_at.is_none());

        let fetched = db
            .tracked_domains()
            .fetch_by_name("example.com")
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(fetched, domain);

        let err = db
            .tracked_domains()
            .insert(NewTrackedDomain {
                name: "example.com",
                active: true,
                created_at: fixed_now(),
            })
            .await
            .expect_err("duplicate should fail");
        assert!(matches!(err, TrackedDomainError::Duplicate));
    }

    #[tokio::test]
    async fn active_domains_sort_by_staleness_with_unchecked_first() {
        let db = setup_db().await;
        let repo = db.tracked_domains();
        let stale = track(&db, "stale.com").await;
        let fresh = track(&db, "fresh.com").await;
        let _never = track(&db, "never.com").await;
        let inactive = track(&db, "inactive.com").await;

        repo.update_status(&fresh.id, DomainStatus::Registered, fixed_now())
            .await
            .expect("update fresh");
        repo.update_status(
            &stale.id,
            DomainStatus::Registered,
            fixed_now() - ChronoDuration::hours(1),
        )
        .await
        .expect("update stale");
        repo.set_active(&inactive.id, false, fixed_now())
            .await
            .expect("deactivate");

        let names: Vec<String> = repo
            .list_active_by_staleness()
            .await
            .expect("list")
            .into_iter()
            .map(|domain| domain.name)
            .collect();
        assert_eq!(names, vec!["never.com", "stale.com", "fresh.com"]);
    }

    #[tokio::test]
    async fn update_status_writes_status_and_timestamps_together() {
        let db = setup_db().await;
        let domain = track(&db, "example.com").await;
        let checked_at = fixed_now() + ChronoDuration::minutes(5);

        db.tracked_domains()
            .update_status(&domain.id, DomainStatus::Available, checked_at)
            .await
            .expect("update");

        let updated = db
            .tracked_domains()
            .fetch_by_name("example.com")
            .await
            .expect("fetch")
            .expect("present");
        assert_eq!(updated.status, DomainStatus::Available);
        assert_eq!(updated.last_checked_at, Some(checked_at));
        assert_eq!(updated.updated_at, checked_at);
        assert_eq!(updated.created_at, fixed_now());

        let err = db
            .tracked_domains()
            .update_status("missing", DomainStatus::Registered, checked_at)
            .await
            .expect_err("missing id");
        assert!(matches!(err, TrackedDomainError::NotFound));
    }

    #[tokio::test]
    async fn notification_log_appends_and_cascades_on_delete() {
        let db = setup_db().await;
        let domain = track(&db, "example.com").await;
        let log = db.notification_log();

        log.append(NewNotificationRecord {
            domain_id: &domain.id,
            sent_at: fixed_now(),
            outcome: NotificationOutcome::Failed,
            error_detail: Some("smtp down"),
            provider_message_id: None,
        })
        .await
        .expect("append failed attempt");
        log.append(NewNotificationRecord {
            domain_id: &domain.id,
            sent_at: fixed_now() + ChronoDuration::minutes(1),
            outcome: NotificationOutcome::Sent,
            error_detail: None,
            provider_message_id: Some("msg-1"),
        })
        .await
        .expect("append sent attempt");

        let entries = log.list_for_domain(&domain.id).await.expect("list");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].outcome, NotificationOutcome::Sent);
        assert_eq!(entries[0].provider_message_id.as_deref(), Some("msg-1"));
        assert_eq!(entries[1].error_detail.as_deref(), Some("smtp down"));

        db.tracked_domains()
            .delete_by_name("example.com")
            .await
            .expect("delete");

        let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notification_log")
            .fetch_one(db.pool())
            .await
            .expect("count");
        assert_eq!(remaining.0, 0);
    }

    #[tokio::test]
    async fn append_rejects_unknown_domain() {
        let db = setup_db().await;
        let err = db
            .notification_log()
            .append(NewNotificationRecord {
                domain_id: "missing",
                sent_at: fixed_now(),
                outcome: NotificationOutcome::Sent,
                error_detail: None,
                provider_message_id: None,
            })
            .await
            .expect_err("fk violation");
        assert!(matches!(err, NotificationLogError::MissingDomain));
    }
}
