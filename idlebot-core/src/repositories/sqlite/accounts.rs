//! src/repositories/sqlite/accounts.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

use crate::Error;
use crate::repositories::AccountRepository;
use idlebot_common::models::account::{AccountRecord, GameEntry, Settings};

#[derive(Clone)]
pub struct SqliteAccountRepository {
    pool: Pool<Sqlite>,
}

impl SqliteAccountRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

fn from_epoch(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn record_from_row(r: &SqliteRow) -> Result<AccountRecord, Error> {
    let game_list: Vec<GameEntry> = serde_json::from_str(&r.try_get::<String, _>("game_list")?)?;
    let settings: Settings = serde_json::from_str(&r.try_get::<String, _>("settings")?)?;
    Ok(AccountRecord {
        username: r.try_get("username")?,
        secret: r.try_get("secret")?,
        game_list,
        settings,
        sentry: r.try_get("sentry")?,
        created_at: from_epoch(r.try_get::<i64, _>("created_at")?),
        updated_at: from_epoch(r.try_get::<i64, _>("updated_at")?),
    })
}

#[async_trait]
impl AccountRepository for SqliteAccountRepository {
    async fn create(&self, record: &AccountRecord) -> Result<(), Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts
                (username, secret, game_list, settings, sentry, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
            .bind(&record.username)
            .bind(&record.secret)
            .bind(serde_json::to_string(&record.game_list)?)
            .bind(serde_json::to_string(&record.settings)?)
            .bind(&record.sentry)
            .bind(record.created_at.timestamp())
            .bind(record.updated_at.timestamp())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::AlreadyExists(format!("account '{}'", record.username)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, username: &str) -> Result<Option<AccountRecord>, Error> {
        let row = sqlx::query(
            r#"
            SELECT username, secret, game_list, settings, sentry, created_at, updated_at
            FROM accounts
            WHERE username = ?
            "#,
        )
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<AccountRecord>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT username, secret, game_list, settings, sentry, created_at, updated_at
            FROM accounts
            ORDER BY username
            "#,
        )
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn update_settings(
        &self,
        username: &str,
        settings: &Settings,
        game_list: &[GameEntry],
    ) -> Result<(), Error> {
        let done = sqlx::query(
            r#"
            UPDATE accounts
            SET settings = ?, game_list = ?, updated_at = ?
            WHERE username = ?
            "#,
        )
            .bind(serde_json::to_string(settings)?)
            .bind(serde_json::to_string(game_list)?)
            .bind(Utc::now().timestamp())
            .bind(username)
            .execute(&self.pool)
            .await?;

        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("account '{}'", username)));
        }
        Ok(())
    }

    async fn update_sentry(&self, username: &str, sentry: &str) -> Result<(), Error> {
        let done = sqlx::query("UPDATE accounts SET sentry = ?, updated_at = ? WHERE username = ?")
            .bind(sentry)
            .bind(Utc::now().timestamp())
            .bind(username)
            .execute(&self.pool)
            .await?;

        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("account '{}'", username)));
        }
        Ok(())
    }

    async fn delete(&self, username: &str) -> Result<(), Error> {
        sqlx::query("DELETE FROM accounts WHERE username = ?")
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
