//! SQLite-журнал действий администраторов (admin_logs).

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// Кто и откуда выполнил действие.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub admin_id: i64,
    pub origin: String,
}

impl Actor {
    pub fn telegram(admin_id: i64, chat_id: i64) -> Self {
        Self {
            admin_id,
            origin: format!("telegram:{}", chat_id),
        }
    }
}

#[cfg(test)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub admin_id: i64,
    pub action: String,
    pub description: String,
    pub origin: String,
    pub created_at: i64,
}

pub struct Db {
    pool: SqlitePool,
}

fn current_unix_timestamp() -> Result<i64, anyhow::Error> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .map_err(|err| anyhow::anyhow!("Системное время меньше UNIX_EPOCH: {}", err))
}

impl Db {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("Не удалось создать директорию для БД: {}", e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts)
            .await
            .map_err(|e| anyhow::anyhow!("Не удалось подключиться к SQLite: {}", e))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// База в памяти: одно соединение, иначе каждое получит свою пустую БД.
    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, anyhow::Error> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS admin_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                admin_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                description TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_admin_logs_created ON admin_logs(created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Миграция admin_logs: {}", e))?;

        self.ensure_column_exists("admin_logs", "origin", "TEXT NOT NULL DEFAULT 'unknown'")
            .await?;
        Ok(())
    }

    async fn ensure_column_exists(
        &self,
        table: &str,
        column: &str,
        sql_type: &str,
    ) -> Result<(), anyhow::Error> {
        let count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = '{}'",
            table, column
        ))
        .fetch_one(&self.pool)
        .await?;
        if count == 0 {
            sqlx::query(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table, column, sql_type
            ))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn insert_admin_log(
        &self,
        actor: &Actor,
        action: &str,
        description: &str,
    ) -> Result<(), anyhow::Error> {
        let now = current_unix_timestamp()?;
        sqlx::query(
            "INSERT INTO admin_logs (admin_id, action, description, origin, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(actor.admin_id)
        .bind(action)
        .bind(description)
        .bind(&actor.origin)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Пишет запись в журнал. Сбой записи не должен ломать само действие.
    pub async fn record(&self, actor: &Actor, action: &str, description: &str) {
        if let Err(error) = self.insert_admin_log(actor, action, description).await {
            tracing::warn!(
                admin_id = actor.admin_id,
                action = action,
                error = %error,
                "Не удалось записать действие в admin_logs"
            );
        }
    }

    #[cfg(test)]
    pub async fn recent_actions(&self, limit: i64) -> Result<Vec<AuditEntry>, anyhow::Error> {
        let rows = sqlx::query_as::<_, AuditEntry>(
            "SELECT id, admin_id, action, description, origin, created_at
             FROM admin_logs
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_are_listed_newest_first() {
        let db = Db::open_in_memory().await.unwrap();
        let actor = Actor::telegram(10, 99);
        db.record(&actor, "bot_start", "Started bot process").await;
        db.record(&actor, "bot_stop", "Stopped bot process").await;

        let rows = db.recent_actions(10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, "bot_stop");
        assert_eq!(rows[1].action, "bot_start");
        assert_eq!(rows[0].origin, "telegram:99");
        assert_eq!(rows[0].admin_id, 10);
        assert!(rows[0].created_at > 0);
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("admin.db");
        {
            let db = Db::open(&path).await.unwrap();
            db.record(&Actor::telegram(1, 1), "logs_cleared", "Cleared bot logs")
                .await;
        }
        let db = Db::open(&path).await.unwrap();
        let rows = db.recent_actions(5).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].description, "Cleared bot logs");
    }
}
