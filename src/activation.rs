//! Per-user activation flags.
//!
//! A flag marks a document as part of a user's default search scope. Rows
//! are created lazily on first set; a missing row reads as inactive. Only
//! the owner may flag a private document, anyone may flag a public one.

use sqlx::SqlitePool;

use crate::error::{CoreError, Result};

pub struct ActivationRegistry {
    pool: SqlitePool,
}

impl ActivationRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Set the user's flag for a document.
    ///
    /// Unknown documents and private documents owned by someone else both
    /// report `NotFound`.
    pub async fn set_activation(&self, user_id: i64, document_id: i64, active: bool) -> Result<()> {
        self.check_visible(user_id, document_id).await?;

        sqlx::query(
            r#"
            INSERT INTO activations (user_id, document_id, is_active) VALUES (?, ?, ?)
            ON CONFLICT(user_id, document_id) DO UPDATE SET is_active = excluded.is_active
            "#,
        )
        .bind(user_id)
        .bind(document_id)
        .bind(active)
        .execute(&self.pool)
        .await?;

        tracing::debug!(user_id, document_id, active, "activation updated");
        Ok(())
    }

    /// Flip the user's flag and return the new state. A missing flag flips
    /// to active.
    pub async fn toggle_activation(&self, user_id: i64, document_id: i64) -> Result<bool> {
        self.check_visible(user_id, document_id).await?;

        let active: bool = sqlx::query_scalar(
            r#"
            INSERT INTO activations (user_id, document_id, is_active) VALUES (?, ?, 1)
            ON CONFLICT(user_id, document_id) DO UPDATE SET is_active = 1 - is_active
            RETURNING is_active
            "#,
        )
        .bind(user_id)
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(user_id, document_id, active, "activation toggled");
        Ok(active)
    }

    pub async fn is_active(&self, user_id: i64, document_id: i64) -> Result<bool> {
        let active: Option<bool> = sqlx::query_scalar(
            "SELECT is_active FROM activations WHERE user_id = ? AND document_id = ?",
        )
        .bind(user_id)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(active.unwrap_or(false))
    }

    async fn check_visible(&self, user_id: i64, document_id: i64) -> Result<()> {
        let visible: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM documents WHERE id = ? AND (owner_id = ? OR is_public = 1)",
        )
        .bind(document_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        if visible {
            Ok(())
        } else {
            Err(CoreError::NotFound(format!(
                "document {} for user {}",
                document_id, user_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> ActivationRegistry {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        // 1: private to user 1, 2: public from user 2, 3: private to user 2
        for (owner, public) in [(1, false), (2, true), (2, false)] {
            sqlx::query(
                "INSERT INTO documents (owner_id, filename, filepath, is_public, uploaded_at) VALUES (?, 'f.txt', '', ?, 0)",
            )
            .bind(owner)
            .bind(public)
            .execute(&pool)
            .await
            .unwrap();
        }
        ActivationRegistry::new(pool)
    }

    #[tokio::test]
    async fn test_missing_flag_reads_inactive() {
        let reg = setup().await;
        assert!(!reg.is_active(1, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_is_idempotent_upsert() {
        let reg = setup().await;
        reg.set_activation(1, 1, true).await.unwrap();
        reg.set_activation(1, 1, true).await.unwrap();
        assert!(reg.is_active(1, 1).await.unwrap());

        reg.set_activation(1, 1, false).await.unwrap();
        assert!(!reg.is_active(1, 1).await.unwrap());

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activations")
            .fetch_one(&reg.pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_toggle_flips() {
        let reg = setup().await;
        assert!(reg.toggle_activation(5, 2).await.unwrap());
        assert!(!reg.toggle_activation(5, 2).await.unwrap());
        assert!(reg.toggle_activation(5, 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_foreign_private_document_is_not_found() {
        let reg = setup().await;
        let err = reg.set_activation(1, 3, true).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
        assert!(matches!(
            reg.toggle_activation(1, 3).await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            reg.set_activation(1, 42, true).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_any_user_may_flag_public_document() {
        let reg = setup().await;
        reg.set_activation(9, 2, true).await.unwrap();
        assert!(reg.is_active(9, 2).await.unwrap());
    }
}
