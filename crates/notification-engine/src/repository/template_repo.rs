//! 通知模板仓储（PostgreSQL）

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::TemplateRepositoryTrait;
use crate::error::Result;
use crate::models::{Channel, NotificationTemplate, NotificationType, TemplateFilter};

const COLUMNS: &str = r#"
    id, organization_id, name, notification_type, channel, subject, title, content,
    variables, is_active, is_default, created_by, updated_by, created_at, updated_at
"#;

/// 模板仓储
pub struct PgTemplateRepository {
    pool: PgPool,
}

impl PgTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepositoryTrait for PgTemplateRepository {
    async fn insert(&self, t: &NotificationTemplate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_templates (
                id, organization_id, name, notification_type, channel, subject, title, content,
                variables, is_active, is_default, created_by, updated_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(t.id)
        .bind(&t.organization_id)
        .bind(&t.name)
        .bind(t.notification_type)
        .bind(t.channel)
        .bind(&t.subject)
        .bind(&t.title)
        .bind(&t.content)
        .bind(&t.variables)
        .bind(t.is_active)
        .bind(t.is_default)
        .bind(&t.created_by)
        .bind(&t.updated_by)
        .bind(t.created_at)
        .bind(t.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<NotificationTemplate>> {
        let sql = format!("SELECT {COLUMNS} FROM notification_templates WHERE id = $1");
        let template = sqlx::query_as::<_, NotificationTemplate>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(template)
    }

    async fn find_by_name(
        &self,
        organization_id: &str,
        name: &str,
    ) -> Result<Option<NotificationTemplate>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM notification_templates WHERE organization_id = $1 AND name = $2"
        );
        let template = sqlx::query_as::<_, NotificationTemplate>(&sql)
            .bind(organization_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(template)
    }

    async fn list(
        &self,
        organization_id: &str,
        filter: &TemplateFilter,
    ) -> Result<Vec<NotificationTemplate>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM notification_templates \
             WHERE organization_id = $1 \
               AND ($2::varchar IS NULL OR notification_type = $2) \
               AND ($3::varchar IS NULL OR channel = $3) \
               AND ($4::boolean IS NULL OR is_active = $4) \
             ORDER BY notification_type, channel, name"
        );
        let templates = sqlx::query_as::<_, NotificationTemplate>(&sql)
            .bind(organization_id)
            .bind(filter.notification_type)
            .bind(filter.channel)
            .bind(filter.is_active)
            .fetch_all(&self.pool)
            .await?;

        Ok(templates)
    }

    async fn update(&self, t: &NotificationTemplate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_templates
            SET name = $2, subject = $3, title = $4, content = $5, variables = $6,
                is_active = $7, is_default = $8, updated_by = $9, updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(t.id)
        .bind(&t.name)
        .bind(&t.subject)
        .bind(&t.title)
        .bind(&t.content)
        .bind(&t.variables)
        .bind(t.is_active)
        .bind(t.is_default)
        .bind(&t.updated_by)
        .bind(t.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notification_templates WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_default(
        &self,
        organization_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<Option<NotificationTemplate>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM notification_templates \
             WHERE organization_id = $1 AND notification_type = $2 AND channel = $3 \
               AND is_default = TRUE AND is_active = TRUE \
             LIMIT 1"
        );
        let template = sqlx::query_as::<_, NotificationTemplate>(&sql)
            .bind(organization_id)
            .bind(notification_type)
            .bind(channel)
            .fetch_optional(&self.pool)
            .await?;

        Ok(template)
    }

    async fn clear_default(
        &self,
        organization_id: &str,
        notification_type: NotificationType,
        channel: Channel,
        except: Uuid,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notification_templates
            SET is_default = FALSE, updated_at = NOW()
            WHERE organization_id = $1 AND notification_type = $2 AND channel = $3
              AND is_default = TRUE AND id <> $4
            "#,
        )
        .bind(organization_id)
        .bind(notification_type)
        .bind(channel)
        .bind(except)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
