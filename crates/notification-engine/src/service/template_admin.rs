//! 通知模板管理服务
//!
//! 模板的增删改查与启停。写入前校验占位符与声明变量一致；
//! 同一 (organization, type, channel) 只保留一个默认模板，默认模板不可删除。

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::error::{NotificationError, Result};
use crate::models::{
    Channel, CreateTemplateRequest, NotificationTemplate, NotificationType, TemplateFilter,
    UpdateTemplateRequest,
};
use crate::repository::{PgTemplateRepository, TemplateRepositoryTrait};
use crate::template::validate_variables;

/// 模板管理服务
pub struct TemplateService<TR = PgTemplateRepository>
where
    TR: TemplateRepositoryTrait,
{
    repo: Arc<TR>,
}

impl<TR> TemplateService<TR>
where
    TR: TemplateRepositoryTrait,
{
    pub fn new(repo: Arc<TR>) -> Self {
        Self { repo }
    }

    /// 创建模板
    #[instrument(skip(self, request), fields(organization_id = %organization_id, name = %request.name))]
    pub async fn create(
        &self,
        organization_id: &str,
        request: CreateTemplateRequest,
        actor_id: &str,
    ) -> Result<NotificationTemplate> {
        request.validate()?;
        self.ensure_name_available(organization_id, &request.name, None)
            .await?;

        let now = Utc::now();
        let template = NotificationTemplate {
            id: Uuid::now_v7(),
            organization_id: organization_id.to_string(),
            name: request.name,
            notification_type: request.notification_type,
            channel: request.channel,
            subject: request.subject,
            title: request.title,
            content: request.content,
            variables: request.variables,
            is_active: request.is_active.unwrap_or(true),
            is_default: request.is_default,
            created_by: Some(actor_id.to_string()),
            updated_by: Some(actor_id.to_string()),
            created_at: now,
            updated_at: now,
        };
        validate_variables(&template.sources(), &template.variables)?;

        if template.is_default {
            self.take_default_slot(&template).await?;
        }
        self.repo.insert(&template).await?;

        info!(template_id = %template.id, is_default = template.is_default, "通知模板已创建");
        Ok(template)
    }

    /// 更新模板
    ///
    /// 触及 title/content/subject/variables 时重新校验变量
    #[instrument(skip(self, request), fields(organization_id = %organization_id, template_id = %id))]
    pub async fn update(
        &self,
        organization_id: &str,
        id: Uuid,
        request: UpdateTemplateRequest,
        actor_id: &str,
    ) -> Result<NotificationTemplate> {
        request.validate()?;
        let mut template = self.get(organization_id, id).await?;
        let revalidate = request.touches_body();

        if let Some(name) = request.name {
            if name != template.name {
                self.ensure_name_available(organization_id, &name, Some(id))
                    .await?;
                template.name = name;
            }
        }
        if let Some(subject) = request.subject {
            template.subject = Some(subject);
        }
        if let Some(title) = request.title {
            template.title = title;
        }
        if let Some(content) = request.content {
            template.content = content;
        }
        if let Some(variables) = request.variables {
            template.variables = variables;
        }

        if revalidate {
            validate_variables(&template.sources(), &template.variables)?;
        }

        match request.is_default {
            Some(true) if !template.is_default => {
                self.take_default_slot(&template).await?;
                template.is_default = true;
            }
            Some(false) => template.is_default = false,
            _ => {}
        }

        template.updated_by = Some(actor_id.to_string());
        template.updated_at = Utc::now();
        self.repo.update(&template).await?;

        info!("通知模板已更新");
        Ok(template)
    }

    /// 删除模板（默认模板不可删除）
    pub async fn delete(&self, organization_id: &str, id: Uuid) -> Result<()> {
        let template = self.get(organization_id, id).await?;
        if template.is_default {
            return Err(NotificationError::Validation(format!(
                "默认模板不可删除: {}",
                template.name
            )));
        }

        if !self.repo.delete(id).await? {
            return Err(NotificationError::not_found("NotificationTemplate", id));
        }
        info!(template_id = %id, "通知模板已删除");
        Ok(())
    }

    pub async fn activate(
        &self,
        organization_id: &str,
        id: Uuid,
        actor_id: &str,
    ) -> Result<NotificationTemplate> {
        self.set_active(organization_id, id, true, actor_id).await
    }

    /// 停用模板；停用的默认模板不再参与默认选择
    pub async fn deactivate(
        &self,
        organization_id: &str,
        id: Uuid,
        actor_id: &str,
    ) -> Result<NotificationTemplate> {
        self.set_active(organization_id, id, false, actor_id).await
    }

    /// 按 ID 获取（其他组织的模板按不存在处理）
    pub async fn get(&self, organization_id: &str, id: Uuid) -> Result<NotificationTemplate> {
        self.repo
            .find_by_id(id)
            .await?
            .filter(|t| t.organization_id == organization_id)
            .ok_or_else(|| NotificationError::not_found("NotificationTemplate", id))
    }

    pub async fn get_by_organization(
        &self,
        organization_id: &str,
        filter: &TemplateFilter,
    ) -> Result<Vec<NotificationTemplate>> {
        self.repo.list(organization_id, filter).await
    }

    /// 获取 (type, channel) 的启用中默认模板
    pub async fn get_default(
        &self,
        organization_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<NotificationTemplate> {
        self.repo
            .find_default(organization_id, notification_type, channel)
            .await?
            .ok_or_else(|| {
                NotificationError::not_found(
                    "NotificationTemplate",
                    format!("default/{}/{}", notification_type, channel),
                )
            })
    }

    async fn set_active(
        &self,
        organization_id: &str,
        id: Uuid,
        active: bool,
        actor_id: &str,
    ) -> Result<NotificationTemplate> {
        let mut template = self.get(organization_id, id).await?;
        if template.is_active == active {
            return Ok(template);
        }

        template.is_active = active;
        template.updated_by = Some(actor_id.to_string());
        template.updated_at = Utc::now();
        self.repo.update(&template).await?;

        info!(template_id = %id, is_active = active, "通知模板启用状态已变更");
        Ok(template)
    }

    async fn ensure_name_available(
        &self,
        organization_id: &str,
        name: &str,
        current: Option<Uuid>,
    ) -> Result<()> {
        match self.repo.find_by_name(organization_id, name).await? {
            Some(existing) if Some(existing.id) != current => Err(NotificationError::Validation(
                format!("模板名称已存在: {}", name),
            )),
            _ => Ok(()),
        }
    }

    async fn take_default_slot(&self, template: &NotificationTemplate) -> Result<()> {
        let cleared = self
            .repo
            .clear_default(
                &template.organization_id,
                template.notification_type,
                template.channel,
                template.id,
            )
            .await?;
        if cleared > 0 {
            info!(
                template_id = %template.id,
                cleared,
                "已取消同一槽位下其他模板的默认标记"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryTemplateRepository, MockTemplateRepositoryTrait};

    fn create_request(name: &str) -> CreateTemplateRequest {
        CreateTemplateRequest {
            name: name.to_string(),
            notification_type: NotificationType::CycleActivated,
            channel: Channel::Email,
            subject: Some("[{{name}}] 已开始".to_string()),
            title: "Cycle {{name}}".to_string(),
            content: "{{name}} starts {{start}}".to_string(),
            variables: vec!["name".to_string(), "start".to_string()],
            is_default: false,
            is_active: None,
        }
    }

    fn service() -> TemplateService<InMemoryTemplateRepository> {
        TemplateService::new(Arc::new(InMemoryTemplateRepository::new()))
    }

    #[tokio::test]
    async fn test_create_rejects_undeclared_placeholder() {
        let mut request = create_request("cycle-activated");
        request.variables = vec!["name".to_string()];

        let err = service()
            .create("org-1", request, "hr-1")
            .await
            .unwrap_err();
        match err {
            NotificationError::TemplateVariable { undeclared } => {
                assert_eq!(undeclared, vec!["start".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_name_is_unique_per_organization() {
        let svc = service();
        svc.create("org-1", create_request("dup"), "hr-1")
            .await
            .unwrap();

        let err = svc
            .create("org-1", create_request("dup"), "hr-1")
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::Validation(_)));

        assert!(svc.create("org-2", create_request("dup"), "hr-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_single_default_per_slot_and_default_not_deletable() {
        let svc = service();
        let mut first = create_request("first");
        first.is_default = true;
        let first = svc.create("org-1", first, "hr-1").await.unwrap();

        let mut second = create_request("second");
        second.is_default = true;
        let second = svc.create("org-1", second, "hr-1").await.unwrap();

        let default = svc
            .get_default("org-1", NotificationType::CycleActivated, Channel::Email)
            .await
            .unwrap();
        assert_eq!(default.id, second.id);
        assert!(!svc.get("org-1", first.id).await.unwrap().is_default);

        let err = svc.delete("org-1", second.id).await.unwrap_err();
        assert!(matches!(err, NotificationError::Validation(_)));
        svc.delete("org-1", first.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_revalidates_when_body_touched() {
        let svc = service();
        let template = svc
            .create("org-1", create_request("t"), "hr-1")
            .await
            .unwrap();

        let update = UpdateTemplateRequest {
            content: Some("{{name}} ends {{end}}".to_string()),
            ..Default::default()
        };
        let err = svc
            .update("org-1", template.id, update, "hr-2")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "TEMPLATE_VARIABLE_MISMATCH");

        let update = UpdateTemplateRequest {
            content: Some("{{name}} ends {{end}}".to_string()),
            variables: Some(vec!["name".to_string(), "end".to_string()]),
            ..Default::default()
        };
        let updated = svc.update("org-1", template.id, update, "hr-2").await.unwrap();
        assert_eq!(updated.updated_by.as_deref(), Some("hr-2"));
    }

    #[tokio::test]
    async fn test_deactivate_hides_from_default_lookup() {
        let svc = service();
        let mut request = create_request("d");
        request.is_default = true;
        let template = svc.create("org-1", request, "hr-1").await.unwrap();

        let deactivated = svc.deactivate("org-1", template.id, "hr-1").await.unwrap();
        assert!(!deactivated.is_active);
        assert!(
            svc.get_default("org-1", NotificationType::CycleActivated, Channel::Email)
                .await
                .is_err()
        );

        assert!(svc.activate("org-1", template.id, "hr-1").await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_get_other_organization_is_not_found() {
        let mut repo = MockTemplateRepositoryTrait::new();
        repo.expect_find_by_id().returning(|id| {
            let now = Utc::now();
            Ok(Some(NotificationTemplate {
                id,
                organization_id: "org-2".to_string(),
                name: "x".to_string(),
                notification_type: NotificationType::SystemAnnouncement,
                channel: Channel::InApp,
                subject: None,
                title: "t".to_string(),
                content: "c".to_string(),
                variables: vec![],
                is_active: true,
                is_default: false,
                created_by: None,
                updated_by: None,
                created_at: now,
                updated_at: now,
            }))
        });
        repo.expect_delete().never();

        let svc = TemplateService::new(Arc::new(repo));
        let err = svc.delete("org-1", Uuid::now_v7()).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }
}
