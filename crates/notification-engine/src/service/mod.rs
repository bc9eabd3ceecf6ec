//! 业务服务层
//!
//! - [`NotificationService`]: 通知生命周期（创建、投递、已读、取消、删除、统计、偏好）
//! - [`TemplateService`]: 模板管理
//! - [`DomainEventHandler`]: 领域事件到通知的转换

mod events;
mod lifecycle;
mod template_admin;

pub use events::{DomainEventHandler, EventOutcome, RecipientResolver, StaticRecipientResolver};
pub use lifecycle::NotificationService;
pub use template_admin::TemplateService;
