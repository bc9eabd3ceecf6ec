//! 通知编排引擎
//!
//! 反馈平台的通知核心：把业务事件和显式请求转换为面向单个用户、单个渠道的通知，
//! 并按用户偏好决定立即投递、延后投递还是抑制。
//!
//! ## 核心功能
//!
//! - **模板渲染**：`{{variable}}` 占位符替换与变量声明校验
//! - **偏好解析**：默认偏好写入、渠道级汇总、免打扰与汇总频率
//! - **生命周期**：创建、投递、已读、取消、删除、送达确认、统计
//! - **模板管理**：模板增删改查、启停、组织默认模板
//! - **定时投递**：到期的 scheduled 通知由扫描器统一释放
//! - **事件接入**：考核周期、反馈事件到通知的转换
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `template`: 模板渲染
//! - `preference`: 偏好解析
//! - `repository`: 仓储层（PostgreSQL + 内存实现）
//! - `channels`: 渠道投递 Sink
//! - `publisher`: 出站事件发布
//! - `auth`: 角色判定
//! - `service`: 业务服务层
//! - `worker`: 定时通知扫描器

pub mod auth;
pub mod channels;
pub mod error;
pub mod models;
pub mod preference;
pub mod publisher;
pub mod repository;
pub mod service;
pub mod template;
pub mod worker;

pub use auth::{RoleOracle, StaticRoleOracle};
pub use channels::{DeliveryReceipt, SinkRegistry, TransportSink};
pub use error::{NotificationError, Result};
pub use models::*;
pub use preference::{DeliveryDecision, DigestSchedule, PreferenceResolver};
pub use publisher::{BroadcastEventPublisher, EventPublisher, PublishedEvent, TracingEventPublisher};
pub use repository::{
    InMemoryNotificationRepository, InMemoryPreferenceRepository, InMemoryTemplateRepository,
    PgNotificationRepository, PgPreferenceRepository, PgTemplateRepository,
};
pub use service::{
    DomainEventHandler, EventOutcome, NotificationService, RecipientResolver,
    StaticRecipientResolver, TemplateService,
};
pub use worker::{ScheduledDispatchSweeper, SweepReport};
