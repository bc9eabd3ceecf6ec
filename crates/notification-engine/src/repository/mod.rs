//! 数据访问层
//!
//! 提供通知、模板、偏好的仓储接口及其 PostgreSQL / 内存实现。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 使用 SQLx 进行类型安全的数据库操作
//! - 定义 trait 接口以支持 mock 测试和内存替身

mod memory;
mod notification_repo;
mod preference_repo;
mod template_repo;
mod traits;

pub use memory::{
    InMemoryNotificationRepository, InMemoryPreferenceRepository, InMemoryTemplateRepository,
};
pub use notification_repo::PgNotificationRepository;
pub use preference_repo::PgPreferenceRepository;
pub use template_repo::PgTemplateRepository;
pub use traits::*;
