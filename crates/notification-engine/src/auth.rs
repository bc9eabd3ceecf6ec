//! 角色判定
//!
//! 列表、统计、查看、删除等操作的特权分支依赖调用方是否为组织管理员。
//! 真实的角色解析属于授权模块，这里只定义端口和一个静态实现。

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;

/// 角色判定端口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoleOracle: Send + Sync {
    /// 用户在组织内是否拥有管理员权限
    async fn is_privileged(&self, user_id: &str, organization_id: &str) -> Result<bool>;
}

/// 基于配置的管理员名单
///
/// 名单对所有组织生效
#[derive(Debug, Clone, Default)]
pub struct StaticRoleOracle {
    admins: HashSet<String>,
}

impl StaticRoleOracle {
    pub fn new<I, S>(admin_user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admin_user_ids.into_iter().map(Into::into).collect(),
        }
    }

    /// 无任何管理员
    pub fn nobody() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleOracle for StaticRoleOracle {
    async fn is_privileged(&self, user_id: &str, _organization_id: &str) -> Result<bool> {
        Ok(self.admins.contains(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_oracle() {
        let oracle = StaticRoleOracle::new(["admin-1"]);
        assert!(oracle.is_privileged("admin-1", "org-1").await.unwrap());
        assert!(!oracle.is_privileged("u1", "org-1").await.unwrap());
        assert!(!StaticRoleOracle::nobody().is_privileged("admin-1", "org-1").await.unwrap());
    }
}
