//! 分页参数与结果

use serde::{Deserialize, Serialize};

use crate::error::{NotificationError, Result};

/// 单页最大条数
pub const MAX_PAGE_SIZE: u32 = 100;

/// 分页请求（页码从 1 开始）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Result<Self> {
        if page == 0 {
            return Err(NotificationError::Validation("页码从 1 开始".to_string()));
        }
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(NotificationError::Validation(format!(
                "每页条数必须在 1-{} 之间",
                MAX_PAGE_SIZE
            )));
        }
        Ok(Self { page, limit })
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.limit as i64
    }
}

/// 分页结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub has_next: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            limit: request.limit,
            has_next: (request.page as i64) * (request.limit as i64) < total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_next() {
        let req = PageRequest::new(1, 10).unwrap();
        assert!(Page::new(vec![0; 10], 25, req).has_next);

        let req = PageRequest::new(3, 10).unwrap();
        assert!(!Page::new(vec![0; 5], 25, req).has_next);

        let req = PageRequest::new(2, 10).unwrap();
        assert!(!Page::<i32>::new(vec![], 20, req).has_next);
    }

    #[test]
    fn test_offset_and_bounds() {
        assert_eq!(PageRequest::new(3, 20).unwrap().offset(), 40);
        assert!(PageRequest::new(0, 20).is_err());
        assert!(PageRequest::new(1, 0).is_err());
        assert!(PageRequest::new(1, 101).is_err());
    }
}
