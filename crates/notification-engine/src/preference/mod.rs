//! 偏好解析
//!
//! 决定某个用户在某个渠道上是否接收某类通知、以什么频率接收、
//! 以及是否因免打扰时段而延后。

mod defaults;
mod resolver;

pub use defaults::{DEFAULT_SET_SIZE, channel_default, default_preference, default_preferences};
pub use resolver::{
    BulkPreferenceResult, DeferReason, DeliveryDecision, DigestSchedule, PreferenceFailure,
    PreferenceResolver, SuppressReason,
};
