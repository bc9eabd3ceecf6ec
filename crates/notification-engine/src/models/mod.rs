//! 领域模型定义

mod enums;
mod notification;
mod page;
mod preference;
mod template;

pub use enums::*;
pub use notification::*;
pub use page::*;
pub use preference::*;
pub use template::*;
