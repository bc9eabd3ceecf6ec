//! 模板渲染与变量校验
//!
//! 提供 `{{variable}}` 占位符替换，以及模板变量声明与正文引用之间的一致性校验。
//!
//! ## 使用示例
//!
//! ```ignore
//! let data = serde_json::json!({"name": "Q1", "start": "2025-01-01"});
//! let rendered = render("{{name}} starts {{start}}", data.as_object().unwrap());
//! assert_eq!(rendered, "Q1 starts 2025-01-01");
//! ```

mod renderer;

pub use renderer::{
    RenderedMessage, ValidationReport, extract_placeholders, render, render_template,
    validate_variables,
};
