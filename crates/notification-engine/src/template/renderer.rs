//! 模板渲染器
//!
//! 纯函数实现，无状态、可并发调用。

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{NotificationError, Result};
use crate::models::{NotificationTemplate, TemplateData};

/// 匹配 `{{variable_name}}`，变量名支持字母、数字、下划线
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder regex is valid"));

/// 渲染模板
///
/// 将 `{{identifier}}` 替换为 `data[identifier]` 的字符串形式（字符串原样输出，
/// 其他 JSON 值使用其 JSON 文本）。未在 data 中找到的占位符保留原样，不视为错误。
pub fn render(template: &str, data: &TemplateData) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match data.get(name) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(value) => value.to_string(),
                None => {
                    debug!(variable = name, "模板变量未提供，保留原样");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// 提取模板中引用的所有变量名（去重）
pub fn extract_placeholders(template: &str) -> BTreeSet<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// 变量校验结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// 实际引用的变量
    pub referenced: BTreeSet<String>,
    /// 已声明但未被引用的变量（非致命）
    pub unused: Vec<String>,
}

/// 校验模板变量
///
/// `sources` 中任一字符串引用了未声明的变量即失败，错误中列出全部未声明变量；
/// 声明了但没有用到的变量只记录告警。
pub fn validate_variables(sources: &[&str], declared: &[String]) -> Result<ValidationReport> {
    let referenced: BTreeSet<String> = sources
        .iter()
        .flat_map(|s| extract_placeholders(s))
        .collect();

    let undeclared: Vec<String> = referenced
        .iter()
        .filter(|name| !declared.contains(name))
        .cloned()
        .collect();

    if !undeclared.is_empty() {
        return Err(NotificationError::TemplateVariable { undeclared });
    }

    let mut unused: Vec<String> = declared
        .iter()
        .filter(|name| !referenced.contains(*name))
        .cloned()
        .collect();
    unused.sort();
    unused.dedup();

    if !unused.is_empty() {
        warn!(unused = ?unused, "模板声明了未使用的变量");
    }

    Ok(ValidationReport { referenced, unused })
}

/// 渲染后的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub title: String,
    pub content: String,
    pub subject: Option<String>,
}

/// 渲染模板的 title、content 和 subject
pub fn render_template(template: &NotificationTemplate, data: &TemplateData) -> RenderedMessage {
    RenderedMessage {
        title: render(&template.title, data),
        content: render(&template.content, data),
        subject: template.subject.as_deref().map(|s| render(s, data)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: serde_json::Value) -> TemplateData {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_render_simple() {
        let d = data(json!({"name": "张三"}));
        assert_eq!(render("你好，{{name}}！", &d), "你好，张三！");
    }

    #[test]
    fn test_render_missing_variable_left_as_is() {
        assert_eq!(render("Hi {{name}}", &TemplateData::new()), "Hi {{name}}");
    }

    #[test]
    fn test_render_is_idempotent() {
        let d = data(json!({"name": "Q1"}));
        let template = "Cycle {{name}} / {{missing}}";
        let once = render(template, &d);
        assert_eq!(once, render(template, &d));
        assert_eq!(once, "Cycle Q1 / {{missing}}");
    }

    #[test]
    fn test_render_non_string_values() {
        let d = data(json!({"count": 3, "flag": true, "ratio": 0.5}));
        assert_eq!(
            render("{{count}} {{flag}} {{ratio}}", &d),
            "3 true 0.5"
        );
    }

    #[test]
    fn test_render_repeated_placeholder() {
        let d = data(json!({"name": "Q1"}));
        assert_eq!(render("{{name}}-{{name}}", &d), "Q1-Q1");
    }

    #[test]
    fn test_non_word_placeholder_is_not_matched() {
        let d = data(json!({"first name": "x"}));
        assert_eq!(render("{{first name}} {{ name }}", &d), "{{first name}} {{ name }}");
    }

    #[test]
    fn test_extract_placeholders_distinct() {
        let names = extract_placeholders("{{a}} {{b}} {{a}} {c}");
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_validate_variables_fails_on_undeclared() {
        let err = validate_variables(
            &["Cycle {{name}}", "{{name}} starts {{start}} by {{owner}}"],
            &["name".to_string()],
        )
        .unwrap_err();

        match err {
            NotificationError::TemplateVariable { undeclared } => {
                assert_eq!(undeclared, vec!["owner".to_string(), "start".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validate_variables_reports_unused() {
        let report = validate_variables(
            &["Cycle {{name}}"],
            &["name".to_string(), "start".to_string()],
        )
        .unwrap();
        assert_eq!(report.unused, vec!["start".to_string()]);
        assert!(report.referenced.contains("name"));
    }

    #[test]
    fn test_cycle_template_scenario() {
        let declared = vec!["name".to_string(), "start".to_string()];
        let report =
            validate_variables(&["Cycle {{name}}", "{{name}} starts {{start}}"], &declared).unwrap();
        assert!(report.unused.is_empty());

        let d = data(json!({"name": "Q1", "start": "2025-01-01"}));
        assert_eq!(render("Cycle {{name}}", &d), "Cycle Q1");
        assert_eq!(render("{{name}} starts {{start}}", &d), "Q1 starts 2025-01-01");
    }
}
