//! 提示模板：`{{ path.to.value }}` 占位符替换
//!
//! 字符串原样插入，其他值以 JSON 文本插入，缺失路径渲染为空串。

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\}\}")
            .expect("placeholder pattern is a valid literal regex")
    })
}

/// 按点分路径在 JSON 中取值（对象键或数组下标）
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |node, key| match node {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 渲染模板
pub fn render(template: &str, data: &Value) -> String {
    placeholder().replace_all(template, |caps: &Captures| {
        lookup(data, &caps[1]).map(value_to_text).unwrap_or_default()
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_strings_numbers_and_paths() {
        let data = json!({"name": "Ada", "counter": 3, "profile": {"tags": ["x", "y"]}});
        let out = render("Hi {{name}}, count={{ counter }}, tag={{profile.tags.1}}", &data);
        assert_eq!(out, "Hi Ada, count=3, tag=y");
    }

    #[test]
    fn test_missing_key_renders_empty() {
        assert_eq!(render("[{{ nope }}]", &json!({})), "[]");
    }

    #[test]
    fn test_non_placeholder_braces_untouched() {
        assert_eq!(render("{ not a {{ }} }", &json!({})), "{ not a {{ }} }");
    }

    #[test]
    fn test_placeholder_captures_dotted_path() {
        let caps = placeholder().captures("{{  a.b_c.0 }}").unwrap();
        assert_eq!(&caps[1], "a.b_c.0");
    }
}
