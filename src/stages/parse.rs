//! 从 LLM 回复中提取 JSON 与代码块

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

static FENCE_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn fence_re() -> Option<&'static Regex> {
    FENCE_RE
        .get_or_init(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\r?\n?(.*?)```").ok())
        .as_ref()
}

/// 围栏代码块：(语言标记, 正文)
pub fn fenced_blocks(output: &str) -> Vec<(String, String)> {
    let Some(re) = fence_re() else {
        return Vec::new();
    };
    re.captures_iter(output)
        .map(|c| {
            let lang = c.get(1).map(|m| m.as_str()).unwrap_or("").to_string();
            let body = c.get(2).map(|m| m.as_str()).unwrap_or("").to_string();
            (lang, body)
        })
        .collect()
}

/// 依次尝试：整体解析、围栏块解析、首个 `{`/`[` 到最后一个 `}`/`]`
pub fn extract_json(output: &str) -> Option<Value> {
    let trimmed = output.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }
    for (_, body) in fenced_blocks(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(body.trim()) {
            return Some(v);
        }
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                    return Some(v);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_and_fenced_json() {
        assert_eq!(extract_json(r#"{"steps": ["a"]}"#), Some(json!({"steps": ["a"]})));
        let fenced = "Here you go:\n```json\n{\"steps\": [\"a\", \"b\"]}\n```\n";
        assert_eq!(extract_json(fenced), Some(json!({"steps": ["a", "b"]})));
        assert_eq!(extract_json("prefix [1, 2] suffix"), Some(json!([1, 2])));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn blocks_keep_language_tag() {
        let text = "```python\nprint('hi')\n```\nand\n```\nplain\n```";
        let blocks = fenced_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].0, "python");
        assert_eq!(blocks[0].1, "print('hi')\n");
        assert_eq!(blocks[1].1, "plain\n");
    }
}
