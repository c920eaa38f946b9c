use serde_json::Value;

/// Render a value as an XML document rooted at `<response>`. Mapping keys
/// become elements, array entries become repeated `<item>` elements, empty
/// composite values render as empty elements.
pub fn render(value: &Value) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<response>{}</response>",
        node(value, 1)
    )
}

fn node(value: &Value, level: usize) -> String {
    match value {
        Value::Object(map) => {
            let children: Vec<String> = map
                .iter()
                .map(|(key, v)| format!("<{}>{}</{}>", key, node(v, level + 1), key))
                .collect();
            indent_children(children, level)
        }
        Value::Array(items) => {
            let children: Vec<String> = items
                .iter()
                .map(|v| format!("<item>{}</item>", node(v, level + 1)))
                .collect();
            indent_children(children, level)
        }
        Value::Null => String::new(),
        Value::String(s) => escape(s),
        other => other.to_string(),
    }
}

fn indent_children(children: Vec<String>, level: usize) -> String {
    if children.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    for child in children {
        out.push('\n');
        out.push_str(&"\t".repeat(level));
        out.push_str(&child);
    }
    out.push('\n');
    out.push_str(&"\t".repeat(level - 1));
    out
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_prolog_and_root() {
        let out = render(&json!({"data": null}));
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<response>"));
        assert!(out.ends_with("</response>"));
        assert!(out.contains("<data></data>"));
    }

    #[test]
    fn arrays_become_item_elements() {
        let out = render(&json!({"data": [{"a": 1}, {"a": 2}]}));
        assert_eq!(out.matches("<item>").count(), 2);
        assert!(out.contains("<a>1</a>"));
        assert!(out.contains("<a>2</a>"));
    }

    #[test]
    fn empty_composites_render_as_empty_elements() {
        let out = render(&json!({"data": {}}));
        assert!(out.contains("<data></data>"));
        let out = render(&json!({"data": []}));
        assert!(out.contains("<data></data>"));
    }

    #[test]
    fn text_is_escaped() {
        let out = render(&json!({"data": "a < b & c"}));
        assert!(out.contains("a &lt; b &amp; c"));
    }
}
