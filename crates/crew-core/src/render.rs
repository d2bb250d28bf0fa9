//! Minimal `{{name}}` template substitution for agent command and prompt
//! templates and the poller's on-change command.

use std::collections::BTreeMap;

use tracing::warn;

/// Render a template, replacing every `{{name}}` placeholder with its value.
///
/// Unknown placeholders render empty and log a warning; literal text passes
/// through untouched, including lone braces.
pub fn render_template(template: &str, values: &BTreeMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let name = after_open[..end].trim();
                match values.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        warn!(
                            event = "core.render.unknown_placeholder",
                            placeholder = name,
                            "Template references an unknown placeholder, rendering empty"
                        );
                    }
                }
                rest = &after_open[end + 2..];
            }
            None => {
                // Unterminated opener is literal text
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// Single-quote a string for safe embedding in a shell script.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
