//! Secret redaction applied to every detail string before it is audited.

use std::sync::OnceLock;

use regex::Regex;

pub const REDACTED: &str = "[REDACTED]";

const SECRET_PATTERNS: &[&str] = &[
    // Anthropic API keys
    r"sk-ant-[A-Za-z0-9_-]+",
    // Portainer access tokens
    r"ptr_[A-Za-z0-9_-]+",
    // key=value / key: value assignments
    r#"(?i)password['"]?\s*[:=]\s*['"]?[^\s'",}]+"#,
    r#"(?i)api[_-]?key['"]?\s*[:=]\s*['"]?[^\s'",}]+"#,
    r#"(?i)token['"]?\s*[:=]\s*['"]?[^\s'",}]+"#,
    r#"(?i)secret['"]?\s*[:=]\s*['"]?[^\s'",}]+"#,
    // HTTP bearer credentials
    r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+",
];

static COMPILED: OnceLock<Vec<Regex>> = OnceLock::new();

fn patterns() -> &'static [Regex] {
    COMPILED.get_or_init(|| {
        SECRET_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Replace secret-shaped substrings with `[REDACTED]`.
pub fn redact(text: &str) -> String {
    let mut out = text.to_string();
    for re in patterns() {
        if re.is_match(&out) {
            out = re.replace_all(&out, REDACTED).into_owned();
        }
    }
    out
}
