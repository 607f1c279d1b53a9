//! Line syntax for flat `name = value` configuration sources.

use regex::Regex;
use std::sync::OnceLock;

/// One assignment read from a source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub line: usize,
    pub name: String,
    /// Present for `name key = value` lines (map parameters).
    pub key: Option<String>,
    pub value: String,
}

fn line_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_.]*)(?:\s+([^\s=]+))?\s*=\s*(.*?)\s*$").ok())
        .as_ref()
}

fn unquote(v: &str) -> &str {
    let bytes = v.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return &v[1..v.len() - 1];
        }
    }
    v
}

/// Parse a whole source. Comments and blank lines are dropped; lines that do
/// not look like assignments are logged and skipped.
pub fn parse(origin: &str, text: &str) -> Vec<Assignment> {
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match line_pattern().and_then(|re| re.captures(raw)) {
            Some(caps) => out.push(Assignment {
                line: idx + 1,
                name: caps[1].to_string(),
                key: caps.get(2).map(|m| m.as_str().to_string()),
                value: unquote(&caps[3]).to_string(),
            }),
            None => {
                tracing::warn!(source = %origin, line = idx + 1, "skipping malformed config line");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalars_and_map_entries() {
        let text = "# comment\n\ndb_name = music\noperation find = search\n";
        let lines = parse("t", text);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].name, "db_name");
        assert_eq!(lines[0].key, None);
        assert_eq!(lines[0].value, "music");
        assert_eq!(lines[1].name, "operation");
        assert_eq!(lines[1].key.as_deref(), Some("find"));
        assert_eq!(lines[1].value, "search");
        assert_eq!(lines[1].line, 4);
    }

    #[test]
    fn strips_matching_quotes_only() {
        let lines = parse("t", "site_name = \"My Site\"\nbase_url = 'x\n");
        assert_eq!(lines[0].value, "My Site");
        assert_eq!(lines[1].value, "'x");
    }

    #[test]
    fn skips_lines_without_assignment() {
        let lines = parse("t", "this is not config\nclass=Music::Cd\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].value, "Music::Cd");
    }

    #[test]
    fn empty_value_is_allowed() {
        let lines = parse("t", "db_password =\n");
        assert_eq!(lines[0].value, "");
    }
}
