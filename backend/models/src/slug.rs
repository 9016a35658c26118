use std::sync::LazyLock;

use regex::Regex;

static UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[_]").unwrap());
static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9\- ]").unwrap());
static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \-]+").unwrap());

/// Turns a display name into a URL segment, e.g. `"Sunday_Long Run!"` into
/// `"sunday-long-run"`.
pub fn slugify(input: &str) -> String {
    let lowered = input.to_lowercase();
    let spaced = UNDERSCORES.replace_all(&lowered, " ");
    let cleaned = DISALLOWED.replace_all(&spaced, "");
    let collapsed = SEPARATORS.replace_all(cleaned.trim(), "-");

    collapsed.trim_matches('-').to_string()
}
