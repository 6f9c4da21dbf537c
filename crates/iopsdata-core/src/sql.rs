//! Pull a SQL statement out of free-form assistant text.
//!
//! Used when a reply arrives without an explicit `sql` field, e.g. a plain
//! text stream whose answer embeds a fenced code block.

use regex::Regex;
use std::sync::OnceLock;

fn sql_start() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(select|with|insert|update|delete)\b").expect("valid SQL keyword regex")
    })
}

fn code_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)```(?:sql)?\n(.*?)```").expect("valid code block regex"))
}

fn normalize(sql: &str) -> String {
    format!("{};", sql.trim().trim_end_matches(';'))
}

fn has_balanced_parentheses(sql: &str) -> bool {
    let mut balance: i32 = 0;
    for c in sql.chars() {
        match c {
            '(' => balance += 1,
            ')' => balance -= 1,
            _ => {}
        }
        if balance < 0 {
            return false;
        }
    }
    balance == 0
}

fn is_valid(sql: &str) -> bool {
    !sql.is_empty() && sql_start().is_match(sql) && has_balanced_parentheses(sql)
}

fn candidates(text: &str) -> Vec<&str> {
    let mut found: Vec<&str> = code_block()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    if sql_start().is_match(text) {
        found.push(text);
    }
    found
}

/// Extract and normalize the first valid SQL statement in `text`.
///
/// Fenced blocks are tried first, then the whole text. When a candidate mixes
/// prose and SQL, only the lines containing a SQL keyword are kept.
pub fn extract_sql(text: &str) -> Option<String> {
    for candidate in candidates(text) {
        let cleaned = candidate.trim();
        if is_valid(cleaned) {
            return Some(normalize(cleaned));
        }

        let snippet = cleaned
            .lines()
            .filter(|line| sql_start().is_match(line))
            .collect::<Vec<_>>()
            .join("\n");
        if is_valid(&snippet) {
            return Some(normalize(&snippet));
        }
    }
    None
}
