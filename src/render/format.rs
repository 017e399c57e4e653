//! Markdown to Slack mrkdwn conversion.
//!
//! Agents write GitHub-flavoured Markdown; Slack understands a smaller
//! dialect. [`to_rich`] maps the common constructs, and [`to_plain`] strips
//! markup for the fallback path when Slack rejects the rich rendering.
//! Code spans and fenced blocks are passed through untouched apart from
//! entity escaping.

use std::sync::LazyLock;

use regex::{Captures, Regex};

const BOLD_MARK: char = '\u{1}';

#[allow(clippy::expect_used)]
fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("literal pattern compiles")
}

static HEADING: LazyLock<Regex> = LazyLock::new(|| pattern(r"^\s{0,3}#{1,6}\s+(.+?)\s*#*\s*$"));
static BULLET: LazyLock<Regex> = LazyLock::new(|| pattern(r"^(\s*)[-*+]\s+(.*)$"));
static LINK: LazyLock<Regex> = LazyLock::new(|| pattern(r"\[([^\]\n]+)\]\(([^)\s]+)\)"));
static BOLD: LazyLock<Regex> = LazyLock::new(|| pattern(r"\*\*(.+?)\*\*|__(.+?)__"));
static ITALIC: LazyLock<Regex> = LazyLock::new(|| pattern(r"\*([^*\s](?:[^*]*[^*\s])?)\*"));
static STRIKE: LazyLock<Regex> = LazyLock::new(|| pattern(r"~~(.+?)~~"));

/// Escape the three characters Slack treats as control sequences.
#[must_use]
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render Markdown as Slack mrkdwn.
#[must_use]
pub fn to_rich(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len() + markdown.len() / 8);
    let mut in_fence = false;

    for (i, line) in markdown.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            // Slack ignores language tags and would print them.
            out.push_str(if in_fence { trimmed.trim_end() } else { "```" });
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            out.push_str(&escape(line));
            continue;
        }

        if let Some(caps) = HEADING.captures(line) {
            let inner = inline_rich(&caps[1]).replace('*', "");
            out.push('*');
            out.push_str(&inner);
            out.push('*');
        } else if let Some(caps) = BULLET.captures(line) {
            out.push_str(&caps[1]);
            out.push_str("\u{2022} ");
            out.push_str(&inline_rich(&caps[2]));
        } else {
            out.push_str(&inline_rich(line));
        }
    }
    out
}

/// Render Markdown as readable plain text.
#[must_use]
pub fn to_plain(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut in_fence = false;

    for (i, line) in markdown.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            out.push_str(line);
            continue;
        }
        if in_fence {
            out.push_str(line);
            continue;
        }

        let line = match HEADING.captures(line) {
            Some(caps) => caps[1].to_owned(),
            None => match BULLET.captures(line) {
                Some(caps) => format!("{}\u{2022} {}", &caps[1], &caps[2]),
                None => line.to_owned(),
            },
        };
        let line = LINK.replace_all(&line, "$1 ($2)");
        let line = BOLD.replace_all(&line, |caps: &Captures<'_>| group_text(caps));
        let line = STRIKE.replace_all(&line, "$1");
        out.push_str(&line);
    }
    out
}

fn inline_rich(text: &str) -> String {
    let segments: Vec<&str> = text.split('`').collect();
    let balanced = segments.len() % 2 == 1;
    let mut out = String::with_capacity(text.len());

    for (i, segment) in segments.iter().enumerate() {
        let is_code = i % 2 == 1;
        if is_code && (balanced || i + 1 < segments.len()) {
            out.push('`');
            out.push_str(&escape(segment));
            out.push('`');
        } else {
            if is_code {
                out.push('`');
            }
            out.push_str(&span_rich(&escape(segment)));
        }
    }
    out
}

fn span_rich(escaped: &str) -> String {
    let text = LINK.replace_all(escaped, "<$2|$1>");
    let text = BOLD.replace_all(&text, |caps: &Captures<'_>| {
        format!("{BOLD_MARK}{}{BOLD_MARK}", group_text(caps))
    });
    let text = ITALIC.replace_all(&text, "_${1}_");
    let text = STRIKE.replace_all(&text, "~$1~");
    text.replace(BOLD_MARK, "*")
}

fn group_text(caps: &Captures<'_>) -> String {
    caps.get(1)
        .or_else(|| caps.get(2))
        .map_or_else(String::new, |m| m.as_str().to_owned())
}
