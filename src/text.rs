use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static BLOCK_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</p>|</li>|</h[1-6]>|</blockquote>|</pre>").unwrap());
static PARAGRAPH_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<p[^>]*>").unwrap());
static LIST_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<li[^>]*>").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").unwrap());
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Compact age like `5m`, `3h`, `2mo`.
pub fn date_to_text(created_at: i64, now: DateTime<Utc>) -> String {
    let seconds = (now.timestamp() - created_at).max(0);
    if seconds < 60 {
        return format!("{seconds}s");
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{minutes}m");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h");
    }
    let days = hours / 24;
    if days < 30 {
        return format!("{days}d");
    }
    let months = days / 30;
    if months < 12 {
        return format!("{months}mo");
    }
    format!("{}y", days / 365)
}

pub fn add_commas(number: i64) -> String {
    let digits = number.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if number < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn decode_entities(input: &str) -> String {
    ENTITY
        .replace_all(input, |caps: &Captures| {
            let name = &caps[1];
            let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match name {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    "hellip" => Some('…'),
                    "mdash" => Some('—'),
                    "ndash" => Some('–'),
                    _ => None,
                }
            };
            decoded
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Flattens an HTML fragment to plain text with paragraph breaks.
///
/// Reddit double-escapes its `*_html` fields, so escaped markup is decoded
/// once before tags are stripped.
pub fn html_to_text(html: &str) -> String {
    let html = if html.contains("&lt;") && !html.contains('<') {
        decode_entities(html)
    } else {
        html.to_string()
    };
    let text = PARAGRAPH_OPEN.replace_all(&html, "\n");
    let text = LIST_ITEM.replace_all(&text, "\n• ");
    let text = BLOCK_BREAK.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    let text = decode_entities(&text);
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let text = lines.join("\n");
    BLANK_RUN.replace_all(text.trim(), "\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ages() {
        let now = Utc.timestamp_opt(10_000_000, 0).unwrap();
        let at = |secs: i64| date_to_text(10_000_000 - secs, now);
        assert_eq!(at(5), "5s");
        assert_eq!(at(120), "2m");
        assert_eq!(at(3 * 3600), "3h");
        assert_eq!(at(2 * 86400), "2d");
        assert_eq!(at(65 * 86400), "2mo");
        assert_eq!(at(800 * 86400), "2y");
        assert_eq!(date_to_text(10_000_100, now), "0s");
    }

    #[test]
    fn commas() {
        assert_eq!(add_commas(0), "0");
        assert_eq!(add_commas(999), "999");
        assert_eq!(add_commas(1234), "1,234");
        assert_eq!(add_commas(1234567), "1,234,567");
        assert_eq!(add_commas(-1000), "-1,000");
    }

    #[test]
    fn strips_markup() {
        let text = html_to_text("<p>Hello <a href=\"x\">world</a></p><p>Second &amp; last</p>");
        assert_eq!(text, "Hello world\n\nSecond & last");
    }

    #[test]
    fn decodes_escaped_reddit_html() {
        let text = html_to_text("&lt;div class=\"md\"&gt;&lt;p&gt;It&amp;#39;s here&lt;/p&gt;&lt;/div&gt;");
        assert_eq!(text, "It's here");
    }

    #[test]
    fn hacker_news_line_breaks() {
        let text = html_to_text("First<p>Second &#x2F; third<br>fourth");
        assert_eq!(text, "First\nSecond / third\nfourth");
    }
}
