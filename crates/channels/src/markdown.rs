//! Telegram MarkdownV2 escaping.
//!
//! Model answers often contain code. Fenced blocks and inline code spans are
//! kept as written (only backslashes are doubled); everywhere else the
//! MarkdownV2 special characters are escaped so the text renders literally.

use regex_lite::Regex;

/// Characters MarkdownV2 requires escaping outside code.
const SPECIAL: &str = "_*[]()~`>#+-=|{}.!";

const PROTECTED_PATTERNS: [&str; 2] = [
    r"(?s)```.+?```",
    r"`[\\.+*()\-\[\]=\s\w]+`",
];

pub struct MarkdownEscaper {
    protected: Vec<Regex>,
}

impl MarkdownEscaper {
    pub fn new() -> Self {
        Self {
            protected: PROTECTED_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }

    /// Byte ranges of code spans, sorted and with overlaps merged.
    fn protected_ranges(&self, text: &str) -> Vec<(usize, usize)> {
        let mut ranges: Vec<(usize, usize)> = self
            .protected
            .iter()
            .flat_map(|re| re.find_iter(text))
            .filter(|m| m.end() > m.start())
            .map(|m| (m.start(), m.end()))
            .collect();
        ranges.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            match merged.last_mut() {
                Some(last) if start < last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        merged
    }

    /// Escape `text` for `parse_mode = MarkdownV2`.
    pub fn escape(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len() + text.len() / 8);
        let mut idx = 0;
        for (start, end) in self.protected_ranges(text) {
            escape_specials(&text[idx..start], &mut out);
            out.push_str(&text[start..end].replace('\\', "\\\\"));
            idx = end;
        }
        escape_specials(&text[idx..], &mut out);
        out
    }

    /// An italic-bold quote, a blank line, then the message.
    pub fn quote(&self, quote: &str, message: &str) -> String {
        format!("_*{}*_  \n  \n{}", self.escape(quote), self.escape(message))
    }
}

impl Default for MarkdownEscaper {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_specials(text: &str, out: &mut String) {
    for ch in text.chars() {
        if SPECIAL.contains(ch) {
            out.push('\\');
        }
        out.push(ch);
    }
}

/// The plain-text rendering of a quoted reply.
pub fn plain_quote(quote: &str, message: &str) -> String {
    format!("{quote}  \n  \n{message}")
}
