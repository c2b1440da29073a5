//! Mail content → Telegram HTML.
//!
//! Telegram accepts a small HTML subset (`b`, `i`, `u`, `s`, `a`, `code`,
//! `pre`, `blockquote`). Mail HTML is reduced to that subset, plain text is
//! escaped, and long content is split into chunks whose markup is balanced
//! on its own. The invisible marker carries a mail UID through the chat so a
//! later reply can be matched to its source.

use std::sync::OnceLock;

use regex::Regex;

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap_or_else(|e| panic!("invalid regex {pattern}: {e}")))
}

/// Escape text for Telegram HTML.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Map a mail HTML tag to the Telegram tag that renders it, if any.
fn telegram_tag(name: &str) -> Option<&'static str> {
    Some(match name {
        "b" | "strong" => "b",
        "i" | "em" => "i",
        "u" | "ins" => "u",
        "s" | "strike" | "del" => "s",
        "a" => "a",
        "code" | "tt" => "code",
        "pre" => "pre",
        "blockquote" => "blockquote",
        _ => return None,
    })
}

/// Reduce mail HTML to Telegram's subset.
///
/// Block elements become line breaks, list items become bullets, unknown
/// tags are dropped with their text kept, and every opened tag is closed.
pub fn sanitize_html(html: &str) -> String {
    static DROP: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    static HREF: OnceLock<Regex> = OnceLock::new();
    static BLANKS: OnceLock<Regex> = OnceLock::new();

    let html = regex(
        &DROP,
        r"(?is)<!--.*?-->|<(script|style|head|title)\b[^>]*>.*?</(script|style|head|title)\s*>",
    )
    .replace_all(html, "");

    let tag_re = regex(&TAG, r"(?s)<(/?)([a-zA-Z][a-zA-Z0-9]*)([^>]*)>");
    let href_re = regex(&HREF, r#"(?i)href\s*=\s*(?:"([^"]*)"|'([^']*)')"#);

    let mut out = String::with_capacity(html.len());
    let mut open: Vec<&'static str> = Vec::new();
    let mut last = 0;

    for caps in tag_re.captures_iter(&html) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&escape_html(&decode_entities(&html[last..whole.start()])));
        last = whole.end();

        let closing = !caps[1].is_empty();
        let name = caps[2].to_ascii_lowercase();

        match name.as_str() {
            "br" => out.push('\n'),
            "p" | "div" | "tr" | "table" | "ul" | "ol" | "h1" | "h2" | "h3" | "h4" | "h5"
            | "h6" => {
                if closing {
                    out.push('\n');
                }
            }
            "li" if !closing => out.push_str("\n• "),
            _ => {
                let Some(tag) = telegram_tag(&name) else { continue };
                if closing {
                    if let Some(pos) = open.iter().rposition(|t| *t == tag) {
                        // Close anything opened inside it first
                        for inner in open.drain(pos..).rev() {
                            out.push_str(&format!("</{inner}>"));
                        }
                    }
                } else if tag == "a" {
                    let href = href_re.captures(&caps[3]).and_then(|h| {
                        h.get(1).or_else(|| h.get(2)).map(|m| m.as_str().trim().to_string())
                    });
                    match href {
                        Some(href) if href.starts_with("http") || href.starts_with("mailto:") => {
                            out.push_str(&format!(
                                "<a href=\"{}\">",
                                escape_html(&decode_entities(&href)).replace('"', "&quot;")
                            ));
                            open.push(tag);
                        }
                        _ => {}
                    }
                } else {
                    out.push_str(&format!("<{tag}>"));
                    open.push(tag);
                }
            }
        }
    }
    out.push_str(&escape_html(&decode_entities(&html[last..])));
    for tag in open.into_iter().rev() {
        out.push_str(&format!("</{tag}>"));
    }

    let lines: Vec<&str> = out.lines().map(str::trim_end).collect();
    regex(&BLANKS, r"\n{3,}")
        .replace_all(lines.join("\n").trim(), "\n\n")
        .to_string()
}

// ─────────────────────────────────────────────
// Chunking
// ─────────────────────────────────────────────

/// Smallest unit the splitter never cuts: a tag, an entity or one char.
fn atoms(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        let end = match c {
            '<' => rest.find('>').map(|i| i + 1),
            '&' => rest
                .find(';')
                .filter(|i| *i <= 10 && !rest[1..*i].contains(char::is_whitespace))
                .map(|i| i + 1),
            _ => None,
        }
        .unwrap_or(c.len_utf8());
        out.push(&rest[..end]);
        rest = &rest[end..];
    }
    out
}

fn tag_name(atom: &str) -> Option<(bool, &str)> {
    let inner = atom.strip_prefix('<')?.strip_suffix('>')?;
    let (closing, inner) = match inner.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, inner),
    };
    let name = inner.split(|c: char| c.is_whitespace()).next()?;
    if name.is_empty() {
        None
    } else {
        Some((closing, name))
    }
}

struct Chunker {
    max: usize,
    chunks: Vec<String>,
    current: String,
    len: usize,
    /// Chars of reopened tags at the start of `current`.
    prefix_len: usize,
    /// Open tags: (name, opening markup).
    open: Vec<(String, String)>,
}

impl Chunker {
    fn new(max: usize) -> Self {
        Self {
            max: max.max(1),
            chunks: Vec::new(),
            current: String::new(),
            len: 0,
            prefix_len: 0,
            open: Vec::new(),
        }
    }

    fn closing_cost(open: &[(String, String)]) -> usize {
        open.iter().map(|(name, _)| name.len() + 3).sum()
    }

    fn has_content(&self) -> bool {
        self.len > self.prefix_len
    }

    /// Open-tag stack after appending `atoms`.
    fn stack_after(&self, atoms: &[&str]) -> Vec<(String, String)> {
        let mut open = self.open.clone();
        for atom in atoms {
            apply_tag(&mut open, atom);
        }
        open
    }

    fn fits(&self, atoms: &[&str]) -> bool {
        let added: usize = atoms.iter().map(|a| a.chars().count()).sum();
        self.len + added + Self::closing_cost(&self.stack_after(atoms)) <= self.max
    }

    fn append(&mut self, atom: &str) {
        apply_tag(&mut self.open, atom);
        self.current.push_str(atom);
        self.len += atom.chars().count();
    }

    fn flush(&mut self) {
        let trimmed_len = self.current.trim_end_matches('\n').len();
        self.current.truncate(trimmed_len);
        for (name, _) in self.open.iter().rev() {
            self.current.push_str(&format!("</{name}>"));
        }
        self.chunks.push(std::mem::take(&mut self.current));

        for (_, raw) in &self.open {
            self.current.push_str(raw);
        }
        self.len = self.current.chars().count();
        self.prefix_len = self.len;
    }

    fn push_line(&mut self, line: &str) {
        let parts = atoms(line);
        if self.fits(&parts) {
            for atom in parts {
                self.append(atom);
            }
            return;
        }
        if self.has_content() {
            self.flush();
            if self.fits(&parts) {
                for atom in parts {
                    self.append(atom);
                }
                return;
            }
        }
        // Line longer than a chunk: cut between atoms
        for atom in parts {
            if !self.fits(&[atom]) && self.has_content() {
                self.flush();
            }
            self.append(atom);
        }
    }

    fn finish(mut self) -> Vec<String> {
        if self.has_content() || self.chunks.is_empty() {
            self.flush();
        }
        self.chunks
    }
}

fn apply_tag(open: &mut Vec<(String, String)>, atom: &str) {
    if let Some((closing, name)) = tag_name(atom) {
        if closing {
            if let Some(pos) = open.iter().rposition(|(n, _)| n == name) {
                open.remove(pos);
            }
        } else {
            open.push((name.to_string(), atom.to_string()));
        }
    }
}

/// Split Telegram HTML into chunks of at most `max_len` characters.
///
/// Prefers line boundaries, never cuts inside a tag or entity, and closes
/// and reopens formatting across chunk boundaries so each chunk is valid
/// on its own.
pub fn split_html(html: &str, max_len: usize) -> Vec<String> {
    if html.chars().count() <= max_len {
        return vec![html.to_string()];
    }
    let mut chunker = Chunker::new(max_len);
    for line in html.split_inclusive('\n') {
        chunker.push_line(line);
    }
    chunker.finish()
}

/// Telegram HTML reduced to plain text, for resending after a markup rejection.
pub fn html_to_plain(html: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    decode_entities(&regex(&TAG, r"<[^>]*>").replace_all(html, ""))
}

// ─────────────────────────────────────────────
// Invisible marker
// ─────────────────────────────────────────────

const MARK_EDGE: char = '\u{2063}';
const MARK_ZERO: char = '\u{200B}';
const MARK_ONE: char = '\u{200C}';

/// Zero-width encoding of a mail UID.
pub fn encode_marker(uid: u32) -> String {
    let mut out = String::new();
    out.push(MARK_EDGE);
    for bit in format!("{uid:b}").chars() {
        out.push(if bit == '1' { MARK_ONE } else { MARK_ZERO });
    }
    out.push(MARK_EDGE);
    out
}

/// Length of [`encode_marker`]'s output in chars, for chunk budgeting.
pub fn marker_len(uid: u32) -> usize {
    (32 - uid.leading_zeros()).max(1) as usize + 2
}

/// The last UID marker embedded in `text`, if any.
pub fn decode_marker(text: &str) -> Option<u32> {
    let end = text.rfind(MARK_EDGE)?;
    let start = text[..end].rfind(MARK_EDGE)?;
    let bits = &text[start + MARK_EDGE.len_utf8()..end];
    if bits.is_empty() {
        return None;
    }
    let mut uid: u32 = 0;
    for c in bits.chars() {
        let bit = match c {
            MARK_ZERO => 0,
            MARK_ONE => 1,
            _ => return None,
        };
        uid = uid.checked_mul(2)?.checked_add(bit)?;
    }
    Some(uid)
}

/// Text with any marker characters removed.
pub fn strip_marker(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(*c, MARK_EDGE | MARK_ZERO | MARK_ONE))
        .collect()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("x < y && z > w"), "x &lt; y &amp;&amp; z &gt; w");
    }

    #[test]
    fn test_sanitize_maps_supported_tags() {
        assert_eq!(
            sanitize_html("<p>Hello <strong>bold</strong> and <em>it</em></p>"),
            "Hello <b>bold</b> and <i>it</i>"
        );
    }

    #[test]
    fn test_sanitize_drops_unknown_tags_and_styles() {
        let html = "<html><head><title>t</title></head><body><style>p{}</style>\
                    <div><span style=\"x\">Hi</span></div><script>evil()</script></body></html>";
        assert_eq!(sanitize_html(html), "Hi");
    }

    #[test]
    fn test_sanitize_links() {
        assert_eq!(
            sanitize_html(r#"<a href="https://x.example/?a=1&amp;b=2" class="c">here</a>"#),
            r#"<a href="https://x.example/?a=1&amp;b=2">here</a>"#
        );
        // Non-http links keep their text only
        assert_eq!(sanitize_html(r#"<a href="javascript:x()">here</a>"#), "here");
    }

    #[test]
    fn test_sanitize_closes_unbalanced_tags() {
        assert_eq!(sanitize_html("<b>open <i>both"), "<b>open <i>both</i></b>");
        assert_eq!(sanitize_html("<b>x</i>y</b>"), "<b>xy</b>");
    }

    #[test]
    fn test_sanitize_lists_and_breaks() {
        let out = sanitize_html("Items:<ul><li>one</li><li>two</li></ul>End<br>line");
        assert!(out.contains("• one"));
        assert!(out.contains("• two"));
        assert!(out.ends_with("End\nline"));
    }

    #[test]
    fn test_sanitize_escapes_text() {
        assert_eq!(sanitize_html("a &lt; b & c"), "a &lt; b &amp; c");
    }

    #[test]
    fn test_split_short() {
        assert_eq!(split_html("short", 4096), vec!["short"]);
        assert_eq!(split_html("", 4096), vec![""]);
    }

    #[test]
    fn test_split_at_newline() {
        let text = format!("{}\n{}", "a".repeat(50), "b".repeat(50));
        let chunks = split_html(&text, 60);
        assert_eq!(chunks, vec!["a".repeat(50), "b".repeat(50)]);
    }

    #[test]
    fn test_split_long_line() {
        let chunks = split_html(&"a".repeat(100), 60);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 60);
        assert_eq!(chunks[1].len(), 40);
    }

    #[test]
    fn test_split_balances_tags() {
        let text = format!("<b>{}\n{}</b>", "a".repeat(40), "b".repeat(40));
        let chunks = split_html(&text, 50);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("<b>{}</b>", "a".repeat(40)));
        assert_eq!(chunks[1], format!("<b>{}</b>", "b".repeat(40)));
    }

    #[test]
    fn test_split_never_cuts_entities_or_tags() {
        let text = "&amp;".repeat(30);
        for chunk in split_html(&text, 23) {
            assert!(chunk.chars().count() <= 23);
            assert_eq!(chunk.matches('&').count(), chunk.matches(';').count());
        }
        let text = format!("{}<a href=\"https://example.com\">link</a>", "x".repeat(20));
        for chunk in split_html(&text, 40) {
            assert_eq!(chunk.matches('<').count(), chunk.matches('>').count());
        }
    }

    #[test]
    fn test_split_chunks_within_limit() {
        let text = (0..200)
            .map(|i| format!("<i>line {i}</i> with <b>some</b> text"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = split_html(&text, 300);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 300);
            assert_eq!(chunk.matches("<b>").count(), chunk.matches("</b>").count());
        }
    }

    #[test]
    fn test_html_to_plain() {
        assert_eq!(
            html_to_plain("<b>Tom &amp; Jerry</b> say &lt;hi&gt;"),
            "Tom & Jerry say <hi>"
        );
        let marked = format!("<i>x</i>{}", encode_marker(5));
        assert_eq!(decode_marker(&html_to_plain(&marked)), Some(5));
    }

    #[test]
    fn test_marker_roundtrip_in_text() {
        for uid in [0u32, 1, 14, 4_000_000_000] {
            let text = format!("Hello{}\nworld", encode_marker(uid));
            assert_eq!(decode_marker(&text), Some(uid));
            assert_eq!(encode_marker(uid).chars().count(), marker_len(uid));
        }
    }

    #[test]
    fn test_marker_is_invisible() {
        let marked = format!("Body{}", encode_marker(42));
        assert_eq!(strip_marker(&marked), "Body");
        assert!(decode_marker("no marker here").is_none());
    }
}
