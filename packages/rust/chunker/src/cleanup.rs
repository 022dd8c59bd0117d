//! Text normalization pipeline for fetched regulation documents.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! The pipeline must be deterministic: the same input bytes always yield
//! the same output text, because chunk identities are derived from it.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

/// Run the full cleanup pipeline on decoded document text.
pub(crate) fn run_pipeline(text: &str) -> String {
    let mut result = text.to_string();

    result = normalize_line_endings(&result);
    result = strip_control_chars(&result);
    result = normalize_unicode_whitespace(&result);
    result = collapse_inline_whitespace(&result);
    result = collapse_blank_lines(&result);
    result = trim_lines(&result);

    result.trim().to_string()
}

/// Extract visible text from an HTML payload, paragraph-per-block.
///
/// Script, style, and chrome elements (nav, header, footer, aside) are
/// dropped; block elements become paragraph boundaries so the splitter
/// sees section structure rather than one flattened line.
pub(crate) fn extract_html_text(html: &str) -> String {
    static BLOCK_TAGS: &[&str] = &[
        "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "td", "th", "blockquote", "pre",
        "section", "article", "div",
    ];
    static SKIP_TAGS: &[&str] = &["script", "style", "nav", "header", "footer", "aside", "noscript"];

    let document = Html::parse_document(html);
    let mut paragraphs: Vec<String> = Vec::new();
    let mut buf = String::new();

    collect_text(
        document.root_element(),
        BLOCK_TAGS,
        SKIP_TAGS,
        &mut paragraphs,
        &mut buf,
    );
    if !buf.trim().is_empty() {
        paragraphs.push(buf);
    }

    paragraphs
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn collect_text(
    element: scraper::ElementRef<'_>,
    block_tags: &[&str],
    skip_tags: &[&str],
    paragraphs: &mut Vec<String>,
    buf: &mut String,
) {
    use scraper::Node;

    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                buf.push_str(text);
            }
            Node::Element(_) => {
                let Some(child_ref) = scraper::ElementRef::wrap(child) else {
                    continue;
                };
                let name = child_ref.value().name();
                if skip_tags.contains(&name) {
                    continue;
                }
                let is_block = block_tags.contains(&name);
                if is_block && !buf.trim().is_empty() {
                    paragraphs.push(std::mem::take(buf));
                }
                collect_text(child_ref, block_tags, skip_tags, paragraphs, buf);
                if is_block && !buf.trim().is_empty() {
                    paragraphs.push(std::mem::take(buf));
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Pass 1: Normalize line endings
// ---------------------------------------------------------------------------

/// Convert CRLF and lone CR to LF.
fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Strip control characters
// ---------------------------------------------------------------------------

/// Remove control characters other than newline and tab.
fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

// ---------------------------------------------------------------------------
// Pass 3: Normalize unicode whitespace
// ---------------------------------------------------------------------------

/// Map non-breaking and exotic unicode spaces to plain ASCII space.
fn normalize_unicode_whitespace(text: &str) -> String {
    text.chars()
        .map(|c| if c != '\n' && c != '\t' && c.is_whitespace() { ' ' } else { c })
        .collect()
}

// ---------------------------------------------------------------------------
// Pass 4: Collapse inline whitespace
// ---------------------------------------------------------------------------

/// Collapse runs of spaces and tabs within a line into a single space.
fn collapse_inline_whitespace(text: &str) -> String {
    static INLINE_WS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid regex"));

    INLINE_WS_RE.replace_all(text, " ").to_string()
}

// ---------------------------------------------------------------------------
// Pass 5: Collapse blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of 2+ blank lines into exactly one (one `\n\n` separator).
fn collapse_blank_lines(text: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(text, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 6: Trim line edges
// ---------------------------------------------------------------------------

/// Strip leading/trailing whitespace from every line.
fn trim_lines(text: &str) -> String {
    text.lines()
        .map(|line| line.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_endings_normalized() {
        let input = "Section 1.\r\nSection 2.\rSection 3.";
        let result = normalize_line_endings(input);
        assert_eq!(result, "Section 1.\nSection 2.\nSection 3.");
    }

    #[test]
    fn control_chars_stripped() {
        let input = "Tex\u{0000}t with\u{0007} noise\tand tab";
        let result = strip_control_chars(input);
        assert_eq!(result, "Text with noise\tand tab");
    }

    #[test]
    fn unicode_spaces_become_ascii() {
        let input = "non\u{00a0}breaking\u{2003}spaces";
        let result = normalize_unicode_whitespace(input);
        assert_eq!(result, "non breaking spaces");
    }

    #[test]
    fn inline_whitespace_collapsed() {
        let input = "too   many\t\tgaps";
        let result = collapse_inline_whitespace(input);
        assert_eq!(result, "too many gaps");
    }

    #[test]
    fn blank_lines_collapsed() {
        let input = "Para one.\n\n\n\nPara two.";
        let result = collapse_blank_lines(input);
        assert_eq!(result, "Para one.\n\nPara two.");
    }

    #[test]
    fn pipeline_is_deterministic() {
        let input = "  §1201.2  Scope. \r\n\r\n\r\n This part   applies to\u{00a0}all lenders. ";
        let a = run_pipeline(input);
        let b = run_pipeline(input);
        assert_eq!(a, b);
        assert_eq!(a, "§1201.2 Scope.\n\nThis part applies to all lenders.");
    }

    #[test]
    fn html_extraction_drops_chrome() {
        let html = r#"
<html><head><title>Reg</title><style>body{}</style></head>
<body>
  <nav><a href="/">Home</a></nav>
  <article>
    <h1>Part 1201</h1>
    <p>Scope of this part.</p>
    <p>Definitions follow.</p>
  </article>
  <footer>Agency footer</footer>
  <script>track();</script>
</body></html>"#;
        let text = extract_html_text(html);
        assert!(text.contains("Part 1201"));
        assert!(text.contains("Scope of this part."));
        assert!(text.contains("\n\n"));
        assert!(!text.contains("Home"));
        assert!(!text.contains("Agency footer"));
        assert!(!text.contains("track()"));
    }

    #[test]
    fn html_blocks_become_paragraphs() {
        let html = "<body><p>First.</p><p>Second.</p></body>";
        let text = extract_html_text(html);
        assert_eq!(text, "First.\n\nSecond.");
    }
}
