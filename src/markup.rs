use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Path prefix reserved for server-generated assets. Markdown images are only
/// rendered live when their target sits under this prefix; everything else
/// stays literal text.
pub(crate) const TRUSTED_IMAGE_PREFIX: &str = "/generated/";

/// Language label shown on a fenced block when the fence carries no tag.
const DEFAULT_CODE_LANG: &str = "text";

// Placeholder delimiter for extracted code spans. The scrub pass removes every
// control character except newline and tab before extraction runs, so no
// surviving input byte can spell one of these tokens.
const SENTINEL: char = '\u{1a}';

static IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)\s]+)\)").unwrap());
static BOLD_STAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
// Underscore emphasis requires word boundaries; intraword underscores
// (identifiers, generated file names in image paths) stay literal.
static BOLD_UNDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b__(.+?)__\b").unwrap());
static ITALIC_STAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.+?)\*").unwrap());
static ITALIC_UNDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b_(.+?)_\b").unwrap());
static STRIKE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"~~(.+?)~~").unwrap());

/// A fenced block lifted out of the text before any rewriting happens.
struct FencedBlock {
    lang: String,
    body: String,
}

/// Compile restricted markdown into safe display markup.
///
/// Total over arbitrary input: anything that does not parse as a supported
/// construct degrades to literal escaped text. Re-running over a growing
/// buffer yields the same output as compiling the final buffer once.
pub(crate) fn compile(raw: &str) -> String {
    let text = scrub_control(raw);
    let (text, fences) = extract_fences(&text);
    let (text, snippets) = extract_inline_code(&text);
    let text = escape_html(&text);
    let (text, images) = substitute_trusted_images(&text);
    let text = apply_block_markup(&text);
    let text = apply_inline_markup(&text);
    let text = restore_images(text, &images);
    let text = restore_inline_code(text, &snippets);
    restore_fences(text, &fences)
}

/// Drop control characters and ANSI escape sequences from incoming text.
/// CR and CRLF normalize to LF; newline and tab are the only control
/// characters kept.
fn scrub_control(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_escape = false;
    let mut in_csi = false;

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_escape {
            if in_csi {
                // CSI sequence terminates at bytes in range 0x40..0x7E.
                if ('@'..='~').contains(&ch) {
                    in_escape = false;
                    in_csi = false;
                }
                continue;
            }
            if ch == '[' {
                in_csi = true;
                continue;
            }
            in_escape = false;
            continue;
        }

        if ch == '\u{1b}' {
            in_escape = true;
            continue;
        }

        if ch == '\r' {
            if chars.peek() != Some(&'\n') {
                out.push('\n');
            }
            continue;
        }

        if ch.is_control() && ch != '\n' && ch != '\t' {
            continue;
        }

        out.push(ch);
    }

    out
}

fn fence_token(index: usize) -> String {
    format!("{SENTINEL}B{index}{SENTINEL}")
}

fn snippet_token(index: usize) -> String {
    format!("{SENTINEL}I{index}{SENTINEL}")
}

fn image_token(index: usize) -> String {
    format!("{SENTINEL}M{index}{SENTINEL}")
}

/// Lift ``` fenced blocks out of the text, leaving one placeholder line per
/// block. An opening fence with no closing fence is not a block at all; the
/// marker line stays in the text as literal content.
fn extract_fences(text: &str) -> (String, Vec<FencedBlock>) {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out_lines: Vec<String> = Vec::with_capacity(lines.len());
    let mut fences = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim();
        if let Some(tag) = trimmed.strip_prefix("```") {
            if let Some(close) = lines[i + 1..].iter().position(|l| l.trim().starts_with("```")) {
                let close = i + 1 + close;
                fences.push(FencedBlock {
                    lang: tag.trim().to_string(),
                    body: lines[i + 1..close].join("\n"),
                });
                out_lines.push(fence_token(fences.len() - 1));
                i = close + 1;
                continue;
            }
        }
        out_lines.push(lines[i].to_string());
        i += 1;
    }

    (out_lines.join("\n"), fences)
}

/// Lift single-backtick spans out of the text. A span must be non-empty and
/// stay on one line; an unmatched or empty backtick pair is literal text.
fn extract_inline_code(text: &str) -> (String, Vec<String>) {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut snippets = Vec::new();

    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '`' {
            let start = i + 1;
            let rel = chars[start..]
                .iter()
                .position(|&c| c == '`' || c == '\n')
                .filter(|&rel| chars[start + rel] == '`' && rel > 0);
            if let Some(rel) = rel {
                snippets.push(chars[start..start + rel].iter().collect());
                out.push_str(&snippet_token(snippets.len() - 1));
                i = start + rel + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    (out, snippets)
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Turn `![alt](path)` into a live image element when the path sits under the
/// trusted prefix. Runs on already-escaped text, so alt and src are safe to
/// embed in attributes as-is. The built tag is parked behind a placeholder
/// until the inline passes have run; a `*` or `_` in the path must not become
/// emphasis inside the src attribute.
fn substitute_trusted_images(text: &str) -> (String, Vec<String>) {
    let mut images = Vec::new();
    let out = IMAGE_RE
        .replace_all(text, |caps: &Captures| {
            let alt = &caps[1];
            let src = &caps[2];
            if src.starts_with(TRUSTED_IMAGE_PREFIX) {
                images.push(format!(
                    "<img class=\"msg-image\" src=\"{src}\" alt=\"{alt}\" loading=\"lazy\">"
                ));
                image_token(images.len() - 1)
            } else {
                caps[0].to_string()
            }
        })
        .into_owned();
    (out, images)
}

fn restore_images(mut text: String, images: &[String]) -> String {
    for (i, tag) in images.iter().enumerate() {
        text = text.replacen(&image_token(i), tag, 1);
    }
    text
}

#[derive(Clone, Copy, PartialEq)]
enum BlockContext {
    None,
    Bullets,
    Numbered,
    Quote,
}

fn close_context(out: &mut Vec<String>, ctx: BlockContext) {
    match ctx {
        BlockContext::Bullets => out.push("</ul>".to_string()),
        BlockContext::Numbered => out.push("</ol>".to_string()),
        BlockContext::Quote => out.push("</blockquote>".to_string()),
        BlockContext::None => {}
    }
}

fn heading_line(trimmed: &str) -> Option<String> {
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if !(1..=4).contains(&level) {
        return None;
    }
    let rest = trimmed[level..].strip_prefix(' ')?;
    Some(format!("<h{level}>{}</h{level}>", rest.trim()))
}

fn is_rule_line(trimmed: &str) -> bool {
    trimmed.chars().count() >= 3
        && (trimmed.chars().all(|c| c == '-') || trimmed.chars().all(|c| c == '*'))
}

fn numbered_item(trimmed: &str) -> Option<&str> {
    let (digits, rest) = trimmed.split_once('.')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    rest.strip_prefix(' ').map(str::trim)
}

/// Line-by-line block pass over escaped text. At most one block context is
/// open at a time; any line that does not extend the open context closes it.
fn apply_block_markup(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut ctx = BlockContext::None;

    for line in text.split('\n') {
        let trimmed = line.trim();

        if let Some(heading) = heading_line(trimmed) {
            close_context(&mut out, ctx);
            ctx = BlockContext::None;
            out.push(heading);
            continue;
        }

        if is_rule_line(trimmed) {
            close_context(&mut out, ctx);
            ctx = BlockContext::None;
            out.push("<hr>".to_string());
            continue;
        }

        // Quote markers were escaped to &gt; before this pass.
        if let Some(rest) = trimmed.strip_prefix("&gt;") {
            if ctx != BlockContext::Quote {
                close_context(&mut out, ctx);
                ctx = BlockContext::Quote;
                out.push("<blockquote>".to_string());
            }
            out.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            continue;
        }

        if let Some(rest) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        {
            if ctx != BlockContext::Bullets {
                close_context(&mut out, ctx);
                ctx = BlockContext::Bullets;
                out.push("<ul>".to_string());
            }
            out.push(format!("<li>{}</li>", rest.trim()));
            continue;
        }

        if let Some(rest) = numbered_item(trimmed) {
            if ctx != BlockContext::Numbered {
                close_context(&mut out, ctx);
                ctx = BlockContext::Numbered;
                out.push("<ol>".to_string());
            }
            out.push(format!("<li>{rest}</li>"));
            continue;
        }

        if trimmed.is_empty() {
            close_context(&mut out, ctx);
            ctx = BlockContext::None;
            out.push("<br>".to_string());
            continue;
        }

        close_context(&mut out, ctx);
        ctx = BlockContext::None;
        out.push(line.to_string());
    }

    close_context(&mut out, ctx);
    out.join("\n")
}

/// Inline emphasis passes, strongest marker first so `**` is never consumed
/// as two italic runs. Spans never cross newlines.
fn apply_inline_markup(text: &str) -> String {
    let text = BOLD_STAR_RE.replace_all(text, "<strong>$1</strong>");
    let text = BOLD_UNDER_RE.replace_all(&text, "<strong>$1</strong>");
    let text = ITALIC_STAR_RE.replace_all(&text, "<em>$1</em>");
    let text = ITALIC_UNDER_RE.replace_all(&text, "<em>$1</em>");
    STRIKE_RE.replace_all(&text, "<del>$1</del>").into_owned()
}

fn restore_inline_code(mut text: String, snippets: &[String]) -> String {
    for (i, snippet) in snippets.iter().enumerate() {
        let rendered = format!("<code>{}</code>", escape_html(snippet));
        text = text.replacen(&snippet_token(i), &rendered, 1);
    }
    text
}

fn restore_fences(mut text: String, fences: &[FencedBlock]) -> String {
    for (i, fence) in fences.iter().enumerate() {
        let lang = if fence.lang.is_empty() {
            DEFAULT_CODE_LANG.to_string()
        } else {
            escape_html(&fence.lang)
        };
        let rendered = format!(
            "<div class=\"code-block\"><div class=\"code-head\"><span class=\"code-lang\">{}</span><button class=\"code-copy\" type=\"button\">Copy</button></div><pre><code>{}</code></pre></div>",
            lang,
            escape_html(&fence.body)
        );
        text = text.replacen(&fence_token(i), &rendered, 1);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_script_tags() {
        let out = compile("<script>alert(1)</script>");
        assert_eq!(out, "&lt;script&gt;alert(1)&lt;/script&gt;");
    }

    #[test]
    fn escapes_quotes_and_ampersands() {
        let out = compile("a & b \"c\" 'd'");
        assert_eq!(out, "a &amp; b &quot;c&quot; &#39;d&#39;");
    }

    #[test]
    fn trusted_image_renders_live() {
        let out = compile("![diagram](/generated/a.png)");
        assert_eq!(
            out,
            "<img class=\"msg-image\" src=\"/generated/a.png\" alt=\"diagram\" loading=\"lazy\">"
        );
    }

    #[test]
    fn untrusted_image_stays_literal() {
        let out = compile("![x](http://evil/a.png)");
        assert_eq!(out, "![x](http://evil/a.png)");
        assert!(!out.contains("<img"));
    }

    #[test]
    fn image_paths_survive_emphasis_passes() {
        let out = compile("![x](/generated/a*b*.png)");
        assert!(out.contains("src=\"/generated/a*b*.png\""));
        assert!(!out.contains("<em>"));

        let out = compile("~~gone~~ ![x](/generated/a~~b~~.png)");
        assert!(out.contains("src=\"/generated/a~~b~~.png\""));
        assert!(out.contains("<del>gone</del>"));
        assert!(!out.contains(SENTINEL));
    }

    #[test]
    fn fenced_block_round_trip() {
        let out = compile("```python\nprint(1)\n```");
        assert!(out.contains("<span class=\"code-lang\">python</span>"));
        assert!(out.contains("<pre><code>print(1)</code></pre>"));
        assert!(!out.contains(SENTINEL));
    }

    #[test]
    fn fence_without_tag_gets_default_label() {
        let out = compile("```\nx\n```");
        assert!(out.contains("<span class=\"code-lang\">text</span>"));
    }

    #[test]
    fn fence_body_is_never_reparsed() {
        let out = compile("```\n**not bold** ![x](/generated/a.png) <b>\n```");
        assert!(out.contains("**not bold**"));
        assert!(out.contains("![x](/generated/a.png)"));
        assert!(out.contains("&lt;b&gt;"));
        assert!(!out.contains("<strong>"));
        assert!(!out.contains("<img"));
    }

    #[test]
    fn unterminated_fence_stays_literal() {
        let out = compile("```python\nprint(1)");
        assert_eq!(out, "```python\nprint(1)");
    }

    #[test]
    fn inline_code_restores_escaped() {
        let out = compile("use `a < b` here");
        assert_eq!(out, "use <code>a &lt; b</code> here");
    }

    #[test]
    fn inline_code_protects_emphasis_markers() {
        let out = compile("`**raw**`");
        assert_eq!(out, "<code>**raw**</code>");
    }

    #[test]
    fn unmatched_backtick_stays_literal() {
        let out = compile("odd ` tick");
        assert_eq!(out, "odd ` tick");
    }

    #[test]
    fn sentinel_in_input_cannot_forge_placeholder() {
        let out = compile("\u{1a}B0\u{1a} and `real`");
        assert_eq!(out, "B0 and <code>real</code>");
    }

    #[test]
    fn bullet_list_state_machine() {
        let out = compile("- a\n- b\n\nc");
        assert_eq!(out, "<ul>\n<li>a</li>\n<li>b</li>\n</ul>\n<br>\nc");
    }

    #[test]
    fn ordered_list_closes_bullet_list() {
        let out = compile("- a\n1. b\n2. c");
        assert_eq!(out, "<ul>\n<li>a</li>\n</ul>\n<ol>\n<li>b</li>\n<li>c</li>\n</ol>");
    }

    #[test]
    fn blockquote_lines_share_one_element() {
        let out = compile("> a\n> b\nplain");
        assert_eq!(out, "<blockquote>\na\nb\n</blockquote>\nplain");
    }

    #[test]
    fn headings_and_rules() {
        let out = compile("# Title\n---");
        assert_eq!(out, "<h1>Title</h1>\n<hr>");
        assert_eq!(compile("#### Deep"), "<h4>Deep</h4>");
        // Five hashes is not a heading level we render.
        assert_eq!(compile("##### nope"), "##### nope");
        assert_eq!(compile("#nospace"), "#nospace");
    }

    #[test]
    fn inline_emphasis_variants() {
        assert_eq!(compile("**b**"), "<strong>b</strong>");
        assert_eq!(compile("__b__"), "<strong>b</strong>");
        assert_eq!(compile("*i*"), "<em>i</em>");
        assert_eq!(compile("~~s~~"), "<del>s</del>");
        assert_eq!(compile("**b** and *i*"), "<strong>b</strong> and <em>i</em>");
    }

    #[test]
    fn emphasis_never_crosses_newlines() {
        let out = compile("**a\nb**");
        assert!(!out.contains("<strong>"));
    }

    #[test]
    fn intraword_underscores_stay_literal() {
        assert_eq!(compile("snake_case_name"), "snake_case_name");
        let out = compile("![x](/generated/img_2024_01.png)");
        assert!(out.contains("src=\"/generated/img_2024_01.png\""));
        assert!(!out.contains("<em>"));
    }

    #[test]
    fn list_items_carry_inline_markup() {
        let out = compile("- **bold** item");
        assert_eq!(out, "<ul>\n<li><strong>bold</strong> item</li>\n</ul>");
    }

    #[test]
    fn control_characters_are_scrubbed() {
        let out = compile("a\u{7}b\u{1b}[31mc");
        assert_eq!(out, "abc");
    }

    #[test]
    fn crlf_normalizes_to_lf() {
        let out = compile("- a\r\n- b");
        assert_eq!(out, "<ul>\n<li>a</li>\n<li>b</li>\n</ul>");
    }

    #[test]
    fn recompile_matches_one_shot() {
        let tokens = ["He", "llo ", "**world**"];
        let mut buffer = String::new();
        let mut last = String::new();
        for tok in tokens {
            buffer.push_str(tok);
            last = compile(&buffer);
        }
        assert_eq!(last, compile("Hello **world**"));
        assert_eq!(last, "Hello <strong>world</strong>");
    }
}
