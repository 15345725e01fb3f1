//! HTML document rendering. The page is rebuilt from engine state and
//! written atomically, so a browser tab refreshing mid-write never sees a
//! torn file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use unicode_width::UnicodeWidthChar;

use super::turn::{ActivityCard, BlockKind, Fragment, TranscriptBlock};
use super::{App, NoticeKind};
use crate::markup;

const PAGE_TITLE: &str = "confab";
const SIDEBAR_PREVIEW_COLS: usize = 40;

pub(super) fn document(app: &App) -> String {
    let mut html = String::with_capacity(16 * 1024);
    html.push_str("<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{PAGE_TITLE}</title>\n"));
    html.push_str("<style>\n");
    html.push_str(PAGE_STYLE);
    html.push_str("\n</style>\n</head>\n<body>\n");
    render_sidebar(&mut html, app);
    html.push_str("<main class=\"chat\">\n");
    for block in app.assembler.blocks() {
        render_block(&mut html, block);
    }
    if app.awaiting_reply && !app.assembler.has_open_turn() {
        html.push_str("<div class=\"typing\"><span></span><span></span><span></span></div>\n");
    }
    render_notices(&mut html, app);
    html.push_str(&format!(
        "<footer class=\"status\">{}</footer>\n",
        markup::escape_html(&app.last_status)
    ));
    html.push_str("</main>\n</body>\n</html>\n");
    html
}

fn render_sidebar(html: &mut String, app: &App) {
    html.push_str("<nav class=\"sidebar\">\n<h2>Sessions</h2>\n<ul>\n");
    let mut saw_current = false;
    for preview in &app.sessions {
        let current = preview.session_id == app.session_id;
        saw_current = saw_current || current;
        let class = if current { " class=\"current\"" } else { "" };
        html.push_str(&format!(
            "<li{}><span class=\"session-id\">{}</span><span class=\"session-preview\">{}</span></li>\n",
            class,
            markup::escape_html(&preview.session_id),
            markup::escape_html(&preview_text(&preview.first_line)),
        ));
    }
    if !saw_current {
        html.push_str(&format!(
            "<li class=\"current\"><span class=\"session-id\">{}</span><span class=\"session-preview\">(new conversation)</span></li>\n",
            markup::escape_html(&app.session_id),
        ));
    }
    html.push_str("</ul>\n</nav>\n");
}

/// Single-line session preview clipped to a fixed display width. Width is
/// measured in terminal columns so CJK text clips where it should.
fn preview_text(line: &str) -> String {
    let mut squashed = String::new();
    for word in line.split_whitespace() {
        if !squashed.is_empty() {
            squashed.push(' ');
        }
        squashed.push_str(word);
    }
    let mut cols = 0;
    for (i, ch) in squashed.char_indices() {
        cols += ch.width().unwrap_or(0);
        if cols > SIDEBAR_PREVIEW_COLS {
            let mut clipped = squashed[..i].trim_end().to_string();
            clipped.push_str("...");
            return clipped;
        }
    }
    squashed
}

fn render_block(html: &mut String, block: &TranscriptBlock) {
    let mut class = match block.kind {
        BlockKind::User => "msg user",
        BlockKind::Assistant => "msg assistant",
    }
    .to_string();
    if block.open {
        class.push_str(" open");
    }
    html.push_str(&format!("<div class=\"{class}\">\n"));
    for fragment in &block.fragments {
        render_fragment(html, fragment);
    }
    html.push_str("</div>\n");
}

fn render_fragment(html: &mut String, fragment: &Fragment) {
    match fragment {
        Fragment::Card(card) => render_card(html, card),
        Fragment::Image { src, alt } => {
            html.push_str(&format!(
                "<img class=\"generated\" src=\"{}\" alt=\"{}\">\n",
                markup::escape_html(src),
                markup::escape_html(alt),
            ));
        }
        // Text fragments already hold compiled markup.
        Fragment::Text(compiled) => {
            html.push_str("<div class=\"msg-text\">");
            html.push_str(compiled);
            html.push_str("</div>\n");
        }
    }
}

fn render_card(html: &mut String, card: &ActivityCard) {
    let state = if card.is_active() { "active" } else { "done" };
    html.push_str(&format!(
        "<div class=\"activity-card accent-{} {}\" data-tool=\"{}\">",
        card.meta.color,
        state,
        markup::escape_html(&card.tool)
    ));
    html.push_str(&format!("<span class=\"card-icon\">{}</span>", card.meta.icon));
    html.push_str(&format!(
        "<span class=\"card-label\">{}</span>",
        markup::escape_html(card.label())
    ));
    if let Some(detail) = &card.detail {
        html.push_str(&format!(
            "<span class=\"card-detail\">{}</span>",
            markup::escape_html(detail)
        ));
    }
    if card.is_active() {
        html.push_str("<span class=\"card-spinner\"></span>");
    } else {
        html.push_str("<span class=\"card-check\">✓</span>");
    }
    html.push_str("</div>\n");
}

fn render_notices(html: &mut String, app: &App) {
    if app.notices.is_empty() {
        return;
    }
    html.push_str("<div class=\"notices\">\n");
    for notice in &app.notices {
        let class = match notice.kind {
            NoticeKind::Info => "notice info",
            NoticeKind::Error => "notice error",
        };
        html.push_str(&format!(
            "<div class=\"{}\">{}</div>\n",
            class,
            markup::escape_html(&notice.text)
        ));
    }
    html.push_str("</div>\n");
}

/// Write via a sibling temp file and rename over the target.
pub(super) fn write_document(path: &Path, html: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let tmp = path.with_extension("html.tmp");
    fs::write(&tmp, html).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::preview_text;

    #[test]
    fn previews_squash_whitespace() {
        assert_eq!(preview_text("  hello \n  world  "), "hello world");
    }

    #[test]
    fn long_previews_clip_at_forty_columns() {
        let out = preview_text(&"x".repeat(60));
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), 43);

        // Exactly forty columns fits without an ellipsis.
        assert_eq!(preview_text(&"x".repeat(40)), "x".repeat(40));
    }

    #[test]
    fn wide_characters_count_two_columns() {
        let out = preview_text(&"漢".repeat(30));
        assert!(out.ends_with("..."));
        // Twenty ideographs fill the forty-column budget.
        assert_eq!(out.trim_end_matches("...").chars().count(), 20);
    }
}

const PAGE_STYLE: &str = r#"
:root {
  --bg: #0f1115;
  --panel: #171a21;
  --text: #e6e8ee;
  --muted: #9aa3b2;
  --user: #1f2937;
  --assistant: #151c2c;
  --border: #2a2f3a;
  --violet: #a78bfa;
  --blue: #60a5fa;
  --cyan: #22d3ee;
  --green: #34d399;
  --amber: #fbbf24;
  --rose: #fb7185;
  --slate: #94a3b8;
}
* { box-sizing: border-box; }
body {
  margin: 0;
  display: flex;
  background: var(--bg);
  color: var(--text);
  font: 15px/1.5 system-ui, sans-serif;
}
.sidebar {
  width: 240px;
  min-height: 100vh;
  padding: 16px;
  background: var(--panel);
  border-right: 1px solid var(--border);
}
.sidebar h2 { margin: 0 0 12px; font-size: 13px; text-transform: uppercase; color: var(--muted); }
.sidebar ul { margin: 0; padding: 0; list-style: none; }
.sidebar li { padding: 8px; border-radius: 6px; margin-bottom: 4px; }
.sidebar li.current { background: var(--user); }
.session-id { display: block; font-size: 12px; color: var(--muted); }
.session-preview { display: block; font-size: 13px; overflow: hidden; white-space: nowrap; }
.chat { flex: 1; max-width: 860px; padding: 24px; }
.msg { margin-bottom: 16px; padding: 12px 16px; border-radius: 10px; }
.msg.user { background: var(--user); margin-left: 15%; }
.msg.assistant { background: var(--assistant); margin-right: 15%; }
.msg.open { border: 1px solid var(--border); }
.msg-text { white-space: pre-wrap; overflow-wrap: break-word; }
.msg-text h1, .msg-text h2, .msg-text h3, .msg-text h4 { margin: 0; }
.msg-text ul, .msg-text ol { margin: 0; padding-left: 24px; }
.msg-text blockquote { margin: 0; padding-left: 12px; border-left: 3px solid var(--border); color: var(--muted); }
.msg-text hr { border: 0; border-top: 1px solid var(--border); }
code { background: #10131a; padding: 1px 5px; border-radius: 4px; font-size: 13px; }
.code-block { margin: 8px 0; border: 1px solid var(--border); border-radius: 8px; overflow: hidden; }
.code-head { display: flex; justify-content: space-between; padding: 4px 10px; background: #10131a; border-bottom: 1px solid var(--border); }
.code-lang { font-size: 12px; color: var(--muted); }
.code-copy { font-size: 12px; color: var(--muted); background: none; border: 0; cursor: pointer; }
.code-block pre { margin: 0; padding: 10px; overflow-x: auto; }
.code-block code { background: none; padding: 0; }
img.generated { max-width: 100%; border-radius: 8px; margin: 8px 0; }
.activity-card {
  display: flex;
  align-items: center;
  gap: 8px;
  margin: 6px 0;
  padding: 6px 10px;
  border-radius: 8px;
  border: 1px solid var(--border);
  border-left-width: 3px;
  font-size: 13px;
}
.accent-violet { border-left-color: var(--violet); }
.accent-blue { border-left-color: var(--blue); }
.accent-cyan { border-left-color: var(--cyan); }
.accent-green { border-left-color: var(--green); }
.accent-amber { border-left-color: var(--amber); }
.accent-rose { border-left-color: var(--rose); }
.accent-slate { border-left-color: var(--slate); }
.card-detail { color: var(--muted); overflow: hidden; white-space: nowrap; text-overflow: ellipsis; }
.card-check { margin-left: auto; color: var(--green); }
.card-spinner {
  margin-left: auto;
  width: 12px;
  height: 12px;
  border: 2px solid var(--border);
  border-top-color: var(--blue);
  border-radius: 50%;
  animation: spin 0.8s linear infinite;
}
@keyframes spin { to { transform: rotate(360deg); } }
.typing { display: flex; gap: 4px; padding: 8px 0; }
.typing span {
  width: 7px;
  height: 7px;
  border-radius: 50%;
  background: var(--muted);
  animation: blink 1.2s infinite;
}
.typing span:nth-child(2) { animation-delay: 0.2s; }
.typing span:nth-child(3) { animation-delay: 0.4s; }
@keyframes blink { 0%, 80%, 100% { opacity: 0.25; } 40% { opacity: 1; } }
.notices { margin-top: 16px; }
.notice { padding: 6px 10px; border-radius: 6px; font-size: 13px; margin-bottom: 4px; }
.notice.info { background: #12202e; color: var(--blue); }
.notice.error { background: #2b1620; color: var(--rose); }
.status { margin-top: 16px; font-size: 12px; color: var(--muted); }
"#;
