use serde_json::Value;

use super::meta::{self, ToolMeta};
use super::types::{ConversationEntry, Role};
use crate::{markup, truncate};

const MAX_DETAIL_CHARS: usize = 80;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CardStatus {
    Active,
    Done,
}

/// One tool/agent activity indicator inside an assistant turn. The only
/// mutation it ever sees is Active -> Done.
#[derive(Clone, Debug)]
pub(crate) struct ActivityCard {
    pub(crate) tool: String,
    pub(crate) status: CardStatus,
    pub(crate) meta: ToolMeta,
    pub(crate) detail: Option<String>,
}

impl ActivityCard {
    fn new(tool: &str, args: &Value) -> Self {
        Self {
            tool: tool.to_string(),
            status: CardStatus::Active,
            meta: meta::lookup(tool),
            detail: args_preview(args),
        }
    }

    pub(crate) fn label(&self) -> &str {
        match self.status {
            CardStatus::Active => &self.meta.active_label,
            CardStatus::Done => &self.meta.idle_label,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.status == CardStatus::Active
    }

    fn finish(&mut self) {
        self.status = CardStatus::Done;
    }
}

/// Ordered piece of an assistant turn. Text fragments hold compiled markup,
/// never raw input.
#[derive(Clone, Debug)]
pub(crate) enum Fragment {
    Card(ActivityCard),
    Image { src: String, alt: String },
    Text(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BlockKind {
    User,
    Assistant,
}

#[derive(Clone, Debug)]
pub(crate) struct TranscriptBlock {
    pub(crate) kind: BlockKind,
    pub(crate) fragments: Vec<Fragment>,
    pub(crate) open: bool,
}

impl TranscriptBlock {
    fn open_assistant() -> Self {
        Self {
            kind: BlockKind::Assistant,
            fragments: Vec::new(),
            open: true,
        }
    }

    fn closed(kind: BlockKind, fragments: Vec<Fragment>) -> Self {
        Self {
            kind,
            fragments,
            open: false,
        }
    }
}

/// Token accumulator for the turn currently being streamed. The buffer is
/// append-only while active and is the single source of truth for the
/// streamed text; display markup is always re-derived from the whole buffer.
#[derive(Debug, Default)]
pub(crate) struct StreamSession {
    buffer: String,
    active: bool,
}

impl StreamSession {
    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn buffer(&self) -> &str {
        &self.buffer
    }

    fn push_token(&mut self, token: &str) {
        self.active = true;
        self.buffer.push_str(token);
    }

    fn take(&mut self) -> String {
        self.active = false;
        std::mem::take(&mut self.buffer)
    }

    fn reset(&mut self) {
        self.active = false;
        self.buffer.clear();
    }
}

/// Routes inbound events into the transcript: opens a new assistant turn or
/// extends the one already open, and closes it on finalizing events.
///
/// The protocol carries no per-card completion signal, so every active card
/// in the open turn is marked done as soon as anything else happens in that
/// turn (next tool call, image, streamed token, or finalize). Error and
/// audio events are deliberately not on that list.
pub(crate) struct TurnAssembler {
    blocks: Vec<TranscriptBlock>,
    session: StreamSession,
    /// Index of the open assistant block, when one exists.
    open_idx: Option<usize>,
    /// Index of the streamed-text fragment within the open block.
    stream_fragment: Option<usize>,
    /// Most recent image in the open turn, carried onto the history entry
    /// when the turn closes.
    turn_image: Option<String>,
}

impl TurnAssembler {
    pub(crate) fn new() -> Self {
        Self {
            blocks: Vec::new(),
            session: StreamSession::default(),
            open_idx: None,
            stream_fragment: None,
            turn_image: None,
        }
    }

    pub(crate) fn blocks(&self) -> &[TranscriptBlock] {
        &self.blocks
    }

    pub(crate) fn has_open_turn(&self) -> bool {
        self.open_idx.is_some()
    }

    pub(crate) fn session(&self) -> &StreamSession {
        &self.session
    }

    /// Append a user submission as its own closed block. Assistant-turn
    /// state is untouched; tokens still streaming land in the turn that was
    /// already open.
    pub(crate) fn push_user(&mut self, content: &str) -> ConversationEntry {
        self.blocks.push(TranscriptBlock::closed(
            BlockKind::User,
            vec![Fragment::Text(markup::escape_html(content))],
        ));
        ConversationEntry::new(Role::User, content)
    }

    pub(crate) fn handle_tool(&mut self, tool: &str, args: &Value) {
        self.finish_active_cards();
        let card = ActivityCard::new(tool, args);
        let i = self.open_turn_index();
        self.blocks[i].fragments.push(Fragment::Card(card));
    }

    pub(crate) fn handle_image(&mut self, src: &str, alt: &str) {
        self.finish_active_cards();
        self.turn_image = Some(src.to_string());
        let i = self.open_turn_index();
        self.blocks[i].fragments.push(Fragment::Image {
            src: src.to_string(),
            alt: alt.to_string(),
        });
    }

    /// Append one streamed token and re-derive the turn's streamed text from
    /// the whole buffer. The final markup is byte-identical to compiling the
    /// finished buffer in one shot.
    pub(crate) fn handle_stream_token(&mut self, token: &str) {
        self.finish_active_cards();
        self.session.push_token(token);
        let compiled = Fragment::Text(markup::compile(self.session.buffer()));
        let i = self.open_turn_index();
        match self.stream_fragment {
            Some(f) => self.blocks[i].fragments[f] = compiled,
            None => {
                self.blocks[i].fragments.push(compiled);
                self.stream_fragment = Some(self.blocks[i].fragments.len() - 1);
            }
        }
    }

    /// Finalize the streamed turn. Without an active session this is a
    /// no-op: a stray stream_end must not close someone else's turn.
    pub(crate) fn handle_stream_end(&mut self) -> Option<ConversationEntry> {
        if !self.session.is_active() {
            return None;
        }
        self.finish_active_cards();
        let content = self.session.take();
        self.close_turn();
        let mut entry = ConversationEntry::new(Role::Assistant, content);
        entry.attached_image = self.turn_image.take();
        Some(entry)
    }

    /// Final message for the current turn: appends the compiled text to the
    /// open turn and closes it, or creates an already-closed turn when none
    /// is open.
    pub(crate) fn handle_message(&mut self, content: &str) -> ConversationEntry {
        self.finish_active_cards();
        // A final message supersedes any half-streamed buffer; the streamed
        // fragment stays visible but only the message reaches history.
        self.session.reset();
        let compiled = Fragment::Text(markup::compile(content));
        match self.open_idx {
            Some(i) => {
                self.blocks[i].fragments.push(compiled);
                self.close_turn();
            }
            None => {
                self.blocks
                    .push(TranscriptBlock::closed(BlockKind::Assistant, vec![compiled]));
            }
        }
        let mut entry = ConversationEntry::new(Role::Assistant, content);
        entry.attached_image = self.turn_image.take();
        entry
    }

    /// Rebuild a closed block from a stored conversation entry.
    pub(crate) fn push_restored(&mut self, entry: &ConversationEntry) {
        let mut fragments = Vec::new();
        match entry.role {
            Role::User => fragments.push(Fragment::Text(markup::escape_html(&entry.content))),
            Role::Assistant => {
                if let Some(src) = &entry.attached_image {
                    fragments.push(Fragment::Image {
                        src: src.clone(),
                        alt: String::new(),
                    });
                }
                fragments.push(Fragment::Text(markup::compile(&entry.content)));
            }
        }
        let kind = match entry.role {
            Role::User => BlockKind::User,
            Role::Assistant => BlockKind::Assistant,
        };
        self.blocks.push(TranscriptBlock::closed(kind, fragments));
    }

    /// Drop everything: transcript, open turn, stream session.
    pub(crate) fn clear(&mut self) {
        self.blocks.clear();
        self.session.reset();
        self.open_idx = None;
        self.stream_fragment = None;
        self.turn_image = None;
    }

    pub(crate) fn active_cards(&self) -> usize {
        self.blocks
            .iter()
            .flat_map(|b| b.fragments.iter())
            .filter(|f| matches!(f, Fragment::Card(c) if c.is_active()))
            .count()
    }

    fn open_turn_index(&mut self) -> usize {
        if let Some(i) = self.open_idx {
            return i;
        }
        self.blocks.push(TranscriptBlock::open_assistant());
        let i = self.blocks.len() - 1;
        self.open_idx = Some(i);
        self.stream_fragment = None;
        i
    }

    fn close_turn(&mut self) {
        if let Some(i) = self.open_idx.take() {
            self.blocks[i].open = false;
        }
        self.stream_fragment = None;
    }

    fn finish_active_cards(&mut self) {
        let Some(i) = self.open_idx else {
            return;
        };
        for fragment in &mut self.blocks[i].fragments {
            if let Fragment::Card(card) = fragment {
                card.finish();
            }
        }
    }
}

/// Short human-readable argument summary for an activity card.
fn args_preview(args: &Value) -> Option<String> {
    const PREVIEW_KEYS: [&str; 5] = ["task", "command", "query", "prompt", "path"];
    let text = match args {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            if map.is_empty() {
                return None;
            }
            PREVIEW_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str).map(str::to_string))
                .or_else(|| serde_json::to_string(args).ok())?
        }
        other => serde_json::to_string(other).ok()?,
    };
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(truncate(text, MAX_DETAIL_CHARS))
    }
}
