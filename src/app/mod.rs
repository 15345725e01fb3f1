use std::collections::VecDeque;
use std::path::PathBuf;

use anyhow::Result;

use crate::history::{HistoryStore, SessionPreview};
use crate::truncate;

mod meta;
mod render;
mod runtime;
mod turn;
mod types;

pub(crate) use runtime::run_app;
pub(crate) use types::{
    ConversationEntry, Inbound, Notice, NoticeKind, Outgoing, Role, ServerEvent,
};
use turn::TurnAssembler;

const MAX_NOTICES: usize = 7;
const STATUS_PREVIEW_CHARS: usize = 48;
const ERROR_PREVIEW_CHARS: usize = 80;

pub(crate) struct App {
    assembler: TurnAssembler,
    history: Vec<ConversationEntry>,
    notices: VecDeque<Notice>,
    sessions: Vec<SessionPreview>,

    awaiting_reply: bool,
    should_quit: bool,
    /// Set whenever display state changed; the loop rewrites the document
    /// once per tick at most.
    dirty: bool,
    last_status: String,

    session_id: String,
    store: Option<HistoryStore>,
    out_path: PathBuf,

    agent: Option<String>,
    tts: bool,
    pending_image: Option<String>,
}

impl App {
    pub(crate) fn new(session_id: String, out_path: PathBuf) -> Self {
        let store = if cfg!(test) {
            None
        } else {
            HistoryStore::open_default().ok()
        };
        let mut app = Self {
            assembler: TurnAssembler::new(),
            history: Vec::new(),
            notices: VecDeque::new(),
            sessions: Vec::new(),
            awaiting_reply: false,
            should_quit: false,
            dirty: true,
            last_status: "ready".to_string(),
            session_id,
            store,
            out_path,
            agent: None,
            tts: false,
            pending_image: None,
        };
        app.restore_history();
        app.refresh_sessions();
        app
    }

    fn restore_history(&mut self) {
        let Some(store) = &self.store else {
            return;
        };
        match store.load_session(&self.session_id) {
            Ok(entries) => {
                for entry in &entries {
                    self.assembler.push_restored(entry);
                }
                if !entries.is_empty() {
                    self.last_status = "resumed previous session".to_string();
                }
                self.history = entries;
            }
            Err(err) => {
                let text = truncate(&err.to_string(), ERROR_PREVIEW_CHARS);
                self.push_notice(Notice::error(format!("history load failed: {text}")));
            }
        }
    }

    /// Route one channel payload into the engine. Any inbound traffic means
    /// the backend is answering, so the typing indicator goes away.
    pub(crate) fn apply_inbound(&mut self, inbound: Inbound) {
        self.awaiting_reply = false;
        self.dirty = true;
        match inbound {
            Inbound::Server(event) => self.apply_server_event(event),
            Inbound::Malformed(line) => {
                let preview = truncate(line.trim(), ERROR_PREVIEW_CHARS);
                self.push_notice(Notice::error(format!("ignored malformed event: {preview}")));
                self.last_status = "protocol noise ignored".to_string();
            }
        }
    }

    fn apply_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Message { content } => {
                let entry = self.assembler.handle_message(&content);
                self.push_history(entry);
                self.last_status = "reply received".to_string();
            }
            ServerEvent::Stream { token } => {
                self.assembler.handle_stream_token(&token);
                self.last_status = "streaming".to_string();
            }
            ServerEvent::StreamEnd => {
                if let Some(entry) = self.assembler.handle_stream_end() {
                    self.push_history(entry);
                    self.last_status = "reply complete".to_string();
                }
            }
            ServerEvent::Image { src, alt } => {
                self.assembler.handle_image(&src, &alt);
                self.last_status = "image received".to_string();
            }
            ServerEvent::ToolCall { tool, args } => {
                self.assembler.handle_tool(&tool, &args);
                self.last_status = format!("tool: {}", truncate(&tool, STATUS_PREVIEW_CHARS));
            }
            ServerEvent::Error { content } => {
                self.push_notice(Notice::error(content));
                self.last_status = "server error".to_string();
            }
            ServerEvent::Audio { src } => {
                self.push_notice(Notice::info(format!("audio ready: {src}")));
                self.last_status = "audio ready".to_string();
            }
        }
    }

    /// True while a reply is pending, a stream is open, or cards are active.
    /// Busy ticks poll faster so streamed tokens land promptly.
    fn is_busy(&self) -> bool {
        self.awaiting_reply
            || self.assembler.session().is_active()
            || self.assembler.active_cards() > 0
    }

    /// Handle one line of user input. Returns the record to put on the wire
    /// when the line is an actual message rather than a local command.
    pub(crate) fn submit_line(&mut self, line: &str) -> Option<Outgoing> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        self.dirty = true;
        if let Some(command) = line.strip_prefix('/') {
            self.run_command(command);
            return None;
        }
        Some(self.submit_message(line))
    }

    fn run_command(&mut self, command: &str) {
        let mut parts = command.split_whitespace();
        match parts.next().unwrap_or("") {
            "quit" | "exit" => {
                self.should_quit = true;
            }
            "clear" => self.clear_conversation(),
            "agent" => match parts.next() {
                Some(name) => {
                    self.last_status = format!("agent -> {name}");
                    self.agent = Some(name.to_string());
                }
                None => {
                    self.agent = None;
                    self.last_status = "agent -> auto".to_string();
                }
            },
            "tts" => {
                let on = matches!(parts.next(), Some("on" | "1" | "true"));
                self.tts = on;
                self.last_status = if on { "tts on" } else { "tts off" }.to_string();
            }
            "attach" => match parts.next() {
                Some(reference) => {
                    self.pending_image = Some(reference.to_string());
                    self.last_status = "image attached to next message".to_string();
                }
                None => {
                    self.pending_image = None;
                    self.last_status = "attachment cleared".to_string();
                }
            },
            "help" => self.push_notice(Notice::info(
                "commands: /agent <name> | /tts on|off | /attach <ref> | /clear | /quit",
            )),
            other => self.push_notice(Notice::error(format!("unknown command: /{other}"))),
        }
    }

    fn submit_message(&mut self, text: &str) -> Outgoing {
        let entry = self.assembler.push_user(text);
        let first_user = !self.history.iter().any(|e| e.role == Role::User);
        self.push_history(entry);
        if first_user {
            self.refresh_sessions();
        }
        self.awaiting_reply = true;
        self.last_status = "waiting for reply".to_string();
        Outgoing {
            message: text.to_string(),
            image: self.pending_image.take(),
            agent: self.agent.clone(),
            tts: self.tts.then_some(true),
        }
    }

    fn clear_conversation(&mut self) {
        self.assembler.clear();
        self.history.clear();
        self.notices.clear();
        self.awaiting_reply = false;
        if let Some(store) = &self.store {
            if let Err(err) = store.clear_session(&self.session_id) {
                let text = truncate(&err.to_string(), ERROR_PREVIEW_CHARS);
                self.push_notice(Notice::error(format!("history clear failed: {text}")));
            }
        }
        self.refresh_sessions();
        self.last_status = "conversation cleared".to_string();
    }

    fn push_history(&mut self, entry: ConversationEntry) {
        if let Some(store) = &self.store {
            if let Err(err) = store.append_entry(&self.session_id, &entry) {
                let text = truncate(&err.to_string(), ERROR_PREVIEW_CHARS);
                self.push_notice(Notice::error(format!("history write failed: {text}")));
            }
        }
        self.history.push(entry);
    }

    pub(crate) fn push_notice(&mut self, notice: Notice) {
        self.notices.push_back(notice);
        while self.notices.len() > MAX_NOTICES {
            self.notices.pop_front();
        }
        self.dirty = true;
    }

    fn refresh_sessions(&mut self) {
        self.sessions = self
            .store
            .as_ref()
            .and_then(|store| store.session_previews().ok())
            .unwrap_or_default();
    }

    /// The inbound channel closed. Whatever was mid-stream is finalized so
    /// the partial reply survives into history.
    pub(crate) fn handle_disconnect(&mut self) {
        if let Some(entry) = self.assembler.handle_stream_end() {
            self.push_history(entry);
        }
        self.awaiting_reply = false;
        self.push_notice(Notice::info("server closed the connection"));
        self.last_status = "disconnected".to_string();
    }

    pub(crate) fn render_document(&self) -> Result<()> {
        let html = render::document(self);
        render::write_document(&self.out_path, &html)
    }
}
