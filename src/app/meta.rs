//! Display metadata for tool and agent activity keys.
//!
//! Lookup is total: an unknown key falls back to labels derived from the key
//! itself, so every activity card renders something sensible.

const AGENT_KEY_PREFIX: &str = "agent:";
const DEFAULT_TOOL_ICON: &str = "🔧";
const AGENT_ICON: &str = "✨";
const AGENT_COLOR: &str = "violet";
const DEFAULT_COLOR: &str = "slate";

#[derive(Clone, Debug)]
pub(crate) struct ToolMeta {
    pub(crate) icon: &'static str,
    pub(crate) idle_label: String,
    pub(crate) active_label: String,
    pub(crate) color: &'static str,
}

fn meta(
    icon: &'static str,
    active_label: &str,
    idle_label: &str,
    color: &'static str,
) -> ToolMeta {
    ToolMeta {
        icon,
        idle_label: idle_label.to_string(),
        active_label: active_label.to_string(),
        color,
    }
}

/// Resolve an activity key to display metadata.
///
/// `agent:<name>` keys resolve against the agent table. A `<agent>:<tool>`
/// key resolves the part after the delimiter against the tool table. Plain
/// keys resolve directly; anything unknown gets the derived fallback.
pub(crate) fn lookup(key: &str) -> ToolMeta {
    if let Some(name) = key.strip_prefix(AGENT_KEY_PREFIX) {
        return agent_meta(name);
    }
    if let Some((_, tool)) = key.split_once(':') {
        return tool_meta(tool).unwrap_or_else(|| fallback_meta(tool));
    }
    tool_meta(key).unwrap_or_else(|| fallback_meta(key))
}

fn agent_meta(name: &str) -> ToolMeta {
    match name {
        "general" => meta(AGENT_ICON, "Thinking it through...", "General agent responded", AGENT_COLOR),
        "coding" => meta("⌨", "Writing code...", "Coding agent responded", AGENT_COLOR),
        "research" => meta("🔎", "Researching sources...", "Research agent responded", AGENT_COLOR),
        "image_prompt" => meta("🎨", "Shaping the image prompt...", "Image prompt ready", AGENT_COLOR),
        _ => ToolMeta {
            icon: AGENT_ICON,
            idle_label: format!("{name} responded"),
            active_label: format!("{name} is working..."),
            color: AGENT_COLOR,
        },
    }
}

fn tool_meta(name: &str) -> Option<ToolMeta> {
    match name {
        "web_browse" => Some(meta("🌐", "Browsing the web...", "Browsed the web", "blue")),
        "web_fetch" => Some(meta("📡", "Fetching a page...", "Fetched page content", "blue")),
        "file_manager" => Some(meta("📁", "Working with files...", "File operation finished", "amber")),
        "image_generation" => Some(meta("🎨", "Generating an image...", "Image generated", "violet")),
        "screenshot" => Some(meta("📸", "Taking a screenshot...", "Screenshot captured", "violet")),
        "system_command" => Some(meta("⚙", "Running a system command...", "Command finished", "rose")),
        "clipboard" => Some(meta("📋", "Reading the clipboard...", "Clipboard accessed", "slate")),
        "calculator" => Some(meta("🔢", "Crunching numbers...", "Calculation done", "green")),
        "calendar_manager" => Some(meta("📅", "Checking the calendar...", "Calendar updated", "green")),
        "task_scheduler" => Some(meta("⏰", "Scheduling a task...", "Task scheduled", "green")),
        "memory_manager" => Some(meta("🧠", "Updating memory...", "Memory updated", "cyan")),
        "project_manager" => Some(meta("🗂", "Organizing projects...", "Projects updated", "cyan")),
        "pdf_reader" => Some(meta("📕", "Reading a PDF...", "PDF read", "amber")),
        "batch_script" => Some(meta("📜", "Running a batch script...", "Script finished", "rose")),
        "webhook_manager" => Some(meta("🔗", "Managing webhooks...", "Webhooks updated", "blue")),
        "automation_manager" => Some(meta("⚡", "Running an automation...", "Automation finished", "amber")),
        "agent_manager" => Some(meta("🤖", "Coordinating agents...", "Agents coordinated", "violet")),
        "n8n" => Some(meta("🧩", "Triggering an n8n flow...", "n8n flow triggered", "blue")),
        _ => None,
    }
}

fn fallback_meta(key: &str) -> ToolMeta {
    let label = humanize(key);
    ToolMeta {
        icon: DEFAULT_TOOL_ICON,
        idle_label: label.clone(),
        active_label: format!("{label}..."),
        color: DEFAULT_COLOR,
    }
}

fn humanize(key: &str) -> String {
    let label = key.trim().replace('_', " ");
    if label.is_empty() {
        "tool".to_string()
    } else {
        label
    }
}
