use std::path::PathBuf;

use anyhow::Result;

mod app;
mod history;
mod markup;
mod transport;

const APP_VERSION: &str = "0.3.0";
const DEFAULT_ADDR: &str = "127.0.0.1:8765";
const DEFAULT_SESSION: &str = "default";

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let mut replay: Option<PathBuf> = None;
    if args.len() > 1 {
        match args[1].as_str() {
            "--version" | "-v" => {
                println!("confab {}", APP_VERSION);
                return Ok(());
            }
            "--replay" => match args.get(2) {
                Some(path) => replay = Some(PathBuf::from(path)),
                None => {
                    eprintln!("--replay needs a file path");
                    std::process::exit(2);
                }
            },
            unknown => {
                eprintln!("unknown argument: {}", unknown);
                std::process::exit(2);
            }
        }
    }

    let (inbound, writer) = match &replay {
        Some(path) => transport::replay(path)?,
        None => transport::connect(&server_addr())?,
    };
    let input = transport::spawn_stdin_reader();
    app::run_app(session_id(), document_path(), inbound, input, writer)
}

fn server_addr() -> String {
    match std::env::var("CONFAB_ADDR") {
        Ok(addr) if !addr.trim().is_empty() => addr.trim().to_string(),
        _ => DEFAULT_ADDR.to_string(),
    }
}

fn session_id() -> String {
    match std::env::var("CONFAB_SESSION") {
        Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => DEFAULT_SESSION.to_string(),
    }
}

fn document_path() -> PathBuf {
    if let Ok(path) = std::env::var("CONFAB_OUT") {
        if !path.trim().is_empty() {
            return PathBuf::from(path.trim());
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".confab").join("transcript.html")
}

fn truncate(s: &str, n: usize) -> String {
    match s.char_indices().nth(n) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
