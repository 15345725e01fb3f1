use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, TryRecvError};

use super::{App, Inbound, Notice};
use crate::transport;

/// Drive the engine until the user quits or both channels close. Events are
/// drained in batches; the document is rewritten once per tick at most.
pub(crate) fn run_app(
    session_id: String,
    out_path: PathBuf,
    inbound: Receiver<Inbound>,
    input: Receiver<String>,
    mut writer: Box<dyn Write + Send>,
) -> Result<()> {
    const ACTIVE_POLL_MS: u64 = 33;
    const IDLE_POLL_MS: u64 = 100;
    const MAX_EVENTS_PER_TICK: u32 = 64;

    let mut app = App::new(session_id, out_path);
    let mut inbound_open = true;
    let mut input_open = true;

    loop {
        let mut drained: u32 = 0;
        while inbound_open && drained < MAX_EVENTS_PER_TICK {
            match inbound.try_recv() {
                Ok(event) => {
                    app.apply_inbound(event);
                    drained += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    inbound_open = false;
                    app.handle_disconnect();
                }
            }
        }

        while input_open {
            match input.try_recv() {
                Ok(line) => {
                    if let Some(outgoing) = app.submit_line(&line) {
                        if let Err(err) = transport::send_outgoing(writer.as_mut(), &outgoing) {
                            app.push_notice(Notice::error(format!("send failed: {err:#}")));
                        }
                    }
                }
                Err(TryRecvError::Empty) => break,
                // Input going away is not a reason to quit: a replayed
                // session may still be delivering events.
                Err(TryRecvError::Disconnected) => {
                    input_open = false;
                }
            }
        }

        if app.dirty {
            if let Err(err) = app.render_document() {
                app.push_notice(Notice::error(format!("document write failed: {err:#}")));
                app.last_status = "document write failed".to_string();
            }
            // push_notice re-marks dirty; clear it so a broken output path
            // does not spin the loop. The notice renders once writes recover.
            app.dirty = false;
        }
        if app.should_quit || (!inbound_open && !input_open) {
            break;
        }

        let timeout = if app.is_busy() {
            Duration::from_millis(ACTIVE_POLL_MS)
        } else {
            Duration::from_millis(IDLE_POLL_MS)
        };
        thread::sleep(timeout);
    }

    app.render_document().context("write transcript document")?;
    Ok(())
}
