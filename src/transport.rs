use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::app::{Inbound, Outgoing, ServerEvent};

/// Connect to the backend and start a reader thread for its event stream.
/// Returns the inbound channel plus the write half for outgoing records.
pub(crate) fn connect(addr: &str) -> Result<(Receiver<Inbound>, Box<dyn Write + Send>)> {
    let stream = TcpStream::connect(addr).with_context(|| format!("connect to {addr}"))?;
    let read_half = stream.try_clone().context("clone stream for reader")?;

    let (tx, rx) = unbounded();
    spawn_reader(BufReader::new(read_half), tx);
    Ok((rx, Box::new(stream)))
}

/// Feed a recorded event log through the same pipeline as a live connection.
/// Outgoing records go nowhere.
pub(crate) fn replay(path: &Path) -> Result<(Receiver<Inbound>, Box<dyn Write + Send>)> {
    let file = File::open(path).with_context(|| format!("open replay file {}", path.display()))?;

    let (tx, rx) = unbounded();
    spawn_reader(BufReader::new(file), tx);
    Ok((rx, Box::new(std::io::sink())))
}

/// Read protocol lines until EOF or error, parsing each into a typed event.
/// A line that fails to parse is forwarded as malformed rather than dropped;
/// the channel closing is the end-of-stream signal.
fn spawn_reader<R: Read + Send + 'static>(reader: BufReader<R>, tx: Sender<Inbound>) {
    thread::spawn(move || {
        for line in reader.lines() {
            let Ok(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            let inbound = match parse_event_line(&line) {
                Some(event) => Inbound::Server(event),
                None => Inbound::Malformed(line),
            };
            if tx.send(inbound).is_err() {
                break;
            }
        }
    });
}

pub(crate) fn parse_event_line(line: &str) -> Option<ServerEvent> {
    serde_json::from_str(line).ok()
}

/// Forward stdin lines to the main loop; the channel closes at EOF.
pub(crate) fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

pub(crate) fn send_outgoing(writer: &mut dyn Write, outgoing: &Outgoing) -> Result<()> {
    let line = serde_json::to_string(outgoing).context("encode outgoing record")?;
    writer.write_all(line.as_bytes()).context("write outgoing record")?;
    writer.write_all(b"\n").context("write record terminator")?;
    writer.flush().context("flush outgoing record")
}
