// ===============================
// src/recorder.rs
// ===============================
//
// Journal JSONL:
// - `EventSink` adalah handle murah (clone) yang dipegang setiap task ticker.
// - `run` menulis tiap Event ke file .jsonl (append) via BufWriter,
//   flush tiap 1s dan tiap 1000 event.
//
// ENV: set `RECORD_FILE=/path/to/events.jsonl` agar aktif.
//
use std::path::Path;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

/// Fire-and-forget handle; a full or missing channel drops the event.
#[derive(Clone, Default)]
pub struct EventSink(Option<mpsc::Sender<Event>>);

impl EventSink {
    pub fn new(tx: mpsc::Sender<Event>) -> Self { Self(Some(tx)) }

    pub fn disabled() -> Self { Self(None) }

    pub fn emit(&self, ev: Event) {
        if let Some(tx) = &self.0 {
            let _ = tx.try_send(ev);
        }
    }
}

async fn open_writer(path: &str) -> std::io::Result<BufWriter<fs::File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(?e, %path, "recorder: open failed, journal disabled");
            return;
        }
    };
    info!(%path, "recorder: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    break;
                };
                let mut line = match serde_json::to_string(&ev) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(?e, "recorder: serialize error, skip event");
                        continue;
                    }
                };
                line.push('\n');

                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    error!(?e, "recorder: write failed, attempting reopen");
                    match open_writer(&path).await {
                        Ok(w) => {
                            writer = w;
                            if let Err(e2) = writer.write_all(line.as_bytes()).await {
                                error!(?e2, "recorder: write failed again after reopen, drop event");
                                continue;
                            }
                        }
                        Err(e2) => {
                            error!(?e2, "recorder: reopen failed, drop event");
                            continue;
                        }
                    }
                }

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_one_json_line_per_event() {
        let path = std::env::temp_dir()
            .join(format!("lot_ladder_journal_{}", std::process::id()))
            .join("events.jsonl");
        let path_s = path.to_string_lossy().to_string();
        let _ = std::fs::remove_file(&path);

        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run(rx, path_s.clone()));
        let sink = EventSink::new(tx);
        sink.emit(Event::Note("start".into()));
        sink.emit(Event::Cancel { id: "CL-1".into(), symbol: "BA".into() });
        drop(sink);
        task.await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"Cancel\""));
    }

    #[test]
    fn disabled_sink_is_silent() {
        EventSink::disabled().emit(Event::Note("dropped".into()));
    }
}
