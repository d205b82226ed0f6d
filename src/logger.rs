use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::diff::diff_dps;
use crate::types::{Cid, DpMap};

pub enum MessageLogMode {
    Full,
    Diffed,
}

/// Appends one JSON object per line for every query, write and status push.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous: HashMap<Option<Cid>, DpMap>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous: HashMap::new(),
        })
    }

    pub fn log_query(&mut self, cid: Option<&Cid>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "query",
            "cid": cid,
        });
        self.write_line(&entry);
    }

    pub fn log_write(&mut self, cid: Option<&Cid>, body: &DpMap) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "write",
            "cid": cid,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_status(&mut self, cid: Option<&Cid>, body: &DpMap) {
        let entry = match self.mode {
            MessageLogMode::Full => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "status",
                "cid": cid,
                "body": body,
            }),
            MessageLogMode::Diffed => match self.previous.get_mut(&cid.cloned()) {
                None => {
                    self.previous.insert(cid.cloned(), body.clone());
                    json!({
                        "ts": Utc::now().to_rfc3339(),
                        "dir": "status",
                        "cid": cid,
                        "full": true,
                        "body": body,
                    })
                }
                Some(prev) => {
                    let changes = diff_dps(prev, body);
                    prev.extend(body.iter().map(|(k, v)| (*k, v.clone())));
                    json!({
                        "ts": Utc::now().to_rfc3339(),
                        "dir": "status",
                        "cid": cid,
                        "changes": changes,
                    })
                }
            },
        };
        self.write_line(&entry);
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write message log entry: {e}");
        }
    }
}
