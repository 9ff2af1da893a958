//! Append-only history log, one text line per record.
//!
//! The log rides on the dataset's `history` item through the sequential
//! text operations of the item store. Reading history back is deliberately
//! unsupported here; downstream tools treat it as a write-only audit trail.

use crate::dataset::Dataset;
use crate::error::Result;
use crate::item::{Item, ItemMode};

const HISTORY_ITEM: &str = "history";

/// Open session on a dataset's history item.
pub struct History {
    item: Item,
}

impl Dataset {
    /// Open the history log. `ItemMode::Append` is the conventional choice;
    /// `Write` truncates any existing log.
    pub fn open_history(&self, mode: ItemMode) -> Result<History> {
        let item = self.access(HISTORY_ITEM, mode)?;
        Ok(History { item })
    }
}

impl History {
    /// Append one newline-terminated record.
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        self.item.write_line(text)
    }

    /// Log a task invocation in the conventional form: an execution stamp
    /// followed by one line per argument, each prefixed with the task name.
    pub fn log_invocation(&mut self, task: &str, args: &[String]) -> Result<()> {
        let task = task.to_uppercase();
        let now = chrono::Utc::now();
        // Tenth-of-a-second precision; chrono's %.Nf only goes 3/6/9.
        let tenths = now.timestamp_subsec_millis() / 100;
        let stamp = format!("{}.{tenths}", now.format("%y%b%d:%H:%M:%S"));
        self.write_line(&format!("{task}: Executed on: {stamp}"))?;
        if !args.is_empty() {
            self.write_line(&format!("{task}: Command line inputs follow:"))?;
            for arg in args {
                self.write_line(&format!("{task}:   {arg}"))?;
            }
        }
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        self.item.close()
    }
}
