//! Append-only JSONL result log, one file per UTC day of completion.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::NaiveDate;
use tracing::{debug, error};

use super::ResultSink;
use crate::models::result::TrainingResult;
use crate::{AppError, Result};

/// Days whose files stay open at once.
const OPEN_DAYS: usize = 2;

/// Writes each [`TrainingResult`] as one JSON line to
/// `<dir>/results-YYYY-MM-DD.jsonl`, dated by the session's `end_time`.
///
/// Day files are opened lazily in append mode. A result that ends just
/// before midnight but is recorded just after still lands in the file of
/// the day it ended.
pub struct JsonlResultWriter {
    dir: PathBuf,
    open_days: Mutex<BTreeMap<NaiveDate, File>>,
}

impl JsonlResultWriter {
    /// Construct a writer that stores results in `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the directory cannot be created.
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| {
            AppError::Io(format!(
                "cannot create results directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self {
            dir,
            open_days: Mutex::new(BTreeMap::new()),
        })
    }

    /// Path of the log file for `date`.
    #[must_use]
    pub fn path_for_date(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("results-{date}.jsonl"))
    }

    /// Path of the log file `result` is appended to.
    #[must_use]
    pub fn path_for(&self, result: &TrainingResult) -> PathBuf {
        self.path_for_date(result.end_time.date_naive())
    }

    fn open_day(&self, day: NaiveDate) -> Result<File> {
        let path = self.path_for_date(day);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::Io(format!("cannot open {}: {e}", path.display())))?;
        debug!(path = %path.display(), "result log opened");
        Ok(file)
    }
}

impl ResultSink for JsonlResultWriter {
    fn record(&self, result: &TrainingResult) -> Result<()> {
        let mut line = serde_json::to_vec(result).map_err(|e| {
            AppError::Io(format!(
                "result for session {} is not serializable: {e}",
                result.session_id
            ))
        })?;
        line.push(b'\n');
        let day = result.end_time.date_naive();

        let mut open_days = self
            .open_days
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let file = match open_days.entry(day) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => slot.insert(self.open_day(day)?),
        };

        // One write per line keeps concurrent appenders from interleaving.
        if let Err(e) = file.write_all(&line) {
            error!(session_id = result.session_id, %e, "training result not persisted");
            return Err(AppError::Io(format!(
                "appending result for session {}: {e}",
                result.session_id
            )));
        }

        while open_days.len() > OPEN_DAYS {
            open_days.pop_first();
        }
        Ok(())
    }
}
