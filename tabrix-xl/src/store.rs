//! Window store
//!
//! Spills row windows to temporary backing files and reloads them by id. Every backing file
//! is owned by the store: `clear` deletes them all, and dropping the store deletes whatever
//! is left.

use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tempfile::TempPath;

use crate::{Row, RowWindow, XlError, XlResult};

const SPILL_PREFIX: &str = "tabrix-window-";
const SPILL_SUFFIX: &str = ".bin";

/// Handle of a persisted window, its position in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(u32);

impl WindowId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Serialize)]
struct WindowRef<'a> {
    window: &'a RowWindow,
    rows: &'a [Row],
}

#[derive(Deserialize)]
struct WindowOwned {
    window: RowWindow,
    rows: Vec<Row>,
}

#[derive(Debug)]
struct Spilled {
    path: TempPath,
    window: RowWindow,
}

#[derive(Debug, Default)]
pub struct WindowStore {
    dir: Option<PathBuf>,
    spilled: Vec<Spilled>,
}

impl WindowStore {
    /// Backing files go to `dir`, or to the system temp dir
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            spilled: Vec::new(),
        }
    }

    /// Write a window and its rows to a fresh backing file.
    ///
    /// Nothing is recorded unless the whole batch made it to disk; a partially written file
    /// is removed.
    pub fn persist(&mut self, window: &RowWindow, rows: &[Row]) -> XlResult<WindowId> {
        let id = WindowId(self.spilled.len() as u32);

        let mut builder = tempfile::Builder::new();
        builder.prefix(SPILL_PREFIX).suffix(SPILL_SUFFIX);
        let mut file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        {
            let mut writer = BufWriter::new(&mut file);
            bincode::serialize_into(&mut writer, &WindowRef { window, rows })?;
            writer.flush()?;
        }

        let path = file.into_temp_path();
        debug!(
            "window {id}: rows {}..={} ({} rows) written to {}",
            window.min_row(),
            window.max_row(),
            rows.len(),
            path.display()
        );
        self.spilled.push(Spilled {
            path,
            window: window.clone(),
        });

        Ok(id)
    }

    /// Read a persisted window back.
    pub fn reload(&self, id: WindowId) -> XlResult<(RowWindow, Vec<Row>)> {
        let spilled = self
            .spilled
            .get(id.index())
            .ok_or_else(|| XlError::new_common_error(format!("unknown window {id}")))?;

        let reader = BufReader::new(File::open(&spilled.path)?);
        let WindowOwned { window, rows } = bincode::deserialize_from(reader)?;
        debug!(
            "window {id}: {} rows read from {}",
            rows.len(),
            spilled.path.display()
        );

        Ok((window, rows))
    }

    /// Metadata of a persisted window, without touching the disk
    pub fn window(&self, id: WindowId) -> Option<&RowWindow> {
        self.spilled.get(id.index()).map(|s| &s.window)
    }

    pub fn path(&self, id: WindowId) -> Option<&Path> {
        self.spilled.get(id.index()).map(|s| &*s.path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.spilled.iter().map(|s| &*s.path)
    }

    /// Id of the `index`-th persisted window, in persist order
    pub fn id_at(&self, index: usize) -> Option<WindowId> {
        (index < self.spilled.len()).then_some(WindowId(index as u32))
    }

    pub fn len(&self) -> usize {
        self.spilled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spilled.is_empty()
    }

    /// Delete every backing file. Failures are logged and skipped.
    pub fn clear(&mut self) {
        for (i, spilled) in self.spilled.drain(..).enumerate() {
            let display = spilled.path.display().to_string();
            match spilled.path.close() {
                Ok(()) => debug!("window #{i}: deleted {display}"),
                Err(e) => warn!("window #{i}: failed to delete {display}: {e}"),
            }
        }
    }
}
