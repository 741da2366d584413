// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-channel record of which downloads have completed.
//!
//! Each channel directory holds one ledger file keyed by episode guid. An
//! absent guid means the episode was never attempted. Flags only ever go
//! from `false` to `true`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// File name of the ledger inside a channel directory
pub const LEDGER_FILENAME: &str = "poddy.meta";

/// The kinds of downloads tracked per episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Enclosure,
    Shownotes,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Enclosure => f.write_str("enclosure"),
            TaskKind::Shownotes => f.write_str("shownotes"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolStamp {
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Episode title, kept for humans reading the file
    pub title: String,
    pub enclosure_downloaded: bool,
    pub shownotes_downloaded: bool,
}

impl LedgerEntry {
    fn is_done(&self, kind: TaskKind) -> bool {
        match kind {
            TaskKind::Enclosure => self.enclosure_downloaded,
            TaskKind::Shownotes => self.shownotes_downloaded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    pub tool: ToolStamp,
    pub episodes: BTreeMap<String, LedgerEntry>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            tool: ToolStamp {
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            episodes: BTreeMap::new(),
        }
    }
}

impl Ledger {
    /// Path of the ledger file for a channel directory
    pub fn path(directory: &Path) -> PathBuf {
        directory.join(LEDGER_FILENAME)
    }

    /// Load the ledger for a directory, creating an empty one if none exists
    ///
    /// An existing file that cannot be parsed is reported as
    /// [`LedgerError::Corrupt`] and left untouched.
    pub fn open(directory: &Path) -> Result<Self, LedgerError> {
        let path = Self::path(directory);

        if !path.exists() {
            let ledger = Self::default();
            ledger.persist(directory)?;
            return Ok(ledger);
        }

        let content = std::fs::read_to_string(&path).map_err(|e| LedgerError::ReadFailed {
            path: path.clone(),
            source: e,
        })?;

        serde_json::from_str(&content).map_err(|e| LedgerError::Corrupt { path, source: e })
    }

    pub fn entry(&self, guid: &str) -> Option<&LedgerEntry> {
        self.episodes.get(guid)
    }

    /// True only if `kind` has been recorded as done for `guid`
    pub fn is_done(&self, guid: &str, kind: TaskKind) -> bool {
        self.entry(guid).is_some_and(|entry| entry.is_done(kind))
    }

    /// Merge completed kinds into the entry for `guid`, creating it if needed
    ///
    /// Flags already set stay set.
    pub fn mark_done(&mut self, guid: &str, title: &str, kinds: &[TaskKind]) {
        let entry = self
            .episodes
            .entry(guid.to_string())
            .or_insert_with(|| LedgerEntry {
                title: title.to_string(),
                enclosure_downloaded: false,
                shownotes_downloaded: false,
            });

        for kind in kinds {
            match kind {
                TaskKind::Enclosure => entry.enclosure_downloaded = true,
                TaskKind::Shownotes => entry.shownotes_downloaded = true,
            }
        }
    }

    /// Write the ledger to its directory, replacing the previous file
    ///
    /// The content goes to a sibling temp file first and is renamed over the
    /// ledger, so readers never observe a half-written file.
    pub fn persist(&self, directory: &Path) -> Result<(), LedgerError> {
        let path = Self::path(directory);
        let tmp_path = directory.join(format!("{LEDGER_FILENAME}.tmp"));

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp_path, json).map_err(|e| LedgerError::WriteFailed {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &path).map_err(|e| LedgerError::WriteFailed { path, source: e })
    }
}
