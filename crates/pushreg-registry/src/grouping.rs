//! Group-by over a stream of rows sorted by token hash, consumed in pages.
//!
//! A full page may end in the middle of a group. The trailing run of rows that
//! share the page's last hash stays *open* and is prepended to the next page;
//! every other run is closed and handed out. A short page means end of data,
//! so nothing is held back.

use crate::record::{DeviceRecord, TokenHash};

/// Carry-over state between page fetches.
#[derive(Debug, Default)]
pub struct GroupAccumulator {
    open: Vec<DeviceRecord>,
}

impl GroupAccumulator {
    /// Start with no open group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash of the currently open group.
    pub fn open_key(&self) -> Option<&TokenHash> {
        self.open.first().and_then(|r| r.token_hash.as_ref())
    }

    /// Rows currently carried.
    pub fn open_len(&self) -> usize {
        self.open.len()
    }

    /// Feed the next page. `full` is true when the page returned as many rows
    /// as were requested, i.e. more rows may follow.
    ///
    /// Returns the duplicate groups (two or more rows) that are now closed.
    pub fn push_page(&mut self, page: Vec<DeviceRecord>, full: bool) -> Vec<Vec<DeviceRecord>> {
        let mut combined = std::mem::take(&mut self.open);
        combined.extend(page.into_iter().filter(|r| r.token_hash.is_some()));

        if full {
            let split = trailing_run_start(&combined);
            self.open = combined.split_off(split);
        }
        duplicate_groups(combined)
    }

    /// End of data: close whatever is still open.
    pub fn finish(&mut self) -> Vec<Vec<DeviceRecord>> {
        duplicate_groups(std::mem::take(&mut self.open))
    }
}

fn trailing_run_start(rows: &[DeviceRecord]) -> usize {
    let Some(last) = rows.last().and_then(|r| r.token_hash.as_ref()) else {
        return rows.len();
    };
    let run = rows
        .iter()
        .rev()
        .take_while(|r| r.token_hash.as_ref() == Some(last))
        .count();
    rows.len() - run
}

/// Splits hash-ordered rows into runs of equal hash, keeping runs of two or more.
pub fn duplicate_groups(rows: Vec<DeviceRecord>) -> Vec<Vec<DeviceRecord>> {
    let mut groups = Vec::new();
    let mut current: Vec<DeviceRecord> = Vec::new();
    for row in rows {
        if row.token_hash.is_none() {
            continue;
        }
        if current.first().map(|r| &r.token_hash) != Some(&row.token_hash) {
            if current.len() > 1 {
                groups.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
        current.push(row);
    }
    if current.len() > 1 {
        groups.push(current);
    }
    groups
}
