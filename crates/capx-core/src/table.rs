//! Record-table codec over capsule payloads
//!
//! A table is rows of cells: cells joined by the 4-byte ` || ` separator,
//! rows joined by a newline, with a trailing newline on any non-empty
//! table. Separators are disjoint from cell content by convention only:
//! no escaping is performed, and a cell containing a separator corrupts
//! parsing. Accepted limitation.
//!
//! Two access patterns share the encoding:
//!
//! - **Log table**: insertion prepends (row 0 is always the newest row);
//!   deletion happens only through age-based purging.
//! - **Keyed table**: the first cell is a unique key with upsert
//!   semantics; row order is whatever is on disk.
//!
//! Every mutating operation is a full read-modify-write over the whole
//! table and persists through the mirrored writer; a table is never
//! durable until both copies are written.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::store::CapsuleStore;
use crate::Result;

/// Cell separator: space, pipe, pipe, space.
pub const CELL_SEPARATOR: &[u8] = b" || ";

/// Row separator: a single newline byte.
pub const ROW_SEPARATOR: u8 = b'\n';

/// Log rows are padded up to this many cells on read.
pub const MIN_LOG_CELLS: usize = 4;

/// Fixed textual timestamp format for log-row first cells.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One table row: an ordered sequence of raw byte cells.
pub type Row = Vec<Vec<u8>>;

/// Split raw payload into rows, dropping empty and whitespace-only rows.
#[must_use]
pub fn split_rows(raw: &[u8]) -> Vec<&[u8]> {
    raw.split(|b| *b == ROW_SEPARATOR)
        .filter(|row| !row.iter().all(u8::is_ascii_whitespace))
        .collect()
}

/// Split one row into cells on the cell separator.
#[must_use]
pub fn split_cells(row: &[u8]) -> Row {
    let mut cells = Vec::new();
    let mut start = 0;
    for hit in memchr::memmem::find_iter(row, CELL_SEPARATOR) {
        cells.push(row[start..hit].to_vec());
        start = hit + CELL_SEPARATOR.len();
    }
    cells.push(row[start..].to_vec());
    cells
}

/// Join cells into one encoded row.
#[must_use]
pub fn join_cells(cells: &[Vec<u8>]) -> Vec<u8> {
    let mut row = Vec::new();
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            row.extend_from_slice(CELL_SEPARATOR);
        }
        row.extend_from_slice(cell);
    }
    row
}

/// Join encoded rows into a full payload. Non-empty payloads always end
/// with the row separator.
#[must_use]
pub fn join_rows(rows: &[Vec<u8>]) -> Vec<u8> {
    if rows.is_empty() {
        return Vec::new();
    }
    let mut payload = Vec::new();
    for row in rows {
        payload.extend_from_slice(row);
        payload.push(ROW_SEPARATOR);
    }
    payload
}

/// Parse a first-cell timestamp. `None` means the row is unparsable and
/// must be kept by the purge (fail-safe rule).
#[must_use]
pub fn parse_row_timestamp(cell: &[u8]) -> Option<DateTime<Utc>> {
    let text = std::str::from_utf8(cell).ok()?;
    let naive = NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Encode the current UTC time as a log-row first cell.
#[must_use]
pub fn now_cell() -> Vec<u8> {
    Utc::now().format(TIMESTAMP_FORMAT).to_string().into_bytes()
}

impl CapsuleStore {
    /// Read a log table. Rows come back newest-first (on-disk order), each
    /// padded with empty cells up to [`MIN_LOG_CELLS`].
    pub fn read_log(&self, table: &str) -> Result<Vec<Row>> {
        let capsule = self.load_capsule(table)?;
        let mut out = Vec::new();
        for row in split_rows(capsule.payload()) {
            let mut cells = split_cells(row);
            while cells.len() < MIN_LOG_CELLS {
                cells.push(Vec::new());
            }
            out.push(cells);
        }
        Ok(out)
    }

    /// Prepend a row to a log table and rewrite it. Row 0 being the most
    /// recent insert is a hard invariant consumers rely on.
    pub fn insert_log_row(&self, table: &str, cells: &[Vec<u8>]) -> Result<()> {
        let capsule = self.load_capsule(table)?;
        let mut rows: Vec<Vec<u8>> = split_rows(capsule.payload())
            .into_iter()
            .map(<[u8]>::to_vec)
            .collect();
        rows.insert(0, join_cells(cells));
        self.rewrite(table, &join_rows(&rows))
    }

    /// Drop log rows older than `max_age_secs`, judged by the first cell's
    /// timestamp. Rows whose first cell does not parse are kept; a
    /// parsing bug must never silently discard data.
    pub fn purge_older_than(&self, table: &str, max_age_secs: u64) -> Result<usize> {
        self.purge_older_than_at(table, max_age_secs, Utc::now())
    }

    /// Purge against an explicit "now", for deterministic tests.
    pub fn purge_older_than_at(
        &self,
        table: &str,
        max_age_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let capsule = self.load_capsule(table)?;
        let rows = split_rows(capsule.payload());
        let before = rows.len();

        // Ages beyond i64 seconds saturate: nothing is ever that stale.
        let max_age = i64::try_from(max_age_secs).unwrap_or(i64::MAX);
        let mut keep: Vec<Vec<u8>> = Vec::with_capacity(before);
        for row in rows {
            let cells = split_cells(row);
            match cells.first().and_then(|c| parse_row_timestamp(c)) {
                Some(ts) => {
                    let age = now.signed_duration_since(ts).num_seconds();
                    if age <= max_age {
                        keep.push(row.to_vec());
                    }
                }
                // Fail-safe: unparsable rows are never dropped.
                None => keep.push(row.to_vec()),
            }
        }

        let dropped = before - keep.len();
        self.rewrite(table, &join_rows(&keep))?;
        Ok(dropped)
    }

    /// Read a keyed table: same physical decode as a log, keyed semantics,
    /// no cell padding, on-disk order.
    pub fn read_keyed(&self, table: &str) -> Result<Vec<Row>> {
        let capsule = self.load_capsule(table)?;
        Ok(split_rows(capsule.payload())
            .into_iter()
            .map(split_cells)
            .collect())
    }

    /// Update-or-insert by first-cell key. The first matching row is
    /// replaced in place with `[key] + values`; later duplicate keys are
    /// left unmodified (scan-once rule). No match appends at the end.
    pub fn upsert_keyed(&self, table: &str, key: &[u8], values: &[Vec<u8>]) -> Result<()> {
        let capsule = self.load_capsule(table)?;
        let mut rows: Vec<Vec<u8>> = split_rows(capsule.payload())
            .into_iter()
            .map(<[u8]>::to_vec)
            .collect();

        let mut replacement = Vec::with_capacity(values.len() + 1);
        replacement.push(key.to_vec());
        replacement.extend(values.iter().cloned());
        let encoded = join_cells(&replacement);

        let hit = rows
            .iter()
            .position(|row| split_cells(row).first().is_some_and(|c| c == key));
        match hit {
            Some(i) => rows[i] = encoded,
            None => rows.push(encoded),
        }
        self.rewrite(table, &join_rows(&rows))
    }

    /// Rows whose first cell starts with `prefix`, byte-wise and
    /// case-sensitive.
    pub fn find_by_prefix(&self, table: &str, prefix: &[u8]) -> Result<Vec<Row>> {
        Ok(self
            .read_keyed(table)?
            .into_iter()
            .filter(|row| row.first().is_some_and(|c| c.starts_with(prefix)))
            .collect())
    }
}
