// cbufdump/src/lib.rs
//
// Decoding of debug-log files written by the driver: either the ordered
// `cbuf_save` output or a raw ring image pulled from memory.

use spl::{ordered_segments, END_MARKER};

// ═══════════════════════════════════════════════════════════════════════════════
// Ring Images
// ═══════════════════════════════════════════════════════════════════════════════

/// Where the newest entry ends in a raw ring image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub offset: usize,
    /// More than one marker was a plausible cursor
    pub ambiguous: bool,
}

/// Locate the end marker the driver wrote last.
///
/// Log text may itself contain the marker bytes, so a marker at offset 0
/// or right after a line terminator is preferred over one in mid-line.
/// Among equally plausible markers the last one wins and the result is
/// flagged as ambiguous.
pub fn find_cursor(image: &[u8]) -> Option<Cursor> {
    let markers: Vec<usize> = image
        .windows(END_MARKER.len())
        .enumerate()
        .filter(|(_, window)| *window == END_MARKER)
        .map(|(offset, _)| offset)
        .collect();
    let at_line_start: Vec<usize> = markers
        .iter()
        .copied()
        .filter(|&offset| offset == 0 || matches!(image[offset - 1], b'\n' | b'\r'))
        .collect();

    let plausible = if at_line_start.is_empty() {
        &markers
    } else {
        &at_line_start
    };
    let offset = *plausible.last()?;
    Some(Cursor {
        offset,
        ambiguous: plausible.len() > 1,
    })
}

/// Rotate a raw ring image at `cursor` so the oldest surviving byte comes
/// first.
pub fn reorder_at(image: &[u8], cursor: usize) -> Vec<u8> {
    let (older, newer) = ordered_segments(image, cursor);
    let mut out = Vec::with_capacity(older.len() + newer.len());
    out.extend_from_slice(older);
    out.extend_from_slice(newer);
    out
}

/// Drop wrap padding, stray end markers and leading filler.
pub fn clean(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut rest = bytes;
    while !rest.is_empty() {
        if rest.starts_with(END_MARKER) {
            rest = &rest[END_MARKER.len()..];
            continue;
        }
        if rest[0] != 0 {
            out.push(rest[0]);
        }
        rest = &rest[1..];
    }

    let start = out.iter().position(|&b| b != b'\n').unwrap_or(out.len());
    out.drain(..start);
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// Entries
// ═══════════════════════════════════════════════════════════════════════════════

/// One logical message: a prefixed line plus any unprefixed continuation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Thread that wrote the line, if the line carried a prefix
    pub thread: Option<u64>,
    pub message: String,
}

/// Parse a `0x<hex>: ` prefix, returning the thread and the remainder.
fn split_prefix(line: &str) -> Option<(u64, &str)> {
    let hex = line.strip_prefix("0x")?;
    let (id, rest) = hex.split_once(": ")?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let thread = u64::from_str_radix(id, 16).ok()?;
    Some((thread, rest))
}

/// Split decoded text into entries.
///
/// Lines without a thread prefix continue the previous entry, the way
/// `CE_CONT` output follows the message it extends.
pub fn split_entries(text: &str) -> Vec<Entry> {
    let mut entries: Vec<Entry> = Vec::new();
    for line in text.lines() {
        match split_prefix(line) {
            Some((thread, message)) => entries.push(Entry {
                thread: Some(thread),
                message: message.to_string(),
            }),
            None => match entries.last_mut() {
                Some(last) => {
                    last.message.push('\n');
                    last.message.push_str(line);
                }
                None if line.is_empty() => {}
                None => entries.push(Entry {
                    thread: None,
                    message: line.to_string(),
                }),
            },
        }
    }
    entries
}

/// Render entries one per block, `[thread] message`.
pub fn render_entries<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> String {
    let mut out = String::new();
    for entry in entries {
        match entry.thread {
            Some(thread) => out.push_str(&format!("[{:#x}] ", thread)),
            None => out.push_str("[?] "),
        }
        out.push_str(&entry.message);
        out.push('\n');
    }
    out
}
