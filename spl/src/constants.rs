/// Default debug log capacity (1 MiB)
pub const CBUF_SIZE: usize = 0x10_0000;
/// Bound of a single formatted log line, thread prefix included
pub const MAX_LINE_LENGTH: usize = 1024;
/// Written after every entry so off-line tools can find the newest write
pub const END_MARKER: &[u8] = b"-EB-";
/// Replaces the tail of a line that overflowed `MAX_LINE_LENGTH`
pub(crate) const TRUNC_MARKER: &[u8] = b"TRUNC\n";
/// Initial content of a freshly allocated buffer
pub(crate) const CBUF_FILLER: u8 = b'\n';

/// Capacity of the `cbuf_save` control parameter text
pub const CBUF_SAVE_LEN: usize = 100;
pub(crate) const CBUF_SAVE_DEFAULT: &str = "Set this to 1 to save cbuf";

pub(crate) const CBUF_FILENAME: &str = "C:\\Program Files\\OpenZFS On Windows\\cbuf.txt";
pub(crate) const CBUF_RAW_FILENAME: &str = "C:\\Windows\\debug\\ZFSin.txt";

pub(crate) const NANOSEC: u64 = 1_000_000_000;
/// 100ns intervals between 1601-01-01 and 1970-01-01
pub(crate) const WINDOWS_TO_UNIX_EPOCH: u64 = 116_444_736_000_000_000;
