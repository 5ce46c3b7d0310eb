//! Line parser for the sg debug feed.
//!
//! The feed is rendered by the kernel while commands are completing, so a
//! captured line may be cut short or carry a half-written field. Parsing is
//! therefore total: every input produces a [`StatusRecord`], with fields set
//! to absent/unknown when they cannot be read.

use serde::{Deserialize, Serialize};

/// Marker preceding `<timeout>/<elapsed>ms`.
pub const TIMING_MARKER: &str = "t_o/elap=";
/// Marker preceding the command opcode in hex.
pub const OPCODE_MARKER: &str = "op=0x";
/// Opcode reported for lines without an opcode marker.
pub const UNKNOWN_OPCODE: &str = "??";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Hex digits following the opcode marker. Empty when the marker is
    /// present but not followed by a hex digit, [`UNKNOWN_OPCODE`] when the
    /// marker is missing.
    pub opcode: String,
    pub elapsed_ms: Option<i64>,
}

impl StatusRecord {
    pub fn has_timing(&self) -> bool {
        self.elapsed_ms.is_some()
    }
}

pub fn parse_line(line: &str) -> StatusRecord {
    StatusRecord {
        opcode: parse_opcode(line),
        elapsed_ms: parse_elapsed(line),
    }
}

/// Parse every line of a captured feed, including a trailing line with no
/// newline.
pub fn parse_feed(feed: &str) -> impl Iterator<Item = (&str, StatusRecord)> {
    feed.lines().map(|line| (line, parse_line(line)))
}

fn parse_elapsed(line: &str) -> Option<i64> {
    let start = line.find(TIMING_MARKER)? + TIMING_MARKER.len();
    let (_timeout, rest) = parse_signed(&line[start..])?;
    let rest = rest.strip_prefix('/')?;
    let (elapsed, _) = parse_signed(rest)?;
    Some(elapsed)
}

fn parse_opcode(line: &str) -> String {
    match line.find(OPCODE_MARKER) {
        Some(pos) => line[pos + OPCODE_MARKER.len()..]
            .chars()
            .take_while(char::is_ascii_hexdigit)
            .collect(),
        None => UNKNOWN_OPCODE.to_string(),
    }
}

/// Leading blanks, optional sign, then at least one digit. Returns the value
/// and the unparsed remainder; `None` on no digits or overflow.
fn parse_signed(text: &str) -> Option<(i64, &str)> {
    let text = text.trim_start();
    let unsigned = text.trim_start_matches(|c| c == '+' || c == '-');
    let sign_len = text.len() - unsigned.len();
    if sign_len > 1 {
        return None;
    }
    let digits = unsigned.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let end = sign_len + digits;
    let value = text[..end].parse::<i64>().ok()?;
    Some((value, &text[end..]))
}
