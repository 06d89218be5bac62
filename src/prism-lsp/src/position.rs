//! Position translation between the agent surface and the LSP wire.
//!
//! Tool calls address documents with 1-based lines and 1-based columns
//! counted in user-visible characters (Unicode code points). LSP uses
//! 0-based lines and 0-based columns counted in UTF-16 code units, so a
//! code point outside the BMP occupies two units. Conversions therefore
//! walk the line text rather than doing arithmetic on the raw numbers.

use crate::{LspError, Result};
use lsp_types::Position;

/// Split into lines without dropping a trailing empty line the way
/// `str::lines` does for text ending in a newline.
fn line_at(text: &str, index: usize) -> Option<&str> {
    text.split('\n').nth(index).map(|l| l.strip_suffix('\r').unwrap_or(l))
}

fn line_count(text: &str) -> usize {
    text.split('\n').count()
}

/// Convert a 1-based (line, column) in code points to an LSP position,
/// rejecting anything outside the document. Used by mutating operations
/// where a silently clamped position would edit the wrong place.
pub fn to_lsp_position_strict(text: &str, line: u32, column: u32) -> Result<Position> {
    if line == 0 || column == 0 {
        return Err(LspError::InvalidPosition { line, column });
    }
    let line_idx = (line - 1) as usize;
    let line_text = line_at(text, line_idx).ok_or(LspError::InvalidPosition { line, column })?;

    let mut remaining = (column - 1) as usize;
    let mut utf16_col: u32 = 0;
    for ch in line_text.chars() {
        if remaining == 0 {
            break;
        }
        utf16_col += ch.len_utf16() as u32;
        remaining -= 1;
    }
    if remaining > 0 {
        // Column one past the last character is valid (end-of-line cursor).
        return Err(LspError::InvalidPosition { line, column });
    }
    Ok(Position { line: line - 1, character: utf16_col })
}

/// Convert a 1-based (line, column) to an LSP position, clamping out of
/// bounds input to the nearest valid location. Used by read-only queries.
pub fn to_lsp_position_clamped(text: &str, line: u32, column: u32) -> Position {
    let total = line_count(text);
    let line_idx = (line.max(1) as usize - 1).min(total.saturating_sub(1));
    let line_text = line_at(text, line_idx).unwrap_or("");

    let mut remaining = column.max(1) as usize - 1;
    let mut utf16_col: u32 = 0;
    for ch in line_text.chars() {
        if remaining == 0 {
            break;
        }
        utf16_col += ch.len_utf16() as u32;
        remaining -= 1;
    }
    Position { line: line_idx as u32, character: utf16_col }
}

/// Convert an LSP position back to 1-based (line, column) in code
/// points. Positions past the end of a line clamp to the end-of-line
/// cursor; lines past the end clamp to the last line.
pub fn from_lsp_position(text: &str, position: Position) -> (u32, u32) {
    let total = line_count(text);
    let line_idx = (position.line as usize).min(total.saturating_sub(1));
    let line_text = line_at(text, line_idx).unwrap_or("");

    let mut units = position.character;
    let mut column: u32 = 1;
    for ch in line_text.chars() {
        let w = ch.len_utf16() as u32;
        if units < w {
            break;
        }
        units -= w;
        column += 1;
    }
    (line_idx as u32 + 1, column)
}

/// Byte offset of an LSP position within `text`. Positions beyond the
/// document clamp to its end; used when applying server edits to disk.
pub fn lsp_position_to_byte_offset(text: &str, position: Position) -> usize {
    let mut offset = 0usize;
    let mut line = 0u32;
    let mut iter = text.char_indices().peekable();

    // Skip to the start of the target line.
    while line < position.line {
        match iter.next() {
            Some((_, '\n')) => line += 1,
            Some(_) => {}
            None => return text.len(),
        }
    }
    if let Some(&(start, _)) = iter.peek() {
        offset = start;
    } else {
        return text.len();
    }

    let mut units = position.character;
    for (idx, ch) in iter {
        if ch == '\n' || units == 0 {
            return idx;
        }
        let w = ch.len_utf16() as u32;
        if units < w {
            return idx;
        }
        units -= w;
        offset = idx + ch.len_utf8();
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASCII: &str = "fn main() {\n    println!(\"hi\");\n}\n";

    #[test]
    fn ascii_round_trip() {
        for (line, column) in [(1, 1), (1, 12), (2, 5), (3, 1)] {
            let pos = to_lsp_position_strict(ASCII, line, column).unwrap();
            assert_eq!(from_lsp_position(ASCII, pos), (line, column));
        }
    }

    #[test]
    fn surrogate_pairs_count_two_units() {
        // '𝕊' is outside the BMP: one code point, two UTF-16 units.
        let text = "let 𝕊 = 1;\n";
        let pos = to_lsp_position_strict(text, 1, 6).unwrap();
        // l-e-t-space-𝕊 -> 4 ASCII units + 2 surrogate units.
        assert_eq!(pos, Position { line: 0, character: 6 });
        assert_eq!(from_lsp_position(text, pos), (1, 6));
    }

    #[test]
    fn end_of_line_cursor_is_valid() {
        let text = "abc\n";
        let pos = to_lsp_position_strict(text, 1, 4).unwrap();
        assert_eq!(pos.character, 3);
    }

    #[test]
    fn strict_rejects_out_of_bounds() {
        let text = "abc\ndef\n";
        assert!(to_lsp_position_strict(text, 0, 1).is_err());
        assert!(to_lsp_position_strict(text, 1, 0).is_err());
        assert!(to_lsp_position_strict(text, 1, 5).is_err());
        assert!(to_lsp_position_strict(text, 99, 1).is_err());
    }

    #[test]
    fn clamped_saturates() {
        let text = "abc\ndef";
        let pos = to_lsp_position_clamped(text, 99, 99);
        assert_eq!(pos, Position { line: 1, character: 3 });
        let pos = to_lsp_position_clamped(text, 1, 99);
        assert_eq!(pos, Position { line: 0, character: 3 });
    }

    #[test]
    fn lsp_round_trip_clamps_past_line_end() {
        let text = "ab\ncd\n";
        let (line, column) = from_lsp_position(text, Position { line: 0, character: 40 });
        assert_eq!((line, column), (1, 3));
    }

    #[test]
    fn byte_offsets_follow_utf16_units() {
        let text = "a𝕊b\nxyz\n";
        // Offset of 'b': 'a' (1 unit) + '𝕊' (2 units) = character 3.
        let off = lsp_position_to_byte_offset(text, Position { line: 0, character: 3 });
        assert_eq!(&text[off..off + 1], "b");
        let off = lsp_position_to_byte_offset(text, Position { line: 1, character: 1 });
        assert_eq!(&text[off..off + 1], "y");
        // Past the end clamps to document length.
        let off = lsp_position_to_byte_offset(text, Position { line: 9, character: 9 });
        assert_eq!(off, text.len());
    }

    #[test]
    fn crlf_lines_round_trip() {
        let text = "abc\r\ndef\r\n";
        let pos = to_lsp_position_strict(text, 2, 2).unwrap();
        assert_eq!(pos, Position { line: 1, character: 1 });
        assert_eq!(from_lsp_position(text, pos), (2, 2));
    }
}
