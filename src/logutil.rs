//! Logging helpers that keep byte dumps on a single bounded line.

use std::fmt::Write;

/// Hex dump of up to `max` bytes, space separated, with a `…(+n)` suffix when
/// truncated.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    let shown = data.len().min(max);
    let mut out = String::with_capacity(shown * 3 + 8);
    for (i, b) in data[..shown].iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(&mut out, "{:02X}", b);
    }
    if data.len() > shown {
        let _ = write!(&mut out, " …(+{})", data.len() - shown);
    }
    out
}

/// Memory location formatted the way link tables are usually shown (`0x0FFF`).
pub fn hex_u16(value: u16) -> String {
    format!("0x{:04X}", value)
}
