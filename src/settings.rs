//! Per-payload constraint bundle shared by the read and write generators.

use crate::architectures::Architecture;
use crate::error::{PayloadError, Result};
use std::collections::HashSet;

/// Immutable constraints for one payload: where the attacker-controlled
/// buffer sits in the varargs, how far off a word boundary it starts, the
/// target architecture, and which byte values may never appear in the
/// output.
#[derive(Debug, Clone)]
pub struct PayloadSettings {
    /// First varargs index occupied by the attacker-controlled buffer
    pub offset: usize,
    /// Filler bytes needed to bring the buffer start to a word boundary
    pub padding: usize,
    /// Target architecture
    pub arch: Architecture,
    forbidden: HashSet<u8>,
    padding_byte: u8,
}

impl PayloadSettings {
    /// Settings with no padding and no forbidden bytes.
    pub fn new(offset: usize, arch: Architecture) -> PayloadSettings {
        assert!(offset >= 1, "buffer offset must be positive");
        PayloadSettings {
            offset,
            padding: 0,
            arch,
            forbidden: HashSet::new(),
            padding_byte: 0x00,
        }
    }

    /// Settings with the full constraint set. The padding byte is resolved
    /// here by preference: the caller's override, then `0x00`, then the
    /// highest byte value not in the forbidden set.
    pub fn with_constraints(
        offset: usize,
        padding: usize,
        arch: Architecture,
        forbidden_bytes: &[u8],
        padding_byte: Option<u8>,
    ) -> Result<PayloadSettings> {
        assert!(offset >= 1, "buffer offset must be positive");
        assert!(
            padding < arch.bytes(),
            "padding must be smaller than the word size"
        );

        let forbidden: HashSet<u8> = forbidden_bytes.iter().copied().collect();
        let padding_byte = pick_padding_byte(&forbidden, padding_byte)?;
        Ok(PayloadSettings {
            offset,
            padding,
            arch,
            forbidden,
            padding_byte,
        })
    }

    /// Byte used for alignment filler
    pub fn padding_byte(&self) -> u8 {
        self.padding_byte
    }

    /// Scan a finished payload for forbidden bytes, naming the first hit.
    pub fn check_forbidden(&self, payload: &[u8]) -> Result<()> {
        match payload.iter().find(|byte| self.forbidden.contains(byte)) {
            Some(&byte) => Err(PayloadError::ForbiddenByte(byte)),
            None => Ok(()),
        }
    }

    pub(crate) fn first_forbidden(&self, bytes: &[u8]) -> Option<u8> {
        bytes.iter().copied().find(|byte| self.forbidden.contains(byte))
    }
}

fn pick_padding_byte(forbidden: &HashSet<u8>, requested: Option<u8>) -> Result<u8> {
    if let Some(byte) = requested {
        if forbidden.contains(&byte) {
            return Err(PayloadError::ForbiddenByte(byte));
        }
        return Ok(byte);
    }
    if !forbidden.contains(&0x00) {
        return Ok(0x00);
    }
    (0x00..=0xffu8)
        .rev()
        .find(|byte| !forbidden.contains(byte))
        .ok_or(PayloadError::NoPaddingByte)
}
