//! Architecture descriptors, the frozen name registry, and the word codecs
//! used to serialize address slots into payloads.

use crate::error::{PayloadError, Result};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Byte order of a target architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// A target architecture: canonical name, word size in bits and byte order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Architecture {
    pub name: String,
    pub bits: u32,
    pub endian: Endian,
}

impl Architecture {
    /// `bits` must be a positive multiple of 8
    pub fn new(name: &str, bits: u32, endian: Endian) -> Architecture {
        assert!(
            bits >= 8 && bits % 8 == 0,
            "word size must be a positive multiple of 8"
        );
        Architecture {
            name: name.to_string(),
            bits,
            endian,
        }
    }

    /// Word size in bytes
    pub fn bytes(&self) -> usize {
        (self.bits / 8) as usize
    }

    /// Serialize `value` as exactly one word in this architecture's byte
    /// order. Fails if `value` does not fit unsigned in the word.
    pub fn pack_address(&self, value: u64) -> Result<Vec<u8>> {
        let width = self.bytes();
        if width < 8 && value >> (8 * width as u32) != 0 {
            return Err(PayloadError::WordOverflow {
                value,
                bits: self.bits,
            });
        }

        let le = value.to_le_bytes();
        let mut word = vec![0u8; width];
        match self.endian {
            Endian::Little => {
                for (i, byte) in word.iter_mut().enumerate().take(8) {
                    *byte = le[i];
                }
            }
            Endian::Big => {
                for (i, byte) in word.iter_mut().rev().enumerate().take(8) {
                    *byte = le[i];
                }
            }
        }
        Ok(word)
    }

    /// Interpret a 1, 2, 4 or 8 byte sequence as an unsigned integer in this
    /// architecture's byte order. Other lengths are rejected.
    pub fn unpack_value(&self, bytes: &[u8]) -> Result<u64> {
        if !matches!(bytes.len(), 1 | 2 | 4 | 8) {
            return Err(PayloadError::InternalInvariant(format!(
                "cannot unpack {} bytes as a word",
                bytes.len()
            )));
        }

        let mut value = 0u64;
        match self.endian {
            Endian::Little => {
                for &byte in bytes.iter().rev() {
                    value = (value << 8) | u64::from(byte);
                }
            }
            Endian::Big => {
                for &byte in bytes {
                    value = (value << 8) | u64::from(byte);
                }
            }
        }
        Ok(value)
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endian = match self.endian {
            Endian::Little => "little",
            Endian::Big => "big",
        };
        write!(f, "<{} ({} bits, {} endian)>", self.name, self.bits, endian)
    }
}

lazy_static! {
    /// Registry of recognized architectures, keyed by canonical name.
    /// Initialized once at load time and never mutated.
    pub static ref ARCHITECTURES: HashMap<&'static str, Architecture> = {
        let mut m = HashMap::new();
        m.insert("aarch64", Architecture::new("aarch64", 64, Endian::Little));
        m.insert("alpha", Architecture::new("alpha", 64, Endian::Little));
        m.insert("amd64", Architecture::new("amd64", 64, Endian::Little));
        m.insert("arm", Architecture::new("arm", 32, Endian::Little));
        m.insert("avr", Architecture::new("avr", 8, Endian::Little));
        m.insert("cris", Architecture::new("cris", 32, Endian::Little));
        m.insert("i386", Architecture::new("i386", 32, Endian::Little));
        m.insert("ia64", Architecture::new("ia64", 64, Endian::Big));
        m.insert("m68k", Architecture::new("m68k", 32, Endian::Big));
        m.insert("mips", Architecture::new("mips", 32, Endian::Little));
        m.insert("mips64", Architecture::new("mips64", 64, Endian::Little));
        m.insert("msp430", Architecture::new("msp430", 16, Endian::Little));
        m.insert("powerpc", Architecture::new("powerpc", 32, Endian::Big));
        m.insert("powerpc64", Architecture::new("powerpc64", 64, Endian::Big));
        m.insert("s390", Architecture::new("s390", 32, Endian::Big));
        m.insert("sparc", Architecture::new("sparc", 32, Endian::Big));
        m.insert("sparc64", Architecture::new("sparc64", 64, Endian::Big));
        m.insert("thumb", Architecture::new("thumb", 32, Endian::Little));
        m.insert("vax", Architecture::new("vax", 32, Endian::Little));
        // convenience aliases
        m.insert("x86_32", Architecture::new("x86_32", 32, Endian::Little));
        m.insert("x86_64", Architecture::new("x86_64", 64, Endian::Little));
        m
    };
}

/// Look up an architecture by canonical name
pub fn arch_by_name(name: &str) -> Result<Architecture> {
    ARCHITECTURES
        .get(name)
        .cloned()
        .ok_or_else(|| PayloadError::UnknownArchitecture(name.to_string()))
}

/// Architecture of the machine we are running on
pub fn local_arch() -> Result<Architecture> {
    let name = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "i386",
        "s390x" => "s390",
        other => other,
    };
    arch_by_name(name)
}

// ELF identification offsets
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const E_MACHINE: usize = 18;
const ELF_HEADER_LEN: usize = 20;

/// Read the ELF header of the binary at `path` and derive its architecture.
pub fn binary_arch<P: AsRef<Path>>(path: P) -> Result<Architecture> {
    let mut file = File::open(path)?;
    let mut header = [0u8; ELF_HEADER_LEN];
    file.read_exact(&mut header)
        .map_err(|_| PayloadError::InvalidElf("file too small for an ELF header".to_string()))?;
    elf_arch(&header)
}

/// Decode the fixed-offset identification fields of an ELF header.
fn elf_arch(header: &[u8; ELF_HEADER_LEN]) -> Result<Architecture> {
    if &header[..4] != b"\x7fELF" {
        return Err(PayloadError::InvalidElf("missing \\x7fELF magic".to_string()));
    }

    let bits = match header[EI_CLASS] {
        1 => 32,
        2 => 64,
        class => {
            return Err(PayloadError::InvalidElf(format!(
                "unsupported ELF class {class}"
            )))
        }
    };

    let endian = match header[EI_DATA] {
        0 | 1 => Endian::Little,
        2 => Endian::Big,
        data => {
            return Err(PayloadError::InvalidElf(format!(
                "unsupported ELF data encoding {data}"
            )))
        }
    };

    // e_machine is stored in the file's own byte order
    let machine_bytes = [header[E_MACHINE], header[E_MACHINE + 1]];
    let machine = match endian {
        Endian::Little => u16::from_le_bytes(machine_bytes),
        Endian::Big => u16::from_be_bytes(machine_bytes),
    };

    let name = match machine {
        62 => "amd64".to_string(),
        3 | 6 => "i386".to_string(),
        40 => "arm".to_string(),
        183 => "aarch64".to_string(),
        8 => "mips".to_string(),
        20 => "powerpc".to_string(),
        21 => "powerpc64".to_string(),
        18 => "sparc".to_string(),
        43 => "sparc64".to_string(),
        50 => "ia64".to_string(),
        other => format!("em_{other}"),
    };

    Ok(Architecture { name, bits, endian })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_little_endian_word() {
        let arch = arch_by_name("i386").expect("i386 should be registered");
        let word = arch.pack_address(0x0804_A000).expect("address fits in 32 bits");
        assert_eq!(word, b"\x00\xa0\x04\x08");
    }

    #[test]
    fn pack_big_endian_word() {
        let arch = arch_by_name("sparc").expect("sparc should be registered");
        let word = arch.pack_address(0x0804_A000).expect("address fits in 32 bits");
        assert_eq!(word, b"\x08\x04\xa0\x00");
    }

    #[test]
    fn pack_big_endian_doubleword() {
        let arch = arch_by_name("sparc64").expect("sparc64 should be registered");
        let word = arch
            .pack_address(0x0102_0304_0506_0708)
            .expect("address fits in 64 bits");
        assert_eq!(word, b"\x01\x02\x03\x04\x05\x06\x07\x08");

        let arch = arch_by_name("ia64").expect("ia64 should be registered");
        let word = arch.pack_address(0x40_0600).expect("address fits in 64 bits");
        assert_eq!(word, b"\x00\x00\x00\x00\x00\x40\x06\x00");
    }

    #[test]
    fn pack_zero_extends_to_the_word_size() {
        let arch = arch_by_name("amd64").expect("amd64 should be registered");
        let word = arch.pack_address(0x40_0600).expect("address fits in 64 bits");
        assert_eq!(word, b"\x00\x06\x40\x00\x00\x00\x00\x00");
    }

    #[test]
    fn pack_rejects_oversized_values() {
        let arch = arch_by_name("msp430").expect("msp430 should be registered");
        match arch.pack_address(0x1_0000) {
            Err(PayloadError::WordOverflow { value, bits }) => {
                assert_eq!(value, 0x1_0000);
                assert_eq!(bits, 16);
            }
            other => panic!("expected WordOverflow, got {other:?}"),
        }
    }

    #[test]
    fn unpack_follows_the_byte_order() {
        let little = arch_by_name("i386").unwrap();
        let big = arch_by_name("powerpc").unwrap();
        assert_eq!(little.unpack_value(&[0x02, 0x01]).unwrap(), 0x0102);
        assert_eq!(big.unpack_value(&[0x02, 0x01]).unwrap(), 0x0201);
        assert_eq!(
            little.unpack_value(&[0x78, 0x56, 0x34, 0x12]).unwrap(),
            0x1234_5678
        );
    }

    #[test]
    fn unpack_rejects_odd_lengths() {
        let arch = arch_by_name("i386").unwrap();
        assert!(arch.unpack_value(&[1, 2, 3]).is_err());
        assert!(arch.unpack_value(&[]).is_err());
    }

    #[test]
    fn registry_covers_the_canonical_names() {
        for name in [
            "aarch64", "alpha", "amd64", "arm", "avr", "cris", "i386", "ia64", "m68k", "mips",
            "mips64", "msp430", "powerpc", "powerpc64", "s390", "sparc", "sparc64", "thumb",
            "vax", "x86_32", "x86_64",
        ] {
            let arch = arch_by_name(name).expect("registered architecture");
            assert_eq!(arch.name, name);
        }
        assert!(matches!(
            arch_by_name("z80"),
            Err(PayloadError::UnknownArchitecture(_))
        ));
    }

    #[test]
    fn display_names_the_width_and_endianness() {
        let arch = arch_by_name("sparc64").unwrap();
        assert_eq!(format!("{arch}"), "<sparc64 (64 bits, big endian)>");
    }

    #[test]
    fn elf_header_for_amd64() {
        let mut header = [0u8; ELF_HEADER_LEN];
        header[..4].copy_from_slice(b"\x7fELF");
        header[EI_CLASS] = 2;
        header[EI_DATA] = 1;
        header[E_MACHINE] = 62;
        let arch = elf_arch(&header).expect("valid header");
        assert_eq!(arch.name, "amd64");
        assert_eq!(arch.bits, 64);
        assert_eq!(arch.endian, Endian::Little);
    }

    #[test]
    fn elf_header_for_big_endian_sparc() {
        let mut header = [0u8; ELF_HEADER_LEN];
        header[..4].copy_from_slice(b"\x7fELF");
        header[EI_CLASS] = 1;
        header[EI_DATA] = 2;
        header[E_MACHINE + 1] = 18; // big-endian e_machine
        let arch = elf_arch(&header).expect("valid header");
        assert_eq!(arch.name, "sparc");
        assert_eq!(arch.bits, 32);
        assert_eq!(arch.endian, Endian::Big);
    }

    #[test]
    fn elf_header_keeps_unknown_machines() {
        let mut header = [0u8; ELF_HEADER_LEN];
        header[..4].copy_from_slice(b"\x7fELF");
        header[EI_CLASS] = 1;
        header[EI_DATA] = 1;
        header[E_MACHINE] = 0x77;
        let arch = elf_arch(&header).expect("valid header");
        assert_eq!(arch.name, "em_119");
        assert_eq!(arch.bits, 32);
    }

    #[test]
    fn elf_rejects_bad_magic() {
        let header = [0u8; ELF_HEADER_LEN];
        assert!(matches!(
            elf_arch(&header),
            Err(PayloadError::InvalidElf(_))
        ));
    }

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn local_arch_maps_the_host() {
        assert_eq!(local_arch().unwrap().name, "amd64");
    }
}
