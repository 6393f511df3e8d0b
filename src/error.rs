use thiserror::Error;

/// Errors surfaced while synthesizing payloads or sniffing architectures
#[derive(Error, Debug)]
pub enum PayloadError {
    /// The payload (or an unavoidable target address) would contain a byte
    /// the caller declared forbidden.
    #[error("payload contains forbidden byte {0:#04x}")]
    ForbiddenByte(u8),

    #[error("write payload has no bytes to write")]
    EmptyWrite,

    /// The output counter starts past the smallest value to write and the
    /// `%n` family cannot move it backwards.
    #[error("start length {start_len} exceeds the smallest value to write ({first_value:#x})")]
    StartLengthTooLarge { start_len: usize, first_value: u64 },

    #[error("unknown architecture: {0}")]
    UnknownArchitecture(String),

    #[error("value {value:#x} does not fit in a {bits}-bit word")]
    WordOverflow { value: u64, bits: u32 },

    #[error("no usable padding byte: every byte value is forbidden")]
    NoPaddingByte,

    #[error("invalid ELF file: {0}")]
    InvalidElf(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A bug in the synthesizer itself: negative alignment padding or a
    /// store value that overflows its width.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

pub type Result<T> = std::result::Result<T, PayloadError>;
