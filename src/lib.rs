#![crate_name = "formatstring"]

#[macro_use]
extern crate lazy_static;

pub mod architectures;
pub mod error;
pub mod pattern;
pub mod payloads;
pub mod settings;

pub use architectures::{binary_arch, local_arch, Architecture, Endian};
pub use error::{PayloadError, Result};
pub use payloads::{ReadPayload, WritePayload};
pub use settings::PayloadSettings;
