#![deny(unsafe_code)]
//! Item model and decoder-configuration subsystem for HEIF (ISO/IEC 23008-12) containers.
//!
//! A [`Heif`] container owns every item and decoder configuration created in it.
//! Callers hold small `Copy` ids ([`ItemId`], [`DecoderConfigId`]) that are checked
//! against the container's arenas on every call, so a destroyed item or an
//! invalidated container is reported as [`Error::InvalidState`] instead of
//! dereferencing stale storage.
//!
//! ```rust
//! use zenheif_items::{AvcImageItem, FourCC, Heif, Size};
//!
//! let avcc = [
//!     0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x0A, 0x67, 0x42, 0xC0, 0x1E, 0x95, 0xA0, 0x14,
//!     0x01, 0x6E, 0x40, 0x01, 0x00, 0x04, 0x68, 0xCE, 0x3C, 0x80,
//! ];
//! let mut heif = Heif::new();
//! let item = AvcImageItem::with_config_bytes(&mut heif, Size::new(1920, 1080), &avcc, &[0xAB; 64])?;
//! assert_eq!(heif.item_type(item.id())?, FourCC::AVC1);
//! # Ok::<(), zenheif_items::Error>(())
//! ```

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use fallible_collections::TryReserveError;

mod arena;
mod av1;
mod avc;
mod boxes;
mod coded;
mod decoder_config;
mod heif;
mod hevc;
mod item;
mod nal;
mod property;

pub use crate::av1::Av1Config;
pub use crate::avc::{AvcChromaExtension, AvcConfig};
pub use crate::boxes::FourCC;
pub use crate::coded::{Av1DecoderConfig, Av1ImageItem, AvcDecoderConfig, AvcImageItem, HevcDecoderConfig, HevcImageItem};
pub use crate::decoder_config::{CodecConfig, DecoderConfigId, MediaFormat};
pub use crate::heif::{AssociatedProperty, FileType, Heif, OutputItem, Phase};
pub use crate::hevc::{HevcConfig, HevcNalArray};
pub use crate::item::{ItemCategory, ItemId, ItemState, Size};
pub use crate::property::{CleanAperture, ColourInformation, MirrorAxis, Property, PropertyAssociation, PropertyId};

/// A trait to indicate a type can be infallibly converted to `usize`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
pub(crate) trait ToUsize {
    fn to_usize(self) -> usize;
}

/// Statically verify that the given type can fit within a `usize`.
/// If the size won't fit on the given platform, this will fail at compile time, but if a type
/// which can fail `TryInto<usize>` is used, it may panic.
macro_rules! impl_to_usize_from {
    ( $from_type:ty ) => {
        impl ToUsize for $from_type {
            fn to_usize(self) -> usize {
                const _: () = assert!(std::mem::size_of::<$from_type>() <= std::mem::size_of::<usize>());
                self.try_into().ok().unwrap()
            }
        }
    };
}

impl_to_usize_from!(u8);
impl_to_usize_from!(u16);
impl_to_usize_from!(u32);

#[doc(hidden)]
pub type TryVec<T> = fallible_collections::TryVec<T>;

/// Describes failures of item and decoder configuration operations.
///
/// Every public operation validates its arguments and the container state
/// before mutating anything, so an `Err` never leaves a partial write behind.
#[derive(Debug)]
pub enum Error {
    /// The entity was destroyed, its container was invalidated, or the
    /// container is finalized and read-only.
    InvalidState(&'static str),
    /// Null, mismatched or out-of-range argument: wrong codec family,
    /// zero dimensions, an id from another container.
    InvalidArgument(&'static str),
    /// Structurally invalid decoder configuration or bitstream bytes.
    MalformedData(&'static str),
    /// A limit from [`HeifConfig`] would be exceeded.
    ResourceLimitExceeded(&'static str),
    /// Propagate underlying errors from `std::io`.
    Io(std::io::Error),
    /// Out of memory
    OutOfMemory,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidState(s) => write!(f, "invalid state: {s}"),
            Self::InvalidArgument(s) => write!(f, "invalid argument: {s}"),
            Self::MalformedData(s) => write!(f, "malformed data: {s}"),
            Self::ResourceLimitExceeded(s) => write!(f, "limit exceeded: {s}"),
            Self::Io(err) => std::fmt::Display::fmt(err, f),
            Self::OutOfMemory => f.write_str("OOM"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<bitreader::BitReaderError> for Error {
    #[cold]
    #[cfg_attr(debug_assertions, track_caller)]
    fn from(err: bitreader::BitReaderError) -> Self {
        log::warn!("bitreader: {err}");
        debug_assert!(!matches!(err, bitreader::BitReaderError::TooManyBitsForType { .. })); // bug
        Self::MalformedData("truncated bits")
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::MalformedData("unexpected end of data"),
            std::io::ErrorKind::OutOfMemory => Self::OutOfMemory,
            _ => Self::Io(err),
        }
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Self {
        Self::InvalidArgument("integer conversion failed")
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

/// Result shorthand using our Error enum.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Resource limits and validation options for a [`Heif`] container.
///
/// Limits are checked **before** storage is allocated, so oversized payloads
/// are rejected with [`Error::ResourceLimitExceeded`] without touching the item.
///
/// # Examples
///
/// ```rust
/// use zenheif_items::{Heif, HeifConfig};
///
/// // Default limits (suitable for most apps)
/// let heif = Heif::with_config(HeifConfig::default());
///
/// // Tighter limits for untrusted input
/// let config = HeifConfig::default()
///     .with_max_items(64)
///     .with_max_item_data_bytes(16 << 20);
/// let heif = Heif::with_config(config);
/// ```
#[derive(Debug, Clone)]
pub struct HeifConfig {
    /// Maximum number of live items in one container.
    /// Default: 10,000
    pub max_items: Option<u32>,

    /// Maximum size of a single item payload in bytes.
    /// Default: 256MB
    pub max_item_data_bytes: Option<u64>,

    /// Maximum size of raw decoder configuration bytes.
    /// Default: 1MB
    pub max_decoder_config_bytes: Option<u32>,

    /// Enable lenient parsing mode.
    ///
    /// When true, reserved bits in `avcC`/`hvcC`/`av1C` records that are
    /// required to be all-ones (or zero) are not checked.
    ///
    /// Default: false (strict validation)
    pub lenient: bool,
}

impl Default for HeifConfig {
    fn default() -> Self {
        Self {
            max_items: Some(10_000),
            max_item_data_bytes: Some(256 * 1024 * 1024),
            max_decoder_config_bytes: Some(1024 * 1024),
            lenient: false,
        }
    }
}

impl HeifConfig {
    /// Create a configuration with no resource limits.
    pub fn unlimited() -> Self {
        Self {
            max_items: None,
            max_item_data_bytes: None,
            max_decoder_config_bytes: None,
            lenient: false,
        }
    }

    /// Set the maximum live item count
    pub fn with_max_items(mut self, items: u32) -> Self {
        self.max_items = Some(items);
        self
    }

    /// Set the maximum item payload size in bytes
    pub fn with_max_item_data_bytes(mut self, bytes: u64) -> Self {
        self.max_item_data_bytes = Some(bytes);
        self
    }

    /// Set the maximum decoder configuration size in bytes
    pub fn with_max_decoder_config_bytes(mut self, bytes: u32) -> Self {
        self.max_decoder_config_bytes = Some(bytes);
        self
    }

    /// Enable lenient parsing mode
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    fn check_item_count(&self, live: usize) -> Result<()> {
        if let Some(limit) = self.max_items {
            if live >= limit.to_usize() {
                return Err(Error::ResourceLimitExceeded("item count limit exceeded"));
            }
        }
        Ok(())
    }

    fn check_item_data_len(&self, len: usize) -> Result<()> {
        if let Some(limit) = self.max_item_data_bytes {
            if u64::try_from(len).map_or(true, |len| len > limit) {
                return Err(Error::ResourceLimitExceeded("item data size limit exceeded"));
            }
        }
        Ok(())
    }

    fn check_decoder_config_len(&self, len: usize) -> Result<()> {
        if let Some(limit) = self.max_decoder_config_bytes {
            if len > limit.to_usize() {
                return Err(Error::ResourceLimitExceeded("decoder config size limit exceeded"));
            }
        }
        Ok(())
    }
}

/// Copy a byte slice into fallibly-allocated storage.
pub(crate) fn try_copy(bytes: &[u8]) -> Result<TryVec<u8>> {
    let mut v = TryVec::with_capacity(bytes.len())?;
    v.extend_from_slice(bytes)?;
    Ok(v)
}
