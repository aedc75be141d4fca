// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Four-character code naming an item, box or brand type.
///
/// A `FourCC` always holds exactly four bytes. Codes built from constants or
/// `[u8; 4]` are taken as-is; codes built from slices or strings are checked
/// for length first.
#[derive(Default, PartialEq, Eq, Clone, Copy, Hash)]
pub struct FourCC([u8; 4]);

impl FourCC {
    /// AVC coded image item
    pub const AVC1: Self = Self(*b"avc1");
    /// HEVC coded image item
    pub const HVC1: Self = Self(*b"hvc1");
    /// AV1 coded image item
    pub const AV01: Self = Self(*b"av01");
    /// Grid derived image item
    pub const GRID: Self = Self(*b"grid");
    /// Overlay derived image item
    pub const IOVL: Self = Self(*b"iovl");
    /// Identity derived image item
    pub const IDEN: Self = Self(*b"iden");
    /// Exif metadata item
    pub const EXIF: Self = Self(*b"Exif");
    /// MIME typed item (XMP and friends)
    pub const MIME: Self = Self(*b"mime");
    /// AVC decoder configuration property
    pub const AVCC: Self = Self(*b"avcC");
    /// HEVC decoder configuration property
    pub const HVCC: Self = Self(*b"hvcC");
    /// AV1 decoder configuration property
    pub const AV1C: Self = Self(*b"av1C");
    /// Pixel aspect ratio property
    pub const PASP: Self = Self(*b"pasp");
    /// Colour information property
    pub const COLR: Self = Self(*b"colr");
    /// Pixel information property
    pub const PIXI: Self = Self(*b"pixi");
    /// Relative location property
    pub const RLOC: Self = Self(*b"rloc");
    /// Auxiliary type property
    pub const AUXC: Self = Self(*b"auxC");
    /// Clean aperture property
    pub const CLAP: Self = Self(*b"clap");
    /// Image rotation property
    pub const IROT: Self = Self(*b"irot");
    /// Image mirroring property
    pub const IMIR: Self = Self(*b"imir");
    /// `colr` type: coding-independent code points
    pub const NCLX: Self = Self(*b"nclx");
    /// `colr` type: restricted ICC profile
    pub const RICC: Self = Self(*b"rICC");
    /// `colr` type: unrestricted ICC profile
    pub const PROF: Self = Self(*b"prof");
    /// Image file brand (ISO/IEC 23008-12 § 10.2.1)
    pub const MIF1: Self = Self(*b"mif1");
    /// AVC image brand
    pub const AVCI: Self = Self(*b"avci");
    /// HEVC image brand
    pub const HEIC: Self = Self(*b"heic");
    /// AV1 image brand
    pub const AVIF: Self = Self(*b"avif");

    /// Wrap four bytes that are already known to form a valid code.
    pub const fn new(value: [u8; 4]) -> Self {
        Self(value)
    }

    /// Validate and wrap a raw code; fails unless `bytes` is exactly four bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: [u8; 4] = bytes
            .try_into()
            .map_err(|_| Error::InvalidArgument("FourCC must be exactly 4 bytes"))?;
        Ok(Self(value))
    }

    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl From<u32> for FourCC {
    fn from(number: u32) -> Self {
        Self(number.to_be_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(fourcc: FourCC) -> Self {
        Self::from_be_bytes(fourcc.0)
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(value: [u8; 4]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for FourCC {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::from_slice(bytes)
    }
}

impl FromStr for FourCC {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_slice(s.as_bytes())
    }
}

impl PartialEq<&[u8; 4]> for FourCC {
    fn eq(&self, other: &&[u8; 4]) -> bool {
        self.0 == **other
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => fmt::Debug::fmt(&self.0, f),
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validated_codes_need_four_bytes() {
        assert_eq!(FourCC::from_slice(b"avc1").unwrap(), FourCC::AVC1);
        assert!(matches!(FourCC::from_slice(b"avc"), Err(Error::InvalidArgument(_))));
        assert!(matches!("hvc1x".parse::<FourCC>(), Err(Error::InvalidArgument(_))));
        assert!(matches!(FourCC::from_slice(&[]), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn u32_conversion_is_big_endian() {
        let code = FourCC::from(0x6d69_6631);
        assert_eq!(code, FourCC::MIF1);
        assert_eq!(u32::from(FourCC::MIF1), 0x6d69_6631);
    }

    #[test]
    fn compares_against_byte_literals() {
        assert!(FourCC::GRID == b"grid");
        assert!(FourCC::GRID != b"iovl");
    }

    #[test]
    fn display_is_lossy_for_binary_codes() {
        assert_eq!(FourCC::EXIF.to_string(), "Exif");
        assert_eq!(format!("{:?}", FourCC::AVCC), "avcC");
        assert_eq!(FourCC::new([0xff, b'a', b'b', b'c']).to_string(), "\u{fffd}abc");
    }
}
