// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::arena::Index;
use crate::av1::Av1Config;
use crate::avc::AvcConfig;
use crate::boxes::FourCC;
use crate::heif::ContainerId;
use crate::hevc::HevcConfig;
use crate::{try_copy, Result, TryVec};
use log::trace;

/// Codec family of a coded image item and of the decoder configurations it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaFormat {
    Avc,
    Hevc,
    Av1,
}

impl MediaFormat {
    /// The coded image item type for this codec.
    pub const fn item_type(self) -> FourCC {
        match self {
            Self::Avc => FourCC::AVC1,
            Self::Hevc => FourCC::HVC1,
            Self::Av1 => FourCC::AV01,
        }
    }

    /// The item property carrying this codec's decoder configuration.
    pub const fn config_box_type(self) -> FourCC {
        match self {
            Self::Avc => FourCC::AVCC,
            Self::Hevc => FourCC::HVCC,
            Self::Av1 => FourCC::AV1C,
        }
    }

    /// The `ftyp` compatible brand advertised when the file holds this codec.
    pub const fn brand(self) -> FourCC {
        match self {
            Self::Avc => FourCC::AVCI,
            Self::Hevc => FourCC::HEIC,
            Self::Av1 => FourCC::AVIF,
        }
    }

    pub fn from_item_type(item_type: FourCC) -> Option<Self> {
        match item_type {
            FourCC::AVC1 => Some(Self::Avc),
            FourCC::HVC1 => Some(Self::Hevc),
            FourCC::AV01 => Some(Self::Av1),
            _ => None,
        }
    }
}

/// Identifies a decoder configuration inside the [`Heif`](crate::Heif) that created it.
///
/// Any number of coded image items may be bound to the same configuration;
/// they all observe its current bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecoderConfigId {
    pub(crate) container: ContainerId,
    pub(crate) index: Index,
}

/// Parsed form of a decoder configuration.
#[derive(Debug)]
pub enum CodecConfig {
    Avc(AvcConfig),
    Hevc(HevcConfig),
    Av1(Av1Config),
}

impl CodecConfig {
    pub fn parse(format: MediaFormat, data: &[u8], lenient: bool) -> Result<Self> {
        Ok(match format {
            MediaFormat::Avc => Self::Avc(AvcConfig::parse(data, lenient)?),
            MediaFormat::Hevc => Self::Hevc(HevcConfig::parse(data, lenient)?),
            MediaFormat::Av1 => Self::Av1(Av1Config::parse(data, lenient)?),
        })
    }

    pub fn format(&self) -> MediaFormat {
        match self {
            Self::Avc(_) => MediaFormat::Avc,
            Self::Hevc(_) => MediaFormat::Hevc,
            Self::Av1(_) => MediaFormat::Av1,
        }
    }

    /// Width in bytes of the NAL unit lengths in samples using this config.
    ///
    /// `None` for AV1, whose samples are OBUs rather than NAL units.
    pub fn nal_length_size(&self) -> Option<u8> {
        match self {
            Self::Avc(config) => Some(config.nal_length_size),
            Self::Hevc(config) => Some(config.nal_length_size),
            Self::Av1(_) => None,
        }
    }

    /// Serialize as the codec's configuration record (`avcC`, `hvcC` or `av1C` payload).
    pub fn to_record(&self) -> Result<TryVec<u8>> {
        match self {
            Self::Avc(config) => config.to_avcc(),
            Self::Hevc(config) => config.to_hvcc(),
            Self::Av1(config) => config.to_av1c(),
        }
    }
}

/// NAL length width assumed while an AVC or HEVC config holds no bytes yet.
const DEFAULT_NAL_LENGTH_SIZE: u8 = 4;

struct Contents {
    raw: TryVec<u8>,
    parsed: CodecConfig,
}

/// Storage for one decoder configuration. Starts empty.
pub(crate) struct DecoderConfig {
    format: MediaFormat,
    contents: Option<Contents>,
}

impl DecoderConfig {
    pub fn new(format: MediaFormat) -> Self {
        Self { format, contents: None }
    }

    pub fn format(&self) -> MediaFormat {
        self.format
    }

    /// Parse `data` and copy it in. On error the previous contents are kept.
    pub fn set(&mut self, data: &[u8], lenient: bool) -> Result<()> {
        let parsed = CodecConfig::parse(self.format, data, lenient)?;
        let raw = try_copy(data)?;
        trace!("{:?} decoder config replaced ({} bytes)", self.format, raw.len());
        self.contents = Some(Contents { raw, parsed });
        Ok(())
    }

    pub fn is_set(&self) -> bool {
        self.contents.is_some()
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.contents.as_ref().map(|c| &c.raw[..])
    }

    pub fn parsed(&self) -> Option<&CodecConfig> {
        self.contents.as_ref().map(|c| &c.parsed)
    }

    /// NAL length width of samples bound to this config; `None` for AV1.
    pub fn nal_length_size(&self) -> Option<u8> {
        match (self.parsed(), self.format) {
            (Some(parsed), _) => parsed.nal_length_size(),
            (None, MediaFormat::Avc | MediaFormat::Hevc) => Some(DEFAULT_NAL_LENGTH_SIZE),
            (None, MediaFormat::Av1) => None,
        }
    }
}
