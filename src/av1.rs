// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{try_copy, Error, Result, TryVec};
use bitreader::BitReader;
use byteorder::WriteBytesExt;

const AV1C_HEADER_LEN: usize = 4;

/// Parsed `AV1CodecConfigurationRecord`.
/// See <https://aomediacodec.github.io/av1-isobmff/#av1codecconfigurationbox-section>
#[derive(Debug)]
pub struct Av1Config {
    pub profile: u8,
    pub level: u8,
    pub tier: u8,
    /// 8, 10 or 12
    pub bit_depth: u8,
    pub monochrome: bool,
    pub chroma_subsampling_x: u8,
    pub chroma_subsampling_y: u8,
    pub chroma_sample_position: u8,
    pub initial_presentation_delay_present: bool,
    pub initial_presentation_delay_minus_one: u8,
    pub(crate) config_obus: TryVec<u8>,
}

impl Av1Config {
    pub fn parse(data: &[u8], lenient: bool) -> Result<Self> {
        if data.len() < AV1C_HEADER_LEN {
            return Err(Error::MalformedData("av1C too short"));
        }
        let (header, config_obus) = data.split_at(AV1C_HEADER_LEN);
        let mut bits = BitReader::new(header);

        let marker = bits.read_u8(1)?;
        let version = bits.read_u8(7)?;
        if marker != 1 || version != 1 {
            return Err(Error::MalformedData("unsupported av1C marker or version"));
        }
        let profile = bits.read_u8(3)?;
        let level = bits.read_u8(5)?;
        let tier = bits.read_u8(1)?;
        let high_bitdepth = bits.read_bool()?;
        let twelve_bit = bits.read_bool()?;
        let bit_depth = match (high_bitdepth, twelve_bit) {
            (true, true) => 12,
            (true, false) => 10,
            (false, false) => 8,
            (false, true) => return Err(Error::MalformedData("av1C twelve_bit set without high_bitdepth")),
        };
        let monochrome = bits.read_bool()?;
        let chroma_subsampling_x = bits.read_u8(1)?;
        let chroma_subsampling_y = bits.read_u8(1)?;
        let chroma_sample_position = bits.read_u8(2)?;

        let reserved = bits.read_u8(3)?;
        let initial_presentation_delay_present = bits.read_bool()?;
        let delay_bits = bits.read_u8(4)?;
        if !lenient && (reserved != 0 || (!initial_presentation_delay_present && delay_bits != 0)) {
            return Err(Error::MalformedData("av1C reserved bits must be zero"));
        }

        Ok(Self {
            profile,
            level,
            tier,
            bit_depth,
            monochrome,
            chroma_subsampling_x,
            chroma_subsampling_y,
            chroma_sample_position,
            initial_presentation_delay_present,
            initial_presentation_delay_minus_one: if initial_presentation_delay_present { delay_bits } else { 0 },
            config_obus: try_copy(config_obus)?,
        })
    }

    /// Sequence header and metadata OBUs following the fixed fields. May be empty.
    pub fn config_obus(&self) -> &[u8] {
        &self.config_obus
    }

    pub fn to_av1c(&self) -> Result<TryVec<u8>> {
        let mut out = Vec::new();
        out.try_reserve(AV1C_HEADER_LEN + self.config_obus.len())?;
        out.write_u8(0x81)?;
        out.write_u8(self.profile << 5 | self.level)?;
        out.write_u8(
            self.tier << 7
                | u8::from(self.bit_depth > 8) << 6
                | u8::from(self.bit_depth == 12) << 5
                | u8::from(self.monochrome) << 4
                | self.chroma_subsampling_x << 3
                | self.chroma_subsampling_y << 2
                | self.chroma_sample_position,
        )?;
        let delay = if self.initial_presentation_delay_present {
            0x10 | self.initial_presentation_delay_minus_one
        } else {
            0
        };
        out.write_u8(delay)?;
        out.extend_from_slice(&self.config_obus);
        Ok(out.into())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Main profile, level 8 (5.0), 8-bit 4:2:0, one sequence header OBU stub.
    pub(crate) const AV1C: [u8; 7] = [0x81, 0x08, 0x0C, 0x00, 0x0A, 0x01, 0x00];

    #[test]
    fn parses_record() {
        let config = Av1Config::parse(&AV1C, false).unwrap();
        assert_eq!(config.profile, 0);
        assert_eq!(config.level, 8);
        assert_eq!(config.bit_depth, 8);
        assert!(!config.monochrome);
        assert_eq!((config.chroma_subsampling_x, config.chroma_subsampling_y), (1, 1));
        assert_eq!(config.config_obus(), &[0x0A, 0x01, 0x00]);
        assert_eq!(config.to_av1c().unwrap().to_vec(), AV1C);
    }

    #[test]
    fn bit_depth_flags() {
        let mut record = AV1C;
        record[2] |= 0x60;
        assert_eq!(Av1Config::parse(&record, false).unwrap().bit_depth, 12);
        record[2] &= !0x20;
        assert_eq!(Av1Config::parse(&record, false).unwrap().bit_depth, 10);
        record[2] = (record[2] & !0x40) | 0x20;
        assert!(Av1Config::parse(&record, false).is_err());
    }

    #[test]
    fn rejects_bad_marker_and_short_input() {
        let mut record = AV1C;
        record[0] = 0x01;
        assert!(matches!(Av1Config::parse(&record, false), Err(Error::MalformedData(_))));
        record[0] = 0x82;
        assert!(Av1Config::parse(&record, false).is_err());
        assert!(matches!(Av1Config::parse(&AV1C[..3], false), Err(Error::MalformedData("av1C too short"))));
    }

    #[test]
    fn reserved_bits_are_lenient() {
        let mut record = AV1C;
        record[3] = 0xE0;
        assert!(Av1Config::parse(&record, false).is_err());
        assert!(Av1Config::parse(&record, true).is_ok());
    }

    #[test]
    fn header_only_record() {
        let config = Av1Config::parse(&AV1C[..4], false).unwrap();
        assert!(config.config_obus().is_empty());
    }
}
