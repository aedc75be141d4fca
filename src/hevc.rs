// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HEVC decoder configuration: the `hvcC` record and its Annex-B equivalent.
//!
//! See ISO/IEC 14496-15:2019 § 8.3.3.1 and ITU-T H.265 § 7.3.2.2

use crate::nal::{read_ue, starts_with_start_code, unescape_rbsp, AnnexBUnits};
use crate::{try_copy, Error, Result, ToUsize, TryVec};
use bitreader::BitReader;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

const NAL_VPS: u8 = 32;
const NAL_SPS: u8 = 33;
const NAL_PPS: u8 = 34;

const HVCC_HEADER_LEN: usize = 22;

/// Enough RBSP for the SPS header, profile_tier_level with seven sub-layers,
/// and the fields up to the bit depths.
const SPS_PREFIX_LEN: usize = 128;

#[derive(Debug)]
pub struct HevcConfig {
    pub general_profile_space: u8,
    pub general_tier_flag: bool,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    /// 48 bits
    pub general_constraint_indicator_flags: u64,
    pub general_level_idc: u8,
    pub min_spatial_segmentation_idc: u16,
    pub parallelism_type: u8,
    pub chroma_format_idc: u8,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    pub avg_frame_rate: u16,
    pub constant_frame_rate: u8,
    pub num_temporal_layers: u8,
    pub temporal_id_nested: bool,
    /// Size in bytes of the NAL unit length prefix: 1, 2 or 4.
    pub nal_length_size: u8,
    pub(crate) arrays: TryVec<HevcNalArray>,
}

/// Parameter sets of one NAL unit type, as grouped in `hvcC`.
#[derive(Debug)]
pub struct HevcNalArray {
    pub array_completeness: bool,
    pub nal_unit_type: u8,
    pub(crate) units: TryVec<TryVec<u8>>,
}

impl HevcNalArray {
    pub fn units(&self) -> impl Iterator<Item = &[u8]> {
        self.units.iter().map(|unit| &unit[..])
    }
}

fn unit_type(unit: &[u8]) -> u8 {
    (unit[0] >> 1) & 0x3F
}

impl HevcConfig {
    pub fn parse(data: &[u8], lenient: bool) -> Result<Self> {
        if starts_with_start_code(data) {
            Self::parse_annexb(data)
        } else {
            Self::parse_record(data, lenient)
        }
    }

    fn parse_record(data: &[u8], lenient: bool) -> Result<Self> {
        if data.len() <= HVCC_HEADER_LEN {
            return Err(Error::MalformedData("hvcC too short"));
        }
        let (header, mut src) = data.split_at(HVCC_HEADER_LEN);
        let mut bits = BitReader::new(header);

        if bits.read_u8(8)? != 1 {
            return Err(Error::MalformedData("unsupported hvcC configurationVersion"));
        }
        let general_profile_space = bits.read_u8(2)?;
        let general_tier_flag = bits.read_bool()?;
        let general_profile_idc = bits.read_u8(5)?;
        let general_profile_compatibility_flags = bits.read_u32(32)?;
        let general_constraint_indicator_flags = bits.read_u64(48)?;
        let general_level_idc = bits.read_u8(8)?;

        let mut reserved_ok = bits.read_u8(4)? == 0xF;
        let min_spatial_segmentation_idc = bits.read_u16(12)?;
        reserved_ok &= bits.read_u8(6)? == 0x3F;
        let parallelism_type = bits.read_u8(2)?;
        reserved_ok &= bits.read_u8(6)? == 0x3F;
        let chroma_format_idc = bits.read_u8(2)?;
        reserved_ok &= bits.read_u8(5)? == 0x1F;
        let bit_depth_luma = bits.read_u8(3)? + 8;
        reserved_ok &= bits.read_u8(5)? == 0x1F;
        let bit_depth_chroma = bits.read_u8(3)? + 8;
        if !reserved_ok && !lenient {
            return Err(Error::MalformedData("hvcC reserved bits must be set"));
        }

        let avg_frame_rate = bits.read_u16(16)?;
        let constant_frame_rate = bits.read_u8(2)?;
        let num_temporal_layers = bits.read_u8(3)?;
        let temporal_id_nested = bits.read_bool()?;
        let nal_length_size = bits.read_u8(2)? + 1;
        if nal_length_size == 3 {
            return Err(Error::MalformedData("hvcC NAL length size of 3 bytes is invalid"));
        }

        let num_arrays = src.read_u8()?;
        let mut arrays = TryVec::with_capacity(num_arrays.to_usize())?;
        for _ in 0..num_arrays {
            arrays.push(read_nal_array(&mut src)?)?;
        }
        if !src.is_empty() {
            debug!("hvcC: {} bytes past the declared arrays", src.len());
            return Err(Error::MalformedData("hvcC array counts do not match record length"));
        }

        let config = Self {
            general_profile_space,
            general_tier_flag,
            general_profile_idc,
            general_profile_compatibility_flags,
            general_constraint_indicator_flags,
            general_level_idc,
            min_spatial_segmentation_idc,
            parallelism_type,
            chroma_format_idc,
            bit_depth_luma,
            bit_depth_chroma,
            avg_frame_rate,
            constant_frame_rate,
            num_temporal_layers,
            temporal_id_nested,
            nal_length_size,
            arrays,
        };
        for required in [NAL_VPS, NAL_SPS, NAL_PPS] {
            if config.parameter_sets(required).next().is_none() {
                return Err(Error::MalformedData("hvcC must carry a VPS, an SPS and a PPS"));
            }
        }
        Ok(config)
    }

    fn parse_annexb(data: &[u8]) -> Result<Self> {
        let mut vps: Option<&[u8]> = None;
        let mut sps: Option<&[u8]> = None;
        let mut pps: Option<&[u8]> = None;
        for unit in AnnexBUnits::new(data) {
            let unit = unit?;
            let slot = match unit_type(unit) {
                NAL_VPS => &mut vps,
                NAL_SPS => &mut sps,
                NAL_PPS => &mut pps,
                other => {
                    debug!("HEVC config: rejecting NAL unit type {other}");
                    return Err(Error::MalformedData("only VPS, SPS and PPS NAL units are allowed in an HEVC decoder config"));
                },
            };
            if slot.replace(unit).is_some() {
                return Err(Error::MalformedData("duplicate parameter set in HEVC decoder config"));
            }
        }
        let (Some(vps), Some(sps), Some(pps)) = (vps, sps, pps) else {
            return Err(Error::MalformedData("HEVC decoder config requires one VPS, one SPS and one PPS"));
        };
        if sps.len() <= 2 {
            return Err(Error::MalformedData("SPS too short"));
        }
        let summary = SpsSummary::parse(&unescape_rbsp(&sps[2..], SPS_PREFIX_LEN)?)?;

        let mut arrays = TryVec::with_capacity(3)?;
        for (nal_unit_type, unit) in [(NAL_VPS, vps), (NAL_SPS, sps), (NAL_PPS, pps)] {
            if unit.len() > u16::MAX.into() {
                return Err(Error::MalformedData("parameter set too large for hvcC"));
            }
            let mut units = TryVec::with_capacity(1)?;
            units.push(try_copy(unit)?)?;
            arrays.push(HevcNalArray { array_completeness: true, nal_unit_type, units })?;
        }

        Ok(Self {
            general_profile_space: summary.profile_space,
            general_tier_flag: summary.tier_flag,
            general_profile_idc: summary.profile_idc,
            general_profile_compatibility_flags: summary.compatibility_flags,
            general_constraint_indicator_flags: summary.constraint_flags,
            general_level_idc: summary.level_idc,
            min_spatial_segmentation_idc: 0,
            parallelism_type: 0,
            chroma_format_idc: summary.chroma_format_idc,
            bit_depth_luma: summary.bit_depth_luma,
            bit_depth_chroma: summary.bit_depth_chroma,
            avg_frame_rate: 0,
            constant_frame_rate: 0,
            num_temporal_layers: summary.max_sub_layers,
            temporal_id_nested: summary.temporal_id_nesting,
            nal_length_size: 4,
            arrays,
        })
    }

    pub fn arrays(&self) -> &[HevcNalArray] {
        &self.arrays
    }

    /// All parameter sets of `nal_unit_type`, across arrays.
    pub fn parameter_sets(&self, nal_unit_type: u8) -> impl Iterator<Item = &[u8]> {
        self.arrays
            .iter()
            .filter(move |array| array.nal_unit_type == nal_unit_type)
            .flat_map(HevcNalArray::units)
    }

    pub fn to_hvcc(&self) -> Result<TryVec<u8>> {
        let mut out = Vec::new();
        out.write_u8(1)?;
        out.write_u8(self.general_profile_space << 6 | u8::from(self.general_tier_flag) << 5 | self.general_profile_idc)?;
        out.write_u32::<BigEndian>(self.general_profile_compatibility_flags)?;
        out.write_uint::<BigEndian>(self.general_constraint_indicator_flags, 6)?;
        out.write_u8(self.general_level_idc)?;
        out.write_u16::<BigEndian>(0xF000 | self.min_spatial_segmentation_idc)?;
        out.write_u8(0xFC | self.parallelism_type)?;
        out.write_u8(0xFC | self.chroma_format_idc)?;
        out.write_u8(0xF8 | (self.bit_depth_luma - 8))?;
        out.write_u8(0xF8 | (self.bit_depth_chroma - 8))?;
        out.write_u16::<BigEndian>(self.avg_frame_rate)?;
        out.write_u8(
            self.constant_frame_rate << 6
                | self.num_temporal_layers << 3
                | u8::from(self.temporal_id_nested) << 2
                | (self.nal_length_size - 1),
        )?;
        out.write_u8(u8::try_from(self.arrays.len())?)?;
        for array in self.arrays.iter() {
            out.write_u8(u8::from(array.array_completeness) << 7 | array.nal_unit_type)?;
            out.write_u16::<BigEndian>(u16::try_from(array.units.len())?)?;
            for unit in array.units.iter() {
                out.write_u16::<BigEndian>(u16::try_from(unit.len())?)?;
                out.try_reserve(unit.len())?;
                out.extend_from_slice(unit);
            }
        }
        Ok(out.into())
    }
}

fn read_nal_array(src: &mut &[u8]) -> Result<HevcNalArray> {
    let b = src.read_u8()?;
    let array_completeness = b & 0x80 != 0;
    let nal_unit_type = b & 0x3F;
    let num_nalus = src.read_u16::<BigEndian>()?;
    let mut units = TryVec::with_capacity(num_nalus.to_usize())?;
    for _ in 0..num_nalus {
        let len = src.read_u16::<BigEndian>()?.to_usize();
        if len == 0 {
            return Err(Error::MalformedData("empty NAL unit in hvcC"));
        }
        if src.len() < len {
            return Err(Error::MalformedData("hvcC NAL unit length exceeds record"));
        }
        let (unit, rest) = src.split_at(len);
        if unit_type(unit) != nal_unit_type {
            return Err(Error::MalformedData("NAL unit type does not match its hvcC array"));
        }
        units.push(try_copy(unit)?)?;
        *src = rest;
    }
    Ok(HevcNalArray { array_completeness, nal_unit_type, units })
}

/// Leading SPS fields needed to fill in an `hvcC` header.
struct SpsSummary {
    max_sub_layers: u8,
    temporal_id_nesting: bool,
    profile_space: u8,
    tier_flag: bool,
    profile_idc: u8,
    compatibility_flags: u32,
    constraint_flags: u64,
    level_idc: u8,
    chroma_format_idc: u8,
    bit_depth_luma: u8,
    bit_depth_chroma: u8,
}

impl SpsSummary {
    /// `rbsp` starts after the two-byte NAL unit header.
    fn parse(rbsp: &[u8]) -> Result<Self> {
        let mut bits = BitReader::new(rbsp);
        bits.skip(4)?; // sps_video_parameter_set_id
        let max_sub_layers_minus1 = bits.read_u8(3)?;
        if max_sub_layers_minus1 > 6 {
            return Err(Error::MalformedData("SPS sps_max_sub_layers_minus1 out of range"));
        }
        let temporal_id_nesting = bits.read_bool()?;

        let profile_space = bits.read_u8(2)?;
        let tier_flag = bits.read_bool()?;
        let profile_idc = bits.read_u8(5)?;
        let compatibility_flags = bits.read_u32(32)?;
        let constraint_flags = bits.read_u64(48)?;
        let level_idc = bits.read_u8(8)?;
        skip_sub_layers(&mut bits, max_sub_layers_minus1)?;

        read_ue(&mut bits)?; // sps_seq_parameter_set_id
        let chroma_format_idc = read_ue(&mut bits)?;
        if chroma_format_idc > 3 {
            return Err(Error::MalformedData("SPS chroma_format_idc out of range"));
        }
        if chroma_format_idc == 3 {
            bits.skip(1)?; // separate_colour_plane_flag
        }
        read_ue(&mut bits)?; // pic_width_in_luma_samples
        read_ue(&mut bits)?; // pic_height_in_luma_samples
        if bits.read_bool()? {
            for _ in 0..4 {
                read_ue(&mut bits)?; // conf_win offsets
            }
        }
        let bit_depth_luma_minus8 = read_ue(&mut bits)?;
        let bit_depth_chroma_minus8 = read_ue(&mut bits)?;
        if bit_depth_luma_minus8 > 7 || bit_depth_chroma_minus8 > 7 {
            return Err(Error::MalformedData("SPS bit depth out of range"));
        }

        Ok(Self {
            max_sub_layers: max_sub_layers_minus1 + 1,
            temporal_id_nesting,
            profile_space,
            tier_flag,
            profile_idc,
            compatibility_flags,
            constraint_flags,
            level_idc,
            chroma_format_idc: chroma_format_idc as u8,
            bit_depth_luma: bit_depth_luma_minus8 as u8 + 8,
            bit_depth_chroma: bit_depth_chroma_minus8 as u8 + 8,
        })
    }
}

fn skip_sub_layers(bits: &mut BitReader<'_>, max_sub_layers_minus1: u8) -> Result<()> {
    let mut profile_present = [false; 8];
    let mut level_present = [false; 8];
    let count = max_sub_layers_minus1.to_usize();
    for i in 0..count {
        profile_present[i] = bits.read_bool()?;
        level_present[i] = bits.read_bool()?;
    }
    if count > 0 {
        bits.skip(2 * (8 - count as u64))?; // reserved_zero_2bits
    }
    for i in 0..count {
        if profile_present[i] {
            bits.skip(88)?;
        }
        if level_present[i] {
            bits.skip(8)?;
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const VPS: [u8; 3] = [0x40, 0x01, 0x0C];
    /// Main profile, level 3.1, 64x64, 4:2:0, 8-bit. Carries emulation prevention bytes.
    pub(crate) const SPS: [u8; 23] = [
        0x42, 0x01, 0x01, 0x01, 0x60, 0x00, 0x00, 0x03, 0x00, 0x90, 0x00, 0x00, 0x03, 0x00, 0x00, 0x03, 0x00,
        0x5D, 0xA0, 0x20, 0x81, 0x05, 0xC0,
    ];
    pub(crate) const PPS: [u8; 3] = [0x44, 0x01, 0xC1];

    pub(crate) fn annexb() -> Vec<u8> {
        let mut out = Vec::new();
        for unit in [&VPS[..], &SPS[..], &PPS[..]] {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(unit);
        }
        out
    }

    pub(crate) fn hvcc() -> Vec<u8> {
        let mut out = vec![
            0x01, 0x01, 0x60, 0x00, 0x00, 0x00, 0x90, 0x00, 0x00, 0x00, 0x00, 0x00, 0x5D, 0xF0, 0x00, 0xFC, 0xFD,
            0xF8, 0xF8, 0x00, 0x00, 0x0F, 0x03,
        ];
        for (nal_type, unit) in [(NAL_VPS, &VPS[..]), (NAL_SPS, &SPS[..]), (NAL_PPS, &PPS[..])] {
            out.push(0x80 | nal_type);
            out.extend_from_slice(&[0x00, 0x01, 0x00, unit.len() as u8]);
            out.extend_from_slice(unit);
        }
        out
    }

    #[test]
    fn parses_record() {
        let config = HevcConfig::parse(&hvcc(), false).unwrap();
        assert_eq!(config.general_profile_idc, 1);
        assert_eq!(config.general_level_idc, 93);
        assert_eq!(config.general_profile_compatibility_flags, 0x6000_0000);
        assert_eq!(config.chroma_format_idc, 1);
        assert_eq!(config.bit_depth_luma, 8);
        assert_eq!(config.nal_length_size, 4);
        assert_eq!(config.num_temporal_layers, 1);
        assert!(config.temporal_id_nested);
        assert_eq!(config.arrays().len(), 3);
        assert_eq!(config.parameter_sets(NAL_PPS).next(), Some(&PPS[..]));
    }

    #[test]
    fn record_round_trips() {
        let record = hvcc();
        let config = HevcConfig::parse(&record, false).unwrap();
        assert_eq!(config.to_hvcc().unwrap().to_vec(), record);
    }

    #[test]
    fn annexb_matches_record() {
        let config = HevcConfig::parse(&annexb(), false).unwrap();
        assert_eq!(config.general_profile_idc, 1);
        assert_eq!(config.general_level_idc, 93);
        assert_eq!(config.general_constraint_indicator_flags, 0x9000_0000_0000);
        assert_eq!(config.chroma_format_idc, 1);
        assert_eq!(config.bit_depth_chroma, 8);
        assert_eq!(config.to_hvcc().unwrap().to_vec(), hvcc());
    }

    #[test]
    fn missing_pps_array() {
        let mut record = hvcc();
        record[22] = 2;
        record.truncate(record.len() - (1 + 4 + PPS.len()));
        assert!(matches!(
            HevcConfig::parse(&record, false),
            Err(Error::MalformedData("hvcC must carry a VPS, an SPS and a PPS"))
        ));
    }

    #[test]
    fn trailing_bytes() {
        let mut record = hvcc();
        record.push(0);
        assert!(matches!(HevcConfig::parse(&record, false), Err(Error::MalformedData(_))));
    }

    #[test]
    fn mislabelled_array() {
        let mut record = hvcc();
        record[23] = 0x80 | NAL_SPS; // VPS array claims to hold SPS units
        assert!(matches!(
            HevcConfig::parse(&record, false),
            Err(Error::MalformedData("NAL unit type does not match its hvcC array"))
        ));
    }

    #[test]
    fn lenient_skips_reserved_bits() {
        let mut record = hvcc();
        record[15] = 0x00;
        assert!(HevcConfig::parse(&record, false).is_err());
        assert!(HevcConfig::parse(&record, true).is_ok());
    }

    #[test]
    fn annexb_needs_exactly_one_of_each() {
        let mut doubled = annexb();
        doubled.extend_from_slice(&[0, 0, 1]);
        doubled.extend_from_slice(&PPS);
        assert!(matches!(
            HevcConfig::parse(&doubled, false),
            Err(Error::MalformedData("duplicate parameter set in HEVC decoder config"))
        ));

        let mut with_slice = annexb();
        with_slice.extend_from_slice(&[0, 0, 1, 0x26, 0x01, 0xAF]);
        assert!(HevcConfig::parse(&with_slice, false).is_err());

        let no_vps = [0, 0, 1, 0x42, 0x01, 0x01, 0, 0, 1, 0x44, 0x01, 0xC1];
        assert!(HevcConfig::parse(&no_vps, false).is_err());
    }

    #[test]
    fn truncated_sps_is_malformed() {
        let stream = [0, 0, 1, 0x40, 0x01, 0x0C, 0, 0, 1, 0x42, 0x01, 0x01, 0x01, 0x60, 0, 0, 1, 0x44, 0x01, 0xC1];
        assert!(matches!(HevcConfig::parse(&stream, false), Err(Error::MalformedData(_))));
    }
}
