// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::nal::{starts_with_start_code, AnnexBUnits};
use crate::{try_copy, Error, Result, ToUsize, TryVec};
use arrayvec::ArrayVec;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_SPS_EXT: u8 = 13;

/// Profiles whose `avcC` record may carry the chroma/bit-depth extension.
const HIGH_PROFILES: [u8; 4] = [100, 110, 122, 144];

/// Parsed AVC decoder configuration.
///
/// Built either from an `AVCDecoderConfigurationRecord` (the `avcC` property
/// payload) or from an Annex-B byte stream holding one SPS and one PPS.
/// See ISO/IEC 14496-15:2019 § 5.3.3.1
#[derive(Debug)]
pub struct AvcConfig {
    pub profile_indication: u8,
    pub profile_compatibility: u8,
    pub level_indication: u8,
    /// Size in bytes of the NAL unit length prefix: 1, 2 or 4.
    pub nal_length_size: u8,
    pub(crate) sequence_parameter_sets: ArrayVec<TryVec<u8>, 31>,
    pub(crate) picture_parameter_sets: TryVec<TryVec<u8>>,
    /// Present for high profiles when the record carries it.
    pub chroma: Option<AvcChromaExtension>,
}

/// Trailing fields of an `avcC` record for profiles 100, 110, 122 and 144.
#[derive(Debug)]
pub struct AvcChromaExtension {
    pub chroma_format: u8,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    pub(crate) sequence_parameter_set_ext: TryVec<TryVec<u8>>,
}

impl AvcConfig {
    /// Parse either configuration form. Annex-B input is recognised by its start code.
    pub fn parse(data: &[u8], lenient: bool) -> Result<Self> {
        if starts_with_start_code(data) {
            Self::parse_annexb(data)
        } else {
            Self::parse_record(data, lenient)
        }
    }

    fn parse_record(data: &[u8], lenient: bool) -> Result<Self> {
        let mut src = data;
        let version = src.read_u8()?;
        if version != 1 {
            return Err(Error::MalformedData("unsupported avcC configurationVersion"));
        }
        let profile_indication = src.read_u8()?;
        let profile_compatibility = src.read_u8()?;
        let level_indication = src.read_u8()?;

        let b = src.read_u8()?;
        if !lenient && b & 0xFC != 0xFC {
            return Err(Error::MalformedData("avcC reserved bits before lengthSizeMinusOne must be set"));
        }
        let nal_length_size = (b & 0x03) + 1;
        if nal_length_size == 3 {
            return Err(Error::MalformedData("avcC NAL length size of 3 bytes is invalid"));
        }

        let b = src.read_u8()?;
        if !lenient && b & 0xE0 != 0xE0 {
            return Err(Error::MalformedData("avcC reserved bits before numOfSequenceParameterSets must be set"));
        }
        let mut sequence_parameter_sets = ArrayVec::new();
        for _ in 0..b & 0x1F {
            sequence_parameter_sets.push(read_parameter_set(&mut src, NAL_SPS)?);
        }

        let num_pps = src.read_u8()?;
        let mut picture_parameter_sets = TryVec::with_capacity(num_pps.to_usize())?;
        for _ in 0..num_pps {
            picture_parameter_sets.push(read_parameter_set(&mut src, NAL_PPS)?)?;
        }

        if sequence_parameter_sets.is_empty() || picture_parameter_sets.is_empty() {
            return Err(Error::MalformedData("avcC must carry at least one SPS and one PPS"));
        }

        let chroma = if !src.is_empty() && HIGH_PROFILES.contains(&profile_indication) {
            Some(read_chroma_extension(&mut src, lenient)?)
        } else {
            None
        };

        if !src.is_empty() {
            debug!("avcC: {} bytes past the declared parameter sets", src.len());
            return Err(Error::MalformedData("avcC parameter set counts do not match record length"));
        }

        Ok(Self {
            profile_indication,
            profile_compatibility,
            level_indication,
            nal_length_size,
            sequence_parameter_sets,
            picture_parameter_sets,
            chroma,
        })
    }

    fn parse_annexb(data: &[u8]) -> Result<Self> {
        let mut sps: Option<&[u8]> = None;
        let mut pps: Option<&[u8]> = None;
        for unit in AnnexBUnits::new(data) {
            let unit = unit?;
            let slot = match unit[0] & 0x1F {
                NAL_SPS => &mut sps,
                NAL_PPS => &mut pps,
                other => {
                    debug!("AVC config: rejecting NAL unit type {other}");
                    return Err(Error::MalformedData("only SPS and PPS NAL units are allowed in an AVC decoder config"));
                },
            };
            if slot.replace(unit).is_some() {
                return Err(Error::MalformedData("duplicate parameter set in AVC decoder config"));
            }
        }
        let (Some(sps), Some(pps)) = (sps, pps) else {
            return Err(Error::MalformedData("AVC decoder config requires one SPS and one PPS"));
        };
        // nal header, profile_idc, constraint flags, level_idc
        let &[_, profile_indication, profile_compatibility, level_indication, ..] = sps else {
            return Err(Error::MalformedData("SPS too short"));
        };
        for set in [sps, pps] {
            if set.len() > u16::MAX.into() {
                return Err(Error::MalformedData("parameter set too large for avcC"));
            }
        }

        let mut sequence_parameter_sets = ArrayVec::new();
        sequence_parameter_sets.push(try_copy(sps)?);
        let mut picture_parameter_sets = TryVec::new();
        picture_parameter_sets.push(try_copy(pps)?)?;

        Ok(Self {
            profile_indication,
            profile_compatibility,
            level_indication,
            nal_length_size: 4,
            sequence_parameter_sets,
            picture_parameter_sets,
            chroma: None,
        })
    }

    pub fn sequence_parameter_sets(&self) -> impl Iterator<Item = &[u8]> {
        self.sequence_parameter_sets.iter().map(|set| &set[..])
    }

    pub fn picture_parameter_sets(&self) -> impl Iterator<Item = &[u8]> {
        self.picture_parameter_sets.iter().map(|set| &set[..])
    }

    /// Serialize as an `AVCDecoderConfigurationRecord`, whichever form it was parsed from.
    pub fn to_avcc(&self) -> Result<TryVec<u8>> {
        let mut out = Vec::new();
        out.write_u8(1)?;
        out.write_u8(self.profile_indication)?;
        out.write_u8(self.profile_compatibility)?;
        out.write_u8(self.level_indication)?;
        out.write_u8(0xFC | (self.nal_length_size - 1))?;
        out.write_u8(0xE0 | self.sequence_parameter_sets.len() as u8)?;
        for set in &self.sequence_parameter_sets {
            write_parameter_set(&mut out, set)?;
        }
        out.write_u8(u8::try_from(self.picture_parameter_sets.len())?)?;
        for set in self.picture_parameter_sets.iter() {
            write_parameter_set(&mut out, set)?;
        }
        if let Some(chroma) = &self.chroma {
            out.write_u8(0xFC | chroma.chroma_format)?;
            out.write_u8(0xF8 | (chroma.bit_depth_luma - 8))?;
            out.write_u8(0xF8 | (chroma.bit_depth_chroma - 8))?;
            out.write_u8(u8::try_from(chroma.sequence_parameter_set_ext.len())?)?;
            for set in chroma.sequence_parameter_set_ext.iter() {
                write_parameter_set(&mut out, set)?;
            }
        }
        Ok(out.into())
    }
}

fn read_parameter_set(src: &mut &[u8], expected_type: u8) -> Result<TryVec<u8>> {
    let len = src.read_u16::<BigEndian>()?.to_usize();
    if len == 0 {
        return Err(Error::MalformedData("empty parameter set in avcC"));
    }
    if src.len() < len {
        return Err(Error::MalformedData("avcC parameter set length exceeds record"));
    }
    let (set, rest) = src.split_at(len);
    if set[0] & 0x1F != expected_type {
        return Err(Error::MalformedData("unexpected NAL unit type in avcC"));
    }
    *src = rest;
    try_copy(set)
}

fn read_chroma_extension(src: &mut &[u8], lenient: bool) -> Result<AvcChromaExtension> {
    let chroma = src.read_u8()?;
    let luma = src.read_u8()?;
    let chroma_depth = src.read_u8()?;
    if !lenient && (chroma & 0xFC != 0xFC || luma & 0xF8 != 0xF8 || chroma_depth & 0xF8 != 0xF8) {
        return Err(Error::MalformedData("avcC extension reserved bits must be set"));
    }
    let count = src.read_u8()?;
    let mut sequence_parameter_set_ext = TryVec::with_capacity(count.to_usize())?;
    for _ in 0..count {
        sequence_parameter_set_ext.push(read_parameter_set(src, NAL_SPS_EXT)?)?;
    }
    Ok(AvcChromaExtension {
        chroma_format: chroma & 0x03,
        bit_depth_luma: (luma & 0x07) + 8,
        bit_depth_chroma: (chroma_depth & 0x07) + 8,
        sequence_parameter_set_ext,
    })
}

fn write_parameter_set(out: &mut Vec<u8>, set: &[u8]) -> Result<()> {
    out.write_u16::<BigEndian>(u16::try_from(set.len())?)?;
    out.try_reserve(set.len())?;
    out.extend_from_slice(set);
    Ok(())
}
