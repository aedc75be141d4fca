// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Annex-B byte stream helpers shared by the AVC and HEVC code paths.
//!
//! See ITU-T H.264 Annex B / H.265 Annex B.

use crate::{Error, Result, TryVec};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// True if `data` opens with a 3- or 4-byte start code.
pub(crate) fn starts_with_start_code(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 1]) || data.starts_with(&[0, 0, 0, 1])
}

fn find_start_code(data: &[u8]) -> Option<usize> {
    data.windows(3).position(|w| w == [0, 0, 1])
}

/// Iterates the NAL units of an Annex-B byte stream.
///
/// Yields an error and stops if the stream does not open with a start code
/// or if two start codes enclose an empty unit.
pub(crate) struct AnnexBUnits<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AnnexBUnits<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn fail(&mut self, msg: &'static str) -> Option<Result<&'a [u8]>> {
        self.pos = self.data.len();
        Some(Err(Error::MalformedData(msg)))
    }
}

impl<'a> Iterator for AnnexBUnits<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.data[self.pos..];
        if rest.is_empty() {
            return None;
        }
        let zeros = rest.iter().take_while(|&&b| b == 0).count();
        if zeros == rest.len() {
            // trailing_zero_8bits
            self.pos = self.data.len();
            return None;
        }
        if zeros < 2 || rest[zeros] != 1 {
            return self.fail("missing NAL start code");
        }
        let body_start = self.pos + zeros + 1;
        let body = &self.data[body_start..];
        let end = find_start_code(body).unwrap_or(body.len());
        let mut unit = &body[..end];
        while let [head @ .., 0] = unit {
            unit = head;
        }
        self.pos = body_start + end;
        if unit.is_empty() {
            return self.fail("empty NAL unit");
        }
        Some(Ok(unit))
    }
}

/// Check that an Annex-B stream splits cleanly into non-empty NAL units.
pub(crate) fn validate_annexb(data: &[u8]) -> Result<usize> {
    let mut count = 0;
    for unit in AnnexBUnits::new(data) {
        unit?;
        count += 1;
    }
    if count == 0 {
        return Err(Error::MalformedData("no NAL units in byte stream"));
    }
    Ok(count)
}

/// How a coded payload frames its NAL units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PayloadLayout {
    /// Big-endian length before every unit, as stored in the file.
    LengthPrefixed,
    AnnexB,
    /// Neither framing covers the payload; it is stored and written as is.
    Opaque,
}

impl PayloadLayout {
    /// Classify `data` for a decoder config using `length_size`-byte NAL lengths.
    ///
    /// Length prefixes take precedence: a length-prefixed sample whose first
    /// unit is 1 or 256..=511 bytes long opens with bytes that read as a start
    /// code. Only a payload the length walk does not consume exactly is taken
    /// as Annex-B, and then it must split into non-empty units that each fit
    /// a `length_size`-byte length.
    pub fn detect(data: &[u8], length_size: u8) -> Result<Self> {
        if is_length_prefixed(data, length_size) {
            return Ok(Self::LengthPrefixed);
        }
        if starts_with_start_code(data) {
            validate_annexb(data)?;
            if let Some(unit) = AnnexBUnits::new(data).flatten().find(|unit| !fits_length_size(unit.len(), length_size)) {
                log::debug!("{}-byte NAL unit does not fit a {length_size}-byte length", unit.len());
                return Err(Error::MalformedData("NAL unit too large for length size"));
            }
            return Ok(Self::AnnexB);
        }
        Ok(Self::Opaque)
    }
}

fn fits_length_size(len: usize, length_size: u8) -> bool {
    1u64.checked_shl(8 * u32::from(length_size)).is_none_or(|limit| (len as u64) < limit)
}

/// True if `data` is one or more non-empty units, each behind a
/// `length_size`-byte big-endian length, with no bytes left over.
pub(crate) fn is_length_prefixed(mut data: &[u8], length_size: u8) -> bool {
    if !matches!(length_size, 1 | 2 | 4) || data.is_empty() {
        return false;
    }
    while !data.is_empty() {
        let Ok(len) = data.read_uint::<BigEndian>(usize::from(length_size)) else {
            return false;
        };
        match usize::try_from(len) {
            Ok(len) if len != 0 && len <= data.len() => data = &data[len..],
            _ => return false,
        }
    }
    true
}

/// Rewrite an Annex-B stream with `length_size`-byte big-endian length prefixes.
///
/// Fails with [`Error::MalformedData`] if a unit is too long for that width.
pub(crate) fn annexb_to_length_prefixed(data: &[u8], length_size: u8) -> Result<TryVec<u8>> {
    if !matches!(length_size, 1 | 2 | 4) {
        return Err(Error::InvalidArgument("NAL length size must be 1, 2 or 4"));
    }
    let width = usize::from(length_size);
    let mut out = Vec::new();
    out.try_reserve(data.len())?;
    for unit in AnnexBUnits::new(data) {
        let unit = unit?;
        if !fits_length_size(unit.len(), length_size) {
            log::debug!("{}-byte NAL unit does not fit a {length_size}-byte length", unit.len());
            return Err(Error::MalformedData("NAL unit too large for length size"));
        }
        out.try_reserve(width + unit.len())?;
        out.write_uint::<BigEndian>(unit.len() as u64, width)?;
        out.extend_from_slice(unit);
    }
    Ok(out.into())
}

/// Strip emulation prevention bytes (`00 00 03` → `00 00`) from the start of a NAL unit.
///
/// Only the first `limit` output bytes are produced; parameter-set summaries
/// never need more than the leading fields.
pub(crate) fn unescape_rbsp(unit: &[u8], limit: usize) -> Result<TryVec<u8>> {
    let mut out = Vec::new();
    out.try_reserve(unit.len().min(limit))?;
    let mut zeros = 0;
    for &b in unit {
        if out.len() == limit {
            break;
        }
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    Ok(out.into())
}

/// Read an unsigned Exp-Golomb code.
pub(crate) fn read_ue(bits: &mut bitreader::BitReader<'_>) -> Result<u32> {
    let mut leading_zeros = 0u8;
    while !bits.read_bool()? {
        leading_zeros += 1;
        if leading_zeros > 31 {
            return Err(Error::MalformedData("exp-golomb overflow"));
        }
    }
    if leading_zeros == 0 {
        return Ok(0);
    }
    let suffix = bits.read_u32(leading_zeros)?;
    Ok((1u32 << leading_zeros) - 1 + suffix)
}
