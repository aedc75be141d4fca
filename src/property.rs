// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Item properties other than decoder configs. See ISO/IEC 23008-12 § 6.5
//!
//! Descriptive properties describe the reconstructed image. Transformative
//! properties (`clap`, `irot`, `imir`) change how it is displayed; they are
//! always associated as essential and come after every descriptive property.

use crate::arena::Index;
use crate::boxes::FourCC;
use crate::heif::ContainerId;
use crate::{try_copy, Error, Result, TryVec};
use arrayvec::ArrayVec;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

/// Identifies a property inside the [`Heif`](crate::Heif) that created it.
///
/// A property may be associated with any number of image items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyId {
    pub(crate) container: ContainerId,
    pub(crate) index: Index,
}

/// One entry of an item's property list, in `ipma` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyAssociation {
    pub property: PropertyId,
    pub essential: bool,
}

/// Contents of a `colr` property.
#[derive(Debug, PartialEq)]
pub enum ColourInformation {
    /// See ITU-T H.273
    Nclx {
        colour_primaries: u16,
        transfer_characteristics: u16,
        matrix_coefficients: u16,
        full_range: bool,
    },
    /// `rICC` when `restricted`, `prof` otherwise.
    Icc { restricted: bool, profile: TryVec<u8> },
}

/// Axis of an `imir` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorAxis {
    /// `axis = 0`: left and right swap.
    Vertical,
    /// `axis = 1`: top and bottom swap.
    Horizontal,
}

/// `clap` fractions. Offsets are measured from the image centre.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanAperture {
    pub width_n: u32,
    pub width_d: u32,
    pub height_n: u32,
    pub height_d: u32,
    pub horiz_off_n: i32,
    pub horiz_off_d: u32,
    pub vert_off_n: i32,
    pub vert_off_d: u32,
}

#[derive(Debug, PartialEq)]
pub enum Property {
    /// `pasp`
    PixelAspectRatio { h_spacing: u32, v_spacing: u32 },
    /// `colr`
    Colour(ColourInformation),
    /// `pixi`: bits per channel
    PixelInformation(ArrayVec<u8, 16>),
    /// `rloc`: position inside the image this one is a part of
    RelativeLocation { horizontal_offset: u32, vertical_offset: u32 },
    /// `auxC`: URN of the auxiliary image type, plus codec-specific subtype bytes
    AuxiliaryType { aux_type: TryVec<u8>, subtype: TryVec<u8> },
    /// `clap`
    CleanAperture(CleanAperture),
    /// `irot`: anti-clockwise, in degrees
    Rotation(u16),
    /// `imir`
    Mirror(MirrorAxis),
}

impl Property {
    pub fn box_type(&self) -> FourCC {
        match self {
            Self::PixelAspectRatio { .. } => FourCC::PASP,
            Self::Colour(_) => FourCC::COLR,
            Self::PixelInformation(_) => FourCC::PIXI,
            Self::RelativeLocation { .. } => FourCC::RLOC,
            Self::AuxiliaryType { .. } => FourCC::AUXC,
            Self::CleanAperture(_) => FourCC::CLAP,
            Self::Rotation(_) => FourCC::IROT,
            Self::Mirror(_) => FourCC::IMIR,
        }
    }

    pub fn is_transformative(&self) -> bool {
        matches!(self, Self::CleanAperture(_) | Self::Rotation(_) | Self::Mirror(_))
    }

    /// Rejects values the box cannot encode or that describe no image.
    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Self::PixelAspectRatio { h_spacing, v_spacing } if *h_spacing == 0 || *v_spacing == 0 => {
                Err(Error::InvalidArgument("pixel aspect ratio spacing must be positive"))
            },
            Self::Colour(ColourInformation::Icc { profile, .. }) if profile.is_empty() => {
                Err(Error::InvalidArgument("ICC profile is empty"))
            },
            Self::PixelInformation(bits) if bits.is_empty() || bits.contains(&0) => {
                Err(Error::InvalidArgument("pixi needs at least one channel and non-zero bit depths"))
            },
            Self::AuxiliaryType { aux_type, .. } if aux_type.is_empty() || aux_type.contains(&0) => {
                Err(Error::InvalidArgument("auxiliary type must be a non-empty URN without NUL bytes"))
            },
            Self::CleanAperture(clap) if [clap.width_d, clap.height_d, clap.horiz_off_d, clap.vert_off_d].contains(&0) => {
                Err(Error::InvalidArgument("clean aperture denominators must be non-zero"))
            },
            Self::Rotation(angle) if angle % 90 != 0 || *angle >= 360 => {
                Err(Error::InvalidArgument("rotation must be 0, 90, 180 or 270 degrees"))
            },
            _ => Ok(()),
        }
    }

    /// Parse the payload of a `box_type` property box (the bytes after the box header).
    pub fn parse(box_type: FourCC, data: &[u8], lenient: bool) -> Result<Self> {
        let mut src = data;
        let property = match box_type {
            FourCC::PASP => Self::PixelAspectRatio {
                h_spacing: src.read_u32::<BigEndian>()?,
                v_spacing: src.read_u32::<BigEndian>()?,
            },
            FourCC::COLR => Self::Colour(read_colr(&mut src, lenient)?),
            FourCC::PIXI => Self::PixelInformation(read_pixi(&mut src, lenient)?),
            FourCC::RLOC => {
                read_fullbox_header(&mut src, lenient)?;
                Self::RelativeLocation {
                    horizontal_offset: src.read_u32::<BigEndian>()?,
                    vertical_offset: src.read_u32::<BigEndian>()?,
                }
            },
            FourCC::AUXC => {
                read_fullbox_header(&mut src, lenient)?;
                let (aux_type, subtype) = match src.iter().position(|&b| b == 0) {
                    Some(pos) => (&src[..pos], &src[pos + 1..]),
                    None => (src, &[][..]),
                };
                let property = Self::AuxiliaryType { aux_type: try_copy(aux_type)?, subtype: try_copy(subtype)? };
                src = &[];
                property
            },
            FourCC::CLAP => Self::CleanAperture(CleanAperture {
                width_n: src.read_u32::<BigEndian>()?,
                width_d: src.read_u32::<BigEndian>()?,
                height_n: src.read_u32::<BigEndian>()?,
                height_d: src.read_u32::<BigEndian>()?,
                horiz_off_n: src.read_i32::<BigEndian>()?,
                horiz_off_d: src.read_u32::<BigEndian>()?,
                vert_off_n: src.read_i32::<BigEndian>()?,
                vert_off_d: src.read_u32::<BigEndian>()?,
            }),
            FourCC::IROT => {
                let b = src.read_u8()?;
                if !lenient && b & 0xFC != 0 {
                    return Err(Error::MalformedData("irot reserved bits must be zero"));
                }
                Self::Rotation(u16::from(b & 0x03) * 90)
            },
            FourCC::IMIR => {
                let b = src.read_u8()?;
                if !lenient && b & 0xFE != 0 {
                    return Err(Error::MalformedData("imir reserved bits must be zero"));
                }
                Self::Mirror(if b & 0x01 == 0 { MirrorAxis::Vertical } else { MirrorAxis::Horizontal })
            },
            _ => return Err(Error::InvalidArgument("unsupported item property type")),
        };

        if !src.is_empty() {
            debug!("{box_type}: {} bytes past the property fields", src.len());
            if !lenient {
                return Err(Error::MalformedData("trailing bytes after property fields"));
            }
        }
        property.validate().map_err(|err| match err {
            Error::InvalidArgument(msg) => Error::MalformedData(msg),
            other => other,
        })?;
        Ok(property)
    }

    /// Serialize the property box payload, without the box header.
    pub fn to_payload(&self) -> Result<TryVec<u8>> {
        self.validate()?;
        let mut out = Vec::new();
        match self {
            Self::PixelAspectRatio { h_spacing, v_spacing } => {
                out.try_reserve(8)?;
                out.write_u32::<BigEndian>(*h_spacing)?;
                out.write_u32::<BigEndian>(*v_spacing)?;
            },
            Self::Colour(ColourInformation::Nclx {
                colour_primaries,
                transfer_characteristics,
                matrix_coefficients,
                full_range,
            }) => {
                out.try_reserve(11)?;
                out.extend_from_slice(FourCC::NCLX.as_bytes());
                out.write_u16::<BigEndian>(*colour_primaries)?;
                out.write_u16::<BigEndian>(*transfer_characteristics)?;
                out.write_u16::<BigEndian>(*matrix_coefficients)?;
                out.write_u8(if *full_range { 0x80 } else { 0 })?;
            },
            Self::Colour(ColourInformation::Icc { restricted, profile }) => {
                out.try_reserve(4 + profile.len())?;
                let colour_type = if *restricted { FourCC::RICC } else { FourCC::PROF };
                out.extend_from_slice(colour_type.as_bytes());
                out.extend_from_slice(profile);
            },
            Self::PixelInformation(bits) => {
                out.try_reserve(5 + bits.len())?;
                write_fullbox_header(&mut out)?;
                out.write_u8(bits.len() as u8)?;
                out.extend_from_slice(bits);
            },
            Self::RelativeLocation { horizontal_offset, vertical_offset } => {
                out.try_reserve(12)?;
                write_fullbox_header(&mut out)?;
                out.write_u32::<BigEndian>(*horizontal_offset)?;
                out.write_u32::<BigEndian>(*vertical_offset)?;
            },
            Self::AuxiliaryType { aux_type, subtype } => {
                out.try_reserve(5 + aux_type.len() + subtype.len())?;
                write_fullbox_header(&mut out)?;
                out.extend_from_slice(aux_type);
                out.write_u8(0)?;
                out.extend_from_slice(subtype);
            },
            Self::CleanAperture(clap) => {
                out.try_reserve(32)?;
                out.write_u32::<BigEndian>(clap.width_n)?;
                out.write_u32::<BigEndian>(clap.width_d)?;
                out.write_u32::<BigEndian>(clap.height_n)?;
                out.write_u32::<BigEndian>(clap.height_d)?;
                out.write_i32::<BigEndian>(clap.horiz_off_n)?;
                out.write_u32::<BigEndian>(clap.horiz_off_d)?;
                out.write_i32::<BigEndian>(clap.vert_off_n)?;
                out.write_u32::<BigEndian>(clap.vert_off_d)?;
            },
            Self::Rotation(angle) => {
                out.try_reserve(1)?;
                out.write_u8((angle / 90) as u8)?;
            },
            Self::Mirror(axis) => {
                out.try_reserve(1)?;
                out.write_u8(match axis {
                    MirrorAxis::Vertical => 0,
                    MirrorAxis::Horizontal => 1,
                })?;
            },
        }
        Ok(out.into())
    }
}

/// Version 0, no flags.
fn read_fullbox_header(src: &mut &[u8], lenient: bool) -> Result<()> {
    let version = src.read_u8()?;
    if version != 0 {
        return Err(Error::MalformedData("unsupported property version"));
    }
    let flags = src.read_u24::<BigEndian>()?;
    if flags != 0 && !lenient {
        return Err(Error::MalformedData("property flags must be zero"));
    }
    Ok(())
}

fn write_fullbox_header(out: &mut Vec<u8>) -> Result<()> {
    out.write_u32::<BigEndian>(0)?;
    Ok(())
}

fn read_colr(src: &mut &[u8], lenient: bool) -> Result<ColourInformation> {
    let mut colour_type = [0; 4];
    std::io::Read::read_exact(src, &mut colour_type)?;
    match FourCC::new(colour_type) {
        FourCC::NCLX => {
            let colour_primaries = src.read_u16::<BigEndian>()?;
            let transfer_characteristics = src.read_u16::<BigEndian>()?;
            let matrix_coefficients = src.read_u16::<BigEndian>()?;
            let b = src.read_u8()?;
            if !lenient && b & 0x7F != 0 {
                return Err(Error::MalformedData("colr reserved bits must be zero"));
            }
            Ok(ColourInformation::Nclx {
                colour_primaries,
                transfer_characteristics,
                matrix_coefficients,
                full_range: b & 0x80 != 0,
            })
        },
        code @ (FourCC::RICC | FourCC::PROF) => {
            let profile = try_copy(src)?;
            *src = &[];
            Ok(ColourInformation::Icc { restricted: code == FourCC::RICC, profile })
        },
        _ => Err(Error::MalformedData("unsupported colr colour type")),
    }
}

fn read_pixi(src: &mut &[u8], lenient: bool) -> Result<ArrayVec<u8, 16>> {
    read_fullbox_header(src, lenient)?;
    let num_channels = usize::from(src.read_u8()?);
    let mut channels = ArrayVec::new();
    if num_channels > channels.capacity() {
        return Err(Error::MalformedData("too many pixi channels"));
    }
    channels.extend((0..num_channels).map(|_| 0));
    std::io::Read::read_exact(src, &mut channels).map_err(|_| Error::MalformedData("invalid num_channels"))?;
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALPHA_URN: &[u8] = b"urn:mpeg:mpegB:cicp:systems:auxiliary:alpha";

    #[test]
    fn transformative_kinds() {
        assert!(Property::Rotation(90).is_transformative());
        assert!(Property::Mirror(MirrorAxis::Vertical).is_transformative());
        assert!(!Property::PixelAspectRatio { h_spacing: 1, v_spacing: 1 }.is_transformative());
        assert_eq!(Property::Rotation(0).box_type(), FourCC::IROT);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let bad = [
            Property::PixelAspectRatio { h_spacing: 0, v_spacing: 1 },
            Property::PixelInformation(ArrayVec::new()),
            Property::Rotation(45),
            Property::Rotation(360),
            Property::AuxiliaryType { aux_type: TryVec::new(), subtype: TryVec::new() },
            Property::Colour(ColourInformation::Icc { restricted: false, profile: TryVec::new() }),
        ];
        for property in &bad {
            assert!(matches!(property.validate(), Err(Error::InvalidArgument(_))), "{property:?}");
        }
        let clap = CleanAperture {
            width_n: 10,
            width_d: 1,
            height_n: 10,
            height_d: 0,
            horiz_off_n: -2,
            horiz_off_d: 1,
            vert_off_n: 0,
            vert_off_d: 1,
        };
        assert!(Property::CleanAperture(clap).validate().is_err());
        assert!(Property::CleanAperture(CleanAperture { height_d: 1, ..clap }).validate().is_ok());
    }

    #[test]
    fn alpha_auxc() {
        let mut payload = vec![0, 0, 0, 0];
        payload.extend_from_slice(ALPHA_URN);
        payload.push(0);
        let property = Property::parse(FourCC::AUXC, &payload, false).unwrap();
        let Property::AuxiliaryType { aux_type, subtype } = &property else {
            panic!("{property:?}");
        };
        assert_eq!(&aux_type[..], ALPHA_URN);
        assert!(subtype.is_empty());
        assert_eq!(property.to_payload().unwrap().to_vec(), payload);
    }

    #[test]
    fn pixi_channels() {
        let payload = [0, 0, 0, 0, 3, 8, 8, 8];
        let property = Property::parse(FourCC::PIXI, &payload, false).unwrap();
        assert_eq!(property, Property::PixelInformation([8, 8, 8].into_iter().collect()));
        assert!(matches!(Property::parse(FourCC::PIXI, &[0, 0, 0, 0, 3, 8, 8], false), Err(Error::MalformedData(_))));
        assert!(matches!(Property::parse(FourCC::PIXI, &[0, 0, 0, 0, 0], false), Err(Error::MalformedData(_))));
    }

    #[test]
    fn trailing_bytes_need_lenient() {
        let payload = [0, 0, 0, 0, 1, 8, 0xFF, 0xFF];
        assert!(matches!(Property::parse(FourCC::PIXI, &payload, false), Err(Error::MalformedData(_))));
        assert!(Property::parse(FourCC::PIXI, &payload, true).is_ok());
    }

    #[test]
    fn rotation_and_mirror_bits() {
        assert_eq!(Property::parse(FourCC::IROT, &[0x03], false).unwrap(), Property::Rotation(270));
        assert!(matches!(Property::parse(FourCC::IROT, &[0x05], false), Err(Error::MalformedData(_))));
        assert_eq!(Property::parse(FourCC::IROT, &[0x05], true).unwrap(), Property::Rotation(90));
        assert_eq!(Property::Rotation(180).to_payload().unwrap().to_vec(), [0x02u8]);
        assert_eq!(Property::parse(FourCC::IMIR, &[0x01], false).unwrap(), Property::Mirror(MirrorAxis::Horizontal));
        assert!(matches!(Property::Rotation(100).to_payload(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn nclx_colour() {
        // BT.709 primaries, sRGB transfer, BT.601 matrix, full range
        let payload = [b'n', b'c', b'l', b'x', 0, 1, 0, 13, 0, 6, 0x80];
        let property = Property::parse(FourCC::COLR, &payload, false).unwrap();
        assert_eq!(
            property,
            Property::Colour(ColourInformation::Nclx {
                colour_primaries: 1,
                transfer_characteristics: 13,
                matrix_coefficients: 6,
                full_range: true,
            })
        );
        assert_eq!(property.to_payload().unwrap().to_vec(), payload);
        assert!(matches!(Property::parse(FourCC::COLR, b"nclc\0\x01\0\x01\0\x01", false), Err(Error::MalformedData(_))));
    }

    #[test]
    fn unknown_box_type() {
        assert!(matches!(Property::parse(FourCC::AVCC, &[1], false), Err(Error::InvalidArgument(_))));
    }
}
