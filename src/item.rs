// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::arena::Index;
use crate::boxes::FourCC;
use crate::decoder_config::{DecoderConfigId, MediaFormat};
use crate::heif::ContainerId;
use crate::nal::PayloadLayout;
use crate::property::PropertyAssociation;
use crate::{Error, Result, TryVec};

/// Identifies an item inside the [`Heif`](crate::Heif) that created it.
///
/// Ids stay valid until the item is destroyed or the container is
/// invalidated; after that every operation on them fails with
/// [`Error::InvalidState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId {
    pub(crate) container: ContainerId,
    pub(crate) index: Index,
}

/// Pixel dimensions of an image item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Progress of an image item towards being serializable.
///
/// Coded items need all of size, decoder config and data; `DataSet` is only
/// reported once the other two hold as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ItemState {
    Unbound,
    SizeSet,
    ConfigAttached,
    DataSet,
}

/// What an item type is able to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemCategory {
    /// Metadata and other non-image items.
    Generic,
    /// Derived images (`grid`, `iovl`, `iden`).
    Image,
    /// Compressed pixel data plus a decoder configuration.
    CodedImage(MediaFormat),
}

impl ItemCategory {
    pub fn of(item_type: FourCC) -> Self {
        if let Some(format) = MediaFormat::from_item_type(item_type) {
            return Self::CodedImage(format);
        }
        match item_type {
            FourCC::GRID | FourCC::IOVL | FourCC::IDEN => Self::Image,
            _ => Self::Generic,
        }
    }
}

pub(crate) enum Capability {
    Generic,
    Image {
        size: Option<Size>,
    },
    CodedImage {
        format: MediaFormat,
        size: Option<Size>,
        config: Option<DecoderConfigId>,
    },
}

pub(crate) struct Item {
    /// HEIF `item_ID`.
    pub number: u32,
    pub item_type: FourCC,
    pub data: Option<TryVec<u8>>,
    pub capability: Capability,
    /// Descriptive associations first, then transformative ones.
    pub properties: Vec<PropertyAssociation>,
}

impl Item {
    pub fn new(number: u32, item_type: FourCC) -> Self {
        let capability = match ItemCategory::of(item_type) {
            ItemCategory::Generic => Capability::Generic,
            ItemCategory::Image => Capability::Image { size: None },
            ItemCategory::CodedImage(format) => Capability::CodedImage { format, size: None, config: None },
        };
        Self { number, item_type, data: None, capability, properties: Vec::new() }
    }

    pub fn category(&self) -> ItemCategory {
        match self.capability {
            Capability::Generic => ItemCategory::Generic,
            Capability::Image { .. } => ItemCategory::Image,
            Capability::CodedImage { format, .. } => ItemCategory::CodedImage(format),
        }
    }

    pub fn size(&self) -> Option<Size> {
        match self.capability {
            Capability::Generic => None,
            Capability::Image { size } | Capability::CodedImage { size, .. } => size,
        }
    }

    pub fn config(&self) -> Option<DecoderConfigId> {
        match self.capability {
            Capability::CodedImage { config, .. } => config,
            _ => None,
        }
    }

    pub fn is_image(&self) -> bool {
        !matches!(self.capability, Capability::Generic)
    }

    pub fn state(&self) -> ItemState {
        match self.capability {
            Capability::Generic => {
                if self.data.is_some() {
                    ItemState::DataSet
                } else {
                    ItemState::Unbound
                }
            },
            Capability::Image { size } => match (size, &self.data) {
                (None, _) => ItemState::Unbound,
                (Some(_), None) => ItemState::SizeSet,
                (Some(_), Some(_)) => ItemState::DataSet,
            },
            Capability::CodedImage { size, config, .. } => match (size, config, &self.data) {
                (None, ..) => ItemState::Unbound,
                (Some(_), None, _) => ItemState::SizeSet,
                (Some(_), Some(_), None) => ItemState::ConfigAttached,
                (Some(_), Some(_), Some(_)) => ItemState::DataSet,
            },
        }
    }

    pub fn set_size(&mut self, new_size: Size) -> Result<()> {
        validate_size(new_size)?;
        match &mut self.capability {
            Capability::Generic => Err(Error::InvalidArgument("item type has no size")),
            Capability::Image { size } | Capability::CodedImage { size, .. } => {
                *size = Some(new_size);
                Ok(())
            },
        }
    }

    /// Checks that `format` configs may be bound to this item. Does not mutate.
    pub fn check_config_binding(&self, format: MediaFormat) -> Result<()> {
        match self.capability {
            Capability::CodedImage { format: expected, size, .. } => {
                check_family(expected, format)?;
                if size.is_none() {
                    return Err(Error::InvalidState("item size must be set before attaching a decoder config"));
                }
                Ok(())
            },
            _ => Err(Error::InvalidArgument("item type does not take a decoder config")),
        }
    }

    pub fn bind_config(&mut self, id: DecoderConfigId) {
        if let Capability::CodedImage { config, .. } = &mut self.capability {
            *config = Some(id);
        }
    }

    /// Checks that `data` may become this item's payload. Does not mutate.
    ///
    /// `nal_length_size` comes from the attached decoder config.
    pub fn check_data(&self, data: &[u8], nal_length_size: Option<u8>) -> Result<()> {
        if let Capability::CodedImage { config, .. } = self.capability {
            if config.is_none() {
                return Err(Error::InvalidState("coded item data requires an attached decoder config"));
            }
            validate_payload(data, nal_length_size)?;
        } else if data.is_empty() {
            return Err(Error::InvalidArgument("item data is empty"));
        }
        Ok(())
    }
}

pub(crate) fn validate_size(size: Size) -> Result<()> {
    if size.width == 0 || size.height == 0 {
        return Err(Error::InvalidArgument("image dimensions must be positive"));
    }
    Ok(())
}

/// Checks a coded payload. With a NAL length size, the payload must be
/// length-prefixed at that width, a well-formed Annex-B stream, or neither.
pub(crate) fn validate_payload(data: &[u8], nal_length_size: Option<u8>) -> Result<()> {
    if data.is_empty() {
        return Err(Error::InvalidArgument("item data is empty"));
    }
    if let Some(length_size) = nal_length_size {
        PayloadLayout::detect(data, length_size)?;
    }
    Ok(())
}

pub(crate) fn check_family(expected: MediaFormat, actual: MediaFormat) -> Result<()> {
    if expected != actual {
        log::debug!("decoder config family {actual:?} does not fit a {expected:?} item");
        return Err(Error::InvalidArgument("decoder config codec family does not match item"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_follows_item_type() {
        assert_eq!(ItemCategory::of(FourCC::AVC1), ItemCategory::CodedImage(MediaFormat::Avc));
        assert_eq!(ItemCategory::of(FourCC::AV01), ItemCategory::CodedImage(MediaFormat::Av1));
        assert_eq!(ItemCategory::of(FourCC::GRID), ItemCategory::Image);
        assert_eq!(ItemCategory::of(FourCC::EXIF), ItemCategory::Generic);
        assert_eq!(ItemCategory::of(FourCC::new(*b"xyz ")), ItemCategory::Generic);
    }

    #[test]
    fn zero_dimensions_rejected() {
        let mut item = Item::new(1, FourCC::AVC1);
        assert!(matches!(item.set_size(Size::new(0, 10)), Err(Error::InvalidArgument(_))));
        assert!(matches!(item.set_size(Size::new(10, 0)), Err(Error::InvalidArgument(_))));
        assert_eq!(item.size(), None);
        assert_eq!(item.state(), ItemState::Unbound);
        item.set_size(Size::new(10, 10)).unwrap();
        assert_eq!(item.state(), ItemState::SizeSet);
    }

    #[test]
    fn generic_items_have_no_size_or_config() {
        let mut item = Item::new(1, FourCC::EXIF);
        assert!(matches!(item.set_size(Size::new(1, 1)), Err(Error::InvalidArgument(_))));
        assert!(matches!(item.check_config_binding(MediaFormat::Avc), Err(Error::InvalidArgument(_))));
        assert!(item.check_data(&[1, 2, 3], None).is_ok());
        assert!(matches!(item.check_data(&[], None), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn coded_data_needs_config() {
        let item = Item::new(1, FourCC::HVC1);
        assert!(matches!(item.check_data(&[1, 2, 3], Some(4)), Err(Error::InvalidState(_))));
    }

    #[test]
    fn config_binding_checks_family_then_size() {
        let mut item = Item::new(1, FourCC::AVC1);
        assert!(matches!(item.check_config_binding(MediaFormat::Hevc), Err(Error::InvalidArgument(_))));
        assert!(matches!(item.check_config_binding(MediaFormat::Avc), Err(Error::InvalidState(_))));
        item.set_size(Size::new(8, 8)).unwrap();
        assert!(item.check_config_binding(MediaFormat::Avc).is_ok());
    }

    #[test]
    fn payload_validation() {
        assert!(validate_payload(&[0, 0, 0, 4, 0x65, 0x88, 0x84, 0x00], Some(4)).is_ok());
        assert!(validate_payload(&[0, 0, 1, 0x65, 0x88], Some(4)).is_ok());
        assert!(matches!(validate_payload(&[0, 0, 1, 0, 0, 1], Some(4)), Err(Error::MalformedData(_))));
        assert!(matches!(validate_payload(&[], Some(4)), Err(Error::InvalidArgument(_))));
        // AV1 samples are not NAL-framed.
        assert!(validate_payload(&[0, 0, 1, 0, 0, 1], None).is_ok());
    }

    #[test]
    fn payload_validation_uses_length_size() {
        // Too long for a 4-byte length walk, and Annex-B with an empty last unit.
        let data = [0, 0, 1, 0x65, 0, 0, 1];
        assert!(matches!(validate_payload(&data, Some(4)), Err(Error::MalformedData(_))));
        assert!(validate_payload(&[0, 1, 0x65, 0, 1, 0x41], Some(2)).is_ok());
    }
}
