// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::arena::Arena;
use crate::boxes::FourCC;
use crate::decoder_config::{CodecConfig, DecoderConfig, DecoderConfigId, MediaFormat};
use crate::item::{Item, ItemCategory, ItemId, ItemState, Size};
use crate::nal::{annexb_to_length_prefixed, PayloadLayout};
use crate::property::{Property, PropertyAssociation, PropertyId};
use crate::{try_copy, Error, HeifConfig, Result, TryVec};
use arrayvec::ArrayVec;
use log::{debug, trace, warn};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTAINER_ID: AtomicU64 = AtomicU64::new(1);

/// `ipma` stores the association count of an item in 8 bits.
const MAX_ITEM_PROPERTIES: usize = 255;

/// Distinguishes ids minted by different [`Heif`] instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ContainerId(u64);

impl ContainerId {
    fn next() -> Self {
        Self(NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle of a [`Heif`] container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Items and decoder configs may be created and modified.
    Open,
    /// Contents validated and read-only; [`Heif::output_items`] is available.
    Finalized,
    /// Every item and decoder config has been released.
    Invalidated,
}

/// Brands for the `ftyp` box. See ISO/IEC 23008-12 § 10
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileType {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: ArrayVec<FourCC, 4>,
}

/// One item as handed to a box writer by [`Heif::output_items`].
#[derive(Debug)]
pub struct OutputItem<'a> {
    pub id: ItemId,
    /// HEIF `item_ID`
    pub number: u32,
    pub item_type: FourCC,
    pub primary: bool,
    pub size: Option<Size>,
    /// The payload as it was set.
    pub data: Option<&'a [u8]>,
    /// What to store for coded image items, see [`Heif::item_bitstream`].
    pub bitstream: Option<TryVec<u8>>,
    /// Parsed decoder config of coded image items.
    pub config: Option<&'a CodecConfig>,
    /// In `ipma` order.
    pub properties: Vec<AssociatedProperty<'a>>,
}

/// A property as listed in [`OutputItem::properties`].
#[derive(Debug)]
pub struct AssociatedProperty<'a> {
    pub id: PropertyId,
    pub property: &'a Property,
    pub essential: bool,
}

/// Owns the items and decoder configurations of one HEIF file.
///
/// All accessors take the `Copy` ids returned at creation time. Dropping the
/// container, or calling [`Heif::invalidate`], releases every entity at once;
/// ids held by the caller then fail with [`Error::InvalidState`].
pub struct Heif {
    id: ContainerId,
    phase: Phase,
    config: HeifConfig,
    items: Arena<Item>,
    decoder_configs: Arena<DecoderConfig>,
    properties: Arena<Property>,
    next_item_number: u32,
    primary: Option<ItemId>,
}

impl Default for Heif {
    fn default() -> Self {
        Self::new()
    }
}

impl Heif {
    pub fn new() -> Self {
        Self::with_config(HeifConfig::default())
    }

    pub fn with_config(config: HeifConfig) -> Self {
        Self {
            id: ContainerId::next(),
            phase: Phase::Open,
            config,
            items: Arena::default(),
            decoder_configs: Arena::default(),
            properties: Arena::default(),
            next_item_number: 1,
            primary: None,
        }
    }

    pub fn config(&self) -> &HeifConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of live items.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    fn check_valid(&self) -> Result<()> {
        if self.phase == Phase::Invalidated {
            return Err(Error::InvalidState("container has been invalidated"));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_valid()?;
        if self.phase == Phase::Finalized {
            return Err(Error::InvalidState("container is finalized and read-only"));
        }
        Ok(())
    }

    fn item(&self, id: ItemId) -> Result<&Item> {
        self.check_valid()?;
        if id.container != self.id {
            return Err(Error::InvalidArgument("item belongs to another container"));
        }
        self.items.get(id.index).ok_or(Error::InvalidState("item has been destroyed"))
    }

    fn item_mut(&mut self, id: ItemId) -> Result<&mut Item> {
        self.item(id)?;
        self.items.get_mut(id.index).ok_or(Error::InvalidState("item has been destroyed"))
    }

    fn decoder_config(&self, id: DecoderConfigId) -> Result<&DecoderConfig> {
        self.check_valid()?;
        if id.container != self.id {
            return Err(Error::InvalidArgument("decoder config belongs to another container"));
        }
        self.decoder_configs.get(id.index).ok_or(Error::InvalidState("decoder config has been destroyed"))
    }

    /// Lookup for a config passed in to be attached: a destroyed config counts as a bad argument.
    pub(crate) fn config_argument(&self, id: DecoderConfigId) -> Result<&DecoderConfig> {
        match self.decoder_config(id) {
            Err(Error::InvalidState("decoder config has been destroyed")) => {
                Err(Error::InvalidArgument("decoder config has been destroyed"))
            },
            other => other,
        }
    }

    /// NAL length width for the payload of `item`, from its attached config.
    fn nal_length_size(&self, item: &Item) -> Option<u8> {
        self.decoder_configs.get(item.config()?.index)?.nal_length_size()
    }

    pub fn create_item(&mut self, item_type: FourCC) -> Result<ItemId> {
        self.check_writable()?;
        self.config.check_item_count(self.items.len())?;
        let number = self.next_item_number;
        let next = number.checked_add(1).ok_or(Error::ResourceLimitExceeded("item numbers exhausted"))?;
        let index = self.items.insert(Item::new(number, item_type))?;
        self.next_item_number = next;
        trace!("created {item_type} item {number}");
        Ok(ItemId { container: self.id, index })
    }

    /// Release an item. Unknown, foreign and already destroyed ids are ignored.
    ///
    /// Decoder configs the item referenced stay in the container.
    pub fn destroy_item(&mut self, id: ItemId) {
        if id.container != self.id {
            return;
        }
        if let Some(item) = self.items.remove(id.index) {
            trace!("destroyed {} item {}", item.item_type, item.number);
            if self.primary == Some(id) {
                debug!("primary item {} destroyed", item.number);
                self.primary = None;
            }
        }
    }

    pub fn create_decoder_config(&mut self, format: MediaFormat) -> Result<DecoderConfigId> {
        self.check_writable()?;
        let index = self.decoder_configs.insert(DecoderConfig::new(format))?;
        trace!("created {format:?} decoder config");
        Ok(DecoderConfigId { container: self.id, index })
    }

    /// Release a decoder config that no live item references.
    ///
    /// Returns `false` and keeps the config if an item is still bound to it,
    /// or if the id does not name a live config of this container.
    pub fn destroy_decoder_config(&mut self, id: DecoderConfigId) -> bool {
        if id.container != self.id || !self.decoder_configs.contains(id.index) {
            return false;
        }
        if let Some((_, item)) = self.items.iter().find(|(_, item)| item.config() == Some(id)) {
            debug!("decoder config kept alive by item {}", item.number);
            return false;
        }
        self.decoder_configs.remove(id.index).is_some()
    }

    pub fn item_type(&self, id: ItemId) -> Result<FourCC> {
        Ok(self.item(id)?.item_type)
    }

    pub fn item_category(&self, id: ItemId) -> Result<ItemCategory> {
        Ok(self.item(id)?.category())
    }

    pub fn item_state(&self, id: ItemId) -> Result<ItemState> {
        Ok(self.item(id)?.state())
    }

    /// The HEIF `item_ID` assigned at creation. Numbers start at 1 and are never reused.
    pub fn item_number(&self, id: ItemId) -> Result<u32> {
        Ok(self.item(id)?.number)
    }

    pub fn set_size(&mut self, id: ItemId, size: Size) -> Result<()> {
        self.check_writable()?;
        self.item_mut(id)?.set_size(size)
    }

    pub fn size(&self, id: ItemId) -> Result<Option<Size>> {
        Ok(self.item(id)?.size())
    }

    /// Bind `config` to a coded image item, replacing any previous binding.
    ///
    /// The config is shared, not copied: later [`Heif::set_config`] calls are
    /// seen by every item bound to it.
    pub fn set_decoder_config(&mut self, id: ItemId, config: DecoderConfigId) -> Result<()> {
        self.check_writable()?;
        let item = self.item(id)?;
        let format = self.config_argument(config)?.format();
        item.check_config_binding(format)?;
        let item = self.item_mut(id)?;
        item.bind_config(config);
        trace!("item {} bound to {format:?} decoder config", item.number);
        Ok(())
    }

    pub fn attached_decoder_config(&self, id: ItemId) -> Result<Option<DecoderConfigId>> {
        Ok(self.item(id)?.config())
    }

    /// Store a copy of `data` as the item payload.
    ///
    /// Coded image items need an attached decoder config first. AVC and HEVC
    /// payloads are read as length-prefixed with the config's NAL length size
    /// when that covers them exactly; otherwise a payload opening with a start
    /// code must be an Annex-B stream whose units fit that length size.
    pub fn set_item_data(&mut self, id: ItemId, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        let item = self.item(id)?;
        self.config.check_item_data_len(data.len())?;
        item.check_data(data, self.nal_length_size(item))?;
        let copy = try_copy(data)?;
        let item = self.item_mut(id)?;
        trace!("item {} data set ({} bytes)", item.number, copy.len());
        item.data = Some(copy);
        Ok(())
    }

    /// A copy of the item payload, or `None` if none was set.
    pub fn item_data(&self, id: ItemId) -> Result<Option<TryVec<u8>>> {
        self.item(id)?.data.as_deref().map(try_copy).transpose()
    }

    /// The item payload as it is stored in the file.
    ///
    /// Annex-B payloads of AVC and HEVC items are converted to length prefixes
    /// of the attached config's NAL length size. Length-prefixed and other
    /// payloads are copied unchanged.
    pub fn item_bitstream(&self, id: ItemId) -> Result<Option<TryVec<u8>>> {
        let item = self.item(id)?;
        item.data.as_deref().map(|data| self.bitstream(item, data)).transpose()
    }

    fn bitstream(&self, item: &Item, data: &[u8]) -> Result<TryVec<u8>> {
        if let Some(length_size) = self.nal_length_size(item) {
            if PayloadLayout::detect(data, length_size)? == PayloadLayout::AnnexB {
                return annexb_to_length_prefixed(data, length_size);
            }
        }
        try_copy(data)
    }

    /// Replace the bytes of a decoder config.
    ///
    /// The new bytes are parsed before anything is stored, so on error the
    /// config keeps its previous contents.
    pub fn set_config(&mut self, id: DecoderConfigId, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.decoder_config(id)?;
        self.config.check_decoder_config_len(data.len())?;
        let lenient = self.config.lenient;
        let config = self
            .decoder_configs
            .get_mut(id.index)
            .ok_or(Error::InvalidState("decoder config has been destroyed"))?;
        config.set(data, lenient)
    }

    /// A copy of the raw bytes last passed to [`Heif::set_config`].
    pub fn config_bytes(&self, id: DecoderConfigId) -> Result<Option<TryVec<u8>>> {
        self.decoder_config(id)?.bytes().map(try_copy).transpose()
    }

    pub fn codec_config(&self, id: DecoderConfigId) -> Result<Option<&CodecConfig>> {
        Ok(self.decoder_config(id)?.parsed())
    }

    pub fn decoder_config_format(&self, id: DecoderConfigId) -> Result<MediaFormat> {
        Ok(self.decoder_config(id)?.format())
    }

    /// Store a property that image items can then be associated with.
    pub fn create_property(&mut self, property: Property) -> Result<PropertyId> {
        self.check_writable()?;
        property.validate()?;
        let box_type = property.box_type();
        let index = self.properties.insert(property)?;
        trace!("created {box_type} property");
        Ok(PropertyId { container: self.id, index })
    }

    pub fn property(&self, id: PropertyId) -> Result<&Property> {
        self.check_valid()?;
        if id.container != self.id {
            return Err(Error::InvalidArgument("property belongs to another container"));
        }
        self.properties.get(id.index).ok_or(Error::InvalidState("property has been destroyed"))
    }

    fn property_argument(&self, id: PropertyId) -> Result<&Property> {
        match self.property(id) {
            Err(Error::InvalidState("property has been destroyed")) => {
                Err(Error::InvalidArgument("property has been destroyed"))
            },
            other => other,
        }
    }

    /// Replace the contents of a property. Every associated item sees the change.
    ///
    /// The property type cannot change, so item property lists keep their order.
    pub fn set_property(&mut self, id: PropertyId, property: Property) -> Result<()> {
        self.check_writable()?;
        if self.property(id)?.box_type() != property.box_type() {
            return Err(Error::InvalidArgument("property type cannot change"));
        }
        property.validate()?;
        let slot = self
            .properties
            .get_mut(id.index)
            .ok_or(Error::InvalidState("property has been destroyed"))?;
        *slot = property;
        Ok(())
    }

    /// Release a property no live item is associated with.
    ///
    /// Returns `false` and keeps the property otherwise, or if the id does not
    /// name a live property of this container.
    pub fn destroy_property(&mut self, id: PropertyId) -> bool {
        if id.container != self.id || !self.properties.contains(id.index) {
            return false;
        }
        let associated = self
            .items
            .iter()
            .find(|(_, item)| item.properties.iter().any(|a| a.property == id));
        if let Some((_, item)) = associated {
            debug!("property kept alive by item {}", item.number);
            return false;
        }
        self.properties.remove(id.index).is_some()
    }

    /// Associate a property with an image item.
    ///
    /// Transformative properties are always essential and are applied in the
    /// order they are added. Descriptive properties go before the first
    /// transformative one.
    pub fn add_property(&mut self, item: ItemId, property: PropertyId, essential: bool) -> Result<()> {
        self.check_writable()?;
        let target = self.item(item)?;
        let entry = self.property_argument(property)?;
        let transformative = entry.is_transformative();
        let box_type = entry.box_type();
        if !target.is_image() {
            return Err(Error::InvalidArgument("only image items take properties"));
        }
        if target.properties.iter().any(|a| a.property == property) {
            return Err(Error::InvalidArgument("property is already associated with the item"));
        }
        if target.properties.len() >= MAX_ITEM_PROPERTIES {
            return Err(Error::ResourceLimitExceeded("too many properties on one item"));
        }
        let position = if transformative {
            target.properties.len()
        } else {
            target
                .properties
                .iter()
                .position(|a| self.properties.get(a.property.index).is_some_and(Property::is_transformative))
                .unwrap_or(target.properties.len())
        };

        let target = self.item_mut(item)?;
        target.properties.try_reserve(1)?;
        target.properties.insert(position, PropertyAssociation { property, essential: essential || transformative });
        trace!("{box_type} property associated with item {}", target.number);
        Ok(())
    }

    /// Drop the association between an item and a property. Returns whether one existed.
    pub fn remove_property(&mut self, item: ItemId, property: PropertyId) -> Result<bool> {
        self.check_writable()?;
        if property.container != self.id {
            return Err(Error::InvalidArgument("property belongs to another container"));
        }
        let target = self.item_mut(item)?;
        let before = target.properties.len();
        target.properties.retain(|a| a.property != property);
        Ok(target.properties.len() != before)
    }

    pub fn item_properties(&self, id: ItemId) -> Result<&[PropertyAssociation]> {
        Ok(&self.item(id)?.properties)
    }

    /// Mark an image item as the primary item (`pitm`).
    pub fn set_primary_item(&mut self, id: ItemId) -> Result<()> {
        self.check_writable()?;
        if !self.item(id)?.is_image() {
            return Err(Error::InvalidArgument("primary item must be an image item"));
        }
        self.primary = Some(id);
        Ok(())
    }

    pub fn primary_item(&self) -> Result<Option<ItemId>> {
        self.check_valid()?;
        Ok(self.primary)
    }

    /// `ftyp` brands for the codecs currently in use.
    pub fn file_type(&self) -> Result<FileType> {
        self.check_valid()?;
        let mut compatible_brands = ArrayVec::new();
        compatible_brands.push(FourCC::MIF1);
        for format in [MediaFormat::Avc, MediaFormat::Hevc, MediaFormat::Av1] {
            let used = self
                .items
                .iter()
                .any(|(_, item)| item.category() == ItemCategory::CodedImage(format));
            if used {
                compatible_brands.push(format.brand());
            }
        }
        Ok(FileType { major_brand: FourCC::MIF1, minor_version: 0, compatible_brands })
    }

    /// Check every item is complete and make the container read-only.
    ///
    /// Image items need a size; coded image items also need data and a
    /// decoder config holding bytes. AVC and HEVC payloads are checked again
    /// against the current NAL length size of their config, which a shared
    /// config may have changed since the data was set.
    pub fn finalize(&mut self) -> Result<()> {
        self.check_writable()?;
        for (_, item) in self.items.iter() {
            if let (Some(data), Some(length_size)) = (item.data.as_deref(), self.nal_length_size(item)) {
                PayloadLayout::detect(data, length_size).inspect_err(|err| {
                    warn!("cannot finalize: {} item {} payload: {err}", item.item_type, item.number);
                })?;
            }
            let complete = match item.category() {
                ItemCategory::Generic => true,
                ItemCategory::Image => item.size().is_some(),
                ItemCategory::CodedImage(_) => {
                    item.state() == ItemState::DataSet
                        && item
                            .config()
                            .and_then(|config| self.decoder_configs.get(config.index))
                            .is_some_and(DecoderConfig::is_set)
                },
            };
            if !complete {
                warn!("cannot finalize: {} item {} is incomplete ({:?})", item.item_type, item.number, item.state());
                return Err(Error::InvalidState("image item is incomplete"));
            }
        }
        self.phase = Phase::Finalized;
        debug!("finalized container with {} items", self.items.len());
        Ok(())
    }

    /// Items in `item_ID` order, for the box writer. Requires [`Heif::finalize`].
    pub fn output_items(&self) -> Result<Vec<OutputItem<'_>>> {
        self.check_valid()?;
        if self.phase != Phase::Finalized {
            return Err(Error::InvalidState("container is not finalized"));
        }
        let mut out = Vec::new();
        out.try_reserve(self.items.len())?;
        for (index, item) in self.items.iter() {
            let id = ItemId { container: self.id, index };
            let config = item
                .config()
                .and_then(|config| self.decoder_configs.get(config.index))
                .and_then(DecoderConfig::parsed);
            let bitstream = match (item.category(), item.data.as_deref()) {
                (ItemCategory::CodedImage(_), Some(data)) => Some(self.bitstream(item, data)?),
                _ => None,
            };
            let mut properties = Vec::new();
            properties.try_reserve(item.properties.len())?;
            for association in &item.properties {
                if let Some(property) = self.properties.get(association.property.index) {
                    properties.push(AssociatedProperty {
                        id: association.property,
                        property,
                        essential: association.essential,
                    });
                }
            }
            out.push(OutputItem {
                id,
                number: item.number,
                item_type: item.item_type,
                primary: self.primary == Some(id),
                size: item.size(),
                data: item.data.as_deref(),
                bitstream,
                config,
                properties,
            });
        }
        out.sort_unstable_by_key(|item| item.number);
        Ok(out)
    }

    /// Release every item, decoder config and property. Ids held by callers become invalid.
    pub fn invalidate(&mut self) {
        if self.phase == Phase::Invalidated {
            return;
        }
        debug!(
            "invalidating container: {} items, {} decoder configs, {} properties",
            self.items.len(),
            self.decoder_configs.len(),
            self.properties.len()
        );
        self.items.clear();
        self.decoder_configs.clear();
        self.properties.clear();
        self.primary = None;
        self.phase = Phase::Invalidated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avc::tests::BASELINE_AVCC;
    use crate::property::MirrorAxis;

    fn coded_item(heif: &mut Heif) -> (ItemId, DecoderConfigId) {
        let item = heif.create_item(FourCC::AVC1).unwrap();
        heif.set_size(item, Size::new(64, 64)).unwrap();
        let config = heif.create_decoder_config(MediaFormat::Avc).unwrap();
        heif.set_config(config, &BASELINE_AVCC).unwrap();
        heif.set_decoder_config(item, config).unwrap();
        (item, config)
    }

    #[test]
    fn item_numbers_are_never_reused() {
        let mut heif = Heif::new();
        let a = heif.create_item(FourCC::EXIF).unwrap();
        let b = heif.create_item(FourCC::EXIF).unwrap();
        assert_eq!(heif.item_number(a).unwrap(), 1);
        assert_eq!(heif.item_number(b).unwrap(), 2);
        heif.destroy_item(b);
        let c = heif.create_item(FourCC::EXIF).unwrap();
        assert_eq!(heif.item_number(c).unwrap(), 3);
        assert!(matches!(heif.item_number(b), Err(Error::InvalidState(_))));
    }

    #[test]
    fn foreign_ids_are_bad_arguments() {
        let mut a = Heif::new();
        let mut b = Heif::new();
        let item = a.create_item(FourCC::GRID).unwrap();
        let config = b.create_decoder_config(MediaFormat::Avc).unwrap();
        assert!(matches!(b.item_type(item), Err(Error::InvalidArgument(_))));
        assert!(matches!(a.config_bytes(config), Err(Error::InvalidArgument(_))));
        b.destroy_item(item);
        assert!(!a.destroy_decoder_config(config));
        assert_eq!(a.item_type(item).unwrap(), FourCC::GRID);
    }

    #[test]
    fn referenced_config_is_retained() {
        let mut heif = Heif::new();
        let (item, config) = coded_item(&mut heif);
        assert!(!heif.destroy_decoder_config(config));
        assert!(heif.config_bytes(config).unwrap().is_some());
        heif.destroy_item(item);
        assert!(heif.destroy_decoder_config(config));
        assert!(matches!(heif.config_bytes(config), Err(Error::InvalidState(_))));
        assert!(!heif.destroy_decoder_config(config));
    }

    #[test]
    fn stale_config_argument() {
        let mut heif = Heif::new();
        let item = heif.create_item(FourCC::AVC1).unwrap();
        heif.set_size(item, Size::new(1, 1)).unwrap();
        let config = heif.create_decoder_config(MediaFormat::Avc).unwrap();
        assert!(heif.destroy_decoder_config(config));
        assert!(matches!(heif.set_decoder_config(item, config), Err(Error::InvalidArgument(_))));
        assert_eq!(heif.attached_decoder_config(item).unwrap(), None);
    }

    #[test]
    fn primary_item_follows_destruction() {
        let mut heif = Heif::new();
        let exif = heif.create_item(FourCC::EXIF).unwrap();
        assert!(matches!(heif.set_primary_item(exif), Err(Error::InvalidArgument(_))));
        let grid = heif.create_item(FourCC::GRID).unwrap();
        heif.set_primary_item(grid).unwrap();
        assert_eq!(heif.primary_item().unwrap(), Some(grid));
        heif.destroy_item(grid);
        assert_eq!(heif.primary_item().unwrap(), None);
    }

    #[test]
    fn file_type_lists_codec_brands() {
        let mut heif = Heif::new();
        assert_eq!(heif.file_type().unwrap().compatible_brands.as_slice(), [FourCC::MIF1]);
        heif.create_item(FourCC::AV01).unwrap();
        heif.create_item(FourCC::AVC1).unwrap();
        let ftyp = heif.file_type().unwrap();
        assert_eq!(ftyp.major_brand, FourCC::MIF1);
        assert_eq!(ftyp.compatible_brands.as_slice(), [FourCC::MIF1, FourCC::AVCI, FourCC::AVIF]);
    }

    #[test]
    fn bitstream_converts_annexb() {
        let mut heif = Heif::new();
        let (item, _) = coded_item(&mut heif);
        heif.set_item_data(item, &[0, 0, 0, 1, 0x65, 0x88, 0x84, 0, 0, 1, 0x41, 0x9A]).unwrap();
        let bitstream = heif.item_bitstream(item).unwrap().unwrap();
        assert_eq!(bitstream.to_vec(), [0u8, 0, 0, 3, 0x65, 0x88, 0x84, 0, 0, 0, 2, 0x41, 0x9A]);
        assert_eq!(heif.item_data(item).unwrap().unwrap().len(), 12);
    }

    #[test]
    fn bitstream_keeps_length_prefixed_data() {
        let mut heif = Heif::new();
        let (item, _) = coded_item(&mut heif);
        // A single 1-byte unit; the prefix reads like a 4-byte start code.
        heif.set_item_data(item, &[0, 0, 0, 1, 0x65]).unwrap();
        assert_eq!(heif.item_bitstream(item).unwrap().unwrap().to_vec(), [0u8, 0, 0, 1, 0x65]);
    }

    #[test]
    fn bitstream_converts_hevc_annexb() {
        let mut heif = Heif::new();
        let item = heif.create_item(FourCC::HVC1).unwrap();
        heif.set_size(item, Size::new(64, 64)).unwrap();
        let config = heif.create_decoder_config(MediaFormat::Hevc).unwrap();
        heif.set_config(config, &crate::hevc::tests::hvcc()).unwrap();
        heif.set_decoder_config(item, config).unwrap();
        // IDR_W_RADL slice then a TRAIL_R slice
        heif.set_item_data(item, &[0, 0, 0, 1, 0x26, 0x01, 0xAF, 0, 0, 1, 0x02, 0x01, 0xD0]).unwrap();
        let bitstream = heif.item_bitstream(item).unwrap().unwrap();
        assert_eq!(bitstream.to_vec(), [0u8, 0, 0, 3, 0x26, 0x01, 0xAF, 0, 0, 0, 3, 0x02, 0x01, 0xD0]);
    }

    #[test]
    fn bitstream_uses_config_length_size() {
        let mut heif = Heif::new();
        let (item, config) = coded_item(&mut heif);
        let mut avcc = BASELINE_AVCC;
        avcc[4] = 0xFD;
        heif.set_config(config, &avcc).unwrap();
        heif.set_item_data(item, &[0, 0, 0, 1, 0x65, 0x88, 0x84, 0, 0, 1, 0x41, 0x9A]).unwrap();
        let bitstream = heif.item_bitstream(item).unwrap().unwrap();
        assert_eq!(bitstream.to_vec(), [0u8, 3, 0x65, 0x88, 0x84, 0, 2, 0x41, 0x9A]);
    }

    #[test]
    fn finalize_rechecks_payload_against_shared_config() {
        let mut heif = Heif::new();
        let (item, config) = coded_item(&mut heif);
        let mut stream = vec![0, 0, 0, 1, 0x65];
        stream.resize(4 + 256, 0x88);
        heif.set_item_data(item, &stream).unwrap();
        let mut avcc = BASELINE_AVCC;
        avcc[4] = 0xFC;
        heif.set_config(config, &avcc).unwrap();
        assert!(matches!(heif.finalize(), Err(Error::MalformedData(_))));
        assert_eq!(heif.phase(), Phase::Open);
    }

    #[test]
    fn finalize_requires_complete_items() {
        let mut heif = Heif::new();
        let (item, _) = coded_item(&mut heif);
        assert!(matches!(heif.output_items(), Err(Error::InvalidState(_))));
        assert!(matches!(heif.finalize(), Err(Error::InvalidState("image item is incomplete"))));
        assert_eq!(heif.phase(), Phase::Open);
        heif.set_item_data(item, &[0xAB; 16]).unwrap();
        heif.finalize().unwrap();
        assert!(matches!(heif.finalize(), Err(Error::InvalidState(_))));
        let out = heif.output_items().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, item);
        assert_eq!(out[0].number, 1);
        assert_eq!(out[0].data, Some(&[0xAB; 16][..]));
        assert_eq!(out[0].bitstream.as_ref().unwrap().to_vec(), [0xABu8; 16]);
        assert!(matches!(out[0].config, Some(CodecConfig::Avc(_))));
        assert!(out[0].properties.is_empty());
    }

    #[test]
    fn output_bitstream_is_length_prefixed() {
        let mut heif = Heif::new();
        let (item, _) = coded_item(&mut heif);
        heif.set_item_data(item, &[0, 0, 1, 0x65, 0x88]).unwrap();
        let exif = heif.create_item(FourCC::EXIF).unwrap();
        heif.set_item_data(exif, b"\0\0\0\0II*\0").unwrap();
        heif.finalize().unwrap();
        let out = heif.output_items().unwrap();
        assert_eq!(out[0].bitstream.as_ref().unwrap().to_vec(), [0u8, 0, 0, 2, 0x65, 0x88]);
        assert_eq!(out[0].data, Some(&[0, 0, 1, 0x65, 0x88][..]));
        assert_eq!(out[1].id, exif);
        assert!(out[1].bitstream.is_none());
    }

    #[test]
    fn properties_are_ordered_and_shared() {
        let mut heif = Heif::new();
        let (item, _) = coded_item(&mut heif);
        let grid = heif.create_item(FourCC::GRID).unwrap();
        let rotate = heif.create_property(Property::Rotation(90)).unwrap();
        let mirror = heif.create_property(Property::Mirror(MirrorAxis::Vertical)).unwrap();
        let pasp = heif.create_property(Property::PixelAspectRatio { h_spacing: 1, v_spacing: 1 }).unwrap();

        heif.add_property(item, rotate, false).unwrap();
        heif.add_property(item, mirror, true).unwrap();
        heif.add_property(item, pasp, false).unwrap();
        heif.add_property(grid, pasp, true).unwrap();
        let order: Vec<_> = heif.item_properties(item).unwrap().iter().map(|a| (a.property, a.essential)).collect();
        assert_eq!(order, [(pasp, false), (rotate, true), (mirror, true)]);

        heif.set_property(pasp, Property::PixelAspectRatio { h_spacing: 4, v_spacing: 3 }).unwrap();
        assert!(matches!(heif.set_property(pasp, Property::Rotation(0)), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            heif.set_property(pasp, Property::PixelAspectRatio { h_spacing: 0, v_spacing: 3 }),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(heif.add_property(item, pasp, false), Err(Error::InvalidArgument(_))));

        assert!(!heif.destroy_property(pasp));
        assert!(heif.remove_property(item, pasp).unwrap());
        assert!(!heif.remove_property(item, pasp).unwrap());
        heif.destroy_item(grid);
        assert!(heif.destroy_property(pasp));
        assert!(matches!(heif.property(pasp), Err(Error::InvalidState(_))));
        assert!(matches!(heif.add_property(item, pasp, false), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn properties_need_image_items() {
        let mut heif = Heif::new();
        let mut other = Heif::new();
        let exif = heif.create_item(FourCC::EXIF).unwrap();
        let grid = heif.create_item(FourCC::GRID).unwrap();
        let rotate = heif.create_property(Property::Rotation(180)).unwrap();
        let foreign = other.create_property(Property::Rotation(180)).unwrap();
        assert!(matches!(heif.add_property(exif, rotate, true), Err(Error::InvalidArgument(_))));
        assert!(matches!(heif.add_property(grid, foreign, true), Err(Error::InvalidArgument(_))));
        assert!(matches!(heif.create_property(Property::Rotation(45)), Err(Error::InvalidArgument(_))));
        assert!(heif.item_properties(grid).unwrap().is_empty());
    }

    #[test]
    fn properties_frozen_after_finalize() {
        let mut heif = Heif::new();
        let (item, _) = coded_item(&mut heif);
        heif.set_item_data(item, &[0xAB; 4]).unwrap();
        let rotate = heif.create_property(Property::Rotation(270)).unwrap();
        heif.add_property(item, rotate, true).unwrap();
        heif.finalize().unwrap();

        assert!(matches!(heif.create_property(Property::Rotation(0)), Err(Error::InvalidState(_))));
        assert!(matches!(heif.set_property(rotate, Property::Rotation(0)), Err(Error::InvalidState(_))));
        assert!(matches!(heif.remove_property(item, rotate), Err(Error::InvalidState(_))));
        let out = heif.output_items().unwrap();
        assert_eq!(out[0].properties.len(), 1);
        assert_eq!(out[0].properties[0].id, rotate);
        assert_eq!(*out[0].properties[0].property, Property::Rotation(270));
        assert!(out[0].properties[0].essential);

        heif.invalidate();
        assert!(matches!(heif.property(rotate), Err(Error::InvalidState(_))));
        assert!(!heif.destroy_property(rotate));
    }

    #[test]
    fn empty_config_blocks_finalize() {
        let mut heif = Heif::new();
        let item = heif.create_item(FourCC::AVC1).unwrap();
        heif.set_size(item, Size::new(2, 2)).unwrap();
        let config = heif.create_decoder_config(MediaFormat::Avc).unwrap();
        heif.set_decoder_config(item, config).unwrap();
        heif.set_item_data(item, &[1, 2, 3]).unwrap();
        assert!(heif.finalize().is_err());
    }

    #[test]
    fn invalidate_cascades() {
        let mut heif = Heif::new();
        let (item, config) = coded_item(&mut heif);
        heif.invalidate();
        assert_eq!(heif.phase(), Phase::Invalidated);
        assert_eq!(heif.item_count(), 0);
        assert!(matches!(heif.item_type(item), Err(Error::InvalidState(_))));
        assert!(matches!(heif.config_bytes(config), Err(Error::InvalidState(_))));
        assert!(matches!(heif.create_item(FourCC::AVC1), Err(Error::InvalidState(_))));
        heif.destroy_item(item);
        assert!(!heif.destroy_decoder_config(config));
    }
}
