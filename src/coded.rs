// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Codec-specific handles over [`Heif`] items and decoder configs.
//!
//! Each wrapper pins the codec family at the type level and offers three ways
//! to build an item: size only, size plus raw config bytes and data, or size
//! plus an existing (shared) decoder config and data. The last two either
//! produce a complete item or leave the container as it was.

use crate::decoder_config::{DecoderConfigId, MediaFormat};
use crate::heif::Heif;
use crate::item::{validate_payload, validate_size, ItemId, Size};
use crate::{Error, Result};
use log::debug;

/// Destroy a partially built item and hand back the error that stopped it.
fn roll_back(heif: &mut Heif, item: ItemId, err: Error) -> Error {
    debug!("rolling back item construction: {err}");
    heif.destroy_item(item);
    err
}

fn build_item(heif: &mut Heif, format: MediaFormat, size: Size) -> Result<ItemId> {
    validate_size(size)?;
    let item = heif.create_item(format.item_type())?;
    heif.set_size(item, size).map_err(|err| roll_back(heif, item, err))?;
    Ok(item)
}

fn build_with_config(
    heif: &mut Heif,
    format: MediaFormat,
    size: Size,
    config: DecoderConfigId,
    data: &[u8],
) -> Result<ItemId> {
    validate_size(size)?;
    let stored = heif.config_argument(config)?;
    if stored.format() != format {
        return Err(Error::InvalidArgument("decoder config codec family does not match item"));
    }
    validate_payload(data, stored.nal_length_size())?;
    heif.config().check_item_data_len(data.len())?;

    let item = build_item(heif, format, size)?;
    let attached = heif
        .set_decoder_config(item, config)
        .and_then(|()| heif.set_item_data(item, data));
    attached.map_err(|err| roll_back(heif, item, err))?;
    Ok(item)
}

fn build_with_config_bytes(heif: &mut Heif, format: MediaFormat, size: Size, config: &[u8], data: &[u8]) -> Result<ItemId> {
    validate_size(size)?;
    if data.is_empty() {
        return Err(Error::InvalidArgument("item data is empty"));
    }
    let config = new_config(heif, format, config)?;
    build_with_config(heif, format, size, config, data).map_err(|err| {
        discard_config(heif, config);
        err
    })
}

fn discard_config(heif: &mut Heif, config: DecoderConfigId) {
    if !heif.destroy_decoder_config(config) {
        debug!("decoder config could not be released after a failed construction");
    }
}

fn new_config(heif: &mut Heif, format: MediaFormat, bytes: &[u8]) -> Result<DecoderConfigId> {
    let config = heif.create_decoder_config(format)?;
    if let Err(err) = heif.set_config(config, bytes) {
        debug!("discarding {format:?} decoder config: {err}");
        discard_config(heif, config);
        return Err(err);
    }
    Ok(config)
}

macro_rules! coded_image_item {
    ($item:ident, $config:ident, $format:expr, $codec:literal) => {
        #[doc = concat!("A ", $codec, " coded image item.")]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $item(ItemId);

        #[doc = concat!("A decoder config that only ", $codec, " items accept.")]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $config(DecoderConfigId);

        impl $config {
            /// An empty config; fill it with [`Heif::set_config`].
            pub fn new(heif: &mut Heif) -> Result<Self> {
                heif.create_decoder_config($format).map(Self)
            }

            /// Parse `bytes` into a new config. Nothing is left in the container on error.
            pub fn from_bytes(heif: &mut Heif, bytes: &[u8]) -> Result<Self> {
                new_config(heif, $format, bytes).map(Self)
            }

            /// Wrap an existing config after checking its codec family.
            pub fn from_id(heif: &Heif, id: DecoderConfigId) -> Result<Self> {
                if heif.decoder_config_format(id)? != $format {
                    return Err(Error::InvalidArgument(concat!("decoder config is not ", $codec)));
                }
                Ok(Self(id))
            }

            pub fn id(&self) -> DecoderConfigId {
                self.0
            }
        }

        impl From<$config> for DecoderConfigId {
            fn from(config: $config) -> Self {
                config.0
            }
        }

        impl $item {
            /// An item with only its size set. Attach a config and data before finalizing.
            pub fn new(heif: &mut Heif, size: Size) -> Result<Self> {
                build_item(heif, $format, size).map(Self)
            }

            /// Build a complete item, parsing `config` into a decoder config owned by the container.
            pub fn with_config_bytes(heif: &mut Heif, size: Size, config: &[u8], data: &[u8]) -> Result<Self> {
                build_with_config_bytes(heif, $format, size, config, data).map(Self)
            }

            /// Build a complete item bound to an existing, possibly shared, decoder config.
            pub fn with_config(heif: &mut Heif, size: Size, config: &$config, data: &[u8]) -> Result<Self> {
                build_with_config(heif, $format, size, config.0, data).map(Self)
            }

            /// Wrap an existing item after checking its type.
            pub fn from_id(heif: &Heif, id: ItemId) -> Result<Self> {
                if heif.item_type(id)? != $format.item_type() {
                    return Err(Error::InvalidArgument(concat!("item is not a ", $codec, " image item")));
                }
                Ok(Self(id))
            }

            pub fn id(&self) -> ItemId {
                self.0
            }

            /// The decoder config bound to this item, if any.
            pub fn decoder_config(&self, heif: &Heif) -> Result<Option<$config>> {
                Ok(heif.attached_decoder_config(self.0)?.map($config))
            }

            pub fn set_decoder_config(&self, heif: &mut Heif, config: &$config) -> Result<()> {
                heif.set_decoder_config(self.0, config.0)
            }
        }

        impl From<$item> for ItemId {
            fn from(item: $item) -> Self {
                item.0
            }
        }
    };
}

coded_image_item!(AvcImageItem, AvcDecoderConfig, MediaFormat::Avc, "AVC");
coded_image_item!(HevcImageItem, HevcDecoderConfig, MediaFormat::Hevc, "HEVC");
coded_image_item!(Av1ImageItem, Av1DecoderConfig, MediaFormat::Av1, "AV1");
