#![no_main]
use libfuzzer_sys::fuzz_target;
use zenheif_items::{Av1ImageItem, AvcImageItem, Heif, HeifConfig, HevcImageItem, Size};

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let (config, payload) = rest.split_at((split as usize).min(rest.len()));
    let size = Size::new(u32::from(split) + 1, 16);
    let mut heif = Heif::with_config(HeifConfig::default().with_max_item_data_bytes(1 << 16));

    let built = [
        AvcImageItem::with_config_bytes(&mut heif, size, config, payload).map(|item| item.id()),
        HevcImageItem::with_config_bytes(&mut heif, size, config, payload).map(|item| item.id()),
        Av1ImageItem::with_config_bytes(&mut heif, size, config, payload).map(|item| item.id()),
    ];
    let live = built.iter().filter(|item| item.is_ok()).count();
    assert_eq!(heif.item_count(), live);

    for item in built.iter().flatten() {
        assert_eq!(heif.item_data(*item).unwrap().unwrap().to_vec(), payload);
        let bitstream = heif.item_bitstream(*item).unwrap().unwrap();
        if !payload.starts_with(&[0, 0, 1]) && !payload.starts_with(&[0, 0, 0, 1]) {
            assert_eq!(bitstream.to_vec(), payload);
        }
    }
    if live > 0 {
        heif.finalize().unwrap();
        let out = heif.output_items().unwrap();
        assert_eq!(out.len(), live);
        for item in &out {
            let expected = heif.item_bitstream(item.id).unwrap().unwrap();
            assert_eq!(item.bitstream.as_ref().unwrap().to_vec(), expected.to_vec());
        }
    }
});
