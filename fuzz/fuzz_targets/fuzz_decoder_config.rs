#![no_main]
use libfuzzer_sys::fuzz_target;
use zenheif_items::{CodecConfig, MediaFormat};

fuzz_target!(|data: &[u8]| {
    for format in [MediaFormat::Avc, MediaFormat::Hevc, MediaFormat::Av1] {
        for lenient in [false, true] {
            if let Ok(config) = CodecConfig::parse(format, data, lenient) {
                let record = config.to_record().expect("parsed config serializes");
                let again = CodecConfig::parse(format, &record, lenient).expect("serialized record parses");
                assert_eq!(again.to_record().expect("serializes twice").to_vec(), record.to_vec());
            }
        }
    }
});
