#![no_main]
use libfuzzer_sys::fuzz_target;
use mmdb_reader::{DataDecoder, MemorySource};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First byte picks the pointer base, the rest is a data section
    let section = &data[1..];
    let base = data[0] as usize % section.len();
    let source = MemorySource::from_bytes(section.to_vec());
    let decoder = DataDecoder::new(&source, base);

    let mut offset = 0;
    while offset < section.len() {
        match decoder.decode(offset) {
            Ok((_, next)) if next > offset => offset = next,
            _ => break,
        }
    }
});
