#![no_main]
use libfuzzer_sys::fuzz_target;
use mmdb_reader::Database;
use std::net::{IpAddr, Ipv4Addr};

/// Fuzzed search tree (two 24-bit nodes) in front of a fixed data section
/// and metadata
fn database(tree: &[u8]) -> Vec<u8> {
    let mut db = tree.to_vec();
    db.extend_from_slice(&[0u8; 16]);
    db.extend_from_slice(b"\xe1\x42ip\x470.0.0.0");
    db.extend_from_slice(b"\xAB\xCD\xEFMaxMind.com");
    db.push(0xe3);
    db.extend_from_slice(b"\x4anode_count\xc1\x02");
    db.extend_from_slice(b"\x4brecord_size\xa1\x18");
    db.extend_from_slice(b"\x4aip_version\xa1\x04");
    db
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 16 {
        return;
    }

    let db = match Database::from_bytes(database(&data[..12])) {
        Ok(db) => db,
        Err(_) => return,
    };
    let addr = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let _ = db.get_ip_with_prefix_length(IpAddr::V4(addr));
});
