//! Fuzz target for address parsing

#![no_main]

use creditline_transport::Address;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(address) = Address::parse(s) {
            // The peer part always parses back to itself
            let peer = address.peer();
            let reparsed = Address::parse(&peer.to_string()).expect("peer address reparses");
            assert_eq!(reparsed.host(), peer.host());
            assert!(reparsed.node().is_none());
        }
    }
});
