//! Fuzz target for wire decoding
//!
//! Feeds arbitrary bytes to the request and response decoders.
//!
//! # Invariants
//!
//! - Decoders NEVER panic; malformed input is an error
//! - Declared lengths over the limit are rejected before allocation
//! - A decoded request re-encodes to exactly the bytes it consumed

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use trivmux_server::wire::{MAX_PAYLOAD, Request, RequestHeader, Response, WireError};

fuzz_target!(|data: &[u8]| {
    if let Err(WireError::PayloadTooLarge { size, max }) = RequestHeader::decode(data) {
        assert!(size > max);
        assert_eq!(max, MAX_PAYLOAD);
    }

    if let Ok((request, used)) = Request::decode(data) {
        let mut buf = BytesMut::new();
        request.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[..used]);
    }

    let _ = Response::decode(data);
});
