#![no_main]

use bytes::Bytes;
use commonware_curve::{
    auth::{Response, Status},
    command::{Hello, Initiate, Message, Ready, Welcome},
    keys, mechanism,
    metadata::Metadata,
    z85,
};
use libfuzzer_sys::fuzz_target;

fn fuzz(data: &[u8]) {
    let _ = Hello::decode(data);
    let _ = Welcome::decode(data);
    let _ = Initiate::decode(data);
    let _ = Ready::decode(data);
    let _ = Message::decode(data);
    let _ = Metadata::decode(data);
    let _ = mechanism::verify(data);
    let _ = keys::parse_key(data);
    let _ = Status::parse(data);
    if let Some(decoded) = z85::decode(data) {
        assert_eq!(z85::encode(&decoded).as_deref().map(str::as_bytes), Some(data));
    }

    let frames: Vec<Bytes> = data
        .split(|&b| b == 0xff)
        .map(Bytes::copy_from_slice)
        .collect();
    if let Ok(response) = Response::from_frames(&frames) {
        assert_eq!(Response::from_frames(&response.frames()), Ok(response));
    }
}

fuzz_target!(|data: &[u8]| {
    fuzz(data);
});
