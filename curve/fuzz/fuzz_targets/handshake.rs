#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use commonware_curve::{
    auth::Response,
    client::{self, Client},
    keys::{CookieJar, KeyPair},
    metadata::Metadata,
    server::{self, Server},
    Error,
};
use libfuzzer_sys::fuzz_target;
use rand::{rngs::StdRng, SeedableRng};
use std::{sync::Arc, time::Duration};

#[derive(Arbitrary, Debug, Clone, Copy)]
enum Target {
    Hello,
    Welcome,
    Initiate,
    Ready,
    Message,
}

#[derive(Arbitrary, Debug)]
struct Input {
    seed: u64,
    target: Target,
    position: u16,
    mask: u8,
    truncate: Option<u16>,
    payload: Vec<u8>,
}

fn mutate(input: &Input, target: Target, command: Bytes) -> Vec<u8> {
    let mut command = command.to_vec();
    if std::mem::discriminant(&input.target) != std::mem::discriminant(&target) {
        return command;
    }
    if let Some(length) = input.truncate {
        command.truncate(length as usize);
    }
    if !command.is_empty() {
        let position = input.position as usize % command.len();
        command[position] ^= input.mask;
    }
    command
}

fn fuzz(input: Input) {
    let mut rng = StdRng::seed_from_u64(input.seed);
    let server_key = KeyPair::generate(&mut rng);
    let mut client = Client::new(
        StdRng::seed_from_u64(input.seed.wrapping_add(1)),
        client::Config {
            key_pair: KeyPair::generate(&mut rng),
            server_key: *server_key.public(),
            metadata: Metadata::new(),
            handshake_timeout: Duration::from_secs(1),
        },
    );
    let mut server = Server::new(
        StdRng::seed_from_u64(input.seed.wrapping_add(2)),
        server::Config {
            key_pair: server_key,
            cookies: Arc::new(CookieJar::new()),
            domain: String::new(),
            identity: Bytes::new(),
            metadata: Metadata::new(),
            handshake_timeout: Duration::from_secs(1),
        },
        "fuzz".into(),
    );

    let result = (|| -> Result<(), Error> {
        let hello = mutate(&input, Target::Hello, client.produce_hello()?);
        server.process_hello(&hello)?;
        let welcome = mutate(&input, Target::Welcome, server.produce_welcome()?);
        client.process_welcome(&welcome)?;
        let initiate = mutate(&input, Target::Initiate, client.produce_initiate()?);
        let request = server.process_initiate(&initiate)?;
        let (ready, mut accepted) = server.authorized(Response::allow(request.request_id))?;
        let ready = mutate(&input, Target::Ready, ready);
        let mut connected = client.process_ready(&ready)?;

        let message = connected.sender.seal(&input.payload, false)?;
        let message = mutate(&input, Target::Message, message);
        let frame = accepted.receiver.open(&message)?;
        if input.mask == 0 && input.truncate.is_none() {
            assert_eq!(frame.payload.as_ref(), input.payload.as_slice());
        }
        Ok(())
    })();

    if result.is_err() {
        let client_failed = client.state() == client::State::Failed;
        let server_failed = server.state() == server::State::Failed;
        let traffic_failed = matches!(input.target, Target::Message);
        assert!(client_failed || server_failed || traffic_failed);
    }
}

fuzz_target!(|input: Input| {
    fuzz(input);
});
