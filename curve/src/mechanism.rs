//! Name of this security mechanism as announced in the transport greeting.
//!
//! The transport exchanges a fixed-size, NUL-padded mechanism field before any command is sent.
//! Both sides must announce the same mechanism: a peer announcing anything else (such as `NULL`
//! or `PLAIN`) is rejected before a handshake (or an authorization request) takes place.

use crate::Error;

pub const NAME: &[u8] = b"CURVE";

/// Size of the mechanism field in the greeting.
pub const FIELD_LENGTH: usize = 20;

/// Returns the mechanism field to announce.
pub fn greeting_field() -> [u8; FIELD_LENGTH] {
    let mut field = [0u8; FIELD_LENGTH];
    field[..NAME.len()].copy_from_slice(NAME);
    field
}

/// Checks the mechanism field announced by the peer.
pub fn verify(field: &[u8]) -> Result<(), Error> {
    if field.len() != FIELD_LENGTH {
        return Err(Error::MechanismMismatch);
    }
    let end = field
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(FIELD_LENGTH);
    if &field[..end] != NAME || field[end..].iter().any(|&b| b != 0) {
        return Err(Error::MechanismMismatch);
    }
    Ok(())
}
