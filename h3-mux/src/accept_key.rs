use std::net::SocketAddr;
use std::sync::OnceLock;

use boring::hash::MessageDigest;
use boring::pkey::{PKey, Private};
use boring::sign::Signer;

// family byte + 16-byte address + port + cid length byte + up to 20 CID bytes
const RECORD_MAX_SIZE: usize = 1 + 16 + 2 + 1 + 20;

static KEY: OnceLock<PKey<Private>> = OnceLock::new();

fn key() -> &'static PKey<Private> {
    KEY.get_or_init(|| {
        let mut seed = [0u8; 32];
        boring::rand::rand_bytes(&mut seed).expect("seeding accepting-key HMAC");
        PKey::hmac(&seed).expect("creating accepting-key HMAC")
    })
}

/// Hash a `(peer address, offered connection ID)` pair into a 64-bit map key.
///
/// Initial and 0-RTT packets carry a client-chosen destination CID, so the
/// lookup key for a connection mid-handshake cannot be authenticated. Keying
/// the hash with a process-lifetime random HMAC secret keeps a remote peer
/// from crafting CIDs that collide in the accepting map.
///
/// The 64-bit truncation is host-endian: the value never leaves the process.
pub fn accepting_hash(peer: SocketAddr, cid: &[u8]) -> u64 {
    debug_assert!(cid.len() <= 20);

    let mut record = [0u8; RECORD_MAX_SIZE];
    let mut len = 0;
    let mut push = |bytes: &[u8]| {
        record[len..len + bytes.len()].copy_from_slice(bytes);
        len += bytes.len();
    };

    match peer {
        SocketAddr::V4(addr) => {
            push(&[4]);
            push(&addr.ip().octets());
        }
        SocketAddr::V6(addr) => {
            push(&[6]);
            push(&addr.ip().octets());
        }
    }
    push(&peer.port().to_be_bytes());
    push(&[cid.len() as u8]);
    push(cid);

    let mut signer = Signer::new(MessageDigest::sha256(), key()).expect("accepting-key signer");
    signer.update(&record[..len]).expect("accepting-key update");
    let mac = signer.sign_to_vec().expect("accepting-key sign");

    u64::from_ne_bytes(mac[..8].try_into().expect("HMAC-SHA256 output is 32 bytes"))
}
