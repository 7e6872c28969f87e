//! Fuzz target for the double ratchet under hostile delivery
//!
//! # Strategy
//!
//! Two parties exchange messages while the fuzzer controls:
//! - Which side sends and what
//! - Delivery order, including replays and reordering across DH steps
//! - Bit flips in transit
//! - Pickle/unpickle cycles at arbitrary points
//!
//! # Invariants
//!
//! - A successful decrypt returns exactly the plaintext that was sent
//! - No message decrypts twice
//! - A tampered message never decrypts
//! - A failed decrypt leaves the session unchanged
//! - Unpickling a fresh pickle yields an identical session

#![no_main]

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use vesper_crypto::{CryptoContext, Environment, Message, PickleKey, SessionConfig, SessionState};

/// Splitmix64 stream so runs are reproducible from the input.
#[derive(Debug, Clone)]
struct FuzzEnv {
    state: Arc<AtomicU64>,
}

impl FuzzEnv {
    fn new(seed: u64) -> Self {
        Self { state: Arc::new(AtomicU64::new(seed)) }
    }
}

impl Environment for FuzzEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        for chunk in buffer.chunks_mut(8) {
            let mut z = self.state.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed);
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^= z >> 31;
            chunk.copy_from_slice(&z.to_le_bytes()[..chunk.len()]);
        }
    }
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Side {
    Alice,
    Bob,
}

#[derive(Debug, Clone, Arbitrary)]
enum Operation {
    Send { from: Side, plaintext: Vec<u8> },
    Deliver { to: Side, pick: u8 },
    Tamper { to: Side, pick: u8, position: u16, mask: u8 },
    Repickle { side: Side },
}

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    seed: u64,
    shared_secret: [u8; 32],
    max_skipped_keys: u8,
    max_skip: u8,
    operations: Vec<Operation>,
}

struct InFlight {
    message: Message,
    plaintext: Vec<u8>,
    delivered: bool,
}

struct Party {
    state: SessionState,
    inbox: Vec<InFlight>,
}

impl Party {
    fn pick(&self, pick: u8) -> Option<usize> {
        (!self.inbox.is_empty()).then(|| pick as usize % self.inbox.len())
    }
}

/// Independent copy of `state` via a pickle round trip.
fn copy_of(ctx: &CryptoContext<FuzzEnv>, state: &SessionState, key: &PickleKey) -> SessionState {
    let restored = ctx.unpickle(&ctx.pickle(state, key), key).expect("fresh pickle must open");
    assert_eq!(&restored, state, "pickle round trip changed the session");
    restored
}

fn flip(message: &Message, position: u16, mask: u8) -> Option<Message> {
    let mut bytes = message.encode();
    let len = bytes.len();
    bytes[position as usize % len] ^= mask;
    Message::decode(&bytes).ok()
}

fuzz_target!(|scenario: Scenario| {
    if scenario.operations.len() > 256 {
        return;
    }

    let config = SessionConfig {
        max_skipped_keys: usize::from(scenario.max_skipped_keys % 64),
        max_skip: u32::from(scenario.max_skip),
        ..SessionConfig::default()
    };
    let ctx = CryptoContext::new(FuzzEnv::new(scenario.seed), config);
    let key = PickleKey::new([0x01; 32]);

    let bob_secret = ctx.generate_ratchet_secret();
    let Ok(alice_state) =
        ctx.create_outbound_session(&scenario.shared_secret, bob_secret.public_key())
    else {
        return;
    };
    let bob_state = ctx.create_inbound_session(&scenario.shared_secret, bob_secret);

    let mut alice = Party { state: alice_state, inbox: Vec::new() };
    let mut bob = Party { state: bob_state, inbox: Vec::new() };

    for operation in scenario.operations {
        match operation {
            Operation::Send { from, plaintext } => {
                let (sender, receiver) = match from {
                    Side::Alice => (&mut alice, &mut bob),
                    Side::Bob => (&mut bob, &mut alice),
                };
                if let Ok(message) = ctx.encrypt(&mut sender.state, &plaintext) {
                    receiver.inbox.push(InFlight { message, plaintext, delivered: false });
                }
            },
            Operation::Deliver { to, pick } => {
                let party = match to {
                    Side::Alice => &mut alice,
                    Side::Bob => &mut bob,
                };
                let Some(index) = party.pick(pick) else {
                    continue;
                };
                let before = copy_of(&ctx, &party.state, &key);
                let inflight = &mut party.inbox[index];

                match ctx.decrypt(&mut party.state, &inflight.message) {
                    Ok(plaintext) => {
                        assert!(!inflight.delivered, "message decrypted twice");
                        assert_eq!(plaintext, inflight.plaintext);
                        inflight.delivered = true;
                    },
                    Err(_) => assert!(party.state == before, "failed decrypt mutated state"),
                }
            },
            Operation::Tamper { to, pick, position, mask } => {
                let party = match to {
                    Side::Alice => &mut alice,
                    Side::Bob => &mut bob,
                };
                let Some(index) = party.pick(pick).filter(|_| mask != 0) else {
                    continue;
                };
                let Some(tampered) = flip(&party.inbox[index].message, position, mask) else {
                    continue;
                };
                let before = copy_of(&ctx, &party.state, &key);

                let result = ctx.decrypt(&mut party.state, &tampered);
                assert!(result.is_err(), "tampered message decrypted");
                assert!(party.state == before, "failed decrypt mutated state");
            },
            Operation::Repickle { side } => {
                let party = match side {
                    Side::Alice => &mut alice,
                    Side::Bob => &mut bob,
                };
                party.state = copy_of(&ctx, &party.state, &key);
            },
        }
    }
});
