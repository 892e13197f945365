//! Cryptographic utilities: addresses, keccak hashing, recoverable signatures

pub mod eth;

pub use eth::{
    checksum_address, hash_message, keccak256, parse_address, recover_hash_signer,
    recover_message_signer, Address, EthKeyPair, EthSignature, Hash32,
};
