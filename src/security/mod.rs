//! Secret handling
//!
//! - Zeroizing byte buffers
//! - The guardian's challenge seed

pub mod zeroize;

pub use self::zeroize::{ChallengeSeed, SecureBytes};
