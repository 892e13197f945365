//! Out-of-band verification codes
//!
//! Codes are derived, never stored: `keccak(purpose || seed || recipient ||
//! subject || bucket)` reduced to six digits. The subject is what the code
//! authorizes (an operation id or a device address), so a code never works
//! for anything else. A code is valid in the bucket it was issued in and the
//! one after.

use crate::crypto::keccak256;
use crate::security::ChallengeSeed;

pub const CODE_DIGITS: u32 = 6;

/// Domain separation between the two flows that send codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengePurpose {
    CancelOperation,
    ValidateDevice,
}

impl ChallengePurpose {
    fn tag(self) -> &'static [u8] {
        match self {
            ChallengePurpose::CancelOperation => b"cancel",
            ChallengePurpose::ValidateDevice => b"device",
        }
    }
}

pub struct ChallengeCodes {
    seed: ChallengeSeed,
    bucket_secs: u64,
}

impl ChallengeCodes {
    pub fn new(seed: ChallengeSeed, bucket_secs: u64) -> Self {
        Self {
            seed,
            bucket_secs: bucket_secs.max(1),
        }
    }

    fn bucket(&self, now: u64) -> u64 {
        now / self.bucket_secs
    }

    fn code_for_bucket(&self, purpose: ChallengePurpose, recipient: &str, subject: &[u8], bucket: u64) -> String {
        let mut buf = purpose.tag().to_vec();
        buf.extend_from_slice(self.seed.expose());
        buf.extend_from_slice(recipient.as_bytes());
        buf.extend_from_slice(subject);
        buf.extend_from_slice(&bucket.to_be_bytes());
        let digest = keccak256(&buf);

        let n = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        format!("{:0width$}", n % 10u32.pow(CODE_DIGITS), width = CODE_DIGITS as usize)
    }

    /// Code for `subject`, sent to `recipient` at `issued_at`
    pub fn code(&self, purpose: ChallengePurpose, recipient: &str, subject: &[u8], issued_at: u64) -> String {
        self.code_for_bucket(purpose, recipient, subject, self.bucket(issued_at))
    }

    /// First instant at which a code issued at `issued_at` is rejected
    pub fn expires_at(&self, issued_at: u64) -> u64 {
        (self.bucket(issued_at) + 2).saturating_mul(self.bucket_secs)
    }

    /// Check a code against the one issued for `subject` at `issued_at`
    pub fn verify(
        &self,
        purpose: ChallengePurpose,
        recipient: &str,
        subject: &[u8],
        code: &str,
        issued_at: u64,
        now: u64,
    ) -> bool {
        now < self.expires_at(issued_at) && self.code(purpose, recipient, subject, issued_at) == code
    }
}

impl std::fmt::Debug for ChallengeCodes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeCodes")
            .field("bucket_secs", &self.bucket_secs)
            .finish_non_exhaustive()
    }
}
