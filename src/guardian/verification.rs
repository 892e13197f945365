//! Device validation for immediate operator adds
//!
//! A device proves control of the account's out-of-band recipient by
//! echoing a code. Only then will the guardian approve an
//! ADD_OPERATOR_NOW request naming that device.

use crate::crypto::Address;
use crate::errors::{GatekeepError, Result};
use crate::guardian::challenge::{ChallengeCodes, ChallengePurpose};
use crate::guardian::channel::{GuardianNotice, NoticeBus, OobChannel};
use crate::guardian::registry::{AccountRegistry, DeviceRequest};
use crate::vault::Clock;
use std::sync::Arc;
use tracing::{info, warn};

/// Identity asserted by an upstream authenticator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub subject: String,
    /// Address of the device asking to become an operator
    pub device_nonce: Address,
}

pub struct DeviceVerifier {
    registry: Arc<AccountRegistry>,
    codes: Arc<ChallengeCodes>,
    channel: Arc<dyn OobChannel>,
    clock: Arc<dyn Clock>,
    notices: NoticeBus,
}

impl DeviceVerifier {
    pub fn new(
        registry: Arc<AccountRegistry>,
        codes: Arc<ChallengeCodes>,
        channel: Arc<dyn OobChannel>,
        clock: Arc<dyn Clock>,
        notices: NoticeBus,
    ) -> Self {
        Self {
            registry,
            codes,
            channel,
            clock,
            notices,
        }
    }

    /// Record the device and send a code bound to it to the account's
    /// recipient. Only the account's owner may ask.
    pub async fn request_device_verification(
        &self,
        account: Address,
        identity: VerifiedIdentity,
    ) -> Result<()> {
        let now = self.clock.now();
        let device = identity.device_nonce;
        let info = self.registry.request_device(
            &account,
            DeviceRequest {
                device,
                subject: identity.subject,
                requested_at: now,
                expires_at: self.codes.expires_at(now),
            },
        )?;

        let code = self
            .codes
            .code(ChallengePurpose::ValidateDevice, &info.recipient, &device.0, now);
        let message = format!(
            "gatekeep: a new device {} wants to operate account {}. Verification code: {}",
            device, account, code
        );
        self.channel.send(&info.recipient, &message).await?;

        info!(account = %account, device = %device, "Device verification requested");
        Ok(())
    }

    /// Check the echoed code against the pending device and validate it
    pub fn confirm_device(&self, account: Address, code: &str) -> Result<Address> {
        let info = self.registry.get(&account)?;
        let request = info.pending_device.ok_or_else(|| {
            GatekeepError::InvalidAction("no device awaiting validation".to_string())
        })?;

        let now = self.clock.now();
        if !self.codes.verify(
            ChallengePurpose::ValidateDevice,
            &info.recipient,
            &request.device.0,
            code,
            request.requested_at,
            now,
        ) {
            warn!(account = %account, "Rejected device verification code");
            return Err(GatekeepError::InvalidChallenge);
        }

        let device = self.registry.validate_device(&account, &request.device)?;
        self.notices
            .publish(GuardianNotice::DeviceValidated { account, device });
        info!(account = %account, device = %device, "Device validated");
        Ok(device)
    }
}
