//! Accounts the guardian watches
//!
//! Each account carries the out-of-band recipient its challenges go to, the
//! identity subject allowed to enroll devices, and at most one device
//! awaiting validation for an immediate operator add.

use crate::crypto::Address;
use crate::errors::{GatekeepError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

/// A device that asked to be added as an operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequest {
    pub device: Address,
    /// Subject of the verified identity that made the request
    pub subject: String,
    pub requested_at: u64,
    /// Until then no other device may take its place
    pub expires_at: u64,
}

/// Metadata about a watched account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub account: Address,
    pub recipient: String,
    /// Identity subject that may enroll devices; none means nobody can
    pub owner_subject: Option<String>,
    pub registered_at: i64,
    pub watched: bool,
    pub pending_device: Option<DeviceRequest>,
    pub validated_device: Option<Address>,
}

/// In-memory account registry
pub struct AccountRegistry {
    accounts: RwLock<HashMap<Address, AccountInfo>>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Watch an account, sending its challenges to `recipient`
    pub fn register(&self, account: Address, recipient: &str, owner_subject: Option<&str>) -> Result<AccountInfo> {
        if recipient.trim().is_empty() {
            return Err(GatekeepError::ConfigError(format!(
                "account {} has an empty recipient",
                account
            )));
        }
        let info = AccountInfo {
            account,
            recipient: recipient.to_string(),
            owner_subject: owner_subject.map(str::to_string),
            registered_at: chrono::Utc::now().timestamp(),
            watched: true,
            pending_device: None,
            validated_device: None,
        };
        self.accounts.write().insert(account, info.clone());

        info!("Watching account {}", account);
        Ok(info)
    }

    pub fn unregister(&self, account: &Address) -> Result<()> {
        self.accounts
            .write()
            .remove(account)
            .map(|_| debug!("Stopped watching account {}", account))
            .ok_or(GatekeepError::UnknownAccount(*account))
    }

    pub fn get(&self, account: &Address) -> Result<AccountInfo> {
        self.accounts
            .read()
            .get(account)
            .cloned()
            .ok_or(GatekeepError::UnknownAccount(*account))
    }

    pub fn list(&self) -> Vec<AccountInfo> {
        let mut all: Vec<_> = self.accounts.read().values().cloned().collect();
        all.sort_by_key(|a| a.account);
        all
    }

    /// Accounts whose logs the guardian scans
    pub fn watched(&self) -> Vec<Address> {
        self.list()
            .into_iter()
            .filter(|a| a.watched)
            .map(|a| a.account)
            .collect()
    }

    pub fn contains(&self, account: &Address) -> bool {
        self.accounts.read().contains_key(account)
    }

    pub fn count(&self) -> usize {
        self.accounts.read().len()
    }

    /// Pause or resume watching without forgetting the account
    pub fn set_watched(&self, account: &Address, watched: bool) -> Result<()> {
        let mut accounts = self.accounts.write();
        let info = accounts
            .get_mut(account)
            .ok_or(GatekeepError::UnknownAccount(*account))?;
        info.watched = watched;
        Ok(())
    }

    /// Record a device awaiting validation for the account's owner.
    ///
    /// A request for a different device is refused while an earlier one
    /// is still unexpired.
    pub fn request_device(&self, account: &Address, request: DeviceRequest) -> Result<AccountInfo> {
        let mut accounts = self.accounts.write();
        let info = accounts
            .get_mut(account)
            .ok_or(GatekeepError::UnknownAccount(*account))?;

        if info.owner_subject.as_deref() != Some(request.subject.as_str()) {
            return Err(GatekeepError::NotAccountOwner(request.subject));
        }
        if let Some(pending) = &info.pending_device {
            if pending.device != request.device && request.requested_at < pending.expires_at {
                return Err(GatekeepError::InvalidAction(format!(
                    "device {} is already awaiting validation",
                    pending.device
                )));
            }
        }

        debug!("Device {} requested for {}", request.device, account);
        info.pending_device = Some(request);
        Ok(info.clone())
    }

    /// Promote the pending device to validated, provided it is still
    /// `device`
    pub fn validate_device(&self, account: &Address, device: &Address) -> Result<Address> {
        let mut accounts = self.accounts.write();
        let info = accounts
            .get_mut(account)
            .ok_or(GatekeepError::UnknownAccount(*account))?;
        match &info.pending_device {
            Some(request) if request.device == *device => {}
            _ => {
                return Err(GatekeepError::InvalidAction(format!(
                    "device {} is not awaiting validation",
                    device
                )))
            }
        }
        info.pending_device = None;
        info.validated_device = Some(*device);
        Ok(*device)
    }

    pub fn validated_device(&self, account: &Address) -> Option<Address> {
        self.accounts
            .read()
            .get(account)
            .and_then(|info| info.validated_device)
    }

    /// Forget the validated device once it has been added
    pub fn consume_device(&self, account: &Address, device: &Address) -> bool {
        let mut accounts = self.accounts.write();
        match accounts.get_mut(account) {
            Some(info) if info.validated_device.as_ref() == Some(device) => {
                info.validated_device = None;
                true
            }
            _ => false,
        }
    }
}

impl Default for AccountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: &str = "alice@example.com";

    fn request(device: u8, subject: &str, at: u64) -> DeviceRequest {
        DeviceRequest {
            device: Address::repeat_byte(device),
            subject: subject.to_string(),
            requested_at: at,
            expires_at: at + 600,
        }
    }

    #[test]
    fn test_register_and_list() {
        let registry = AccountRegistry::new();
        registry.register(Address::repeat_byte(2), "+15550102", None).unwrap();
        registry.register(Address::repeat_byte(1), "+15550101", Some(OWNER)).unwrap();

        assert_eq!(registry.count(), 2);
        assert_eq!(registry.watched(), vec![Address::repeat_byte(1), Address::repeat_byte(2)]);
        let info = registry.get(&Address::repeat_byte(1)).unwrap();
        assert_eq!(info.recipient, "+15550101");
        assert_eq!(info.owner_subject.as_deref(), Some(OWNER));
        assert!(registry.register(Address::repeat_byte(3), "  ", None).is_err());
    }

    #[test]
    fn test_unwatched_accounts_are_skipped() {
        let registry = AccountRegistry::new();
        let account = Address::repeat_byte(1);
        registry.register(account, "+15550101", None).unwrap();
        registry.set_watched(&account, false).unwrap();

        assert!(registry.watched().is_empty());
        assert!(registry.contains(&account));
        assert!(matches!(
            registry.set_watched(&Address::repeat_byte(9), true),
            Err(GatekeepError::UnknownAccount(_))
        ));
    }

    #[test]
    fn test_device_lifecycle() {
        let registry = AccountRegistry::new();
        let account = Address::repeat_byte(1);
        let device = Address::repeat_byte(7);
        registry.register(account, "+15550101", Some(OWNER)).unwrap();

        assert!(registry.validate_device(&account, &device).is_err());
        registry.request_device(&account, request(7, OWNER, 0)).unwrap();
        assert!(registry.validate_device(&account, &Address::repeat_byte(8)).is_err());
        assert_eq!(registry.validate_device(&account, &device).unwrap(), device);
        assert_eq!(registry.validated_device(&account), Some(device));

        assert!(!registry.consume_device(&account, &Address::repeat_byte(8)));
        assert!(registry.consume_device(&account, &device));
        assert_eq!(registry.validated_device(&account), None);

        registry.unregister(&account).unwrap();
        assert!(registry.unregister(&account).is_err());
    }

    #[test]
    fn test_only_the_owner_enrolls_devices() {
        let registry = AccountRegistry::new();
        let account = Address::repeat_byte(1);
        registry.register(account, "+15550101", Some(OWNER)).unwrap();
        let unowned = Address::repeat_byte(2);
        registry.register(unowned, "+15550102", None).unwrap();

        assert!(matches!(
            registry.request_device(&account, request(7, "mallory@example.com", 0)),
            Err(GatekeepError::NotAccountOwner(_))
        ));
        assert!(matches!(
            registry.request_device(&unowned, request(7, OWNER, 0)),
            Err(GatekeepError::NotAccountOwner(_))
        ));
        assert!(registry.get(&account).unwrap().pending_device.is_none());
    }

    #[test]
    fn test_pending_device_not_replaced_before_expiry() {
        let registry = AccountRegistry::new();
        let account = Address::repeat_byte(1);
        registry.register(account, "+15550101", Some(OWNER)).unwrap();

        registry.request_device(&account, request(7, OWNER, 100)).unwrap();
        assert!(registry.request_device(&account, request(8, OWNER, 699)).is_err());
        // The same device may ask again
        registry.request_device(&account, request(7, OWNER, 200)).unwrap();

        registry.request_device(&account, request(8, OWNER, 800)).unwrap();
        let pending = registry.get(&account).unwrap().pending_device.unwrap();
        assert_eq!(pending.device, Address::repeat_byte(8));
    }
}
