//! Funds held by the account
//!
//! Applied bypass calls move native value and token balances here. Calls
//! that are neither are only recorded.

use crate::crypto::Address;
use crate::errors::{GatekeepError, Result};
use crate::vault::calldata::decode_token_transfer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// What executing a call did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEffect {
    NativeTransfer {
        to: Address,
        value: u128,
    },
    TokenTransfer {
        token: Address,
        to: Address,
        amount: u128,
    },
    ContractCall {
        target: Address,
        value: u128,
        data_len: usize,
    },
}

#[derive(Debug, Default, Clone)]
pub struct Treasury {
    balance: u128,
    /// Native balances of everyone else
    external: HashMap<Address, u128>,
    /// token -> holder -> balance; the account itself is a holder
    tokens: HashMap<Address, HashMap<Address, u128>>,
    calls: Vec<CallEffect>,
}

impl Treasury {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&mut self, value: u128) {
        self.balance = self.balance.saturating_add(value);
    }

    pub fn balance(&self) -> u128 {
        self.balance
    }

    pub fn balance_of(&self, holder: &Address) -> u128 {
        self.external.get(holder).copied().unwrap_or(0)
    }

    /// Credit `holder` with `amount` of `token`, registering the token
    pub fn mint_token(&mut self, token: Address, holder: Address, amount: u128) {
        let entry = self.tokens.entry(token).or_default().entry(holder).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    pub fn token_balance(&self, token: &Address, holder: &Address) -> u128 {
        self.tokens
            .get(token)
            .and_then(|t| t.get(holder))
            .copied()
            .unwrap_or(0)
    }

    pub fn calls(&self) -> &[CallEffect] {
        &self.calls
    }

    /// Execute a call made by `account`. Either fully applies or changes nothing.
    pub fn execute(&mut self, account: &Address, target: Address, value: u128, data: &[u8]) -> Result<CallEffect> {
        if value > self.balance {
            return Err(GatekeepError::InsufficientFunds {
                requested: value,
                available: self.balance,
            });
        }

        let token_call = if self.tokens.contains_key(&target) {
            decode_token_transfer(data)
        } else {
            None
        };

        let effect = match token_call {
            Some(transfer) => {
                let from = transfer.from.unwrap_or(*account);
                if from != *account {
                    return Err(GatekeepError::ExecutionFailed(format!(
                        "token transfer from {} not owned by account",
                        from
                    )));
                }
                let holders = self.tokens.entry(target).or_default();
                let available = holders.get(account).copied().unwrap_or(0);
                if transfer.amount > available {
                    return Err(GatekeepError::InsufficientFunds {
                        requested: transfer.amount,
                        available,
                    });
                }
                holders.insert(*account, available - transfer.amount);
                let to_balance = holders.entry(transfer.to).or_insert(0);
                *to_balance = to_balance.saturating_add(transfer.amount);
                CallEffect::TokenTransfer {
                    token: target,
                    to: transfer.to,
                    amount: transfer.amount,
                }
            }
            None if data.is_empty() => CallEffect::NativeTransfer { to: target, value },
            None => CallEffect::ContractCall {
                target,
                value,
                data_len: data.len(),
            },
        };

        if value > 0 {
            self.balance -= value;
            let entry = self.external.entry(target).or_insert(0);
            *entry = entry.saturating_add(value);
        }

        debug!("Executed call from {}: {:?}", account, effect);
        self.calls.push(effect.clone());
        Ok(effect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::calldata::encode_token_transfer;

    fn account() -> Address {
        Address::repeat_byte(0xAA)
    }

    #[test]
    fn test_native_transfer() {
        let mut t = Treasury::new();
        t.deposit(500);
        let to = Address::repeat_byte(1);

        let effect = t.execute(&account(), to, 100, &[]).unwrap();
        assert_eq!(effect, CallEffect::NativeTransfer { to, value: 100 });
        assert_eq!(t.balance(), 400);
        assert_eq!(t.balance_of(&to), 100);
    }

    #[test]
    fn test_insufficient_funds_changes_nothing() {
        let mut t = Treasury::new();
        t.deposit(50);
        let err = t.execute(&account(), Address::repeat_byte(1), 100, &[]).unwrap_err();
        assert!(matches!(err, GatekeepError::InsufficientFunds { .. }));
        assert_eq!(t.balance(), 50);
        assert!(t.calls().is_empty());
    }

    #[test]
    fn test_token_transfer() {
        let mut t = Treasury::new();
        let token = Address::repeat_byte(7);
        let to = Address::repeat_byte(1);
        t.mint_token(token, account(), 1_000);

        let data = encode_token_transfer(&to, 300);
        let effect = t.execute(&account(), token, 0, &data).unwrap();
        assert!(matches!(effect, CallEffect::TokenTransfer { amount: 300, .. }));
        assert_eq!(t.token_balance(&token, &account()), 700);
        assert_eq!(t.token_balance(&token, &to), 300);

        let too_much = encode_token_transfer(&to, 701);
        assert!(t.execute(&account(), token, 0, &too_much).is_err());
    }

    #[test]
    fn test_contract_call_recorded() {
        let mut t = Treasury::new();
        let effect = t
            .execute(&account(), Address::repeat_byte(9), 0, &[1, 2, 3, 4, 5])
            .unwrap();
        assert!(matches!(effect, CallEffect::ContractCall { data_len: 5, .. }));
        assert_eq!(t.calls().len(), 1);
    }
}
