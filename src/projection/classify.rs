//! Bypass call classification for display and guardian decisions

use crate::crypto::Address;
use crate::vault::calldata::{decode_token_transfer, Selector};
use crate::vault::BypassCall;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallClass {
    /// `to` and `amount` are absent when the arguments do not decode
    TokenTransfer {
        token: Address,
        selector: Selector,
        to: Option<Address>,
        amount: Option<u128>,
    },
    NativeTransfer {
        to: Address,
        value: u128,
    },
    ContractCall {
        target: Address,
        value: u128,
        selector: Option<Selector>,
    },
}

/// Zero value with a token-transfer selector is a token transfer, value with
/// empty data is a native transfer, anything else is a contract call.
pub fn classify(call: &BypassCall) -> CallClass {
    let selector = Selector::of(&call.data);
    match selector {
        Some(selector) if call.value == 0 && selector.is_token_transfer() => {
            let decoded = decode_token_transfer(&call.data);
            CallClass::TokenTransfer {
                token: call.target,
                selector,
                to: decoded.map(|t| t.to),
                amount: decoded.map(|t| t.amount),
            }
        }
        _ if call.value > 0 && call.data.is_empty() => CallClass::NativeTransfer {
            to: call.target,
            value: call.value,
        },
        _ => CallClass::ContractCall {
            target: call.target,
            value: call.value,
            selector,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::calldata::{encode_token_transfer, TRANSFER_SELECTOR};

    fn call(value: u128, data: Vec<u8>) -> BypassCall {
        BypassCall {
            target: Address::repeat_byte(7),
            value,
            data,
        }
    }

    #[test]
    fn test_token_transfer() {
        let to = Address::repeat_byte(1);
        let class = classify(&call(0, encode_token_transfer(&to, 250)));
        assert_eq!(
            class,
            CallClass::TokenTransfer {
                token: Address::repeat_byte(7),
                selector: TRANSFER_SELECTOR,
                to: Some(to),
                amount: Some(250),
            }
        );
    }

    #[test]
    fn test_native_transfer() {
        assert!(matches!(
            classify(&call(100, vec![])),
            CallClass::NativeTransfer { value: 100, .. }
        ));
    }

    #[test]
    fn test_everything_else_is_a_contract_call() {
        // Value attached to a token selector
        let data = encode_token_transfer(&Address::repeat_byte(1), 5);
        assert!(matches!(classify(&call(1, data)), CallClass::ContractCall { .. }));
        // Zero value, no data
        assert!(matches!(
            classify(&call(0, vec![])),
            CallClass::ContractCall { selector: None, .. }
        ));
        // Unknown selector
        assert!(matches!(
            classify(&call(0, vec![0xde, 0xad, 0xbe, 0xef])),
            CallClass::ContractCall {
                selector: Some(_),
                ..
            }
        ));
    }
}
