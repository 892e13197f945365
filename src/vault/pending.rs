//! Pending operations and their deterministic ids

use crate::crypto::{keccak256, Address, Hash32};
use crate::vault::actions::{encode_actions, ConfigAction};
use crate::vault::participant::Participant;
use serde::{Deserialize, Serialize};

/// Identifier of a pending operation
pub type OpId = Hash32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Config,
    BypassCall,
}

/// A call routed through the bypass pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassCall {
    pub target: Address,
    pub value: u128,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// What an operation does when applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpPayload {
    Config { actions: Vec<ConfigAction> },
    BypassCall { call: BypassCall },
}

impl OpPayload {
    pub fn kind(&self) -> OpKind {
        match self {
            OpPayload::Config { .. } => OpKind::Config,
            OpPayload::BypassCall { .. } => OpKind::BypassCall,
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            OpPayload::Config { actions } => {
                let mut buf = vec![0x01];
                buf.extend_from_slice(&encode_actions(actions));
                buf
            }
            OpPayload::BypassCall { call } => {
                let mut buf = Vec::with_capacity(1 + 20 + 16 + 4 + call.data.len());
                buf.push(0x02);
                buf.extend_from_slice(call.target.as_bytes());
                buf.extend_from_slice(&call.value.to_be_bytes());
                buf.extend_from_slice(&(call.data.len() as u32).to_be_bytes());
                buf.extend_from_slice(&call.data);
                buf
            }
        }
    }
}

/// A scheduled operation waiting for its due time and approvals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub op_id: OpId,
    pub payload: OpPayload,
    pub state_id: u64,
    pub scheduler: Participant,
    pub booster: Option<Participant>,
    pub due_time: u64,
    pub approvers: Vec<Participant>,
}

impl PendingOperation {
    pub fn kind(&self) -> OpKind {
        self.payload.kind()
    }

    pub fn has_approved(&self, who: &Participant) -> bool {
        self.approvers.contains(who)
    }

    pub fn is_add_operator_now(&self) -> bool {
        matches!(
            &self.payload,
            OpPayload::Config { actions } if actions.len() == 1
                && matches!(actions[0], ConfigAction::AddOperatorNow { .. })
        )
    }

    /// Config batches made only of UNFREEZE actions
    pub fn is_unfreeze_only(&self) -> bool {
        match &self.payload {
            OpPayload::Config { actions } => is_unfreeze_only(actions),
            OpPayload::BypassCall { .. } => false,
        }
    }
}

pub fn is_unfreeze_only(actions: &[ConfigAction]) -> bool {
    !actions.is_empty() && actions.iter().all(ConfigAction::is_unfreeze)
}

fn encode_participant(buf: &mut Vec<u8>, who: Option<&Participant>) {
    match who {
        Some(p) => {
            buf.push(1);
            buf.extend_from_slice(p.address.as_bytes());
            buf.extend_from_slice(&p.perm_level.to_be_bytes());
        }
        None => {
            buf.push(0);
            buf.extend_from_slice(&[0u8; 22]);
        }
    }
}

/// Hash of everything identifying an operation.
///
/// Due time and approvers are not hashed, so the same request always yields
/// the same id.
pub fn compute_op_id(
    payload: &OpPayload,
    state_id: u64,
    scheduler: &Participant,
    booster: Option<&Participant>,
) -> OpId {
    let mut buf = payload.encode();
    buf.extend_from_slice(&state_id.to_be_bytes());
    encode_participant(&mut buf, Some(scheduler));
    encode_participant(&mut buf, booster);
    Hash32(keccak256(&buf))
}

/// Message a booster signs to lend its permissions to a batch
pub fn boost_message(actions: &[ConfigAction], state_id: u64, booster: &Participant) -> Vec<u8> {
    let mut buf = b"gatekeep-boost".to_vec();
    buf.extend_from_slice(&encode_actions(actions));
    buf.extend_from_slice(&state_id.to_be_bytes());
    encode_participant(&mut buf, Some(booster));
    keccak256(&buf).to_vec()
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(data)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}
