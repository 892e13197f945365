//! Policy engine
//!
//! Resolves the bypass policy for a call: by target, then by method
//! selector, then the default delay-only policy.

use crate::crypto::Address;
use crate::errors::{GatekeepError, Result};
use crate::policy::rules::{BypassPolicy, BypassRule, CallContext, Verdict};
use crate::vault::calldata::Selector;
use crate::vault::commands::InitialConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Name of a registered policy
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyId(String);

/// Policy used when neither target nor selector is bound
pub const DEFAULT_POLICY: &str = "delay_only";

impl PolicyId {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn default_policy() -> Self {
        Self::new(DEFAULT_POLICY)
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PolicyId({})", self.0)
    }
}

/// Which binding resolved a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicySource {
    Target,
    Method,
    Default,
}

/// Result of policy evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub policy: PolicyId,
    pub source: PolicySource,
    pub verdict: Verdict,
}

/// Policy file format: named rules plus initial bindings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    /// Version
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub policies: HashMap<String, BypassRule>,
    #[serde(default)]
    pub by_target: HashMap<Address, String>,
    #[serde(default)]
    pub by_method: HashMap<Selector, String>,
}

fn default_version() -> u32 {
    1
}

impl PolicyFile {
    /// Load from file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path)
            .map_err(|e| GatekeepError::ConfigError(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&json).map_err(|e| GatekeepError::ConfigError(e.to_string()))
    }

    /// Named rules, ready to register with an account's engine
    pub fn rules(&self) -> Vec<(PolicyId, Arc<dyn BypassPolicy>)> {
        let mut rules: Vec<(PolicyId, Arc<dyn BypassPolicy>)> = self
            .policies
            .iter()
            .map(|(name, rule)| (PolicyId::new(name), Arc::new(rule.clone()) as Arc<dyn BypassPolicy>))
            .collect();
        rules.sort_by(|a, b| a.0.cmp(&b.0));
        rules
    }

    /// Add the file's bindings to an initial configuration. Bindings the
    /// configuration already has win.
    pub fn bind_into(&self, config: &mut InitialConfig) {
        let mut targets: Vec<_> = self.by_target.iter().collect();
        targets.sort();
        for (target, name) in targets {
            if !config.target_policies.iter().any(|(t, _)| t == target) {
                config.target_policies.push((*target, PolicyId::new(name)));
            }
        }

        let mut methods: Vec<_> = self.by_method.iter().collect();
        methods.sort();
        for (selector, name) in methods {
            if !config.method_policies.iter().any(|(m, _)| m == selector) {
                config.method_policies.push((*selector, PolicyId::new(name)));
            }
        }
        info!(
            "Policy file binds {} targets and {} methods",
            self.by_target.len(),
            self.by_method.len()
        );
    }
}

/// Registry of bypass policies and the bindings that select them
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    registry: HashMap<PolicyId, Arc<dyn BypassPolicy>>,
    by_target: HashMap<Address, PolicyId>,
    by_method: HashMap<Selector, PolicyId>,
}

impl PolicyEngine {
    /// Engine with the built-in rules registered and no bindings
    pub fn new() -> Self {
        let mut engine = Self {
            registry: HashMap::new(),
            by_target: HashMap::new(),
            by_method: HashMap::new(),
        };
        engine.register(PolicyId::default_policy(), Arc::new(BypassRule::DelayOnly));
        engine.register(PolicyId::new("allow_all"), Arc::new(BypassRule::AllowAll));
        engine.register(
            PolicyId::new("approval_shortcut"),
            Arc::new(BypassRule::ApprovalShortcut),
        );
        engine
    }

    /// Register (or replace) a policy under a name
    pub fn register(&mut self, id: PolicyId, policy: Arc<dyn BypassPolicy>) {
        debug!("Registered bypass policy {}: {}", id, policy.description());
        self.registry.insert(id, policy);
    }

    pub fn is_registered(&self, id: &PolicyId) -> bool {
        self.registry.contains_key(id)
    }

    fn check_known(&self, policy: Option<&PolicyId>) -> Result<()> {
        match policy {
            Some(id) if !self.is_registered(id) => Err(GatekeepError::InvalidAction(format!(
                "unknown bypass policy {}",
                id
            ))),
            _ => Ok(()),
        }
    }

    /// Bind or unbind a target
    pub fn bind_target(&mut self, target: Address, policy: Option<PolicyId>) -> Result<()> {
        self.check_known(policy.as_ref())?;
        match policy {
            Some(id) => self.by_target.insert(target, id),
            None => self.by_target.remove(&target),
        };
        Ok(())
    }

    /// Bind or unbind a method selector
    pub fn bind_method(&mut self, selector: Selector, policy: Option<PolicyId>) -> Result<()> {
        self.check_known(policy.as_ref())?;
        match policy {
            Some(id) => self.by_method.insert(selector, id),
            None => self.by_method.remove(&selector),
        };
        Ok(())
    }

    pub fn target_bindings(&self) -> &HashMap<Address, PolicyId> {
        &self.by_target
    }

    pub fn method_bindings(&self) -> &HashMap<Selector, PolicyId> {
        &self.by_method
    }

    /// Evaluate a call against the policy that governs it
    pub fn evaluate(&self, call: &CallContext<'_>) -> Evaluation {
        let (policy, source) = if let Some(id) = self.by_target.get(&call.target) {
            (id.clone(), PolicySource::Target)
        } else if let Some(id) = call.selector().and_then(|s| self.by_method.get(&s)) {
            (id.clone(), PolicySource::Method)
        } else {
            (PolicyId::default_policy(), PolicySource::Default)
        };

        // A binding can only be installed for a registered policy, and the
        // default is registered in `new`, so a miss means delay.
        let verdict = self
            .registry
            .get(&policy)
            .map(|p| p.evaluate(call))
            .unwrap_or(Verdict::DelayRequired);

        debug!(
            "Bypass policy {} ({:?}) for call to {}: {:?}",
            policy, source, call.target, verdict
        );

        Evaluation {
            policy,
            source,
            verdict,
        }
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::calldata::{encode_token_transfer, TRANSFER_SELECTOR};

    fn account() -> Address {
        Address::repeat_byte(0xAA)
    }

    #[test]
    fn test_default_is_delay() {
        let engine = PolicyEngine::new();
        let call = CallContext::new(account(), Address::repeat_byte(1), 5, &[]);
        let eval = engine.evaluate(&call);
        assert_eq!(eval.verdict, Verdict::DelayRequired);
        assert_eq!(eval.source, PolicySource::Default);
    }

    #[test]
    fn test_target_precedes_method() {
        let mut engine = PolicyEngine::new();
        let token = Address::repeat_byte(7);
        engine
            .bind_method(TRANSFER_SELECTOR, Some(PolicyId::new("allow_all")))
            .unwrap();

        let data = encode_token_transfer(&Address::repeat_byte(1), 10);
        let call = CallContext::new(account(), token, 0, &data);
        assert_eq!(engine.evaluate(&call).verdict, Verdict::Immediate);
        assert_eq!(engine.evaluate(&call).source, PolicySource::Method);

        engine
            .bind_target(token, Some(PolicyId::default_policy()))
            .unwrap();
        let eval = engine.evaluate(&call);
        assert_eq!(eval.verdict, Verdict::DelayRequired);
        assert_eq!(eval.source, PolicySource::Target);

        engine.bind_target(token, None).unwrap();
        assert_eq!(engine.evaluate(&call).source, PolicySource::Method);
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let mut engine = PolicyEngine::new();
        let err = engine
            .bind_target(Address::repeat_byte(1), Some(PolicyId::new("nope")))
            .unwrap_err();
        assert!(matches!(err, GatekeepError::InvalidAction(_)));
    }

    #[test]
    fn test_policy_file_rules_and_bindings() {
        let json = r#"{
            "policies": { "small": { "type": "value_limit", "id": "small", "max_immediate": 100 } },
            "by_target": {
                "0x0101010101010101010101010101010101010101": "small",
                "0x0202020202020202020202020202020202020202": "allow_all"
            }
        }"#;
        let file: PolicyFile = serde_json::from_str(json).unwrap();

        let mut engine = PolicyEngine::new();
        for (id, rule) in file.rules() {
            engine.register(id, rule);
        }
        assert!(engine.is_registered(&PolicyId::new("small")));

        let kept = (Address::repeat_byte(2), PolicyId::default_policy());
        let mut config = InitialConfig {
            target_policies: vec![kept.clone()],
            ..Default::default()
        };
        file.bind_into(&mut config);
        assert_eq!(
            config.target_policies,
            vec![kept, (Address::repeat_byte(1), PolicyId::new("small"))]
        );

        for (target, id) in &config.target_policies {
            engine.bind_target(*target, Some(id.clone())).unwrap();
        }
        let target = Address::repeat_byte(1);
        let small = CallContext::new(account(), target, 100, &[]);
        let large = CallContext::new(account(), target, 101, &[]);
        assert_eq!(engine.evaluate(&small).verdict, Verdict::Immediate);
        assert_eq!(
            engine.evaluate(&large).verdict,
            Verdict::NeedsApprovalThenImmediate
        );
    }

    #[test]
    fn test_missing_policy_file_is_empty() {
        let file = PolicyFile::load(Path::new("does-not-exist-policies.json")).unwrap();
        assert!(file.rules().is_empty());
    }
}
