use serde::Deserialize;

use crate::error::GatewayError;

/// Credential set identifying one tenant application.
///
/// Immutable once resolved from configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialScope {
    pub corp_id: String,
    pub corp_secret: String,
    pub agent_id: i64,
}

/// Cache identity of a scope. The secret is deliberately not part of it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    pub corp_id: String,
    pub agent_id: i64,
}

impl CredentialScope {
    pub fn new(corp_id: impl Into<String>, corp_secret: impl Into<String>, agent_id: i64) -> Self {
        Self {
            corp_id: corp_id.into(),
            corp_secret: corp_secret.into(),
            agent_id,
        }
    }

    pub fn cache_key(&self) -> ScopeKey {
        ScopeKey {
            corp_id: self.corp_id.clone(),
            agent_id: self.agent_id,
        }
    }
}

impl std::fmt::Debug for CredentialScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialScope")
            .field("corp_id", &self.corp_id)
            .field("corp_secret", &"<redacted>")
            .field("agent_id", &self.agent_id)
            .finish()
    }
}

/// Callback verification secrets (token + EncodingAESKey).
#[derive(Clone, Default)]
pub struct CallbackSecrets {
    pub token: Option<String>,
    pub encoding_aes_key: Option<String>,
}

/// Agent id as written in config: either `1000002` or `"1000002"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AgentIdValue {
    Number(i64),
    Text(String),
}

impl AgentIdValue {
    fn resolve(&self) -> Option<i64> {
        match self {
            AgentIdValue::Number(n) => Some(*n),
            AgentIdValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Platform credentials section (`[wecom]`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WecomConfig {
    #[serde(default)]
    pub corp_id: Option<String>,
    #[serde(default)]
    pub corp_secret: Option<String>,
    #[serde(default)]
    pub agent_id: Option<AgentIdValue>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub encoding_aes_key: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl WecomConfig {
    /// Resolve the credential scope.
    ///
    /// # Errors
    /// `GatewayError::Configuration` when corp id, secret, or a non-zero
    /// agent id is missing.
    pub fn resolve_scope(&self) -> Result<CredentialScope, GatewayError> {
        let corp_id = non_empty(&self.corp_id)
            .ok_or_else(|| GatewayError::Configuration("corp_id is not set".to_string()))?;
        let corp_secret = non_empty(&self.corp_secret)
            .ok_or_else(|| GatewayError::Configuration("corp_secret is not set".to_string()))?;
        let agent_id = self
            .agent_id
            .as_ref()
            .and_then(AgentIdValue::resolve)
            .filter(|id| *id != 0)
            .ok_or_else(|| {
                GatewayError::Configuration("agent_id is missing or invalid".to_string())
            })?;

        Ok(CredentialScope {
            corp_id,
            corp_secret,
            agent_id,
        })
    }

    /// Trimmed callback secrets; blank values count as unset.
    pub fn callback_secrets(&self) -> CallbackSecrets {
        CallbackSecrets {
            token: non_empty(&self.token),
            encoding_aes_key: non_empty(&self.encoding_aes_key),
        }
    }
}
