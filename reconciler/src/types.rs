use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type TenantId = i64;

/// Tenant attribute key holding the external alerting API key. Its presence
/// makes a valid tenant eligible.
pub const NR_API_KEY: &str = "nr_api_key";
pub const NR_ACCOUNT_ID: &str = "nr_account_id";
/// User attribute key holding the upstream API token.
pub const API_TOKEN: &str = "api_token";

/// Each tenant has one synthetic owner mailbox, `ksynth-owners+<tenant>@kentik.com`.
pub const OWNER_EMAIL_PREFIX: &str = "ksynth-owners+";
pub const OWNER_EMAIL_DOMAIN: &str = "@kentik.com";

/// Same match as `LIKE 'ksynth-owners+%@kentik.com'`.
pub fn is_owner_email(email: &str) -> bool {
    email.len() >= OWNER_EMAIL_PREFIX.len() + OWNER_EMAIL_DOMAIN.len()
        && email.starts_with(OWNER_EMAIL_PREFIX)
        && email.ends_with(OWNER_EMAIL_DOMAIN)
}

/// Key-value attribute bag stored alongside tenant and user rows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Attributes(BTreeMap<String, String>);

impl Attributes {
    pub fn new() -> Self {
        Attributes(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.0.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TenantStatus {
    Valid,
    Other(String),
}

impl TenantStatus {
    pub const VALID_CODE: &'static str = "V";

    pub fn from_code(code: &str) -> Self {
        match code {
            Self::VALID_CODE => TenantStatus::Valid,
            other => TenantStatus::Other(other.to_string()),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, TenantStatus::Valid)
    }
}

/// Credential used against the upstream API on behalf of a tenant's owner mailbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub api_email: String,
    pub api_token: String,
}

impl CredentialRecord {
    pub fn new<E, T>(api_email: E, api_token: T) -> Self
    where
        E: Into<String>,
        T: Into<String>,
    {
        CredentialRecord {
            api_email: api_email.into(),
            api_token: api_token.into(),
        }
    }
}

/// Credential the alert forwarder uses to push into the external alerting system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingCredential {
    pub api_token: String,
    pub account_id: String,
}

impl ForwardingCredential {
    pub fn new<T, A>(api_token: T, account_id: A) -> Self
    where
        T: Into<String>,
        A: Into<String>,
    {
        ForwardingCredential {
            api_token: api_token.into(),
            account_id: account_id.into(),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("tenant {tenant_id}: column `{column}` is null")]
pub struct DecodeError {
    pub tenant_id: TenantId,
    pub column: &'static str,
}

/// One row of the credential query, exactly as the store returned it.
/// Attribute lookups that missed come back as `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialRow {
    pub tenant_id: TenantId,
    pub nr_api_key: Option<String>,
    pub nr_account_id: Option<String>,
    pub email: Option<String>,
    pub api_token: Option<String>,
}

impl CredentialRow {
    pub fn into_credentials(
        self,
    ) -> Result<(TenantId, CredentialRecord, ForwardingCredential), DecodeError> {
        let tenant_id = self.tenant_id;
        let require = |value: Option<String>, column| {
            value.ok_or(DecodeError { tenant_id, column })
        };

        let nr_api_key = require(self.nr_api_key, "api_key")?;
        let nr_account_id = require(self.nr_account_id, "account_id")?;
        let email = require(self.email, "user_email")?;
        let api_token = require(self.api_token, "kentik_api")?;

        Ok((
            tenant_id,
            CredentialRecord::new(email, api_token),
            ForwardingCredential::new(nr_api_key, nr_account_id),
        ))
    }
}

/// Credentials rebuilt from scratch on every run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CredentialSnapshot {
    /// Ordered as scanned, which is tenant id ascending.
    pub kentik_creds: Vec<CredentialRecord>,
    pub cred_map: BTreeMap<TenantId, ForwardingCredential>,
}

impl CredentialSnapshot {
    /// Folds rows in scan order. A later row for the same tenant replaces the
    /// earlier one in `cred_map`; both stay in `kentik_creds`.
    /// Stops at the first row that fails to decode.
    pub fn from_rows<I>(rows: I) -> Result<Self, DecodeError>
    where
        I: IntoIterator<Item = CredentialRow>,
    {
        let mut snapshot = CredentialSnapshot::default();
        for row in rows {
            let (tenant_id, kentik, forwarding) = row.into_credentials()?;
            snapshot.kentik_creds.push(kentik);
            snapshot.cred_map.insert(tenant_id, forwarding);
        }
        Ok(snapshot)
    }
}
