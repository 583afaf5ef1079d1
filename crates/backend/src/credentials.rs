//! Leasable execution credentials.
//!
//! The credential pool is an external collaborator: the task manager
//! only leases a credential before a backend call and reports
//! consumption after a successful one. Lease discipline (staleness
//! refresh, at-most-one-in-use) is the pool's own concern.

use std::collections::HashMap;
use std::sync::Mutex;

/// An opaque, leasable execution right.
///
/// Debug output is redacted; the secret only leaves through
/// [`secret`](Credential::secret).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "Credential({prefix}…)")
    }
}

/// Accounting weight of one consumed generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostClass {
    Low,
    High,
}

impl CostClass {
    /// Usage units charged per consumption.
    pub fn weight(&self) -> u64 {
        match self {
            CostClass::Low => 1,
            CostClass::High => 4,
        }
    }
}

/// Error reporting consumption to the pool's backing accounting.
#[derive(Debug, thiserror::Error)]
#[error("Failed to record credential usage: {0}")]
pub struct CredentialError(pub String);

/// Supplier of execution credentials, keyed by job type.
#[async_trait::async_trait]
pub trait CredentialPool: Send + Sync {
    /// Lease a credential usable for `job_type`, or `None` when the
    /// pools are exhausted.
    async fn lease(&self, job_type: &str) -> Option<Credential>;

    /// Report one consumed generation against a leased credential.
    /// Accounting only; callers log a failure and move on — it never
    /// affects a task's terminal status.
    async fn consume(&self, credential: &Credential, cost: CostClass)
        -> Result<(), CredentialError>;
}

/// In-process pool over statically configured credentials.
///
/// Credentials are grouped into named pools. A lease for `job_type`
/// probes the candidate pools in priority order — the pool named after
/// the job type first, then `default` — and picks the least-consumed
/// credential of the first non-empty pool.
pub struct StaticCredentialPool {
    pools: HashMap<String, Vec<Credential>>,
    usage: Mutex<HashMap<Credential, u64>>,
}

impl StaticCredentialPool {
    pub fn new(pools: HashMap<String, Vec<Credential>>) -> Self {
        Self {
            pools,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Total usage units recorded against `credential`.
    pub fn usage_of(&self, credential: &Credential) -> u64 {
        self.usage
            .lock()
            .expect("usage map poisoned")
            .get(credential)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl CredentialPool for StaticCredentialPool {
    async fn lease(&self, job_type: &str) -> Option<Credential> {
        let usage = self.usage.lock().expect("usage map poisoned");
        for name in [job_type, "default"] {
            let Some(pool) = self.pools.get(name).filter(|p| !p.is_empty()) else {
                continue;
            };
            let credential = pool
                .iter()
                .min_by_key(|c| usage.get(*c).copied().unwrap_or(0))
                .cloned();
            if credential.is_some() {
                tracing::debug!(job_type, pool = name, "Leased credential");
                return credential;
            }
        }
        tracing::warn!(job_type, "No credential available");
        None
    }

    async fn consume(
        &self,
        credential: &Credential,
        cost: CostClass,
    ) -> Result<(), CredentialError> {
        let mut usage = self.usage.lock().expect("usage map poisoned");
        *usage.entry(credential.clone()).or_insert(0) += cost.weight();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
