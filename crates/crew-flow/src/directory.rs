//! Contractor record access.
//!
//! Contractor records (profiles, skills, verification state) live in an
//! external store owned by the CRM side of the product. This module defines
//! the narrow read interface the dispatch subsystem consumes, plus an
//! in-memory implementation for tests and local development.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crew_core::ContractorId;

use crate::error::{Error, Result};

/// The slice of a contractor record the dispatch subsystem needs.
#[derive(Debug, Clone)]
pub struct ContractorProfile {
    /// The contractor's identifier.
    pub id: ContractorId,
    /// Display name.
    pub name: String,
    /// Declared skills, as entered (matching is fuzzy, not exact).
    pub skills: Vec<String>,
    /// Whether the contractor has completed verification.
    pub verified: bool,
}

/// Read access to contractor records.
#[async_trait]
pub trait ContractorDirectory: Send + Sync {
    /// Looks up a contractor's profile. Returns `None` when unknown.
    async fn profile(&self, id: &ContractorId) -> Result<Option<ContractorProfile>>;

    /// Returns a contractor's declared skills, empty when unknown.
    async fn skills(&self, id: &ContractorId) -> Result<Vec<String>> {
        Ok(self
            .profile(id)
            .await?
            .map(|p| p.skills)
            .unwrap_or_default())
    }
}

/// In-memory contractor directory for tests and development.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    profiles: RwLock<HashMap<ContractorId, ContractorProfile>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("contractor directory lock poisoned")
}

impl InMemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn upsert(&self, profile: ContractorProfile) -> Result<()> {
        let mut profiles = self.profiles.write().map_err(poison_err)?;
        profiles.insert(profile.id, profile);
        drop(profiles);
        Ok(())
    }
}

#[async_trait]
impl ContractorDirectory for InMemoryDirectory {
    async fn profile(&self, id: &ContractorId) -> Result<Option<ContractorProfile>> {
        let profiles = self.profiles.read().map_err(poison_err)?;
        Ok(profiles.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skills_default_to_empty_for_unknown_contractor() {
        let directory = InMemoryDirectory::new();
        let skills = directory.skills(&ContractorId::generate()).await.unwrap();
        assert!(skills.is_empty());
    }

    #[tokio::test]
    async fn upsert_then_lookup() {
        let directory = InMemoryDirectory::new();
        let id = ContractorId::generate();
        directory
            .upsert(ContractorProfile {
                id,
                name: "Maya".into(),
                skills: vec!["Delivery".into(), "Setup".into()],
                verified: true,
            })
            .unwrap();

        let profile = directory.profile(&id).await.unwrap().unwrap();
        assert_eq!(profile.skills.len(), 2);
        assert!(profile.verified);
    }
}
