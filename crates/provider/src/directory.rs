use std::collections::HashMap;

use async_trait::async_trait;
use cadence_core::Recipient;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::HandlerError;

/// A user profile as the directory knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub upline_id: Option<String>,
    #[serde(default)]
    pub recruiter_id: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub licensed: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Date the user's producer license lapses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_expiration: Option<NaiveDate>,
}

fn default_true() -> bool {
    true
}

impl DirectoryUser {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            roles: Vec::new(),
            upline_id: None,
            recruiter_id: None,
            is_admin: false,
            licensed: false,
            active: true,
            license_expiration: None,
        }
    }

    #[must_use]
    pub fn reporting_to(mut self, upline_id: impl Into<String>) -> Self {
        self.upline_id = Some(upline_id.into());
        self
    }

    #[must_use]
    pub fn recruited_by(mut self, recruiter_id: impl Into<String>) -> Self {
        self.recruiter_id = Some(recruiter_id.into());
        self
    }

    #[must_use]
    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| (*r).to_owned()).collect();
        self
    }

    #[must_use]
    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    #[must_use]
    pub fn licensed(mut self) -> Self {
        self.licensed = true;
        self
    }

    #[must_use]
    pub fn license_expires(mut self, on: NaiveDate) -> Self {
        self.licensed = true;
        self.license_expiration = Some(on);
        self
    }

    #[must_use]
    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn to_recipient(&self) -> Recipient {
        Recipient {
            user_id: Some(self.id.clone()),
            email: self.email.clone(),
            active: self.active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRecord {
    pub id: String,
    /// The writing agent.
    pub agent_id: String,
    #[serde(default)]
    pub client_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionRecord {
    pub id: String,
    pub policy_id: String,
}

/// An active user whose license lapses soon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseExpiration {
    pub user: DirectoryUser,
    pub expires_on: NaiveDate,
    /// Whole days from the checked date to `expires_on`.
    pub days_until_expiration: i64,
}

/// A recruit's position in one onboarding pipeline phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseProgress {
    pub user_id: String,
    pub phase_id: String,
    pub status: String,
}

/// Read-only access to the organisation: users, hierarchy, policies and the
/// recruiting pipeline. Results keep the backend's order so resolution is
/// deterministic.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn user(&self, user_id: &str) -> Result<Option<DirectoryUser>, HandlerError>;

    /// Users whose upline is `user_id`.
    async fn direct_reports(&self, user_id: &str) -> Result<Vec<DirectoryUser>, HandlerError>;

    /// Users holding at least one of `roles`.
    async fn users_with_roles(&self, roles: &[String]) -> Result<Vec<DirectoryUser>, HandlerError>;

    async fn licensed_agents(&self) -> Result<Vec<DirectoryUser>, HandlerError>;

    /// Users that are the upline of at least one other user.
    async fn managers(&self) -> Result<Vec<DirectoryUser>, HandlerError>;

    async fn admins(&self) -> Result<Vec<DirectoryUser>, HandlerError>;

    async fn policy(&self, policy_id: &str) -> Result<Option<PolicyRecord>, HandlerError>;

    async fn commission(&self, commission_id: &str)
    -> Result<Option<CommissionRecord>, HandlerError>;

    /// Recruits in any of `phase_ids`, optionally filtered by phase status.
    async fn recruits_in_phases(
        &self,
        phase_ids: &[String],
        statuses: &[String],
    ) -> Result<Vec<DirectoryUser>, HandlerError>;

    /// Active users whose license expires between `as_of` and `within_days`
    /// after it, soonest first.
    async fn license_expirations(
        &self,
        as_of: NaiveDate,
        within_days: u32,
    ) -> Result<Vec<LicenseExpiration>, HandlerError>;
}

/// Serialisable contents of an [`InMemoryDirectory`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySeed {
    #[serde(default)]
    pub users: Vec<DirectoryUser>,
    #[serde(default)]
    pub policies: Vec<PolicyRecord>,
    #[serde(default)]
    pub commissions: Vec<CommissionRecord>,
    #[serde(default)]
    pub phase_progress: Vec<PhaseProgress>,
}

/// A [`Directory`] over a fixed seed, for tests and single-node setups.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    users: Vec<DirectoryUser>,
    user_index: HashMap<String, usize>,
    policies: HashMap<String, PolicyRecord>,
    commissions: HashMap<String, CommissionRecord>,
    phase_progress: Vec<PhaseProgress>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: DirectorySeed) -> Self {
        let mut directory = Self::new();
        for user in seed.users {
            directory.insert_user(user);
        }
        for policy in seed.policies {
            directory.policies.insert(policy.id.clone(), policy);
        }
        for commission in seed.commissions {
            directory.commissions.insert(commission.id.clone(), commission);
        }
        directory.phase_progress = seed.phase_progress;
        directory
    }

    /// Parse a JSON seed document.
    pub fn from_json(raw: &str) -> Result<Self, HandlerError> {
        let seed: DirectorySeed = serde_json::from_str(raw)?;
        Ok(Self::from_seed(seed))
    }

    /// Insert or replace a user, keeping first-insertion order.
    pub fn insert_user(&mut self, user: DirectoryUser) {
        if let Some(&idx) = self.user_index.get(&user.id) {
            self.users[idx] = user;
        } else {
            self.user_index.insert(user.id.clone(), self.users.len());
            self.users.push(user);
        }
    }

    #[must_use]
    pub fn with_user(mut self, user: DirectoryUser) -> Self {
        self.insert_user(user);
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: PolicyRecord) -> Self {
        self.policies.insert(policy.id.clone(), policy);
        self
    }

    #[must_use]
    pub fn with_commission(mut self, commission: CommissionRecord) -> Self {
        self.commissions.insert(commission.id.clone(), commission);
        self
    }

    #[must_use]
    pub fn with_phase_progress(mut self, progress: PhaseProgress) -> Self {
        self.phase_progress.push(progress);
        self
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn filter_users(&self, keep: impl Fn(&DirectoryUser) -> bool) -> Vec<DirectoryUser> {
        self.users.iter().filter(|u| keep(u)).cloned().collect()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn user(&self, user_id: &str) -> Result<Option<DirectoryUser>, HandlerError> {
        Ok(self
            .user_index
            .get(user_id)
            .map(|&idx| self.users[idx].clone()))
    }

    async fn direct_reports(&self, user_id: &str) -> Result<Vec<DirectoryUser>, HandlerError> {
        Ok(self.filter_users(|u| u.upline_id.as_deref() == Some(user_id)))
    }

    async fn users_with_roles(&self, roles: &[String]) -> Result<Vec<DirectoryUser>, HandlerError> {
        Ok(self.filter_users(|u| u.roles.iter().any(|r| roles.contains(r))))
    }

    async fn licensed_agents(&self) -> Result<Vec<DirectoryUser>, HandlerError> {
        Ok(self.filter_users(|u| u.licensed))
    }

    async fn managers(&self) -> Result<Vec<DirectoryUser>, HandlerError> {
        Ok(self.filter_users(|candidate| {
            self.users
                .iter()
                .any(|u| u.upline_id.as_deref() == Some(candidate.id.as_str()))
        }))
    }

    async fn admins(&self) -> Result<Vec<DirectoryUser>, HandlerError> {
        Ok(self.filter_users(|u| u.is_admin))
    }

    async fn policy(&self, policy_id: &str) -> Result<Option<PolicyRecord>, HandlerError> {
        Ok(self.policies.get(policy_id).cloned())
    }

    async fn commission(
        &self,
        commission_id: &str,
    ) -> Result<Option<CommissionRecord>, HandlerError> {
        Ok(self.commissions.get(commission_id).cloned())
    }

    async fn recruits_in_phases(
        &self,
        phase_ids: &[String],
        statuses: &[String],
    ) -> Result<Vec<DirectoryUser>, HandlerError> {
        let mut found = Vec::new();
        for progress in &self.phase_progress {
            if !phase_ids.contains(&progress.phase_id) {
                continue;
            }
            if !statuses.is_empty() && !statuses.contains(&progress.status) {
                continue;
            }
            if let Some(&idx) = self.user_index.get(&progress.user_id) {
                found.push(self.users[idx].clone());
            }
        }
        Ok(found)
    }

    async fn license_expirations(
        &self,
        as_of: NaiveDate,
        within_days: u32,
    ) -> Result<Vec<LicenseExpiration>, HandlerError> {
        let mut expiring: Vec<LicenseExpiration> = self
            .users
            .iter()
            .filter(|u| u.active)
            .filter_map(|u| {
                let expires_on = u.license_expiration?;
                let days = (expires_on - as_of).num_days();
                (0..=i64::from(within_days)).contains(&days).then(|| LicenseExpiration {
                    user: u.clone(),
                    expires_on,
                    days_until_expiration: days,
                })
            })
            .collect();
        expiring.sort_by_key(|e| e.expires_on);
        Ok(expiring)
    }
}
