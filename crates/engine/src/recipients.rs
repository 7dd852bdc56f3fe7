use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use cadence_core::{Recipient, RecipientConfig, RecipientSpec, ResolvedRecipients, resolve_path};
use cadence_provider::{Directory, DirectoryUser, HandlerError};

/// Hierarchy walks stop after this many levels.
pub const MAX_HIERARCHY_DEPTH: usize = 10;

/// Upper bound on users visited by a single downline traversal.
pub const MAX_TRAVERSAL: usize = 10_000;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid"));

fn is_email(candidate: &str) -> bool {
    EMAIL_RE.is_match(candidate)
}

/// Turns a [`RecipientConfig`] into concrete recipients using the run
/// context and the user directory.
///
/// Resolution never fails: directory errors and unknown strategies resolve
/// to nobody, which the run log reports as zero recipients.
#[derive(Clone)]
pub struct RecipientResolver {
    directory: Arc<dyn Directory>,
}

impl std::fmt::Debug for RecipientResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipientResolver").finish_non_exhaustive()
    }
}

impl RecipientResolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    /// Resolve `config` against `context`, then dedupe, drop inactive
    /// accounts and cap at `max_recipients`, preserving resolution order.
    #[instrument(skip(self, config, context), fields(recipients.kind = config.spec.type_name()))]
    pub async fn resolve(&self, config: &RecipientConfig, context: &Value) -> ResolvedRecipients {
        let candidates = match self.candidates(&config.spec, context).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "recipient lookup failed, resolving to nobody");
                Vec::new()
            }
        };
        let resolved = ResolvedRecipients::from_candidates(
            candidates,
            config.include_inactive,
            config.max_recipients,
        );
        debug!(count = resolved.count, truncated = resolved.truncated, "recipients resolved");
        resolved
    }

    async fn candidates(
        &self,
        spec: &RecipientSpec,
        context: &Value,
    ) -> Result<Vec<Recipient>, HandlerError> {
        let users = match spec {
            RecipientSpec::DirectUpline => match subject(context) {
                Some(id) => self.upline_chain(id, 1).await?,
                None => Vec::new(),
            },
            RecipientSpec::UplineChain => match subject(context) {
                Some(id) => self.upline_chain(id, MAX_HIERARCHY_DEPTH).await?,
                None => Vec::new(),
            },
            RecipientSpec::DirectDownline => match subject(context) {
                Some(id) => self.directory.direct_reports(id).await?,
                None => Vec::new(),
            },
            RecipientSpec::EntireDownline => match subject(context) {
                Some(id) => self.entire_downline(id).await?,
                None => Vec::new(),
            },
            RecipientSpec::Role { roles } => {
                if roles.is_empty() {
                    Vec::new()
                } else {
                    self.directory.users_with_roles(roles).await?
                }
            }
            RecipientSpec::AllAgents => self.directory.licensed_agents().await?,
            RecipientSpec::AllManagers => self.directory.managers().await?,
            RecipientSpec::AllTrainers => {
                self.directory
                    .users_with_roles(&["trainer".to_owned()])
                    .await?
            }
            RecipientSpec::Admins => self.directory.admins().await?,
            RecipientSpec::PolicyAgent => self.policy_agent(context).await?,
            RecipientSpec::PolicyClient => return self.policy_client(context).await,
            RecipientSpec::CommissionRecipient => match context_str(context, "commissionId") {
                Some(commission_id) => match self.directory.commission(commission_id).await? {
                    Some(commission) => self.agent_of_policy(&commission.policy_id).await?,
                    None => Vec::new(),
                },
                None => self.policy_agent(context).await?,
            },
            RecipientSpec::EventUser => {
                let id = context_str(context, "eventUserId")
                    .or_else(|| context_str(context, "recipientId"));
                self.users_by_id(id).await?
            }
            RecipientSpec::TriggerUser => return self.trigger_user(context).await,
            RecipientSpec::PipelinePhase {
                phase_ids,
                phase_statuses,
            } => {
                if phase_ids.is_empty() {
                    Vec::new()
                } else {
                    self.directory
                        .recruits_in_phases(phase_ids, phase_statuses)
                        .await?
                }
            }
            RecipientSpec::PipelineRecruiter => {
                let recruiter = match recruit(context) {
                    Some(id) => self
                        .directory
                        .user(id)
                        .await?
                        .and_then(|u| u.recruiter_id),
                    None => None,
                };
                self.users_by_id(recruiter.as_deref()).await?
            }
            RecipientSpec::PipelineUpline => match recruit(context) {
                Some(id) => self.upline_chain(id, 1).await?,
                None => Vec::new(),
            },
            RecipientSpec::SpecificEmail { email } => {
                return Ok(static_emails(std::iter::once(email.as_str())));
            }
            RecipientSpec::EmailList { emails } => {
                return Ok(static_emails(emails.iter().map(String::as_str)));
            }
            RecipientSpec::DynamicField { field_path } => {
                return Ok(match resolve_path(context, field_path) {
                    Some(Value::String(email)) => static_emails(std::iter::once(email.as_str())),
                    Some(Value::Array(items)) => static_emails(items.iter().filter_map(Value::as_str)),
                    _ => Vec::new(),
                });
            }
            RecipientSpec::Unknown => {
                debug!("unknown recipient type resolves to nobody");
                Vec::new()
            }
        };
        Ok(users.iter().map(DirectoryUser::to_recipient).collect())
    }

    /// Uplines of `user_id`, nearest first, up to `depth` levels.
    async fn upline_chain(
        &self,
        user_id: &str,
        depth: usize,
    ) -> Result<Vec<DirectoryUser>, HandlerError> {
        let mut chain = Vec::new();
        let mut visited = HashSet::from([user_id.to_owned()]);
        let mut next = self.directory.user(user_id).await?.and_then(|u| u.upline_id);
        while let Some(upline_id) = next.take() {
            if chain.len() >= depth.min(MAX_HIERARCHY_DEPTH) || !visited.insert(upline_id.clone()) {
                break;
            }
            let Some(upline) = self.directory.user(&upline_id).await? else {
                break;
            };
            next.clone_from(&upline.upline_id);
            chain.push(upline);
        }
        Ok(chain)
    }

    /// Breadth-first walk of everyone below `user_id`.
    async fn entire_downline(&self, user_id: &str) -> Result<Vec<DirectoryUser>, HandlerError> {
        let mut found = Vec::new();
        let mut visited = HashSet::from([user_id.to_owned()]);
        let mut queue = VecDeque::from([(user_id.to_owned(), 0usize)]);
        while let Some((id, depth)) = queue.pop_front() {
            if depth >= MAX_HIERARCHY_DEPTH {
                continue;
            }
            for report in self.directory.direct_reports(&id).await? {
                if found.len() >= MAX_TRAVERSAL {
                    return Ok(found);
                }
                if visited.insert(report.id.clone()) {
                    queue.push_back((report.id.clone(), depth + 1));
                    found.push(report);
                }
            }
        }
        Ok(found)
    }

    async fn agent_of_policy(&self, policy_id: &str) -> Result<Vec<DirectoryUser>, HandlerError> {
        let agent = self.directory.policy(policy_id).await?.map(|p| p.agent_id);
        self.users_by_id(agent.as_deref()).await
    }

    async fn policy_agent(&self, context: &Value) -> Result<Vec<DirectoryUser>, HandlerError> {
        match context_str(context, "policyId") {
            Some(policy_id) => self.agent_of_policy(policy_id).await,
            None => Ok(Vec::new()),
        }
    }

    async fn policy_client(&self, context: &Value) -> Result<Vec<Recipient>, HandlerError> {
        let Some(policy_id) = context_str(context, "policyId") else {
            return Ok(Vec::new());
        };
        let email = self
            .directory
            .policy(policy_id)
            .await?
            .and_then(|p| p.client_email);
        Ok(match email {
            Some(email) if is_email(&email) => vec![Recipient::contact(email)],
            _ => Vec::new(),
        })
    }

    async fn trigger_user(&self, context: &Value) -> Result<Vec<Recipient>, HandlerError> {
        let id = context_str(context, "recipientId").or_else(|| triggered_by(context));
        let email = context_str(context, "recipientEmail")
            .or_else(|| context_str(context, "triggeredByEmail"))
            .filter(|e| is_email(e));
        match (id, email) {
            (Some(id), Some(email)) => Ok(vec![Recipient::user(id, email)]),
            (Some(id), None) => Ok(self
                .users_by_id(Some(id))
                .await?
                .iter()
                .map(DirectoryUser::to_recipient)
                .collect()),
            (None, Some(email)) => Ok(vec![Recipient::contact(email)]),
            (None, None) => Ok(Vec::new()),
        }
    }

    async fn users_by_id(&self, id: Option<&str>) -> Result<Vec<DirectoryUser>, HandlerError> {
        match id {
            Some(id) => Ok(self.directory.user(id).await?.into_iter().collect()),
            None => Ok(Vec::new()),
        }
    }
}

fn context_str<'a>(context: &'a Value, key: &str) -> Option<&'a str> {
    resolve_path(context, key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn triggered_by(context: &Value) -> Option<&str> {
    context_str(context, "triggeredBy").filter(|id| *id != "system")
}

/// The user a hierarchy-relative strategy is anchored on.
fn subject(context: &Value) -> Option<&str> {
    context_str(context, "recipientId").or_else(|| triggered_by(context))
}

fn recruit(context: &Value) -> Option<&str> {
    context_str(context, "recruitId").or_else(|| context_str(context, "recipientId"))
}

fn static_emails<'a>(emails: impl Iterator<Item = &'a str>) -> Vec<Recipient> {
    emails
        .map(str::trim)
        .filter(|e| {
            let valid = is_email(e);
            if !valid {
                debug!(email = e, "ignoring malformed email address");
            }
            valid
        })
        .map(Recipient::contact)
        .collect()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use cadence_provider::{
        CommissionRecord, InMemoryDirectory, LicenseExpiration, PhaseProgress, PolicyRecord,
    };

    use super::*;

    fn directory() -> InMemoryDirectory {
        InMemoryDirectory::new()
            .with_user(DirectoryUser::new("owner", "owner@agency.test").admin())
            .with_user(DirectoryUser::new("mgr", "mgr@agency.test").reporting_to("owner"))
            .with_user(
                DirectoryUser::new("a1", "a1@agency.test")
                    .reporting_to("mgr")
                    .licensed(),
            )
            .with_user(
                DirectoryUser::new("a2", "a2@agency.test")
                    .reporting_to("mgr")
                    .licensed()
                    .deactivated(),
            )
            .with_user(
                DirectoryUser::new("r1", "r1@agency.test")
                    .reporting_to("a1")
                    .recruited_by("a1")
                    .with_roles(&["trainer"]),
            )
            .with_policy(PolicyRecord {
                id: "pol-1".into(),
                agent_id: "a1".into(),
                client_email: Some("client@example.com".into()),
            })
            .with_commission(CommissionRecord {
                id: "com-1".into(),
                policy_id: "pol-1".into(),
            })
            .with_phase_progress(PhaseProgress {
                user_id: "r1".into(),
                phase_id: "licensing".into(),
                status: "in_progress".into(),
            })
    }

    fn resolver() -> RecipientResolver {
        RecipientResolver::new(Arc::new(directory()))
    }

    async fn resolve(spec: RecipientSpec, context: Value) -> ResolvedRecipients {
        resolver().resolve(&RecipientConfig::new(spec), &context).await
    }

    #[tokio::test]
    async fn hierarchy_strategies() {
        let ctx = json!({"recipientId": "a1"});
        assert_eq!(
            resolve(RecipientSpec::DirectUpline, ctx.clone()).await.user_ids,
            vec!["mgr"]
        );
        assert_eq!(
            resolve(RecipientSpec::UplineChain, ctx).await.user_ids,
            vec!["mgr", "owner"]
        );
        let down = resolve(RecipientSpec::EntireDownline, json!({"triggeredBy": "owner"})).await;
        assert_eq!(down.user_ids, vec!["mgr", "a1", "r1"], "inactive a2 is dropped");
        assert!(
            resolve(RecipientSpec::DirectDownline, json!({"triggeredBy": "system"}))
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn include_inactive_keeps_deactivated_accounts() {
        let config = RecipientConfig::new(RecipientSpec::DirectDownline).including_inactive();
        let resolved = resolver()
            .resolve(&config, &json!({"recipientId": "mgr"}))
            .await;
        assert_eq!(resolved.user_ids, vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn role_classes() {
        assert_eq!(
            resolve(RecipientSpec::AllAgents, json!({})).await.user_ids,
            vec!["a1"]
        );
        assert_eq!(
            resolve(RecipientSpec::AllTrainers, json!({})).await.user_ids,
            vec!["r1"]
        );
        assert_eq!(
            resolve(RecipientSpec::Admins, json!({})).await.user_ids,
            vec!["owner"]
        );
        assert_eq!(
            resolve(RecipientSpec::AllManagers, json!({})).await.user_ids,
            vec!["owner", "mgr", "a1"]
        );
    }

    #[tokio::test]
    async fn event_context_strategies() {
        let ctx = json!({"policyId": "pol-1"});
        assert_eq!(
            resolve(RecipientSpec::PolicyAgent, ctx.clone()).await.emails,
            vec!["a1@agency.test"]
        );
        let client = resolve(RecipientSpec::PolicyClient, ctx.clone()).await;
        assert_eq!(client.emails, vec!["client@example.com"]);
        assert!(client.user_ids.is_empty());

        assert_eq!(
            resolve(RecipientSpec::CommissionRecipient, json!({"commissionId": "com-1"}))
                .await
                .user_ids,
            vec!["a1"]
        );
        assert_eq!(
            resolve(RecipientSpec::CommissionRecipient, ctx).await.user_ids,
            vec!["a1"],
            "falls back to the policy agent"
        );
        assert_eq!(
            resolve(RecipientSpec::TriggerUser, json!({"triggeredBy": "mgr"}))
                .await
                .emails,
            vec!["mgr@agency.test"]
        );
        assert_eq!(
            resolve(
                RecipientSpec::TriggerUser,
                json!({"triggeredBy": "system", "triggeredByEmail": "ops@agency.test"})
            )
            .await
            .emails,
            vec!["ops@agency.test"]
        );
    }

    #[tokio::test]
    async fn pipeline_strategies() {
        let phase = RecipientSpec::PipelinePhase {
            phase_ids: vec!["licensing".into()],
            phase_statuses: vec![],
        };
        assert_eq!(resolve(phase, json!({})).await.user_ids, vec!["r1"]);
        let ctx = json!({"recruitId": "r1"});
        assert_eq!(
            resolve(RecipientSpec::PipelineRecruiter, ctx.clone()).await.user_ids,
            vec!["a1"]
        );
        assert_eq!(
            resolve(RecipientSpec::PipelineUpline, ctx).await.user_ids,
            vec!["a1"]
        );
    }

    #[tokio::test]
    async fn static_and_dynamic_validate_emails() {
        let list = RecipientSpec::EmailList {
            emails: vec![
                "A@Example.com".into(),
                "a@example.com".into(),
                "not-an-email".into(),
                "b@example.com".into(),
            ],
        };
        let resolved = resolve(list, json!({})).await;
        assert_eq!(resolved.emails, vec!["A@Example.com", "b@example.com"]);

        let dynamic = RecipientSpec::DynamicField {
            field_path: "lead.contacts".into(),
        };
        let ctx = json!({"lead": {"contacts": ["x@example.com", 7, "bad"]}});
        assert_eq!(resolve(dynamic, ctx).await.emails, vec!["x@example.com"]);
        assert!(
            resolve(
                RecipientSpec::SpecificEmail {
                    email: "nobody".into()
                },
                json!({})
            )
            .await
            .is_empty()
        );
    }

    #[tokio::test]
    async fn truncation_is_deterministic() {
        let emails: Vec<String> = (0..5).map(|i| format!("u{i}@example.com")).collect();
        let config = RecipientConfig::new(RecipientSpec::EmailList { emails }).with_max_recipients(3);
        let first = resolver().resolve(&config, &json!({})).await;
        let second = resolver().resolve(&config, &json!({})).await;
        assert_eq!(first.count, 3);
        assert!(first.truncated);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_spec_and_missing_context_resolve_to_nobody() {
        assert!(resolve(RecipientSpec::Unknown, json!({})).await.is_empty());
        assert!(resolve(RecipientSpec::PolicyAgent, json!({})).await.is_empty());
        assert!(
            resolve(RecipientSpec::PolicyAgent, json!({"policyId": "missing"}))
                .await
                .is_empty()
        );
    }

    struct BrokenDirectory;

    #[async_trait]
    impl Directory for BrokenDirectory {
        async fn user(&self, _: &str) -> Result<Option<DirectoryUser>, HandlerError> {
            Err(HandlerError::Connection("directory offline".into()))
        }
        async fn direct_reports(&self, _: &str) -> Result<Vec<DirectoryUser>, HandlerError> {
            Err(HandlerError::Connection("directory offline".into()))
        }
        async fn users_with_roles(&self, _: &[String]) -> Result<Vec<DirectoryUser>, HandlerError> {
            Err(HandlerError::Connection("directory offline".into()))
        }
        async fn licensed_agents(&self) -> Result<Vec<DirectoryUser>, HandlerError> {
            Err(HandlerError::Connection("directory offline".into()))
        }
        async fn managers(&self) -> Result<Vec<DirectoryUser>, HandlerError> {
            Err(HandlerError::Connection("directory offline".into()))
        }
        async fn admins(&self) -> Result<Vec<DirectoryUser>, HandlerError> {
            Err(HandlerError::Connection("directory offline".into()))
        }
        async fn policy(&self, _: &str) -> Result<Option<PolicyRecord>, HandlerError> {
            Err(HandlerError::Connection("directory offline".into()))
        }
        async fn commission(&self, _: &str) -> Result<Option<CommissionRecord>, HandlerError> {
            Err(HandlerError::Connection("directory offline".into()))
        }
        async fn recruits_in_phases(
            &self,
            _: &[String],
            _: &[String],
        ) -> Result<Vec<DirectoryUser>, HandlerError> {
            Err(HandlerError::Connection("directory offline".into()))
        }
        async fn license_expirations(
            &self,
            _: chrono::NaiveDate,
            _: u32,
        ) -> Result<Vec<LicenseExpiration>, HandlerError> {
            Err(HandlerError::Connection("directory offline".into()))
        }
    }

    #[tokio::test]
    async fn directory_errors_resolve_to_nobody() {
        let resolver = RecipientResolver::new(Arc::new(BrokenDirectory));
        let resolved = resolver
            .resolve(
                &RecipientConfig::new(RecipientSpec::AllAgents),
                &json!({}),
            )
            .await;
        assert!(resolved.is_empty());
    }
}
