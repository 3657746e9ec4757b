//! Campaign enrolment worker.
//!
//! For each (contact, campaign) pair: find-or-create the enrolment under
//! the unique index, pass the rendered first stage through the quality
//! gate, then send through the idempotent provider surface. The unique
//! index plus the idempotency record make retries safe even when an
//! acknowledgement is lost.

use crate::error::{CoreError, CoreResult};
use crate::jobs::{JobRecord, JobType, PipelineWorker, WorkerContext, WorkerOutcome};
use crate::model::{
    CampaignTemplate, Channel, Contact, EnrolmentState, MessageStage, OutreachOutcome,
};
use crate::providers::{
    derive_send_key, EmailMessage, EmailProvider, IdempotentEmail, IdempotentLinkedIn,
    LinkedInProvider, LinkedInRequest,
};
use crate::quality::{DraftMessage, OutreachDraft, QualityGate, Recommendation, TimingContext};
use crate::store::{CampaignStore, ContactStore, EnrolmentStore, IdempotencyStore, OutcomeStore};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Enrolment job parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolParams {
    /// Campaign instance to enrol into.
    pub campaign_id: Uuid,

    /// Contacts to enrol.
    pub contact_ids: Vec<Uuid>,
}

/// Aggregate enrolment statistics, returned as the job result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnrolStats {
    /// Pairs requested.
    pub requested: usize,
    /// Messages actually handed to a provider.
    pub sent: usize,
    /// Pairs that already had an enrolment row (unique-index hit).
    pub already_enrolled: usize,
    /// Sends blocked by the quality gate.
    pub blocked: usize,
    /// Sends that passed with a warning.
    pub warned: usize,
    /// Contacts missing locally.
    pub missing: usize,
    /// Sends that failed at the provider.
    pub failed: usize,
}

/// Render a message stage for a contact.
///
/// Known tokens are substituted with sensible fallbacks; unknown tokens are
/// left in place, which the quality gate treats as a hard block.
fn render_stage(stage: &MessageStage, contact: &Contact) -> DraftMessage {
    let first_name = contact
        .name
        .as_deref()
        .and_then(|n| n.split_whitespace().next())
        .unwrap_or("there")
        .to_string();
    let company = contact.company.as_deref().unwrap_or("your team").to_string();
    let title = contact.title.as_deref().unwrap_or("your role").to_string();

    let substitute = |text: &str| {
        text.replace("{{first_name}}", &first_name)
            .replace("{{name}}", contact.name.as_deref().unwrap_or(&first_name))
            .replace("{{company}}", &company)
            .replace("{{title}}", &title)
    };

    DraftMessage {
        subject: stage.subject.as_deref().map(substitute),
        body: substitute(&stage.body),
    }
}

/// Enrols contacts into campaigns and performs the first send.
pub struct EnrolWorker {
    contacts: Arc<dyn ContactStore>,
    campaigns: Arc<dyn CampaignStore>,
    enrolments: Arc<dyn EnrolmentStore>,
    outcomes: Arc<dyn OutcomeStore>,
    idempotency: Arc<dyn IdempotencyStore>,
    email: Arc<dyn EmailProvider>,
    linkedin: Option<Arc<dyn LinkedInProvider>>,
    gate: QualityGate,
}

impl EnrolWorker {
    /// Build the worker. `email` must already carry the idempotency and
    /// fallback decorators.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        contacts: Arc<dyn ContactStore>,
        campaigns: Arc<dyn CampaignStore>,
        enrolments: Arc<dyn EnrolmentStore>,
        outcomes: Arc<dyn OutcomeStore>,
        idempotency: Arc<dyn IdempotencyStore>,
        email: Arc<dyn EmailProvider>,
        linkedin: Option<Arc<dyn LinkedInProvider>>,
        gate: QualityGate,
    ) -> Self {
        Self {
            contacts,
            campaigns,
            enrolments,
            outcomes,
            idempotency,
            email,
            linkedin,
            gate,
        }
    }

    async fn enrol_one(
        &self,
        campaign_id: Uuid,
        template: &CampaignTemplate,
        contact_id: Uuid,
        stats: &mut EnrolStats,
    ) -> CoreResult<()> {
        stats.requested += 1;
        let Some(contact) = self.contacts.get(contact_id).await? else {
            warn!(contact_id = %contact_id, "enrolment skipped, contact not found");
            stats.missing += 1;
            return Ok(());
        };

        let found = self.enrolments.find_or_create(campaign_id, &contact).await?;
        if !found.created {
            metrics::counter!("enrolments_conflicts").increment(1);
        }
        let enrolment = found.enrolment;

        let stage_index = usize::try_from(enrolment.current_stage).unwrap_or(usize::MAX);
        let Some(stage) = template.stages.get(stage_index) else {
            // Sequence already finished for this enrolment.
            return Ok(());
        };

        // A recorded (or in-flight) send for this key means an earlier call
        // already owns this stage; the pair counts as enrolled without any
        // further provider work.
        let channel = stage.channel.unwrap_or(template.channel);
        let operation = match channel {
            Channel::Email | Channel::Multi => IdempotentEmail::OPERATION,
            Channel::Linkedin => IdempotentLinkedIn::OPERATION,
        };
        let key = derive_send_key(campaign_id, enrolment.id, enrolment.current_stage);
        if self.idempotency.get(operation, &key).await?.is_some() {
            stats.already_enrolled += 1;
            return Ok(());
        }

        let message = render_stage(stage, &contact);
        let last_touch = self
            .outcomes
            .latest_for_enrolment(enrolment.id)
            .await?
            .map(|o| o.sent_at);
        let draft = OutreachDraft {
            contact: contact.clone(),
            message: message.clone(),
            timing: TimingContext::new(Utc::now(), 0, last_touch),
        };
        let score = self.gate.score_outreach(&draft).await?;
        match score.recommendation {
            Recommendation::Block => {
                warn!(
                    email = %contact.email,
                    overall = score.overall,
                    reasons = ?score.reasons,
                    "send blocked by quality gate"
                );
                stats.blocked += 1;
                metrics::counter!("quality_gate_decisions", "decision" => "block").increment(1);
                return Ok(());
            }
            Recommendation::Warn => {
                warn!(
                    email = %contact.email,
                    overall = score.overall,
                    "send passed the quality gate with warnings"
                );
                stats.warned += 1;
                metrics::counter!("quality_gate_decisions", "decision" => "warn").increment(1);
            }
            Recommendation::Allow => {
                metrics::counter!("quality_gate_decisions", "decision" => "allow").increment(1);
            }
        }

        let receipt = match channel {
            Channel::Email | Channel::Multi => {
                let email_message = EmailMessage {
                    to: contact.email.clone(),
                    from: None,
                    subject: message
                        .subject
                        .clone()
                        .unwrap_or_else(|| "Hello from our team".to_string()),
                    body_html: None,
                    body_text: Some(message.body.clone()),
                    idempotency_key: Some(key),
                };
                self.email.send(&email_message).await
            }
            Channel::Linkedin => {
                let Some(linkedin) = &self.linkedin else {
                    warn!(email = %contact.email, "no linkedin provider configured");
                    stats.failed += 1;
                    return Ok(());
                };
                let Some(profile_url) = contact.linkedin_url.clone() else {
                    warn!(email = %contact.email, "contact has no linkedin profile url");
                    stats.failed += 1;
                    return Ok(());
                };
                let request = LinkedInRequest {
                    profile_url,
                    message: message.body.clone(),
                    idempotency_key: Some(key),
                };
                if enrolment.current_stage == 0 {
                    linkedin.send_connection_request(&request).await
                } else {
                    linkedin.send_message(&request).await
                }
            }
        };

        match receipt {
            Ok(receipt) => {
                let mut outcome = OutreachOutcome::new(
                    enrolment.id,
                    &receipt.provider_message_id,
                    &stage.name,
                );
                outcome.subject_line = message.subject.clone();
                // The insert is idempotent by provider message id, so a
                // replayed receipt cannot produce a second row or count.
                if self.outcomes.insert(&outcome).await? {
                    if enrolment.state == EnrolmentState::Pending {
                        self.enrolments
                            .update_state(enrolment.id, EnrolmentState::Active)
                            .await?;
                    }
                    stats.sent += 1;
                    metrics::counter!("outreach_sends", "channel" => channel_label(channel))
                        .increment(1);
                } else {
                    stats.already_enrolled += 1;
                }
            }
            Err(CoreError::Conflict { .. }) => {
                // Another worker holds the send reservation; the pair is
                // enrolled and will be (or was) sent exactly once.
                stats.already_enrolled += 1;
            }
            Err(err) => {
                warn!(email = %contact.email, error = %err, "enrolment send failed");
                stats.failed += 1;
            }
        }
        Ok(())
    }
}

const fn channel_label(channel: Channel) -> &'static str {
    match channel {
        Channel::Email => "email",
        Channel::Linkedin => "linkedin",
        Channel::Multi => "multi",
    }
}

#[async_trait]
impl PipelineWorker for EnrolWorker {
    fn job_type(&self) -> JobType {
        JobType::Enrol
    }

    async fn execute(&self, job: &JobRecord, cx: &WorkerContext) -> CoreResult<WorkerOutcome> {
        let params: EnrolParams = serde_json::from_value(job.params.clone())?;
        let instance = self
            .campaigns
            .get_instance(params.campaign_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("campaign instance {}", params.campaign_id))
            })?;
        let template = self
            .campaigns
            .get_template(instance.template_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("campaign template {}", instance.template_id))
            })?;

        let mut stats = EnrolStats::default();
        for chunk in params.contact_ids.chunks(cx.batch_size().max(1)) {
            if cx.should_stop().await? {
                return Ok(WorkerOutcome::Cancelled);
            }
            for contact_id in chunk {
                self.enrol_one(params.campaign_id, &template, *contact_id, &mut stats)
                    .await?;
            }
            cx.report_progress(stats.requested as f64 / params.contact_ids.len().max(1) as f64)
                .await?;
        }

        info!(
            campaign = %params.campaign_id,
            sent = stats.sent,
            already_enrolled = stats.already_enrolled,
            blocked = stats.blocked,
            "enrolment finished"
        );
        Ok(WorkerOutcome::Completed(serde_json::to_value(&stats)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobRecord, JobStore, MemoryJobStore, Priority};
    use crate::model::{CampaignInstance, SchedulePolicy};
    use crate::providers::IdempotentEmail;
    use crate::quality::StaticMxResolver;
    use crate::store::{MemoryStores, Stores};
    use crate::testing::RecordingEmail;
    use serde_json::json;

    fn template(channel: Channel) -> CampaignTemplate {
        CampaignTemplate {
            id: Uuid::new_v4(),
            name: "intro sequence".to_string(),
            stages: vec![MessageStage {
                name: "intro".to_string(),
                subject: Some("Quick question for {{first_name}}".to_string()),
                body: "Hi {{first_name}}, I noticed {{company}} is growing quickly. We help \
                       teams cut onboarding time in half without changing existing tooling or \
                       processes, and most teams see results inside the first month of rollout. \
                       Would you be open to a quick chat next week? Happy to schedule around \
                       your calendar, whatever works best on your side."
                    .to_string(),
                channel: None,
                wait_days: 0,
            }],
            channel,
            schedule: SchedulePolicy::Immediate,
            created_at: Utc::now(),
        }
    }

    async fn seed_campaign(stores: &Stores, channel: Channel) -> Uuid {
        let template = template(channel);
        let instance = CampaignInstance::new(template.id);
        let id = instance.id;
        stores
            .campaigns
            .insert_template(&template)
            .await
            .expect("template");
        stores
            .campaigns
            .insert_instance(&instance)
            .await
            .expect("instance");
        id
    }

    async fn seed_contact(stores: &Stores, email: &str) -> Uuid {
        let mut contact = Contact::new(email);
        contact.name = Some("Alice Moreau".to_string());
        contact.title = Some("VP of Operations".to_string());
        contact.company = Some("Acme".to_string());
        contact.company_domain = Some("acme.com".to_string());
        contact.linkedin_url = Some("https://linkedin.com/in/alice".to_string());
        contact.phone = Some("+1 555 0100".to_string());
        contact.location = Some("Lyon".to_string());
        let id = contact.id;
        stores
            .contacts
            .insert_batch(&[contact])
            .await
            .expect("seed");
        id
    }

    fn worker(stores: &Stores, email: Arc<dyn EmailProvider>) -> EnrolWorker {
        EnrolWorker::new(
            stores.contacts.clone(),
            stores.campaigns.clone(),
            stores.enrolments.clone(),
            stores.outcomes.clone(),
            stores.idempotency.clone(),
            email,
            None,
            QualityGate::new(Arc::new(StaticMxResolver::accepting())),
        )
    }

    async fn run(worker: &EnrolWorker, campaign_id: Uuid, ids: Vec<Uuid>) -> EnrolStats {
        let job = JobRecord::new(
            JobType::Enrol,
            json!({ "campaign_id": campaign_id, "contact_ids": ids }),
            Priority::Normal,
        );
        let job_store = Arc::new(MemoryJobStore::new());
        job_store.insert(&job).await.expect("insert job");
        let cx = crate::workers::test_context(&job, job_store);
        match worker.execute(&job, &cx).await.expect("execute") {
            WorkerOutcome::Completed(result) => serde_json::from_value(result).expect("stats"),
            WorkerOutcome::Cancelled => panic!("unexpected cancellation"),
        }
    }

    #[tokio::test]
    async fn enrolment_sends_once_and_records_everything() {
        let stores = MemoryStores::stores();
        let campaign_id = seed_campaign(&stores, Channel::Email).await;
        let contact_id = seed_contact(&stores, "alice@acme.com").await;
        let recording = Arc::new(RecordingEmail::default());
        let email: Arc<dyn EmailProvider> = Arc::new(IdempotentEmail::new(
            recording.clone(),
            stores.idempotency.clone(),
        ));
        let worker = worker(&stores, email);

        let stats = run(&worker, campaign_id, vec![contact_id]).await;
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.already_enrolled, 0);
        assert_eq!(recording.sent_count(), 1);

        // The enrolment is active and the outcome row references the
        // provider message id recorded for idempotency.
        let enrolment = stores
            .enrolments
            .resolve(campaign_id, "alice@acme.com")
            .await
            .expect("resolve")
            .expect("enrolment");
        assert_eq!(enrolment.state, EnrolmentState::Active);

        let outcome = stores
            .outcomes
            .latest_for_enrolment(enrolment.id)
            .await
            .expect("latest")
            .expect("outcome");
        let key = derive_send_key(campaign_id, enrolment.id, 0);
        let record = stores
            .idempotency
            .get(IdempotentEmail::OPERATION, &key)
            .await
            .expect("get")
            .expect("record");
        assert_eq!(
            record.result["provider_message_id"],
            outcome.provider_message_id
        );

        // Rendered without leftover tokens.
        let sent = recording.sent();
        assert!(sent[0].subject.contains("Alice"));
        assert!(!sent[0].body_text.as_deref().unwrap_or("").contains("{{"));
    }

    #[tokio::test]
    async fn enrolling_twice_yields_one_row_and_one_send() {
        let stores = MemoryStores::stores();
        let campaign_id = seed_campaign(&stores, Channel::Email).await;
        let contact_id = seed_contact(&stores, "alice@acme.com").await;
        let recording = Arc::new(RecordingEmail::default());
        let email: Arc<dyn EmailProvider> = Arc::new(IdempotentEmail::new(
            recording.clone(),
            stores.idempotency.clone(),
        ));
        let worker = worker(&stores, email);

        let first = run(&worker, campaign_id, vec![contact_id]).await;
        let second = run(&worker, campaign_id, vec![contact_id]).await;

        assert_eq!(first.sent, 1);
        assert_eq!(second.already_enrolled, 1);
        assert_eq!(recording.sent_count(), 1, "exactly one provider call");
    }

    #[tokio::test]
    async fn parallel_enrolments_of_the_same_pair_send_once() {
        let stores = MemoryStores::stores();
        let campaign_id = seed_campaign(&stores, Channel::Email).await;
        let contact_id = seed_contact(&stores, "alice@acme.com").await;
        let recording = Arc::new(RecordingEmail::default());
        let email: Arc<dyn EmailProvider> = Arc::new(IdempotentEmail::new(
            recording.clone(),
            stores.idempotency.clone(),
        ));
        let worker_a = worker(&stores, email.clone());
        let worker_b = worker(&stores, email);

        let (a, b) = tokio::join!(
            run(&worker_a, campaign_id, vec![contact_id]),
            run(&worker_b, campaign_id, vec![contact_id]),
        );

        assert_eq!(a.sent + b.sent, 1, "exactly one send across both callers");
        assert_eq!(recording.sent_count(), 1);

        let enrolment = stores
            .enrolments
            .resolve(campaign_id, "alice@acme.com")
            .await
            .expect("resolve")
            .expect("enrolment");
        // Both callers resolved to the same row.
        assert_eq!(
            stores
                .enrolments
                .get(enrolment.id)
                .await
                .expect("get")
                .expect("row")
                .id,
            enrolment.id
        );
    }

    #[tokio::test]
    async fn hard_blocked_contact_is_never_sent() {
        let stores = MemoryStores::stores();
        let campaign_id = seed_campaign(&stores, Channel::Email).await;
        let mut contact = Contact::new("broken@acme.com");
        contact.email = "not-an-email".to_string();
        let contact_id = contact.id;
        stores
            .contacts
            .insert_batch(&[contact])
            .await
            .expect("seed");
        let recording = Arc::new(RecordingEmail::default());
        let worker = worker(&stores, recording.clone());

        let stats = run(&worker, campaign_id, vec![contact_id]).await;
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.sent, 0);
        assert_eq!(recording.sent_count(), 0);
    }

    #[tokio::test]
    async fn unknown_campaign_fails_the_job() {
        let stores = MemoryStores::stores();
        let recording = Arc::new(RecordingEmail::default());
        let worker = worker(&stores, recording);
        let job = JobRecord::new(
            JobType::Enrol,
            json!({ "campaign_id": Uuid::new_v4(), "contact_ids": [] }),
            Priority::Normal,
        );
        let job_store = Arc::new(MemoryJobStore::new());
        job_store.insert(&job).await.expect("insert job");
        let cx = crate::workers::test_context(&job, job_store);
        assert!(worker.execute(&job, &cx).await.is_err());
    }
}
