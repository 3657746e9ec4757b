//! Normalised-event ingest.
//!
//! Resolves each event to its enrolment and outcome row, applies the
//! counter/flag mutation, and hands replies to the conversational
//! responder. Events whose enrolment is not yet visible go to the
//! orphaned-event queue; the outcome mutation is always committed before
//! an orphaned event is removed.

use crate::error::CoreResult;
use crate::model::{Channel, EventType, EnrolmentState, NormalizedEvent, OutreachOutcome};
use crate::orphaned::{EventResolver, OrphanedEventQueue, Resolution};
use crate::responder::{InboundReply, Responder};
use crate::store::{CampaignStore, ContactStore, EnrolmentStore, OutcomeStore};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to an ingested event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The enrolment was found and the outcome committed.
    Resolved,
    /// No enrolment yet; the event was buffered for retry.
    Orphaned,
}

/// Consumes normalised webhook events.
#[derive(Clone)]
pub struct EventIngestor {
    enrolments: Arc<dyn EnrolmentStore>,
    outcomes: Arc<dyn OutcomeStore>,
    contacts: Arc<dyn ContactStore>,
    campaigns: Arc<dyn CampaignStore>,
    responder: Arc<Responder>,
    orphaned: OrphanedEventQueue,
}

impl EventIngestor {
    /// Build the ingestor.
    #[must_use]
    pub fn new(
        enrolments: Arc<dyn EnrolmentStore>,
        outcomes: Arc<dyn OutcomeStore>,
        contacts: Arc<dyn ContactStore>,
        campaigns: Arc<dyn CampaignStore>,
        responder: Arc<Responder>,
        orphaned: OrphanedEventQueue,
    ) -> Self {
        Self {
            enrolments,
            outcomes,
            contacts,
            campaigns,
            responder,
            orphaned,
        }
    }

    /// Ingest one event from the webhook edge.
    ///
    /// Resolution failures are not errors: the event is buffered in the
    /// orphaned queue and retried with backoff.
    pub async fn ingest(&self, event: &NormalizedEvent) -> CoreResult<IngestOutcome> {
        match self.resolve(event).await? {
            Resolution::Handled => Ok(IngestOutcome::Resolved),
            Resolution::NotFound => {
                debug!(event_id = %event.id, email = %event.email, "event orphaned");
                self.orphaned.enqueue(event.clone()).await?;
                Ok(IngestOutcome::Orphaned)
            }
        }
    }

    async fn find_outcome(&self, event: &NormalizedEvent) -> CoreResult<Option<OutreachOutcome>> {
        if let Some(message_id) = &event.provider_message_id {
            if let Some(outcome) = self.outcomes.get_by_message_id(message_id).await? {
                return Ok(Some(outcome));
            }
        }
        if let Some(campaign_id) = event.campaign_id {
            if let Some(enrolment) = self.enrolments.resolve(campaign_id, &event.email).await? {
                return self.outcomes.latest_for_enrolment(enrolment.id).await;
            }
        }
        Ok(None)
    }

    async fn thread_channel(&self, instance_id: uuid::Uuid) -> Channel {
        let template_id = match self.campaigns.get_instance(instance_id).await {
            Ok(Some(instance)) => instance.template_id,
            _ => return Channel::Email,
        };
        match self.campaigns.get_template(template_id).await {
            Ok(Some(template)) => template.channel,
            _ => Channel::Email,
        }
    }

    async fn invoke_responder(
        &self,
        event: &NormalizedEvent,
        instance_id: uuid::Uuid,
        contact_id: uuid::Uuid,
    ) {
        let Some(reply) = &event.reply else {
            debug!(event_id = %event.id, "reply event without body, responder skipped");
            return;
        };
        let contact = match self.contacts.get(contact_id).await {
            Ok(contact) => contact,
            Err(err) => {
                warn!(error = %err, "contact lookup failed before responder");
                None
            }
        };
        let inbound = InboundReply {
            lead_email: event.email.clone(),
            campaign_id: instance_id,
            channel: self.thread_channel(instance_id).await,
            subject: reply.subject.clone(),
            body: reply.body.clone(),
            lead_score: contact
                .as_ref()
                .map_or(0.0, |c| c.data_quality_score),
            profile_url: contact.and_then(|c| c.linkedin_url),
        };
        // Responder failures must not bounce the event back into the
        // orphaned queue; the outcome mutation is already committed.
        if let Err(err) = self.responder.handle_reply(&inbound).await {
            warn!(event_id = %event.id, error = %err, "responder failed for inbound reply");
        }
    }
}

#[async_trait]
impl EventResolver for EventIngestor {
    async fn resolve(&self, event: &NormalizedEvent) -> CoreResult<Resolution> {
        let Some(mut outcome) = self.find_outcome(event).await? else {
            return Ok(Resolution::NotFound);
        };
        let Some(enrolment) = self.enrolments.get(outcome.enrolment_id).await? else {
            return Ok(Resolution::NotFound);
        };

        let mut next_state = None;
        match event.event_type {
            EventType::Delivered => {}
            EventType::Opened => {
                outcome.open_count += 1;
                outcome.first_opened_at.get_or_insert(event.occurred_at);
            }
            EventType::Clicked => {
                outcome.click_count += 1;
            }
            EventType::Replied => {
                outcome.replied = true;
                outcome.replied_at = Some(event.occurred_at);
                if let Some(reply) = &event.reply {
                    outcome.reply_sentiment =
                        Some(crate::responder::classify(&reply.body).sentiment);
                }
                next_state = Some(EnrolmentState::Replied);
            }
            EventType::Bounced => {
                outcome.bounced = true;
                next_state = Some(EnrolmentState::Bounced);
            }
            EventType::Complained | EventType::Unsubscribed => {
                outcome.unsubscribed = true;
                next_state = Some(EnrolmentState::Unsubscribed);
            }
        }

        // Commit the outcome before anything else observes the event as
        // handled.
        self.outcomes.update(&outcome).await?;
        if let Some(state) = next_state {
            if enrolment.state.can_transition_to(state) {
                self.enrolments.update_state(enrolment.id, state).await?;
            } else {
                debug!(
                    enrolment_id = %enrolment.id,
                    from = %enrolment.state,
                    to = %state,
                    "enrolment transition skipped"
                );
            }
        }
        metrics::counter!("events_ingested", "type" => event.event_type.name()).increment(1);
        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            enrolment_id = %enrolment.id,
            "event applied"
        );

        if event.event_type == EventType::Replied {
            self.invoke_responder(event, enrolment.instance_id, enrolment.contact_id)
                .await;
        }
        Ok(Resolution::Handled)
    }
}
