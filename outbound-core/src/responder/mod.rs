//! Conversational responder.
//!
//! Turns an inbound reply into a context-aware outbound reply under strict
//! safety gates: a per-lead rolling-window rate limit, a durable per-thread
//! cap, intent exclusions, generation timeout and output validation. A
//! blocked or failed generation never silently drops the inbound event; it
//! produces a durable pending-manual-reply record instead.

mod generate;
mod intent;
mod knowledge;
mod rate_window;
mod validate;

pub use generate::{HttpReplyGenerator, ReplyGenerator};
pub use intent::{classify, Intent, IntentClassification};
pub use knowledge::{KnowledgeBundle, KnowledgeService, StaticKnowledge};
pub use rate_window::ResponderRateLimiter;
pub use validate::{validate_reply, MAX_REPLY_CHARS, MIN_REPLY_CHARS};

use crate::config::ResponderSettings;
use crate::error::{CoreError, CoreResult};
use crate::jobs::CancellationToken;
use crate::model::{Channel, ConversationMessage, ConversationThread, MessageDirection};
use crate::providers::{EmailMessage, EmailProvider, LinkedInProvider, LinkedInRequest, VideoProvider};
use crate::store::{ManualReviewItem, ManualReviewStore, ThreadStore};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// An inbound reply handed to the responder by event ingest.
#[derive(Debug, Clone)]
pub struct InboundReply {
    /// Lead's email.
    pub lead_email: String,

    /// Campaign the conversation belongs to.
    pub campaign_id: Uuid,

    /// Channel the thread lives on; the reply goes back on the same one.
    pub channel: Channel,

    /// Inbound subject, for email threads.
    pub subject: Option<String>,

    /// Inbound body.
    pub body: String,

    /// Lead score, for the high-value video gate.
    pub lead_score: f64,

    /// LinkedIn profile URL, for LinkedIn threads.
    pub profile_url: Option<String>,
}

/// Why the responder declined to generate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Per-lead hourly window exhausted.
    RateLimited,
    /// The thread reached its durable AI-response cap.
    MaxResponsesReached,
    /// The classified intent is configured as excluded.
    ExcludedIntent(String),
    /// No provider is configured for the thread's channel.
    NoProviderAvailable,
}

impl SkipReason {
    /// Snake-case reason name, used in metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::MaxResponsesReached => "max_responses_reached",
            Self::ExcludedIntent(_) => "excluded_intent",
            Self::NoProviderAvailable => "no_provider_available",
        }
    }
}

/// Outcome of handling one inbound reply.
#[derive(Debug, Clone)]
pub enum ResponderOutcome {
    /// A reply was generated, validated and sent.
    Sent {
        /// Provider message id of the outbound reply.
        provider_message_id: String,
    },
    /// No reply was generated; the inbound message is still recorded.
    Skipped(SkipReason),
    /// Generation or validation failed; a pending-manual-reply record was
    /// written.
    QueuedForReview {
        /// `ai_generation_failed`, `validation_failed` or `human_review`.
        reason: String,
    },
}

/// The conversational responder.
pub struct Responder {
    threads: Arc<dyn ThreadStore>,
    manual_review: Arc<dyn ManualReviewStore>,
    limiter: Arc<ResponderRateLimiter>,
    generator: Arc<dyn ReplyGenerator>,
    knowledge: Arc<dyn KnowledgeService>,
    email: Arc<dyn EmailProvider>,
    linkedin: Option<Arc<dyn LinkedInProvider>>,
    video: Option<Arc<dyn VideoProvider>>,
    settings: ResponderSettings,
    shutdown: CancellationToken,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl Responder {
    /// History window fed to the generator.
    const HISTORY_LIMIT: usize = 6;

    /// Build the responder.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        threads: Arc<dyn ThreadStore>,
        manual_review: Arc<dyn ManualReviewStore>,
        generator: Arc<dyn ReplyGenerator>,
        knowledge: Arc<dyn KnowledgeService>,
        email: Arc<dyn EmailProvider>,
        linkedin: Option<Arc<dyn LinkedInProvider>>,
        video: Option<Arc<dyn VideoProvider>>,
        settings: ResponderSettings,
    ) -> Self {
        let limiter = Arc::new(ResponderRateLimiter::new(
            settings.rate_limit_per_hour,
            Duration::from_secs(3_600),
        ));
        Self {
            threads,
            manual_review,
            limiter,
            generator,
            knowledge,
            email,
            linkedin,
            video,
            settings,
            shutdown: CancellationToken::new(),
            cleanup: Mutex::new(None),
        }
    }

    /// Start the periodic rate-window pruning task.
    pub fn start(&self) {
        let limiter = Arc::clone(&self.limiter);
        let shutdown = self.shutdown.clone();
        let interval = Duration::from_millis(self.settings.cleanup_interval_ms);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        limiter.prune();
                    }
                }
            }
        });
        *self.cleanup.lock() = Some(handle);
    }

    /// Stop the pruning task. Safe to drop the responder right after.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.cleanup.lock().take() {
            handle.abort();
        }
    }

    async fn queue_for_review(
        &self,
        thread: &ConversationThread,
        reply: &InboundReply,
        reason: &str,
    ) -> CoreResult<ResponderOutcome> {
        let excerpt: String = reply.body.chars().take(200).collect();
        self.manual_review
            .push(&ManualReviewItem {
                id: Uuid::new_v4(),
                thread_id: thread.id,
                lead_email: reply.lead_email.clone(),
                reason: reason.to_string(),
                inbound_excerpt: excerpt,
                created_at: Utc::now(),
            })
            .await?;
        metrics::counter!("responder_replies", "outcome" => reason.to_string()).increment(1);
        warn!(
            thread_id = %thread.id,
            lead = %reply.lead_email,
            reason,
            "reply queued for manual review"
        );
        Ok(ResponderOutcome::QueuedForReview {
            reason: reason.to_string(),
        })
    }

    fn skip(reason: SkipReason) -> ResponderOutcome {
        metrics::counter!("responder_replies", "outcome" => reason.as_str()).increment(1);
        ResponderOutcome::Skipped(reason)
    }

    /// Handle one inbound reply.
    ///
    /// The rate-limit gate rejects before a thread is even touched; a lead
    /// past its hourly window cannot grow a thread. Every gate after it
    /// (cap, excluded intent) still classifies and persists the inbound
    /// message before stopping generation.
    pub async fn handle_reply(&self, reply: &InboundReply) -> CoreResult<ResponderOutcome> {
        if !self.limiter.would_allow(&reply.lead_email) {
            warn!(lead = %reply.lead_email, "inbound rejected, per-lead rate limit exceeded");
            return Ok(Self::skip(SkipReason::RateLimited));
        }

        let thread = self
            .threads
            .find_or_create(&reply.lead_email, reply.campaign_id, reply.channel)
            .await?;

        let classification = classify(&reply.body);
        let mut inbound =
            ConversationMessage::inbound(thread.id, &reply.body, reply.subject.as_deref());
        inbound.sentiment = Some(classification.sentiment);
        inbound.detected_intent = Some(classification.intent.as_str().to_string());
        self.threads.append_message(&inbound).await?;

        if thread.ai_responses_count >= self.settings.max_per_thread {
            return Ok(Self::skip(SkipReason::MaxResponsesReached));
        }
        if self
            .settings
            .excluded_intents
            .iter()
            .any(|excluded| excluded == classification.intent.as_str())
        {
            info!(
                thread_id = %thread.id,
                intent = %classification.intent,
                "inbound recorded, intent excluded from auto-reply"
            );
            return Ok(Self::skip(SkipReason::ExcludedIntent(
                classification.intent.as_str().to_string(),
            )));
        }

        let history = self
            .threads
            .recent_messages(thread.id, Self::HISTORY_LIMIT)
            .await?;
        let bundle = self
            .knowledge
            .bundle(reply.campaign_id, &reply.lead_email)
            .await?;
        let system_prompt = build_system_prompt(&bundle, reply.channel, &classification);
        let user_prompt = build_user_prompt(&history, reply);

        let generated = tokio::time::timeout(
            Duration::from_millis(self.settings.ai_timeout_ms),
            self.generator.generate(&system_prompt, &user_prompt),
        )
        .await;
        let text = match generated {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => {
                warn!(thread_id = %thread.id, error = %err, "reply generation failed");
                return self
                    .queue_for_review(&thread, reply, "ai_generation_failed")
                    .await;
            }
            Err(_) => {
                warn!(thread_id = %thread.id, "reply generation timed out");
                return self
                    .queue_for_review(&thread, reply, "ai_generation_failed")
                    .await;
            }
        };

        if let Err(violations) = validate_reply(&text) {
            warn!(
                thread_id = %thread.id,
                violations = ?violations,
                "generated reply failed validation"
            );
            return self
                .queue_for_review(&thread, reply, "validation_failed")
                .await;
        }

        if self.settings.review_gate {
            return self.queue_for_review(&thread, reply, "human_review").await;
        }

        if self.settings.human_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.human_delay_ms)).await;
        }

        let receipt = match self.send_on_channel(reply, &text).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => return Ok(Self::skip(SkipReason::NoProviderAvailable)),
            Err(err) => return Err(err),
        };

        let mut outbound =
            ConversationMessage::outbound(thread.id, &text, reply.subject.as_deref());
        outbound.detected_intent = Some(classification.intent.as_str().to_string());
        self.threads.append_message(&outbound).await?;
        let count = self.threads.increment_ai_responses(thread.id).await?;
        // Only a successful send consumes rate-limit budget.
        self.limiter.record(&reply.lead_email);

        metrics::counter!("responder_replies", "outcome" => "sent").increment(1);
        info!(
            thread_id = %thread.id,
            lead = %reply.lead_email,
            ai_responses = count,
            provider_message_id = %receipt,
            "ai reply sent"
        );

        self.maybe_generate_video(reply, &classification, &bundle);

        Ok(ResponderOutcome::Sent {
            provider_message_id: receipt,
        })
    }

    async fn send_on_channel(
        &self,
        reply: &InboundReply,
        text: &str,
    ) -> CoreResult<Option<String>> {
        match reply.channel {
            Channel::Email | Channel::Multi => {
                let subject = reply
                    .subject
                    .as_deref()
                    .map_or_else(|| "Re: our conversation".to_string(), |s| {
                        if s.to_lowercase().starts_with("re:") {
                            s.to_string()
                        } else {
                            format!("Re: {s}")
                        }
                    });
                let message = EmailMessage {
                    to: reply.lead_email.clone(),
                    from: None,
                    subject,
                    body_html: None,
                    body_text: Some(text.to_string()),
                    idempotency_key: None,
                };
                let receipt = self.email.send(&message).await?;
                Ok(Some(receipt.provider_message_id))
            }
            Channel::Linkedin => {
                let Some(linkedin) = &self.linkedin else {
                    warn!(lead = %reply.lead_email, "no linkedin provider for reply");
                    return Ok(None);
                };
                let Some(profile_url) = &reply.profile_url else {
                    warn!(lead = %reply.lead_email, "linkedin reply without a profile url");
                    return Ok(None);
                };
                let receipt = linkedin
                    .send_message(&LinkedInRequest {
                        profile_url: profile_url.clone(),
                        message: text.to_string(),
                        idempotency_key: None,
                    })
                    .await?;
                Ok(Some(receipt.provider_message_id))
            }
        }
    }

    fn maybe_generate_video(
        &self,
        reply: &InboundReply,
        classification: &IntentClassification,
        bundle: &KnowledgeBundle,
    ) {
        if !self.settings.video_enabled {
            return;
        }
        let high_value = classification.intent == Intent::MeetingRequest
            || (classification.intent == Intent::Interested
                && reply.lead_score >= self.settings.video_min_lead_score);
        if !high_value {
            return;
        }
        let Some(video) = self.video.clone() else {
            return;
        };

        let lead = reply.lead_email.clone();
        let persona = bundle.persona.clone();
        let script = format!(
            "Thanks for the reply! Quick personal note for {lead} ahead of our next step."
        );
        tokio::spawn(async move {
            match video.generate_video(&script, &persona).await {
                Ok(video_id) => {
                    info!(lead = %lead, video_id = %video_id, "personalised video generated");
                }
                Err(err) => warn!(lead = %lead, error = %err, "video generation failed"),
            }
        });
    }
}

fn build_system_prompt(
    bundle: &KnowledgeBundle,
    channel: Channel,
    classification: &IntentClassification,
) -> String {
    let tone = match channel {
        Channel::Email | Channel::Multi => "professional email tone, short paragraphs",
        Channel::Linkedin => "casual LinkedIn tone, a few sentences at most",
    };
    let guidance = match classification.intent {
        Intent::MeetingRequest => "Confirm interest and propose two concrete time slots.",
        Intent::Objection => "Acknowledge the objection; address it factually, never disparage.",
        Intent::Question => "Answer the question directly before anything else.",
        Intent::Interested => "Build on their interest and suggest a clear next step.",
        Intent::FollowUp => "Keep continuity with the previous messages.",
        Intent::OutOfOffice | Intent::NotInterested => "Do not reply.",
    };
    let mut prompt = format!(
        "You are {persona}. Write the reply in a {tone}. {guidance} Never invent pricing, \
         never promise outcomes, never include credentials or placeholders.",
        persona = bundle.persona,
    );
    if let Some(competitor) = &classification.competitor {
        prompt.push_str(&format!(
            " The lead mentioned using {competitor}; differentiate respectfully."
        ));
    }
    if !bundle.battle_cards.is_empty() {
        prompt.push_str(&format!(" Battle cards: {}.", bundle.battle_cards.join("; ")));
    }
    if !bundle.case_studies.is_empty() {
        prompt.push_str(&format!(" Case studies: {}.", bundle.case_studies.join("; ")));
    }
    prompt
}

fn build_user_prompt(history: &[ConversationMessage], reply: &InboundReply) -> String {
    let mut prompt = String::from("Conversation so far:\n");
    for message in history {
        let who = match message.direction {
            MessageDirection::Inbound => "Lead",
            MessageDirection::Outbound => "You",
        };
        prompt.push_str(&format!("{who}: {}\n", message.content));
    }
    prompt.push_str(&format!("\nLatest inbound message:\n{}\n", reply.body));
    prompt.push_str("\nWrite the next reply.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStores;
    use crate::testing::{
        FailingGenerator, RecordingEmail, RecordingLinkedIn, RecordingVideo, SlowGenerator,
        StubGenerator, StubKnowledge,
    };

    const GOOD_REPLY: &str = "Thanks for getting back to me! Happy to walk you through the \
                              details; would Tuesday or Thursday morning work for a short call?";

    struct Harness {
        responder: Responder,
        email: Arc<RecordingEmail>,
        stores: crate::store::Stores,
    }

    fn harness_with(settings: ResponderSettings, generator: Arc<dyn ReplyGenerator>) -> Harness {
        let stores = MemoryStores::stores();
        let email = Arc::new(RecordingEmail::default());
        let responder = Responder::new(
            Arc::clone(&stores.threads),
            Arc::clone(&stores.manual_review),
            generator,
            Arc::new(StubKnowledge),
            email.clone(),
            Some(Arc::new(RecordingLinkedIn::default())),
            None,
            settings,
        );
        Harness {
            responder,
            email,
            stores,
        }
    }

    fn fast_settings() -> ResponderSettings {
        ResponderSettings {
            human_delay_ms: 0,
            ai_timeout_ms: 200,
            ..ResponderSettings::default()
        }
    }

    fn reply(body: &str) -> InboundReply {
        InboundReply {
            lead_email: "lead@example.com".to_string(),
            campaign_id: Uuid::new_v4(),
            channel: Channel::Email,
            subject: Some("Quick question".to_string()),
            body: body.to_string(),
            lead_score: 0.5,
            profile_url: None,
        }
    }

    async fn thread_of(harness: &Harness, r: &InboundReply) -> ConversationThread {
        harness
            .stores
            .threads
            .find_or_create(&r.lead_email, r.campaign_id, r.channel)
            .await
            .expect("thread")
    }

    #[tokio::test]
    async fn interested_reply_gets_an_answer() {
        let harness = harness_with(fast_settings(), Arc::new(StubGenerator::new(GOOD_REPLY)));
        let inbound = reply("This sounds interesting, tell me more.");

        let outcome = harness
            .responder
            .handle_reply(&inbound)
            .await
            .expect("handled");
        assert!(matches!(outcome, ResponderOutcome::Sent { .. }));
        assert_eq!(harness.email.sent_count(), 1);

        let thread = thread_of(&harness, &inbound).await;
        assert_eq!(thread.ai_responses_count, 1);
        let messages = harness
            .stores
            .threads
            .recent_messages(thread.id, 10)
            .await
            .expect("messages");
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0].direction, MessageDirection::Inbound));
        assert!(matches!(messages[1].direction, MessageDirection::Outbound));
    }

    #[tokio::test]
    async fn removal_request_records_inbound_only() {
        let harness = harness_with(fast_settings(), Arc::new(StubGenerator::new(GOOD_REPLY)));
        let inbound = reply("Please remove me from this list.");

        let outcome = harness
            .responder
            .handle_reply(&inbound)
            .await
            .expect("handled");
        assert!(matches!(
            outcome,
            ResponderOutcome::Skipped(SkipReason::ExcludedIntent(ref intent))
                if intent == "not_interested"
        ));
        assert_eq!(harness.email.sent_count(), 0);

        let thread = thread_of(&harness, &inbound).await;
        // Inbound persisted, counter untouched.
        assert_eq!(thread.ai_responses_count, 0);
        let messages = harness
            .stores
            .threads
            .recent_messages(thread.id, 10)
            .await
            .expect("messages");
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].detected_intent.as_deref(),
            Some("not_interested")
        );
        assert_eq!(
            messages[0].sentiment,
            Some(crate::model::ReplySentiment::Negative)
        );
    }

    #[tokio::test]
    async fn thread_cap_refuses_generation_but_persists_inbound() {
        let settings = ResponderSettings {
            max_per_thread: 1,
            ..fast_settings()
        };
        let harness = harness_with(settings, Arc::new(StubGenerator::new(GOOD_REPLY)));
        let inbound = reply("Tell me more please, this could be useful for us.");

        let first = harness
            .responder
            .handle_reply(&inbound)
            .await
            .expect("handled");
        assert!(matches!(first, ResponderOutcome::Sent { .. }));

        let second = harness
            .responder
            .handle_reply(&inbound)
            .await
            .expect("handled");
        assert!(matches!(
            second,
            ResponderOutcome::Skipped(SkipReason::MaxResponsesReached)
        ));

        let thread = thread_of(&harness, &inbound).await;
        assert_eq!(thread.ai_responses_count, 1);
        let messages = harness
            .stores
            .threads
            .recent_messages(thread.id, 10)
            .await
            .expect("messages");
        // Two inbound messages plus one outbound.
        assert_eq!(messages.len(), 3);
    }

    #[tokio::test]
    async fn per_lead_rate_limit_skips() {
        let settings = ResponderSettings {
            rate_limit_per_hour: 1,
            ..fast_settings()
        };
        let harness = harness_with(settings, Arc::new(StubGenerator::new(GOOD_REPLY)));

        let first_inbound = reply("Sounds interesting, tell me more.");
        let first = harness
            .responder
            .handle_reply(&first_inbound)
            .await
            .expect("handled");
        assert!(matches!(first, ResponderOutcome::Sent { .. }));

        let mut second_inbound = reply("What does the onboarding look like?");
        second_inbound.campaign_id = first_inbound.campaign_id;
        let second = harness
            .responder
            .handle_reply(&second_inbound)
            .await
            .expect("handled");
        assert!(matches!(
            second,
            ResponderOutcome::Skipped(SkipReason::RateLimited)
        ));
        assert_eq!(harness.email.sent_count(), 1);

        // The rate-limited inbound never reached the thread: only the first
        // exchange (inbound plus outbound) is on it.
        let thread = thread_of(&harness, &first_inbound).await;
        let messages = harness
            .stores
            .threads
            .recent_messages(thread.id, 10)
            .await
            .expect("messages");
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0].direction, MessageDirection::Inbound));
        assert!(matches!(messages[1].direction, MessageDirection::Outbound));
    }

    #[tokio::test]
    async fn generation_failure_queues_for_review() {
        let harness = harness_with(fast_settings(), Arc::new(FailingGenerator));
        let outcome = harness
            .responder
            .handle_reply(&reply("Sounds interesting, tell me more."))
            .await
            .expect("handled");
        assert!(matches!(
            outcome,
            ResponderOutcome::QueuedForReview { ref reason } if reason == "ai_generation_failed"
        ));
        let pending = harness
            .stores
            .manual_review
            .list(10)
            .await
            .expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reason, "ai_generation_failed");
    }

    #[tokio::test]
    async fn generation_timeout_queues_for_review() {
        let harness = harness_with(
            fast_settings(),
            Arc::new(SlowGenerator::new(Duration::from_secs(60))),
        );
        let outcome = harness
            .responder
            .handle_reply(&reply("Sounds interesting, tell me more."))
            .await
            .expect("handled");
        assert!(matches!(
            outcome,
            ResponderOutcome::QueuedForReview { ref reason } if reason == "ai_generation_failed"
        ));
    }

    #[tokio::test]
    async fn invalid_generation_is_blocked_and_recorded() {
        let harness = harness_with(
            fast_settings(),
            Arc::new(StubGenerator::new("Hi [name], we guarantee success!")),
        );
        let outcome = harness
            .responder
            .handle_reply(&reply("Sounds interesting, tell me more."))
            .await
            .expect("handled");
        assert!(matches!(
            outcome,
            ResponderOutcome::QueuedForReview { ref reason } if reason == "validation_failed"
        ));
        assert_eq!(harness.email.sent_count(), 0);
        let pending = harness
            .stores
            .manual_review
            .list(10)
            .await
            .expect("pending");
        assert_eq!(pending[0].reason, "validation_failed");
    }

    #[tokio::test]
    async fn review_gate_holds_replies() {
        let settings = ResponderSettings {
            review_gate: true,
            ..fast_settings()
        };
        let harness = harness_with(settings, Arc::new(StubGenerator::new(GOOD_REPLY)));
        let outcome = harness
            .responder
            .handle_reply(&reply("Sounds interesting, tell me more."))
            .await
            .expect("handled");
        assert!(matches!(
            outcome,
            ResponderOutcome::QueuedForReview { ref reason } if reason == "human_review"
        ));
        assert_eq!(harness.email.sent_count(), 0);
    }

    #[tokio::test]
    async fn linkedin_thread_without_provider_is_no_provider_available() {
        let stores = MemoryStores::stores();
        let responder = Responder::new(
            Arc::clone(&stores.threads),
            Arc::clone(&stores.manual_review),
            Arc::new(StubGenerator::new(GOOD_REPLY)),
            Arc::new(StubKnowledge),
            Arc::new(RecordingEmail::default()),
            None,
            None,
            fast_settings(),
        );
        let mut inbound = reply("Sounds interesting, tell me more.");
        inbound.channel = Channel::Linkedin;
        inbound.profile_url = Some("https://linkedin.com/in/lead".to_string());

        let outcome = responder.handle_reply(&inbound).await.expect("handled");
        assert!(matches!(
            outcome,
            ResponderOutcome::Skipped(SkipReason::NoProviderAvailable)
        ));
    }

    #[tokio::test]
    async fn high_value_intent_triggers_video() {
        let video = Arc::new(RecordingVideo::default());
        let stores = MemoryStores::stores();
        let settings = ResponderSettings {
            video_enabled: true,
            ..fast_settings()
        };
        let responder = Responder::new(
            Arc::clone(&stores.threads),
            Arc::clone(&stores.manual_review),
            Arc::new(StubGenerator::new(GOOD_REPLY)),
            Arc::new(StubKnowledge),
            Arc::new(RecordingEmail::default()),
            None,
            Some(video.clone()),
            settings,
        );
        let outcome = responder
            .handle_reply(&reply("Great, let's meet! Can you schedule a call?"))
            .await
            .expect("handled");
        assert!(matches!(outcome, ResponderOutcome::Sent { .. }));

        // The video task is fire-and-forget; give it a moment.
        for _ in 0..50 {
            if video.generated_count() == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("video was never generated");
    }

    #[tokio::test]
    async fn shutdown_stops_the_cleanup_task() {
        let harness = harness_with(fast_settings(), Arc::new(StubGenerator::new(GOOD_REPLY)));
        harness.responder.start();
        harness.responder.shutdown();
        assert!(harness.responder.cleanup.lock().is_none());
    }
}
