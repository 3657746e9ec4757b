//! Postgres store implementations.
//!
//! Queries are runtime-checked (`sqlx::query` / `query_as`) so the crate
//! builds without a live database. Uniqueness and find-or-create semantics
//! lean on database constraints (`ON CONFLICT`), never on check-then-act.

use super::{
    CampaignStore, CompanyStore, ContactStore, EnrichmentCache, EnrolmentStore, FindOrCreate,
    IdempotencyRecord, IdempotencyStore, ManualReviewItem, ManualReviewStore, OutcomeStore,
    Reservation, StoreKind, Stores, SyncLedger, SyncLedgerEntry, ThreadStore,
};
use crate::error::{CoreError, CoreResult};
use crate::model::{
    normalise_email, CampaignInstance, CampaignState, CampaignTemplate, Channel, Company, Contact,
    ConversationMessage, ConversationThread, Enrolment, EnrolmentState, MessageDirection,
    OutreachOutcome, ReplySentiment, SchedulePolicy,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Bundle of Postgres-backed stores sharing one pool.
pub struct PgStores;

impl PgStores {
    /// Connect a pool and build the [`Stores`] bundle.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the pool cannot be created.
    pub async fn connect(url: &str, max_connections: u32) -> CoreResult<(Stores, PgPool)> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok((Self::stores(&pool), pool))
    }

    /// Build the bundle from an existing pool.
    #[must_use]
    pub fn stores(pool: &PgPool) -> Stores {
        Stores {
            kind: StoreKind::Postgres,
            contacts: Arc::new(PgContactStore { pool: pool.clone() }),
            companies: Arc::new(PgCompanyStore { pool: pool.clone() }),
            campaigns: Arc::new(PgCampaignStore { pool: pool.clone() }),
            enrolments: Arc::new(PgEnrolmentStore { pool: pool.clone() }),
            outcomes: Arc::new(PgOutcomeStore { pool: pool.clone() }),
            idempotency: Arc::new(PgIdempotencyStore { pool: pool.clone() }),
            threads: Arc::new(PgThreadStore { pool: pool.clone() }),
            enrichment_cache: Arc::new(PgEnrichmentCache { pool: pool.clone() }),
            sync_ledger: Arc::new(PgSyncLedger { pool: pool.clone() }),
            manual_review: Arc::new(PgManualReviewStore { pool: pool.clone() }),
        }
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> CoreResult<T> {
    serde_json::from_value(value).map_err(|e| CoreError::Storage(format!("corrupt row: {e}")))
}

fn encode_json<T: serde::Serialize>(value: &T) -> CoreResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| CoreError::Storage(format!("encode failed: {e}")))
}

struct PgContactStore {
    pool: PgPool,
}

fn contact_from_row(row: &sqlx::postgres::PgRow) -> CoreResult<Contact> {
    Ok(Contact {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        title: row.try_get("title")?,
        company: row.try_get("company")?,
        company_domain: row.try_get("company_domain")?,
        linkedin_url: row.try_get("linkedin_url")?,
        phone: row.try_get("phone")?,
        location: row.try_get("location")?,
        enrichment: row.try_get("enrichment")?,
        data_quality_score: row.try_get("data_quality_score")?,
        icp_score: row.try_get("icp_score")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const CONTACT_COLUMNS: &str = "id, email, name, title, company, company_domain, linkedin_url, \
     phone, location, enrichment, data_quality_score, icp_score, created_at, updated_at";

#[async_trait]
impl ContactStore for PgContactStore {
    async fn insert_batch(&self, contacts: &[Contact]) -> CoreResult<usize> {
        let mut txn = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::DataLossHazard(e.to_string()))?;
        let mut inserted = 0_usize;
        for contact in contacts {
            let result = sqlx::query(
                "INSERT INTO contacts (id, email, name, title, company, company_domain, \
                 linkedin_url, phone, location, enrichment, data_quality_score, icp_score, \
                 created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
                 ON CONFLICT (email) DO NOTHING",
            )
            .bind(contact.id)
            .bind(&contact.email)
            .bind(&contact.name)
            .bind(&contact.title)
            .bind(&contact.company)
            .bind(&contact.company_domain)
            .bind(&contact.linkedin_url)
            .bind(&contact.phone)
            .bind(&contact.location)
            .bind(&contact.enrichment)
            .bind(contact.data_quality_score)
            .bind(contact.icp_score)
            .bind(contact.created_at)
            .bind(contact.updated_at)
            .execute(&mut *txn)
            .await
            .map_err(|e| CoreError::DataLossHazard(e.to_string()))?;
            inserted += usize::try_from(result.rows_affected()).unwrap_or(0);
        }
        txn.commit()
            .await
            .map_err(|e| CoreError::DataLossHazard(e.to_string()))?;
        Ok(inserted)
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Contact>> {
        let row = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(contact_from_row).transpose()
    }

    async fn get_by_email(&self, email: &str) -> CoreResult<Option<Contact>> {
        let row = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE email = $1"
        ))
        .bind(normalise_email(email))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(contact_from_row).transpose()
    }

    async fn update(&self, contact: &Contact) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE contacts SET name = $2, title = $3, company = $4, company_domain = $5, \
             linkedin_url = $6, phone = $7, location = $8, enrichment = $9, \
             data_quality_score = $10, icp_score = $11, updated_at = $12 WHERE id = $1",
        )
        .bind(contact.id)
        .bind(&contact.name)
        .bind(&contact.title)
        .bind(&contact.company)
        .bind(&contact.company_domain)
        .bind(&contact.linkedin_url)
        .bind(&contact.phone)
        .bind(&contact.location)
        .bind(&contact.enrichment)
        .bind(contact.data_quality_score)
        .bind(contact.icp_score)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("contact {}", contact.id)));
        }
        Ok(())
    }
}

struct PgCompanyStore {
    pool: PgPool,
}

#[async_trait]
impl CompanyStore for PgCompanyStore {
    async fn upsert(&self, company: &Company) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO companies (domain, name, industry, revenue, employees, technologies, \
             funding_stage, signals, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (domain) DO UPDATE SET name = EXCLUDED.name, \
             industry = EXCLUDED.industry, revenue = EXCLUDED.revenue, \
             employees = EXCLUDED.employees, technologies = EXCLUDED.technologies, \
             funding_stage = EXCLUDED.funding_stage, signals = EXCLUDED.signals, \
             updated_at = EXCLUDED.updated_at",
        )
        .bind(&company.domain)
        .bind(&company.name)
        .bind(&company.industry)
        .bind(company.revenue)
        .bind(company.employees)
        .bind(encode_json(&company.technologies)?)
        .bind(&company.funding_stage)
        .bind(encode_json(&company.signals)?)
        .bind(company.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, domain: &str) -> CoreResult<Option<Company>> {
        let row = sqlx::query(
            "SELECT domain, name, industry, revenue, employees, technologies, funding_stage, \
             signals, updated_at FROM companies WHERE domain = $1",
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(Company {
            domain: row.try_get("domain")?,
            name: row.try_get("name")?,
            industry: row.try_get("industry")?,
            revenue: row.try_get("revenue")?,
            employees: row.try_get("employees")?,
            technologies: decode_json(row.try_get("technologies")?)?,
            funding_stage: row.try_get("funding_stage")?,
            signals: decode_json(row.try_get("signals")?)?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

struct PgCampaignStore {
    pool: PgPool,
}

#[async_trait]
impl CampaignStore for PgCampaignStore {
    async fn insert_template(&self, template: &CampaignTemplate) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO campaign_templates (id, name, stages, channel, schedule, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(encode_json(&template.stages)?)
        .bind(encode_json(&template.channel)?)
        .bind(encode_json(&template.schedule)?)
        .bind(template.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> CoreResult<Option<CampaignTemplate>> {
        let row = sqlx::query(
            "SELECT id, name, stages, channel, schedule, created_at \
             FROM campaign_templates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let stages: Vec<crate::model::MessageStage> = decode_json(row.try_get("stages")?)?;
        let channel: Channel = decode_json(row.try_get("channel")?)?;
        let schedule: SchedulePolicy = decode_json(row.try_get("schedule")?)?;
        Ok(Some(CampaignTemplate {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            stages,
            channel,
            schedule,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn insert_instance(&self, instance: &CampaignInstance) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO campaign_instances (id, template_id, state, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(instance.id)
        .bind(instance.template_id)
        .bind(instance.state.name())
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_instance(&self, id: Uuid) -> CoreResult<Option<CampaignInstance>> {
        let row = sqlx::query(
            "SELECT id, template_id, state, created_at, updated_at \
             FROM campaign_instances WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let state: String = row.try_get("state")?;
        let state = decode_json(serde_json::Value::String(state))?;
        Ok(Some(CampaignInstance {
            id: row.try_get("id")?,
            template_id: row.try_get("template_id")?,
            state,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn update_instance_state(&self, id: Uuid, state: CampaignState) -> CoreResult<()> {
        let result =
            sqlx::query("UPDATE campaign_instances SET state = $2, updated_at = $3 WHERE id = $1")
                .bind(id)
                .bind(state.name())
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("campaign instance {id}")));
        }
        Ok(())
    }
}

struct PgEnrolmentStore {
    pool: PgPool,
}

fn enrolment_from_row(row: &sqlx::postgres::PgRow) -> CoreResult<Enrolment> {
    let state: String = row.try_get("state")?;
    Ok(Enrolment {
        id: row.try_get("id")?,
        instance_id: row.try_get("instance_id")?,
        contact_id: row.try_get("contact_id")?,
        state: decode_json(serde_json::Value::String(state))?,
        current_stage: u32::try_from(row.try_get::<i64, _>("current_stage")?).unwrap_or(0),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl EnrolmentStore for PgEnrolmentStore {
    async fn find_or_create(
        &self,
        instance_id: Uuid,
        contact: &Contact,
    ) -> CoreResult<FindOrCreate> {
        let contact_id = contact.id;
        let fresh = Enrolment::new(instance_id, contact_id);
        let inserted = sqlx::query(
            "INSERT INTO enrolments (id, instance_id, contact_id, state, current_stage, \
             created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (instance_id, contact_id) DO NOTHING",
        )
        .bind(fresh.id)
        .bind(instance_id)
        .bind(contact_id)
        .bind(fresh.state.name())
        .bind(i64::from(fresh.current_stage))
        .bind(fresh.created_at)
        .bind(fresh.updated_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(FindOrCreate {
                enrolment: fresh,
                created: true,
            });
        }

        let row = sqlx::query(
            "SELECT id, instance_id, contact_id, state, current_stage, created_at, updated_at \
             FROM enrolments WHERE instance_id = $1 AND contact_id = $2",
        )
        .bind(instance_id)
        .bind(contact_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(FindOrCreate {
            enrolment: enrolment_from_row(&row)?,
            created: false,
        })
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Enrolment>> {
        let row = sqlx::query(
            "SELECT id, instance_id, contact_id, state, current_stage, created_at, updated_at \
             FROM enrolments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(enrolment_from_row).transpose()
    }

    async fn resolve(&self, campaign_id: Uuid, email: &str) -> CoreResult<Option<Enrolment>> {
        let row = sqlx::query(
            "SELECT e.id, e.instance_id, e.contact_id, e.state, e.current_stage, e.created_at, \
             e.updated_at FROM enrolments e JOIN contacts c ON c.id = e.contact_id \
             WHERE e.instance_id = $1 AND c.email = $2",
        )
        .bind(campaign_id)
        .bind(normalise_email(email))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(enrolment_from_row).transpose()
    }

    async fn update_state(&self, id: Uuid, state: EnrolmentState) -> CoreResult<()> {
        let result = sqlx::query("UPDATE enrolments SET state = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(state.name())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("enrolment {id}")));
        }
        Ok(())
    }
}

struct PgOutcomeStore {
    pool: PgPool,
}

fn outcome_from_row(row: &sqlx::postgres::PgRow) -> CoreResult<OutreachOutcome> {
    let sentiment: Option<String> = row.try_get("reply_sentiment")?;
    let reply_sentiment: Option<ReplySentiment> = sentiment
        .map(|s| decode_json(serde_json::Value::String(s)))
        .transpose()?;
    Ok(OutreachOutcome {
        id: row.try_get("id")?,
        enrolment_id: row.try_get("enrolment_id")?,
        provider_message_id: row.try_get("provider_message_id")?,
        template_used: row.try_get("template_used")?,
        subject_line: row.try_get("subject_line")?,
        persona: row.try_get("persona")?,
        sent_at: row.try_get("sent_at")?,
        open_count: row.try_get("open_count")?,
        click_count: row.try_get("click_count")?,
        replied: row.try_get("replied")?,
        meeting_booked: row.try_get("meeting_booked")?,
        bounced: row.try_get("bounced")?,
        unsubscribed: row.try_get("unsubscribed")?,
        first_opened_at: row.try_get("first_opened_at")?,
        replied_at: row.try_get("replied_at")?,
        reply_sentiment,
    })
}

const OUTCOME_COLUMNS: &str = "id, enrolment_id, provider_message_id, template_used, \
     subject_line, persona, sent_at, open_count, click_count, replied, meeting_booked, bounced, \
     unsubscribed, first_opened_at, replied_at, reply_sentiment";

#[async_trait]
impl OutcomeStore for PgOutcomeStore {
    async fn insert(&self, outcome: &OutreachOutcome) -> CoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO outreach_outcomes (id, enrolment_id, provider_message_id, \
             template_used, subject_line, persona, sent_at, open_count, click_count, replied, \
             meeting_booked, bounced, unsubscribed, first_opened_at, replied_at, reply_sentiment) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT (provider_message_id) DO NOTHING",
        )
        .bind(outcome.id)
        .bind(outcome.enrolment_id)
        .bind(&outcome.provider_message_id)
        .bind(&outcome.template_used)
        .bind(&outcome.subject_line)
        .bind(&outcome.persona)
        .bind(outcome.sent_at)
        .bind(outcome.open_count)
        .bind(outcome.click_count)
        .bind(outcome.replied)
        .bind(outcome.meeting_booked)
        .bind(outcome.bounced)
        .bind(outcome.unsubscribed)
        .bind(outcome.first_opened_at)
        .bind(outcome.replied_at)
        .bind(outcome.reply_sentiment.map(|s| s.name().to_string()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_by_message_id(
        &self,
        provider_message_id: &str,
    ) -> CoreResult<Option<OutreachOutcome>> {
        let row = sqlx::query(&format!(
            "SELECT {OUTCOME_COLUMNS} FROM outreach_outcomes WHERE provider_message_id = $1"
        ))
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(outcome_from_row).transpose()
    }

    async fn latest_for_enrolment(
        &self,
        enrolment_id: Uuid,
    ) -> CoreResult<Option<OutreachOutcome>> {
        let row = sqlx::query(&format!(
            "SELECT {OUTCOME_COLUMNS} FROM outreach_outcomes WHERE enrolment_id = $1 \
             ORDER BY sent_at DESC LIMIT 1"
        ))
        .bind(enrolment_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(outcome_from_row).transpose()
    }

    async fn update(&self, outcome: &OutreachOutcome) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE outreach_outcomes SET open_count = $2, click_count = $3, replied = $4, \
             meeting_booked = $5, bounced = $6, unsubscribed = $7, first_opened_at = $8, \
             replied_at = $9, reply_sentiment = $10 WHERE id = $1",
        )
        .bind(outcome.id)
        .bind(outcome.open_count)
        .bind(outcome.click_count)
        .bind(outcome.replied)
        .bind(outcome.meeting_booked)
        .bind(outcome.bounced)
        .bind(outcome.unsubscribed)
        .bind(outcome.first_opened_at)
        .bind(outcome.replied_at)
        .bind(outcome.reply_sentiment.map(|s| s.name().to_string()))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("outcome {}", outcome.id)));
        }
        Ok(())
    }
}

struct PgIdempotencyStore {
    pool: PgPool,
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn reserve(&self, operation: &str, key: &str) -> CoreResult<Reservation> {
        let inserted = sqlx::query(
            "INSERT INTO idempotency (operation, key, result, created_at) \
             VALUES ($1, $2, 'null'::jsonb, $3) ON CONFLICT (operation, key) DO NOTHING",
        )
        .bind(operation)
        .bind(key)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() == 1 {
            return Ok(Reservation::Acquired);
        }
        let record = self
            .get(operation, key)
            .await?
            .ok_or_else(|| CoreError::Storage("idempotency row vanished".to_string()))?;
        Ok(Reservation::Existing(record))
    }

    async fn fulfil(
        &self,
        operation: &str,
        key: &str,
        result: serde_json::Value,
    ) -> CoreResult<()> {
        let updated = sqlx::query(
            "UPDATE idempotency SET result = $3 WHERE operation = $1 AND key = $2",
        )
        .bind(operation)
        .bind(key)
        .bind(result)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!(
                "idempotency {operation}/{key}"
            )));
        }
        Ok(())
    }

    async fn get(&self, operation: &str, key: &str) -> CoreResult<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            "SELECT operation, key, result, created_at FROM idempotency \
             WHERE operation = $1 AND key = $2",
        )
        .bind(operation)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(IdempotencyRecord {
            operation: row.try_get("operation")?,
            key: row.try_get("key")?,
            result: row.try_get("result")?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

struct PgThreadStore {
    pool: PgPool,
}

fn thread_from_row(row: &sqlx::postgres::PgRow) -> CoreResult<ConversationThread> {
    let channel: String = row.try_get("channel")?;
    Ok(ConversationThread {
        id: row.try_get("id")?,
        lead_email: row.try_get("lead_email")?,
        campaign_id: row.try_get("campaign_id")?,
        channel: decode_json(serde_json::Value::String(channel))?,
        ai_responses_count: u32::try_from(row.try_get::<i64, _>("ai_responses_count")?)
            .unwrap_or(0),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl ThreadStore for PgThreadStore {
    async fn find_or_create(
        &self,
        lead_email: &str,
        campaign_id: Uuid,
        channel: Channel,
    ) -> CoreResult<ConversationThread> {
        let fresh = ConversationThread::new(lead_email, campaign_id, channel);
        sqlx::query(
            "INSERT INTO conversation_threads (id, lead_email, campaign_id, channel, \
             ai_responses_count, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (lead_email, campaign_id) DO NOTHING",
        )
        .bind(fresh.id)
        .bind(&fresh.lead_email)
        .bind(campaign_id)
        .bind(encode_json(&channel)?.as_str().unwrap_or("email").to_string())
        .bind(i64::from(fresh.ai_responses_count))
        .bind(fresh.created_at)
        .bind(fresh.updated_at)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, lead_email, campaign_id, channel, ai_responses_count, created_at, \
             updated_at FROM conversation_threads WHERE lead_email = $1 AND campaign_id = $2",
        )
        .bind(&fresh.lead_email)
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;
        thread_from_row(&row)
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<ConversationThread>> {
        let row = sqlx::query(
            "SELECT id, lead_email, campaign_id, channel, ai_responses_count, created_at, \
             updated_at FROM conversation_threads WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(thread_from_row).transpose()
    }

    async fn append_message(&self, message: &ConversationMessage) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO conversation_messages (id, thread_id, direction, content, subject, \
             sentiment, detected_intent, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(message.id)
        .bind(message.thread_id)
        .bind(match message.direction {
            MessageDirection::Inbound => "inbound",
            MessageDirection::Outbound => "outbound",
        })
        .bind(&message.content)
        .bind(&message.subject)
        .bind(message.sentiment.map(|s| s.name().to_string()))
        .bind(&message.detected_intent)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        sqlx::query("UPDATE conversation_threads SET updated_at = $2 WHERE id = $1")
            .bind(message.thread_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_messages(
        &self,
        thread_id: Uuid,
        limit: usize,
    ) -> CoreResult<Vec<ConversationMessage>> {
        let rows = sqlx::query(
            "SELECT id, thread_id, direction, content, subject, sentiment, detected_intent, \
             created_at FROM (SELECT * FROM conversation_messages WHERE thread_id = $1 \
             ORDER BY created_at DESC LIMIT $2) recent ORDER BY created_at ASC",
        )
        .bind(thread_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let direction: String = row.try_get("direction")?;
                let sentiment: Option<String> = row.try_get("sentiment")?;
                Ok(ConversationMessage {
                    id: row.try_get("id")?,
                    thread_id: row.try_get("thread_id")?,
                    direction: if direction == "inbound" {
                        MessageDirection::Inbound
                    } else {
                        MessageDirection::Outbound
                    },
                    content: row.try_get("content")?,
                    subject: row.try_get("subject")?,
                    sentiment: sentiment
                        .map(|s| decode_json(serde_json::Value::String(s)))
                        .transpose()?,
                    detected_intent: row.try_get("detected_intent")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn increment_ai_responses(&self, thread_id: Uuid) -> CoreResult<u32> {
        let row = sqlx::query(
            "UPDATE conversation_threads SET ai_responses_count = ai_responses_count + 1 \
             WHERE id = $1 RETURNING ai_responses_count",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;
        let row = row.ok_or_else(|| CoreError::NotFound(format!("thread {thread_id}")))?;
        Ok(u32::try_from(row.try_get::<i64, _>("ai_responses_count")?).unwrap_or(u32::MAX))
    }
}

struct PgEnrichmentCache {
    pool: PgPool,
}

#[async_trait]
impl EnrichmentCache for PgEnrichmentCache {
    async fn get(
        &self,
        kind: &str,
        key: &str,
        max_age: Duration,
    ) -> CoreResult<Option<serde_json::Value>> {
        let row = sqlx::query(
            "SELECT data, cached_at FROM enrichment_cache WHERE type = $1 AND key = $2",
        )
        .bind(kind)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let cached_at: DateTime<Utc> = row.try_get("cached_at")?;
        let age = Utc::now().signed_duration_since(cached_at);
        if age.num_seconds() >= 0 && age.to_std().unwrap_or(Duration::MAX) <= max_age {
            Ok(Some(row.try_get("data")?))
        } else {
            Ok(None)
        }
    }

    async fn put(&self, kind: &str, key: &str, data: &serde_json::Value) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO enrichment_cache (type, key, data, cached_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (type, key) DO UPDATE SET \
             data = EXCLUDED.data, cached_at = EXCLUDED.cached_at",
        )
        .bind(kind)
        .bind(key)
        .bind(data)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

struct PgSyncLedger {
    pool: PgPool,
}

#[async_trait]
impl SyncLedger for PgSyncLedger {
    async fn record(&self, kind: &str, external_id: &str, status: &str) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO sync_ledger (kind, external_id, status, synced_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (kind, external_id) DO UPDATE SET \
             status = EXCLUDED.status, synced_at = EXCLUDED.synced_at",
        )
        .bind(kind)
        .bind(external_id)
        .bind(status)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, kind: &str, external_id: &str) -> CoreResult<Option<SyncLedgerEntry>> {
        let row = sqlx::query(
            "SELECT kind, external_id, status, synced_at FROM sync_ledger \
             WHERE kind = $1 AND external_id = $2",
        )
        .bind(kind)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(SyncLedgerEntry {
            kind: row.try_get("kind")?,
            external_id: row.try_get("external_id")?,
            status: row.try_get("status")?,
            synced_at: row.try_get("synced_at")?,
        }))
    }
}

struct PgManualReviewStore {
    pool: PgPool,
}

#[async_trait]
impl ManualReviewStore for PgManualReviewStore {
    async fn push(&self, item: &ManualReviewItem) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO manual_review (id, thread_id, lead_email, reason, inbound_excerpt, \
             created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(item.id)
        .bind(item.thread_id)
        .bind(&item.lead_email)
        .bind(&item.reason)
        .bind(&item.inbound_excerpt)
        .bind(item.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, limit: usize) -> CoreResult<Vec<ManualReviewItem>> {
        let rows = sqlx::query(
            "SELECT id, thread_id, lead_email, reason, inbound_excerpt, created_at \
             FROM manual_review ORDER BY created_at DESC LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(ManualReviewItem {
                    id: row.try_get("id")?,
                    thread_id: row.try_get("thread_id")?,
                    lead_email: row.try_get("lead_email")?,
                    reason: row.try_get("reason")?,
                    inbound_excerpt: row.try_get("inbound_excerpt")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
