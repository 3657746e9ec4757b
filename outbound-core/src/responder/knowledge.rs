//! Knowledge bundles for reply generation.

use crate::error::CoreResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context handed to the generator alongside the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBundle {
    /// Sender persona (name, role, voice).
    pub persona: String,

    /// Competitive battle cards.
    pub battle_cards: Vec<String>,

    /// Case studies worth referencing.
    pub case_studies: Vec<String>,
}

impl Default for KnowledgeBundle {
    fn default() -> Self {
        Self {
            persona: "a helpful, concise sales development representative".to_string(),
            battle_cards: Vec::new(),
            case_studies: Vec::new(),
        }
    }
}

/// Supplies the knowledge bundle for a campaign/lead pair.
#[async_trait]
pub trait KnowledgeService: Send + Sync {
    /// Fetch the bundle for a conversation.
    async fn bundle(&self, campaign_id: Uuid, lead_email: &str) -> CoreResult<KnowledgeBundle>;
}

/// Fixed-bundle service; the default until a campaign-specific source is
/// wired in.
#[derive(Debug, Clone, Default)]
pub struct StaticKnowledge {
    bundle: KnowledgeBundle,
}

impl StaticKnowledge {
    /// Service returning the given bundle for every conversation.
    #[must_use]
    pub fn new(bundle: KnowledgeBundle) -> Self {
        Self { bundle }
    }
}

#[async_trait]
impl KnowledgeService for StaticKnowledge {
    async fn bundle(&self, _campaign_id: Uuid, _lead_email: &str) -> CoreResult<KnowledgeBundle> {
        Ok(self.bundle.clone())
    }
}
