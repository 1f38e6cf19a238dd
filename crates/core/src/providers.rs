//! Capability ports for third-party providers and their registry.
//!
//! The engine never talks to a SaaS directly; it calls through one of four
//! capability-set traits, always under the resilience envelope. Concrete
//! adapters (ClickUp, Slack, Sheets, ...) live outside this crate and are
//! registered at composition time. Lookups return `Option`, never a
//! sentinel.

use crate::ctx::OpContext;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Capability discovery record every port exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub kind: ProviderKind,
    pub version: String,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    TaskManager,
    Messaging,
    Spreadsheet,
    SocialMedia,
}

/// A work item pushed to an external task manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalTask {
    pub title: String,
    pub description: String,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee: Option<String>,
    pub tags: Vec<String>,
}

#[async_trait]
pub trait TaskManagerPort: Send + Sync {
    fn provider_info(&self) -> ProviderInfo;
    async fn create_task(&self, ctx: &OpContext, task: ExternalTask) -> Result<String>;
    async fn complete_task(&self, ctx: &OpContext, task_id: &str) -> Result<()>;
}

/// An outbound notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub subject: Option<String>,
    pub body: String,
}

#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn provider_info(&self) -> ProviderInfo;
    async fn send(&self, ctx: &OpContext, message: OutboundMessage) -> Result<String>;
}

/// A tabular export target (report sheets, stock count sheets).
#[async_trait]
pub trait SpreadsheetPort: Send + Sync {
    fn provider_info(&self) -> ProviderInfo;
    async fn append_rows(
        &self,
        ctx: &OpContext,
        sheet: &str,
        rows: Vec<Vec<String>>,
    ) -> Result<u32>;
}

#[async_trait]
pub trait SocialMediaPort: Send + Sync {
    fn provider_info(&self) -> ProviderInfo;
    async fn post(&self, ctx: &OpContext, text: &str) -> Result<String>;
}

/// Registry of provider implementations, keyed by name. Registration takes
/// the write lock; lookups take the read lock.
#[derive(Default)]
pub struct ProviderRegistry {
    task_managers: RwLock<HashMap<String, Arc<dyn TaskManagerPort>>>,
    messengers: RwLock<HashMap<String, Arc<dyn MessagingPort>>>,
    spreadsheets: RwLock<HashMap<String, Arc<dyn SpreadsheetPort>>>,
    social_media: RwLock<HashMap<String, Arc<dyn SocialMediaPort>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_task_manager(&self, name: &str, provider: Arc<dyn TaskManagerPort>) {
        self.task_managers.write().await.insert(name.to_string(), provider);
    }

    pub async fn register_messenger(&self, name: &str, provider: Arc<dyn MessagingPort>) {
        self.messengers.write().await.insert(name.to_string(), provider);
    }

    pub async fn register_spreadsheet(&self, name: &str, provider: Arc<dyn SpreadsheetPort>) {
        self.spreadsheets.write().await.insert(name.to_string(), provider);
    }

    pub async fn register_social_media(&self, name: &str, provider: Arc<dyn SocialMediaPort>) {
        self.social_media.write().await.insert(name.to_string(), provider);
    }

    pub async fn task_manager(&self, name: &str) -> Option<Arc<dyn TaskManagerPort>> {
        self.task_managers.read().await.get(name).cloned()
    }

    pub async fn messenger(&self, name: &str) -> Option<Arc<dyn MessagingPort>> {
        self.messengers.read().await.get(name).cloned()
    }

    pub async fn spreadsheet(&self, name: &str) -> Option<Arc<dyn SpreadsheetPort>> {
        self.spreadsheets.read().await.get(name).cloned()
    }

    pub async fn social_media(&self, name: &str) -> Option<Arc<dyn SocialMediaPort>> {
        self.social_media.read().await.get(name).cloned()
    }

    /// Discovery across all registered providers.
    pub async fn provider_infos(&self) -> Vec<ProviderInfo> {
        let mut infos = Vec::new();
        infos.extend(self.task_managers.read().await.values().map(|p| p.provider_info()));
        infos.extend(self.messengers.read().await.values().map(|p| p.provider_info()));
        infos.extend(self.spreadsheets.read().await.values().map(|p| p.provider_info()));
        infos.extend(self.social_media.read().await.values().map(|p| p.provider_info()));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullMessenger;

    #[async_trait]
    impl MessagingPort for NullMessenger {
        fn provider_info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "null".to_string(),
                kind: ProviderKind::Messaging,
                version: "1.0".to_string(),
                capabilities: vec!["send".to_string()],
            }
        }

        async fn send(&self, _ctx: &OpContext, message: OutboundMessage) -> Result<String> {
            Ok(format!("sent:{}", message.channel))
        }
    }

    #[tokio::test]
    async fn lookup_returns_none_for_unknown() {
        let registry = ProviderRegistry::new();
        assert!(registry.messenger("slack").await.is_none());
    }

    #[tokio::test]
    async fn registered_provider_is_discoverable() {
        let registry = ProviderRegistry::new();
        registry.register_messenger("null", Arc::new(NullMessenger)).await;

        let provider = registry.messenger("null").await.expect("registered");
        let receipt = provider
            .send(
                &OpContext::background(),
                OutboundMessage {
                    channel: "#ops".to_string(),
                    subject: None,
                    body: "low stock".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(receipt, "sent:#ops");

        let infos = registry.provider_infos().await;
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].kind, ProviderKind::Messaging);
    }
}
