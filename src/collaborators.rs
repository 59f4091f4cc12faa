//! Interfaces to the systems around the engine: publication catalogue and
//! notification delivery.
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub id: String,
    pub owner_id: String,
    pub title: String,
}

/// Supplies the provider identity when a contract is created.
pub trait PublicationDirectory: Send + Sync {
    fn get_publication(&self, id: &str) -> anyhow::Result<Option<Publication>>;
}

/// Fire-and-forget delivery. Errors are logged by the caller and never fail
/// the operation that triggered them.
pub trait Notifier: Send + Sync {
    fn notify(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryPublications {
    publications: RwLock<HashMap<String, Publication>>,
}

impl InMemoryPublications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, publication: Publication) {
        if let Ok(mut map) = self.publications.write() {
            map.insert(publication.id.clone(), publication);
        }
    }
}

impl PublicationDirectory for InMemoryPublications {
    fn get_publication(&self, id: &str) -> anyhow::Result<Option<Publication>> {
        let map = self
            .publications
            .read()
            .map_err(|_| anyhow::anyhow!("publication directory lock poisoned"))?;
        Ok(map.get(id).cloned())
    }
}

/// Writes notifications to the tracing output instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, to: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        tracing::info!(to, subject, "notification queued");
        Ok(())
    }
}

pub(crate) fn notify_quietly(notifier: &dyn Notifier, to: &str, subject: &str, body: &str) {
    if let Err(err) = notifier.notify(to, subject, body) {
        tracing::warn!(to, subject, error = %err, "notification failed");
    }
}
