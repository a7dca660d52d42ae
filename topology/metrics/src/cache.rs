use crate::{Error, Prometheus};
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::{sync::Arc, time::Duration};
use tracing::debug;

type Connect<M> = Box<dyn Fn(&str) -> Result<M, Error> + Send + Sync>;

/// Shares one metrics client per backend URL.
///
/// The set of backends is small and fixed by configuration, so clients are never evicted.
pub struct ClientCache<M = Prometheus> {
    default_url: String,
    connect: Connect<M>,
    clients: RwLock<HashMap<String, Arc<M>>>,
}

// === impl ClientCache ===

impl ClientCache<Prometheus> {
    pub fn prometheus(default_url: impl Into<String>, timeout: Duration) -> Self {
        Self::new(default_url, move |url| Prometheus::new(url, timeout))
    }
}

impl<M> ClientCache<M> {
    pub fn new(
        default_url: impl Into<String>,
        connect: impl Fn(&str) -> Result<M, Error> + Send + Sync + 'static,
    ) -> Self {
        Self {
            default_url: default_url.into(),
            connect: Box::new(connect),
            clients: RwLock::new(HashMap::default()),
        }
    }

    pub fn default_url(&self) -> &str {
        &self.default_url
    }

    /// Returns the client for `url`, or for the default URL when none is given, connecting on
    /// first use.
    pub fn get(&self, url: Option<&str>) -> Result<Arc<M>, Error> {
        let url = url.filter(|u| !u.is_empty()).unwrap_or(&self.default_url);
        if let Some(client) = self.clients.read().get(url) {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write();
        if let Some(client) = clients.get(url) {
            return Ok(client.clone());
        }
        let client = Arc::new((self.connect)(url)?);
        debug!(%url, "Connected metrics client");
        clients.insert(url.to_string(), client.clone());
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

impl<M> std::fmt::Debug for ClientCache<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCache")
            .field("default_url", &self.default_url)
            .field("clients", &self.len())
            .finish()
    }
}
