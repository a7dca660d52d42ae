use ahash::AHashMap as HashMap;
use anyhow::Result;
use serde::de::DeserializeOwned;
use topology_core::NamespaceSelector;
use topology_k8s_api as k8s;
use tracing::warn;

/// Lists the objects that workloads are resolved from.
#[async_trait::async_trait]
pub trait Platform {
    async fn list_pods(&self, ns: &NamespaceSelector) -> Result<Vec<k8s::Pod>>;

    async fn list_deployments(&self, ns: &NamespaceSelector) -> Result<Vec<k8s::Deployment>>;

    async fn list_replica_sets(&self, ns: &NamespaceSelector) -> Result<Vec<k8s::ReplicaSet>>;

    async fn list_replication_controllers(
        &self,
        ns: &NamespaceSelector,
    ) -> Result<Vec<k8s::ReplicationController>>;

    async fn list_stateful_sets(&self, ns: &NamespaceSelector) -> Result<Vec<k8s::StatefulSet>>;

    async fn list_jobs(&self, ns: &NamespaceSelector) -> Result<Vec<k8s::Job>>;

    async fn list_cron_jobs(&self, ns: &NamespaceSelector) -> Result<Vec<k8s::CronJob>>;

    async fn list_services(&self, ns: &NamespaceSelector) -> Result<Vec<k8s::Service>>;
}

/// Fetched objects of one kind, indexed by name.
#[derive(Debug)]
pub(crate) struct Arena<K> {
    items: Vec<K>,
    by_name: HashMap<String, usize>,
}

/// A point-in-time view of everything in a namespace that workloads are resolved from.
#[derive(Debug)]
pub(crate) struct Snapshot {
    pub pods: Arena<k8s::Pod>,
    pub deployments: Arena<k8s::Deployment>,
    pub replica_sets: Arena<k8s::ReplicaSet>,
    pub replication_controllers: Arena<k8s::ReplicationController>,
    pub stateful_sets: Arena<k8s::StatefulSet>,
    pub jobs: Arena<k8s::Job>,
    pub cron_jobs: Arena<k8s::CronJob>,
    pub services: Vec<k8s::Service>,
}

// === impl Platform ===

#[async_trait::async_trait]
impl Platform for k8s::Client {
    async fn list_pods(&self, ns: &NamespaceSelector) -> Result<Vec<k8s::Pod>> {
        list(self, ns).await
    }

    async fn list_deployments(&self, ns: &NamespaceSelector) -> Result<Vec<k8s::Deployment>> {
        list(self, ns).await
    }

    async fn list_replica_sets(&self, ns: &NamespaceSelector) -> Result<Vec<k8s::ReplicaSet>> {
        list(self, ns).await
    }

    async fn list_replication_controllers(
        &self,
        ns: &NamespaceSelector,
    ) -> Result<Vec<k8s::ReplicationController>> {
        list(self, ns).await
    }

    async fn list_stateful_sets(&self, ns: &NamespaceSelector) -> Result<Vec<k8s::StatefulSet>> {
        list(self, ns).await
    }

    async fn list_jobs(&self, ns: &NamespaceSelector) -> Result<Vec<k8s::Job>> {
        list(self, ns).await
    }

    async fn list_cron_jobs(&self, ns: &NamespaceSelector) -> Result<Vec<k8s::CronJob>> {
        list(self, ns).await
    }

    async fn list_services(&self, ns: &NamespaceSelector) -> Result<Vec<k8s::Service>> {
        list(self, ns).await
    }
}

async fn list<K>(client: &k8s::Client, ns: &NamespaceSelector) -> Result<Vec<K>>
where
    K: k8s::Resource<Scope = k8s::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + std::fmt::Debug,
    K::DynamicType: Default,
{
    let api = match ns {
        NamespaceSelector::All => k8s::Api::<K>::all(client.clone()),
        NamespaceSelector::Namespace(ns) => k8s::Api::<K>::namespaced(client.clone(), ns),
    };
    let list = api.list(&k8s::ListParams::default()).await?;
    Ok(list.items)
}

// === impl Arena ===

impl<K: k8s::Resource> Arena<K> {
    pub fn get(&self, name: &str) -> Option<&K> {
        self.by_name.get(name).map(|&i| &self.items[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, K> {
        self.items.iter()
    }
}

impl<K: k8s::Resource> From<Vec<K>> for Arena<K> {
    fn from(items: Vec<K>) -> Self {
        let by_name = items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| Some((item.meta().name.clone()?, i)))
            .collect();
        Self { items, by_name }
    }
}

// === impl Snapshot ===

impl Snapshot {
    /// Lists every kind concurrently. The first failure aborts the snapshot.
    pub async fn fetch<P>(platform: &P, ns: &NamespaceSelector) -> Result<Self>
    where
        P: Platform + Sync + ?Sized,
    {
        let fetched = tokio::try_join!(
            platform.list_pods(ns),
            platform.list_deployments(ns),
            platform.list_replica_sets(ns),
            platform.list_replication_controllers(ns),
            platform.list_stateful_sets(ns),
            platform.list_jobs(ns),
            platform.list_cron_jobs(ns),
            platform.list_services(ns),
        );
        let (
            pods,
            deployments,
            replica_sets,
            replication_controllers,
            stateful_sets,
            jobs,
            cron_jobs,
            services,
        ) = fetched.map_err(|error| {
            warn!(%ns, %error, "Failed to fetch workloads");
            error
        })?;

        Ok(Self {
            pods: pods.into(),
            deployments: deployments.into(),
            replica_sets: replica_sets.into(),
            replication_controllers: replication_controllers.into(),
            stateful_sets: stateful_sets.into(),
            jobs: jobs.into(),
            cron_jobs: cron_jobs.into(),
            services,
        })
    }
}
