use crate::{
    core::{Event, EventStream, NetNamespace, NetNamespaceStore, Vnid},
    k8s::{self, net_namespace::network_selector, watcher, Api, Client, ListParams, ResourceExt},
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use anyhow::Result;
use futures::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads `NetNamespace` assignments from the cluster.
pub struct KubeStore {
    api: Api<k8s::NetNamespace>,

    /// The assignments most recently observed in each network. Survives resubscription so that a
    /// relist can report assignments deleted while no watch was running.
    seen: Mutex<HashMap<String, SharedAssignments>>,
}

type SharedAssignments = Arc<Mutex<Assignments>>;

#[derive(Debug, Default)]
struct Assignments {
    /// Indexed by namespace name.
    vnids: HashMap<String, Vnid>,

    /// Namespace names, indexed by `NetNamespace` resource name.
    netnames: HashMap<String, String>,
}

/// Folds a `NetNamespace` watch into batches of assignment events.
#[derive(Debug)]
struct Batcher {
    seen: SharedAssignments,

    /// Set while the watch is relisting, holding each listed resource's name and assignment.
    relist: Option<Vec<(String, NetNamespace)>>,
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
            seen: Mutex::new(HashMap::default()),
        }
    }

    fn assignments(&self, network: &str) -> SharedAssignments {
        self.seen
            .lock()
            .entry(network.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait::async_trait]
impl NetNamespaceStore for KubeStore {
    async fn net_namespaces(&self, network: &str) -> Result<Vec<NetNamespace>> {
        let params = ListParams::default().labels(&network_selector(network));
        let listed = self
            .api
            .list(&params)
            .await?
            .iter()
            .filter_map(|netns| Some((netns.name_any(), decode(netns)?)))
            .collect::<Vec<_>>();

        self.assignments(network).lock().reset(&listed);
        Ok(listed.into_iter().map(|(_, netns)| netns).collect())
    }

    async fn watch(&self, network: &str) -> Result<EventStream> {
        let config = watcher::Config::default().labels(&network_selector(network));
        let mut batcher = Batcher::new(self.assignments(network));
        let batches = watcher::watcher(self.api.clone(), config)
            .map_err(anyhow::Error::from)
            .try_filter_map(move |event| future::ready(Ok(batcher.handle(event))));
        Ok(Box::pin(batches))
    }
}

/// Converts a resource into an assignment, dropping resources that don't name a namespace.
fn decode(netns: &k8s::NetNamespace) -> Option<NetNamespace> {
    if netns.spec.netname.is_empty() {
        warn!(name = %netns.name_any(), "NetNamespace has no netname; skipping");
        return None;
    }
    Some(NetNamespace::new(netns.spec.netname.clone(), netns.spec.netid))
}

// === impl Assignments ===

impl Assignments {
    /// Replaces all assignments with those listed.
    fn reset(&mut self, listed: &[(String, NetNamespace)]) {
        self.vnids = listed
            .iter()
            .map(|(_, netns)| (netns.name.clone(), netns.vnid))
            .collect();
        self.netnames = listed
            .iter()
            .map(|(resource, netns)| (resource.clone(), netns.name.clone()))
            .collect();
    }
}

// === impl Batcher ===

impl Batcher {
    fn new(seen: SharedAssignments) -> Self {
        Self { seen, relist: None }
    }

    /// Returns the batch of events produced by a watch event, if any.
    fn handle(&mut self, event: watcher::Event<k8s::NetNamespace>) -> Option<Vec<Event>> {
        match event {
            watcher::Event::Init => {
                debug!("Relisting");
                self.relist = Some(Vec::new());
                None
            }

            watcher::Event::InitApply(netns) => {
                if let (Some(relist), Some(assignment)) = (self.relist.as_mut(), decode(&netns)) {
                    relist.push((netns.name_any(), assignment));
                }
                None
            }

            watcher::Event::InitDone => {
                let listed = self.relist.take().unwrap_or_default();
                let mut seen = self.seen.lock();
                let names = listed
                    .iter()
                    .map(|(_, netns)| netns.name.as_str())
                    .collect::<HashSet<_>>();
                let mut removed = seen
                    .vnids
                    .iter()
                    .filter(|(name, _)| !names.contains(name.as_str()))
                    .map(|(name, vnid)| NetNamespace::new(name.clone(), *vnid))
                    .collect::<Vec<_>>();
                removed.sort_by(|a, b| a.name.cmp(&b.name));
                seen.reset(&listed);
                drop(seen);

                let batch = listed
                    .into_iter()
                    .map(|(_, netns)| Event::Added(netns))
                    .chain(removed.into_iter().map(Event::Removed))
                    .collect::<Vec<_>>();
                (!batch.is_empty()).then_some(batch)
            }

            watcher::Event::Apply(netns) => {
                let resource = netns.name_any();
                let assignment = decode(&netns);
                let mut seen = self.seen.lock();
                let previous = match &assignment {
                    Some(a) => seen.netnames.insert(resource, a.name.clone()),
                    None => seen.netnames.remove(&resource),
                };

                // A resource whose netname changed no longer assigns its previous namespace.
                let mut batch = Vec::new();
                if let Some(previous) =
                    previous.filter(|p| !matches!(&assignment, Some(a) if a.name == *p))
                {
                    if let Some(vnid) = seen.vnids.remove(&previous) {
                        batch.push(Event::Removed(NetNamespace::new(previous, vnid)));
                    }
                }
                if let Some(assignment) = assignment {
                    seen.vnids.insert(assignment.name.clone(), assignment.vnid);
                    batch.push(Event::Added(assignment));
                }
                (!batch.is_empty()).then_some(batch)
            }

            watcher::Event::Delete(netns) => {
                let mut seen = self.seen.lock();
                let name = seen
                    .netnames
                    .remove(&netns.name_any())
                    .or_else(|| decode(&netns).map(|a| a.name))?;
                let vnid = seen.vnids.remove(&name).unwrap_or(netns.spec.netid);
                Some(vec![Event::Removed(NetNamespace::new(name, vnid))])
            }
        }
    }
}
