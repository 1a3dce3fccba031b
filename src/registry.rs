//! The monitor registry and the destination set.
//!
//! Readers take lock-free snapshots; writers are serialized, persist the next
//! snapshot through the [`StateStore`] and only then publish it. A failed save
//! leaves the published state untouched.

use crate::store::{PersistedState, StateStore};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Errors returned by registry mutations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no source group id was given")]
    MissingSource,

    #[error("no destination group id was given")]
    MissingDestination,

    #[error("group id {0:?} contains the reserved separator ':'")]
    InvalidId(String),

    #[error("failed to persist registry state: {0:#}")]
    Persist(#[source] anyhow::Error),
}

/// Separates source and destination in a persisted monitor entry.
const PAIR_SEPARATOR: char = ':';

fn validate_id(id: &str) -> Result<(), RegistryError> {
    if id.contains(PAIR_SEPARATOR) {
        return Err(RegistryError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// An immutable view of the registry at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    destinations: Vec<String>,
    monitors: Vec<(String, String)>,
}

impl RegistrySnapshot {
    /// Builds a snapshot from an ordered destination list and ordered monitor pairs.
    pub fn from_parts(destinations: Vec<String>, monitors: Vec<(String, String)>) -> Self {
        Self {
            destinations,
            monitors,
        }
    }

    fn from_persisted(state: &PersistedState) -> Self {
        let mut destinations: Vec<String> = Vec::with_capacity(state.notification_groups.len());
        for id in &state.notification_groups {
            if !destinations.contains(id) {
                destinations.push(id.clone());
            }
        }
        Self::from_parts(destinations, state.monitor_pairs())
    }

    fn to_persisted(&self) -> PersistedState {
        PersistedState::from_parts(&self.destinations, &self.monitors)
    }

    /// Registered destinations in insertion order.
    pub fn destinations(&self) -> &[String] {
        &self.destinations
    }

    /// Monitor entries as `(source, destination)` in insertion order.
    pub fn monitors(&self) -> &[(String, String)] {
        &self.monitors
    }

    pub fn destination_for(&self, source_id: &str) -> Option<&str> {
        self.monitors
            .iter()
            .find(|(source, _)| source == source_id)
            .map(|(_, destination)| destination.as_str())
    }

    pub fn has_destination(&self, destination_id: &str) -> bool {
        self.destinations.iter().any(|d| d == destination_id)
    }

    /// Sources grouped by destination, both in first-seen order.
    pub fn grouped_by_destination(&self) -> Vec<(String, Vec<String>)> {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for (source, destination) in &self.monitors {
            match groups.iter_mut().find(|(d, _)| d == destination) {
                Some((_, sources)) => sources.push(source.clone()),
                None => groups.push((destination.clone(), vec![source.clone()])),
            }
        }
        groups
    }

    fn sources_for(&self, destination_id: &str) -> Vec<String> {
        self.monitors
            .iter()
            .filter(|(_, destination)| destination == destination_id)
            .map(|(source, _)| source.clone())
            .collect()
    }
}

/// Result of listing destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationListing {
    NoneConfigured,
    Destinations(Vec<String>),
}

/// Result of listing monitors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorListing {
    NoneConfigured,
    Monitors {
        /// `(destination, sources)` in first-seen order.
        groups: Vec<(String, Vec<String>)>,
        /// Every monitored source id.
        sources: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddDestinationOutcome {
    Added,
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveDestinationOutcome {
    /// The destination was removed. Sources still routed to it keep their entries.
    Removed { still_referenced_by: Vec<String> },
    NotPresent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddMonitorOutcome {
    /// The destination was missing from the destination set and has been added.
    pub destination_auto_registered: bool,
    /// The destination the source was routed to before this call, if any.
    pub previous_destination: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveMonitorOutcome {
    Removed { destination: String },
    NotPresent,
}

/// The shared registry used by both the event path and the admin command path.
pub struct Registry {
    current: ArcSwap<RegistrySnapshot>,
    write_lock: Mutex<()>,
    store: Arc<dyn StateStore>,
}

impl Registry {
    /// Loads the registry from `store`.
    pub async fn load(store: Arc<dyn StateStore>) -> Result<Self> {
        let state = store.load().await?;
        let snapshot = RegistrySnapshot::from_persisted(&state);
        info!(
            destinations = snapshot.destinations.len(),
            monitors = snapshot.monitors.len(),
            "Registry loaded"
        );
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            write_lock: Mutex::new(()),
            store,
        })
    }

    /// Returns the current snapshot. Never blocks on writers.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    pub fn list_destinations(&self) -> DestinationListing {
        let snapshot = self.snapshot();
        if snapshot.destinations.is_empty() {
            DestinationListing::NoneConfigured
        } else {
            DestinationListing::Destinations(snapshot.destinations.clone())
        }
    }

    pub fn list_monitors(&self) -> MonitorListing {
        let snapshot = self.snapshot();
        if snapshot.monitors.is_empty() {
            return MonitorListing::NoneConfigured;
        }
        MonitorListing::Monitors {
            groups: snapshot.grouped_by_destination(),
            sources: snapshot.monitors.iter().map(|(s, _)| s.clone()).collect(),
        }
    }

    #[instrument(skip(self))]
    pub async fn add_destination(
        &self,
        destination_id: &str,
    ) -> Result<AddDestinationOutcome, RegistryError> {
        let destination_id = destination_id.trim();
        if destination_id.is_empty() {
            return Err(RegistryError::MissingDestination);
        }
        validate_id(destination_id)?;

        let _guard = self.write_lock.lock().await;
        let current = self.snapshot();
        if current.has_destination(destination_id) {
            return Ok(AddDestinationOutcome::AlreadyPresent);
        }

        let mut next = (*current).clone();
        next.destinations.push(destination_id.to_string());
        self.commit(next).await?;
        info!(destination_id, "Destination added");
        Ok(AddDestinationOutcome::Added)
    }

    #[instrument(skip(self))]
    pub async fn remove_destination(
        &self,
        destination_id: &str,
    ) -> Result<RemoveDestinationOutcome, RegistryError> {
        let destination_id = destination_id.trim();
        if destination_id.is_empty() {
            return Err(RegistryError::MissingDestination);
        }

        let _guard = self.write_lock.lock().await;
        let current = self.snapshot();
        if !current.has_destination(destination_id) {
            return Ok(RemoveDestinationOutcome::NotPresent);
        }

        let mut next = (*current).clone();
        next.destinations.retain(|d| d != destination_id);
        let still_referenced_by = next.sources_for(destination_id);
        self.commit(next).await?;
        info!(destination_id, "Destination removed");
        Ok(RemoveDestinationOutcome::Removed {
            still_referenced_by,
        })
    }

    /// Routes `source_id` to `destination_id`, replacing any previous route.
    ///
    /// A destination that is not yet registered is added to the destination
    /// set in the same write.
    #[instrument(skip(self))]
    pub async fn add_monitor(
        &self,
        source_id: &str,
        destination_id: &str,
    ) -> Result<AddMonitorOutcome, RegistryError> {
        let (source_id, destination_id) = (source_id.trim(), destination_id.trim());
        if source_id.is_empty() {
            return Err(RegistryError::MissingSource);
        }
        if destination_id.is_empty() {
            return Err(RegistryError::MissingDestination);
        }
        validate_id(source_id)?;
        validate_id(destination_id)?;

        let _guard = self.write_lock.lock().await;
        let mut next = (*self.snapshot()).clone();

        let previous_destination = match next.monitors.iter_mut().find(|(s, _)| s == source_id) {
            Some(entry) => Some(std::mem::replace(&mut entry.1, destination_id.to_string())),
            None => {
                next.monitors
                    .push((source_id.to_string(), destination_id.to_string()));
                None
            }
        };

        let destination_auto_registered = !next.has_destination(destination_id);
        if destination_auto_registered {
            next.destinations.push(destination_id.to_string());
        }

        self.commit(next).await?;
        info!(
            source_id,
            destination_id,
            destination_auto_registered,
            ?previous_destination,
            "Monitor added"
        );
        Ok(AddMonitorOutcome {
            destination_auto_registered,
            previous_destination,
        })
    }

    /// Stops monitoring `source_id`. Its destination stays registered.
    #[instrument(skip(self))]
    pub async fn remove_monitor(
        &self,
        source_id: &str,
    ) -> Result<RemoveMonitorOutcome, RegistryError> {
        let source_id = source_id.trim();
        if source_id.is_empty() {
            return Err(RegistryError::MissingSource);
        }

        let _guard = self.write_lock.lock().await;
        let current = self.snapshot();
        let Some(position) = current.monitors.iter().position(|(s, _)| s == source_id) else {
            return Ok(RemoveMonitorOutcome::NotPresent);
        };

        let mut next = (*current).clone();
        let (_, destination) = next.monitors.remove(position);
        self.commit(next).await?;
        info!(source_id, destination = %destination, "Monitor removed");
        Ok(RemoveMonitorOutcome::Removed { destination })
    }

    /// Persists `next` and publishes it. Callers must hold the write lock.
    async fn commit(&self, next: RegistrySnapshot) -> Result<(), RegistryError> {
        self.store
            .save(&next.to_persisted())
            .await
            .map_err(RegistryError::Persist)?;
        debug!("Registry state persisted");
        self.current.store(Arc::new(next));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn registry_with(state: PersistedState) -> (Registry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(state));
        let registry = Registry::load(store.clone()).await.unwrap();
        (registry, store)
    }

    async fn empty_registry() -> (Registry, Arc<MemoryStore>) {
        registry_with(PersistedState::default()).await
    }

    #[tokio::test]
    async fn test_empty_listings() {
        let (registry, _) = empty_registry().await;
        assert_eq!(registry.list_destinations(), DestinationListing::NoneConfigured);
        assert_eq!(registry.list_monitors(), MonitorListing::NoneConfigured);
    }

    #[tokio::test]
    async fn test_add_destination_is_idempotent() {
        let (registry, store) = empty_registry().await;

        assert_eq!(
            registry.add_destination("999").await.unwrap(),
            AddDestinationOutcome::Added
        );
        assert_eq!(
            registry.add_destination("999").await.unwrap(),
            AddDestinationOutcome::AlreadyPresent
        );

        assert_eq!(registry.snapshot().destinations(), ["999".to_string()]);
        assert_eq!(store.snapshot().notification_groups, vec!["999"]);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_destinations_keep_insertion_order() {
        let (registry, _) = empty_registry().await;
        for id in ["3", "1", "2"] {
            registry.add_destination(id).await.unwrap();
        }
        assert_eq!(
            registry.list_destinations(),
            DestinationListing::Destinations(vec!["3".into(), "1".into(), "2".into()])
        );
    }

    #[tokio::test]
    async fn test_remove_destination() {
        let (registry, store) = empty_registry().await;
        registry.add_destination("999").await.unwrap();

        assert_eq!(
            registry.remove_destination("999").await.unwrap(),
            RemoveDestinationOutcome::Removed {
                still_referenced_by: vec![]
            }
        );
        assert_eq!(
            registry.remove_destination("999").await.unwrap(),
            RemoveDestinationOutcome::NotPresent
        );
        assert!(store.snapshot().notification_groups.is_empty());
        assert_eq!(store.save_count(), 2);
    }

    #[tokio::test]
    async fn test_remove_destination_reports_remaining_routes() {
        let (registry, _) = empty_registry().await;
        registry.add_monitor("111", "999").await.unwrap();

        assert_eq!(
            registry.remove_destination("999").await.unwrap(),
            RemoveDestinationOutcome::Removed {
                still_referenced_by: vec!["111".to_string()]
            }
        );
        assert_eq!(registry.snapshot().destination_for("111"), Some("999"));
    }

    #[tokio::test]
    async fn test_add_monitor_auto_registers_destination() {
        let (registry, store) = empty_registry().await;

        let outcome = registry.add_monitor("111", "999").await.unwrap();

        assert!(outcome.destination_auto_registered);
        assert_eq!(outcome.previous_destination, None);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.destination_for("111"), Some("999"));
        assert!(snapshot.has_destination("999"));
        assert_eq!(store.snapshot().monitored_groups, vec!["111:999"]);
        assert_eq!(store.snapshot().notification_groups, vec!["999"]);
    }

    #[tokio::test]
    async fn test_add_monitor_with_known_destination() {
        let (registry, _) = empty_registry().await;
        registry.add_destination("999").await.unwrap();

        let outcome = registry.add_monitor("111", "999").await.unwrap();

        assert!(!outcome.destination_auto_registered);
        assert_eq!(registry.snapshot().destinations(), ["999".to_string()]);
    }

    #[tokio::test]
    async fn test_add_monitor_overwrites_and_repairs() {
        let (registry, _) = empty_registry().await;
        registry.add_monitor("111", "999").await.unwrap();
        registry.add_monitor("222", "999").await.unwrap();

        let outcome = registry.add_monitor("111", "888").await.unwrap();

        assert!(outcome.destination_auto_registered);
        assert_eq!(outcome.previous_destination.as_deref(), Some("999"));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.destination_for("111"), Some("888"));
        // Repointing keeps the entry where it was.
        assert_eq!(snapshot.monitors()[0].0, "111");
        assert!(snapshot.has_destination("888"));
        assert!(snapshot.has_destination("999"));
    }

    #[tokio::test]
    async fn test_add_monitor_requires_arguments() {
        let (registry, store) = empty_registry().await;

        assert!(matches!(
            registry.add_monitor("", "999").await,
            Err(RegistryError::MissingSource)
        ));
        assert!(matches!(
            registry.add_monitor("111", "  ").await,
            Err(RegistryError::MissingDestination)
        ));
        assert_eq!(store.save_count(), 0);
        assert_eq!(registry.list_monitors(), MonitorListing::NoneConfigured);
    }

    #[tokio::test]
    async fn test_remove_monitor_keeps_destination() {
        let (registry, _) = empty_registry().await;
        registry.add_monitor("111", "999").await.unwrap();

        assert_eq!(
            registry.remove_monitor("111").await.unwrap(),
            RemoveMonitorOutcome::Removed {
                destination: "999".to_string()
            }
        );
        assert_eq!(
            registry.remove_monitor("111").await.unwrap(),
            RemoveMonitorOutcome::NotPresent
        );

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.destination_for("111"), None);
        assert!(snapshot.has_destination("999"));
    }

    #[tokio::test]
    async fn test_remove_unknown_monitor_leaves_registry_unchanged() {
        let (registry, store) = empty_registry().await;
        registry.add_monitor("111", "999").await.unwrap();
        let before = registry.snapshot();

        assert_eq!(
            registry.remove_monitor("555").await.unwrap(),
            RemoveMonitorOutcome::NotPresent
        );
        assert_eq!(*registry.snapshot(), *before);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_list_monitors_groups_by_destination() {
        let (registry, _) = empty_registry().await;
        registry.add_monitor("111", "999").await.unwrap();
        registry.add_monitor("222", "888").await.unwrap();
        registry.add_monitor("333", "999").await.unwrap();

        assert_eq!(
            registry.list_monitors(),
            MonitorListing::Monitors {
                groups: vec![
                    ("999".to_string(), vec!["111".to_string(), "333".to_string()]),
                    ("888".to_string(), vec!["222".to_string()]),
                ],
                sources: vec!["111".into(), "222".into(), "333".into()],
            }
        );
    }

    #[tokio::test]
    async fn test_failed_save_does_not_publish() {
        let (registry, store) = empty_registry().await;
        store.set_fail_saves(true);

        assert!(matches!(
            registry.add_monitor("111", "999").await,
            Err(RegistryError::Persist(_))
        ));
        assert_eq!(registry.snapshot().destination_for("111"), None);
        assert!(!registry.snapshot().has_destination("999"));
    }

    #[tokio::test]
    async fn test_load_keeps_unregistered_destinations() {
        let state = PersistedState {
            notification_groups: vec!["999".to_string(), "999".to_string()],
            monitored_groups: vec!["111:888".to_string()],
        };
        let (registry, store) = registry_with(state).await;

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.destinations(), ["999".to_string()]);
        assert_eq!(snapshot.destination_for("111"), Some("888"));
        assert!(!snapshot.has_destination("888"));
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_writers_are_serialized() {
        let (registry, store) = empty_registry().await;
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .add_monitor(&format!("{}", 100 + i), "999")
                        .await
                        .unwrap()
                })
            })
            .collect();
        let auto_registered = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| r.as_ref().unwrap().destination_auto_registered)
            .count();

        assert_eq!(auto_registered, 1);
        assert_eq!(registry.snapshot().monitors().len(), 20);
        assert_eq!(store.snapshot().monitored_groups.len(), 20);
        assert_eq!(store.snapshot().notification_groups, vec!["999"]);
    }
}
