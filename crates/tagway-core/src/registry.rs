// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Service registry.
//!
//! Driver runtimes advertise the `(SystemType, System)` pair they serve once
//! their bus handlers are registered. Consumers observe a pair to learn when
//! it becomes available, or wait for it with a bound.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::topic::SystemType;

/// Identifies an advertised service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    /// Backend family.
    pub system_type: SystemType,
    /// System name.
    pub system: String,
}

impl ServiceKey {
    /// Creates a key.
    pub fn new(system_type: SystemType, system: impl Into<String>) -> Self {
        Self {
            system_type,
            system: system.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.system_type, self.system)
    }
}

/// Registry of available services.
///
/// Cheap to clone.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: Arc<DashMap<ServiceKey, watch::Sender<Option<String>>>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn receiver(&self, key: ServiceKey) -> watch::Receiver<Option<String>> {
        self.services
            .entry(key)
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Marks a service as served by `instance`.
    pub fn advertise(&self, system_type: SystemType, system: &str, instance: impl Into<String>) {
        let key = ServiceKey::new(system_type, system);
        let instance = instance.into();
        tracing::info!(service = %key, instance = %instance, "Service advertised");
        self.services
            .entry(key)
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(instance));
    }

    /// Withdraws a service if `instance` still serves it.
    pub fn withdraw(&self, system_type: SystemType, system: &str, instance: &str) {
        let key = ServiceKey::new(system_type, system);
        if let Some(sender) = self.services.get(&key) {
            let withdrawn = sender.send_if_modified(|current| {
                if current.as_deref() == Some(instance) {
                    *current = None;
                    true
                } else {
                    false
                }
            });
            if withdrawn {
                tracing::info!(service = %key, instance = %instance, "Service withdrawn");
            }
        }
    }

    /// Returns the instance currently serving a service.
    pub fn current(&self, system_type: SystemType, system: &str) -> Option<String> {
        self.services
            .get(&ServiceKey::new(system_type, system))
            .and_then(|sender| sender.borrow().clone())
    }

    /// Returns every available service.
    pub fn available(&self) -> Vec<ServiceKey> {
        let mut keys: Vec<ServiceKey> = self
            .services
            .iter()
            .filter(|entry| entry.value().borrow().is_some())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Invokes `callback` once the service is available and again whenever
    /// the serving instance changes.
    ///
    /// Observation stops when the returned handle is dropped.
    pub fn observe<F>(&self, system_type: SystemType, system: &str, mut callback: F) -> Observation
    where
        F: FnMut(String) + Send + 'static,
    {
        let mut receiver = self.receiver(ServiceKey::new(system_type, system));
        let task = tokio::spawn(async move {
            let mut last: Option<String> = None;
            loop {
                let current = receiver.borrow_and_update().clone();
                if let Some(instance) = current {
                    if last.as_ref() != Some(&instance) {
                        last = Some(instance.clone());
                        callback(instance);
                    }
                }
                if receiver.changed().await.is_err() {
                    break;
                }
            }
        });
        Observation { task }
    }

    /// Waits until the service is available.
    ///
    /// Returns the serving instance, or `None` if the wait timed out.
    pub async fn wait_available(
        &self,
        system_type: SystemType,
        system: &str,
        timeout: Duration,
    ) -> Option<String> {
        let mut receiver = self.receiver(ServiceKey::new(system_type, system));
        let wait = async move {
            let instance = match receiver.wait_for(Option::is_some).await {
                Ok(instance) => instance.clone(),
                Err(_) => None,
            };
            instance
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("available", &self.available())
            .finish()
    }
}

/// Handle returned by [`ServiceRegistry::observe`].
#[derive(Debug)]
pub struct Observation {
    task: JoinHandle<()>,
}

impl Drop for Observation {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_advertise_and_withdraw() {
        let registry = ServiceRegistry::new();
        assert!(registry.current(SystemType::Opc, "plant").is_none());

        registry.advertise(SystemType::Opc, "plant", "i1");
        assert_eq!(registry.current(SystemType::Opc, "plant").as_deref(), Some("i1"));

        registry.withdraw(SystemType::Opc, "plant", "other");
        assert!(registry.current(SystemType::Opc, "plant").is_some());

        registry.withdraw(SystemType::Opc, "plant", "i1");
        assert!(registry.current(SystemType::Opc, "plant").is_none());
        assert!(registry.available().is_empty());
    }

    #[tokio::test]
    async fn test_wait_available() {
        let registry = ServiceRegistry::new();
        let waiter = registry.clone();
        let wait = tokio::spawn(async move {
            waiter
                .wait_available(SystemType::Mqtt, "broker", Duration::from_secs(2))
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.advertise(SystemType::Mqtt, "broker", "i1");
        assert_eq!(wait.await.unwrap().as_deref(), Some("i1"));

        let missing = registry
            .wait_available(SystemType::Mqtt, "nothing", Duration::from_millis(10))
            .await;
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_observe_fires_on_change() {
        let registry = ServiceRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let observation = registry.observe(SystemType::Opc, "plant", move |instance| {
            sink.lock().unwrap().push(instance);
        });

        registry.advertise(SystemType::Opc, "plant", "i1");
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.advertise(SystemType::Opc, "plant", "i2");
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(observation);
        registry.advertise(SystemType::Opc, "plant", "i3");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*seen.lock().unwrap(), vec!["i1".to_string(), "i2".to_string()]);
    }
}
