//! The Connector's config map: typed entries, validation, and per-key
//! change observers that run after the new value is already visible to
//! readers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use fabric_errors::{error_args, Error};
use fabric_wire::ConfigEntry;

use crate::deployment::DeploymentMode;

/// A per-key change callback. Receives a handle back into the store (so it
/// can read the just-applied value, or any other key) and the key that
/// changed.
pub type Observer = Arc<dyn Fn(ConfigStore, String) + Send + Sync>;

struct Inner {
    entries: RwLock<HashMap<String, ConfigEntry>>,
    observers: RwLock<HashMap<String, Vec<Observer>>>,
}

/// Cheaply cloneable handle to one Connector's config map.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<Inner>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        ConfigStore::new()
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        ConfigStore {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                observers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Registers a config entry (its validation rule and default). Intended
    /// to be called during `Init`, before Startup.
    pub fn define(&self, entry: ConfigEntry) {
        self.inner
            .entries
            .write()
            .unwrap()
            .insert(entry.name.clone(), entry);
    }

    /// Registers a callback invoked, on a spawned task, every time `name`
    /// changes. Several observers on the same key all run, in registration
    /// order.
    pub fn on_changed(&self, name: &str, observer: Observer) {
        self.inner
            .observers
            .write()
            .unwrap()
            .entry(name.to_owned())
            .or_default()
            .push(observer);
    }

    pub fn value(&self, name: &str) -> Result<String, Error> {
        self.inner
            .entries
            .read()
            .unwrap()
            .get(name)
            .map(|e| e.value().to_owned())
            .ok_or_else(|| Error::new(format!("unknown config key {name}"), error_args![404i32]))
    }

    pub fn as_bool(&self, name: &str) -> Result<bool, Error> {
        self.with_entry(name, ConfigEntry::as_bool)
    }

    pub fn as_int(&self, name: &str) -> Result<i64, Error> {
        self.with_entry(name, ConfigEntry::as_int)
    }

    pub fn as_duration(&self, name: &str) -> Result<Duration, Error> {
        self.with_entry(name, ConfigEntry::as_duration)
    }

    fn with_entry<T>(&self, name: &str, f: impl FnOnce(&ConfigEntry) -> Result<T, Error>) -> Result<T, Error> {
        let entries = self.inner.entries.read().unwrap();
        let entry = entries
            .get(name)
            .ok_or_else(|| Error::new(format!("unknown config key {name}"), error_args![404i32]))?;
        f(entry)
    }

    /// Validates and applies a new value for `name`, gated by deployment
    /// mode, then fires any registered observers on a spawned task.
    pub fn set(&self, name: &str, value: impl Into<String>, deployment: DeploymentMode) -> Result<(), Error> {
        if !deployment.allows_set_config() {
            return Err(Error::new(
                format!("set_config({name}) forbidden in {deployment:?}"),
                error_args![403i32],
            ));
        }
        let value = value.into();
        {
            let mut entries = self.inner.entries.write().unwrap();
            let entry = entries.get_mut(name).ok_or_else(|| {
                Error::new(format!("unknown config key {name}"), error_args![404i32])
            })?;
            entry.set(value)?;
        }
        let observers = self
            .inner
            .observers
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default();
        if !observers.is_empty() {
            let store = self.clone();
            let key = name.to_owned();
            tokio::spawn(async move {
                for observer in observers {
                    observer(store.clone(), key.clone());
                }
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use fabric_wire::config::ValidationRule;

    use super::*;

    #[tokio::test]
    async fn set_in_local_updates_value_before_observer_runs() {
        let store = ConfigStore::new();
        store.define(ConfigEntry::new("Port", ValidationRule::parse("int"), "25"));
        let seen = Arc::new(AtomicBool::new(false));
        let seen2 = seen.clone();
        store.on_changed(
            "Port",
            Arc::new(move |store, _key| {
                assert_eq!(store.value("Port").unwrap(), "2525");
                seen2.store(true, Ordering::SeqCst);
            }),
        );
        store.set("Port", "2525", DeploymentMode::Local).unwrap();
        assert_eq!(store.value("Port").unwrap(), "2525");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn set_in_prod_is_forbidden_and_does_not_mutate() {
        let store = ConfigStore::new();
        store.define(ConfigEntry::new("Port", ValidationRule::parse("int"), "25"));
        let err = store.set("Port", "2525", DeploymentMode::Prod).unwrap_err();
        assert_eq!(err.status(), 403);
        assert_eq!(store.value("Port").unwrap(), "25");
    }

    #[test]
    fn set_unknown_key_is_an_error() {
        let store = ConfigStore::new();
        assert!(store.set("Nope", "x", DeploymentMode::Local).is_err());
    }
}
