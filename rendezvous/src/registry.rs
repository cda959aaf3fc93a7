//! Endpoint name registry for the rendezvous server
//!
//! This module tracks which peer address currently owns which endpoint name:
//! - Name registration with rejection of names held by another peer
//! - Lookup of a host's address by name for joining peers
//! - Liveness tracking so abandoned rooms expire on their own
//! - Capacity management for the whole namespace
//!
//! Names are opaque to the registry; peers prefix room codes with an
//! application namespace before registering them.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("name '{0}' is already taken")]
    NameTaken(String),
    #[error("registry is full")]
    RegistryFull,
}

/// A registered endpoint and its owner
#[derive(Debug)]
pub struct Registration {
    pub name: String,
    /// Address the host is reachable at
    pub addr: SocketAddr,
    /// Last time we heard from the owner
    pub last_seen: Instant,
}

impl Registration {
    pub fn new(name: String, addr: SocketAddr) -> Self {
        Self {
            name,
            addr,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if the owner has been silent for longer than `ttl`
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.last_seen.elapsed() > ttl
    }
}

/// Owns the namespace of live endpoint names
///
/// A name belongs to exactly one address until it is unregistered or its
/// owner stops refreshing it. Registering a name again from the owning
/// address only refreshes it, so retransmitted requests are harmless.
pub struct Registry {
    entries: HashMap<String, Registration>,
    max_entries: usize,
    ttl: Duration,
}

impl Registry {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
            ttl,
        }
    }

    /// Claims `name` for `addr`
    ///
    /// Fails with `NameTaken` if another live address holds the name. An
    /// expired holder is evicted on the spot.
    pub fn register(&mut self, name: &str, addr: SocketAddr) -> Result<(), RegistryError> {
        if let Some(existing) = self.entries.get_mut(name) {
            if existing.addr == addr {
                existing.touch();
                return Ok(());
            }
            if !existing.is_expired(self.ttl) {
                return Err(RegistryError::NameTaken(name.to_string()));
            }
            info!("Evicting expired registration '{}'", name);
            self.entries.remove(name);
        }

        if self.entries.len() >= self.max_entries {
            return Err(RegistryError::RegistryFull);
        }

        info!("Registered '{}' for {}", name, addr);
        self.entries
            .insert(name.to_string(), Registration::new(name.to_string(), addr));
        Ok(())
    }

    /// Releases `name` if `addr` owns it
    pub fn unregister(&mut self, name: &str, addr: SocketAddr) -> bool {
        match self.entries.get(name) {
            Some(entry) if entry.addr == addr => {
                self.entries.remove(name);
                info!("Unregistered '{}'", name);
                true
            }
            _ => false,
        }
    }

    /// Refreshes the liveness of `name` if `addr` owns it
    pub fn touch(&mut self, name: &str, addr: SocketAddr) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) if entry.addr == addr => {
                entry.touch();
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<SocketAddr> {
        self.entries
            .get(name)
            .filter(|entry| !entry.is_expired(self.ttl))
            .map(|entry| entry.addr)
    }

    /// Removes every registration whose owner went silent
    ///
    /// Returns the names that were dropped.
    pub fn check_timeouts(&mut self) -> Vec<String> {
        let ttl = self.ttl;
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.is_expired(ttl))
            .map(|entry| entry.name.clone())
            .collect();

        for name in &expired {
            self.entries.remove(name);
            info!("Registration '{}' expired", name);
        }

        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    fn registry() -> Registry {
        Registry::new(4, Duration::from_secs(10))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = registry();
        assert!(registry.register("room-A", addr(1000)).is_ok());
        assert_eq!(registry.lookup("room-A"), Some(addr(1000)));
        assert_eq!(registry.lookup("room-B"), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_name_taken_by_other_address() {
        let mut registry = registry();
        registry.register("room-A", addr(1000)).unwrap();

        let result = registry.register("room-A", addr(2000));
        assert_eq!(result, Err(RegistryError::NameTaken("room-A".to_string())));
        assert_eq!(registry.lookup("room-A"), Some(addr(1000)));
    }

    #[test]
    fn test_reregister_from_owner_is_idempotent() {
        let mut registry = registry();
        registry.register("room-A", addr(1000)).unwrap();
        assert!(registry.register("room-A", addr(1000)).is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_capacity_limit() {
        let mut registry = Registry::new(2, Duration::from_secs(10));
        registry.register("a", addr(1)).unwrap();
        registry.register("b", addr(2)).unwrap();
        assert_eq!(registry.register("c", addr(3)), Err(RegistryError::RegistryFull));
    }

    #[test]
    fn test_unregister_requires_owner() {
        let mut registry = registry();
        registry.register("room-A", addr(1000)).unwrap();

        assert!(!registry.unregister("room-A", addr(2000)));
        assert!(registry.unregister("room-A", addr(1000)));
        assert!(registry.is_empty());
        assert!(!registry.unregister("room-A", addr(1000)));
    }

    #[test]
    fn test_touch_requires_owner() {
        let mut registry = registry();
        registry.register("room-A", addr(1000)).unwrap();
        assert!(registry.touch("room-A", addr(1000)));
        assert!(!registry.touch("room-A", addr(2000)));
        assert!(!registry.touch("room-B", addr(1000)));
    }

    #[test]
    fn test_expired_registrations_are_dropped() {
        let mut registry = Registry::new(4, Duration::from_millis(0));
        registry.register("room-A", addr(1000)).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(registry.lookup("room-A"), None);
        assert_eq!(registry.check_timeouts(), vec!["room-A".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_expired_name_can_be_claimed() {
        let mut registry = Registry::new(4, Duration::from_millis(0));
        registry.register("room-A", addr(1000)).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert!(registry.register("room-A", addr(2000)).is_ok());
        // zero ttl expires instantly, so check ownership directly
        assert!(registry.unregister("room-A", addr(2000)));
    }
}
