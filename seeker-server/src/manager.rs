//! Type-parameterized registries of component proxies.
//!
//! A [`ComponentManager`] stores every connected proxy of one kind, walks
//! new arrivals through the intrinsics handshake (interface-version policing
//! and duplicate-name resolution), hands exclusive proxy sets to activities,
//! and fans registry changes out to subscribers. A proxy counts as
//! registered only once its intrinsics pass the version check; subscribers
//! receive notifications over a broadcast channel, never under the registry
//! lock.

use std::fmt;

use dashmap::DashMap;
use seeker_contracts::{ComponentContract, ComponentError};
use seeker_model::ActivityId;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::proxy::{ComponentProxy, ManagedProxy, ProxyLifecycle};

/// What to do when a second proxy registers under an already-taken name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateNamePolicy {
    /// Disconnect the incoming proxy and keep the registered one.
    #[default]
    RejectNew,
    /// Disconnect every previously registered proxy with the name and
    /// accept the new one.
    DiscardOld,
}

/// Exclusive-use marker for bulk allocation by activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AllocState {
    Free,
    Allocated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegState {
    /// Socket is up; intrinsics not yet accepted.
    Pending,
    Registered,
}

#[derive(Debug, Clone)]
struct Entry<P> {
    proxy: P,
    alloc: AllocState,
    reg: RegState,
}

/// Registry change notifications delivered to subscribers.
#[derive(Debug, Clone)]
pub enum ManagerNotice {
    Registered { name: String },
    Unregistered { name: String },
    StatusChanged { name: String },
    IntrinsicsReceived { name: String },
    ComponentMessage {
        name: String,
        activity_id: ActivityId,
        error: ComponentError,
    },
}

const NOTICE_CHANNEL_CAPACITY: usize = 256;

/// Thread-safe registry of proxies of one component kind.
pub struct ComponentManager<P: ManagedProxy> {
    manager_name: String,
    duplicate_policy: DuplicateNamePolicy,
    components: DashMap<u64, Entry<P>>,
    publisher: broadcast::Sender<ManagerNotice>,
}

impl<P: ManagedProxy> fmt::Debug for ComponentManager<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentManager")
            .field("manager_name", &self.manager_name)
            .field("duplicate_policy", &self.duplicate_policy)
            .field("registered", &self.number_of_proxies())
            .finish()
    }
}

impl<P: ManagedProxy> ComponentManager<P> {
    pub fn new(manager_name: impl Into<String>, duplicate_policy: DuplicateNamePolicy) -> Self {
        let (publisher, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        Self {
            manager_name: manager_name.into(),
            duplicate_policy,
            components: DashMap::new(),
            publisher,
        }
    }

    pub fn manager_name(&self) -> &str {
        &self.manager_name
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerNotice> {
        self.publisher.subscribe()
    }

    fn notify(&self, notice: ManagerNotice) {
        // No subscribers is fine; notices are advisory.
        let _ = self.publisher.send(notice);
    }

    /// Registered proxies only; arrivals still in the handshake don't
    /// count.
    pub fn number_of_proxies(&self) -> usize {
        self.components
            .iter()
            .filter(|entry| entry.value().reg == RegState::Registered)
            .count()
    }

    /// Names of all registered proxies, whitespace separated.
    pub fn names_of_proxies(&self) -> String {
        let mut names: Vec<String> = self
            .components
            .iter()
            .filter(|entry| entry.value().reg == RegState::Registered)
            .map(|entry| entry.value().proxy.name())
            .collect();
        names.sort();
        names.join(" ")
    }

    /// Store a freshly connected proxy and start its intrinsics handshake.
    /// Registration completes (and subscribers hear about it) only when
    /// acceptable intrinsics arrive.
    pub async fn register_proxy(&self, proxy: P) {
        let inner = proxy.inner().clone();
        info!(
            manager = %self.manager_name,
            host = %inner.remote_host(),
            "component connected; requesting intrinsics"
        );

        self.components.insert(
            inner.id(),
            Entry {
                proxy: proxy.clone(),
                alloc: AllocState::Free,
                reg: RegState::Pending,
            },
        );

        if let Err(err) = proxy.request_intrinsics().await {
            warn!(manager = %self.manager_name, %err, "intrinsics request failed");
        }
    }

    /// Remove a proxy that has gone away and tell the subscribers.
    pub fn unregister_proxy(&self, proxy: &P) {
        let inner = proxy.inner();
        if let Some((_, entry)) = self.components.remove(&inner.id()) {
            info!(
                manager = %self.manager_name,
                component = %inner.name(),
                host = %inner.remote_host(),
                "unregistering component"
            );
            if entry.reg == RegState::Registered {
                self.notify(ManagerNotice::Unregistered { name: inner.name() });
            }
        }
    }

    /// All registered proxies regardless of allocation state.
    pub fn proxy_list(&self) -> Vec<P> {
        let mut list: Vec<P> = self
            .components
            .iter()
            .filter(|entry| entry.value().reg == RegState::Registered)
            .map(|entry| entry.value().proxy.clone())
            .collect();
        list.sort_by_key(|p| p.name());
        list
    }

    pub fn find_by_name(&self, name: &str) -> Option<P> {
        self.components
            .iter()
            .find(|entry| {
                entry.value().reg == RegState::Registered && entry.value().proxy.name() == name
            })
            .map(|entry| entry.value().proxy.clone())
    }

    /// Hand every free registered proxy to the caller, marking them
    /// allocated.
    pub fn allocate_proxy_list(&self) -> Vec<P> {
        let mut allocated = Vec::new();
        for mut entry in self.components.iter_mut() {
            let entry = entry.value_mut();
            if entry.reg == RegState::Registered && entry.alloc == AllocState::Free {
                entry.alloc = AllocState::Allocated;
                allocated.push(entry.proxy.clone());
            }
        }
        allocated.sort_by_key(|p| p.name());
        allocated
    }

    /// Return previously allocated proxies to the free pool. A proxy that
    /// disappeared mid-activity is not an error here.
    pub fn release_proxy_list(&self, proxies: &[P]) {
        for proxy in proxies {
            match self.components.get_mut(&proxy.inner().id()) {
                Some(mut entry) => {
                    entry.value_mut().alloc = AllocState::Free;
                }
                None => {
                    warn!(
                        manager = %self.manager_name,
                        component = %proxy.name(),
                        "released proxy not found; it likely disconnected"
                    );
                }
            }
        }
    }

    fn name_already_registered(&self, checking: &ComponentProxy) -> bool {
        let name = checking.name();
        self.components.iter().any(|entry| {
            let entry = entry.value();
            entry.reg == RegState::Registered
                && entry.proxy.inner().id() != checking.id()
                && entry.proxy.name() == name
        })
    }

    async fn reject_proxy(&self, inner: &ComponentProxy, was_registered: bool) {
        self.components.remove(&inner.id());
        inner.shutdown().await;
        inner.reset_socket().await;
        if was_registered {
            self.notify(ManagerNotice::Unregistered { name: inner.name() });
        }
    }

    /// A proxy delivered its intrinsics: police the interface version,
    /// resolve duplicate names, then complete registration and ask for a
    /// first status report.
    pub async fn receive_intrinsics(&self, inner: &ComponentProxy) {
        if !inner.valid_interface_version() {
            error!(
                manager = %self.manager_name,
                component = %inner.name(),
                "invalid interface version; disconnecting component"
            );
            self.reject_proxy(inner, false).await;
            return;
        }

        if self.name_already_registered(inner) {
            match self.duplicate_policy {
                DuplicateNamePolicy::RejectNew => {
                    error!(
                        manager = %self.manager_name,
                        component = %inner.name(),
                        "duplicate component name; disconnecting new component"
                    );
                    self.reject_proxy(inner, false).await;
                    return;
                }
                DuplicateNamePolicy::DiscardOld => {
                    error!(
                        manager = %self.manager_name,
                        component = %inner.name(),
                        "duplicate component name; disconnecting old component"
                    );
                    let name = inner.name();
                    let stale: Vec<P> = self
                        .components
                        .iter()
                        .filter(|entry| {
                            let entry = entry.value();
                            entry.proxy.inner().id() != inner.id()
                                && entry.proxy.name() == name
                        })
                        .map(|entry| entry.value().proxy.clone())
                        .collect();
                    for old in stale {
                        self.reject_proxy(old.inner(), true).await;
                    }
                }
            }
        }

        if let Some(mut entry) = self.components.get_mut(&inner.id()) {
            entry.value_mut().reg = RegState::Registered;
        } else {
            // Disconnected between handshake steps; nothing to finish.
            return;
        }
        inner.set_lifecycle(ProxyLifecycle::Registered);

        info!(
            manager = %self.manager_name,
            component = %inner.name(),
            host = %inner.remote_host(),
            "registered component"
        );

        if let Err(err) = inner.request_status().await {
            warn!(manager = %self.manager_name, %err, "status request failed");
        }

        self.notify(ManagerNotice::Registered { name: inner.name() });
        self.notify(ManagerNotice::IntrinsicsReceived { name: inner.name() });
    }

    /// A proxy refreshed its cached status.
    pub fn notify_status_changed(&self, inner: &ComponentProxy) {
        self.notify(ManagerNotice::StatusChanged { name: inner.name() });
    }

    /// A component reported an error or informational message; log it and
    /// fan it out. The attached activity receives it separately through the
    /// proxy's event path.
    pub fn process_component_message(
        &self,
        inner: &ComponentProxy,
        component_error: &ComponentError,
        activity_id: ActivityId,
    ) {
        warn!(
            manager = %self.manager_name,
            component = %inner.name(),
            activity = %activity_id,
            severity = ?component_error.severity,
            code = component_error.code,
            "{}",
            component_error.text
        );
        self.notify(ManagerNotice::ComponentMessage {
            name: inner.name(),
            activity_id,
            error: component_error.clone(),
        });
    }

    pub fn set_verbose(&self, verbose: bool) {
        for entry in self.components.iter() {
            entry.value().proxy.inner().set_verbose(verbose);
        }
    }
}
