use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::{channel::Channel, timer::TimeoutScheduler};

/// How long a lone write or read waits for its counterpart.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a channel may go unaddressed before it is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1800);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    pub operation_timeout: Duration,
    /// Zero disables inactivity eviction.
    pub idle_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

struct Entry {
    channel: Channel,
    idle: Mutex<TimeoutScheduler>,
}

impl Entry {
    fn retire(self) {
        self.idle.into_inner().cancel();
        self.channel.close();
    }
}

struct Shared {
    config: RegistryConfig,
    channels: RwLock<HashMap<Arc<str>, Entry>>,
}

/// Thread-safe name → channel mapping with inactivity eviction.
///
/// The map lock is only held for lookups and insert/remove; pairing happens
/// under each channel's own lock. When both are needed the map lock is taken
/// first.
#[derive(Clone)]
pub struct ChannelRegistry {
    shared: Arc<Shared>,
}

impl ChannelRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    /// Create a channel, generating a name when none (or an empty one) is given.
    ///
    /// A live channel already registered under `name` is closed first, so its
    /// waiting operation sees `Closed` before the new channel can be reached.
    pub fn create(&self, name: Option<&str>) -> Channel {
        let mut channels = self.shared.channels.write();

        let name: Arc<str> = match name.filter(|name| !name.is_empty()) {
            Some(name) => Arc::from(name),
            None => loop {
                let candidate = generate_name();
                if !channels.contains_key(candidate.as_str()) {
                    break Arc::from(candidate);
                }
            },
        };

        if let Some(stale) = channels.remove(&name) {
            info!(channel = %name, "replacing existing channel");
            stale.retire();
        }

        let channel = Channel::new(name.clone(), self.shared.config.operation_timeout);
        let mut idle = TimeoutScheduler::new();
        if !self.shared.config.idle_timeout.is_zero() {
            idle.arm(self.shared.config.idle_timeout, self.evict_later(&channel));
        }
        channels.insert(
            name.clone(),
            Entry {
                channel: channel.clone(),
                idle: Mutex::new(idle),
            },
        );

        info!(channel = %name, "created channel");
        channel
    }

    /// Look a channel up by name and mark it as recently used.
    pub fn get(&self, name: &str) -> Option<Channel> {
        let channels = self.shared.channels.read();
        let entry = channels.get(name)?;
        if !self.shared.config.idle_timeout.is_zero() {
            entry
                .idle
                .lock()
                .rearm(self.shared.config.idle_timeout, self.evict_later(&entry.channel));
        }
        Some(entry.channel.clone())
    }

    /// Remove and close a channel. Returns `false` if the name is unknown.
    pub fn close(&self, name: &str) -> bool {
        let removed = self.shared.channels.write().remove(name);
        match removed {
            Some(entry) => {
                entry.retire();
                true
            }
            None => false,
        }
    }

    /// Close every channel. Returns how many were closed.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<Entry> = self
            .shared
            .channels
            .write()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        let count = drained.len();
        for entry in drained {
            entry.retire();
        }
        info!(count, "registry shut down");
        count
    }

    pub fn len(&self) -> usize {
        self.shared.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.channels.read().is_empty()
    }

    /// Names of all registered channels (for debugging).
    pub fn names(&self) -> Vec<String> {
        self.shared
            .channels
            .read()
            .keys()
            .map(|name| name.to_string())
            .collect()
    }

    fn evict_later(&self, channel: &Channel) -> impl FnOnce() + Send + 'static {
        let registry: Weak<Shared> = Arc::downgrade(&self.shared);
        let channel = channel.clone();
        move || {
            if let Some(shared) = registry.upgrade() {
                ChannelRegistry { shared }.evict(&channel);
            }
        }
    }

    /// Drop `channel` if it is still the one registered under its name.
    fn evict(&self, channel: &Channel) {
        let mut channels = self.shared.channels.write();
        let current = channels
            .get(channel.name())
            .is_some_and(|entry| Channel::same(&entry.channel, channel));
        if !current {
            debug!(channel = %channel.name(), "stale eviction ignored");
            return;
        }
        if let Some(entry) = channels.remove(channel.name()) {
            info!(channel = %channel.name(), "evicting idle channel");
            entry.retire();
        }
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("config", &self.shared.config)
            .field("channels", &self.len())
            .finish()
    }
}

fn generate_name() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
