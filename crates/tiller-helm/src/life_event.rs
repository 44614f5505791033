//! Spawn, death, and abort records for behaviors.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Spawn string recorded for behaviors created from the startup config.
pub const STARTUP_SPAWN: &str = "helm_startup";

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

define_id! {
    /// Unique identifier for a life event.
    EventId
}

/// What happened to the behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifeEventKind {
    /// Created and added to the registry.
    Spawn,
    /// Removed after completing.
    Death,
    /// Rejected before it was ever added.
    Abort,
}

/// One entry in a behavior's life history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifeEvent {
    /// Unique event id.
    pub id: EventId,
    /// Time of the event, in seconds.
    pub time: f64,
    /// Tick number.
    pub iteration: u64,
    /// Behavior name, or the requested name for an abort.
    pub behavior: String,
    /// Behavior kind.
    pub kind: String,
    /// What happened.
    pub event: LifeEventKind,
    /// The string that requested the spawn, or why it was aborted.
    pub spawn_string: String,
}

impl LifeEvent {
    /// New event stamped with a fresh id.
    pub fn new(
        time: f64,
        iteration: u64,
        behavior: &str,
        kind: &str,
        event: LifeEventKind,
        spawn_string: &str,
    ) -> Self {
        Self {
            id: EventId::new(),
            time,
            iteration,
            behavior: behavior.to_owned(),
            kind: kind.to_owned(),
            event,
            spawn_string: spawn_string.to_owned(),
        }
    }
}

/// Bounded history of life events. The oldest entries drop out first.
#[derive(Debug, Clone)]
pub struct LifeEventLog {
    capacity: usize,
    events: VecDeque<LifeEvent>,
    total: u64,
}

impl LifeEventLog {
    /// Log keeping at most `capacity` events (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
            total: 0,
        }
    }

    /// Append an event, dropping the oldest if full.
    pub fn push(&mut self, event: LifeEvent) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
        self.total = self.total.saturating_add(1);
    }

    /// Events kept, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &LifeEvent> {
        self.events.iter()
    }

    /// Number of events kept.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events are kept.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events ever pushed, including dropped ones.
    pub const fn total(&self) -> u64 {
        self.total
    }
}
