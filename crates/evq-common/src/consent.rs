//! Tracking consent and its change notifications.
//!
//! Consent is held by an explicit [`ConsentProvider`] that is handed to every
//! component that routes data on it. Components register as
//! [`ConsentSubscriber`]s and are told about every transition, in order.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// User's tracking consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingConsent {
    /// Data is collected into the unauthorized area until consent is decided.
    Pending,
    /// Data is collected and uploaded.
    Granted,
    /// Nothing is collected; pending data is discarded.
    NotGranted,
}

impl TrackingConsent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingConsent::Pending => "pending",
            TrackingConsent::Granted => "granted",
            TrackingConsent::NotGranted => "not_granted",
        }
    }
}

impl std::fmt::Display for TrackingConsent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrackingConsent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TrackingConsent::Pending),
            "granted" => Ok(TrackingConsent::Granted),
            "not_granted" | "notgranted" | "not-granted" => Ok(TrackingConsent::NotGranted),
            _ => Err(format!("unknown tracking consent: {}", s)),
        }
    }
}

/// Receives consent transitions.
///
/// Called synchronously from [`ConsentProvider::change_consent`] while the
/// provider is locked, so implementations must not call back into the
/// provider. Implementations typically enqueue work on their own lane.
pub trait ConsentSubscriber: Send + Sync {
    fn consent_changed(&self, previous: TrackingConsent, current: TrackingConsent);
}

/// Holds the current consent and broadcasts changes to subscribers.
///
/// Subscribers are held weakly: dropping the last strong reference to a
/// subscriber unsubscribes it.
pub struct ConsentProvider {
    current: Mutex<TrackingConsent>,
    subscribers: Mutex<Vec<Weak<dyn ConsentSubscriber>>>,
}

impl ConsentProvider {
    pub fn new(initial: TrackingConsent) -> Self {
        Self {
            current: Mutex::new(initial),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Current consent value.
    pub fn current(&self) -> TrackingConsent {
        *lock(&self.current)
    }

    /// Register a subscriber for future transitions and return the consent
    /// in effect at registration.
    pub fn subscribe(&self, subscriber: &Arc<dyn ConsentSubscriber>) -> TrackingConsent {
        let current = lock(&self.current);
        self.register(subscriber);
        *current
    }

    /// Build a subscriber from the consent in effect and register it, with
    /// no transition able to run in between.
    ///
    /// `make` runs with the provider locked and must not call back into it.
    pub fn subscribe_with<S, F>(&self, make: F) -> Arc<S>
    where
        S: ConsentSubscriber + 'static,
        F: FnOnce(TrackingConsent) -> Arc<S>,
    {
        let current = lock(&self.current);
        let subscriber = make(*current);
        let erased: Arc<dyn ConsentSubscriber> = subscriber.clone();
        self.register(&erased);
        subscriber
    }

    fn register(&self, subscriber: &Arc<dyn ConsentSubscriber>) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|s| s.strong_count() > 0);
        subscribers.push(Arc::downgrade(subscriber));
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers)
            .iter()
            .filter(|s| s.strong_count() > 0)
            .count()
    }

    /// Update consent and notify subscribers. Setting the same value again
    /// is a no-op.
    pub fn change_consent(&self, new: TrackingConsent) {
        let mut current = lock(&self.current);
        let previous = *current;
        if previous == new {
            return;
        }
        *current = new;
        debug!(previous = %previous, current = %new, "tracking consent changed");

        // Notify while still holding `current` so concurrent transitions
        // reach every subscriber in the same order.
        let subscribers: Vec<_> = {
            let mut subscribers = lock(&self.subscribers);
            subscribers.retain(|s| s.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for subscriber in subscribers {
            subscriber.consent_changed(previous, new);
        }
    }
}

impl std::fmt::Debug for ConsentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentProvider")
            .field("current", &self.current())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
