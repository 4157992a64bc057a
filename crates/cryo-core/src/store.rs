//! Reactive variable store.
//!
//! The store caches the single latest value of each tracked quantity and
//! fans change notifications out to subscribers without knowing who they
//! are or keeping them alive.
//!
//! Two subscription styles are offered:
//!
//! - [`Variable::subscribe`] returns a `tokio::sync::watch` receiver for
//!   await-style consumers (GUI bridges, loggers that poll for changes).
//! - [`Variable::listen`] registers a callback held only by a [`Weak`]
//!   reference. The registration returns a [`Subscription`] handle for
//!   explicit removal; a callback whose owner has been dropped is simply
//!   skipped and lazily pruned at the next write.
//!
//! Callback delivery goes through the [`Dispatcher`], one detached job per
//! live listener per change, so a slow subscriber never blocks the
//! measurement path. No ordering is guaranteed between deliveries.
//!
//! The store's shape is fixed at construction: every [`VariableId`] is
//! registered in [`Store::new`] and none are added or removed afterwards.
//! Each variable synchronizes independently; there is no store-wide lock.

use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::dispatch::Dispatcher;
use crate::quantity::{Quantity, Unit};

/// Callback invoked with the new value after a change.
pub type Listener<T> = dyn Fn(T) + Send + Sync;

/// Handle returned by [`Variable::listen`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// A named slot holding the latest value of one measured or controlled
/// quantity.
pub struct Variable<T>
where
    T: Clone + Send + Sync + 'static,
{
    name: &'static str,
    sender: watch::Sender<T>,
    listeners: Mutex<HashMap<u64, Weak<Listener<T>>>>,
    next_id: AtomicU64,
    dispatcher: Dispatcher,
}

impl<T> Variable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new(name: &'static str, initial: T, dispatcher: Dispatcher) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            name,
            sender,
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            dispatcher,
        }
    }

    /// The variable's name, used in notification task labels.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The last value written. Never blocks.
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Store a new value and notify every live subscriber exactly once.
    ///
    /// Watch receivers see the value immediately; callback listeners are
    /// each handed one detached dispatch job. Listeners whose owner has
    /// been dropped are pruned here rather than eagerly on drop.
    pub fn set(&self, value: T) {
        self.sender.send_replace(value.clone());

        let live: Vec<Arc<Listener<T>>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|_, weak| weak.strong_count() > 0);
            listeners.values().filter_map(Weak::upgrade).collect()
        };

        for listener in live {
            let value = value.clone();
            let label = format!("notify:{}", self.name);
            self.dispatcher.submit_detached(label, async move {
                (*listener)(value);
                Ok(())
            });
        }
    }

    /// Subscribe as a watch receiver; resolves whenever the value changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    /// Register a callback by non-owning reference.
    ///
    /// The variable holds only a [`Weak`]; the caller keeps the `Arc` alive
    /// for as long as it wants notifications. Dropping the `Arc` is
    /// equivalent to (but less deterministic than) [`Variable::unlisten`].
    pub fn listen(&self, callback: &Arc<Listener<T>>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, Arc::downgrade(callback));
        Subscription(id)
    }

    /// Remove a previously registered callback.
    pub fn unlisten(&self, subscription: Subscription) {
        self.listeners.lock().remove(&subscription.0);
    }

    /// Number of registrations whose owner is still alive.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl<T> std::fmt::Debug for Variable<T>
where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variable")
            .field("name", &self.name)
            .field("value", &*self.sender.borrow())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

/// Identifiers for the store's fixed variable set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableId {
    Current,
    MagneticField,
    LiquidHeliumLevel,
    LiquidNitrogenLevel,
    UpperSweepCurrent,
    LowerSweepCurrent,
    LoggingInterval,
    OutputDirectory,
}

impl VariableId {
    fn name(&self) -> &'static str {
        match self {
            VariableId::Current => "current",
            VariableId::MagneticField => "magnetic_field",
            VariableId::LiquidHeliumLevel => "liquid_helium_level",
            VariableId::LiquidNitrogenLevel => "liquid_nitrogen_level",
            VariableId::UpperSweepCurrent => "upper_sweep_current",
            VariableId::LowerSweepCurrent => "lower_sweep_current",
            VariableId::LoggingInterval => "logging_interval",
            VariableId::OutputDirectory => "output_directory",
        }
    }
}

/// Immutable-shape mapping from [`VariableId`] to its [`Variable`].
///
/// Populated entirely at construction; lives for the process lifetime.
/// Variables are type-erased internally and recovered by downcast, so the
/// store can hold quantities next to the logging interval and output
/// directory.
pub struct Store {
    variables: HashMap<VariableId, Box<dyn Any + Send + Sync>>,
}

impl Store {
    /// Build the store with every variable seeded to its sentinel.
    ///
    /// Measured quantities start as NaN tagged with their expected unit;
    /// the logging interval and output directory start from their
    /// conventional defaults and are overwritten by the daemon's config.
    pub fn new(dispatcher: &Dispatcher) -> Self {
        let mut variables: HashMap<VariableId, Box<dyn Any + Send + Sync>> = HashMap::new();

        let quantity_slots = [
            (VariableId::Current, Unit::Ampere),
            (VariableId::MagneticField, Unit::Gauss),
            (VariableId::LiquidHeliumLevel, Unit::Centimeter),
            (VariableId::LiquidNitrogenLevel, Unit::Centimeter),
            (VariableId::UpperSweepCurrent, Unit::Ampere),
            (VariableId::LowerSweepCurrent, Unit::Ampere),
        ];
        for (id, unit) in quantity_slots {
            variables.insert(
                id,
                Box::new(Variable::new(
                    id.name(),
                    Quantity::unknown(unit),
                    dispatcher.clone(),
                )),
            );
        }

        variables.insert(
            VariableId::LoggingInterval,
            Box::new(Variable::new(
                VariableId::LoggingInterval.name(),
                Duration::from_secs(10),
                dispatcher.clone(),
            )),
        );
        variables.insert(
            VariableId::OutputDirectory,
            Box::new(Variable::new(
                VariableId::OutputDirectory.name(),
                PathBuf::from("."),
                dispatcher.clone(),
            )),
        );

        Self { variables }
    }

    /// Look up a variable by id and value type.
    ///
    /// Returns `None` only if `T` does not match the slot's type; every
    /// [`VariableId`] itself is always registered.
    pub fn try_variable<T>(&self, id: VariableId) -> Option<&Variable<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.variables
            .get(&id)
            .and_then(|slot| slot.downcast_ref::<Variable<T>>())
    }

    /// Look up a variable, panicking on a type mismatch.
    ///
    /// The store's shape is fixed, so a mismatch is a programming error on
    /// par with an unregistered id.
    #[allow(clippy::panic)]
    pub fn variable<T>(&self, id: VariableId) -> &Variable<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        match self.try_variable::<T>(id) {
            Some(variable) => variable,
            None => panic!(
                "store variable {:?} does not hold a {}",
                id,
                std::any::type_name::<T>()
            ),
        }
    }

    /// Shorthand for the measured-quantity slots.
    pub fn quantity(&self, id: VariableId) -> &Variable<Quantity> {
        self.variable::<Quantity>(id)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("variables", &self.variables.len())
            .finish()
    }
}
