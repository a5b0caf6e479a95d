//! Publishing specialised stubs
//!
//! Mutator threads run type tests inside a [`MutatorScope`]. Installing new
//! code stops every mutator first; the only write performed while the world
//! is stopped is the one-time publish of the routine into the type's slot.
//! Afterwards the slot is read without synchronization beyond the cell.
//!
//! A mutator that hits a lazy stub hands its scope to
//! [`TypeTestingStubs::type_test_code_from_mutator`], which leaves mutator
//! state for the duration of the stop and re-enters it afterwards.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender};
use dashmap::{DashMap, DashSet};
use once_cell::sync::OnceCell;
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::debug;

use crate::config::StubConfig;
use crate::error::StubError;
use crate::object::{ObjectStore, TypeId};

use super::assembler::StubRoutine;
use super::generator::{default_code_for_type, TypeTestingStubGenerator};
use super::StubCode;

/// How long an installer waits for mutators to reach a stop
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives every newly installed routine
pub trait CodeObserver: Send + Sync {
    /// Called once per published routine, outside the stopped section
    fn on_new_code(&self, name: &str, routine: &StubRoutine);
}

/// [`CodeObserver`] forwarding stub names over a channel
pub struct ChannelObserver {
    sender: Sender<String>,
}

impl ChannelObserver {
    /// Observer plus the receiving end
    pub fn new() -> (Self, Receiver<String>) {
        let (sender, receiver) = crossbeam::channel::unbounded();
        (ChannelObserver { sender }, receiver)
    }
}

impl CodeObserver for ChannelObserver {
    fn on_new_code(&self, name: &str, _routine: &StubRoutine) {
        // A dropped receiver just means nobody listens any more.
        let _ = self.sender.send(name.to_string());
    }
}

/// Running mutator; holds off stop-the-world sections until dropped
pub struct MutatorScope<'a> {
    guard: RwLockReadGuard<'a, ()>,
}

/// Stop-the-world barrier between mutators and code installation
pub struct StopTheWorld {
    lock: RwLock<()>,
    timeout: Duration,
    pauses: AtomicUsize,
}

impl StopTheWorld {
    /// Barrier with the default stop timeout
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_STOP_TIMEOUT)
    }

    /// Barrier giving up when mutators do not stop within `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        StopTheWorld {
            lock: RwLock::new(()),
            timeout,
            pauses: AtomicUsize::new(0),
        }
    }

    /// Enter mutator state; blocks while the world is stopped
    pub fn enter_mutator(&self) -> MutatorScope<'_> {
        MutatorScope {
            guard: self.lock.read(),
        }
    }

    /// Run `f` with every mutator stopped, `None` when they did not stop in time.
    /// The calling thread must not be inside a [`MutatorScope`] of this barrier.
    pub fn run_with_stopped_mutators<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _stopped = self.lock.try_write_for(self.timeout)?;
        self.pauses.fetch_add(1, Ordering::Relaxed);
        Some(f())
    }

    /// [`StopTheWorld::run_with_stopped_mutators`] from a running mutator:
    /// `scope` is left while the world is stopped and re-entered before
    /// returning.
    pub fn run_from_mutator<R>(&self, scope: &mut MutatorScope<'_>, f: impl FnOnce() -> R) -> Option<R> {
        if !std::ptr::eq(RwLockReadGuard::rwlock(&scope.guard), &self.lock) {
            return self.run_with_stopped_mutators(f);
        }
        RwLockReadGuard::unlocked(&mut scope.guard, || self.run_with_stopped_mutators(f))
    }

    /// Number of completed stop-the-world sections
    pub fn pause_count(&self) -> usize {
        self.pauses.load(Ordering::Relaxed)
    }
}

impl Default for StopTheWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-type stub slots of one isolate group
pub struct TypeTestingStubs {
    config: StubConfig,
    slots: DashMap<TypeId, Arc<OnceCell<Arc<StubRoutine>>>>,
    /// Types the specializer gave up on
    unspecializable: DashSet<TypeId>,
    observers: RwLock<Vec<Arc<dyn CodeObserver>>>,
    world: StopTheWorld,
}

impl TypeTestingStubs {
    /// Empty table
    pub fn new(config: StubConfig) -> Self {
        Self::with_world(config, StopTheWorld::new())
    }

    /// Table installing through `world`
    pub fn with_world(config: StubConfig, world: StopTheWorld) -> Self {
        TypeTestingStubs {
            config,
            slots: DashMap::new(),
            unspecializable: DashSet::new(),
            observers: RwLock::new(Vec::new()),
            world,
        }
    }

    /// Barrier used for installation
    pub fn world(&self) -> &StopTheWorld {
        &self.world
    }

    /// Register a code observer
    pub fn add_observer(&self, observer: Arc<dyn CodeObserver>) {
        self.observers.write().push(observer);
    }

    /// Code currently attached to `ty`
    pub fn stub_for(&self, store: &ObjectStore, ty: TypeId) -> StubCode {
        if let Some(routine) = self.slots.get(&ty).and_then(|cell| cell.get().cloned()) {
            return StubCode::Specialized(routine);
        }
        if self.unspecializable.contains(&ty) {
            return StubCode::DefaultTypeTest;
        }
        default_code_for_type(store, ty, &self.config, self.config.lazy_specialize)
    }

    /// Code to run a type test against `ty` with: a type still on the lazy
    /// stub is specialised now
    pub fn type_test_code(&self, generator: &TypeTestingStubGenerator<'_>, ty: TypeId) -> Result<StubCode, StubError> {
        match self.stub_for(generator.store(), ty) {
            StubCode::LazySpecializeTypeTest => self.specialize(generator, ty, None),
            code => Ok(code),
        }
    }

    /// [`TypeTestingStubs::type_test_code`] for a thread inside `scope`
    pub fn type_test_code_from_mutator(
        &self,
        generator: &TypeTestingStubGenerator<'_>,
        ty: TypeId,
        scope: &mut MutatorScope<'_>,
    ) -> Result<StubCode, StubError> {
        match self.stub_for(generator.store(), ty) {
            StubCode::LazySpecializeTypeTest => self.specialize(generator, ty, Some(scope)),
            code => Ok(code),
        }
    }

    /// Build the optimized code for `ty` and publish it when it is a routine
    pub fn specialize_stub_for(&self, generator: &TypeTestingStubGenerator<'_>, ty: TypeId) -> Result<StubCode, StubError> {
        self.specialize(generator, ty, None)
    }

    fn specialize(
        &self,
        generator: &TypeTestingStubGenerator<'_>,
        ty: TypeId,
        scope: Option<&mut MutatorScope<'_>>,
    ) -> Result<StubCode, StubError> {
        match generator.optimized_code_for_type(ty) {
            StubCode::Specialized(routine) => self.publish(routine, scope).map(StubCode::Specialized),
            StubCode::DefaultTypeTest => {
                if self.unspecializable.insert(ty) {
                    debug!(target: "kilt::stubs", ty = ty.0, "type stays on the default type test");
                }
                Ok(StubCode::DefaultTypeTest)
            }
            code => Ok(code),
        }
    }

    /// Publish `routine` for its type. The first routine wins; later ones are
    /// dropped and the published one is returned.
    pub fn install(&self, routine: Arc<StubRoutine>) -> Result<Arc<StubRoutine>, StubError> {
        self.publish(routine, None)
    }

    /// [`TypeTestingStubs::install`] for a thread inside `scope`
    pub fn install_from_mutator(
        &self,
        routine: Arc<StubRoutine>,
        scope: &mut MutatorScope<'_>,
    ) -> Result<Arc<StubRoutine>, StubError> {
        self.publish(routine, Some(scope))
    }

    fn publish(&self, routine: Arc<StubRoutine>, scope: Option<&mut MutatorScope<'_>>) -> Result<Arc<StubRoutine>, StubError> {
        let ty = routine.ty();
        if routine.size() > self.config.max_stub_bytes {
            return Err(StubError::TooLarge {
                ty,
                limit: self.config.max_stub_bytes,
            });
        }
        let cell = self.slots.entry(ty).or_default().clone();
        let set = || cell.set(routine.clone()).is_ok();
        let published = match scope {
            Some(scope) => self.world.run_from_mutator(scope, set),
            None => self.world.run_with_stopped_mutators(set),
        }
        .ok_or_else(|| StubError::InstallFailed {
            ty,
            reason: "mutators did not stop".to_string(),
        })?;
        let current = cell.get().cloned().ok_or_else(|| StubError::InstallFailed {
            ty,
            reason: "slot is empty after publish".to_string(),
        })?;
        if published {
            debug!(target: "kilt::stubs", stub = routine.name(), "installed type testing stub");
            for observer in self.observers.read().iter() {
                observer.on_new_code(routine.name(), &routine);
            }
        }
        Ok(current)
    }

    /// Drop every specialised routine; types fall back to their default code.
    /// Returns the number of routines dropped.
    pub fn reset_to_default(&self) -> Result<usize, StubError> {
        self.world
            .run_with_stopped_mutators(|| {
                let count = self.slots.iter().filter(|slot| slot.value().get().is_some()).count();
                self.slots.clear();
                count
            })
            .map(|count| {
                debug!(target: "kilt::stubs", count, "reset type testing stubs");
                count
            })
            .ok_or_else(|| StubError::InstallFailed {
                ty: TypeId::default(),
                reason: "mutators did not stop for reset".to_string(),
            })
    }

    /// Number of types with a published routine
    pub fn num_specialized(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value().get().is_some()).count()
    }
}
