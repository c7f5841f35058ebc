//! Unmanaged memory tracking
//!
//! `PointerMemoryManager` records every native allocation the pipeline hands to
//! native code and frees it when its pointer-management mode says so: right
//! after the call, on an explicit sweep, or never.
//!
//! Allocations are tagged with the innermost open named block (scope) at
//! registration time. Closing a block does not free anything; a closed block
//! stays sweepable by name.

use crate::value::Address;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

/// Releases one native allocation
pub type FreeAction = Arc<dyn Fn(Address) + Send + Sync>;

/// Produces one native allocation of the requested size (null on failure)
pub type AllocateAction = Arc<dyn Fn(usize) -> Address + Send + Sync>;

/// When a pipeline-created native allocation is freed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerManagementMode {
    /// The caller owns the memory; never freed automatically
    DoNotDestroy,
    /// Freed as soon as the call that produced it completes
    #[default]
    DestroyAfterCall,
    /// Freed by an explicit sweep
    DestroyOnGarbageCollect,
}

impl PointerManagementMode {
    pub fn name(&self) -> &'static str {
        match self {
            PointerManagementMode::DoNotDestroy => "do-not-destroy",
            PointerManagementMode::DestroyAfterCall => "destroy-after-call",
            PointerManagementMode::DestroyOnGarbageCollect => "destroy-on-garbage-collect",
        }
    }
}

impl fmt::Display for PointerManagementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PointerManagementMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "do-not-destroy" => Ok(PointerManagementMode::DoNotDestroy),
            "destroy-after-call" => Ok(PointerManagementMode::DestroyAfterCall),
            "destroy-on-garbage-collect" => Ok(PointerManagementMode::DestroyOnGarbageCollect),
            other => Err(format!("unknown pointer management mode '{}'", other)),
        }
    }
}

/// Lifecycle of a named block
///
/// A closed block returns to `Unopened` once it has been swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Unopened,
    Open,
    Closed,
}

/// Allocate with the C allocator
pub fn allocate_unmanaged(size: usize) -> Address {
    Address::from_ptr(unsafe { libc::malloc(size.max(1)) })
}

/// Free with the C allocator
pub fn free_unmanaged(address: Address) {
    unsafe { libc::free(address.as_ptr()) }
}

struct TrackedAllocation {
    free_action: FreeAction,
    scope: Option<String>,
}

#[derive(Default)]
struct MemoryState {
    allocations: HashMap<Address, TrackedAllocation>,
    open_blocks: Vec<String>,
    closed_blocks: HashSet<String>,
}

impl MemoryState {
    fn take_matching(
        &mut self,
        mut matches: impl FnMut(&TrackedAllocation) -> bool,
    ) -> Vec<(Address, FreeAction)> {
        let addresses: Vec<Address> = self
            .allocations
            .iter()
            .filter(|(_, tracked)| matches(tracked))
            .map(|(address, _)| *address)
            .collect();

        addresses
            .into_iter()
            .filter_map(|address| {
                self.allocations
                    .remove(&address)
                    .map(|tracked| (address, tracked.free_action))
            })
            .collect()
    }
}

/// Tracks unmanaged allocations grouped by named block
///
/// All state sits behind one lock; free actions always run after the
/// allocation has been untracked and after the lock is released, so an
/// address is freed at most once.
pub struct PointerMemoryManager {
    state: Mutex<MemoryState>,
    allocate: AllocateAction,
    free: FreeAction,
}

impl PointerMemoryManager {
    /// Create a manager using `malloc`/`free`
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(allocate_unmanaged), Arc::new(free_unmanaged))
    }

    /// Create a manager with custom allocation primitives
    pub fn with_allocator(allocate: AllocateAction, free: FreeAction) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            allocate,
            free,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate `size` bytes with this manager's allocator
    ///
    /// The allocation is not tracked; register or report it afterwards.
    pub fn allocate(&self, size: usize) -> Option<Address> {
        let address = (self.allocate)(size);
        trace!(size, %address, "allocated unmanaged memory");
        (!address.is_null()).then_some(address)
    }

    /// The free primitive paired with `allocate`
    pub fn default_free_action(&self) -> FreeAction {
        Arc::clone(&self.free)
    }

    /// Open a named block; it becomes the current block
    pub fn begin_named_block(&self, name: impl Into<String>) {
        let name = name.into();
        debug!(block = %name, "begin named block");
        self.lock().open_blocks.push(name);
    }

    /// Close the current block without freeing its allocations
    ///
    /// Returns the closed block's name, or `None` if no block was open.
    pub fn end_named_block(&self) -> Option<String> {
        let mut state = self.lock();
        let Some(name) = state.open_blocks.pop() else {
            warn!("end_named_block called with no open block");
            return None;
        };
        if !state.open_blocks.contains(&name) {
            state.closed_blocks.insert(name.clone());
        }
        debug!(block = %name, "end named block");
        Some(name)
    }

    /// Name of the innermost open block
    pub fn current_block(&self) -> Option<String> {
        self.lock().open_blocks.last().cloned()
    }

    pub fn scope_state(&self, name: &str) -> ScopeState {
        let state = self.lock();
        if state.open_blocks.iter().any(|open| open == name) {
            ScopeState::Open
        } else if state.closed_blocks.contains(name) {
            ScopeState::Closed
        } else {
            ScopeState::Unopened
        }
    }

    /// Track `address` in the current block with the default free action
    pub fn register_for_garbage_collection(&self, address: Address) {
        self.register_with(address, self.default_free_action());
    }

    /// Track `address` in the current block
    ///
    /// Registering a tracked address again replaces its block and free action.
    pub fn register_with(&self, address: Address, free_action: FreeAction) {
        let mut state = self.lock();
        let scope = state.open_blocks.last().cloned();
        trace!(%address, block = ?scope, "registered for garbage collection");
        state
            .allocations
            .insert(address, TrackedAllocation { free_action, scope });
    }

    /// Apply `mode` to an address whose call has completed
    ///
    /// - `DestroyAfterCall`: untrack and free now
    /// - `DoNotDestroy`: nothing
    /// - `DestroyOnGarbageCollect`: track it unless it already is
    pub fn report_pointer_call_completed(
        &self,
        address: Address,
        mode: PointerManagementMode,
        free_action: FreeAction,
    ) {
        match mode {
            PointerManagementMode::DoNotDestroy => {}
            PointerManagementMode::DestroyAfterCall => {
                let tracked = self.lock().allocations.remove(&address);
                let action = tracked.map(|t| t.free_action).unwrap_or(free_action);
                trace!(%address, "freeing after call");
                action(address);
            }
            PointerManagementMode::DestroyOnGarbageCollect => {
                let mut state = self.lock();
                if !state.allocations.contains_key(&address) {
                    let scope = state.open_blocks.last().cloned();
                    trace!(%address, block = ?scope, "deferred until garbage collection");
                    state
                        .allocations
                        .insert(address, TrackedAllocation { free_action, scope });
                }
            }
        }
    }

    /// Free every tracked allocation
    pub fn garbage_collect_all(&self) -> usize {
        let taken = {
            let mut state = self.lock();
            state.closed_blocks.clear();
            state.take_matching(|_| true)
        };
        debug!(count = taken.len(), "garbage collect all");
        Self::run_free_actions(taken)
    }

    /// Free the allocations tagged with `block_name`
    ///
    /// A closed block is forgotten once swept.
    pub fn garbage_collect_named(&self, block_name: &str) -> usize {
        let taken = {
            let mut state = self.lock();
            state.closed_blocks.remove(block_name);
            state.take_matching(|tracked| tracked.scope.as_deref() == Some(block_name))
        };
        debug!(block = block_name, count = taken.len(), "garbage collect named block");
        Self::run_free_actions(taken)
    }

    /// Free the allocations of the current block; no-op if none is open
    pub fn garbage_collect_current_block(&self) -> usize {
        match self.current_block() {
            Some(name) => self.garbage_collect_named(&name),
            None => 0,
        }
    }

    fn run_free_actions(taken: Vec<(Address, FreeAction)>) -> usize {
        let count = taken.len();
        for (address, action) in taken {
            action(address);
        }
        count
    }

    pub fn has_garbage_collectible_memory(&self) -> bool {
        !self.lock().allocations.is_empty()
    }

    pub fn has_unnamed_garbage_collectible_memory(&self) -> bool {
        self.lock()
            .allocations
            .values()
            .any(|tracked| tracked.scope.is_none())
    }

    /// Names of blocks with outstanding allocations, sorted
    pub fn named_blocks_with_garbage_collectible_memory(&self) -> Vec<String> {
        self.lock()
            .allocations
            .values()
            .filter_map(|tracked| tracked.scope.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn outstanding_count(&self) -> usize {
        self.lock().allocations.len()
    }

    pub fn is_tracked(&self, address: Address) -> bool {
        self.lock().allocations.contains_key(&address)
    }
}

impl Default for PointerMemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PointerMemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("PointerMemoryManager")
            .field("outstanding", &state.allocations.len())
            .field("open_blocks", &state.open_blocks)
            .finish()
    }
}
