//! Delegate resolution and library lifecycle
//!
//! `DelegateResolver` turns a `NativeDelegateDefinition` into a cached,
//! reusable `DelegateHandle` and reference-counts library loads:
//!
//! - equal definitions share one cached handle
//! - a library is loaded at most once per resolver, however many functions
//!   are resolved from it
//! - releasing the last handle of a library unloads it exactly once
//!
//! Cache, leases and loader calls are serialized by one lock per resolver.

use crate::caller::{CallError, FfiSignatureMapper, Invoker, MappingError, SignatureMapper};
use crate::loader::{LibraryHandle, LibraryLoader, LoadError};
use crate::types::NativeDelegateDefinition;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, trace};

static NEXT_RESOLVER_ID: AtomicU64 = AtomicU64::new(1);

/// Resolution errors
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to load library '{library}'")]
    LibraryLoad {
        library: String,
        #[source]
        source: LoadError,
    },

    #[error("symbol '{symbol}' not found in library '{library}'")]
    SymbolNotFound {
        library: String,
        symbol: String,
        #[source]
        source: LoadError,
    },

    #[error("signature mapping failed: {0}")]
    SignatureMapping(#[from] MappingError),

    #[error("delegate {0} was not issued by this resolver or was already released")]
    UnknownHandle(DelegateId),
}

/// Identity of one cached entry: issuing resolver + serial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelegateId {
    resolver: u64,
    serial: u64,
}

impl fmt::Display for DelegateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.resolver, self.serial)
    }
}

struct HandleInner {
    id: DelegateId,
    invoker: Arc<dyn Invoker>,
    released: AtomicBool,
}

/// Invocable handle bound to one resolved native function
///
/// Clones share identity; two handles are equal iff they refer to the same
/// cached entry. A released handle refuses further calls.
#[derive(Clone)]
pub struct DelegateHandle {
    inner: Arc<HandleInner>,
}

impl DelegateHandle {
    fn new(id: DelegateId, invoker: Arc<dyn Invoker>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                invoker,
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> DelegateId {
        self.inner.id
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Call the native function with already-processed values
    pub fn invoke(&self, args: &[Value]) -> Result<Value, CallError> {
        if self.is_released() {
            return Err(CallError::Released(self.inner.id));
        }
        self.inner.invoker.invoke(args)
    }

    fn mark_released(&self) {
        self.inner.released.store(true, Ordering::Release);
    }
}

impl PartialEq for DelegateHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for DelegateHandle {}

impl fmt::Debug for DelegateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateHandle")
            .field("id", &self.inner.id)
            .field("released", &self.is_released())
            .finish()
    }
}

struct CachedEntry {
    definition: NativeDelegateDefinition,
    handle: DelegateHandle,
    library: LibraryHandle,
}

struct LibraryLease {
    handle: LibraryHandle,
    reference_count: usize,
}

#[derive(Default)]
struct ResolverState {
    by_definition: HashMap<NativeDelegateDefinition, DelegateId>,
    entries: HashMap<DelegateId, CachedEntry>,
    leases: HashMap<String, LibraryLease>,
    next_serial: u64,
}

/// Resolves native delegates and owns the library leases behind them
pub struct DelegateResolver {
    id: u64,
    loader: Arc<dyn LibraryLoader>,
    mapper: Arc<dyn SignatureMapper>,
    state: Mutex<ResolverState>,
}

impl DelegateResolver {
    pub fn new(loader: Arc<dyn LibraryLoader>, mapper: Arc<dyn SignatureMapper>) -> Self {
        Self {
            id: NEXT_RESOLVER_ID.fetch_add(1, Ordering::Relaxed),
            loader,
            mapper,
            state: Mutex::new(ResolverState::default()),
        }
    }

    /// Create a resolver that maps signatures with libffi
    pub fn with_loader(loader: Arc<dyn LibraryLoader>) -> Self {
        Self::new(loader, Arc::new(FfiSignatureMapper::new()))
    }

    fn lock(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a definition to a handle, reusing the cached one when an equal
    /// definition was resolved before
    ///
    /// On failure the cache and leases are left as they were; a library loaded
    /// by this call is unloaded again.
    pub fn resolve(
        &self,
        definition: &NativeDelegateDefinition,
    ) -> Result<DelegateHandle, ResolveError> {
        let mut state = self.lock();

        if let Some(entry) = state
            .by_definition
            .get(definition)
            .and_then(|id| state.entries.get(id))
        {
            trace!(%definition, id = %entry.handle.id(), "delegate cache hit");
            return Ok(entry.handle.clone());
        }

        let library_name = &definition.library_name;
        let (library, freshly_loaded) = match state.leases.get(library_name) {
            Some(lease) => (lease.handle, false),
            None => {
                let handle =
                    self.loader
                        .load(library_name)
                        .map_err(|source| ResolveError::LibraryLoad {
                            library: library_name.clone(),
                            source,
                        })?;
                debug!(library = %library_name, %handle, "library loaded");
                (handle, true)
            }
        };

        let invoker = match self.build_invoker(definition, library) {
            Ok(invoker) => invoker,
            Err(err) => {
                if freshly_loaded {
                    debug!(library = %library_name, %library, "unloading library after failed resolve");
                    self.loader.unload(library);
                }
                return Err(err);
            }
        };

        state.next_serial += 1;
        let id = DelegateId {
            resolver: self.id,
            serial: state.next_serial,
        };
        let handle = DelegateHandle::new(id, invoker);

        state
            .leases
            .entry(library_name.clone())
            .or_insert(LibraryLease {
                handle: library,
                reference_count: 0,
            })
            .reference_count += 1;
        state.by_definition.insert(definition.clone(), id);
        state.entries.insert(
            id,
            CachedEntry {
                definition: definition.clone(),
                handle: handle.clone(),
                library,
            },
        );

        debug!(%definition, %id, "delegate resolved");
        Ok(handle)
    }

    fn build_invoker(
        &self,
        definition: &NativeDelegateDefinition,
        library: LibraryHandle,
    ) -> Result<Arc<dyn Invoker>, ResolveError> {
        let address = self
            .loader
            .lookup_symbol(library, &definition.function_name)
            .map_err(|source| ResolveError::SymbolNotFound {
                library: definition.library_name.clone(),
                symbol: definition.function_name.clone(),
                source,
            })?;
        trace!(symbol = %definition.function_name, %address, "symbol found");

        Ok(self.mapper.map(&definition.signature, address)?)
    }

    /// Release a handle issued by this resolver
    ///
    /// The library is unloaded when its last handle is released. Releasing a
    /// handle twice, or one from another resolver, is an `UnknownHandle` error.
    pub fn release(&self, handle: &DelegateHandle) -> Result<(), ResolveError> {
        let id = handle.id();
        if id.resolver != self.id {
            return Err(ResolveError::UnknownHandle(id));
        }

        let mut state = self.lock();
        let entry = state
            .entries
            .remove(&id)
            .ok_or(ResolveError::UnknownHandle(id))?;
        self.release_entry(&mut state, entry);
        Ok(())
    }

    fn release_entry(&self, state: &mut ResolverState, entry: CachedEntry) {
        state.by_definition.remove(&entry.definition);
        entry.handle.mark_released();
        trace!(id = %entry.handle.id(), "delegate released");

        let library_name = &entry.definition.library_name;
        let Some(lease) = state.leases.get_mut(library_name) else {
            return;
        };
        lease.reference_count = lease.reference_count.saturating_sub(1);
        if lease.reference_count == 0 {
            state.leases.remove(library_name);
            debug!(library = %library_name, handle = %entry.library, "unloading library");
            self.loader.unload(entry.library);
        }
    }

    /// Release every outstanding handle and clear all state
    ///
    /// Safe to call repeatedly; also runs on drop.
    pub fn dispose(&self) {
        let mut state = self.lock();
        let ids: Vec<DelegateId> = state.entries.keys().copied().collect();
        for id in ids {
            if let Some(entry) = state.entries.remove(&id) {
                self.release_entry(&mut state, entry);
            }
        }
        let next_serial = state.next_serial;
        *state = ResolverState {
            next_serial,
            ..ResolverState::default()
        };
    }

    /// Number of cached handles
    pub fn cached_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Number of libraries currently held by a lease
    pub fn loaded_library_count(&self) -> usize {
        self.lock().leases.len()
    }

    /// Reference count of a library's lease, if it is loaded
    pub fn lease_count(&self, library_name: &str) -> Option<usize> {
        self.lock()
            .leases
            .get(library_name)
            .map(|lease| lease.reference_count)
    }
}

impl Drop for DelegateResolver {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for DelegateResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("DelegateResolver")
            .field("id", &self.id)
            .field("cached", &state.entries.len())
            .field("libraries", &state.leases.len())
            .finish()
    }
}
