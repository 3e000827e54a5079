//! Plug-in isolation (§4.11).
//!
//! A plugin is a shared library loaded once per simulation. Its init routine registers every
//! global variable the kernel must isolate per host; from then on, every call the kernel makes
//! into the library on behalf of host `H` is wrapped in a "switch-in" (copy `H`'s private snapshot
//! over the library's live globals) and a "switch-out" (copy the live globals back into `H`'s
//! snapshot afterward). This gives each host the illusion of running its own instance of the
//! library while only one copy of its code and read-only data is ever mapped.

mod state;
mod vtable;

use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr, CString};
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use thiserror::Error;

use sim_net::HostId;
use state::{GlobalRegion, Snapshot};
pub use vtable::{GlobalRegionFfi, KernelServices, PluginVTable};

const INIT_SYMBOL: &[u8] = b"__shadow_plugin_init__\0";

type PluginInitFn = unsafe extern "C" fn(services: *const KernelServices) -> PluginVTable;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to load plugin library at {path}: {source}")]
    Load { path: PathBuf, #[source] source: libloading::Error },
    #[error("plugin at {path} is missing its entry symbol `__shadow_plugin_init__`")]
    MissingEntrySymbol { path: PathBuf, #[source] source: libloading::Error },
    #[error("plugin at {0} did not register any global state before its init routine returned")]
    NotRegistered(PathBuf),
    #[error("no snapshot registered for host {0}; call Plugin::register_host first")]
    UnknownHost(HostId),
}

/// Per-host hooks a plugin's kernel-service calls are routed to while that host is switched in.
/// `sim-scheduler` implements this to bridge the plugin's C ABI calls into the engine.
pub trait HostServices {
    fn log(&mut self, level: log::Level, message: &str);
    fn resolve_name(&mut self, name: &str) -> Option<std::net::Ipv4Addr>;
    fn my_hostname(&self) -> String;
    fn my_ip(&self) -> std::net::Ipv4Addr;
    fn schedule_callback(&mut self, after: sim_time::SimulationTime, data: *mut c_void);
}

thread_local! {
    /// The host currently switched in, for the trampoline shims below to route through.
    static ACTIVE: Cell<*mut dyn HostServices> = Cell::new(std::ptr::null_mut());
    static PENDING_REGISTRATION: std::cell::RefCell<Vec<GlobalRegion>> =
        const { std::cell::RefCell::new(Vec::new()) };
}

unsafe extern "C" fn shim_register_globals(count: usize, pairs: *const GlobalRegionFfi) {
    let slice = std::slice::from_raw_parts(pairs, count);
    PENDING_REGISTRATION.with(|cell| {
        let mut pending = cell.borrow_mut();
        for pair in slice {
            pending.push(GlobalRegion {
                pointer: pair.pointer as *mut u8,
                size: pair.size,
            });
        }
    });
}

unsafe extern "C" fn shim_log(level: i32, message: *const c_char) {
    let level = match level {
        1 => log::Level::Error,
        2 => log::Level::Warn,
        3 => log::Level::Info,
        4 => log::Level::Debug,
        _ => log::Level::Trace,
    };
    let message = CStr::from_ptr(message).to_string_lossy().into_owned();
    with_active(|services| services.log(level, &message));
}

unsafe extern "C" fn shim_resolve_name(name: *const c_char) -> u32 {
    let name = CStr::from_ptr(name).to_string_lossy();
    with_active(|services| services.resolve_name(&name))
        .flatten()
        .map(u32::from)
        .unwrap_or(0)
}

unsafe extern "C" fn shim_my_hostname() -> *const c_char {
    // Leaked deliberately: the plugin owns this pointer for the remainder of the call, and the
    // kernel services table is only ever consulted from within a switched-in call.
    thread_local!(static SCRATCH: std::cell::RefCell<Option<CString>> = const { std::cell::RefCell::new(None) });
    let hostname = with_active(|services| services.my_hostname()).unwrap_or_default();
    let cstring = CString::new(hostname).unwrap_or_default();
    let ptr = cstring.as_ptr();
    SCRATCH.with(|cell| *cell.borrow_mut() = Some(cstring));
    ptr
}

unsafe extern "C" fn shim_my_ip() -> u32 {
    with_active(|services| u32::from(services.my_ip())).unwrap_or(0)
}

unsafe extern "C" fn shim_schedule_callback(after_nanos: u64, data: *mut c_void) {
    with_active(|services| {
        services.schedule_callback(sim_time::SimulationTime::from_nanos(after_nanos), data)
    });
}

fn with_active<R>(f: impl FnOnce(&mut dyn HostServices) -> R) -> Option<R> {
    ACTIVE.with(|cell| {
        let ptr = cell.get();
        if ptr.is_null() {
            return None;
        }
        // Safety: non-null only while a `switch_in` guard further up the call stack is alive, and
        // that guard is the sole owner of the reference for the duration.
        Some(f(unsafe { &mut *ptr }))
    })
}

/// A loaded plugin library and the isolation bookkeeping for every host that uses it.
pub struct Plugin {
    path: PathBuf,
    // Kept alive for the process's lifetime: a host might still be mid-call in this library, so
    // the kernel never dlcloses it.
    _library: Library,
    vtable: PluginVTable,
    regions: Vec<GlobalRegion>,
    default_snapshot: Snapshot,
    host_snapshots: HashMap<HostId, Snapshot>,
}

impl Plugin {
    /// Load the shared library at `path`, call its init routine, and capture the default snapshot
    /// of whatever globals it registers.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PluginError> {
        let path = path.as_ref().to_path_buf();
        let library = unsafe { Library::new(&path) }.map_err(|source| PluginError::Load { path: path.clone(), source })?;
        let init: Symbol<PluginInitFn> = unsafe { library.get(INIT_SYMBOL) }
            .map_err(|source| PluginError::MissingEntrySymbol { path: path.clone(), source })?;

        let services = KernelServices {
            register_globals: shim_register_globals,
            log: shim_log,
            resolve_name: shim_resolve_name,
            my_hostname: shim_my_hostname,
            my_ip: shim_my_ip,
            schedule_callback: shim_schedule_callback,
        };

        PENDING_REGISTRATION.with(|cell| cell.borrow_mut().clear());
        let vtable = unsafe { init(&services as *const KernelServices) };
        let regions = PENDING_REGISTRATION.with(|cell| cell.borrow_mut().split_off(0));
        if regions.is_empty() {
            return Err(PluginError::NotRegistered(path));
        }

        // Safety: the regions the plugin just registered point at its own, just-initialized
        // static data, which is valid to read right now.
        let default_snapshot = unsafe { Snapshot::capture(&regions) };

        Ok(Self {
            path,
            _library: library,
            vtable,
            regions,
            default_snapshot,
            host_snapshots: HashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Give `host` its own private copy of the default snapshot, so it can start calling into the
    /// plugin. Idempotent: re-registering an already-known host is a no-op.
    pub fn register_host(&mut self, host: HostId) {
        self.host_snapshots.entry(host).or_insert_with(|| self.default_snapshot.clone());
    }

    /// Switch `host`'s snapshot into the plugin's live globals, run `f` with the plugin's function
    /// table and the active services trampoline installed, then switch the (possibly mutated)
    /// globals back out (§4.11).
    fn with_host<R>(
        &mut self,
        host: HostId,
        services: &mut dyn HostServices,
        f: impl FnOnce(&PluginVTable) -> R,
    ) -> Result<R, PluginError> {
        let snapshot = self.host_snapshots.get_mut(&host).ok_or(PluginError::UnknownHost(host))?;

        // Safety: `self.regions` point into this plugin's live static data, valid for the process
        // lifetime; no other host's call can be in progress concurrently on this plugin (the
        // engine serializes plugin calls per library the same way it serializes per host).
        unsafe { snapshot.restore_into_live(&self.regions) };

        let previous = ACTIVE.with(|cell| cell.replace(services as *mut dyn HostServices));
        let result = f(&self.vtable);
        ACTIVE.with(|cell| cell.set(previous));

        let snapshot = self.host_snapshots.get_mut(&host).expect("checked above");
        unsafe { snapshot.update_from_live(&self.regions) };

        Ok(result)
    }

    pub fn new_instance(
        &mut self,
        host: HostId,
        services: &mut dyn HostServices,
        args: &[String],
    ) -> Result<*mut c_void, PluginError> {
        let cargs: Vec<CString> = args.iter().map(|a| CString::new(a.as_str()).unwrap_or_default()).collect();
        let argv: Vec<*const c_char> = cargs.iter().map(|c| c.as_ptr()).collect();
        self.with_host(host, services, |vtable| unsafe { (vtable.new_instance)(argv.len() as i32, argv.as_ptr()) })
    }

    pub fn free_instance(
        &mut self,
        host: HostId,
        services: &mut dyn HostServices,
        instance: *mut c_void,
    ) -> Result<(), PluginError> {
        self.with_host(host, services, |vtable| unsafe { (vtable.free_instance)(instance) })
    }

    pub fn socket_readable(
        &mut self,
        host: HostId,
        services: &mut dyn HostServices,
        instance: *mut c_void,
        fd: u32,
    ) -> Result<(), PluginError> {
        self.with_host(host, services, |vtable| unsafe { (vtable.socket_readable)(instance, fd) })
    }

    pub fn socket_writable(
        &mut self,
        host: HostId,
        services: &mut dyn HostServices,
        instance: *mut c_void,
        fd: u32,
    ) -> Result<(), PluginError> {
        self.with_host(host, services, |vtable| unsafe { (vtable.socket_writable)(instance, fd) })
    }

    /// Invoked when a callback this instance scheduled via `schedule_callback` comes due.
    pub fn run_callback(
        &mut self,
        host: HostId,
        services: &mut dyn HostServices,
        instance: *mut c_void,
        data: *mut c_void,
    ) -> Result<(), PluginError> {
        self.with_host(host, services, |vtable| unsafe { (vtable.run_callback)(instance, data) })
    }
}
