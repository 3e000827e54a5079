//! The C ABI surface a plugin's `__shadow_plugin_init__` is handed, and the surface it hands back
//! (§4.11). A true C variadic registration call (`register(ptr, size, ptr, size, ..., NULL)`) has
//! no stable Rust equivalent, so `register_globals` takes the equivalent fixed-shape array instead
//! — same information, one FFI call.

use std::ffi::{c_char, c_void};

/// One `(pointer, size)` pair, as the plugin hands them to `register_globals`.
#[repr(C)]
pub struct GlobalRegionFfi {
    pub pointer: *mut c_void,
    pub size: usize,
}

/// Kernel services handed to the plugin's init routine (§4.11: "a registration function, a log
/// function, name/IP resolution, getters for my hostname/IP, and a deferred-callback scheduler").
#[repr(C)]
#[derive(Clone, Copy)]
pub struct KernelServices {
    pub register_globals: unsafe extern "C" fn(count: usize, pairs: *const GlobalRegionFfi),
    pub log: unsafe extern "C" fn(level: i32, message: *const c_char),
    /// Resolves a hostname to an IPv4 address in network byte order; `0` means no such name.
    pub resolve_name: unsafe extern "C" fn(name: *const c_char) -> u32,
    pub my_hostname: unsafe extern "C" fn() -> *const c_char,
    pub my_ip: unsafe extern "C" fn() -> u32,
    pub schedule_callback: unsafe extern "C" fn(after_nanos: u64, data: *mut c_void),
}

/// What the plugin exposes back: new-instance, free-instance, socket-readable, socket-writable
/// (§4.11), plus the entry point a deferred `schedule_callback` fires into, since nothing else in
/// this table names a generic "run later" hook.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PluginVTable {
    pub new_instance: unsafe extern "C" fn(argc: i32, argv: *const *const c_char) -> *mut c_void,
    pub free_instance: unsafe extern "C" fn(instance: *mut c_void),
    pub socket_readable: unsafe extern "C" fn(instance: *mut c_void, fd: u32),
    pub socket_writable: unsafe extern "C" fn(instance: *mut c_void, fd: u32),
    pub run_callback: unsafe extern "C" fn(instance: *mut c_void, data: *mut c_void),
}
