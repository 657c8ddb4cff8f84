//! CLAP plugin host: instantiation and parameter access.

use std::ffi::{CStr, CString, c_char, c_void};
use std::sync::Arc;

use clap_sys::events::{
    CLAP_CORE_EVENT_SPACE_ID, CLAP_EVENT_PARAM_VALUE, clap_event_header, clap_event_param_value,
    clap_input_events, clap_output_events,
};
use clap_sys::ext::log::{
    CLAP_EXT_LOG, CLAP_LOG_DEBUG, CLAP_LOG_ERROR, CLAP_LOG_FATAL, CLAP_LOG_HOST_MISBEHAVING,
    CLAP_LOG_INFO, CLAP_LOG_PLUGIN_MISBEHAVING, CLAP_LOG_WARNING, clap_host_log,
    clap_log_severity,
};
use clap_sys::ext::params::{
    CLAP_EXT_PARAMS, clap_host_params, clap_param_clear_flags, clap_param_info,
    clap_param_rescan_flags, clap_plugin_params,
};
use clap_sys::ext::thread_check::{CLAP_EXT_THREAD_CHECK, clap_host_thread_check};
use clap_sys::host::clap_host;
use clap_sys::id::clap_id;
use clap_sys::plugin::clap_plugin;
use clap_sys::version::clap_version;
use parking_lot::Mutex;

use super::module::ClapModule;
use crate::plugin::backend::PluginInstance;
use crate::plugin::ffi::read_cstr;
use crate::plugin::types::*;
use crate::plugin::InstantiationError;

#[derive(Debug, Clone)]
struct ClapParam {
    id: u32,
    name: String,
    group: String,
    min: f64,
    max: f64,
}

/// A live CLAP plugin instance.
///
/// Construction is staged: whatever succeeded before a failure is torn down
/// by `Drop`, in reverse order.
pub struct ClapPluginInstance {
    display_name: String,
    plugin_id: String,
    plugin: *const clap_plugin,
    initialized: bool,
    activated: bool,
    params_ext: *const clap_plugin_params,
    params: Vec<ClapParam>,
    /// Must outlive `plugin`; the plugin keeps a pointer to it.
    _host_box: Box<clap_host>,
    _module: Arc<ClapModule>,
}

impl ClapPluginInstance {
    /// Create, init and activate the plugin `descriptor.uid` from `module`.
    pub fn new(
        module: Arc<ClapModule>,
        descriptor: &PluginDescriptor,
        config: &HostAudioConfig,
    ) -> Result<Self, InstantiationError> {
        let plugin_id = descriptor.uid.as_str();
        let fail = |what: &str| {
            log::error!("CLAP: {} failed for {}", what, descriptor.name);
            InstantiationError::new(format!(
                "CLAP: {} failed for {} ({})",
                what, descriptor.name, plugin_id
            ))
        };

        let factory = module.factory().ok_or_else(|| fail("get_factory"))?;
        let create_plugin = factory.create_plugin.ok_or_else(|| fail("create_plugin"))?;
        let c_id = CString::new(plugin_id).map_err(|_| fail("plugin id conversion"))?;

        let host_box = Box::new(clap_host {
            clap_version: clap_version {
                major: 1,
                minor: 2,
                revision: 2,
            },
            host_data: std::ptr::null_mut(),
            name: c"plugstress".as_ptr(),
            vendor: c"plugstress".as_ptr(),
            url: c"".as_ptr(),
            version: c"0.1.0".as_ptr(),
            get_extension: Some(host_get_extension),
            request_restart: Some(host_request_restart),
            request_process: Some(host_request_process),
            request_callback: Some(host_request_callback),
        });

        let plugin = unsafe { create_plugin(factory, &*host_box, c_id.as_ptr()) };
        if plugin.is_null() {
            return Err(fail("create_plugin"));
        }

        let mut inst = Self {
            display_name: descriptor.name.clone(),
            plugin_id: plugin_id.to_string(),
            plugin,
            initialized: false,
            activated: false,
            params_ext: std::ptr::null(),
            params: Vec::new(),
            _host_box: host_box,
            _module: module,
        };

        unsafe {
            let plugin_ref = &*plugin;

            if let Some(init_fn) = plugin_ref.init {
                if !init_fn(plugin) {
                    return Err(fail("init"));
                }
            }
            inst.initialized = true;

            if let Some(get_ext) = plugin_ref.get_extension {
                let ext = get_ext(plugin, CLAP_EXT_PARAMS.as_ptr());
                if !ext.is_null() {
                    inst.params_ext = ext as *const clap_plugin_params;
                }
            }
            inst.params = inst.query_parameters();

            if let Some(activate) = plugin_ref.activate {
                if !activate(plugin, config.sample_rate, 1, config.block_size) {
                    return Err(fail("activate"));
                }
            }
            inst.activated = true;
        }

        log::debug!(
            "CLAP: {} ready with {} parameters",
            inst.plugin_id,
            inst.params.len()
        );
        Ok(inst)
    }

    fn query_parameters(&self) -> Vec<ClapParam> {
        let mut params = Vec::new();
        let Some(pe) = self.params_ext() else {
            return params;
        };
        unsafe {
            let (Some(count_fn), Some(get_info)) = (pe.count, pe.get_info) else {
                return params;
            };
            let n = count_fn(self.plugin);
            for idx in 0..n {
                let mut info: clap_param_info = std::mem::zeroed();
                if !get_info(self.plugin, idx, &mut info) {
                    continue;
                }
                params.push(ClapParam {
                    id: info.id,
                    name: read_cstr(&info.name),
                    group: read_cstr(&info.module),
                    min: info.min_value,
                    max: info.max_value,
                });
            }
        }
        params
    }

    fn params_ext(&self) -> Option<&clap_plugin_params> {
        if self.params_ext.is_null() {
            None
        } else {
            Some(unsafe { &*self.params_ext })
        }
    }

    fn param(&self, id: u32) -> Option<&ClapParam> {
        self.params.iter().find(|p| p.id == id)
    }
}

impl PluginInstance for ClapPluginInstance {
    fn name(&self) -> &str {
        &self.display_name
    }

    fn parameters(&self) -> Vec<ParameterNode> {
        self.params
            .iter()
            .map(|p| ParameterNode {
                id: p.id,
                name: p.name.clone(),
                group: p.group.clone(),
                value: self.parameter_value(p.id).unwrap_or(0.0),
            })
            .collect()
    }

    fn parameter_value(&self, id: u32) -> Option<f64> {
        let param = self.param(id)?;
        let get_value = self.params_ext()?.get_value?;
        let mut value = 0.0;
        if unsafe { get_value(self.plugin, id, &mut value) } {
            Some(normalize(value, param.min, param.max))
        } else {
            None
        }
    }

    fn set_parameter_value(&mut self, id: u32, value: f64) {
        let Some(param) = self.param(id) else {
            return;
        };
        let Some(flush) = self.params_ext().and_then(|pe| pe.flush) else {
            log::debug!("CLAP: {} has no params.flush", self.plugin_id);
            return;
        };

        let events = [param_value_event(id, denormalize(value, param.min, param.max))];
        let in_events_data = InputEventsData { events: &events };
        let in_events = clap_input_events {
            ctx: &in_events_data as *const InputEventsData as *mut c_void,
            size: Some(input_events_size),
            get: Some(input_events_get),
        };
        let out_events = clap_output_events {
            ctx: std::ptr::null_mut(),
            try_push: Some(output_events_try_push),
        };

        // An active plugin expects flush on its audio thread; nothing is
        // processing, so this thread stands in for it.
        let _audio = AudioThreadScope::enter();
        unsafe { flush(self.plugin, &in_events, &out_events) };
    }
}

impl Drop for ClapPluginInstance {
    fn drop(&mut self) {
        unsafe {
            let plugin_ref = &*self.plugin;
            if self.activated {
                if let Some(deactivate) = plugin_ref.deactivate {
                    deactivate(self.plugin);
                }
            }
            // destroy is valid after a failed init too
            if let Some(destroy) = plugin_ref.destroy {
                destroy(self.plugin);
            }
        }
        log::debug!(
            "CLAP: released {} (initialized: {})",
            self.plugin_id,
            self.initialized
        );
    }
}

fn param_value_event(param_id: clap_id, value: f64) -> clap_event_param_value {
    clap_event_param_value {
        header: clap_event_header {
            size: std::mem::size_of::<clap_event_param_value>() as u32,
            time: 0,
            space_id: CLAP_CORE_EVENT_SPACE_ID,
            type_: CLAP_EVENT_PARAM_VALUE,
            flags: 0,
        },
        param_id,
        cookie: std::ptr::null_mut(),
        note_id: -1,
        port_index: -1,
        channel: -1,
        key: -1,
        value,
    }
}

// ---- Input events vtable ----

struct InputEventsData<'a> {
    events: &'a [clap_event_param_value],
}

unsafe extern "C" fn input_events_size(list: *const clap_input_events) -> u32 {
    unsafe {
        let data = &*((*list).ctx as *const InputEventsData);
        data.events.len() as u32
    }
}

unsafe extern "C" fn input_events_get(
    list: *const clap_input_events,
    index: u32,
) -> *const clap_event_header {
    unsafe {
        let data = &*((*list).ctx as *const InputEventsData);
        match data.events.get(index as usize) {
            Some(event) => &event.header as *const clap_event_header,
            None => std::ptr::null(),
        }
    }
}

unsafe extern "C" fn output_events_try_push(
    _list: *const clap_output_events,
    _event: *const clap_event_header,
) -> bool {
    true
}

// ---------------------------------------------------------------------------
// Thread ID tracking (for thread_check extension)
// ---------------------------------------------------------------------------

static MAIN_THREAD_ID: Mutex<Option<std::thread::ThreadId>> = parking_lot::const_mutex(None);

/// Register the calling thread as the CLAP "main thread".
///
/// Plugins are created, queried and destroyed on this thread.
pub fn set_main_thread_id() {
    *MAIN_THREAD_ID.lock() = Some(std::thread::current().id());
}

thread_local! {
    static IN_AUDIO_CONTEXT: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Marks the current thread as the audio thread until dropped.
struct AudioThreadScope {
    previous: bool,
}

impl AudioThreadScope {
    fn enter() -> Self {
        Self {
            previous: IN_AUDIO_CONTEXT.replace(true),
        }
    }
}

impl Drop for AudioThreadScope {
    fn drop(&mut self) {
        IN_AUDIO_CONTEXT.set(self.previous);
    }
}

fn is_audio_thread() -> bool {
    IN_AUDIO_CONTEXT.get()
}

fn is_main_thread() -> bool {
    !is_audio_thread()
        && MAIN_THREAD_ID
            .lock()
            .is_some_and(|id| id == std::thread::current().id())
}

// ---- Host extensions ----

static CLAP_HOST_THREAD_CHECK: clap_host_thread_check = clap_host_thread_check {
    is_main_thread: Some(host_is_main_thread),
    is_audio_thread: Some(host_is_audio_thread),
};

static CLAP_HOST_PARAMS: clap_host_params = clap_host_params {
    rescan: Some(host_params_rescan),
    clear: Some(host_params_clear),
    request_flush: Some(host_params_request_flush),
};

static CLAP_HOST_LOG: clap_host_log = clap_host_log {
    log: Some(host_log),
};

unsafe extern "C" fn host_get_extension(
    _host: *const clap_host,
    extension_id: *const c_char,
) -> *const c_void {
    unsafe {
        if extension_id.is_null() {
            return std::ptr::null();
        }
        let ext_id = CStr::from_ptr(extension_id);
        if ext_id == CLAP_EXT_THREAD_CHECK {
            return &CLAP_HOST_THREAD_CHECK as *const clap_host_thread_check as *const c_void;
        }
        if ext_id == CLAP_EXT_PARAMS {
            return &CLAP_HOST_PARAMS as *const clap_host_params as *const c_void;
        }
        if ext_id == CLAP_EXT_LOG {
            return &CLAP_HOST_LOG as *const clap_host_log as *const c_void;
        }
        std::ptr::null()
    }
}

unsafe extern "C" fn host_request_restart(_host: *const clap_host) {
    log::debug!("CLAP: host_request_restart");
}

unsafe extern "C" fn host_request_process(_host: *const clap_host) {
    log::debug!("CLAP: host_request_process");
}

unsafe extern "C" fn host_request_callback(_host: *const clap_host) {
    log::debug!("CLAP: host_request_callback");
}

unsafe extern "C" fn host_is_main_thread(_host: *const clap_host) -> bool {
    is_main_thread()
}

unsafe extern "C" fn host_is_audio_thread(_host: *const clap_host) -> bool {
    is_audio_thread()
}

unsafe extern "C" fn host_params_rescan(_host: *const clap_host, flags: clap_param_rescan_flags) {
    log::debug!("CLAP: params rescan requested (flags {:#x})", flags);
}

unsafe extern "C" fn host_params_clear(
    _host: *const clap_host,
    param_id: clap_id,
    _flags: clap_param_clear_flags,
) {
    log::debug!("CLAP: params clear requested for {}", param_id);
}

unsafe extern "C" fn host_params_request_flush(_host: *const clap_host) {
    log::debug!("CLAP: params flush requested");
}

unsafe extern "C" fn host_log(
    _host: *const clap_host,
    severity: clap_log_severity,
    msg: *const c_char,
) {
    if msg.is_null() {
        return;
    }
    let msg = unsafe { CStr::from_ptr(msg) }.to_string_lossy();
    log::log!(target: "plugstress::clap::plugin", log_level(severity), "{}", msg);
}

fn log_level(severity: clap_log_severity) -> log::Level {
    match severity {
        CLAP_LOG_DEBUG => log::Level::Debug,
        CLAP_LOG_INFO => log::Level::Info,
        CLAP_LOG_WARNING => log::Level::Warn,
        CLAP_LOG_ERROR | CLAP_LOG_FATAL => log::Level::Error,
        CLAP_LOG_HOST_MISBEHAVING | CLAP_LOG_PLUGIN_MISBEHAVING => log::Level::Error,
        _ => log::Level::Trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_value_event_layout() {
        let ev = param_value_event(7, 440.0);
        assert_eq!(ev.param_id, 7);
        assert_eq!(ev.value, 440.0);
        assert_eq!(ev.header.type_, CLAP_EVENT_PARAM_VALUE);
        assert_eq!(
            ev.header.size as usize,
            std::mem::size_of::<clap_event_param_value>()
        );
    }

    #[test]
    fn test_input_events_list() {
        let events = [param_value_event(1, 0.1), param_value_event(2, 0.2)];
        let data = InputEventsData { events: &events };
        let list = clap_input_events {
            ctx: &data as *const InputEventsData as *mut c_void,
            size: Some(input_events_size),
            get: Some(input_events_get),
        };
        unsafe {
            assert_eq!(input_events_size(&list), 2);
            let second = input_events_get(&list, 1) as *const clap_event_param_value;
            assert_eq!((*second).param_id, 2);
            assert!(input_events_get(&list, 2).is_null());
        }
    }

    #[test]
    fn test_thread_check_follows_registering_thread() {
        set_main_thread_id();
        assert!(is_main_thread());
        let other = std::thread::spawn(is_main_thread).join().unwrap();
        assert!(!other);
    }

    #[test]
    fn test_audio_scope_flips_thread_roles() {
        let host = std::ptr::null();
        unsafe {
            assert!(!host_is_audio_thread(host));
            {
                let _audio = AudioThreadScope::enter();
                assert!(!host_is_main_thread(host));
                assert!(host_is_audio_thread(host));
                {
                    let _nested = AudioThreadScope::enter();
                    assert!(host_is_audio_thread(host));
                }
                assert!(host_is_audio_thread(host));
            }
            assert!(!host_is_audio_thread(host));
        }
    }

    #[test]
    fn test_host_exposes_known_extensions_only() {
        unsafe {
            let host = std::ptr::null();
            assert!(!host_get_extension(host, CLAP_EXT_THREAD_CHECK.as_ptr()).is_null());
            assert!(!host_get_extension(host, CLAP_EXT_PARAMS.as_ptr()).is_null());
            assert!(!host_get_extension(host, CLAP_EXT_LOG.as_ptr()).is_null());
            assert!(host_get_extension(host, c"clap.gui".as_ptr()).is_null());
            assert!(host_get_extension(host, std::ptr::null()).is_null());
        }
    }

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(log_level(CLAP_LOG_WARNING), log::Level::Warn);
        assert_eq!(log_level(CLAP_LOG_PLUGIN_MISBEHAVING), log::Level::Error);
        assert_eq!(log_level(CLAP_LOG_DEBUG), log::Level::Debug);
    }
}
