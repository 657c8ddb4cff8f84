//! VST3 COM host objects: IHostApplication, IComponentHandler, IBStream.
//!
//! Each object is a `#[repr(C)]` struct whose first field is its vtable
//! pointer, so a pointer to it can be handed out as the interface pointer.
//! Reference counting and `queryInterface` are shared through [`HostObject`].
//!
//! - **IHostApplication**: passed to `IComponent::initialize()` and
//!   `IEditController::initialize()`.  Plugins use it for `getName()`.
//! - **IComponentHandler**: set on the controller via `setComponentHandler()`.
//!   Plugins call `performEdit()` / `restartComponent()` on it; we only log.
//! - **IBStream**: memory-backed stream used to hand the component's state
//!   to a separate edit controller (`setComponentState()`).

use std::os::raw::c_void;
use std::sync::atomic::{AtomicU32, Ordering};

use vst3::Steinberg::IBStream_::IStreamSeekMode_::*;
use vst3::Steinberg::Vst::*;
use vst3::Steinberg::*;

const HOST_NAME: &str = "plugstress";

// =========================================================================
// Shared COM plumbing
// =========================================================================

/// A host-side COM object allocated with `Box` and freed on its last release.
pub trait HostObject: Sized {
    fn ref_count(&self) -> &AtomicU32;

    /// Whether `queryInterface(iid)` should hand out this object.
    fn implements(iid: &TUID) -> bool;
}

fn into_com<T: HostObject>(object: T) -> *mut T {
    debug_assert_eq!(object.ref_count().load(Ordering::Relaxed), 1);
    Box::into_raw(Box::new(object))
}

unsafe extern "system" fn com_query_interface<T: HostObject>(
    this: *mut FUnknown,
    iid: *const TUID,
    obj: *mut *mut c_void,
) -> tresult {
    unsafe {
        if iid.is_null() || obj.is_null() {
            return kInvalidArgument;
        }
        let iid = &*iid;
        if *iid == FUnknown_iid || T::implements(iid) {
            com_add_ref::<T>(this);
            *obj = this as *mut c_void;
            return kResultOk;
        }
        *obj = std::ptr::null_mut();
        kNoInterface
    }
}

unsafe extern "system" fn com_add_ref<T: HostObject>(this: *mut FUnknown) -> uint32 {
    unsafe { (*(this as *mut T)).ref_count().fetch_add(1, Ordering::Relaxed) + 1 }
}

unsafe extern "system" fn com_release<T: HostObject>(this: *mut FUnknown) -> uint32 {
    unsafe {
        let object = this as *mut T;
        let old = (*object).ref_count().fetch_sub(1, Ordering::AcqRel);
        if old == 1 {
            drop(Box::from_raw(object));
            return 0;
        }
        old - 1
    }
}

/// Drop the host's own reference to `object`.
///
/// # Safety
/// `object` must come from one of the `new_*` constructors below and the
/// host's reference must not have been released yet.
pub unsafe fn release<T: HostObject>(object: *mut T) {
    if !object.is_null() {
        unsafe {
            com_release::<T>(object as *mut FUnknown);
        }
    }
}

// =========================================================================
// IHostApplication
// =========================================================================

#[repr(C)]
pub struct HostApplication {
    vtbl: *const IHostApplicationVtbl,
    ref_count: AtomicU32,
}

impl HostObject for HostApplication {
    fn ref_count(&self) -> &AtomicU32 {
        &self.ref_count
    }

    fn implements(iid: &TUID) -> bool {
        *iid == IHostApplication_iid
    }
}

static HOST_APP_VTBL: IHostApplicationVtbl = IHostApplicationVtbl {
    base: FUnknownVtbl {
        queryInterface: com_query_interface::<HostApplication>,
        addRef: com_add_ref::<HostApplication>,
        release: com_release::<HostApplication>,
    },
    getName: host_app_get_name,
    createInstance: host_app_create_instance,
};

unsafe extern "system" fn host_app_get_name(
    _this: *mut IHostApplication,
    name: *mut String128,
) -> tresult {
    unsafe {
        if name.is_null() {
            return kInvalidArgument;
        }
        write_string128(&mut *name, HOST_NAME);
        kResultOk
    }
}

unsafe extern "system" fn host_app_create_instance(
    _this: *mut IHostApplication,
    _cid: *mut TUID,
    _iid: *mut TUID,
    obj: *mut *mut c_void,
) -> tresult {
    // Host-side IMessage / IAttributeList are not provided.
    unsafe {
        if !obj.is_null() {
            *obj = std::ptr::null_mut();
        }
    }
    kNotImplemented
}

/// Allocate a new HostApplication (ref_count starts at 1).
pub fn new_host_application() -> *mut HostApplication {
    into_com(HostApplication {
        vtbl: &HOST_APP_VTBL,
        ref_count: AtomicU32::new(1),
    })
}

// =========================================================================
// IComponentHandler
// =========================================================================

/// Edits the plugin reports on its own are counted and logged; the stress
/// loop never reacts to them.
#[repr(C)]
pub struct HostComponentHandler {
    vtbl: *const IComponentHandlerVtbl,
    ref_count: AtomicU32,
    /// Number of `performEdit()` calls received.
    pub edits: AtomicU32,
}

impl HostObject for HostComponentHandler {
    fn ref_count(&self) -> &AtomicU32 {
        &self.ref_count
    }

    fn implements(iid: &TUID) -> bool {
        *iid == IComponentHandler_iid
    }
}

static HOST_COMPONENT_HANDLER_VTBL: IComponentHandlerVtbl = IComponentHandlerVtbl {
    base: FUnknownVtbl {
        queryInterface: com_query_interface::<HostComponentHandler>,
        addRef: com_add_ref::<HostComponentHandler>,
        release: com_release::<HostComponentHandler>,
    },
    beginEdit: host_ch_begin_edit,
    performEdit: host_ch_perform_edit,
    endEdit: host_ch_end_edit,
    restartComponent: host_ch_restart_component,
};

unsafe extern "system" fn host_ch_begin_edit(
    _this: *mut IComponentHandler,
    _id: ParamID,
) -> tresult {
    kResultOk
}

unsafe extern "system" fn host_ch_perform_edit(
    this: *mut IComponentHandler,
    id: ParamID,
    value_normalized: ParamValue,
) -> tresult {
    unsafe {
        let ch = &*(this as *mut HostComponentHandler);
        ch.edits.fetch_add(1, Ordering::Relaxed);
    }
    log::debug!("VST3 IComponentHandler::performEdit({}, {})", id, value_normalized);
    kResultOk
}

unsafe extern "system" fn host_ch_end_edit(_this: *mut IComponentHandler, _id: ParamID) -> tresult {
    kResultOk
}

unsafe extern "system" fn host_ch_restart_component(
    _this: *mut IComponentHandler,
    flags: int32,
) -> tresult {
    log::debug!("VST3 IComponentHandler::restartComponent(flags=0x{:x})", flags);
    kResultOk
}

/// Allocate a new HostComponentHandler (ref_count starts at 1).
pub fn new_host_component_handler() -> *mut HostComponentHandler {
    into_com(HostComponentHandler {
        vtbl: &HOST_COMPONENT_HANDLER_VTBL,
        ref_count: AtomicU32::new(1),
        edits: AtomicU32::new(0),
    })
}

// =========================================================================
// IBStream: memory-backed byte stream
// =========================================================================

/// `IComponent::getState()` writes into it, then it is rewound and handed to
/// `IEditController::setComponentState()`.
#[repr(C)]
pub struct MemoryStream {
    vtbl: *const IBStreamVtbl,
    ref_count: AtomicU32,
    pub data: Vec<u8>,
    /// Current read/write position.
    pub pos: usize,
}

impl HostObject for MemoryStream {
    fn ref_count(&self) -> &AtomicU32 {
        &self.ref_count
    }

    fn implements(iid: &TUID) -> bool {
        *iid == IBStream_iid
    }
}

impl MemoryStream {
    fn read_into(&mut self, out: &mut [u8]) -> usize {
        let available = &self.data[self.pos.min(self.data.len())..];
        let n = out.len().min(available.len());
        out[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        n
    }

    fn write_from(&mut self, bytes: &[u8]) {
        let end = self.pos + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }

    fn seek(&mut self, offset: i64, mode: int32) -> Option<i64> {
        let base = match mode {
            m if m == kIBSeekSet as int32 => 0,
            m if m == kIBSeekCur as int32 => self.pos as i64,
            m if m == kIBSeekEnd as int32 => self.data.len() as i64,
            _ => return None,
        };
        let target = base.checked_add(offset).filter(|p| *p >= 0)?;
        self.pos = target as usize;
        Some(target)
    }
}

static MEMORY_STREAM_VTBL: IBStreamVtbl = IBStreamVtbl {
    base: FUnknownVtbl {
        queryInterface: com_query_interface::<MemoryStream>,
        addRef: com_add_ref::<MemoryStream>,
        release: com_release::<MemoryStream>,
    },
    read: ms_read,
    write: ms_write,
    seek: ms_seek,
    tell: ms_tell,
};

unsafe extern "system" fn ms_read(
    this: *mut IBStream,
    buffer: *mut c_void,
    num_bytes: int32,
    num_bytes_read: *mut int32,
) -> tresult {
    if buffer.is_null() || num_bytes < 0 {
        return kInvalidArgument;
    }
    unsafe {
        let ms = &mut *(this as *mut MemoryStream);
        let out = std::slice::from_raw_parts_mut(buffer as *mut u8, num_bytes as usize);
        let n = ms.read_into(out);
        if !num_bytes_read.is_null() {
            *num_bytes_read = n as int32;
        }
    }
    kResultOk
}

unsafe extern "system" fn ms_write(
    this: *mut IBStream,
    buffer: *mut c_void,
    num_bytes: int32,
    num_bytes_written: *mut int32,
) -> tresult {
    if buffer.is_null() || num_bytes < 0 {
        return kInvalidArgument;
    }
    unsafe {
        let ms = &mut *(this as *mut MemoryStream);
        ms.write_from(std::slice::from_raw_parts(
            buffer as *const u8,
            num_bytes as usize,
        ));
        if !num_bytes_written.is_null() {
            *num_bytes_written = num_bytes;
        }
    }
    kResultOk
}

unsafe extern "system" fn ms_seek(
    this: *mut IBStream,
    pos: int64,
    mode: int32,
    result: *mut int64,
) -> tresult {
    unsafe {
        let ms = &mut *(this as *mut MemoryStream);
        let Some(new_pos) = ms.seek(pos, mode) else {
            return kInvalidArgument;
        };
        if !result.is_null() {
            *result = new_pos;
        }
    }
    kResultOk
}

unsafe extern "system" fn ms_tell(this: *mut IBStream, pos: *mut int64) -> tresult {
    unsafe {
        if !pos.is_null() {
            *pos = (*(this as *mut MemoryStream)).pos as int64;
        }
    }
    kResultOk
}

/// Create a new empty MemoryStream (the plugin writes into it).
pub fn new_memory_stream() -> *mut MemoryStream {
    into_com(MemoryStream {
        vtbl: &MEMORY_STREAM_VTBL,
        ref_count: AtomicU32::new(1),
        data: Vec::new(),
        pos: 0,
    })
}

/// Write `s` as a null-terminated UTF-16 string into a String128.
fn write_string128(buf: &mut String128, s: &str) {
    let mut len = 0;
    for (slot, ch) in buf.iter_mut().zip(s.encode_utf16().take(127)) {
        *slot = ch as TChar;
        len += 1;
    }
    buf[len] = 0;
}

/// Read a null-terminated UTF-16 string from a String128.
pub fn read_string128(buf: &[TChar]) -> String {
    let chars: Vec<u16> = buf
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u16)
        .collect();
    String::from_utf16_lossy(&chars)
}
