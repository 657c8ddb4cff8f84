//! VST3 plugin host: instantiation, parameter access and teardown.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use vst3::Steinberg::Vst::*;
use vst3::Steinberg::*;

use super::com_host::{
    self, HostApplication, HostComponentHandler, new_host_application,
    new_host_component_handler, read_string128,
};
use super::module::Vst3Module;
use crate::plugin::types::*;
use crate::plugin::{InstantiationError, PluginInstance};

// VST3 crate defines these as u32 but the API expects i32; cast once here.
const K_AUDIO: i32 = vst3::Steinberg::Vst::MediaTypes_::kAudio as i32;
const K_INPUT: i32 = vst3::Steinberg::Vst::BusDirections_::kInput as i32;
const K_OUTPUT: i32 = vst3::Steinberg::Vst::BusDirections_::kOutput as i32;

const ROOT_UNIT_ID: i32 = 0;

/// Per-parameter info stored on the instance.
#[derive(Debug, Clone)]
struct Vst3Param {
    id: u32,
    name: String,
    group: String,
}

/// A running VST3 plugin instance.
///
/// Construction fills the struct in stages and records how far it got, so
/// `Drop` tears down exactly what was set up, whether the instance is being
/// released normally or abandoned half-way through `new`.
pub struct Vst3PluginInstance {
    display_name: String,
    plugin_id: String,
    params: Vec<Vst3Param>,

    /// Host application COM object, kept alive for the plugin's lifetime.
    host_app: *mut HostApplication,
    /// Component handler COM object, kept alive for the plugin's lifetime.
    component_handler: *mut HostComponentHandler,

    component: vst3::ComPtr<IComponent>,
    component_initialized: bool,
    controller: Option<vst3::ComPtr<IEditController>>,
    /// The controller is its own object and was initialized separately.
    separate_controller: bool,
    connection: Option<(
        vst3::ComPtr<IConnectionPoint>,
        vst3::ComPtr<IConnectionPoint>,
    )>,
    handler_installed: bool,
    active: bool,

    // Last field: the module must outlive every COM object above.
    _module: Arc<Vst3Module>,
}

impl Vst3PluginInstance {
    /// Instantiate the class `descriptor.uid` from an already loaded module.
    pub fn new(
        module: Arc<Vst3Module>,
        descriptor: &PluginDescriptor,
        config: &HostAudioConfig,
    ) -> Result<Self, InstantiationError> {
        let plugin_id = descriptor.uid.as_str();
        let fail = |what: &str| {
            log::error!("VST3: {} failed for {}", what, descriptor.name);
            InstantiationError::new(format!(
                "VST3: {} failed for {} ({})",
                what, descriptor.name, plugin_id
            ))
        };

        let cid = super::scanner::hex_to_tuid(plugin_id)
            .ok_or_else(|| InstantiationError::new(format!("VST3: malformed class id {plugin_id}")))?;
        let factory = module
            .factory()
            .ok_or_else(|| fail("GetPluginFactory"))?;

        unsafe {
            // Create IComponent
            let mut obj: *mut c_void = std::ptr::null_mut();
            let result = factory.createInstance(
                cid.as_ptr() as FIDString,
                IComponent_iid.as_ptr() as FIDString,
                &mut obj,
            );
            if result != kResultOk || obj.is_null() {
                return Err(fail("createInstance"));
            }
            let component = vst3::ComPtr::<IComponent>::from_raw(obj as *mut IComponent)
                .ok_or_else(|| fail("createInstance"))?;

            let mut inst = Self {
                display_name: descriptor.name.clone(),
                plugin_id: plugin_id.to_string(),
                params: Vec::new(),
                host_app: new_host_application(),
                component_handler: new_host_component_handler(),
                component,
                component_initialized: false,
                controller: None,
                separate_controller: false,
                connection: None,
                handler_installed: false,
                active: false,
                _module: module.clone(),
            };

            // Initialize component with our host context
            if inst.component.initialize(inst.host_app as *mut FUnknown) != kResultOk {
                return Err(fail("IComponent::initialize"));
            }
            inst.component_initialized = true;

            let processor = inst
                .component
                .cast::<IAudioProcessor>()
                .ok_or_else(|| fail("IAudioProcessor query"))?;

            inst.attach_controller(factory)?;

            // Activate every audio bus
            for (dir, label) in [(K_INPUT, "input"), (K_OUTPUT, "output")] {
                let bus_count = inst.component.getBusCount(K_AUDIO, dir);
                for idx in 0..bus_count {
                    if inst.component.activateBus(K_AUDIO, dir, idx, 1) != kResultOk {
                        log::debug!("VST3: could not activate {} bus {}", label, idx);
                    }
                }
            }

            let mut setup = ProcessSetup {
                processMode: ProcessModes_::kRealtime as i32,
                symbolicSampleSize: SymbolicSampleSizes_::kSample32 as i32,
                maxSamplesPerBlock: config.block_size as i32,
                sampleRate: config.sample_rate,
            };
            if processor.setupProcessing(&mut setup) != kResultOk {
                return Err(fail("setupProcessing"));
            }

            if inst.component.setActive(1) != kResultOk {
                return Err(fail("setActive"));
            }
            inst.active = true;

            inst.params = inst.query_parameters();
            log::debug!(
                "VST3: {} ready with {} parameters",
                inst.display_name,
                inst.params.len()
            );

            Ok(inst)
        }
    }

    /// Find the edit controller (same object or separate class), connect it
    /// to the component and install our component handler.
    unsafe fn attach_controller(
        &mut self,
        factory: &vst3::ComPtr<IPluginFactory>,
    ) -> Result<(), InstantiationError> {
        unsafe {
            if let Some(ec) = self.component.cast::<IEditController>() {
                self.controller = Some(ec);
            } else {
                let mut controller_cid: TUID = std::mem::zeroed();
                if self.component.getControllerClassId(&mut controller_cid) != kResultOk {
                    log::debug!("VST3: {} has no edit controller", self.display_name);
                    return Ok(());
                }

                let mut ctrl_obj: *mut c_void = std::ptr::null_mut();
                let r = factory.createInstance(
                    controller_cid.as_ptr() as FIDString,
                    IEditController_iid.as_ptr() as FIDString,
                    &mut ctrl_obj,
                );
                let controller = if r == kResultOk {
                    vst3::ComPtr::<IEditController>::from_raw(ctrl_obj as *mut IEditController)
                } else {
                    None
                };
                let Some(controller) = controller else {
                    return Err(InstantiationError::new(format!(
                        "VST3: could not create the edit controller of {}",
                        self.display_name
                    )));
                };
                if controller.initialize(self.host_app as *mut FUnknown) != kResultOk {
                    return Err(InstantiationError::new(format!(
                        "VST3: edit controller of {} failed to initialize",
                        self.display_name
                    )));
                }
                self.controller = Some(controller);
                self.separate_controller = true;
                self.connect_component_and_controller();
            }

            if let Some(ref ctrl) = self.controller {
                let ch_ptr = self.component_handler as *mut IComponentHandler;
                let result =
                    ((*(*ctrl.as_ptr()).vtbl).setComponentHandler)(ctrl.as_ptr(), ch_ptr);
                if result == kResultOk {
                    self.handler_installed = true;
                } else {
                    log::warn!(
                        "VST3: setComponentHandler returned {} for {}",
                        result,
                        self.plugin_id
                    );
                }
            }
            Ok(())
        }
    }

    /// Wire a separate controller to its component through IConnectionPoint
    /// and hand it the component's current state.
    unsafe fn connect_component_and_controller(&mut self) {
        unsafe {
            let Some(ref controller) = self.controller else {
                return;
            };

            let comp_cp = self.component.cast::<IConnectionPoint>();
            let ctrl_cp = controller.cast::<IConnectionPoint>();
            if let (Some(comp_cp), Some(ctrl_cp)) = (comp_cp, ctrl_cp) {
                comp_cp.connect(ctrl_cp.as_ptr());
                ctrl_cp.connect(comp_cp.as_ptr());
                self.connection = Some((comp_cp, ctrl_cp));
            }

            let stream = com_host::new_memory_stream();
            if self.component.getState(stream as *mut IBStream) == kResultOk {
                (*stream).pos = 0;
                let r = controller.setComponentState(stream as *mut IBStream);
                if r != kResultOk {
                    log::debug!("VST3: setComponentState returned {} for {}", r, self.plugin_id);
                }
            }
            com_host::release(stream);
        }
    }

    fn query_parameters(&self) -> Vec<Vst3Param> {
        let Some(ref ctrl) = self.controller else {
            return Vec::new();
        };

        unsafe {
            let groups = unit_groups(ctrl);
            let param_count = ctrl.getParameterCount();
            let mut params = Vec::with_capacity(param_count.max(0) as usize);
            for idx in 0..param_count {
                let mut pinfo: ParameterInfo = std::mem::zeroed();
                if ctrl.getParameterInfo(idx, &mut pinfo) != kResultOk {
                    log::debug!("VST3: getParameterInfo({}) failed", idx);
                    continue;
                }
                params.push(Vst3Param {
                    id: pinfo.id,
                    name: read_string128(&pinfo.title),
                    group: groups.get(&pinfo.unitId).cloned().unwrap_or_default(),
                });
            }
            params
        }
    }
}

impl PluginInstance for Vst3PluginInstance {
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
        let controller = self.controller.as_ref()?;
        Some(unsafe { controller.getParamNormalized(id) })
    }

    fn set_parameter_value(&mut self, id: u32, value: f64) {
        if let Some(ref controller) = self.controller {
            let r = unsafe { controller.setParamNormalized(id, value) };
            if r != kResultOk {
                log::debug!("VST3: setParamNormalized({}) returned {}", id, r);
            }
        }
    }
}

impl Drop for Vst3PluginInstance {
    fn drop(&mut self) {
        unsafe {
            if self.active {
                self.component.setActive(0);
            }

            // Clear the component handler on the controller before terminating
            if self.handler_installed {
                if let Some(ref controller) = self.controller {
                    ((*(*controller.as_ptr()).vtbl).setComponentHandler)(
                        controller.as_ptr(),
                        std::ptr::null_mut(),
                    );
                }
            }

            if let Some((comp_cp, ctrl_cp)) = self.connection.take() {
                comp_cp.disconnect(ctrl_cp.as_ptr());
                ctrl_cp.disconnect(comp_cp.as_ptr());
            }

            // Terminate controller if separate
            if let Some(controller) = self.controller.take() {
                if self.separate_controller {
                    controller.terminate();
                }
            }

            if self.component_initialized {
                self.component.terminate();
            }

            let edits = (*self.component_handler).edits.load(Ordering::Relaxed);
            if edits > 0 {
                log::debug!("VST3: {} reported {} edits", self.display_name, edits);
            }

            // Release our COM objects
            com_host::release(self.component_handler);
            com_host::release(self.host_app);
        }
    }
}

/// Map every unit id the controller declares to its slash-separated path.
unsafe fn unit_groups(controller: &vst3::ComPtr<IEditController>) -> HashMap<i32, String> {
    unsafe {
        let Some(units) = controller.cast::<IUnitInfo>() else {
            return HashMap::new();
        };
        let mut raw: HashMap<i32, (i32, String)> = HashMap::new();
        for i in 0..units.getUnitCount() {
            let mut info: UnitInfo = std::mem::zeroed();
            if units.getUnitInfo(i, &mut info) == kResultOk {
                raw.insert(info.id, (info.parentUnitId, read_string128(&info.name)));
            }
        }
        raw.keys().map(|&id| (id, unit_path(id, &raw))).collect()
    }
}

/// Walk from `id` up to the root unit, joining unit names.  The root unit
/// itself contributes nothing.
fn unit_path(id: i32, units: &HashMap<i32, (i32, String)>) -> String {
    let mut parts = Vec::new();
    let mut current = id;
    // Bounded by the unit count so a malformed parent cycle cannot hang
    while current != ROOT_UNIT_ID && parts.len() < units.len() {
        let Some((parent, name)) = units.get(&current) else {
            break;
        };
        parts.push(name.as_str());
        current = *parent;
    }
    parts.reverse();
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units() -> HashMap<i32, (i32, String)> {
        HashMap::from([
            (0, (-1, "Root".to_string())),
            (1, (0, "Band 1".to_string())),
            (2, (1, "Filter".to_string())),
            (7, (8, "Loop A".to_string())),
            (8, (7, "Loop B".to_string())),
        ])
    }

    #[test]
    fn test_unit_path_walks_to_root() {
        let units = units();
        assert_eq!(unit_path(0, &units), "");
        assert_eq!(unit_path(1, &units), "Band 1");
        assert_eq!(unit_path(2, &units), "Band 1/Filter");
        // Unknown unit ids fall back to the root
        assert_eq!(unit_path(42, &units), "");
    }

    #[test]
    fn test_unit_path_survives_cycles() {
        let units = units();
        let path = unit_path(7, &units);
        assert!(path.split('/').count() <= units.len());
    }
}
