// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface and device bring-up.
//!
//! STRICT ORDER:
//! 1) Instance (platform WSI extensions, optional validation)
//! 2) Debug messenger, when validation is on
//! 3) Surface from this instance
//! 4) Physical device + queue family checked AGAINST THIS SURFACE
//! 5) Logical device with the swapchain extension
//! Teardown runs in reverse in `Drop`.

use std::ffi::{c_void, CStr, CString};

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use prism_render::{RenderError, RenderResult};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, error, info, trace, warn};

pub const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

#[derive(Clone, Debug)]
pub struct InstanceConfig {
    pub app_name: String,
    /// Enables [`VALIDATION_LAYER`] and routes its messages into `tracing`.
    pub validation: bool,
    /// Additional instance layers; each must be present.
    pub layers: Vec<String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            app_name: "prism".to_owned(),
            validation: false,
            layers: Vec::new(),
        }
    }
}

impl InstanceConfig {
    /// Every layer to enable, validation first, without duplicates.
    pub fn requested_layers(&self) -> Vec<String> {
        let mut layers = Vec::new();
        if self.validation {
            layers.push(VALIDATION_LAYER.to_owned());
        }
        for l in &self.layers {
            if !layers.contains(l) {
                layers.push(l.clone());
            }
        }
        layers
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader passes a valid callback-data struct for the duration of the call.
    let msg = unsafe {
        let p = (*data).p_message;
        if p.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(p).to_string_lossy()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan {types:?}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan {types:?}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan {types:?}] {msg}");
    } else {
        trace!("[vulkan {types:?}] {msg}");
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Owns every instance- and device-level Vulkan object that outlives a swapchain.
pub struct VkContext {
    _entry: Entry,
    pub(crate) instance: Instance,
    debug: Option<DebugMessenger>,
    pub(crate) surface_loader: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) phys: vk::PhysicalDevice,
    pub(crate) memory_props: vk::PhysicalDeviceMemoryProperties,
    pub(crate) queue_family: u32,
    pub(crate) device: ash::Device,
    pub(crate) queue: vk::Queue,
    pub(crate) swapchain_loader: swapchain::Device,
}

impl VkContext {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        config: &InstanceConfig,
    ) -> RenderResult<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| RenderError::config(format!("display handle unavailable: {e}")))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| RenderError::config(format!("window handle unavailable: {e}")))?
            .as_raw();

        let entry = Entry::linked();
        let instance = create_instance(&entry, dh, config)?;

        let debug = if config.validation {
            match create_debug_messenger(&entry, &instance) {
                Ok(d) => Some(d),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        // from here on a failure must unwind what already exists
        let destroy_instance = |debug: Option<DebugMessenger>| unsafe {
            if let Some(d) = debug {
                d.loader.destroy_debug_utils_messenger(d.messenger, None);
            }
            instance.destroy_instance(None);
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) } {
            Ok(s) => s,
            Err(e) => {
                destroy_instance(debug);
                return Err(RenderError::resource("window surface", e));
            }
        };

        let picked = unsafe { pick_device_and_queue(&instance, &surface_loader, surface) };
        let (phys, queue_family) = match picked {
            Ok(p) => p,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                destroy_instance(debug);
                return Err(e);
            }
        };

        let device = match unsafe { create_device(&instance, phys, queue_family) } {
            Ok(d) => d,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                destroy_instance(debug);
                return Err(e);
            }
        };

        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let memory_props = unsafe { instance.get_physical_device_memory_properties(phys) };
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys,
            memory_props,
            queue_family,
            device,
            queue,
            swapchain_loader,
        })
    }

    #[inline]
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Supported depth formats in order of preference.
    pub(crate) fn pick_depth_format(&self) -> RenderResult<vk::Format> {
        [
            vk::Format::D32_SFLOAT,
            vk::Format::D24_UNORM_S8_UINT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D16_UNORM,
        ]
        .into_iter()
        .find(|&fmt| {
            let props = unsafe {
                self.instance
                    .get_physical_device_format_properties(self.phys, fmt)
            };
            props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| RenderError::config("no depth attachment format supported"))
    }
}

impl Drop for VkContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(d) = self.debug.take() {
                d.loader.destroy_debug_utils_messenger(d.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn create_instance(
    entry: &Entry,
    display: raw_window_handle::RawDisplayHandle,
    config: &InstanceConfig,
) -> RenderResult<Instance> {
    let app = CString::new(config.app_name.as_str())
        .map_err(|_| RenderError::config("application name contains a NUL byte"))?;
    let engine = CString::new("prism").map_err(|_| RenderError::config("engine name"))?;

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: engine.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| RenderError::config(format!("no Vulkan WSI for this display: {e}")))?
        .to_vec();
    if config.validation {
        extensions.push(debug_utils::NAME.as_ptr());
    }

    let wanted = config.requested_layers();
    if !wanted.is_empty() {
        let available = unsafe { entry.enumerate_instance_layer_properties() }
            .map_err(|e| RenderError::device("layer enumeration", e))?;
        for name in &wanted {
            let present = available.iter().any(|l| {
                l.layer_name_as_c_str()
                    .map(|n| n.to_bytes() == name.as_bytes())
                    .unwrap_or(false)
            });
            if !present {
                return Err(RenderError::config(format!(
                    "instance layer {name} is not installed"
                )));
            }
        }
    }
    let layers: Vec<CString> = wanted
        .iter()
        .map(|l| CString::new(l.as_str()))
        .collect::<Result<_, _>>()
        .map_err(|_| RenderError::config("layer name contains a NUL byte"))?;
    let layer_ptrs: Vec<*const std::ffi::c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        ..Default::default()
    };

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| match e {
        vk::Result::ERROR_INCOMPATIBLE_DRIVER
        | vk::Result::ERROR_EXTENSION_NOT_PRESENT
        | vk::Result::ERROR_LAYER_NOT_PRESENT => {
            RenderError::config(format!("cannot create a Vulkan instance: {e}"))
        }
        e => RenderError::resource("instance", e),
    })?;
    info!(
        "vulkan instance created (validation={}, layers={:?})",
        config.validation, wanted
    );
    Ok(instance)
}

fn create_debug_messenger(entry: &Entry, instance: &Instance) -> RenderResult<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .map_err(|e| RenderError::resource("debug messenger", e))?;
    Ok(DebugMessenger { loader, messenger })
}

/// Ranks discrete GPUs first; every candidate must present to `surface` and expose the
/// swapchain extension.
unsafe fn pick_device_and_queue(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> RenderResult<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(|e| RenderError::device("physical device enumeration", e))?;

    let mut best: Option<(u32, vk::PhysicalDevice, u32)> = None;
    for phys in devices {
        let has_swapchain = unsafe { instance.enumerate_device_extension_properties(phys) }
            .map(|exts| {
                exts.iter()
                    .any(|e| e.extension_name_as_c_str() == Ok(swapchain::NAME))
            })
            .unwrap_or(false);
        if !has_swapchain {
            continue;
        }

        let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        let family = qprops.iter().enumerate().find_map(|(i, q)| {
            let i = i as u32;
            let present = unsafe {
                surface_loader.get_physical_device_surface_support(phys, i, surface)
            }
            .unwrap_or(false);
            (q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && present).then_some(i)
        });
        let Some(family) = family else { continue };

        let props = unsafe { instance.get_physical_device_properties(phys) };
        let score = match props.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 3,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
            _ => 0,
        };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!("candidate device {name} (score {score}, queue family {family})");
        if best.map_or(true, |(s, _, _)| score > s) {
            best = Some((score, phys, family));
        }
    }

    best.map(|(_, phys, family)| (phys, family))
        .ok_or_else(|| RenderError::config("no device can render and present to this surface"))
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> RenderResult<ash::Device> {
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };
    let extensions = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };
    let device = unsafe { instance.create_device(phys, &dinfo, None) }
        .map_err(|e| RenderError::resource("logical device", e))?;

    let props = unsafe { instance.get_physical_device_properties(phys) };
    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!("device = {name}, queue family = {queue_family}");
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_layer_comes_first_and_once() {
        let cfg = InstanceConfig {
            validation: true,
            layers: vec![
                "VK_LAYER_MESA_overlay".to_owned(),
                VALIDATION_LAYER.to_owned(),
            ],
            ..Default::default()
        };
        assert_eq!(
            cfg.requested_layers(),
            vec![VALIDATION_LAYER.to_owned(), "VK_LAYER_MESA_overlay".to_owned()]
        );
    }

    #[test]
    fn no_layers_without_validation() {
        assert!(InstanceConfig::default().requested_layers().is_empty());
    }
}
