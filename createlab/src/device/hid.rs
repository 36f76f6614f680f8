//! HID device discovery through `hidapi`.

use {
    super::{DeviceDescriptor, HidDeviceSpec, claim_and_open},
    crate::{
        claim::{ClaimGuard, ClaimRegistry},
        error::{Error, Result},
        transport::{NativeHidDevice, hid::map_hid_error},
    },
    hidapi::HidApi,
    log::{info, trace},
    std::ffi::CString,
};

/// Every HID device currently visible to the OS.
pub fn list_hid_devices(api: &HidApi) -> Vec<DeviceDescriptor> {
    api.device_list()
        .map(|info| {
            let path = info.path().to_string_lossy().into_owned();
            let d = DeviceDescriptor::usb_hid(path, info.vendor_id(), info.product_id());
            match info.product_string() {
                Some(product) if !product.is_empty() => d.with_name(product),
                _ => d,
            }
        })
        .collect()
}

/// Devices matching `spec`, in enumeration order.
pub fn find_hid_devices(api: &HidApi, spec: &HidDeviceSpec) -> Vec<DeviceDescriptor> {
    api.device_list()
        .filter(|info| spec.matches(info.vendor_id(), info.product_id()))
        .map(|info| {
            let path = info.path().to_string_lossy().into_owned();
            trace!("Found {} at {path}", spec.name);
            spec.descriptor_for(path)
        })
        .collect()
}

/// Open the first unclaimed device matching `spec` and claim its path.
///
/// Call [`HidApi::refresh_devices`] first to see devices plugged in since
/// the API was created.
pub fn open_hid_device(
    api: &HidApi,
    spec: &HidDeviceSpec,
    registry: &ClaimRegistry,
) -> Result<(NativeHidDevice, DeviceDescriptor, ClaimGuard)> {
    let candidates = find_hid_devices(api, spec);
    let (device, descriptor, guard) = claim_and_open(candidates, registry, |d| {
        let path = CString::new(d.path())
            .map_err(|e| Error::Config(format!("invalid HID path {:?}: {e}", d.path())))?;
        let device = api.open_path(&path).map_err(map_hid_error)?;
        Ok(NativeHidDevice::new(device, d.path()))
    })?;

    info!("Opened {} at {}", descriptor.name(), descriptor.path());
    Ok((device, descriptor, guard))
}
