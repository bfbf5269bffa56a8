use tracing::{info, warn};

use crate::config::DeviceSelector;
use crate::error::TransportError;
use crate::transport::{DeviceDescriptor, Transport};

/// Finds the first authenticator reporting exactly the selected vendor and product id.
///
/// Absence is `Ok(None)`, not an error: the caller decides whether that ends the session.
pub fn discover<T: Transport>(
    transport: &T,
    selector: &DeviceSelector,
) -> Result<Option<DeviceDescriptor>, TransportError> {
    info!(
        vendor_id = %format!("{:#06x}", selector.vendor_id),
        product_id = %format!("{:#06x}", selector.product_id),
        "Looking for device"
    );

    let candidates = transport.enumerate()?;
    for candidate in candidates.iter() {
        info!(device = %candidate, "Enumerated authenticator");
    }

    let found = candidates
        .into_iter()
        .find(|candidate| selector.matches(candidate.vendor_id, candidate.product_id));

    match &found {
        Some(device) => info!(device = %device, "Found device"),
        None => warn!("Device not found, make sure it is flashed and connected"),
    }
    Ok(found)
}
