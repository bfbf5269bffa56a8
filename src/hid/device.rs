use std::cmp;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::error::TransportError;
use crate::hid::packet::{
    ChannelId, HidCommand, InitResponse, Packet, ResponseAssembler, BROADCAST_CHANNEL_ID,
    HID_REPORT_LEN,
};
use crate::transport::{CommandType, Device, DeviceDescriptor, Transport};

const HIDRAW_CLASS_DIR: &str = "/sys/class/hidraw";
const DEV_DIR: &str = "/dev";

// Usage Page (FIDO Alliance), 0xF1D0 as a two byte little-endian item
const FIDO_USAGE_PAGE_ITEM: [u8; 3] = [0x06, 0xd0, 0xf1];

/// CTAPHID over Linux hidraw character devices.
#[derive(Debug)]
pub struct HidTransport {
    transaction_timeout: Duration,
    exchange_ceiling: Duration,
}

impl HidTransport {
    /// `transaction_timeout` bounds silence from the device; `exchange_ceiling` bounds a
    /// whole exchange, however many keep-alives the device sends.
    pub fn new(transaction_timeout: Duration, exchange_ceiling: Duration) -> Self {
        HidTransport {
            transaction_timeout,
            exchange_ceiling,
        }
    }
}

impl Transport for HidTransport {
    type Device = HidAuthenticator;

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let entries = match fs::read_dir(HIDRAW_CLASS_DIR) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("{} does not exist, is the hidraw driver loaded?", HIDRAW_CLASS_DIR);
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let mut descriptors = Vec::new();
        for entry in entries {
            let entry = entry?;
            let device_dir = entry.path().join("device");
            match describe(&device_dir, &entry.file_name().to_string_lossy()) {
                Ok(Some(descriptor)) => descriptors.push(descriptor),
                Ok(None) => {}
                Err(err) => debug!(path = ?device_dir, error = %err, "Skipping hidraw node"),
            }
        }
        descriptors.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(descriptors)
    }

    fn open(&self, descriptor: &DeviceDescriptor) -> Result<HidAuthenticator, TransportError> {
        info!(device = %descriptor, "Opening device");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&descriptor.path)?;
        HidAuthenticator::initialize(file, self.transaction_timeout, self.exchange_ceiling)
    }
}

/// Reads the sysfs attributes of one hidraw node. `None` when it is not a FIDO authenticator.
fn describe(device_dir: &Path, node: &str) -> io::Result<Option<DeviceDescriptor>> {
    let report_descriptor = fs::read(device_dir.join("report_descriptor"))?;
    if !report_descriptor
        .windows(FIDO_USAGE_PAGE_ITEM.len())
        .any(|item| item == FIDO_USAGE_PAGE_ITEM)
    {
        return Ok(None);
    }

    let uevent = fs::read_to_string(device_dir.join("uevent"))?;
    let mut ids = None;
    let mut product = None;
    for line in uevent.lines() {
        if let Some(value) = line.strip_prefix("HID_ID=") {
            ids = parse_hid_id(value);
        } else if let Some(value) = line.strip_prefix("HID_NAME=") {
            product = Some(String::from(value));
        }
    }

    let (vendor_id, product_id) = ids.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "uevent has no usable HID_ID")
    })?;
    Ok(Some(DeviceDescriptor {
        vendor_id,
        product_id,
        path: PathBuf::from(DEV_DIR).join(node).display().to_string(),
        product,
    }))
}

/// `HID_ID=0003:0000CAFE:00004000` is bus, vendor and product id in hex.
fn parse_hid_id(value: &str) -> Option<(u16, u16)> {
    let mut fields = value.split(':');
    let _bus = fields.next()?;
    let vendor_id = u32::from_str_radix(fields.next()?, 16).ok()?;
    let product_id = u32::from_str_radix(fields.next()?, 16).ok()?;
    Some((
        u16::try_from(vendor_id).ok()?,
        u16::try_from(product_id).ok()?,
    ))
}

/// An open hidraw node with an allocated CTAPHID channel. Closed when dropped.
#[derive(Debug)]
pub struct HidAuthenticator<F = File> {
    file: F,
    channel_id: ChannelId,
    timeout: Duration,
    ceiling: Duration,
}

impl<F: Read + Write + AsRawFd> HidAuthenticator<F> {
    fn initialize(file: F, timeout: Duration, ceiling: Duration) -> Result<Self, TransportError> {
        let mut device = HidAuthenticator {
            file,
            channel_id: BROADCAST_CHANNEL_ID,
            timeout,
            ceiling,
        };

        let nonce: [u8; 8] = rand::random();
        device.send(HidCommand::Init, &nonce)?;
        let started = Instant::now();
        let response = loop {
            let data = device.receive(HidCommand::Init, started, timeout)?;
            let response = InitResponse::decode(&data)?;
            // Replies to another host's INIT on the broadcast channel are not ours.
            if response.nonce == nonce {
                break response;
            }
            trace!("Ignoring INIT response with foreign nonce");
        };

        info!(
            channel_id = %format!("{:#010x}", response.channel_id.0),
            protocol_version = response.protocol_version,
            device_version = ?response.device_version,
            capabilities = ?response.capabilities,
            "Allocated CTAPHID channel"
        );
        device.channel_id = response.channel_id;
        Ok(device)
    }

    fn exchange(&mut self, command: HidCommand, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.send(command, payload)?;
        self.receive(command, Instant::now(), self.ceiling)
    }

    fn send(&mut self, command: HidCommand, payload: &[u8]) -> Result<(), TransportError> {
        for packet in Packet::encode_message(self.channel_id, command, payload)? {
            self.write_packet(&packet)?;
        }
        Ok(())
    }

    /// Reads until a complete `command` response arrives. Keep-alives restart the silence
    /// timer but never extend past `started + budget`.
    fn receive(
        &mut self,
        command: HidCommand,
        started: Instant,
        budget: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let ceiling = started + budget;
        let mut assembler = ResponseAssembler::new(self.channel_id);
        let mut deadline = cmp::min(Instant::now() + self.timeout, ceiling);
        loop {
            if Instant::now() >= ceiling {
                return Err(TransportError::Timeout(budget));
            }
            let packet = match self.read_packet(deadline)? {
                Some(packet) => packet,
                None if deadline >= ceiling => return Err(TransportError::Timeout(budget)),
                None => return Err(TransportError::Timeout(self.timeout)),
            };
            let (response_command, data) = match assembler.push(packet)? {
                Some(message) => message,
                None => continue,
            };
            match response_command {
                HidCommand::KeepAlive => {
                    trace!(status = ?data.first(), "Keep-alive");
                    assembler = ResponseAssembler::new(self.channel_id);
                    deadline = cmp::min(Instant::now() + self.timeout, ceiling);
                }
                HidCommand::Error => {
                    let code = data.first().copied().unwrap_or_default();
                    return Err(TransportError::Device(code));
                }
                response_command if response_command == command => return Ok(data),
                other => {
                    return Err(TransportError::Framing(format!(
                        "expected a {:?} response, got {:?}",
                        command, other
                    )))
                }
            }
        }
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        // Report number 0, the FIDO HID descriptor does not use numbered reports.
        let mut report = Vec::with_capacity(HID_REPORT_LEN + 1);
        report.push(0x00);
        report.extend_from_slice(&packet.to_bytes());
        self.file.write_all(&report).map_err(disconnected_or_io)
    }

    /// `None` when nothing arrived before `deadline`.
    fn read_packet(&mut self, deadline: Instant) -> Result<Option<Packet>, TransportError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !self.wait_readable(remaining)? {
            return Ok(None);
        }
        let mut report = [0u8; HID_REPORT_LEN];
        let len = self.file.read(&mut report).map_err(disconnected_or_io)?;
        if len == 0 {
            return Err(TransportError::Disconnected);
        }
        if len != HID_REPORT_LEN {
            return Err(TransportError::Framing(format!(
                "short HID report of {} bytes",
                len
            )));
        }
        Packet::from_bytes(&report).map(Some)
    }

    fn wait_readable(&self, timeout: Duration) -> Result<bool, TransportError> {
        let mut poll_fd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
        let ready = unsafe { libc::poll(&mut poll_fd, 1, timeout_ms) };
        if ready < 0 {
            return Err(io::Error::last_os_error().into());
        }
        if poll_fd.revents & libc::POLLIN != 0 {
            return Ok(true);
        }
        if poll_fd.revents & (libc::POLLHUP | libc::POLLERR) != 0 {
            return Err(TransportError::Disconnected);
        }
        Ok(false)
    }
}

fn disconnected_or_io(err: io::Error) -> TransportError {
    // ENODEV once the token is unplugged
    if err.raw_os_error() == Some(libc::ENODEV) {
        TransportError::Disconnected
    } else {
        TransportError::Io(err)
    }
}

impl<F: Read + Write + AsRawFd> Device for HidAuthenticator<F> {
    fn transact(
        &mut self,
        command: CommandType,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        trace!(?command, len = payload.len(), "CTAPHID request");
        self.exchange(command.into(), payload)
    }
}
