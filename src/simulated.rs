//! In-memory authenticator with switchable faults, driven through the same transport traits
//! as real hardware.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use minicbor::Encoder;

use crate::error::TransportError;
use crate::transport::{CommandType, Device, DeviceDescriptor, Transport};

const SW_NO_ERROR: u16 = 0x9000;
const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
const SW_WRONG_DATA: u16 = 0x6A80;
const SW_INS_NOT_SUPPORTED: u16 = 0x6D00;

const CTAPHID_ERR_INVALID_CMD: u8 = 0x01;
const CTAP2_ERR_INVALID_COMMAND: u8 = 0x01;

const CERTIFICATE: [u8; 5] = [0x30, 0x03, 0x02, 0x01, 0x00];
const SIGNATURE: [u8; 8] = [0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01];

#[derive(Clone, Debug)]
pub struct Behavior {
    pub version: &'static str,
    pub public_key_marker: u8,
    pub public_key_len: usize,
    pub empty_signature: bool,
    /// Number of 0x6985 answers before each presence-gated request succeeds.
    pub presence_pending: u32,
    pub unresponsive: bool,
    pub reject_issued_key_handles: bool,
    pub accept_any_key_handle: bool,
    pub decreasing_counter: bool,
    pub user_presence_byte: u8,

    /// Answers CBOR commands with CTAPHID_ERR_INVALID_CMD, like a U2F-only token.
    pub cbor_unsupported: bool,
    pub cbor_status: u8,
    pub versions: Vec<&'static str>,
    pub extensions: Vec<&'static str>,
    pub aaguid: [u8; 16],
    pub options: Vec<(&'static str, bool)>,
    /// Encodes option values as 1/0 integers instead of booleans.
    pub options_as_uint: bool,
    pub pin_uv_auth_protocols: Option<Vec<u64>>,
    pub omit_aaguid: bool,
    pub unknown_info_keys: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Behavior {
            version: "U2F_V2",
            public_key_marker: 0x04,
            public_key_len: 65,
            empty_signature: false,
            presence_pending: 0,
            unresponsive: false,
            reject_issued_key_handles: false,
            accept_any_key_handle: false,
            decreasing_counter: false,
            user_presence_byte: 0x01,
            cbor_unsupported: false,
            cbor_status: 0x00,
            versions: vec!["U2F_V2", "FIDO_2_0"],
            extensions: vec!["hmac-secret"],
            aaguid: [
                0x6d, 0x44, 0xba, 0x9b, 0xf6, 0xec, 0x2e, 0x49, 0xb9, 0x30, 0x0c, 0x8f, 0xe9,
                0x20, 0xcb, 0x73,
            ],
            options: vec![("rk", false), ("up", true), ("plat", false)],
            options_as_uint: false,
            pin_uv_auth_protocols: None,
            omit_aaguid: false,
            unknown_info_keys: false,
        }
    }
}

pub struct SimulatedAuthenticator {
    behavior: Behavior,
    issued: Vec<(Vec<u8>, Vec<u8>)>,
    counter: u32,
    pending_left: u32,
    last_key_handle: Option<Vec<u8>>,
    transactions: Rc<Cell<usize>>,
    released: Rc<Cell<usize>>,
}

impl SimulatedAuthenticator {
    pub fn new(behavior: Behavior) -> Self {
        SimulatedAuthenticator::with_counters(
            behavior,
            Rc::new(Cell::new(0)),
            Rc::new(Cell::new(0)),
        )
    }

    fn with_counters(
        behavior: Behavior,
        transactions: Rc<Cell<usize>>,
        released: Rc<Cell<usize>>,
    ) -> Self {
        let pending_left = behavior.presence_pending;
        SimulatedAuthenticator {
            behavior,
            issued: Vec::new(),
            counter: 0,
            pending_left,
            last_key_handle: None,
            transactions,
            released,
        }
    }

    pub fn transactions(&self) -> usize {
        self.transactions.get()
    }

    /// Key handle carried by the most recent Authenticate request.
    pub fn last_key_handle(&self) -> Option<&[u8]> {
        self.last_key_handle.as_deref()
    }

    fn presence_pending(&mut self) -> bool {
        if self.pending_left > 0 {
            self.pending_left -= 1;
            return true;
        }
        self.pending_left = self.behavior.presence_pending;
        false
    }

    fn handle_apdu(&mut self, apdu: &[u8]) -> Vec<u8> {
        let instruction = apdu.get(1).copied().unwrap_or_default();
        let data = if apdu.len() > 9 { &apdu[7..apdu.len() - 2] } else { &[][..] };
        match instruction {
            0x01 => self.register(data),
            0x02 => self.authenticate(data),
            0x03 => with_status(self.behavior.version.as_bytes().to_vec(), SW_NO_ERROR),
            _ => with_status(Vec::new(), SW_INS_NOT_SUPPORTED),
        }
    }

    fn register(&mut self, data: &[u8]) -> Vec<u8> {
        if data.len() != 64 {
            return with_status(Vec::new(), SW_WRONG_DATA);
        }
        if self.presence_pending() {
            return with_status(Vec::new(), SW_CONDITIONS_NOT_SATISFIED);
        }
        // Deterministic so a shortened public key always misaligns into a bad length byte.
        let key_handle = vec![0xa0 + self.issued.len() as u8; 64];
        self.issued.push((key_handle.clone(), data[32..].to_vec()));

        let mut response = vec![0x05];
        let mut public_key = vec![0x11; self.behavior.public_key_len];
        if let Some(marker) = public_key.first_mut() {
            *marker = self.behavior.public_key_marker;
        }
        response.extend_from_slice(&public_key);
        response.push(key_handle.len() as u8);
        response.extend_from_slice(&key_handle);
        response.extend_from_slice(&CERTIFICATE);
        if !self.behavior.empty_signature {
            response.extend_from_slice(&SIGNATURE);
        }
        with_status(response, SW_NO_ERROR)
    }

    fn authenticate(&mut self, data: &[u8]) -> Vec<u8> {
        if data.len() < 65 {
            return with_status(Vec::new(), SW_WRONG_DATA);
        }
        let application = &data[32..64];
        let key_handle = &data[65..];
        self.last_key_handle = Some(key_handle.to_vec());

        let issued = self
            .issued
            .iter()
            .any(|(handle, app)| handle == key_handle && app == application);
        let accepted = self.behavior.accept_any_key_handle
            || (issued && !self.behavior.reject_issued_key_handles);
        if !accepted {
            return with_status(Vec::new(), SW_WRONG_DATA);
        }
        if self.presence_pending() {
            return with_status(Vec::new(), SW_CONDITIONS_NOT_SATISFIED);
        }

        self.counter += 1;
        let counter = if self.behavior.decreasing_counter {
            1000 - self.counter
        } else {
            self.counter
        };
        let mut response = vec![self.behavior.user_presence_byte];
        response.extend_from_slice(&counter.to_be_bytes());
        if !self.behavior.empty_signature {
            response.extend_from_slice(&SIGNATURE);
        }
        with_status(response, SW_NO_ERROR)
    }

    fn handle_cbor(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        if self.behavior.cbor_unsupported {
            return Err(TransportError::Device(CTAPHID_ERR_INVALID_CMD));
        }
        if request != [0x04] {
            return Ok(vec![CTAP2_ERR_INVALID_COMMAND]);
        }
        if self.behavior.cbor_status != 0 {
            return Ok(vec![self.behavior.cbor_status]);
        }
        let mut response = vec![0x00];
        response.extend_from_slice(&self.encode_info());
        Ok(response)
    }

    fn encode_info(&self) -> Vec<u8> {
        let behavior = &self.behavior;
        let mut entries = 3;
        if !behavior.omit_aaguid {
            entries += 1;
        }
        if behavior.pin_uv_auth_protocols.is_some() {
            entries += 1;
        }
        if behavior.unknown_info_keys {
            entries += 2;
        }

        let mut encoder = Encoder::new(Vec::new());
        encoder.map(entries).unwrap();

        encoder.u8(0x01).unwrap().array(behavior.versions.len() as u64).unwrap();
        for version in behavior.versions.iter() {
            encoder.str(version).unwrap();
        }

        encoder.u8(0x02).unwrap().array(behavior.extensions.len() as u64).unwrap();
        for extension in behavior.extensions.iter() {
            encoder.str(extension).unwrap();
        }

        if !behavior.omit_aaguid {
            encoder.u8(0x03).unwrap().bytes(&behavior.aaguid).unwrap();
        }

        encoder.u8(0x04).unwrap().map(behavior.options.len() as u64).unwrap();
        for (name, value) in behavior.options.iter() {
            encoder.str(name).unwrap();
            if behavior.options_as_uint {
                encoder.u8(*value as u8).unwrap();
            } else {
                encoder.bool(*value).unwrap();
            }
        }

        if let Some(protocols) = &behavior.pin_uv_auth_protocols {
            encoder.u8(0x06).unwrap().array(protocols.len() as u64).unwrap();
            for protocol in protocols.iter() {
                encoder.u64(*protocol).unwrap();
            }
        }

        if behavior.unknown_info_keys {
            encoder.u8(0x07).unwrap().u32(8).unwrap();
            encoder
                .str("vendorPrototype")
                .unwrap()
                .array(2)
                .unwrap()
                .u8(1)
                .unwrap()
                .str("x")
                .unwrap();
        }

        encoder.into_writer()
    }
}

fn with_status(mut data: Vec<u8>, status: u16) -> Vec<u8> {
    data.extend_from_slice(&status.to_be_bytes());
    data
}

impl Device for SimulatedAuthenticator {
    fn transact(
        &mut self,
        command: CommandType,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        self.transactions.set(self.transactions.get() + 1);
        if self.behavior.unresponsive {
            return Err(TransportError::Timeout(Duration::from_millis(3000)));
        }
        match command {
            CommandType::Msg => Ok(self.handle_apdu(payload)),
            CommandType::Cbor => self.handle_cbor(payload),
        }
    }
}

impl Drop for SimulatedAuthenticator {
    fn drop(&mut self) {
        self.released.set(self.released.get() + 1);
    }
}

pub struct SimulatedTransport {
    devices: Vec<DeviceDescriptor>,
    behavior: Behavior,
    fail_enumeration: bool,
    fail_open: bool,
    opened: Cell<usize>,
    transactions: Rc<Cell<usize>>,
    released: Rc<Cell<usize>>,
}

impl SimulatedTransport {
    pub fn new(devices: Vec<DeviceDescriptor>, behavior: Behavior) -> Self {
        SimulatedTransport {
            devices,
            behavior,
            fail_enumeration: false,
            fail_open: false,
            opened: Cell::new(0),
            transactions: Rc::new(Cell::new(0)),
            released: Rc::new(Cell::new(0)),
        }
    }

    pub fn failing_enumeration() -> Self {
        SimulatedTransport {
            fail_enumeration: true,
            ..SimulatedTransport::new(Vec::new(), Behavior::default())
        }
    }

    pub fn failing_open(devices: Vec<DeviceDescriptor>) -> Self {
        SimulatedTransport {
            fail_open: true,
            ..SimulatedTransport::new(devices, Behavior::default())
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.get()
    }

    /// Transactions across every device this transport opened.
    pub fn transactions(&self) -> usize {
        self.transactions.get()
    }

    pub fn released(&self) -> usize {
        self.released.get()
    }
}

impl Transport for SimulatedTransport {
    type Device = SimulatedAuthenticator;

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        if self.fail_enumeration {
            return Err(TransportError::Disconnected);
        }
        Ok(self.devices.clone())
    }

    fn open(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> Result<SimulatedAuthenticator, TransportError> {
        if self.fail_open || !self.devices.contains(descriptor) {
            return Err(TransportError::Disconnected);
        }
        self.opened.set(self.opened.get() + 1);
        Ok(SimulatedAuthenticator::with_counters(
            self.behavior.clone(),
            Rc::clone(&self.transactions),
            Rc::clone(&self.released),
        ))
    }
}
