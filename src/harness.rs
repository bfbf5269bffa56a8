use std::fmt;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::ctap1::{
    AppParameter, Challenge, CounterMonitor, Ctap1, PresencePolicy, RegistrationResult,
};
use crate::ctap2::{check_capabilities, AuthenticatorInfo, Ctap2};
use crate::discovery::discover;
use crate::error::{Error, TransportError};
use crate::transport::{Device, DeviceDescriptor, Transport};

// CTAPHID_ERROR code a U2F-only token answers CTAPHID_CBOR with
const ERR_INVALID_COMMAND: u8 = 0x01;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Discovery,
    Ctap1Version,
    Ctap1Register,
    Ctap1Authenticate,
    Ctap1CorruptedKeyHandle,
    Ctap2GetInfo,
    Ctap2Capabilities,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Discovery => "Device discovery",
            Stage::Ctap1Version => "CTAP1 Version",
            Stage::Ctap1Register => "CTAP1 Register",
            Stage::Ctap1Authenticate => "CTAP1 Authenticate",
            Stage::Ctap1CorruptedKeyHandle => "CTAP1 Corrupted key handle",
            Stage::Ctap2GetInfo => "CTAP2 GetInfo",
            Stage::Ctap2Capabilities => "CTAP2 Capabilities",
        })
    }
}

#[derive(Debug)]
pub enum Outcome {
    Passed(String),
    Skipped(String),
    Failed(Error),
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

#[derive(Debug)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: Outcome,
}

#[derive(Debug, Default)]
pub struct SessionReport {
    pub device: Option<DeviceDescriptor>,
    pub stages: Vec<StageReport>,
}

impl SessionReport {
    fn record(&mut self, stage: Stage, outcome: Outcome) {
        match &outcome {
            Outcome::Passed(detail) => info!(%stage, %detail, "[+] Stage passed"),
            Outcome::Skipped(reason) => warn!(%stage, %reason, "[~] Stage skipped"),
            Outcome::Failed(err) => {
                error!(%stage, kind = err.kind(), error = %err, "[-] Stage failed")
            }
        }
        self.stages.push(StageReport { stage, outcome });
    }

    pub fn outcome(&self, stage: Stage) -> Option<&Outcome> {
        self.stages
            .iter()
            .find(|report| report.stage == stage)
            .map(|report| &report.outcome)
    }

    /// The device could not even be reached, as opposed to simply being absent.
    pub fn discovery_failed(&self) -> bool {
        self.outcome(Stage::Discovery).map_or(false, Outcome::is_failed)
    }

    pub fn device_absent(&self) -> bool {
        matches!(self.outcome(Stage::Discovery), Some(Outcome::Skipped(_)))
    }

    pub fn passed(&self) -> bool {
        !self.device_absent() && !self.stages.iter().any(|report| report.outcome.is_failed())
    }

    /// Conformance failures are advisory unless `strict` is set.
    pub fn exit_code(&self, strict: bool) -> u8 {
        if self.discovery_failed() {
            return 1;
        }
        if strict && self.stages.iter().any(|report| report.outcome.is_failed()) {
            return 1;
        }
        0
    }
}

/// Runs one conformance session against the configured device.
pub struct Harness<'a, T: Transport> {
    transport: &'a T,
    config: &'a Config,
}

impl<'a, T: Transport> Harness<'a, T> {
    pub fn new(transport: &'a T, config: &'a Config) -> Self {
        Harness { transport, config }
    }

    pub fn run(&self) -> SessionReport {
        let mut report = SessionReport::default();

        let descriptor = match discover(self.transport, &self.config.device_selector()) {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                report.record(Stage::Discovery, Outcome::Skipped(String::from("device not found")));
                return report;
            }
            Err(err) => {
                report.record(Stage::Discovery, Outcome::Failed(err.into()));
                return report;
            }
        };

        let mut device = match self.transport.open(&descriptor) {
            Ok(device) => device,
            Err(err) => {
                report.device = Some(descriptor);
                report.record(Stage::Discovery, Outcome::Failed(err.into()));
                return report;
            }
        };
        report.record(Stage::Discovery, Outcome::Passed(descriptor.to_string()));
        report.device = Some(descriptor);

        self.run_stages(&mut device, &mut report);

        drop(device);
        info!("Released device");
        report
    }

    fn run_stages(&self, device: &mut T::Device, report: &mut SessionReport) {
        let presence = PresencePolicy::from_config(self.config);
        let challenge = Challenge::random();
        let application = AppParameter::random();

        report.record(Stage::Ctap1Version, version(device, presence));

        let registration = match Ctap1::new(device, presence).register(&challenge, &application) {
            Ok(registration) => {
                report.record(
                    Stage::Ctap1Register,
                    Outcome::Passed(format!(
                        "key handle of {} bytes",
                        registration.key_handle.len()
                    )),
                );
                Some(registration)
            }
            Err(err) => {
                report.record(Stage::Ctap1Register, Outcome::Failed(err));
                None
            }
        };

        match &registration {
            Some(registration) => {
                report.record(
                    Stage::Ctap1Authenticate,
                    self.authenticate(device, presence, &challenge, &application, registration),
                );
                report.record(
                    Stage::Ctap1CorruptedKeyHandle,
                    corrupted_key_handle(device, presence, &challenge, &application, registration),
                );
            }
            None => {
                let reason = String::from("Register failed, no key handle to replay");
                report.record(Stage::Ctap1Authenticate, Outcome::Skipped(reason.clone()));
                report.record(Stage::Ctap1CorruptedKeyHandle, Outcome::Skipped(reason));
            }
        }

        let info = match Ctap2::new(device).get_info() {
            Ok(info) => {
                report.record(
                    Stage::Ctap2GetInfo,
                    Outcome::Passed(format!(
                        "versions {:?}, AAGUID {}",
                        info.versions, info.aaguid
                    )),
                );
                Some(info)
            }
            Err(Error::Transport(TransportError::Device(ERR_INVALID_COMMAND))) => {
                report.record(
                    Stage::Ctap2GetInfo,
                    Outcome::Skipped(String::from("CTAPHID_CBOR not implemented, U2F-only")),
                );
                None
            }
            Err(err) => {
                report.record(Stage::Ctap2GetInfo, Outcome::Failed(err));
                None
            }
        };

        report.record(
            Stage::Ctap2Capabilities,
            capabilities(info.as_ref(), registration.is_some()),
        );
    }

    fn authenticate(
        &self,
        device: &mut T::Device,
        presence: PresencePolicy,
        challenge: &Challenge,
        application: &AppParameter,
        registration: &RegistrationResult,
    ) -> Outcome {
        let mut ctap1 = Ctap1::new(device, presence);
        let mut monitor = CounterMonitor::new();
        for _ in 0..self.config.authentication_rounds {
            let authentication =
                match ctap1.authenticate(challenge, application, &registration.key_handle) {
                    Ok(authentication) => authentication,
                    Err(err) => return Outcome::Failed(err),
                };
            if let Err(violation) = monitor.observe(authentication.counter) {
                return Outcome::Failed(violation.into());
            }
        }
        Outcome::Passed(format!(
            "{} rounds, counter at {}",
            self.config.authentication_rounds,
            monitor.last().unwrap_or_default()
        ))
    }
}

fn version<D: Device + ?Sized>(device: &mut D, presence: PresencePolicy) -> Outcome {
    match Ctap1::new(device, presence).version() {
        Ok(version) => Outcome::Passed(version),
        Err(err) => Outcome::Failed(err),
    }
}

fn corrupted_key_handle<D: Device + ?Sized>(
    device: &mut D,
    presence: PresencePolicy,
    challenge: &Challenge,
    application: &AppParameter,
    registration: &RegistrationResult,
) -> Outcome {
    let corrupted = registration.key_handle.with_bit_flipped(0);
    let mut ctap1 = Ctap1::new(device, presence);
    match ctap1.expect_key_handle_rejected(challenge, application, &corrupted) {
        Ok(()) => Outcome::Passed(String::from("rejected with 0x6A80")),
        Err(err) => Outcome::Failed(err),
    }
}

fn capabilities(info: Option<&AuthenticatorInfo>, ctap1_registered: bool) -> Outcome {
    let info = match info {
        Some(info) => info,
        None => return Outcome::Skipped(String::from("no authenticator info")),
    };
    if !info.supports_fido2() {
        return Outcome::Skipped(String::from("FIDO_2_0 not listed, U2F-only"));
    }
    match check_capabilities(info, ctap1_registered) {
        Ok(()) => Outcome::Passed(format!("options {:?}", info.options)),
        Err(violation) => Outcome::Failed(violation.into()),
    }
}
