//! CTAP1/U2F transactions, checked against the raw message formats.
//!
//! See https://fidoalliance.org/specs/fido-u2f-v1.2-ps-20170411/fido-u2f-raw-message-formats-v1.2-ps-20170411.html

mod attestation;
mod constants;
mod key_handle;
mod parameters;
mod request;
mod response;

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

pub use attestation::AttestationCertificate;
pub use key_handle::KeyHandle;
pub use parameters::{AppParameter, Challenge};
pub use request::Request;
pub use response::{AuthenticationResult, Counter, PublicKey, RegistrationResult, Signature};

use crate::config::Config;
use crate::error::{Error, ProtocolViolation, TransportError};
use crate::transport::{CommandType, Device};
use constants::*;
use response::split_status_word;

/// How long to keep re-sending a request the device is holding for a touch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresencePolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl PresencePolicy {
    pub fn from_config(config: &Config) -> PresencePolicy {
        PresencePolicy {
            poll_interval: config.user_presence_poll_interval(),
            timeout: config.user_presence_timeout(),
        }
    }
}

enum AuthenticateOutcome {
    Authenticated(AuthenticationResult),
    InvalidKeyHandle,
}

/// Drives U2F requests against one open device.
pub struct Ctap1<'a, D: Device + ?Sized> {
    device: &'a mut D,
    presence: PresencePolicy,
}

impl<'a, D: Device + ?Sized> Ctap1<'a, D> {
    pub fn new(device: &'a mut D, presence: PresencePolicy) -> Self {
        Ctap1 { device, presence }
    }

    /// The response message's raw representation is the ASCII string 'U2F_V2'
    /// without any NUL terminator.
    pub fn version(&mut self) -> Result<String, Error> {
        debug!("Version request");
        let (data, status) = self.send(&Request::GetVersion)?;
        if status != SW_NO_ERROR {
            return Err(ProtocolViolation::StatusWord(status).into());
        }
        let version = String::from_utf8_lossy(&data).into_owned();
        if version != VERSION_STRING {
            return Err(ProtocolViolation::Version(version).into());
        }
        Ok(version)
    }

    pub fn register(
        &mut self,
        challenge: &Challenge,
        application: &AppParameter,
    ) -> Result<RegistrationResult, Error> {
        debug!(?application, "Register request");
        let data = self.send_awaiting_presence(&Request::Register {
            challenge,
            application,
        })?;
        let registration = RegistrationResult::decode(&data)?;
        info!(key_handle = ?registration.key_handle, "Registered");
        Ok(registration)
    }

    /// Authenticates with a handle this device issued; rejecting it is a violation.
    pub fn authenticate(
        &mut self,
        challenge: &Challenge,
        application: &AppParameter,
        key_handle: &KeyHandle,
    ) -> Result<AuthenticationResult, Error> {
        match self.authenticate_request(challenge, application, key_handle)? {
            AuthenticateOutcome::Authenticated(authentication) => {
                info!(counter = authentication.counter, "Authenticated");
                Ok(authentication)
            }
            AuthenticateOutcome::InvalidKeyHandle => {
                Err(ProtocolViolation::KeyHandleRejected.into())
            }
        }
    }

    /// Authenticates with a handle the device never issued; accepting it is a violation.
    pub fn expect_key_handle_rejected(
        &mut self,
        challenge: &Challenge,
        application: &AppParameter,
        key_handle: &KeyHandle,
    ) -> Result<(), Error> {
        match self.authenticate_request(challenge, application, key_handle)? {
            AuthenticateOutcome::InvalidKeyHandle => {
                info!("Corrupted key handle rejected");
                Ok(())
            }
            AuthenticateOutcome::Authenticated(_) => {
                Err(ProtocolViolation::CorruptedKeyHandleAccepted.into())
            }
        }
    }

    fn authenticate_request(
        &mut self,
        challenge: &Challenge,
        application: &AppParameter,
        key_handle: &KeyHandle,
    ) -> Result<AuthenticateOutcome, Error> {
        debug!(?application, ?key_handle, "Authenticate request");
        let request = Request::Authenticate {
            challenge,
            application,
            key_handle,
        };
        match self.send_awaiting_presence(&request) {
            Ok(data) => Ok(AuthenticateOutcome::Authenticated(
                AuthenticationResult::decode(&data)?,
            )),
            Err(Error::Protocol(ProtocolViolation::StatusWord(SW_WRONG_DATA))) => {
                Ok(AuthenticateOutcome::InvalidKeyHandle)
            }
            Err(err) => Err(err),
        }
    }

    /// Repeats the identical request while the device answers "conditions not satisfied".
    /// The device has not produced a result yet, so this is waiting, not retrying.
    fn send_awaiting_presence(&mut self, request: &Request) -> Result<Vec<u8>, Error> {
        let deadline = Instant::now() + self.presence.timeout;
        loop {
            let (data, status) = self.send(request)?;
            match status {
                SW_NO_ERROR => return Ok(data),
                SW_CONDITIONS_NOT_SATISFIED => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout(self.presence.timeout).into());
                    }
                    trace!("Waiting for user presence");
                    thread::sleep(self.presence.poll_interval);
                }
                status => return Err(ProtocolViolation::StatusWord(status).into()),
            }
        }
    }

    fn send(&mut self, request: &Request) -> Result<(Vec<u8>, u16), Error> {
        let response = self.device.transact(CommandType::Msg, &request.encode())?;
        let (data, status) = split_status_word(&response)?;
        trace!(status = %format!("{:#06x}", status), len = data.len(), "U2F response");
        Ok((data.to_vec(), status))
    }
}

/// Tracks the signature counter across Authenticate calls for one key handle.
#[derive(Debug, Default)]
pub struct CounterMonitor {
    last: Option<Counter>,
}

impl CounterMonitor {
    pub fn new() -> Self {
        CounterMonitor::default()
    }

    pub fn observe(&mut self, counter: Counter) -> Result<(), ProtocolViolation> {
        if let Some(previous) = self.last {
            if counter < previous {
                return Err(ProtocolViolation::CounterDecreased {
                    previous,
                    current: counter,
                });
            }
        }
        self.last = Some(counter);
        Ok(())
    }

    pub fn last(&self) -> Option<Counter> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::simulated::{Behavior, SimulatedAuthenticator};

    fn presence() -> PresencePolicy {
        PresencePolicy {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    fn register(device: &mut SimulatedAuthenticator) -> (Challenge, AppParameter, RegistrationResult) {
        let challenge = Challenge::random();
        let application = AppParameter::random();
        let registration = Ctap1::new(device, presence())
            .register(&challenge, &application)
            .unwrap();
        (challenge, application, registration)
    }

    #[test]
    fn version_is_u2f_v2() {
        let mut device = SimulatedAuthenticator::new(Behavior::default());

        assert_eq!(Ctap1::new(&mut device, presence()).version().unwrap(), "U2F_V2");
    }

    #[test]
    fn version_with_unexpected_string_errors() {
        let mut device = SimulatedAuthenticator::new(Behavior {
            version: "U2F_V3",
            ..Behavior::default()
        });

        assert_matches!(
            Ctap1::new(&mut device, presence()).version(),
            Err(Error::Protocol(ProtocolViolation::Version(_)))
        );
    }

    #[test]
    fn register_then_authenticate_succeeds() {
        for _ in 0..8 {
            let mut device = SimulatedAuthenticator::new(Behavior::default());
            let (challenge, application, registration) = register(&mut device);

            let authentication = Ctap1::new(&mut device, presence())
                .authenticate(&challenge, &application, &registration.key_handle)
                .unwrap();

            assert!(authentication.user_present);
            assert_eq!(authentication.counter, 1);
        }
    }

    #[test]
    fn authenticate_replays_key_handle_verbatim() {
        let mut device = SimulatedAuthenticator::new(Behavior::default());
        let (challenge, application, registration) = register(&mut device);

        Ctap1::new(&mut device, presence())
            .authenticate(&challenge, &application, &registration.key_handle)
            .unwrap();

        assert_eq!(
            device.last_key_handle().unwrap(),
            registration.key_handle.as_ref()
        );
    }

    #[test]
    fn register_with_bad_point_marker_errors() {
        let mut device = SimulatedAuthenticator::new(Behavior {
            public_key_marker: 0x03,
            ..Behavior::default()
        });

        assert_matches!(
            Ctap1::new(&mut device, presence()).register(&Challenge::random(), &AppParameter::random()),
            Err(Error::Protocol(ProtocolViolation::PublicKeyFormat(0x03)))
        );
    }

    #[test]
    fn register_with_short_public_key_errors() {
        let mut device = SimulatedAuthenticator::new(Behavior {
            public_key_len: 64,
            ..Behavior::default()
        });

        assert_matches!(
            Ctap1::new(&mut device, presence()).register(&Challenge::random(), &AppParameter::random()),
            Err(Error::Protocol(_))
        );
    }

    #[test]
    fn register_with_empty_signature_errors() {
        let mut device = SimulatedAuthenticator::new(Behavior {
            empty_signature: true,
            ..Behavior::default()
        });

        assert_matches!(
            Ctap1::new(&mut device, presence()).register(&Challenge::random(), &AppParameter::random()),
            Err(Error::Protocol(ProtocolViolation::EmptySignature))
        );
    }

    #[test]
    fn register_waits_for_user_presence() {
        let mut device = SimulatedAuthenticator::new(Behavior {
            presence_pending: 3,
            ..Behavior::default()
        });

        register(&mut device);

        assert_eq!(device.transactions(), 4);
    }

    #[test]
    fn register_without_user_presence_times_out() {
        let mut device = SimulatedAuthenticator::new(Behavior {
            presence_pending: u32::MAX,
            ..Behavior::default()
        });

        assert_matches!(
            Ctap1::new(&mut device, presence()).register(&Challenge::random(), &AppParameter::random()),
            Err(Error::Transport(TransportError::Timeout(_)))
        );
    }

    #[test]
    fn register_with_unresponsive_device_is_transport_error() {
        let mut device = SimulatedAuthenticator::new(Behavior {
            unresponsive: true,
            ..Behavior::default()
        });

        assert_matches!(
            Ctap1::new(&mut device, presence()).register(&Challenge::random(), &AppParameter::random()),
            Err(Error::Transport(TransportError::Timeout(_)))
        );
    }

    #[test]
    fn authenticate_with_rejected_issued_handle_errors() {
        let mut device = SimulatedAuthenticator::new(Behavior {
            reject_issued_key_handles: true,
            ..Behavior::default()
        });
        let (challenge, application, registration) = register(&mut device);

        assert_matches!(
            Ctap1::new(&mut device, presence()).authenticate(
                &challenge,
                &application,
                &registration.key_handle
            ),
            Err(Error::Protocol(ProtocolViolation::KeyHandleRejected))
        );
    }

    #[test]
    fn corrupted_key_handle_is_rejected_by_conformant_device() {
        let mut device = SimulatedAuthenticator::new(Behavior::default());
        let (challenge, application, registration) = register(&mut device);
        let corrupted = registration.key_handle.with_bit_flipped(0);

        Ctap1::new(&mut device, presence())
            .expect_key_handle_rejected(&challenge, &application, &corrupted)
            .unwrap();
    }

    #[test]
    fn corrupted_key_handle_accepted_is_reported() {
        let mut device = SimulatedAuthenticator::new(Behavior {
            accept_any_key_handle: true,
            ..Behavior::default()
        });
        let (challenge, application, registration) = register(&mut device);
        let corrupted = registration.key_handle.with_bit_flipped(0);

        assert_matches!(
            Ctap1::new(&mut device, presence()).expect_key_handle_rejected(
                &challenge,
                &application,
                &corrupted
            ),
            Err(Error::Protocol(ProtocolViolation::CorruptedKeyHandleAccepted))
        );
    }

    #[test]
    fn repeated_authentications_have_non_decreasing_counters() {
        let mut device = SimulatedAuthenticator::new(Behavior::default());
        let (challenge, application, registration) = register(&mut device);
        let mut ctap1 = Ctap1::new(&mut device, presence());
        let mut monitor = CounterMonitor::new();

        for _ in 0..5 {
            let authentication = ctap1
                .authenticate(&challenge, &application, &registration.key_handle)
                .unwrap();
            monitor.observe(authentication.counter).unwrap();
        }
        assert_eq!(monitor.last(), Some(5));
    }

    #[test]
    fn decreasing_counter_is_flagged() {
        let mut device = SimulatedAuthenticator::new(Behavior {
            decreasing_counter: true,
            ..Behavior::default()
        });
        let (challenge, application, registration) = register(&mut device);
        let mut ctap1 = Ctap1::new(&mut device, presence());
        let mut monitor = CounterMonitor::new();

        let first = ctap1
            .authenticate(&challenge, &application, &registration.key_handle)
            .unwrap();
        monitor.observe(first.counter).unwrap();
        let second = ctap1
            .authenticate(&challenge, &application, &registration.key_handle)
            .unwrap();

        assert_matches!(
            monitor.observe(second.counter),
            Err(ProtocolViolation::CounterDecreased { .. })
        );
    }

    #[test]
    fn counter_monitor_accepts_equal_counters() {
        let mut monitor = CounterMonitor::new();
        monitor.observe(7).unwrap();
        monitor.observe(7).unwrap();
        assert_matches!(
            monitor.observe(6),
            Err(ProtocolViolation::CounterDecreased {
                previous: 7,
                current: 6
            })
        );
    }
}
