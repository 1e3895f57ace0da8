//! PDI handshake with the accelerator.
//!
//! After the image planes are loaded the master asks the FPGA to run its
//! processing pipeline, waits for it to acknowledge and finish, and then
//! queries four 32-bit results:
//!
//! ```text
//! Idle --0x00, EXEC--> ExecRequested --rx != 0x00--> AwaitingAck
//!      --rx != RUNNING--> AwaitingCompletion --> ReadyForQuery
//!      --4 x (0x00, QUERY, rx*4)--> Done
//! ```
//!
//! The accelerator gives no bound on how long it takes. Each poll loop runs under a
//! [`PollPolicy`]; an unbounded policy polls forever as the firmware does.

use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::command::{
    make_command, Channel, Command, ImageGeometry, Operation, ReturnFlag, FILLER,
};
use crate::error::{BridgeError, Result};
use crate::observer::TransferObserver;
use crate::spi::ByteTransport;

/// Read while the accelerator has not yet taken the exec request.
pub const ACK_PENDING: u8 = 0x00;

/// Read while the pipeline is still running.
pub const PDI_RUNNING: u8 = make_command(ReturnFlag::Running, Operation::NoOp, Channel::Default);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdiState {
    Idle,
    ExecRequested,
    AwaitingAck,
    AwaitingCompletion,
    ReadyForQuery,
    Done,
}

/// Poll budget used when nothing else is configured.
pub const DEFAULT_MAX_POLLS: u64 = 10_000_000;

/// Bound on how many bytes a single poll loop may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    max_polls: Option<u64>,
}

impl PollPolicy {
    pub const fn bounded(max_polls: u64) -> Self {
        PollPolicy {
            max_polls: Some(max_polls),
        }
    }

    /// Poll until the slave answers, however long that takes.
    pub const fn unbounded() -> Self {
        PollPolicy { max_polls: None }
    }

    pub fn max_polls(&self) -> Option<u64> {
        self.max_polls
    }

    fn exhausted(&self, polls: u64) -> bool {
        self.max_polls.map_or(false, |max| polls >= max)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy::bounded(DEFAULT_MAX_POLLS)
    }
}

/// The four scalar results the accelerator can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureQuery {
    Classification,
    HandArea,
    HandPerimeter,
    HandPeak,
}

impl FeatureQuery {
    /// Query order used by [`PdiMachine::query_features`].
    pub const ORDER: [FeatureQuery; 4] = [
        FeatureQuery::Classification,
        FeatureQuery::HandArea,
        FeatureQuery::HandPerimeter,
        FeatureQuery::HandPeak,
    ];

    pub fn command(&self) -> u8 {
        match self {
            FeatureQuery::Classification => {
                make_command(ReturnFlag::NoReturn, Operation::GestureEval, Channel::Default)
            }
            // geometric features are addressed by op code alone
            FeatureQuery::HandArea => Command::op(Operation::HandArea).to_byte(),
            FeatureQuery::HandPerimeter => Command::op(Operation::HandPerimeter).to_byte(),
            FeatureQuery::HandPeak => Command::op(Operation::HandPeak).to_byte(),
        }
    }
}

/// Gesture reported by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    OneFingerUp,
    TwoFingersUp,
    ThreeFingersUp,
    FourFingersUp,
    OpenPalm,
    ClosedFist,
    /// A well-formed reply the classifier table does not name.
    UnknownClassification(u32),
}

impl Gesture {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Gesture::OneFingerUp,
            2 => Gesture::TwoFingersUp,
            3 => Gesture::ThreeFingersUp,
            4 => Gesture::FourFingersUp,
            5 => Gesture::OpenPalm,
            6 => Gesture::ClosedFist,
            other => Gesture::UnknownClassification(other),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Gesture::UnknownClassification(_))
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gesture::OneFingerUp => write!(f, "One Finger Up"),
            Gesture::TwoFingersUp => write!(f, "Two Fingers Up"),
            Gesture::ThreeFingersUp => write!(f, "Three Fingers Up"),
            Gesture::FourFingersUp => write!(f, "Four Fingers Up"),
            Gesture::OpenPalm => write!(f, "Open Palm"),
            Gesture::ClosedFist => write!(f, "Closed Fist"),
            Gesture::UnknownClassification(code) => write!(f, "Unknown ({})", code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureResults {
    pub classification: u32,
    pub hand_area: u32,
    pub hand_perimeter: u32,
    pub hand_peak: u32,
}

impl FeatureResults {
    pub fn gesture(&self) -> Gesture {
        Gesture::from_code(self.classification)
    }

    fn set(&mut self, query: FeatureQuery, value: u32) {
        match query {
            FeatureQuery::Classification => self.classification = value,
            FeatureQuery::HandArea => self.hand_area = value,
            FeatureQuery::HandPerimeter => self.hand_perimeter = value,
            FeatureQuery::HandPeak => self.hand_peak = value,
        }
    }
}

/// Drives one PDI run over a borrowed transport.
pub struct PdiMachine<'a, T: ByteTransport> {
    transport: &'a mut T,
    observer: Option<&'a mut dyn TransferObserver>,
    policy: PollPolicy,
    stop: Option<Arc<AtomicBool>>,
    state: PdiState,
}

impl<'a, T: ByteTransport> PdiMachine<'a, T> {
    pub fn new(transport: &'a mut T, policy: PollPolicy) -> Self {
        PdiMachine {
            transport,
            observer: None,
            policy,
            stop: None,
            state: PdiState::Idle,
        }
    }

    pub fn with_observer(mut self, observer: &'a mut dyn TransferObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Abort poll loops with [`BridgeError::Cancelled`] once `stop` is set.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn state(&self) -> PdiState {
        self.state
    }

    /// Full handshake: execute, then all four queries.
    pub fn run(&mut self) -> Result<FeatureResults> {
        self.execute()?;
        self.query_features()
    }

    /// Trigger the pipeline and wait until it reports completion.
    pub fn execute(&mut self) -> Result<()> {
        self.transition(PdiState::Idle);

        self.transport.send_byte(FILLER);
        self.transport.send_byte(Command::op(Operation::ExecPdi).to_byte());
        self.transition(PdiState::ExecRequested);

        let ack = self.poll_while(|byte| byte == ACK_PENDING)?;
        debug!("PDI request acknowledged with 0x{:02x}", ack);
        self.transition(PdiState::AwaitingAck);

        let done = self.poll_while(|byte| byte == PDI_RUNNING)?;
        debug!("PDI finished with 0x{:02x}", done);
        self.transition(PdiState::AwaitingCompletion);

        self.transition(PdiState::ReadyForQuery);
        Ok(())
    }

    /// Read one channel plane back from the accelerator.
    pub fn receive_channel(&mut self, channel: Channel, geometry: ImageGeometry) -> Result<Vec<u8>> {
        self.check_cancelled()?;
        let command = make_command(ReturnFlag::NoReturn, Operation::RecvImage, channel);
        self.transport.send_byte(FILLER);
        self.transport.send_byte(command);
        self.transport.send_byte(FILLER);

        let mut pixels = Vec::with_capacity(geometry.pixels());
        for _ in 0..geometry.pixels() {
            pixels.push(self.recv());
        }

        let lit = pixels.iter().filter(|&&p| p > 0).count();
        info!("Read back {:?} channel: {} of {} pixels set", channel, lit, pixels.len());
        if let Some(observer) = self.observer.as_mut() {
            observer.channel_received(channel, &pixels);
        }
        Ok(pixels)
    }

    /// Send one query and assemble the big-endian reply.
    pub fn query(&mut self, query: FeatureQuery) -> Result<u32> {
        self.check_cancelled()?;
        if self.state != PdiState::ReadyForQuery {
            warn!("Querying {:?} in state {:?}", query, self.state);
        }

        self.transport.send_byte(FILLER);
        self.transport.send_byte(query.command());

        let mut bytes = [0u8; 4];
        for byte in bytes.iter_mut() {
            *byte = self.recv();
        }
        let value = u32::from_be_bytes(bytes);
        debug!("{:?} = {}", query, value);
        Ok(value)
    }

    pub fn query_features(&mut self) -> Result<FeatureResults> {
        let mut results = FeatureResults::default();
        for query in FeatureQuery::ORDER {
            let value = self.query(query)?;
            results.set(query, value);
        }
        self.transition(PdiState::Done);
        Ok(results)
    }

    fn recv(&mut self) -> u8 {
        let byte = self.transport.receive_byte();
        if let Some(observer) = self.observer.as_mut() {
            observer.byte_received(byte);
        }
        byte
    }

    /// Read until `pending` rejects a byte and return that byte.
    fn poll_while(&mut self, pending: impl Fn(u8) -> bool) -> Result<u8> {
        let mut polls = 0u64;
        loop {
            self.check_cancelled()?;
            if self.policy.exhausted(polls) {
                warn!("Gave up in {:?} after {} polls", self.state, polls);
                return Err(BridgeError::ProtocolTimeout {
                    phase: self.state,
                    polls,
                });
            }

            let byte = self.recv();
            polls += 1;
            if !pending(byte) {
                return Ok(byte);
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.stop {
            Some(stop) if stop.load(Ordering::Relaxed) => Err(BridgeError::Cancelled),
            _ => Ok(()),
        }
    }

    fn transition(&mut self, next: PdiState) {
        if next == self.state {
            return;
        }
        debug!("PDI {:?} -> {:?}", self.state, next);
        if let Some(observer) = self.observer.as_mut() {
            observer.state_changed(self.state, next);
        }
        self.state = next;
    }
}
