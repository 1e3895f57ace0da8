//! Channel upload and PDI orchestration.

use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::command::{
    make_command, make_image_packet, Channel, ImageGeometry, Operation, ReturnFlag, FILLER,
};
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::image::RgbImage;
use crate::observer::{NoopObserver, TransferObserver};
use crate::pdi::{FeatureResults, PdiMachine, PollPolicy};
use crate::spi::ByteTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    /// Order the planes go out in. R, G, B on the reference design.
    pub channels: Vec<Channel>,
    pub poll_policy: PollPolicy,
    /// Extra PDI attempts after a poll timeout.
    pub exec_retries: u32,
    /// Channels to read back after PDI completes, for debugging.
    pub readback: Vec<Channel>,
}

impl TransferOptions {
    pub fn from_config(config: &Config) -> Self {
        TransferOptions {
            channels: config.channels.clone(),
            poll_policy: config.poll_policy(),
            exec_retries: config.polling.exec_retries,
            readback: config.debug.readback_channels.clone(),
        }
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions {
            channels: vec![Channel::R, Channel::G, Channel::B],
            poll_policy: PollPolicy::default(),
            exec_retries: 0,
            readback: Vec::new(),
        }
    }
}

/// Outcome of one full image-to-results transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub results: FeatureResults,
    pub channel_times: Vec<(Channel, Duration)>,
    pub pdi_time: Duration,
    pub total_time: Duration,
    pub pdi_attempts: u32,
    pub readback: Vec<(Channel, Vec<u8>)>,
}

/// Owns the link for the duration of a transfer. Not reentrant: one
/// instance per bus, and callers sharing a bus must serialize.
pub struct ChannelTransfer<T: ByteTransport> {
    transport: T,
    options: TransferOptions,
    observer: Box<dyn TransferObserver + Send>,
    stop: Arc<AtomicBool>,
}

impl<T: ByteTransport> ChannelTransfer<T> {
    pub fn new(transport: T, options: TransferOptions) -> Self {
        ChannelTransfer {
            transport,
            options,
            observer: Box::new(NoopObserver),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn TransferObserver + Send>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Upload the image and run the PDI handshake.
    pub fn run(&mut self, image: &RgbImage) -> Result<TransferReport> {
        let begin = Instant::now();

        let channel_times = self.send_image(image)?;

        let pdi_start = Instant::now();
        let (results, readback, pdi_attempts) = self.run_pdi(image.geometry())?;
        let pdi_time = pdi_start.elapsed();

        let report = TransferReport {
            results,
            channel_times,
            pdi_time,
            total_time: begin.elapsed(),
            pdi_attempts,
            readback,
        };
        self.observer.transfer_complete(&report);
        Ok(report)
    }

    /// Send every configured channel with a filler byte between planes.
    pub fn send_image(&mut self, image: &RgbImage) -> Result<Vec<(Channel, Duration)>> {
        let channels = self.options.channels.clone();
        let mut times = Vec::with_capacity(channels.len());

        for (i, &channel) in channels.iter().enumerate() {
            self.check_cancelled()?;
            let start = Instant::now();
            if i > 0 {
                self.transport.send_byte(FILLER);
            }
            self.send_channel(channel, image.plane(channel), image.geometry())?;
            times.push((channel, start.elapsed()));
        }
        Ok(times)
    }

    /// Frame one plane and push it over the link.
    pub fn send_channel(
        &mut self,
        channel: Channel,
        plane: &[u8],
        geometry: ImageGeometry,
    ) -> Result<Duration> {
        let start = Instant::now();
        let command = make_command(ReturnFlag::NoReturn, Operation::SendImage, channel);
        let packet = make_image_packet(command, plane, geometry)?;

        self.transport.send_all(&packet);

        let elapsed = start.elapsed();
        self.observer.channel_sent(channel, packet.len(), elapsed);
        Ok(elapsed)
    }

    fn run_pdi(
        &mut self,
        geometry: ImageGeometry,
    ) -> Result<(FeatureResults, Vec<(Channel, Vec<u8>)>, u32)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut machine = PdiMachine::new(&mut self.transport, self.options.poll_policy)
                .with_observer(&mut *self.observer)
                .with_stop_flag(Arc::clone(&self.stop));

            match drive_pdi(&mut machine, &self.options.readback, geometry) {
                Ok((results, readback)) => return Ok((results, readback, attempt)),
                Err(e) if e.is_retryable() && attempt <= self.options.exec_retries => {
                    warn!(
                        "PDI attempt {} of {} failed: {}",
                        attempt,
                        self.options.exec_retries + 1,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
            info!("Retrying PDI");
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.stop.load(Ordering::Relaxed) {
            return Err(BridgeError::Cancelled);
        }
        Ok(())
    }
}

fn drive_pdi<T: ByteTransport>(
    machine: &mut PdiMachine<'_, T>,
    readback: &[Channel],
    geometry: ImageGeometry,
) -> Result<(FeatureResults, Vec<(Channel, Vec<u8>)>)> {
    machine.execute()?;
    let mut planes = Vec::with_capacity(readback.len());
    for &channel in readback {
        planes.push((channel, machine.receive_channel(channel, geometry)?));
    }
    let readback = planes;
    Ok((machine.query_features()?, readback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{RecordingObserver, ScriptedTransport};
    use crate::pdi::{Gesture, PdiState, PDI_RUNNING};
    use std::sync::Mutex;

    const ACK: u8 = 0x01;

    fn results_script() -> Vec<u8> {
        vec![
            0, 0, 0, 2, // classification
            0, 0, 1, 0, // area
            0, 0, 0, 64, // perimeter
            0, 0, 0, 17, // peak
        ]
    }

    /// Forwards into a shared recorder so the test can inspect it after the
    /// transfer owns the boxed observer.
    struct Shared(Arc<Mutex<RecordingObserver>>);

    impl TransferObserver for Shared {
        fn channel_sent(&mut self, channel: Channel, bytes: usize, elapsed: Duration) {
            self.0.lock().unwrap().channel_sent(channel, bytes, elapsed)
        }

        fn byte_received(&mut self, byte: u8) {
            self.0.lock().unwrap().byte_received(byte)
        }

        fn state_changed(&mut self, from: PdiState, to: PdiState) {
            self.0.lock().unwrap().state_changed(from, to)
        }

        fn transfer_complete(&mut self, report: &TransferReport) {
            self.0.lock().unwrap().transfer_complete(report)
        }
    }

    #[test]
    fn test_single_channel_3x3_packet() {
        let geometry = ImageGeometry::new(3, 3);
        let image = RgbImage::filled(geometry, 0xFF);
        let options = TransferOptions {
            channels: vec![Channel::R],
            ..TransferOptions::default()
        };
        let mut transfer = ChannelTransfer::new(ScriptedTransport::default(), options);
        transfer.send_image(&image).unwrap();

        let mut expected: Vec<u8> = vec![0x05, 0x00, 0x03, 0x00, 0x03];
        expected.extend([0xFF; 9]);
        assert_eq!(transfer.transport().sent(), expected);
    }

    #[test]
    fn test_filler_between_channels_only() {
        let geometry = ImageGeometry::new(1, 2);
        let image = RgbImage::from_planes(geometry, vec![1, 2], vec![3, 4], vec![5, 6]).unwrap();
        let mut transfer =
            ChannelTransfer::new(ScriptedTransport::default(), TransferOptions::default());
        transfer.send_image(&image).unwrap();

        assert_eq!(
            transfer.transport().sent(),
            vec![
                0x05, 0, 1, 0, 2, 1, 2, // R
                0x00, //
                0x06, 0, 1, 0, 2, 3, 4, // G
                0x00, //
                0x07, 0, 1, 0, 2, 5, 6, // B
            ]
        );
    }

    #[test]
    fn test_full_run() {
        let geometry = ImageGeometry::new(2, 2);
        let image = RgbImage::synthetic(geometry, 1);
        let mut script = vec![0x00, PDI_RUNNING, ACK];
        script.extend(results_script());

        let recorder = Arc::new(Mutex::new(RecordingObserver::default()));
        let mut transfer = ChannelTransfer::new(
            ScriptedTransport::new(script),
            TransferOptions {
                poll_policy: PollPolicy::bounded(8),
                ..TransferOptions::default()
            },
        )
        .with_observer(Box::new(Shared(Arc::clone(&recorder))));

        let report = transfer.run(&image).unwrap();
        assert_eq!(report.results.gesture(), Gesture::TwoFingersUp);
        assert_eq!(report.results.hand_area, 256);
        assert_eq!(report.results.hand_perimeter, 64);
        assert_eq!(report.results.hand_peak, 17);
        assert_eq!(report.pdi_attempts, 1);
        assert_eq!(report.channel_times.len(), 3);
        assert!(report.readback.is_empty());

        let sent = transfer.transport().sent();
        // three 9-byte packets, two fillers, then the PDI commands
        assert_eq!(sent.len(), 3 * 9 + 2 + 10);
        assert_eq!(&sent[29..31], &[0x00, 0x0C]);

        let recorder = recorder.lock().unwrap();
        assert_eq!(
            recorder.channels_sent,
            vec![(Channel::R, 9), (Channel::G, 9), (Channel::B, 9)]
        );
        assert_eq!(recorder.received_bytes, 3 + 16);
        assert_eq!(recorder.states.last(), Some(&PdiState::Done));
        assert_eq!(recorder.reports.len(), 1);
    }

    #[test]
    fn test_retry_after_timeout() {
        let geometry = ImageGeometry::new(1, 1);
        let image = RgbImage::filled(geometry, 0);
        let mut script = vec![0x00, 0x00, 0x00];
        script.extend([ACK, ACK]);
        script.extend(results_script());

        let mut transfer = ChannelTransfer::new(
            ScriptedTransport::new(script),
            TransferOptions {
                channels: vec![Channel::G],
                poll_policy: PollPolicy::bounded(3),
                exec_retries: 1,
                readback: Vec::new(),
            },
        );
        let report = transfer.run(&image).unwrap();
        assert_eq!(report.pdi_attempts, 2);

        let sent = transfer.transport().sent();
        // packet, then exec requested twice
        assert_eq!(&sent[6..10], &[0x00, 0x0C, 0x00, 0x0C]);
    }

    #[test]
    fn test_retries_exhausted() {
        let image = RgbImage::filled(ImageGeometry::new(1, 1), 0);
        let mut transfer = ChannelTransfer::new(
            ScriptedTransport::default().then_repeat(0x00),
            TransferOptions {
                poll_policy: PollPolicy::bounded(5),
                exec_retries: 2,
                ..TransferOptions::default()
            },
        );
        let err = transfer.run(&image).unwrap_err();
        assert!(matches!(err, BridgeError::ProtocolTimeout { polls: 5, .. }));
        assert_eq!(transfer.transport().receive_count(), 15);
    }

    #[test]
    fn test_readback_between_completion_and_queries() {
        let geometry = ImageGeometry::new(1, 3);
        let image = RgbImage::filled(geometry, 9);
        let mut script = vec![ACK, ACK, 7, 8, 9];
        script.extend(results_script());

        let mut transfer = ChannelTransfer::new(
            ScriptedTransport::new(script),
            TransferOptions {
                readback: vec![Channel::B],
                ..TransferOptions::default()
            },
        );
        let report = transfer.run(&image).unwrap();
        assert_eq!(report.readback, vec![(Channel::B, vec![7, 8, 9])]);
        assert_eq!(report.results.classification, 2);
    }

    #[test]
    fn test_readback_of_every_channel() {
        let geometry = ImageGeometry::new(1, 2);
        let image = RgbImage::filled(geometry, 1);
        let mut script = vec![ACK, ACK, 1, 2, 3, 4, 5, 6];
        script.extend(results_script());

        let mut transfer = ChannelTransfer::new(
            ScriptedTransport::new(script),
            TransferOptions {
                readback: vec![Channel::R, Channel::G, Channel::B],
                ..TransferOptions::default()
            },
        );
        let report = transfer.run(&image).unwrap();
        assert_eq!(
            report.readback,
            vec![
                (Channel::R, vec![1, 2]),
                (Channel::G, vec![3, 4]),
                (Channel::B, vec![5, 6]),
            ]
        );
        assert_eq!(report.results.classification, 2);

        let sent = transfer.transport().sent();
        for command in [0x09u8, 0x0A, 0x0B] {
            assert!(sent.windows(3).any(|w| w == [0x00, command, 0x00].as_slice()));
        }
    }

    #[test]
    fn test_stop_flag_cancels_before_upload() {
        let stop = Arc::new(AtomicBool::new(true));
        let mut transfer =
            ChannelTransfer::new(ScriptedTransport::default(), TransferOptions::default())
                .with_stop_flag(stop);
        let image = RgbImage::filled(ImageGeometry::new(1, 1), 0);
        assert!(matches!(transfer.run(&image), Err(BridgeError::Cancelled)));
        assert!(transfer.transport().sent().is_empty());
    }

    #[test]
    fn test_wrong_plane_size_is_rejected() {
        let mut transfer =
            ChannelTransfer::new(ScriptedTransport::default(), TransferOptions::default());
        let err = transfer
            .send_channel(Channel::R, &[0; 5], ImageGeometry::new(2, 2))
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidBufferSize {
                expected: 4,
                actual: 5
            }
        ));
        assert!(transfer.transport().sent().is_empty());
    }
}
