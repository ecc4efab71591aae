//! Firmware transfer to the modem's flash.
//!
//! ## Wire protocol
//!
//! ```text
//! host                                   modem
//!  | "UPDATE\r"                            |
//!  |-------------------------------------->|
//!  |            (banner, discarded)        |
//!  |<--------------------------------------|
//!  | ACK                                   |
//!  |-------------------------------------->|
//!  |      flash ID (u16 LE), stamp (u32 LE)|
//!  |<--------------------------------------|
//!  | ACK, chunks (hi), chunks (lo)         |
//!  |-------------------------------------->|
//!  |                                   ACK |
//!  |<--------------------------------------|
//!  | 256-byte chunk (zero padded)          |  repeated
//!  |-------------------------------------->|  for every
//!  |                                   ACK |  chunk
//!  |<--------------------------------------|
//!  | "\r"                                  |
//!  |-------------------------------------->|
//! ```
//!
//! Any failure once `UPDATE\r` went out is followed by a single ESC, which
//! makes the modem leave update mode.

use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::image::{FdTime, FirmwareImage};
use crate::modem::ModemProfile;
use crate::port::Port;
use crate::protocol::channel;

/// Positive acknowledge.
pub const ACK: u8 = 0x06;

/// Abort; makes the modem leave update mode.
pub const ESC: u8 = 0x1B;

/// Bytes per chunk on the wire.
pub const CHUNK_SIZE: usize = 256;

/// Command that switches the modem into update mode.
pub const UPDATE_COMMAND: &[u8] = b"UPDATE\r";

/// Flash chip IDs the modem may report.
pub const FLASH_IDS: [u16; 3] = [0xA41F, 0x5B1F, 0xDA1F];

/// Number of 256-byte chunks needed for `file_len` bytes.
///
/// The count goes over the wire as 16 bits, so larger files are rejected.
pub fn chunk_count(file_len: u64) -> Result<u16> {
    if file_len == 0 {
        return Err(Error::EmptyImage);
    }
    let chunks = file_len.div_ceil(CHUNK_SIZE as u64);
    u16::try_from(chunks).map_err(|_| Error::ImageTooLarge { chunks })
}

/// Make sure the file's extension belongs to `profile`.
///
/// The text after the last `.` of the file name must start with the
/// profile's three-letter extension, ignoring case.
pub fn check_extension(path: &Path, profile: &ModemProfile) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    let Some((_, ext)) = name.rsplit_once('.') else {
        return Err(Error::MissingExtension);
    };

    let matches = ext
        .get(..profile.extension.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(profile.extension));
    if !matches {
        return Err(Error::ExtensionMismatch {
            found: ext.to_string(),
            expected: profile.extension,
        });
    }
    Ok(())
}

/// Progress of one update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    /// Nothing done yet.
    #[default]
    Idle,
    /// File name accepted for the modem type.
    ExtensionChecked,
    /// Image header and CRC verified.
    FormatValidated,
    /// `UPDATE\r` sent.
    UpdateRequested,
    /// Modem reported an acceptable flash chip.
    FlashIdReceived,
    /// Modem accepted the chunk count.
    ChunkCountNegotiated,
    /// Sending chunks.
    Transferring,
    /// Every chunk acknowledged.
    Completed,
    /// Aborted because of an error.
    Failed,
    /// Aborted on request.
    Cancelled,
}

impl TransferState {
    /// Whether the attempt is over.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Bookkeeping for one update attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSession {
    /// Current state.
    pub state: TransferState,
    /// Chunks announced to the modem.
    pub total_chunks: u16,
    /// Chunks the modem acknowledged.
    pub chunks_written: u32,
    /// Flash chip reported by the modem.
    pub flash_id: Option<u16>,
    /// Time stamp of the firmware installed in the modem.
    pub flash_stamp: Option<FdTime>,
}

/// Notifications delivered while an update runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Update mode requested; `flushed` banner bytes were discarded.
    UpdateModeEntered {
        /// Bytes drained from the line.
        flushed: usize,
    },
    /// The modem reported its flash chip and installed firmware stamp.
    FlashIdentified {
        /// Flash chip ID.
        flash_id: u16,
        /// Installed firmware stamp.
        stamp: FdTime,
    },
    /// The installed firmware stamp is blank or erased. Not fatal.
    FlashStampInvalid {
        /// The stamp as reported.
        stamp: FdTime,
    },
    /// Chunk count sent to the modem.
    Negotiated {
        /// Image length in bytes.
        file_len: u64,
        /// Chunks that will be sent.
        total_chunks: u16,
    },
    /// One more chunk was acknowledged.
    ChunkWritten {
        /// Chunks acknowledged so far.
        written: u32,
        /// Chunks in total.
        total: u16,
        /// `written * 100 / total`.
        percent: u8,
    },
    /// All chunks were written.
    Completed,
}

/// Shared flag used to stop a running transfer from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// New token, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0
            .store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0
            .load(Ordering::SeqCst)
    }
}

/// Timing and policy knobs for a transfer.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Pause after `UPDATE\r` while the modem reboots into its loader.
    pub boot_delay: Duration,
    /// Idle window used to drain the loader banner.
    pub flush_window: Duration,
    /// Pause after the first ACK.
    pub ack_delay: Duration,
    /// Refuse to install a file that is not newer than the installed firmware.
    pub check_timestamp: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            boot_delay: Duration::from_millis(100),
            flush_window: Duration::from_millis(200),
            ack_delay: Duration::from_millis(1),
            check_timestamp: false,
        }
    }
}

/// Drives a firmware update over an exclusively borrowed port.
pub struct Updater<'a, P: Port> {
    port: &'a mut P,
    config: TransferConfig,
    cancel: Option<CancelToken>,
    session: TransferSession,
}

impl<'a, P: Port> Updater<'a, P> {
    /// Create an updater with default timing.
    pub fn new(port: &'a mut P) -> Self {
        Self::with_config(port, TransferConfig::default())
    }

    /// Create an updater with custom timing.
    pub fn with_config(port: &'a mut P, config: TransferConfig) -> Self {
        Self {
            port,
            config,
            cancel: None,
            session: TransferSession::default(),
        }
    }

    /// Poll `token` once per chunk and abort when it is set.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// State of the current or most recent attempt.
    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    /// Check, open and send a firmware file.
    ///
    /// Nothing is written to the port unless the extension matches `profile`
    /// and the image validates.
    pub fn update_file<F>(&mut self, profile: &ModemProfile, path: &Path, on_event: F) -> Result<()>
    where
        F: FnMut(&TransferEvent),
    {
        self.session = TransferSession::default();

        if let Err(e) = check_extension(path, profile) {
            self.session.state = TransferState::Failed;
            return Err(e);
        }
        self.session.state = TransferState::ExtensionChecked;

        let image = match FirmwareImage::open(path, profile.format) {
            Ok(image) => image,
            Err(e) => {
                self.session.state = TransferState::Failed;
                return Err(e);
            },
        };

        info!(
            "Updating {} with {} ({} bytes, built {})",
            profile.name,
            path.display(),
            image.file_len(),
            image.time_stamp()
        );
        self.run(image, on_event)
    }

    /// Send an already validated image.
    ///
    /// The image is consumed; its byte source is dropped before this returns,
    /// whatever the outcome.
    pub fn run<R, F>(&mut self, mut image: FirmwareImage<R>, mut on_event: F) -> Result<()>
    where
        R: Read + Seek,
        F: FnMut(&TransferEvent),
    {
        self.session = TransferSession {
            state: TransferState::FormatValidated,
            ..TransferSession::default()
        };

        let total = match chunk_count(image.file_len()) {
            Ok(total) => total,
            Err(e) => {
                self.session.state = TransferState::Failed;
                return Err(e);
            },
        };
        if self.is_cancelled() {
            self.session.state = TransferState::Cancelled;
            return Err(Error::Cancelled);
        }

        match self.transfer(&mut image, total, &mut on_event) {
            Ok(()) => {
                self.session.state = TransferState::Completed;
                info!(
                    "Update complete: {} chunks written",
                    self.session.chunks_written
                );
                on_event(&TransferEvent::Completed);
                Ok(())
            },
            Err(e) => {
                self.session.state = if e.is_cancelled() {
                    TransferState::Cancelled
                } else {
                    TransferState::Failed
                };
                self.abort();
                Err(e)
            },
        }
    }

    fn abort(&mut self) {
        debug!("Sending ESC");
        if let Err(e) = self.port.write_all_bytes(&[ESC]) {
            warn!("Failed to send ESC: {e}");
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
    }

    fn transfer<R, F>(
        &mut self,
        image: &mut FirmwareImage<R>,
        total: u16,
        on_event: &mut F,
    ) -> Result<()>
    where
        R: Read + Seek,
        F: FnMut(&TransferEvent),
    {
        info!("Requesting update mode");
        self.session.state = TransferState::UpdateRequested;
        self.port.write_all_bytes(UPDATE_COMMAND)?;
        thread::sleep(self.config.boot_delay);

        let flushed = channel::drain(self.port, self.config.flush_window)?;
        on_event(&TransferEvent::UpdateModeEntered { flushed });

        self.port.write_all_bytes(&[ACK])?;
        thread::sleep(self.config.ack_delay);

        let mut ident = [0u8; 6];
        channel::read_exact(self.port, &mut ident, "flash ID")?;
        let flash_id = LittleEndian::read_u16(&ident[0..2]);
        let stamp = FdTime::from_raw(LittleEndian::read_u32(&ident[2..6]));
        self.session.flash_id = Some(flash_id);
        self.session.flash_stamp = Some(stamp);

        if !FLASH_IDS.contains(&flash_id) {
            error!("Unexpected flash ID {flash_id:#06X}");
            return Err(Error::UnexpectedFlashId(flash_id));
        }
        self.session.state = TransferState::FlashIdReceived;
        info!("Flash ID {flash_id:#06X}, installed firmware built {stamp}");
        on_event(&TransferEvent::FlashIdentified { flash_id, stamp });

        self.session.total_chunks = total;

        if stamp.is_unset() {
            warn!("Installed firmware has no valid time stamp");
            on_event(&TransferEvent::FlashStampInvalid { stamp });
        } else if self.config.check_timestamp && image.time_stamp() <= stamp {
            error!(
                "Firmware file ({}) is not newer than installed firmware ({stamp})",
                image.time_stamp()
            );
            return Err(Error::FirmwareNotNewer {
                file: image.time_stamp().to_string(),
                flash: stamp.to_string(),
            });
        }

        let [hi, lo] = total.to_be_bytes();
        self.port.write_all_bytes(&[ACK, hi, lo])?;
        on_event(&TransferEvent::Negotiated {
            file_len: image.file_len(),
            total_chunks: total,
        });

        let reply = channel::read_byte(self.port, "chunk count acknowledge")?;
        if reply != ACK {
            error!("Modem rejected chunk count: {reply:#04X}");
            return Err(Error::HandshakeFailed(reply));
        }
        self.session.state = TransferState::ChunkCountNegotiated;
        debug!("Chunk count {total} accepted");

        image.rewind()?;
        self.session.state = TransferState::Transferring;

        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            if self.is_cancelled() {
                warn!(
                    "Update cancelled after {} of {total} chunks",
                    self.session.chunks_written
                );
                return Err(Error::Cancelled);
            }

            let n = image.read_chunk(&mut chunk)?;
            if n == 0 {
                return Err(Error::TruncatedImage);
            }
            chunk[n..].fill(0);

            self.port.write_all_bytes(&chunk)?;
            let index = self.session.chunks_written;
            let reply = channel::read_byte(self.port, "chunk acknowledge")?;
            if reply != ACK {
                error!("Modem rejected chunk {index}: {reply:#04X}");
                return Err(Error::ChunkHandshakeFailed {
                    byte: reply,
                    chunk: index,
                });
            }

            let written = index + 1;
            self.session.chunks_written = written;
            let percent = u8::try_from(u64::from(written) * 100 / u64::from(total)).unwrap_or(100);
            on_event(&TransferEvent::ChunkWritten {
                written,
                total,
                percent,
            });

            if n < CHUNK_SIZE || written >= u32::from(total) {
                break;
            }
        }

        self.port.write_all_bytes(b"\r")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::FormatKind;
    use crate::image::firmware::tests::{p4_image, pt_image};
    use crate::port::mock::MockPort;
    use std::io::{Cursor, SeekFrom};

    const NAK: u8 = 0x15;
    const BANNER: &[u8] = b"\r\nSCS update loader\r\n";

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Phase {
        Command,
        Confirm,
        Negotiate,
        Chunks,
        Done,
    }

    /// Modem side of the update protocol, driven by what the host writes.
    struct SimulatedModem {
        phase: Phase,
        flash_id: u16,
        stamp: FdTime,
        count_reply: u8,
        nack_at: Option<u32>,
        received: u32,
        pending: Vec<u8>,
    }

    impl SimulatedModem {
        fn new() -> Self {
            Self {
                phase: Phase::Command,
                flash_id: 0xDA1F,
                stamp: FdTime::from_fields(40, 1, 1, 12, 0, 0),
                count_reply: ACK,
                nack_at: None,
                received: 0,
                pending: Vec::new(),
            }
        }

        fn on_write(&mut self, data: &[u8]) -> Vec<u8> {
            match self.phase {
                Phase::Command if data.ends_with(UPDATE_COMMAND) => {
                    self.phase = Phase::Confirm;
                    BANNER.to_vec()
                },
                Phase::Confirm if data == [ACK] => {
                    self.phase = Phase::Negotiate;
                    let mut reply = self.flash_id.to_le_bytes().to_vec();
                    reply.extend_from_slice(&self.stamp.raw().to_le_bytes());
                    reply
                },
                Phase::Negotiate if data.len() == 3 && data[0] == ACK => {
                    self.phase = Phase::Chunks;
                    vec![self.count_reply]
                },
                Phase::Chunks => {
                    self.pending.extend_from_slice(data);
                    let mut reply = Vec::new();
                    while self.pending.len() >= CHUNK_SIZE {
                        self.pending.drain(..CHUNK_SIZE);
                        if self.nack_at == Some(self.received) {
                            self.phase = Phase::Done;
                            reply.push(NAK);
                            break;
                        }
                        self.received += 1;
                        reply.push(ACK);
                    }
                    reply
                },
                _ => Vec::new(),
            }
        }

        fn into_port(mut self) -> MockPort {
            MockPort::with_responder(move |data| self.on_write(data))
        }
    }

    fn fast_config() -> TransferConfig {
        TransferConfig {
            boot_delay: Duration::ZERO,
            flush_window: Duration::ZERO,
            ack_delay: Duration::ZERO,
            check_timestamp: false,
        }
    }

    fn file_stamp() -> FdTime {
        FdTime::from_fields(43, 6, 15, 14, 30, 10)
    }

    fn pt(data: Vec<u8>) -> FirmwareImage<Cursor<Vec<u8>>> {
        FirmwareImage::from_reader(Cursor::new(data), FormatKind::Pt).unwrap()
    }

    /// Split what the host wrote after the chunk count into 256-byte chunks.
    fn sent_chunks(tx: &[u8]) -> Vec<&[u8]> {
        let start = UPDATE_COMMAND.len() + 1 + 3;
        let body = &tx[start..tx.len() - 1];
        body.chunks(CHUNK_SIZE)
            .collect()
    }

    #[test]
    fn test_chunk_count() {
        assert!(matches!(chunk_count(0), Err(Error::EmptyImage)));
        assert_eq!(chunk_count(1).unwrap(), 1);
        assert_eq!(chunk_count(256).unwrap(), 1);
        assert_eq!(chunk_count(257).unwrap(), 2);
        assert_eq!(chunk_count(65535 * 256).unwrap(), 65535);
        assert!(matches!(
            chunk_count(65535 * 256 + 1),
            Err(Error::ImageTooLarge { chunks: 65536 })
        ));
    }

    #[test]
    fn test_check_extension() {
        let p3u = ModemProfile::find('L').unwrap();

        assert!(check_extension(Path::new("fw/update.p3u"), p3u).is_ok());
        assert!(check_extension(Path::new("UPDATE.P3U"), p3u).is_ok());
        assert!(check_extension(Path::new("update.p3u_415"), p3u).is_ok());

        assert!(matches!(
            check_extension(Path::new("update"), p3u),
            Err(Error::MissingExtension)
        ));
        assert!(matches!(
            check_extension(Path::new("dir.p3u/update"), p3u),
            Err(Error::MissingExtension)
        ));
        assert!(matches!(
            check_extension(Path::new("update.pt"), p3u),
            Err(Error::ExtensionMismatch { .. })
        ));

        let err = check_extension(Path::new("update.ptu"), p3u).unwrap_err();
        match err {
            Error::ExtensionMismatch { found, expected } => {
                assert_eq!(found, "ptu");
                assert_eq!(expected, "p3u");
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_single_chunk_wire_sequence() {
        let data = pt_image(246, file_stamp(), 0);
        assert_eq!(data.len(), 256);
        let mut port = SimulatedModem::new().into_port();

        let mut events = Vec::new();
        let mut updater = Updater::with_config(&mut port, fast_config());
        updater
            .run(pt(data.clone()), |e| events.push(e.clone()))
            .unwrap();
        assert_eq!(updater.session().state, TransferState::Completed);
        assert_eq!(updater.session().total_chunks, 1);
        assert_eq!(updater.session().chunks_written, 1);
        assert_eq!(updater.session().flash_id, Some(0xDA1F));

        let mut expected = UPDATE_COMMAND.to_vec();
        expected.push(ACK);
        expected.extend_from_slice(&[ACK, 0x00, 0x01]);
        expected.extend_from_slice(&data);
        expected.push(b'\r');
        assert_eq!(port.written(), &expected[..]);

        assert_eq!(
            events,
            vec![
                TransferEvent::UpdateModeEntered {
                    flushed: BANNER.len()
                },
                TransferEvent::FlashIdentified {
                    flash_id: 0xDA1F,
                    stamp: FdTime::from_fields(40, 1, 1, 12, 0, 0)
                },
                TransferEvent::Negotiated {
                    file_len: 256,
                    total_chunks: 1
                },
                TransferEvent::ChunkWritten {
                    written: 1,
                    total: 1,
                    percent: 100
                },
                TransferEvent::Completed,
            ]
        );
    }

    #[test]
    fn test_last_chunk_zero_padded() {
        let data = pt_image(247, file_stamp(), 0);
        assert_eq!(data.len(), 257);
        let mut port = SimulatedModem::new().into_port();

        Updater::with_config(&mut port, fast_config())
            .run(pt(data.clone()), |_| {})
            .unwrap();

        let tx = port.written();
        assert_eq!(&tx[UPDATE_COMMAND.len() + 1..UPDATE_COMMAND.len() + 4], &[ACK, 0, 2]);
        let chunks = sent_chunks(tx);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], &data[..256]);
        assert_eq!(chunks[1][0], data[256]);
        assert!(chunks[1][1..].iter().all(|&b| b == 0));
        assert_eq!(tx.last(), Some(&b'\r'));
    }

    #[test]
    fn test_chunk_rejected_mid_transfer() {
        let data = pt_image(1100, file_stamp(), 0);
        assert_eq!(chunk_count(data.len() as u64).unwrap(), 5);

        let mut modem = SimulatedModem::new();
        modem.nack_at = Some(2);
        let mut port = modem.into_port();

        let mut percents = Vec::new();
        let mut updater = Updater::with_config(&mut port, fast_config());
        let err = updater
            .run(pt(data), |e| {
                if let TransferEvent::ChunkWritten { percent, .. } = e {
                    percents.push(*percent);
                }
            })
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ChunkHandshakeFailed {
                byte: NAK,
                chunk: 2
            }
        ));
        assert_eq!(updater.session().state, TransferState::Failed);
        assert_eq!(updater.session().chunks_written, 2);
        assert_eq!(percents, vec![20, 40]);

        let tx = port.written();
        // Header, three chunks, then a single ESC.
        assert_eq!(tx.len(), UPDATE_COMMAND.len() + 1 + 3 + 3 * CHUNK_SIZE + 1);
        assert_eq!(&tx[UPDATE_COMMAND.len() + 4 + 3 * CHUNK_SIZE..], &[ESC]);
    }

    #[test]
    fn test_unexpected_flash_id() {
        let mut modem = SimulatedModem::new();
        modem.flash_id = 0x1234;
        let mut port = modem.into_port();

        let mut updater = Updater::with_config(&mut port, fast_config());
        let err = updater
            .run(pt(pt_image(100, file_stamp(), 0)), |_| {})
            .unwrap_err();

        assert!(matches!(err, Error::UnexpectedFlashId(0x1234)));
        assert_eq!(updater.session().state, TransferState::Failed);

        let mut expected = UPDATE_COMMAND.to_vec();
        expected.push(ACK);
        expected.push(ESC);
        assert_eq!(port.written(), &expected[..]);
    }

    #[test]
    fn test_chunk_count_rejected() {
        let mut modem = SimulatedModem::new();
        modem.count_reply = NAK;
        let mut port = modem.into_port();

        let err = Updater::with_config(&mut port, fast_config())
            .run(pt(pt_image(100, file_stamp(), 0)), |_| {})
            .unwrap_err();

        assert!(matches!(err, Error::HandshakeFailed(NAK)));
        let tx = port.written();
        assert_eq!(tx.len(), UPDATE_COMMAND.len() + 1 + 3 + 1);
        assert_eq!(tx.last(), Some(&ESC));
    }

    #[test]
    fn test_silent_modem_times_out() {
        let mut port = MockPort::new(&[]);

        let err = Updater::with_config(&mut port, fast_config())
            .run(pt(pt_image(100, file_stamp(), 0)), |_| {})
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ChannelTimeout {
                waiting_for: "flash ID"
            }
        ));
        assert_eq!(port.written().last(), Some(&ESC));
    }

    #[test]
    fn test_cancel_before_update_sends_nothing() {
        let mut port = SimulatedModem::new().into_port();
        let token = CancelToken::new();
        token.cancel();

        let mut updater = Updater::with_config(&mut port, fast_config()).with_cancel_token(token);
        let err = updater
            .run(pt(pt_image(600, file_stamp(), 0)), |_| {})
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(updater.session().state, TransferState::Cancelled);
        assert_eq!(updater.session().chunks_written, 0);
        assert!(port.written().is_empty());
    }

    #[test]
    fn test_cancel_during_negotiation() {
        let mut port = SimulatedModem::new().into_port();
        let token = CancelToken::new();
        let trigger = token.clone();

        let mut updater = Updater::with_config(&mut port, fast_config()).with_cancel_token(token);
        let err = updater
            .run(pt(pt_image(600, file_stamp(), 0)), |e| {
                if matches!(e, TransferEvent::Negotiated { .. }) {
                    trigger.cancel();
                }
            })
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(updater.session().chunks_written, 0);
        let tx = port.written();
        assert_eq!(tx.len(), UPDATE_COMMAND.len() + 1 + 3 + 1);
        assert_eq!(tx.last(), Some(&ESC));
    }

    #[test]
    fn test_oversized_image_rejected_before_update() {
        let data = pt_image(100, file_stamp(), 65536 * CHUNK_SIZE);
        let mut port = SimulatedModem::new().into_port();

        let mut updater = Updater::with_config(&mut port, fast_config());
        let err = updater.run(pt(data), |_| {}).unwrap_err();

        assert!(matches!(err, Error::ImageTooLarge { .. }));
        assert_eq!(updater.session().state, TransferState::Failed);
        assert!(port.written().is_empty());
    }

    #[test]
    fn test_cancel_between_chunks() {
        let mut port = SimulatedModem::new().into_port();
        let token = CancelToken::new();
        let trigger = token.clone();

        let mut updater = Updater::with_config(&mut port, fast_config()).with_cancel_token(token);
        let err = updater
            .run(pt(pt_image(1100, file_stamp(), 0)), |e| {
                if matches!(e, TransferEvent::ChunkWritten { written: 2, .. }) {
                    trigger.cancel();
                }
            })
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(updater.session().chunks_written, 2);
        let tx = port.written();
        assert_eq!(tx.len(), UPDATE_COMMAND.len() + 1 + 3 + 2 * CHUNK_SIZE + 1);
        assert_eq!(tx.last(), Some(&ESC));
    }

    #[test]
    fn test_blank_flash_stamp_only_warns() {
        let mut modem = SimulatedModem::new();
        modem.stamp = FdTime::from_raw(0xFFFF_FFFF);
        let mut port = modem.into_port();

        let mut warned = false;
        let config = TransferConfig {
            check_timestamp: true,
            ..fast_config()
        };
        Updater::with_config(&mut port, config)
            .run(pt(pt_image(100, file_stamp(), 0)), |e| {
                warned |= matches!(e, TransferEvent::FlashStampInvalid { .. });
            })
            .unwrap();

        assert!(warned);
        assert_eq!(port.written().last(), Some(&b'\r'));
    }

    #[test]
    fn test_older_file_refused_when_checking_stamps() {
        let mut modem = SimulatedModem::new();
        modem.stamp = FdTime::from_fields(44, 1, 1, 0, 0, 0);
        let mut port = modem.into_port();

        let config = TransferConfig {
            check_timestamp: true,
            ..fast_config()
        };
        let err = Updater::with_config(&mut port, config)
            .run(pt(pt_image(100, file_stamp(), 0)), |_| {})
            .unwrap_err();

        assert!(matches!(err, Error::FirmwareNotNewer { .. }));
        assert_eq!(port.written().last(), Some(&ESC));
    }

    #[test]
    fn test_p4_image_transfer() {
        let data = p4_image(2000, file_stamp());
        let image = FirmwareImage::from_reader(Cursor::new(data), FormatKind::P4).unwrap();
        let mut port = SimulatedModem::new().into_port();

        let mut updater = Updater::with_config(&mut port, fast_config());
        updater.run(image, |_| {}).unwrap();
        assert_eq!(updater.session().total_chunks, 8);
        assert_eq!(updater.session().chunks_written, 8);
    }

    struct TrackedReader {
        inner: Cursor<Vec<u8>>,
        closed: Arc<AtomicBool>,
    }

    impl Read for TrackedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Seek for TrackedReader {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    impl Drop for TrackedReader {
        fn drop(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_image_released_on_failure() {
        let closed = Arc::new(AtomicBool::new(false));
        let reader = TrackedReader {
            inner: Cursor::new(pt_image(100, file_stamp(), 0)),
            closed: Arc::clone(&closed),
        };
        let image = FirmwareImage::from_reader(reader, FormatKind::Pt).unwrap();

        let mut modem = SimulatedModem::new();
        modem.flash_id = 0;
        let mut port = modem.into_port();
        let result = Updater::with_config(&mut port, fast_config()).run(image, |_| {});

        assert!(result.is_err());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_update_file_rejects_before_touching_port() {
        let dir = tempfile::tempdir().unwrap();
        let profile = ModemProfile::find('L').unwrap();

        let wrong_ext = dir.path().join("update.ptu");
        std::fs::write(&wrong_ext, pt_image(100, file_stamp(), 0)).unwrap();

        let mut corrupt = pt_image(100, file_stamp(), 0);
        corrupt[20] ^= 0x01;
        let bad_crc = dir.path().join("update.p3u");
        std::fs::write(&bad_crc, corrupt).unwrap();

        let mut port = MockPort::new(&[]);
        let mut updater = Updater::with_config(&mut port, fast_config());

        let err = updater.update_file(profile, &wrong_ext, |_| {}).unwrap_err();
        assert!(matches!(err, Error::ExtensionMismatch { .. }));
        assert_eq!(updater.session().state, TransferState::Failed);

        let err = updater.update_file(profile, &bad_crc, |_| {}).unwrap_err();
        assert!(matches!(err, Error::CrcMismatch { .. }));

        let err = updater
            .update_file(profile, &dir.path().join("missing.p3u"), |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::FileOpen { .. }));

        assert!(port.written().is_empty());
    }

    #[test]
    fn test_update_file_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ptc3.P3U");
        std::fs::write(&path, pt_image(700, file_stamp(), 0)).unwrap();

        let mut port = SimulatedModem::new().into_port();
        let mut updater = Updater::with_config(&mut port, fast_config());
        updater
            .update_file(ModemProfile::find('L').unwrap(), &path, |_| {})
            .unwrap();

        assert_eq!(updater.session().state, TransferState::Completed);
        assert_eq!(updater.session().chunks_written, 3);
    }
}
