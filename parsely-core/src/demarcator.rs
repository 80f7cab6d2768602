//! Stream demarcator
//!
//! Finds the boundaries of the next frame from its header alone, checks the
//! bookend, and resynchronises after corruption by scanning forward byte by
//! byte within a bounded window.

use log::{debug, warn};

use crate::cancel::CancelFlag;
use crate::error::{DemarcateError, ParseError, SourceError};
use crate::frame::{Frame, FrameLayout, FrameStatus};
use crate::source::ByteSource;

/// Default resynchronisation window in bytes
pub const DEFAULT_RESYNC_WINDOW: u64 = 64 * 1024;

/// Outcome of one demarcation step
#[derive(Debug, Clone, PartialEq)]
pub enum Demarcation {
    /// A frame with a valid header, either complete or truncated by the end
    /// of the stream
    Frame(Frame),
    /// Bytes skipped to reach the next valid frame (or the end of the stream)
    Corrupt { frame: Frame, cause: ParseError },
    EndOfStream,
}

enum Probe {
    Valid(Frame),
    Truncated(Frame),
    Invalid(ParseError),
    /// The header parsed but the bookend disagrees with it
    BadBookend { length: u64, cause: ParseError },
}

pub struct Demarcator {
    layout: FrameLayout,
    resync_window: u64,
    header: Vec<u8>,
    trailer: Vec<u8>,
    body: Vec<u8>,
    /// Offset of the valid frame currently held in `body`
    body_offset: Option<u64>,
}

impl Demarcator {
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            resync_window: DEFAULT_RESYNC_WINDOW,
            header: Vec::with_capacity(layout.header_len),
            trailer: Vec::new(),
            body: Vec::new(),
            body_offset: None,
        }
    }

    pub fn with_resync_window(mut self, window: u64) -> Self {
        self.resync_window = window;
        self
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn resync_window(&self) -> u64 {
        self.resync_window
    }

    /// Bytes of `frame` when the bookend check already read all of them
    pub fn frame_bytes(&self, frame: &Frame) -> Option<&[u8]> {
        match self.body_offset {
            Some(offset) if offset == frame.offset && self.body.len() as u64 == frame.length => Some(&self.body),
            _ => None,
        }
    }

    /// Locate the frame starting at `offset`.
    ///
    /// Fewer bytes than a header left is a clean end of stream. An invalid
    /// header starts a resynchronisation scan; the skipped region comes back
    /// as [`Demarcation::Corrupt`]. A frame whose header parses but whose
    /// bookend disagrees is skipped whole when a frame header follows it.
    pub fn next_frame<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        offset: u64,
        cancel: &CancelFlag,
    ) -> Result<Demarcation, DemarcateError> {
        let total = source.len();
        if offset >= total || total - offset < self.layout.header_len as u64 {
            return Ok(Demarcation::EndOfStream);
        }

        match self.probe_at(source, offset, total)? {
            Probe::Valid(frame) | Probe::Truncated(frame) => Ok(Demarcation::Frame(frame)),
            Probe::Invalid(cause) => {
                warn!("Invalid frame at offset {}: {}", offset, cause);
                self.resync(source, offset, total, cause, cancel)
            }
            Probe::BadBookend { length, cause } => {
                warn!("Invalid frame at offset {}: {}", offset, cause);
                let next = offset + length;
                if next == total || self.is_frame_start(source, next, total)? {
                    debug!("Skipping {} bytes to the next frame at offset {}", length, next);
                    return Ok(Demarcation::Corrupt {
                        frame: corrupt(offset, length),
                        cause,
                    });
                }
                self.resync(source, offset, total, cause, cancel)
            }
        }
    }

    /// A frame header, complete frame or not, starts at `offset`
    fn is_frame_start<S: ByteSource + ?Sized>(&mut self, source: &mut S, offset: u64, total: u64) -> Result<bool, SourceError> {
        if total - offset < self.layout.header_len as u64 {
            return Ok(false);
        }
        Ok(matches!(
            self.probe_at(source, offset, total)?,
            Probe::Valid(_) | Probe::Truncated(_)
        ))
    }

    fn resync<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        offset: u64,
        total: u64,
        cause: ParseError,
        cancel: &CancelFlag,
    ) -> Result<Demarcation, DemarcateError> {
        let header_len = self.layout.header_len as u64;
        let last = offset.saturating_add(self.resync_window);
        let mut pos = offset + 1;

        while pos <= last {
            if cancel.is_cancelled() {
                return Err(DemarcateError::Cancelled { offset: pos });
            }
            if pos >= total || total - pos < header_len {
                debug!("Resync from offset {} reached end of stream", offset);
                return Ok(Demarcation::Corrupt {
                    frame: corrupt(offset, total - offset),
                    cause,
                });
            }
            if let Probe::Valid(_) = self.probe_at(source, pos, total)? {
                warn!("Resynchronised at offset {} after skipping {} bytes", pos, pos - offset);
                return Ok(Demarcation::Corrupt {
                    frame: corrupt(offset, pos - offset),
                    cause,
                });
            }
            pos += 1;
        }

        Err(DemarcateError::StreamCorruption {
            offset,
            window: self.resync_window,
        })
    }

    fn probe_at<S: ByteSource + ?Sized>(&mut self, source: &mut S, offset: u64, total: u64) -> Result<Probe, SourceError> {
        self.body_offset = None;
        self.header.resize(self.layout.header_len, 0);
        source.read_at(offset, &mut self.header)?;

        let info = match self.layout.probe(&self.header) {
            Ok(info) => info,
            Err(e) => return Ok(Probe::Invalid(e)),
        };

        let available = total - offset;
        if info.length > available {
            return Ok(Probe::Truncated(Frame {
                offset,
                length: info.length,
                tag: Some(info.tag),
                time: info.time,
                status: FrameStatus::Truncated { available },
            }));
        }

        let trailer_start = info.length - info.trailer_len as u64;
        let with_body = self.layout.needs_body_for_bookend(&info);
        let checked = if with_body {
            self.body.resize(info.length as usize, 0);
            source.read_at(offset, &mut self.body)?;
            let trailer = &self.body[trailer_start as usize..];
            self.layout.verify_bookend(&info, trailer, Some(&self.body))
        } else if info.trailer_len > 0 {
            self.trailer.resize(info.trailer_len, 0);
            source.read_at(offset + trailer_start, &mut self.trailer)?;
            self.layout.verify_bookend(&info, &self.trailer, None)
        } else {
            Ok(())
        };

        Ok(match checked {
            Ok(()) => {
                if with_body {
                    self.body_offset = Some(offset);
                }
                Probe::Valid(Frame {
                    offset,
                    length: info.length,
                    tag: Some(info.tag),
                    time: info.time,
                    status: FrameStatus::Valid,
                })
            }
            Err(cause) => Probe::BadBookend {
                length: info.length,
                cause,
            },
        })
    }
}

fn corrupt(offset: u64, length: u64) -> Frame {
    Frame {
        offset,
        length,
        tag: None,
        time: None,
        status: FrameStatus::Corrupt,
    }
}
