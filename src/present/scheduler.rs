//! Frame pacing against the peripheral's scan position.
//!
//! The peripheral double-buffers: while it scans one framebuffer, the next
//! frame is decoded into the other. Handing a buffer over is a
//! two-deadline affair. The new address must be latched before the
//! boundary where it should take effect, and the old buffer must not be
//! touched until the peripheral has actually crossed that boundary. The
//! presenter keeps those two instants separate: it presents once
//! `FDIV - 1` frames have elapsed since the last handover, then waits for
//! the full `FDIV` before letting the previous buffer be decoded into
//! again.

use std::hint;

use color_eyre::Result;
use tracing::{info, warn};

use crate::device::coordinate::{fid_delta, Coordinate, DEADLINE_MARGIN_ROW};
use crate::video::{FrameStep, VideoError};
use crate::PlaybackStats;

/// The peripheral as the presenter sees it
pub trait ScanoutTarget {
    /// Current scan position
    fn coordinate(&self) -> Coordinate;
    /// Hand the buffer in `slot` to the peripheral. Latched at the next
    /// frame boundary, not immediately.
    fn present(&mut self, slot: usize);
    /// Begin scanout
    fn start(&mut self);
}

/// The pair of hardware-visible buffers
pub trait SlotPool {
    /// Writable bytes of `slot`, the decode target
    fn data_mut(&mut self, slot: usize) -> &mut [u8];
    /// Make the slot's bytes visible to the peripheral (cache clean)
    fn flush(&mut self, slot: usize) -> Result<()>;
}

/// Supplier of decoded frames
pub trait FrameSource {
    fn next_frame(&mut self, dst: &mut [u8]) -> Result<FrameStep, VideoError>;
}

/// Drives decode, flush and paced handover until the stream ends
pub struct Presenter {
    fdiv: i32,
    stats: PlaybackStats,
}

impl Presenter {
    pub fn new(fdiv: i32) -> Self {
        assert!(fdiv > 0, "frame-rate divider must be positive");
        Self {
            fdiv,
            stats: PlaybackStats::default(),
        }
    }

    /// Play the stream to its end. Returns the run's counters; a dead
    /// pipeline is the only error that escapes.
    pub fn play<S, P, T>(mut self, source: &mut S, pool: &mut P, target: &mut T) -> Result<PlaybackStats>
    where
        S: FrameSource,
        P: SlotPool,
        T: ScanoutTarget,
    {
        let mut slot = 0usize;
        // None until the first frame is on screen
        let mut last: Option<Coordinate> = None;

        loop {
            match source.next_frame(pool.data_mut(slot)) {
                Ok(FrameStep::Frame) => {}
                Ok(FrameStep::EndOfStream) => break,
                // A bad frame goes up as-is; skipping it would hold the
                // previous image for another FDIV frames anyway.
                Err(VideoError::Decode(e)) => {
                    warn!("decode error, presenting partial frame: {e}");
                    self.stats.decode_errors += 1;
                }
                Err(err @ VideoError::Pipeline(_)) => return Err(err.into()),
            }
            pool.flush(slot)?;

            last = Some(match last {
                // Scanout is not running yet, so there is nothing to pace
                // the first frame against: hand it over and start.
                None => {
                    target.present(slot);
                    target.start();
                    target.coordinate()
                }
                Some(prev) => self.pace(target, slot, prev),
            });

            self.stats.frames_presented += 1;
            slot ^= 1;
        }

        info!(
            "End of stream after {} frames ({} deadline misses)",
            self.stats.frames_presented, self.stats.deadline_misses
        );
        Ok(self.stats)
    }

    /// Steady-state handover of `slot`, paced `fdiv` frame boundaries
    /// after `last`. Returns the coordinate to pace the next frame
    /// against.
    fn pace<T: ScanoutTarget>(&mut self, target: &mut T, slot: usize, last: Coordinate) -> Coordinate {
        let fdiv = self.fdiv;
        let mut cur = target.coordinate();
        let mut delta = fid_delta(cur.fid, last.fid);

        // Deadline check, diagnostic only. Past the boundary, or on the
        // last scan row before it, there is no longer time to hand the
        // address over safely.
        let late_frame = delta >= fdiv;
        let late_row = delta == fdiv - 1 && cur.row >= DEADLINE_MARGIN_ROW;
        if late_frame || late_row {
            warn!(delta, row = cur.row, "missed presentation deadline");
            self.stats.deadline_misses += 1;
        }

        // Spin to the frame just before the handover boundary. The margin
        // is tens of microseconds, far below scheduler wakeup latency, so
        // no sleeping here.
        while delta < fdiv - 1 {
            hint::spin_loop();
            cur = target.coordinate();
            delta = fid_delta(cur.fid, last.fid);
        }

        // The peripheral latches the new address at the coming boundary...
        target.present(slot);

        // ...and only once it has crossed it is the previously active
        // buffer free to decode into again.
        while delta < fdiv {
            hint::spin_loop();
            cur = target.coordinate();
            delta = fid_delta(cur.fid, last.fid);
        }

        cur
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    /// Scan-position source that advances its frame counter by a fixed
    /// step on every poll, recording presents and starts.
    struct FakeScreen {
        fid: Cell<u16>,
        fid_step: u16,
        row: u16,
        polls: Cell<u32>,
        presents: Vec<(usize, Coordinate)>,
        starts: u32,
    }

    impl FakeScreen {
        fn new(fid_step: u16) -> Self {
            Self {
                fid: Cell::new(0),
                fid_step,
                row: 0,
                polls: Cell::new(0),
                presents: Vec::new(),
                starts: 0,
            }
        }

        fn with_row(fid_step: u16, row: u16) -> Self {
            let mut screen = Self::new(fid_step);
            screen.row = row;
            screen
        }
    }

    impl ScanoutTarget for FakeScreen {
        fn coordinate(&self) -> Coordinate {
            let fid = self.fid.get();
            self.fid.set(fid.wrapping_add(self.fid_step));
            self.polls.set(self.polls.get() + 1);
            Coordinate { fid, row: self.row }
        }

        fn present(&mut self, slot: usize) {
            // Record the position the screen will report next, i.e. what
            // the presenter last observed before committing.
            let observed = Coordinate {
                fid: self.fid.get().wrapping_sub(self.fid_step),
                row: self.row,
            };
            self.presents.push((slot, observed));
        }

        fn start(&mut self) {
            self.starts += 1;
        }
    }

    /// Serves `frames` frames then end-of-stream, with optional scripted
    /// failures.
    struct FakeSource {
        frames: u64,
        served: u64,
        decode_error_on: Option<u64>,
        pipeline_error_on: Option<u64>,
    }

    impl FakeSource {
        fn new(frames: u64) -> Self {
            Self {
                frames,
                served: 0,
                decode_error_on: None,
                pipeline_error_on: None,
            }
        }
    }

    impl FrameSource for FakeSource {
        fn next_frame(&mut self, dst: &mut [u8]) -> Result<FrameStep, VideoError> {
            if self.pipeline_error_on == Some(self.served) {
                return Err(VideoError::Pipeline("scripted failure".into()));
            }
            if self.served == self.frames {
                return Ok(FrameStep::EndOfStream);
            }
            let n = self.served;
            self.served += 1;
            if self.decode_error_on == Some(n) {
                return Err(VideoError::Decode("scripted bad frame".into()));
            }
            dst.fill(n as u8);
            Ok(FrameStep::Frame)
        }
    }

    struct MemPool {
        slots: [Vec<u8>; 2],
        flushes: u32,
    }

    impl MemPool {
        fn new() -> Self {
            Self {
                slots: [vec![0u8; 16], vec![0u8; 16]],
                flushes: 0,
            }
        }
    }

    impl SlotPool for MemPool {
        fn data_mut(&mut self, slot: usize) -> &mut [u8] {
            &mut self.slots[slot]
        }

        fn flush(&mut self, slot: usize) -> Result<()> {
            assert!(slot < 2);
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn presents_every_frame_alternating_slots() {
        let mut source = FakeSource::new(5);
        let mut pool = MemPool::new();
        let mut screen = FakeScreen::new(1);

        let stats = Presenter::new(1)
            .play(&mut source, &mut pool, &mut screen)
            .unwrap();

        assert_eq!(stats.frames_presented, 5);
        let slots: Vec<usize> = screen.presents.iter().map(|(s, _)| *s).collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(screen.starts, 1);
        assert_eq!(pool.flushes, 5);
    }

    #[test]
    fn first_frame_starts_scanout_without_pacing() {
        let mut source = FakeSource::new(1);
        let mut pool = MemPool::new();
        let mut screen = FakeScreen::new(1);

        let stats = Presenter::new(3)
            .play(&mut source, &mut pool, &mut screen)
            .unwrap();

        assert_eq!(stats.frames_presented, 1);
        assert_eq!(stats.deadline_misses, 0);
        assert_eq!(screen.starts, 1);
        // One poll to take the reference coordinate, none to pace
        assert_eq!(screen.polls.get(), 1);
    }

    #[test]
    fn empty_stream_never_touches_the_device() {
        let mut source = FakeSource::new(0);
        let mut pool = MemPool::new();
        let mut screen = FakeScreen::new(1);

        let stats = Presenter::new(3)
            .play(&mut source, &mut pool, &mut screen)
            .unwrap();

        assert_eq!(stats.frames_presented, 0);
        assert_eq!(screen.starts, 0);
        assert!(screen.presents.is_empty());
    }

    #[test]
    fn pace_waits_for_both_divider_boundaries() {
        // Clock starts at fid 0 and advances by one per poll. With
        // FDIV = 3 the handover must not happen before fid 2, and the
        // reference must not move on before fid 3.
        let mut presenter = Presenter::new(3);
        let mut screen = FakeScreen::new(1);

        let reference = presenter.pace(&mut screen, 1, Coordinate { fid: 0, row: 0 });

        let (slot, at) = screen.presents[0];
        assert_eq!(slot, 1);
        assert!(at.fid >= 2, "presented at fid {} before FDIV - 1", at.fid);
        assert!(reference.fid >= 3, "reference moved at fid {}", reference.fid);
        assert_eq!(presenter.stats.deadline_misses, 0);
    }

    #[test]
    fn pace_handles_counter_wraparound() {
        let mut presenter = Presenter::new(3);
        let mut screen = FakeScreen::new(1);
        screen.fid.set(u16::MAX);

        let reference = presenter.pace(
            &mut screen,
            0,
            Coordinate {
                fid: u16::MAX,
                row: 0,
            },
        );

        // u16::MAX + 3 wraps to 2
        assert_eq!(reference.fid, 2);
        assert_eq!(presenter.stats.deadline_misses, 0);
    }

    #[test]
    fn overshot_frame_counts_as_miss_but_playback_continues() {
        // Each poll jumps five frames ahead: every steady-state frame is
        // hopelessly late with FDIV = 2.
        let mut source = FakeSource::new(4);
        let mut pool = MemPool::new();
        let mut screen = FakeScreen::new(5);

        let stats = Presenter::new(2)
            .play(&mut source, &mut pool, &mut screen)
            .unwrap();

        assert_eq!(stats.frames_presented, 4);
        assert_eq!(stats.deadline_misses, 3);
    }

    #[test]
    fn last_row_counts_as_miss() {
        // delta == FDIV - 1 but the scan is already on the final row:
        // too close to the boundary to present safely.
        let mut source = FakeSource::new(2);
        let mut pool = MemPool::new();
        let mut screen = FakeScreen::with_row(1, DEADLINE_MARGIN_ROW);

        let stats = Presenter::new(2)
            .play(&mut source, &mut pool, &mut screen)
            .unwrap();

        assert_eq!(stats.frames_presented, 2);
        assert_eq!(stats.deadline_misses, 1);
    }

    #[test]
    fn decode_error_is_logged_and_frame_still_presented() {
        let mut source = FakeSource::new(3);
        source.decode_error_on = Some(1);
        let mut pool = MemPool::new();
        let mut screen = FakeScreen::new(1);

        let stats = Presenter::new(1)
            .play(&mut source, &mut pool, &mut screen)
            .unwrap();

        assert_eq!(stats.frames_presented, 3);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(screen.presents.len(), 3);
    }

    #[test]
    fn pipeline_error_stops_playback() {
        let mut source = FakeSource::new(5);
        source.pipeline_error_on = Some(2);
        let mut pool = MemPool::new();
        let mut screen = FakeScreen::new(1);

        let res = Presenter::new(1).play(&mut source, &mut pool, &mut screen);

        assert!(res.is_err());
        assert_eq!(screen.presents.len(), 2);
    }

    #[test]
    #[should_panic(expected = "frame-rate divider must be positive")]
    fn rejects_nonpositive_divider() {
        let _ = Presenter::new(0);
    }
}
