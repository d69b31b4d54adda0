//! Single-slot frame handoff between a driver callback and a pulling consumer.
//!
//! Two mutex/condvar pairs coordinate the exchange. The arm side is where the
//! producer waits for the consumer to request a frame; the fill side is where
//! the consumer waits for the producer to deposit one. Lock order is always
//! arm before fill.
//!
//! Slot transitions are `Idle -> Armed -> Filled -> Idle`. `Stopping` can be
//! entered from any state and is terminal for the channel.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// Observable state of the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No pull in progress.
    Idle,
    /// Consumer is waiting for a frame.
    Armed,
    /// A frame was deposited and not yet collected.
    Filled,
    /// The channel was stopped.
    Stopping,
}

/// Result of [`FrameChannel::consumer_arm`].
#[derive(Debug, PartialEq, Eq)]
pub enum ArmOutcome {
    /// A frame was delivered.
    Filled(Vec<u8>),
    /// The channel was stopped before a frame arrived.
    Stopped,
    /// No frame arrived within the timeout. The slot is idle again.
    TimedOut,
}

/// Result of [`FrameChannel::producer_deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverOutcome {
    /// The frame was handed to the consumer and the consumer re-armed, or
    /// the channel stopped while waiting for it to.
    Delivered,
    /// Nobody was waiting or the channel was stopping; the frame was dropped.
    Dropped,
}

#[derive(Debug, Default)]
struct ArmSide {
    armed: bool,
    stopping: bool,
    /// Incremented on every arm so a producer can tell a new request from
    /// the one it just served.
    cycle: u64,
}

#[derive(Debug, Default)]
struct FillSide {
    frame: Option<Vec<u8>>,
    stopping: bool,
}

/// Depth-one rendezvous channel for frames.
#[derive(Debug, Default)]
pub struct FrameChannel {
    arm: Mutex<ArmSide>,
    armed_cv: Condvar,
    fill: Mutex<FillSide>,
    filled_cv: Condvar,
}

impl FrameChannel {
    /// Create an idle channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request one frame and block until it arrives, the channel stops, or
    /// `timeout` expires. `None`, or a timeout too large to express as a
    /// deadline, waits indefinitely.
    ///
    /// Only one consumer may be armed at a time.
    pub fn consumer_arm(&self, timeout: Option<Duration>) -> ArmOutcome {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        {
            let mut arm = self.arm.lock();
            if arm.stopping {
                return ArmOutcome::Stopped;
            }
            debug_assert!(!arm.armed, "consumer armed twice");
            arm.armed = true;
            arm.cycle = arm.cycle.wrapping_add(1);
            trace!(cycle = arm.cycle, "armed");
            self.armed_cv.notify_all();
        }

        {
            let mut fill = self.fill.lock();
            loop {
                if let Some(frame) = fill.frame.take() {
                    return ArmOutcome::Filled(frame);
                }
                if fill.stopping {
                    return ArmOutcome::Stopped;
                }
                match deadline {
                    Some(deadline) => {
                        if self.filled_cv.wait_until(&mut fill, deadline).timed_out() {
                            break;
                        }
                    }
                    None => self.filled_cv.wait(&mut fill),
                }
            }
        }

        // Timed out. Withdraw the request unless a producer took it in the
        // meantime, in which case its frame is already in the slot.
        let mut arm = self.arm.lock();
        if arm.armed {
            arm.armed = false;
            trace!(cycle = arm.cycle, "disarmed after timeout");
            return ArmOutcome::TimedOut;
        }
        drop(arm);

        let mut fill = self.fill.lock();
        match fill.frame.take() {
            Some(frame) => ArmOutcome::Filled(frame),
            None if fill.stopping => ArmOutcome::Stopped,
            None => ArmOutcome::TimedOut,
        }
    }

    /// Hand a frame to the armed consumer.
    ///
    /// Called from the driver's callback context. When a consumer is armed
    /// the bytes are copied into the slot and the call then blocks until the
    /// consumer arms again or the channel stops, so the driver cannot reuse
    /// its buffer while the consumer still expects it. When nobody is armed,
    /// or the channel is stopping, the frame is dropped without blocking.
    pub fn producer_deliver(&self, bytes: &[u8]) -> DeliverOutcome {
        let mut arm = self.arm.lock();
        if arm.stopping || !arm.armed {
            return DeliverOutcome::Dropped;
        }

        {
            let mut fill = self.fill.lock();
            fill.frame = Some(bytes.to_vec());
            arm.armed = false;
            self.filled_cv.notify_all();
        }

        let served = arm.cycle;
        trace!(cycle = served, len = bytes.len(), "filled");
        while arm.cycle == served && !arm.stopping {
            self.armed_cv.wait(&mut arm);
        }
        DeliverOutcome::Delivered
    }

    /// Stop the channel and wake every waiter.
    ///
    /// Does not wait for the waiters to return. Any frame not yet collected
    /// is discarded.
    pub fn stop(&self) {
        {
            let mut arm = self.arm.lock();
            arm.stopping = true;
            arm.armed = false;
            self.armed_cv.notify_all();
        }
        {
            let mut fill = self.fill.lock();
            fill.stopping = true;
            fill.frame = None;
            self.filled_cv.notify_all();
        }
        trace!("channel stopped");
    }

    /// Current slot state.
    pub fn state(&self) -> SlotState {
        let arm = self.arm.lock();
        let fill = self.fill.lock();
        if arm.stopping {
            SlotState::Stopping
        } else if fill.frame.is_some() {
            SlotState::Filled
        } else if arm.armed {
            SlotState::Armed
        } else {
            SlotState::Idle
        }
    }
}
