//! Generic protocol driver.
//!
//! Every database read or write is a [`DatabaseOperation`]: a small state machine
//! that issues one request at a time and consumes the messages the transport
//! delivers. [`run_operation`] owns the pieces the operations have in common:
//! listener registration, the supervisory watchdog, restart or abort on timeout,
//! disconnect handling, cancellation and finalization.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::insteon::address::InsteonAddress;
use crate::insteon::msg::Msg;
use crate::insteon::transport::{Transport, TransportEvent, TransportListener};
use crate::metrics;

/// Result of feeding one step to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Not addressed to this operation; the inactivity timer keeps running.
    Ignored,
    /// Consumed; the operation is waiting for its next reply.
    Accepted,
    /// Nothing left to do.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Throw away partial state and run the protocol again from the top.
    Restart,
    /// Give up and finalize with whatever was applied so far.
    Abort,
}

/// How a driver run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    TimedOut,
    Disconnected,
    Stopped,
}

pub trait DatabaseOperation: Send {
    /// Short label used in log lines, e.g. `"link db read 11.22.33"`.
    fn describe(&self) -> String;

    /// Maximum silence tolerated between accepted messages.
    fn timeout(&self) -> Duration;

    fn timeout_policy(&self) -> TimeoutPolicy;

    /// Reset the model and send the first request.
    fn start(&mut self, transport: &Transport) -> Progress;

    /// Called after a timeout under [`TimeoutPolicy::Restart`].
    fn restart(&mut self, transport: &Transport) -> Progress {
        self.start(transport)
    }

    fn handle_message(&mut self, msg: &Msg, transport: &Transport) -> Progress;

    /// Persist status on the model and run the completion hooks.
    fn finish(&mut self, outcome: Outcome);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyKind {
    Direct,
    Ack,
    Nack,
}

/// Direct message sent to us by one particular device.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeviceReply {
    pub kind: ReplyKind,
    pub cmd1: u8,
    pub cmd2: u8,
    pub extended: bool,
}

pub(crate) fn device_reply(msg: &Msg, from: InsteonAddress) -> Option<DeviceReply> {
    if msg.from_address() != Some(from) {
        return None;
    }
    let kind = if msg.is_direct_ack() {
        ReplyKind::Ack
    } else if msg.is_direct_nack() {
        ReplyKind::Nack
    } else if msg.is_direct() {
        ReplyKind::Direct
    } else {
        return None;
    };
    Some(DeviceReply {
        kind,
        cmd1: msg.get_byte("command1").ok()?,
        cmd2: msg.get_byte("command2").ok()?,
        extended: msg.is_extended(),
    })
}

/// Send a request, logging instead of failing. A dead transport surfaces as a
/// disconnect event or a watchdog timeout.
pub(crate) fn send(transport: &Transport, what: &str, msg: Msg) {
    if let Err(e) = transport.write_message(msg) {
        warn!("{}: failed to send request: {}", what, e);
    }
}

/// Drive `op` to completion. Returns once the operation is done, timed out under
/// [`TimeoutPolicy::Abort`], the transport went away, or `cancel` fired.
pub async fn run_operation(
    mut op: Box<dyn DatabaseOperation>,
    transport: Transport,
    cancel: CancellationToken,
    watchdog_interval: Duration,
) -> Outcome {
    let what = op.describe();
    let TransportListener { id, mut rx } = transport.add_listener();
    let started = Instant::now();
    debug!("{}: starting", what);

    let outcome = if !transport.is_connected() {
        warn!("{}: transport not connected", what);
        Outcome::Disconnected
    } else if op.start(&transport) == Progress::Done {
        Outcome::Completed
    } else {
        let mut ticker = interval_at(Instant::now() + watchdog_interval, watchdog_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_msg = Instant::now();
        let mut received: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Outcome::Stopped,
                event = rx.recv() => match event {
                    Some(TransportEvent::MessageReceived(msg)) => {
                        match op.handle_message(&msg, &transport) {
                            Progress::Ignored => {}
                            Progress::Accepted => {
                                last_msg = Instant::now();
                                received += 1;
                            }
                            Progress::Done => break Outcome::Completed,
                        }
                    }
                    Some(TransportEvent::MessageSent(_)) => {}
                    Some(TransportEvent::Disconnected) | None => {
                        warn!("{}: transport disconnected, finishing", what);
                        break Outcome::Disconnected;
                    }
                },
                _ = ticker.tick() => {
                    let idle = last_msg.elapsed();
                    if idle >= op.timeout() {
                        metrics::inc_timeouts();
                        if received == 0 {
                            warn!(
                                "{}: no messages received after {:?}, the modem may be disconnected or broken",
                                what, idle
                            );
                        } else {
                            warn!("{}: stalled after {} messages, nothing for {:?}", what, received, idle);
                        }
                        match op.timeout_policy() {
                            TimeoutPolicy::Restart => {
                                metrics::inc_restarts();
                                info!("{}: restarting", what);
                                last_msg = Instant::now();
                                if op.restart(&transport) == Progress::Done {
                                    break Outcome::Completed;
                                }
                            }
                            TimeoutPolicy::Abort => break Outcome::TimedOut,
                        }
                    }
                }
            }
        }
    };

    transport.remove_listener(id);
    op.finish(outcome);
    debug!("{}: {:?} after {:?}", what, outcome, started.elapsed());
    outcome
}
