// This is novade-hwc/src/vsync.rs
// Vsync and frame-timer delivery. Whichever thread detects a tick only
// posts a message into the backend's calloop channel; all state mutation
// stays on the main loop thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use calloop::channel::Sender;
use tracing::{debug, trace, warn};

use crate::hal::HotplugEvent;
use crate::output::OutputId;

/// Events delivered to the backend through the host's event loop.
#[derive(Debug)]
pub enum BackendEvent {
    /// A vsync tick, real (hardware interrupt on the reference device) or
    /// generated by the software vsync thread.
    Vsync,
    /// The one-shot frame timer armed after an output's commit expired.
    FrameTimerExpired(OutputId),
    /// Device hot-plug notification.
    Hotplug(HotplugEvent),
}

/// Dedicated thread generating a synthetic vsync tick at a fixed interval
/// when no hardware interrupt is available.
///
/// The thread only posts [`BackendEvent::Vsync`] messages; it never touches
/// renderer or output state.
pub struct SoftwareVsync {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SoftwareVsync {
    pub fn spawn(interval: Duration, events: Sender<BackendEvent>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("novade-hwc-vsync".into())
            .spawn(move || {
                debug!(?interval, "software vsync generator started");
                loop {
                    thread::sleep(interval);
                    if thread_stop.load(Ordering::Relaxed) {
                        break;
                    }
                    if events.send(BackendEvent::Vsync).is_err() {
                        // Receiver gone, the backend is shutting down.
                        break;
                    }
                }
                debug!("software vsync generator stopped");
            })
            .expect("failed to spawn software vsync thread");
        SoftwareVsync {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SoftwareVsync {
    fn drop(&mut self) {
        self.stop();
    }
}

enum TimerCmd {
    Arm(OutputId, Instant),
    Cancel(OutputId),
    Shutdown,
}

/// One-shot per-output frame timers.
///
/// After each commit the output driver (re)arms a deadline of one refresh
/// interval; expiry synthesizes a frame-finished signal even without a
/// per-output vsync interrupt. Deadlines live on a helper thread that only
/// posts [`BackendEvent::FrameTimerExpired`] messages.
pub struct FrameTimers {
    cmds: mpsc::Sender<TimerCmd>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FrameTimers {
    pub fn spawn(events: Sender<BackendEvent>) -> Self {
        let (cmds, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("novade-hwc-frame-timer".into())
            .spawn(move || Self::run(rx, events))
            .expect("failed to spawn frame timer thread");
        FrameTimers {
            cmds,
            handle: Some(handle),
        }
    }

    /// (Re)arms the one-shot timer for an output. A pending deadline for
    /// the same output is replaced.
    pub fn arm(&self, output: OutputId, after: Duration) {
        let _ = self.cmds.send(TimerCmd::Arm(output, Instant::now() + after));
    }

    pub fn cancel(&self, output: OutputId) {
        let _ = self.cmds.send(TimerCmd::Cancel(output));
    }

    fn run(rx: mpsc::Receiver<TimerCmd>, events: Sender<BackendEvent>) {
        let mut deadlines: HashMap<OutputId, Instant> = HashMap::new();
        loop {
            let now = Instant::now();
            // Fire everything due before sleeping again.
            let due: Vec<OutputId> = deadlines
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(output, _)| *output)
                .collect();
            for output in due {
                deadlines.remove(&output);
                trace!(output = output.raw(), "frame timer expired");
                if events.send(BackendEvent::FrameTimerExpired(output)).is_err() {
                    return;
                }
            }

            let timeout = deadlines
                .values()
                .min()
                .map(|deadline| deadline.saturating_duration_since(now))
                .unwrap_or(Duration::from_millis(500));
            match rx.recv_timeout(timeout) {
                Ok(TimerCmd::Arm(output, deadline)) => {
                    deadlines.insert(output, deadline);
                }
                Ok(TimerCmd::Cancel(output)) => {
                    deadlines.remove(&output);
                }
                Ok(TimerCmd::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
                Err(mpsc::RecvTimeoutError::Timeout) => {}
            }
        }
    }
}

impl Drop for FrameTimers {
    fn drop(&mut self) {
        if self.cmds.send(TimerCmd::Shutdown).is_err() {
            warn!("frame timer thread already gone at shutdown");
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calloop::channel::{channel, Event};
    use calloop::EventLoop;

    fn drain_events(
        event_loop: &mut EventLoop<'_, Vec<BackendEvent>>,
        acc: &mut Vec<BackendEvent>,
        deadline: Duration,
    ) {
        let start = Instant::now();
        while acc.is_empty() && start.elapsed() < deadline {
            event_loop
                .dispatch(Some(Duration::from_millis(20)), acc)
                .unwrap();
        }
    }

    #[test]
    fn test_frame_timer_fires_through_channel() {
        let mut event_loop: EventLoop<Vec<BackendEvent>> = EventLoop::try_new().unwrap();
        let (tx, rx) = channel();
        event_loop
            .handle()
            .insert_source(rx, |event, _, acc: &mut Vec<BackendEvent>| {
                if let Event::Msg(msg) = event {
                    acc.push(msg);
                }
            })
            .unwrap();

        let timers = FrameTimers::spawn(tx);
        timers.arm(OutputId::new(4), Duration::from_millis(5));

        let mut acc = Vec::new();
        drain_events(&mut event_loop, &mut acc, Duration::from_secs(2));
        assert!(matches!(
            acc.first(),
            Some(BackendEvent::FrameTimerExpired(o)) if o.raw() == 4
        ));
    }

    #[test]
    fn test_cancelled_timer_does_not_fire() {
        let mut event_loop: EventLoop<Vec<BackendEvent>> = EventLoop::try_new().unwrap();
        let (tx, rx) = channel();
        event_loop
            .handle()
            .insert_source(rx, |event, _, acc: &mut Vec<BackendEvent>| {
                if let Event::Msg(msg) = event {
                    acc.push(msg);
                }
            })
            .unwrap();

        let timers = FrameTimers::spawn(tx);
        timers.arm(OutputId::new(9), Duration::from_millis(60));
        timers.cancel(OutputId::new(9));

        let mut acc = Vec::new();
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(150) {
            event_loop
                .dispatch(Some(Duration::from_millis(20)), &mut acc)
                .unwrap();
        }
        assert!(acc.is_empty());
    }

    #[test]
    fn test_software_vsync_ticks() {
        let mut event_loop: EventLoop<Vec<BackendEvent>> = EventLoop::try_new().unwrap();
        let (tx, rx) = channel();
        event_loop
            .handle()
            .insert_source(rx, |event, _, acc: &mut Vec<BackendEvent>| {
                if let Event::Msg(msg) = event {
                    acc.push(msg);
                }
            })
            .unwrap();

        let mut vsync = SoftwareVsync::spawn(Duration::from_millis(5), tx);
        let mut acc = Vec::new();
        drain_events(&mut event_loop, &mut acc, Duration::from_secs(2));
        vsync.stop();
        assert!(matches!(acc.first(), Some(BackendEvent::Vsync)));
    }
}
