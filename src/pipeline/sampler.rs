use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use super::segmenter::Segmenter;
use crate::{
    measurement::{self, MeasurementConfig},
    types::{Frame, Sample},
};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to the sampling worker. Stopping or dropping it ends the loop.
#[derive(Debug)]
pub struct SamplerHandle {
    stop: Arc<AtomicBool>,
    busy: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SamplerHandle {
    /// True while a frame is being segmented and measured.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Marks one sampling cycle in flight; cleared on every exit path.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub fn start_sampler<S: Segmenter>(
    segmenter: S,
    config: MeasurementConfig,
    frame_rx: Receiver<Frame>,
    sample_tx: Sender<Sample>,
) -> SamplerHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let busy = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let busy_flag = busy.clone();

    let handle = thread::spawn(move || {
        run_sampling_loop(
            segmenter, &config, &frame_rx, &sample_tx, &stop_flag, &busy_flag,
        );
        log::info!("sampling loop finished");
    });

    SamplerHandle {
        stop,
        busy,
        handle: Some(handle),
    }
}

fn run_sampling_loop<S: Segmenter>(
    mut segmenter: S,
    config: &MeasurementConfig,
    frame_rx: &Receiver<Frame>,
    sample_tx: &Sender<Sample>,
    stop: &AtomicBool,
    busy: &AtomicBool,
) {
    while !stop.load(Ordering::Relaxed) {
        let frame = match recv_latest_frame(frame_rx) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let Some(_cycle) = InFlight::begin(busy) else {
            log::debug!("sampling cycle already in flight, skipping frame");
            continue;
        };

        match run_cycle(&mut segmenter, config, &frame) {
            Ok(sample) => {
                if let Err(TrySendError::Disconnected(_)) = sample_tx.try_send(sample) {
                    break;
                }
            }
            Err(err) => {
                log::warn!("sampling cycle failed: {err:?}");
            }
        }
    }
}

/// One sampling cycle: segment the frame and measure the mask.
pub fn run_cycle<S: Segmenter + ?Sized>(
    segmenter: &mut S,
    config: &MeasurementConfig,
    frame: &Frame,
) -> Result<Sample> {
    let mask = segmenter.segment(frame)?;
    Ok(measurement::measure(config, &mask))
}

// Older queued frames are stale by the time a cycle finishes.
fn recv_latest_frame(frame_rx: &Receiver<Frame>) -> Result<Frame, RecvTimeoutError> {
    let mut frame = frame_rx.recv_timeout(STOP_POLL_INTERVAL)?;
    while let Ok(newer) = frame_rx.try_recv() {
        frame = newer;
    }
    Ok(frame)
}
