//! Audio output plumbing between the core and the platform playback device.
//!
//! The relay owns one dedicated output thread per session. The thread
//! starts the device and then parks inside the core's blocking audio loop;
//! the core calls back into `write_i16`/`write_u8` from its own threads to
//! push generated samples.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::{CoreError, CoreResult};

/// How long `quit` waits for the core to leave its audio loop before the
/// output thread is abandoned.
const QUIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Backoff when the device accepts zero samples. The device write is
/// non-blocking-capable, so this is a retry loop rather than a select.
const ZERO_PROGRESS_BACKOFF: Duration = Duration::from_millis(1);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SampleFormat {
    Pcm8,
    Pcm16,
}

impl SampleFormat {
    pub fn sample_size(self) -> usize {
        match self {
            SampleFormat::Pcm8 => 1,
            SampleFormat::Pcm16 => 2,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct AudioSpec {
    pub sample_rate: i32,
    pub format: SampleFormat,
    pub channels: usize,
}

impl AudioSpec {
    pub fn frame_size(&self) -> usize {
        self.channels * self.format.sample_size()
    }
}

/// Platform playback device.
///
/// `write_*` return the number of samples accepted, zero when the device
/// cannot take more right now, or a negative error code. Raising the output
/// thread's scheduling priority, if the platform supports it, is `start`'s
/// business.
pub trait AudioDevice: Send {
    /// Minimum usable device buffer size in bytes for the given spec.
    fn min_buffer_size(&self, spec: &AudioSpec) -> usize;
    fn start(&mut self);
    fn write_i16(&mut self, samples: &[i16]) -> i32;
    fn write_u8(&mut self, samples: &[u8]) -> i32;
    fn stop(&mut self);
}

enum SampleBuffer {
    Pcm8(Vec<u8>),
    Pcm16(Vec<i16>),
}

/// Handle to a running output thread, detached from the relay so shutdown
/// can wait on it without holding the relay lock (an in-flight `write_*`
/// needs that lock to finish, and the core's loop only exits once it does).
pub struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

impl Worker {
    /// Waits up to `QUIT_TIMEOUT` for the core to leave its audio loop,
    /// then joins. On timeout the thread is detached with a warning.
    pub fn wait(self) {
        match self.done.recv_timeout(QUIT_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    warn!("audio thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "audio thread did not exit within {:?}, detaching it",
                    QUIT_TIMEOUT
                );
            }
        }
    }
}

/// One audio session: a device, a reusable sample buffer and the output
/// thread. Re-`init` after `quit` is supported; concurrent `init` is not.
#[derive(Default)]
pub struct AudioRelay {
    device: Option<Arc<Mutex<Box<dyn AudioDevice>>>>,
    buffer: Option<SampleBuffer>,
    worker: Option<Worker>,
}

impl AudioRelay {
    pub fn new() -> AudioRelay {
        AudioRelay::default()
    }

    /// Opens a session: sizes the reusable buffer (clamping `desired_frames`
    /// up to the device minimum, rounded to whole frames), then spawns the
    /// output thread which starts the device and runs `core_entry`, the
    /// core's blocking audio-generation loop.
    ///
    /// Returns the buffer size in frames.
    pub fn init<F>(
        &mut self,
        device: Box<dyn AudioDevice>,
        spec: AudioSpec,
        desired_frames: usize,
        core_entry: F,
    ) -> CoreResult<usize>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.worker.is_some() {
            return Err(CoreError::Audio("audio session already active".to_string()));
        }

        let frame_size = spec.frame_size();
        let min_frames = (device.min_buffer_size(&spec) + frame_size - 1) / frame_size;
        let frames = desired_frames.max(min_frames);
        let samples = frames * spec.channels;

        info!(
            "audio init: rate {} Hz, {:?}, {} ch, {} frames (requested {})",
            spec.sample_rate, spec.format, spec.channels, frames, desired_frames
        );

        self.buffer = Some(match spec.format {
            SampleFormat::Pcm16 => SampleBuffer::Pcm16(vec![0; samples]),
            SampleFormat::Pcm8 => SampleBuffer::Pcm8(vec![0; samples]),
        });

        let device = Arc::new(Mutex::new(device));
        let thread_device = device.clone();
        let (done_tx, done_rx) = channel();
        let handle = thread::Builder::new()
            .name("audio".to_string())
            .spawn(move || {
                thread_device.lock().unwrap().start();
                core_entry();
                debug!("core audio loop returned");
                let _ = done_tx.send(());
            })
            .map_err(|err| CoreError::Audio(format!("failed to spawn audio thread: {}", err)))?;

        self.device = Some(device);
        self.worker = Some(Worker {
            handle,
            done: done_rx,
        });
        Ok(frames)
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    /// Buffer length in samples, zero outside a session.
    pub fn buffer_len(&self) -> usize {
        match &self.buffer {
            Some(SampleBuffer::Pcm16(buf)) => buf.len(),
            Some(SampleBuffer::Pcm8(buf)) => buf.len(),
            None => 0,
        }
    }

    pub fn buffer_i16(&mut self) -> Option<&mut [i16]> {
        match &mut self.buffer {
            Some(SampleBuffer::Pcm16(buf)) => Some(buf),
            _ => None,
        }
    }

    pub fn buffer_u8(&mut self) -> Option<&mut [u8]> {
        match &mut self.buffer {
            Some(SampleBuffer::Pcm8(buf)) => Some(buf),
            _ => None,
        }
    }

    /// Pushes one buffer of 16-bit samples to the device. Called by the
    /// core from its own thread; returns once the device has taken the
    /// whole buffer or reported a hard error.
    pub fn write_i16(&self, samples: &[i16]) {
        if let Some(device) = &self.device {
            let mut device = device.lock().unwrap();
            pump(samples, |chunk| device.write_i16(chunk));
        }
    }

    /// 8-bit counterpart of `write_i16`.
    pub fn write_u8(&self, samples: &[u8]) {
        if let Some(device) = &self.device {
            let mut device = device.lock().unwrap();
            pump(samples, |chunk| device.write_u8(chunk));
        }
    }

    /// Takes the output thread out of the relay; first phase of shutdown.
    /// Callers sharing the relay behind a lock must `wait` on the result
    /// with that lock released, then `release` the relay.
    pub fn take_worker(&mut self) -> Option<Worker> {
        self.worker.take()
    }

    /// Second phase of shutdown: stops the device and frees the buffer.
    /// Must only run once the output thread has exited (or been detached);
    /// the buffer's raw pointer may still be in the core's hands before
    /// that.
    pub fn release(&mut self) {
        if let Some(device) = self.device.take() {
            device.lock().unwrap().stop();
        }
        self.buffer = None;
    }

    /// Closes the session: waits for the output thread (the core must
    /// leave its audio loop for this to succeed), then stops the device.
    /// For a relay shared behind a lock use `take_worker`/`wait`/`release`
    /// instead, so in-flight writes can drain during the wait.
    pub fn quit(&mut self) {
        if let Some(worker) = self.take_worker() {
            worker.wait();
        }
        self.release();
    }
}

/// Full-write loop: advance on partial writes, back off ~1ms on zero
/// progress, drop the remainder on a hard error.
fn pump<T>(samples: &[T], mut write: impl FnMut(&[T]) -> i32) {
    let mut written = 0;
    while written < samples.len() {
        let result = write(&samples[written..]);
        if result > 0 {
            written += result as usize;
        } else if result == 0 {
            thread::sleep(ZERO_PROGRESS_BACKOFF);
        } else {
            warn!(
                "audio: device write returned {}, dropping {} samples",
                result,
                samples.len() - written
            );
            return;
        }
    }
}
