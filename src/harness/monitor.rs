//! Background resource sampler for a simulation run.
//!
//! A dedicated thread records (elapsed, resident memory, CPU%) for the whole
//! process at a fixed interval. Limits are advisory: a sample over
//! `memory_limit_mb` or `cpu_limit_percent` is logged and remembered, never
//! enforced. The sampler shares nothing with the run except the append-only
//! sample and breach buffers.

use crate::core::config::SimulationConfig;
use crate::core::error::HarnessError;
use crate::harness::model::SimulationMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::warn;

const STOP_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub elapsed: Duration,
    pub memory_mb: f64,
    pub cpu_percent: f64,
}

struct Running {
    started: Instant,
    stop: Arc<AtomicBool>,
    samples: Arc<Mutex<Vec<ResourceSample>>>,
    breaches: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

pub struct ResourceMonitor {
    interval: Duration,
    memory_limit_mb: f64,
    cpu_limit_percent: f64,
    running: Option<Running>,
    breaches: Vec<String>,
    samples: Vec<ResourceSample>,
}

impl ResourceMonitor {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            interval: config.sample_interval(),
            memory_limit_mb: config.memory_limit_mb,
            cpu_limit_percent: config.cpu_limit_percent,
            running: None,
            breaches: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn start(&mut self) -> Result<(), HarnessError> {
        if self.running.is_some() {
            return Ok(());
        }
        self.breaches.clear();
        self.samples.clear();

        let started = Instant::now();
        let stop = Arc::new(AtomicBool::new(false));
        let samples = Arc::new(Mutex::new(Vec::new()));
        let breaches = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let stop = Arc::clone(&stop);
            let samples = Arc::clone(&samples);
            let breaches = Arc::clone(&breaches);
            let interval = self.interval;
            let memory_limit = self.memory_limit_mb;
            let cpu_limit = self.cpu_limit_percent;
            thread::Builder::new()
                .name("changesim-monitor".to_string())
                .spawn(move || {
                    sample_loop(
                        started,
                        interval,
                        memory_limit,
                        cpu_limit,
                        &stop,
                        &samples,
                        &breaches,
                    )
                })?
        };

        self.running = Some(Running {
            started,
            stop,
            samples,
            breaches,
            handle,
        });
        Ok(())
    }

    /// Halt sampling and reduce the samples to base metrics. With no samples
    /// every field is zero.
    pub fn stop(&mut self) -> SimulationMetrics {
        let Some(running) = self.running.take() else {
            return reduce(&self.samples, None);
        };
        running.stop.store(true, Ordering::SeqCst);
        let elapsed = running.started.elapsed();
        if running.handle.join().is_err() {
            warn!("resource sampler thread panicked; using samples collected so far");
        }
        self.samples = take_buffer(&running.samples);
        self.breaches = take_buffer(&running.breaches);
        reduce(&self.samples, Some(elapsed))
    }

    /// Limit breaches observed by the last completed run.
    pub fn breaches(&self) -> &[String] {
        &self.breaches
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.stop.store(true, Ordering::SeqCst);
            let _ = running.handle.join();
        }
    }
}

fn take_buffer<T: Clone>(buf: &Mutex<Vec<T>>) -> Vec<T> {
    match buf.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn push<T>(buf: &Mutex<Vec<T>>, item: T) {
    match buf.lock() {
        Ok(mut guard) => guard.push(item),
        Err(poisoned) => poisoned.into_inner().push(item),
    }
}

#[allow(clippy::too_many_arguments)]
fn sample_loop(
    started: Instant,
    interval: Duration,
    memory_limit_mb: f64,
    cpu_limit_percent: f64,
    stop: &AtomicBool,
    samples: &Mutex<Vec<ResourceSample>>,
    breaches: &Mutex<Vec<String>>,
) {
    let mut last_wall = Instant::now();
    let mut last_cpu = process_cpu_time();

    loop {
        let now = Instant::now();
        let cpu = process_cpu_time();
        let wall = now.duration_since(last_wall).as_secs_f64();
        let cpu_percent = if wall > 0.0 {
            (cpu.saturating_sub(last_cpu).as_secs_f64() / wall) * 100.0
        } else {
            0.0
        };
        last_wall = now;
        last_cpu = cpu;

        let sample = ResourceSample {
            elapsed: now.duration_since(started),
            memory_mb: resident_memory_mb(),
            cpu_percent,
        };

        if sample.memory_mb > memory_limit_mb {
            let msg = format!(
                "memory {:.1}MB over limit {:.1}MB at {:.1}s",
                sample.memory_mb,
                memory_limit_mb,
                sample.elapsed.as_secs_f64()
            );
            warn!(kind = "ResourceLimitExceeded", "{}", msg);
            push(breaches, msg);
        }
        if sample.cpu_percent > cpu_limit_percent {
            let msg = format!(
                "cpu {:.1}% over limit {:.1}% at {:.1}s",
                sample.cpu_percent,
                cpu_limit_percent,
                sample.elapsed.as_secs_f64()
            );
            warn!(kind = "ResourceLimitExceeded", "{}", msg);
            push(breaches, msg);
        }
        push(samples, sample);

        let next = Instant::now() + interval;
        while Instant::now() < next {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(STOP_POLL.min(next.saturating_duration_since(Instant::now())));
        }
        if stop.load(Ordering::SeqCst) {
            return;
        }
    }
}

fn reduce(samples: &[ResourceSample], elapsed: Option<Duration>) -> SimulationMetrics {
    if samples.is_empty() {
        return SimulationMetrics::default();
    }
    let n = samples.len() as f64;
    SimulationMetrics {
        execution_time: elapsed.map(|d| d.as_secs_f64()).unwrap_or_default(),
        memory_usage_mb: samples.iter().map(|s| s.memory_mb).sum::<f64>() / n,
        cpu_usage_percent: samples.iter().map(|s| s.cpu_percent).sum::<f64>() / n,
        ..SimulationMetrics::default()
    }
}

/// User + system CPU time of this process and its reaped children.
#[cfg(unix)]
fn process_cpu_time() -> Duration {
    fn usage(who: libc::c_int) -> Duration {
        // SAFETY: getrusage only writes into the zeroed struct we own.
        let mut ru: libc::rusage = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::getrusage(who, &mut ru) };
        if rc != 0 {
            return Duration::ZERO;
        }
        timeval(ru.ru_utime) + timeval(ru.ru_stime)
    }
    fn timeval(tv: libc::timeval) -> Duration {
        let secs = u64::try_from(tv.tv_sec).unwrap_or(0);
        let micros = u32::try_from(tv.tv_usec).unwrap_or(0).min(999_999);
        Duration::new(secs, micros * 1_000)
    }
    usage(libc::RUSAGE_SELF) + usage(libc::RUSAGE_CHILDREN)
}

#[cfg(not(unix))]
fn process_cpu_time() -> Duration {
    Duration::ZERO
}

#[cfg(target_os = "linux")]
fn resident_memory_mb() -> f64 {
    // /proc/self/statm: size resident shared text lib data dt (in pages)
    let Ok(statm) = std::fs::read_to_string("/proc/self/statm") else {
        return 0.0;
    };
    let resident_pages: u64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    // SAFETY: sysconf has no memory-safety preconditions.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page_size = u64::try_from(page_size).unwrap_or(4096);
    (resident_pages * page_size) as f64 / (1024.0 * 1024.0)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn resident_memory_mb() -> f64 {
    // Peak RSS; macOS reports bytes, the BSDs KiB.
    let mut ru: libc::rusage = unsafe { std::mem::zeroed() };
    // SAFETY: see process_cpu_time.
    if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut ru) } != 0 {
        return 0.0;
    }
    let raw = u64::try_from(ru.ru_maxrss).unwrap_or(0);
    if cfg!(target_os = "macos") {
        raw as f64 / (1024.0 * 1024.0)
    } else {
        raw as f64 / 1024.0
    }
}

#[cfg(not(unix))]
fn resident_memory_mb() -> f64 {
    0.0
}
