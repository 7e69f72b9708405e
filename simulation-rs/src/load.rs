//! Synthetic CPU and memory load
//!
//! [`LoadGenerator::generate`] starts the configured load and returns a
//! [`LoadGuard`]; the load lasts exactly as long as the guard.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use config_rs::LoadConfig;
use rand::Rng;

/// Length of one busy/idle duty cycle
const DUTY_CYCLE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct LoadGenerator {
    cpu_cores: usize,
    cpu_percentage: f64,
    memory_bytes: usize,
    memory_variance: f64,
    active: Arc<AtomicUsize>,
}

impl LoadGenerator {
    pub fn new(config: &LoadConfig) -> Self {
        let cpu_cores = match config.cpu_cores {
            n if n < 0 => thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n as usize,
        };

        Self {
            cpu_cores,
            cpu_percentage: percent(config.cpu_percentage, 100.0),
            memory_bytes: config.memory_bytes,
            memory_variance: percent(config.memory_variance, 100.0),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(&LoadConfig::default())
    }

    pub fn cpu_enabled(&self) -> bool {
        self.cpu_cores > 0 && self.cpu_percentage > 0.0
    }

    /// Number of guards currently alive
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Start load for one request
    pub fn generate(&self) -> LoadGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        let stop = Arc::new(AtomicBool::new(false));

        let mut workers = 0;
        if self.cpu_enabled() {
            let busy = DUTY_CYCLE.mul_f64(self.cpu_percentage / 100.0);
            for core in 0..self.cpu_cores {
                let stop = Arc::clone(&stop);
                let spawned = thread::Builder::new()
                    .name(format!("load-cpu-{}", core))
                    .spawn(move || burn(&stop, busy));
                match spawned {
                    Ok(_) => workers += 1,
                    Err(e) => log::warn!("Failed to start CPU load thread: {}", e),
                }
            }
        }

        let memory = self.allocate();
        if workers > 0 || !memory.is_empty() {
            log::trace!(
                "Generating load: {} cpu threads, {} bytes",
                workers,
                memory.len()
            );
        }

        LoadGuard {
            stop,
            memory,
            active: Arc::clone(&self.active),
        }
    }

    fn allocate(&self) -> Vec<u8> {
        if self.memory_bytes == 0 {
            return Vec::new();
        }
        let size = if self.memory_variance > 0.0 {
            let spread = self.memory_bytes as f64 * self.memory_variance / 100.0;
            let offset = rand::thread_rng().gen_range(-spread..=spread);
            (self.memory_bytes as f64 + offset).max(0.0) as usize
        } else {
            self.memory_bytes
        };
        // non-zero fill so the pages are actually committed
        vec![0xA5; size]
    }
}

impl Default for LoadGenerator {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Clamp into `0..=max`; NaN and infinities disable the knob
fn percent(value: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, max)
    } else {
        0.0
    }
}

fn burn(stop: &AtomicBool, busy: Duration) {
    while !stop.load(Ordering::Relaxed) {
        let start = Instant::now();
        while start.elapsed() < busy {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            std::hint::spin_loop();
        }
        thread::sleep(DUTY_CYCLE.saturating_sub(busy));
    }
}

/// Holds request load; dropping it stops the CPU threads and frees memory
#[derive(Debug)]
pub struct LoadGuard {
    stop: Arc<AtomicBool>,
    memory: Vec<u8>,
    active: Arc<AtomicUsize>,
}

impl LoadGuard {
    pub fn allocated(&self) -> usize {
        self.memory.len()
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
