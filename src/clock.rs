//! # Clock
//!
//! Cycle-counter access and the calibration that turns counter ticks into processor cycles.
//!
//! The counter is whatever the architecture exposes cheaply from user space: the TSC on x86_64,
//! the virtual counter on aarch64, and a monotonic nanosecond clock everywhere else. None of
//! these necessarily tick at the core clock, so reported cycles are `ticks * multiplier` where
//! `multiplier = cpu_hz / tick_hz`.
use log::{debug, warn};
use std::fs;
use std::time::{Duration, Instant};

/// Default window used to measure the counter frequency.
pub const CALIBRATION_WINDOW: Duration = Duration::from_millis(100);

/// Read the cycle counter.
#[inline(always)]
pub fn cycles() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_rdtsc()
    }

    #[cfg(target_arch = "aarch64")]
    {
        let ticks: u64;
        unsafe {
            core::arch::asm!("mrs {}, cntvct_el0", out(reg) ticks, options(nomem, nostack));
        }
        ticks
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_nanos() as u64
    }
}

/// Counter and processor frequencies for the host, and the multiplier derived from them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Measured cycle-counter frequency.
    pub tick_hz: f64,
    /// Processor frequency, if it could be determined.
    pub cpu_hz: Option<f64>,
    /// Ticks to processor cycles.
    pub multiplier: f64,
}

impl Calibration {
    /// Calibrate against the host. `cpu_mhz` overrides processor frequency detection.
    pub fn detect(cpu_mhz: Option<f64>) -> Self {
        let tick_hz = measure_tick_hz(CALIBRATION_WINDOW);
        let cpu_hz = cpu_mhz.map(|mhz| mhz * 1e6).or_else(detect_cpu_hz);
        if cpu_hz.is_none() {
            warn!("Couldn't determine processor frequency, reporting raw counter ticks as cycles");
        }
        let calibration = Calibration::from_frequencies(tick_hz, cpu_hz);
        debug!(
            "Counter at {:.1} MHz, processor at {}, multiplier {:.4}",
            tick_hz / 1e6,
            cpu_hz.map_or("unknown".to_string(), |hz| format!("{:.1} MHz", hz / 1e6)),
            calibration.multiplier
        );
        calibration
    }

    /// Build from known frequencies. Falls back to a multiplier of 1 when either is missing or
    /// not a positive number.
    pub fn from_frequencies(tick_hz: f64, cpu_hz: Option<f64>) -> Self {
        let multiplier = match cpu_hz {
            Some(cpu) if cpu > 0.0 && tick_hz > 0.0 && cpu.is_finite() && tick_hz.is_finite() => {
                cpu / tick_hz
            }
            _ => 1.0,
        };
        Calibration { tick_hz, cpu_hz, multiplier }
    }
}

/// Count counter ticks over `window` of wall-clock time.
pub fn measure_tick_hz(window: Duration) -> f64 {
    let start = Instant::now();
    let start_ticks = cycles();
    std::thread::sleep(window);
    let ticks = cycles().wrapping_sub(start_ticks);
    let secs = start.elapsed().as_secs_f64();
    ticks as f64 / secs
}

/// Processor frequency from `/proc/cpuinfo`, falling back to cpufreq's maximum.
pub fn detect_cpu_hz() -> Option<f64> {
    if let Ok(text) = fs::read_to_string("/proc/cpuinfo") {
        if let Some(hz) = parse_cpuinfo_hz(&text) {
            return Some(hz);
        }
    }
    let khz = fs::read_to_string("/sys/devices/system/cpu/cpu0/cpufreq/cpuinfo_max_freq").ok()?;
    khz.trim().parse::<f64>().ok().map(|khz| khz * 1e3)
}

/// First processor frequency line in cpuinfo text. Understands `cpu MHz : 2400.000` (x86) and
/// `clock : 3425.000000MHz` (POWER).
pub fn parse_cpuinfo_hz(text: &str) -> Option<f64> {
    text.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let key = key.trim();
        if key != "cpu MHz" && key != "clock" {
            return None;
        }
        let value = value.trim().trim_end_matches("MHz").trim();
        value.parse::<f64>().ok().filter(|mhz| *mhz > 0.0).map(|mhz| mhz * 1e6)
    })
}
