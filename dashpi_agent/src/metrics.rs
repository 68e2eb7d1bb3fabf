//! Metrics collection using sysinfo for dashpi_agent.
//!
//! Every call is synchronous and may block for the sampling window; callers on
//! the async runtime go through `spawn_blocking`.

use anyhow::{Context, Result};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;
use sysinfo::{
    Components, CpuRefreshKind, Disks, Networks, ProcessRefreshKind, ProcessesToUpdate, System,
};
use tracing::warn;

use crate::services::parse_service_status;
use crate::software::parse_software_list;
use crate::types::{
    HostInfo, NetData, ProcessInfo, ServiceEntry, SoftwareEntry, StatsSnapshot, UsageData,
};

/// Point-in-time snapshots of the host. Implementations keep no protocol
/// state; only OS counters carry over between calls.
pub trait MetricSource: Send + Sync + 'static {
    fn cpu(&self) -> Result<f32>;
    fn ram(&self) -> Result<UsageData>;
    fn swap(&self) -> Result<UsageData>;
    fn disk(&self) -> Result<UsageData>;
    fn network(&self) -> Result<NetData>;
    /// CPU temperature in degrees Celsius, `None` without a sensor.
    fn temperature(&self) -> Result<Option<f32>>;
    fn processes(&self) -> Result<Vec<ProcessInfo>>;
    fn host(&self) -> Result<HostInfo>;
    fn software_list(&self) -> Result<Vec<SoftwareEntry>>;
    fn services(&self) -> Result<Vec<ServiceEntry>>;
}

pub fn round_percent(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}

fn usage(used: u64, total: u64) -> UsageData {
    let percent = if total == 0 {
        0.0
    } else {
        round_percent(used as f32 / total as f32 * 100.0)
    };
    UsageData {
        percent,
        total,
        used,
    }
}

// Failed collaborators degrade to an empty field; the tick still goes out.
fn or_default<T: Default>(what: &str, r: Result<T>) -> T {
    r.unwrap_or_else(|e| {
        warn!("{what} collection failed: {e:#}");
        T::default()
    })
}

pub fn collect_stats(source: &dyn MetricSource) -> StatsSnapshot {
    StatsSnapshot {
        cpu: round_percent(or_default("cpu", source.cpu())),
        ram: or_default("ram", source.ram()),
        swap: or_default("swap", source.swap()),
        disk: or_default("disk", source.disk()),
        network: or_default("network", source.network()),
        temp: or_default("temperature", source.temperature()),
    }
}

pub fn collect_processes(source: &dyn MetricSource) -> Vec<ProcessInfo> {
    or_default("process", source.processes())
}

pub fn collect_host(source: &dyn MetricSource) -> HostInfo {
    or_default("host", source.host())
}

pub fn collect_software(source: &dyn MetricSource) -> Vec<SoftwareEntry> {
    or_default("software", source.software_list())
}

pub fn collect_services(source: &dyn MetricSource) -> Vec<ServiceEntry> {
    or_default("service", source.services())
}

/// Default source backed by sysinfo and the DietPi tools.
///
/// Every call builds its own sysinfo handles, so concurrent sessions never
/// move each other's refresh baselines; only OS counters are shared.
pub struct SysinfoSource {
    sample_interval: Duration,
    software_tool: PathBuf,
    services_tool: PathBuf,
}

impl SysinfoSource {
    pub fn new(
        sample_interval: Duration,
        software_tool: impl Into<PathBuf>,
        services_tool: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sample_interval,
            software_tool: software_tool.into(),
            services_tool: services_tool.into(),
        }
    }

    // usage figures are deltas between two refreshes, one window apart
    fn window(&self) -> Duration {
        self.sample_interval.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)
    }
}

impl MetricSource for SysinfoSource {
    fn cpu(&self) -> Result<f32> {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        thread::sleep(self.window());
        sys.refresh_cpu_usage();
        Ok(sys.global_cpu_usage().clamp(0.0, 100.0))
    }

    fn ram(&self) -> Result<UsageData> {
        let mut sys = System::new();
        sys.refresh_memory();
        let total = sys.total_memory();
        Ok(usage(total.saturating_sub(sys.available_memory()), total))
    }

    fn swap(&self) -> Result<UsageData> {
        let mut sys = System::new();
        sys.refresh_memory();
        Ok(usage(sys.used_swap(), sys.total_swap()))
    }

    fn disk(&self) -> Result<UsageData> {
        let disks = Disks::new_with_refreshed_list();
        let root = disks
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .context("no disk mounted at /")?;
        let total = root.total_space();
        Ok(usage(total.saturating_sub(root.available_space()), total))
    }

    fn network(&self) -> Result<NetData> {
        let nets = Networks::new_with_refreshed_list();
        Ok(nets
            .iter()
            .filter(|(name, _)| name.as_str() != "lo")
            .fold(NetData::default(), |acc, (_, data)| NetData {
                sent: acc.sent.saturating_add(data.total_transmitted()),
                received: acc.received.saturating_add(data.total_received()),
            }))
    }

    fn temperature(&self) -> Result<Option<f32>> {
        let components = Components::new_with_refreshed_list();
        Ok(best_cpu_temp(&components).map(|t| (t * 10.0).round() / 10.0))
    }

    fn processes(&self) -> Result<Vec<ProcessInfo>> {
        let kind = ProcessRefreshKind::nothing().with_cpu().with_memory();
        let mut sys = System::new();
        sys.refresh_cpu_list(CpuRefreshKind::nothing());
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, kind);
        thread::sleep(self.window());
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, kind);
        let cores = sys.cpus().len().max(1) as f32;
        Ok(sys
            .processes()
            .values()
            // kernel threads have no memory of their own
            .filter(|p| p.memory() > 0)
            .map(|p| ProcessInfo {
                pid: p.pid().as_u32(),
                name: p.name().to_string_lossy().into_owned(),
                cpu: round_percent((p.cpu_usage() / cores).clamp(0.0, 100.0)),
                ram: p.memory() / (1024 * 1024),
            })
            .collect())
    }

    fn host(&self) -> Result<HostInfo> {
        let hostname = System::host_name()
            .or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()))
            .unwrap_or_else(|| "unknown".into());
        let platform = format!(
            "{} {}",
            System::name().unwrap_or_default(),
            System::os_version().unwrap_or_default()
        )
        .trim()
        .to_string();
        let (interface, ip) =
            primary_interface(&Networks::new_with_refreshed_list()).unwrap_or_default();

        Ok(HostInfo {
            hostname,
            uptime: System::uptime(),
            platform,
            kernel: System::kernel_version().unwrap_or_default(),
            arch: std::env::consts::ARCH.to_string(),
            interface,
            ip,
        })
    }

    fn services(&self) -> Result<Vec<ServiceEntry>> {
        let mut out = Command::new(&self.services_tool)
            .arg("status")
            .output()
            .with_context(|| format!("couldn't run {}", self.services_tool.display()))?;
        anyhow::ensure!(
            !out.stdout.is_empty(),
            "{} printed nothing (not running as root?)",
            self.services_tool.display()
        );
        // failed units are reported on stderr
        out.stdout.extend(&out.stderr);
        parse_service_status(&String::from_utf8_lossy(&out.stdout))
    }

    fn software_list(&self) -> Result<Vec<SoftwareEntry>> {
        let out = Command::new(&self.software_tool)
            .arg("list")
            .output()
            .with_context(|| format!("couldn't run {}", self.software_tool.display()))?;
        anyhow::ensure!(
            !out.stdout.is_empty(),
            "{} printed nothing (not running as root?)",
            self.software_tool.display()
        );
        parse_software_list(&String::from_utf8_lossy(&out.stdout))
    }
}

// Hottest sensor labelled as the CPU package, else the hottest of any.
fn best_cpu_temp(components: &Components) -> Option<f32> {
    let mut cpu = Vec::new();
    let mut any = Vec::new();
    for c in components.iter() {
        let Some(t) = c.temperature().filter(|t| !t.is_nan()) else {
            continue;
        };
        let label = c.label().to_lowercase();
        if ["cpu", "package", "tctl", "tdie", "soc"]
            .iter()
            .any(|l| label.contains(l))
        {
            cpu.push(t);
        }
        any.push(t);
    }
    let hottest = |temps: Vec<f32>| temps.into_iter().max_by(|a, b| a.total_cmp(b));
    hottest(cpu).or_else(|| hottest(any))
}

// First interface (by name) carrying a non-loopback IPv4 address, else any
// non-loopback address.
fn primary_interface(nets: &Networks) -> Option<(String, String)> {
    let mut candidates: Vec<(&String, IpAddr)> = nets
        .iter()
        .flat_map(|(name, data)| data.ip_networks().iter().map(move |n| (name, n.addr)))
        .filter(|(_, addr)| !addr.is_loopback())
        .collect();
    candidates.sort_by_key(|(name, addr)| (!addr.is_ipv4(), name.to_string()));
    candidates
        .first()
        .map(|(name, addr)| (name.to_string(), addr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Arc;
    use std::time::Instant;

    struct Broken;

    impl MetricSource for Broken {
        fn cpu(&self) -> Result<f32> {
            Err(anyhow!("no cpu"))
        }
        fn ram(&self) -> Result<UsageData> {
            Ok(usage(512, 1024))
        }
        fn swap(&self) -> Result<UsageData> {
            Err(anyhow!("no swap"))
        }
        fn disk(&self) -> Result<UsageData> {
            Err(anyhow!("no disk"))
        }
        fn network(&self) -> Result<NetData> {
            Err(anyhow!("no network"))
        }
        fn temperature(&self) -> Result<Option<f32>> {
            Err(anyhow!("no sensors"))
        }
        fn processes(&self) -> Result<Vec<ProcessInfo>> {
            Err(anyhow!("no processes"))
        }
        fn host(&self) -> Result<HostInfo> {
            Err(anyhow!("no host"))
        }
        fn software_list(&self) -> Result<Vec<SoftwareEntry>> {
            Err(anyhow!("no tool"))
        }
        fn services(&self) -> Result<Vec<ServiceEntry>> {
            Err(anyhow!("no tool"))
        }
    }

    #[test]
    fn rounding_keeps_two_decimals() {
        assert_eq!(round_percent(12.3456), 12.35);
        assert_eq!(round_percent(0.0), 0.0);
    }

    #[test]
    fn sampling_window_never_drops_below_sysinfo_minimum() {
        let source = SysinfoSource::new(Duration::ZERO, "/nonexistent", "/nonexistent");
        assert_eq!(source.window(), sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        let slow = SysinfoSource::new(Duration::from_secs(3), "/nonexistent", "/nonexistent");
        assert_eq!(slow.window(), Duration::from_secs(3));
    }

    #[test]
    fn usage_handles_zero_total() {
        assert_eq!(usage(0, 0).percent, 0.0);
        assert_eq!(usage(1, 3).percent, 33.33);
    }

    #[test]
    fn failed_fields_degrade_to_zero() {
        let snap = collect_stats(&Broken);
        assert_eq!(snap.cpu, 0.0);
        assert_eq!(snap.ram.percent, 50.0);
        assert_eq!(snap.swap, UsageData::default());
        assert_eq!(snap.network, NetData::default());
        assert_eq!(snap.temp, None);
        assert!(collect_processes(&Broken).is_empty());
        assert_eq!(collect_host(&Broken), HostInfo::default());
        assert!(collect_software(&Broken).is_empty());
        assert!(collect_services(&Broken).is_empty());
    }

    #[test]
    fn sysinfo_source_reports_sane_memory() {
        let src = SysinfoSource::new(
            Duration::from_millis(10),
            "/nonexistent/dietpi-software",
            "/nonexistent/dietpi-services",
        );
        let ram = src.ram().unwrap();
        assert!(ram.total > 0);
        assert!(ram.used <= ram.total);
        assert!(src.software_list().is_err());
        assert!(src.services().is_err());
    }

    // Keeps every CPU busy for the first half of `window` from `start`.
    fn burn_first_half(start: Instant, window: Duration) -> Vec<thread::JoinHandle<()>> {
        let threads = thread::available_parallelism().map_or(1, |n| n.get());
        let stop = start + window / 2;
        (0..threads)
            .map(|_| {
                thread::spawn(move || {
                    while Instant::now() < stop {
                        std::hint::spin_loop();
                    }
                })
            })
            .collect()
    }

    #[test]
    fn overlapping_cpu_samples_keep_their_own_window() {
        let window = Duration::from_millis(800);
        let src = Arc::new(SysinfoSource::new(window, "", ""));

        let alone = {
            let burners = burn_first_half(Instant::now(), window);
            let v = src.cpu().unwrap();
            burners.into_iter().for_each(|b| b.join().unwrap());
            v
        };
        // the host must show the load at all for the comparison to mean anything
        if alone < 10.0 {
            return;
        }

        let start = Instant::now();
        let burners = burn_first_half(start, window);
        let first = {
            let src = Arc::clone(&src);
            thread::spawn(move || src.cpu().unwrap())
        };
        // a second session starts sampling halfway through the first one's window
        thread::sleep(window / 2);
        let second = src.cpu().unwrap();
        let first = first.join().unwrap();
        burners.into_iter().for_each(|b| b.join().unwrap());

        assert!(
            first > alone / 2.0,
            "first sample {first} lost the load it saw alone ({alone})"
        );
        assert!((0.0..=100.0).contains(&second));
    }
}
