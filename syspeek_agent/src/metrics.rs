//! Metrics collection: raw source snapshots turned into wire payloads.
//!
//! Every rate-bearing figure (CPU%, process CPU%, disk and interface speeds)
//! goes through the shared [`RateEngine`], so HTTP handlers and stream
//! sessions observe the same counters without corrupting each other's deltas.
//! A first observation reports zero.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

use crate::error::SourceError;
use crate::rate::{Delta, RateEngine, RateKey};
use crate::sockets;
use crate::source::{MetricSource, ProcessSnapshot};
use crate::stream::{Category, Sampler};
use crate::types::{
    CpuCore, CpuInfo, DiskInfo, DiskIo, DiskPartition, FirewallInfo, GpuInfo, MemoryInfo,
    NetworkInfo, NetworkInterface, PhysicalCore, ProcessDetail, ProcessEnvVar, ProcessFd,
    ProcessInfo, ProcessList, SocketInfo,
};

/// Physical core ids at or above this are efficiency cores on hybrid parts.
const FIRST_E_CORE: usize = 24;

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round1(part as f64 / whole as f64 * 100.0)
    }
}

// deltas = [busy, total]
fn busy_percent(d: Delta) -> f64 {
    match d.deltas.as_slice() {
        [busy, total] if *total > 0 => (*busy as f64 / *total as f64 * 100.0).clamp(0.0, 100.0),
        _ => 0.0,
    }
}

/// "3d 4h 5m", "4h 5m" or "5m".
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs / 3_600) % 24;
    let minutes = (secs / 60) % 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn fd_kind(target: &str) -> &'static str {
    if target.starts_with("socket:[") {
        "socket"
    } else if target.starts_with("pipe:[") {
        "pipe"
    } else if target.starts_with("anon_inode:") {
        "anon_inode"
    } else if target.starts_with('/') {
        "file"
    } else {
        "other"
    }
}

fn to_value<T: Serialize>(v: T) -> Result<Value, SourceError> {
    serde_json::to_value(v).map_err(|e| SourceError::Failed(format!("serialize payload: {e}")))
}

// Read once per process sample, shared by every row.
struct ProcessContext {
    users: HashMap<u32, String>,
    mem_total: u64,
    boot_time: u64,
    hz: u64,
    now: Instant,
}

/// Builds payloads from a [`MetricSource`] and a shared [`RateEngine`].
#[derive(Clone)]
pub struct Collector {
    source: Arc<dyn MetricSource>,
    rates: Arc<RateEngine>,
}

impl Collector {
    pub fn new(source: Arc<dyn MetricSource>, rates: Arc<RateEngine>) -> Self {
        Self { source, rates }
    }

    pub fn shared_source(&self) -> Arc<dyn MetricSource> {
        Arc::clone(&self.source)
    }

    pub fn cpu(&self) -> Result<CpuInfo, SourceError> {
        let snap = self.source.cpu()?;
        let now = Instant::now();
        let mut usage = 0.0;
        let mut core_stats = Vec::new();
        for t in &snap.ticks {
            let pct = self
                .rates
                .observe_counters(RateKey::Cpu(t.core), &[t.busy, t.total], now)
                .map(busy_percent)
                .unwrap_or(0.0);
            match t.core {
                None => usage = pct,
                Some(id) => core_stats.push(CpuCore {
                    id,
                    usage_percent: round1(pct),
                    temperature: snap
                        .core_temps
                        .iter()
                        .find(|(core, _)| *core == id)
                        .map(|(_, t)| *t),
                    frequency: snap.frequencies.get(id).copied().filter(|f| *f > 0),
                }),
            }
        }
        let threads = core_stats.len();
        Ok(CpuInfo {
            model: snap.model,
            cores: threads,
            threads,
            physical_cores: snap.physical_cores.unwrap_or(threads),
            usage_percent: round1(usage),
            load_avg: snap.load_avg,
            core_stats,
            core_temps: snap
                .core_temps
                .iter()
                .map(|(id, t)| PhysicalCore {
                    id: *id,
                    temperature: *t,
                    kind: if *id >= FIRST_E_CORE { "E" } else { "P" },
                })
                .collect(),
            package_temp: snap.package_temp,
            uptime: format_uptime(snap.uptime_secs),
        })
    }

    pub fn memory(&self) -> Result<MemoryInfo, SourceError> {
        let m = self.source.memory()?;
        let available = if m.available > 0 {
            m.available
        } else {
            m.free + m.buffers + m.cached
        };
        let used = m.total.saturating_sub(available);
        let swap_used = m.swap_total.saturating_sub(m.swap_free);
        Ok(MemoryInfo {
            total: m.total,
            used,
            free: m.free,
            available,
            buffers: m.buffers,
            cached: m.cached,
            swap_total: m.swap_total,
            swap_used,
            swap_free: m.swap_free,
            used_percent: percent(used, m.total),
            swap_percent: percent(swap_used, m.swap_total),
        })
    }

    pub fn disk(&self) -> Result<DiskInfo, SourceError> {
        let snap = self.source.disks()?;
        let now = Instant::now();
        let partitions = snap
            .partitions
            .into_iter()
            .map(|p| {
                let used = p.total.saturating_sub(p.available);
                DiskPartition {
                    used_percent: percent(used, p.total),
                    device: p.device,
                    mount_point: p.mount_point,
                    fs_type: p.fs_type,
                    total: p.total,
                    used,
                    free: p.available,
                }
            })
            .collect();
        let io = snap
            .io
            .into_iter()
            .map(|c| {
                let d = self.rates.observe_counters(
                    RateKey::Disk(c.device.clone()),
                    &[c.read_bytes, c.write_bytes],
                    now,
                );
                DiskIo {
                    read_speed: d.as_ref().map(|d| d.rate(0) as u64).unwrap_or(0),
                    write_speed: d.as_ref().map(|d| d.rate(1) as u64).unwrap_or(0),
                    device: c.device,
                    read_bytes: c.read_bytes,
                    write_bytes: c.write_bytes,
                }
            })
            .collect();
        Ok(DiskInfo { partitions, io })
    }

    pub fn network(&self) -> Result<NetworkInfo, SourceError> {
        let now = Instant::now();
        let mut info = NetworkInfo::default();
        for i in self.source.interfaces()? {
            if i.is_loopback {
                continue;
            }
            let d = self.rates.observe_counters(
                RateKey::Interface(i.name.clone()),
                &[i.rx_bytes, i.tx_bytes],
                now,
            );
            let rx_speed = d.as_ref().map(|d| d.rate(0) as u64).unwrap_or(0);
            let tx_speed = d.as_ref().map(|d| d.rate(1) as u64).unwrap_or(0);
            info.total_rx_bytes += i.rx_bytes;
            info.total_tx_bytes += i.tx_bytes;
            info.total_rx_speed += rx_speed;
            info.total_tx_speed += tx_speed;
            info.interfaces.push(NetworkInterface {
                name: i.name,
                ip_addresses: i.addresses,
                mac: i.mac,
                rx_bytes: i.rx_bytes,
                tx_bytes: i.tx_bytes,
                rx_speed,
                tx_speed,
                rx_packets: i.rx_packets,
                tx_packets: i.tx_packets,
                is_up: i.is_up,
            });
        }
        Ok(info)
    }

    pub fn gpu(&self) -> Result<GpuInfo, SourceError> {
        self.source.gpu()
    }

    pub fn firewall(&self) -> Result<FirewallInfo, SourceError> {
        self.source.firewall()
    }

    pub fn sockets(&self) -> Result<SocketInfo, SourceError> {
        sockets::scan(&*self.source)
    }

    fn user_names(&self) -> HashMap<u32, String> {
        self.source
            .users()
            .unwrap_or_default()
            .into_iter()
            .map(|u| (u.uid, u.name))
            .collect()
    }

    fn process_context(&self) -> ProcessContext {
        ProcessContext {
            users: self.user_names(),
            mem_total: self.source.memory().map(|m| m.total).unwrap_or(0),
            boot_time: self.source.boot_time(),
            hz: self.source.clock_ticks().max(1),
            now: Instant::now(),
        }
    }

    fn process_info(&self, p: ProcessSnapshot, ctx: &ProcessContext) -> ProcessInfo {
        let hz = ctx.hz as f64;
        let cpu_percent = self
            .rates
            .observe(RateKey::Process(p.pid), p.cpu_ticks, ctx.now)
            .map(|ticks_per_sec| round1(ticks_per_sec / hz * 100.0))
            .unwrap_or(0.0);
        let command = if p.cmdline.is_empty() {
            format!("[{}]", p.name)
        } else {
            p.cmdline.join(" ")
        };
        let user = match p.uid {
            Some(uid) => ctx.users.get(&uid).cloned().unwrap_or_else(|| uid.to_string()),
            None => String::new(),
        };
        ProcessInfo {
            pid: p.pid,
            ppid: p.ppid,
            name: p.name,
            command,
            user,
            state: p.state,
            cpu_percent,
            memory_bytes: p.rss_bytes,
            memory_percent: percent(p.rss_bytes, ctx.mem_total),
            threads: p.threads,
            nice: p.nice,
            start_time: ctx.boot_time + p.start_ticks / ctx.hz,
        }
    }

    pub fn processes(&self) -> Result<ProcessList, SourceError> {
        let procs = self.source.processes()?;
        let ctx = self.process_context();
        let processes: Vec<ProcessInfo> = procs
            .into_iter()
            .map(|p| self.process_info(p, &ctx))
            .collect();
        Ok(ProcessList {
            total_count: processes.len(),
            processes,
        })
    }

    pub fn process_detail(&self, pid: u32) -> Result<ProcessDetail, SourceError> {
        let d = self.source.process_detail(pid)?;
        let command_line = d.process.cmdline.clone();
        let info = self.process_info(d.process, &self.process_context());
        let fds = self
            .source
            .descriptors(pid)
            .unwrap_or_default()
            .into_iter()
            .map(|f| ProcessFd {
                fd: f.fd,
                kind: fd_kind(&f.target),
                target: f.target,
            })
            .collect();
        let connections = sockets::connections_of(&*self.source, pid, &info.name);
        Ok(ProcessDetail {
            uptime: format_uptime(unix_now().saturating_sub(info.start_time)),
            command_line,
            cwd: d.cwd,
            exe: d.exe,
            environ: d
                .environ
                .into_iter()
                .map(|(name, value)| ProcessEnvVar { name, value })
                .collect(),
            fds,
            connections,
            children: d.children,
            uid: d.status.uid,
            gid: d.status.gid,
            groups: d.status.groups,
            vm_size: d.status.vm_size,
            vm_rss: d.status.vm_rss,
            vm_data: d.status.vm_data,
            vm_stack: d.status.vm_stack,
            vm_swap: d.status.vm_swap,
            io_read_bytes: d.io_read_bytes,
            io_write_bytes: d.io_write_bytes,
            voluntary_ctx_switches: d.status.voluntary_ctx_switches,
            involuntary_ctx_switches: d.status.involuntary_ctx_switches,
            info,
        })
    }

    /// Payload for one category as JSON, the shape used by both the plain GET
    /// endpoints and stream frames.
    pub fn payload(&self, category: Category) -> Result<Value, SourceError> {
        match category {
            Category::Cpu => to_value(self.cpu()?),
            Category::Memory => to_value(self.memory()?),
            Category::Disk => to_value(self.disk()?),
            Category::Network => to_value(self.network()?),
            Category::Gpu => to_value(self.gpu()?),
            Category::Processes => to_value(self.processes()?),
            Category::Sockets => to_value(self.sockets()?),
            Category::Firewall => to_value(self.firewall()?),
        }
    }
}

impl Sampler for Collector {
    fn sample(&self, category: Category) -> Result<Value, SourceError> {
        self.payload(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{CpuSnapshot, CpuTicks, InterfaceSnapshot, MemorySnapshot};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Counters {
        busy: u64,
        total: u64,
        rx: u64,
        proc_ticks: u64,
    }

    #[derive(Default)]
    struct FakeSource {
        c: Mutex<Counters>,
    }

    impl FakeSource {
        fn advance(&self, busy: u64, total: u64, rx: u64, proc_ticks: u64) {
            let mut c = self.c.lock().unwrap();
            c.busy += busy;
            c.total += total;
            c.rx += rx;
            c.proc_ticks += proc_ticks;
        }
    }

    impl MetricSource for FakeSource {
        fn cpu(&self) -> Result<CpuSnapshot, SourceError> {
            let c = self.c.lock().unwrap();
            Ok(CpuSnapshot {
                model: "Fake CPU".into(),
                uptime_secs: 90_061,
                ticks: vec![
                    CpuTicks { core: None, busy: c.busy, total: c.total },
                    CpuTicks { core: Some(0), busy: c.busy, total: c.total },
                ],
                core_temps: vec![(0, 50.0), (24, 40.0)],
                ..Default::default()
            })
        }
        fn memory(&self) -> Result<MemorySnapshot, SourceError> {
            Ok(MemorySnapshot {
                total: 1000,
                free: 100,
                available: 400,
                swap_total: 200,
                swap_free: 50,
                ..Default::default()
            })
        }
        fn interfaces(&self) -> Result<Vec<InterfaceSnapshot>, SourceError> {
            let c = self.c.lock().unwrap();
            Ok(vec![
                InterfaceSnapshot {
                    name: "lo".into(),
                    is_loopback: true,
                    rx_bytes: 5,
                    ..Default::default()
                },
                InterfaceSnapshot {
                    name: "eth0".into(),
                    rx_bytes: c.rx,
                    is_up: true,
                    ..Default::default()
                },
            ])
        }
        fn processes(&self) -> Result<Vec<ProcessSnapshot>, SourceError> {
            let c = self.c.lock().unwrap();
            Ok(vec![ProcessSnapshot {
                pid: 42,
                name: "kworker".into(),
                uid: Some(0),
                cpu_ticks: c.proc_ticks,
                rss_bytes: 100,
                ..Default::default()
            }])
        }
    }

    fn collector() -> (Arc<FakeSource>, Collector) {
        let src = Arc::new(FakeSource::default());
        let c = Collector::new(src.clone(), Arc::new(RateEngine::new()));
        (src, c)
    }

    #[test]
    fn cpu_first_sample_is_zero_then_delta_ratio() {
        let (src, c) = collector();
        src.advance(100, 1000, 0, 0);
        let first = c.cpu().unwrap();
        assert_eq!(first.usage_percent, 0.0);
        assert_eq!(first.uptime, "1d 1h 1m");
        assert_eq!(first.core_temps[1].kind, "E");

        src.advance(25, 100, 0, 0);
        let second = c.cpu().unwrap();
        assert_eq!(second.usage_percent, 25.0);
        assert_eq!(second.core_stats[0].usage_percent, 25.0);
        assert_eq!(second.core_stats[0].temperature, Some(50.0));
    }

    #[test]
    fn network_skips_loopback_and_reports_speed_after_baseline() {
        let (src, c) = collector();
        src.advance(0, 0, 1000, 0);
        let first = c.network().unwrap();
        assert_eq!(first.interfaces.len(), 1);
        assert_eq!(first.interfaces[0].rx_speed, 0);
        src.advance(0, 0, 5000, 0);
        let second = c.network().unwrap();
        assert!(second.interfaces[0].rx_speed > 0);
        assert_eq!(second.total_rx_bytes, 6000);
    }

    #[test]
    fn memory_math() {
        let (_, c) = collector();
        let m = c.memory().unwrap();
        assert_eq!(m.used, 600);
        assert_eq!(m.used_percent, 60.0);
        assert_eq!(m.swap_used, 150);
        assert_eq!(m.swap_percent, 75.0);
    }

    #[test]
    fn process_cpu_uses_rate_engine() {
        let (src, c) = collector();
        let first = c.processes().unwrap();
        assert_eq!(first.total_count, 1);
        assert_eq!(first.processes[0].cpu_percent, 0.0);
        assert_eq!(first.processes[0].command, "[kworker]");
        // no passwd database: the uid is shown
        assert_eq!(first.processes[0].user, "0");
        assert_eq!(first.processes[0].memory_percent, 10.0);
        src.advance(0, 0, 0, 50);
        let second = c.processes().unwrap();
        assert!(second.processes[0].cpu_percent > 0.0);
    }

    #[derive(Default)]
    struct ManyProcesses {
        boot_reads: AtomicUsize,
        tick_reads: AtomicUsize,
    }

    impl MetricSource for ManyProcesses {
        fn processes(&self) -> Result<Vec<ProcessSnapshot>, SourceError> {
            Ok((1..=300)
                .map(|pid| ProcessSnapshot {
                    pid,
                    name: format!("p{pid}"),
                    start_ticks: 500,
                    ..Default::default()
                })
                .collect())
        }
        fn boot_time(&self) -> u64 {
            self.boot_reads.fetch_add(1, Ordering::Relaxed);
            1_000
        }
        fn clock_ticks(&self) -> u64 {
            self.tick_reads.fetch_add(1, Ordering::Relaxed);
            100
        }
    }

    #[test]
    fn boot_time_is_read_once_per_sample() {
        let src = Arc::new(ManyProcesses::default());
        let c = Collector::new(src.clone(), Arc::new(RateEngine::new()));
        let list = c.processes().unwrap();
        assert_eq!(list.total_count, 300);
        assert_eq!(list.processes[0].start_time, 1_005);
        assert_eq!(src.boot_reads.load(Ordering::Relaxed), 1);
        assert_eq!(src.tick_reads.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unavailable_categories_surface_errors() {
        let (_, c) = collector();
        assert!(matches!(c.payload(Category::Disk), Err(SourceError::Unavailable(_))));
        // gpu and firewall degrade to an available=false payload
        let gpu = c.payload(Category::Gpu).unwrap();
        assert_eq!(gpu["available"], false);
    }

    #[test]
    fn uptime_format() {
        assert_eq!(format_uptime(59), "0m");
        assert_eq!(format_uptime(3_660), "1h 1m");
        assert_eq!(format_uptime(2 * 86_400 + 120), "2d 0h 2m");
    }
}
