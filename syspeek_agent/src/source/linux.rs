//! `/proc`-backed metric source, with sysinfo handles for sensors, mounts and
//! interface counters.

use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use sysinfo::{Components, Disks, Networks, System};
use tracing::debug;

use super::{
    CpuSnapshot, CpuTicks, Descriptor, DiskIoCounters, DiskSnapshot, GroupEntry,
    InterfaceSnapshot, MemorySnapshot, MetricSource, PartitionSnapshot, PasswdEntry,
    ProcessDetailSnapshot, ProcessSnapshot,
};
use crate::error::SourceError;
use crate::sockets::SocketTable;
use crate::types::{FirewallInfo, GpuInfo};

const SECTOR_BYTES: u64 = 512;
const IFF_UP: u32 = 0x1;

fn clock_ticks_per_sec() -> u64 {
    static TICKS: OnceCell<u64> = OnceCell::new();
    *TICKS.get_or_init(|| {
        // SAFETY: sysconf has no preconditions.
        let v = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if v > 0 {
            v as u64
        } else {
            100
        }
    })
}

fn page_size() -> u64 {
    static PAGE: OnceCell<u64> = OnceCell::new();
    *PAGE.get_or_init(|| {
        // SAFETY: sysconf has no preconditions.
        let v = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if v > 0 {
            v as u64
        } else {
            4096
        }
    })
}

/// Fields of `/proc/<pid>/stat` that the collector uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidStat {
    pub pid: u32,
    pub comm: String,
    pub state: String,
    pub ppid: u32,
    pub utime: u64,
    pub stime: u64,
    pub nice: i32,
    pub threads: u32,
    pub start_ticks: u64,
    pub rss_pages: u64,
}

/// Parses one `/proc/<pid>/stat` line. The command name may itself contain
/// spaces and parentheses, so fields are taken after the last `)`.
pub fn parse_pid_stat(text: &str) -> Option<PidStat> {
    let lpar = text.find('(')?;
    let rpar = text.rfind(')')?;
    let pid = text.get(..lpar)?.trim().parse().ok()?;
    let comm = text.get(lpar + 1..rpar)?.to_string();
    let rest: Vec<&str> = text.get(rpar + 1..)?.split_whitespace().collect();
    if rest.len() < 22 {
        return None;
    }
    Some(PidStat {
        pid,
        comm,
        state: rest[0].to_string(),
        ppid: rest[1].parse().ok()?,
        utime: rest[11].parse().ok()?,
        stime: rest[12].parse().ok()?,
        nice: rest[16].parse().ok()?,
        threads: rest[17].parse().ok()?,
        start_ticks: rest[19].parse().ok()?,
        rss_pages: rest[21].parse().ok()?,
    })
}

/// Selected `/proc/<pid>/status` fields; memory values in bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFields {
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<u32>,
    pub vm_size: u64,
    pub vm_rss: u64,
    pub vm_data: u64,
    pub vm_stack: u64,
    pub vm_swap: u64,
    pub threads: u32,
    pub voluntary_ctx_switches: u64,
    pub involuntary_ctx_switches: u64,
}

fn kb_value(v: &str) -> u64 {
    v.split_whitespace()
        .next()
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or(0)
        * 1024
}

fn first_u32(v: &str) -> u32 {
    v.split_whitespace()
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

pub fn parse_status(text: &str) -> StatusFields {
    let mut s = StatusFields::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            // real, effective, saved, fs: the real id is reported
            "Uid" => s.uid = first_u32(value),
            "Gid" => s.gid = first_u32(value),
            "Groups" => {
                s.groups = value
                    .split_whitespace()
                    .filter_map(|g| g.parse().ok())
                    .collect()
            }
            "VmSize" => s.vm_size = kb_value(value),
            "VmRSS" => s.vm_rss = kb_value(value),
            "VmData" => s.vm_data = kb_value(value),
            "VmStk" => s.vm_stack = kb_value(value),
            "VmSwap" => s.vm_swap = kb_value(value),
            "Threads" => s.threads = first_u32(value),
            "voluntary_ctxt_switches" => s.voluntary_ctx_switches = value.parse().unwrap_or(0),
            "nonvoluntary_ctxt_switches" => {
                s.involuntary_ctx_switches = value.parse().unwrap_or(0)
            }
            _ => {}
        }
    }
    s
}

/// Parses `/proc/stat` into per-line busy/total ticks and the boot time.
///
/// busy = user + nice + system + irq + softirq + steal; idle and iowait count
/// toward the total only. Lines with too few counters are skipped.
pub fn parse_proc_stat(text: &str) -> (Vec<CpuTicks>, Option<u64>) {
    let mut ticks = Vec::new();
    let mut btime = None;
    for line in text.lines() {
        let mut it = line.split_whitespace();
        let Some(label) = it.next() else {
            continue;
        };
        if label == "btime" {
            btime = it.next().and_then(|v| v.parse().ok());
            continue;
        }
        let Some(suffix) = label.strip_prefix("cpu") else {
            continue;
        };
        let core = if suffix.is_empty() {
            None
        } else {
            match suffix.parse::<usize>() {
                Ok(n) => Some(n),
                Err(_) => continue,
            }
        };
        let v: Vec<u64> = it.take(8).filter_map(|t| t.parse().ok()).collect();
        if v.len() < 8 {
            continue;
        }
        let busy = v[0] + v[1] + v[2] + v[5] + v[6] + v[7];
        let total = busy + v[3] + v[4];
        ticks.push(CpuTicks { core, busy, total });
    }
    (ticks, btime)
}

pub fn parse_meminfo(text: &str) -> Result<MemorySnapshot, SourceError> {
    let mut m = MemorySnapshot::default();
    let mut have_total = false;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let bytes = kb_value(value);
        match key {
            "MemTotal" => {
                m.total = bytes;
                have_total = true;
            }
            "MemFree" => m.free = bytes,
            "MemAvailable" => m.available = bytes,
            "Buffers" => m.buffers = bytes,
            "Cached" => m.cached = bytes,
            "SwapTotal" => m.swap_total = bytes,
            "SwapFree" => m.swap_free = bytes,
            _ => {}
        }
    }
    if !have_total {
        return Err(SourceError::parse("meminfo", "no MemTotal line"));
    }
    Ok(m)
}

/// True for whole block devices (`sda`, `vdb`, `nvme0n1`, `mmcblk0`), false for
/// partitions and virtual devices.
pub fn is_whole_disk(name: &str) -> bool {
    const VIRTUAL: [&str; 6] = ["loop", "dm-", "ram", "zram", "sr", "md"];
    if name.is_empty() || VIRTUAL.iter().any(|p| name.starts_with(p)) {
        return false;
    }
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        // nvme0n1p2, mmcblk0p1 are partitions
        return !name
            .trim_start_matches("nvme")
            .trim_start_matches("mmcblk")
            .contains('p');
    }
    !name.ends_with(|c: char| c.is_ascii_digit())
}

/// Cumulative read/write bytes of whole disks from `/proc/diskstats`.
pub fn parse_diskstats(text: &str) -> Vec<DiskIoCounters> {
    text.lines()
        .filter_map(|line| {
            let f: Vec<&str> = line.split_whitespace().collect();
            if f.len() < 14 || !is_whole_disk(f[2]) {
                return None;
            }
            let read: u64 = f[5].parse().ok()?;
            let written: u64 = f[9].parse().ok()?;
            Some(DiskIoCounters {
                device: f[2].to_string(),
                read_bytes: read * SECTOR_BYTES,
                write_bytes: written * SECTOR_BYTES,
            })
        })
        .collect()
}

pub fn parse_passwd(text: &str) -> Vec<PasswdEntry> {
    text.lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let f: Vec<&str> = l.split(':').collect();
            if f.len() < 7 {
                return None;
            }
            Some(PasswdEntry {
                name: f[0].to_string(),
                uid: f[2].parse().ok()?,
                gid: f[3].parse().ok()?,
                gecos: f[4].to_string(),
                home: f[5].to_string(),
                shell: f[6].to_string(),
            })
        })
        .collect()
}

pub fn parse_group(text: &str) -> Vec<GroupEntry> {
    text.lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let f: Vec<&str> = l.split(':').collect();
            if f.len() < 4 {
                return None;
            }
            Some(GroupEntry {
                name: f[0].to_string(),
                gid: f[2].parse().ok()?,
                members: f[3]
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect(),
            })
        })
        .collect()
}

fn parse_loadavg(text: &str) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (slot, v) in out.iter_mut().zip(text.split_whitespace()) {
        *slot = v.parse().unwrap_or(0.0);
    }
    out
}

fn parse_cpu_model(cpuinfo: &str) -> Option<String> {
    cpuinfo.lines().find_map(|l| {
        let (k, v) = l.split_once(':')?;
        matches!(k.trim(), "model name" | "Model" | "Hardware").then(|| v.trim().to_string())
    })
}

fn parse_io_bytes(text: &str) -> (u64, u64) {
    let mut read = 0;
    let mut write = 0;
    for line in text.lines() {
        match line.split_once(':') {
            Some(("read_bytes", v)) => read = v.trim().parse().unwrap_or(0),
            Some(("write_bytes", v)) => write = v.trim().parse().unwrap_or(0),
            _ => {}
        }
    }
    (read, write)
}

fn split_nul(bytes: &[u8]) -> Vec<String> {
    bytes
        .split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

/// Linux implementation of [`MetricSource`].
pub struct LinuxSource {
    proc_root: PathBuf,
    etc_root: PathBuf,
    sys_root: PathBuf,
    system: Mutex<System>,
    components: Mutex<Components>,
    disks: Mutex<Disks>,
    networks: Mutex<Networks>,
}

impl Default for LinuxSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxSource {
    pub fn new() -> Self {
        Self::with_roots("/proc", "/etc", "/sys")
    }

    /// Reads kernel tables and account databases from alternate roots.
    pub fn with_roots(
        proc_root: impl Into<PathBuf>,
        etc_root: impl Into<PathBuf>,
        sys_root: impl Into<PathBuf>,
    ) -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self {
            proc_root: proc_root.into(),
            etc_root: etc_root.into(),
            sys_root: sys_root.into(),
            system: Mutex::new(system),
            components: Mutex::new(Components::new_with_refreshed_list()),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
        }
    }

    fn proc_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.proc_root.join(rel)
    }

    fn read(&self, path: &Path) -> Result<String, SourceError> {
        fs::read_to_string(path).map_err(|e| SourceError::from_io(path.display().to_string(), e))
    }

    fn read_process(&self, pid: u32) -> Result<ProcessSnapshot, SourceError> {
        let dir = self.proc_path(pid.to_string());
        let stat_text = self.read(&dir.join("stat"))?;
        let stat = parse_pid_stat(&stat_text)
            .ok_or_else(|| SourceError::parse("process stat", format!("pid {pid}")))?;
        let uid = fs::metadata(&dir).ok().map(|m| m.uid());
        let cmdline = fs::read(dir.join("cmdline"))
            .map(|b| split_nul(&b))
            .unwrap_or_default();
        Ok(ProcessSnapshot {
            pid,
            ppid: stat.ppid,
            name: stat.comm,
            cmdline,
            uid,
            state: stat.state,
            cpu_ticks: stat.utime + stat.stime,
            start_ticks: stat.start_ticks,
            rss_bytes: stat.rss_pages * page_size(),
            threads: stat.threads,
            nice: stat.nice,
        })
    }

    fn interface_is_up(&self, name: &str) -> bool {
        let flags = self.sys_root.join("class/net").join(name).join("flags");
        fs::read_to_string(flags)
            .ok()
            .and_then(|s| u32::from_str_radix(s.trim().trim_start_matches("0x"), 16).ok())
            .is_some_and(|f| f & IFF_UP != 0)
    }

    fn sensors(&self) -> (Vec<(usize, f32)>, Option<f32>) {
        let mut components = self.components.lock().unwrap_or_else(PoisonError::into_inner);
        components.refresh(false);
        let mut cores = Vec::new();
        let mut package = None;
        let mut fallback = None;
        for c in components.iter() {
            let Some(t) = c.temperature() else { continue };
            let label = c.label();
            let lower = label.to_ascii_lowercase();
            if let Some(id) = label
                .split_whitespace()
                .skip_while(|w| *w != "Core")
                .nth(1)
                .and_then(|n| n.parse::<usize>().ok())
            {
                cores.push((id, t));
            } else if lower.contains("package") {
                package.get_or_insert(t);
            } else if lower.contains("tctl") || lower.contains("tdie") {
                fallback.get_or_insert(t);
            }
        }
        cores.sort_by_key(|(id, _)| *id);
        cores.dedup_by_key(|(id, _)| *id);
        (cores, package.or(fallback))
    }
}

impl MetricSource for LinuxSource {
    fn cpu(&self) -> Result<CpuSnapshot, SourceError> {
        let (ticks, _) = parse_proc_stat(&self.read(&self.proc_path("stat"))?);
        if ticks.is_empty() {
            return Err(SourceError::parse("/proc/stat", "no cpu lines"));
        }
        let load_avg = self
            .read(&self.proc_path("loadavg"))
            .map(|s| parse_loadavg(&s))
            .unwrap_or_default();
        let uptime_secs = self
            .read(&self.proc_path("uptime"))
            .ok()
            .and_then(|s| s.split_whitespace().next()?.parse::<f64>().ok())
            .unwrap_or(0.0) as u64;

        let (brand, frequencies) = {
            let mut sys = self.system.lock().unwrap_or_else(PoisonError::into_inner);
            sys.refresh_cpu_frequency();
            let brand = sys.cpus().first().map(|c| c.brand().to_string());
            let freqs = sys.cpus().iter().map(|c| c.frequency()).collect();
            (brand, freqs)
        };
        let model = self
            .read(&self.proc_path("cpuinfo"))
            .ok()
            .and_then(|s| parse_cpu_model(&s))
            .or(brand)
            .unwrap_or_else(|| "unknown".into());
        let (core_temps, package_temp) = self.sensors();

        Ok(CpuSnapshot {
            model,
            load_avg,
            uptime_secs,
            ticks,
            physical_cores: System::physical_core_count(),
            frequencies,
            core_temps,
            package_temp,
        })
    }

    fn memory(&self) -> Result<MemorySnapshot, SourceError> {
        parse_meminfo(&self.read(&self.proc_path("meminfo"))?)
    }

    fn disks(&self) -> Result<DiskSnapshot, SourceError> {
        let partitions = {
            let mut disks = self.disks.lock().unwrap_or_else(PoisonError::into_inner);
            disks.refresh(true);
            let mut seen = HashSet::new();
            disks
                .iter()
                .filter_map(|d| {
                    let device = d.name().to_string_lossy().into_owned();
                    let mount_point = d.mount_point().to_string_lossy().into_owned();
                    if !device.starts_with("/dev/")
                        || device.starts_with("/dev/loop")
                        || mount_point.starts_with("/snap/")
                        || !seen.insert(device.clone())
                    {
                        return None;
                    }
                    Some(PartitionSnapshot {
                        device,
                        mount_point,
                        fs_type: d.file_system().to_string_lossy().into_owned(),
                        total: d.total_space(),
                        available: d.available_space(),
                    })
                })
                .collect()
        };
        let io = match self.read(&self.proc_path("diskstats")) {
            Ok(text) => parse_diskstats(&text),
            Err(e) => {
                debug!("diskstats unreadable: {e}");
                Vec::new()
            }
        };
        Ok(DiskSnapshot { partitions, io })
    }

    fn interfaces(&self) -> Result<Vec<InterfaceSnapshot>, SourceError> {
        let mut nets = self.networks.lock().unwrap_or_else(PoisonError::into_inner);
        nets.refresh(true);
        let mut out: Vec<InterfaceSnapshot> = nets
            .iter()
            .map(|(name, data)| {
                let addresses: Vec<String> = data
                    .ip_networks()
                    .iter()
                    .map(|n| format!("{}/{}", n.addr, n.prefix))
                    .collect();
                let is_loopback = name == "lo"
                    || (!data.ip_networks().is_empty()
                        && data.ip_networks().iter().all(|n| n.addr.is_loopback()));
                InterfaceSnapshot {
                    name: name.clone(),
                    addresses,
                    mac: data.mac_address().to_string(),
                    is_up: self.interface_is_up(name),
                    is_loopback,
                    rx_bytes: data.total_received(),
                    tx_bytes: data.total_transmitted(),
                    rx_packets: data.total_packets_received(),
                    tx_packets: data.total_packets_transmitted(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn gpu(&self) -> Result<GpuInfo, SourceError> {
        Ok(crate::gpu::probe())
    }

    fn firewall(&self) -> Result<FirewallInfo, SourceError> {
        Ok(super::firewall::detect())
    }

    fn processes(&self) -> Result<Vec<ProcessSnapshot>, SourceError> {
        // processes exiting mid-scan are simply left out
        Ok(self
            .pids()?
            .into_iter()
            .filter_map(|pid| self.read_process(pid).ok())
            .collect())
    }

    fn process_detail(&self, pid: u32) -> Result<ProcessDetailSnapshot, SourceError> {
        let process = self.read_process(pid)?;
        let dir = self.proc_path(pid.to_string());
        let link = |name: &str| {
            fs::read_link(dir.join(name))
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        let environ = fs::read(dir.join("environ"))
            .map(|b| {
                split_nul(&b)
                    .into_iter()
                    .filter_map(|kv| {
                        let (k, v) = kv.split_once('=')?;
                        Some((k.to_string(), v.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let status = self
            .read(&dir.join("status"))
            .map(|s| parse_status(&s))
            .unwrap_or_default();
        let (io_read_bytes, io_write_bytes) = self
            .read(&dir.join("io"))
            .map(|s| parse_io_bytes(&s))
            .unwrap_or_default();
        let children = self
            .pids()?
            .into_iter()
            .filter(|p| *p != pid)
            .filter_map(|p| {
                let text = fs::read_to_string(self.proc_path(format!("{p}/stat"))).ok()?;
                let st = parse_pid_stat(&text)?;
                (st.ppid == pid).then_some(p)
            })
            .collect();
        Ok(ProcessDetailSnapshot {
            cwd: link("cwd"),
            exe: link("exe"),
            environ,
            status,
            io_read_bytes,
            io_write_bytes,
            children,
            process,
        })
    }

    fn pids(&self) -> Result<Vec<u32>, SourceError> {
        let entries = fs::read_dir(&self.proc_root)
            .map_err(|e| SourceError::from_io(self.proc_root.display().to_string(), e))?;
        let mut pids: Vec<u32> = entries
            .filter_map(|e| e.ok()?.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        fs::read_to_string(self.proc_path(format!("{pid}/comm")))
            .ok()
            .map(|s| s.trim_end().to_string())
    }

    fn descriptors(&self, pid: u32) -> Result<Vec<Descriptor>, SourceError> {
        let dir = self.proc_path(format!("{pid}/fd"));
        let entries =
            fs::read_dir(&dir).map_err(|e| SourceError::from_io(dir.display().to_string(), e))?;
        Ok(entries
            .filter_map(|e| {
                let e = e.ok()?;
                let fd = e.file_name().to_str()?.parse().ok()?;
                let target = fs::read_link(e.path()).ok()?;
                Some(Descriptor {
                    fd,
                    target: target.to_string_lossy().into_owned(),
                })
            })
            .collect())
    }

    fn socket_table(&self, table: SocketTable) -> Result<String, SourceError> {
        self.read(&self.proc_path("net").join(table.file_name()))
    }

    fn users(&self) -> Result<Vec<PasswdEntry>, SourceError> {
        Ok(parse_passwd(&self.read(&self.etc_root.join("passwd"))?))
    }

    fn groups(&self) -> Result<Vec<GroupEntry>, SourceError> {
        Ok(parse_group(&self.read(&self.etc_root.join("group"))?))
    }

    fn boot_time(&self) -> u64 {
        self.read(&self.proc_path("stat"))
            .ok()
            .and_then(|s| parse_proc_stat(&s).1)
            .unwrap_or(0)
    }

    fn clock_ticks(&self) -> u64 {
        clock_ticks_per_sec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_stat_with_spaces_in_comm() {
        let line = "1234 (Web Content (x)) S 1 1234 1234 0 -1 4194560 100 0 0 0 \
                    250 50 0 0 20 0 7 0 9000 123456789 321 18446744073709551615";
        let s = parse_pid_stat(line).unwrap();
        assert_eq!(s.pid, 1234);
        assert_eq!(s.comm, "Web Content (x)");
        assert_eq!(s.state, "S");
        assert_eq!(s.ppid, 1);
        assert_eq!(s.utime + s.stime, 300);
        assert_eq!(s.threads, 7);
        assert_eq!(s.start_ticks, 9000);
        assert_eq!(s.rss_pages, 321);
        assert!(parse_pid_stat("42 (short) S 1").is_none());
    }

    #[test]
    fn proc_stat_busy_and_total() {
        let text = "cpu  100 10 50 800 40 5 5 0 0 0\n\
                    cpu0 50 5 25 400 20 2 3 0 0 0\n\
                    cpu1 oops\n\
                    intr 1 2 3\n\
                    btime 1700000000\n";
        let (ticks, btime) = parse_proc_stat(text);
        assert_eq!(btime, Some(1_700_000_000));
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0], CpuTicks { core: None, busy: 170, total: 1010 });
        assert_eq!(ticks[1].core, Some(0));
        assert_eq!(ticks[1].busy, 85);
    }

    #[test]
    fn meminfo_in_bytes() {
        let text = "MemTotal:       16000 kB\nMemFree:  1000 kB\nMemAvailable: 8000 kB\n\
                    Buffers: 100 kB\nCached: 2000 kB\nSwapTotal: 4000 kB\nSwapFree: 3000 kB\n";
        let m = parse_meminfo(text).unwrap();
        assert_eq!(m.total, 16000 * 1024);
        assert_eq!(m.available, 8000 * 1024);
        assert_eq!(m.swap_free, 3000 * 1024);
        assert!(parse_meminfo("Garbage: 1\n").is_err());
    }

    #[test]
    fn whole_disk_detection() {
        for d in ["sda", "vdb", "nvme0n1", "mmcblk0", "xvda"] {
            assert!(is_whole_disk(d), "{d}");
        }
        for d in ["sda1", "nvme0n1p2", "mmcblk0p1", "loop3", "dm-0", "zram0", "sr0"] {
            assert!(!is_whole_disk(d), "{d}");
        }
    }

    #[test]
    fn diskstats_sectors_to_bytes() {
        let text = "   8       0 sda 100 0 2000 0 50 0 4000 0 0 0 0 0 0 0 0\n\
                    8       1 sda1 100 0 2000 0 50 0 4000 0 0 0 0 0 0 0 0\n\
                    7       0 loop0 1 0 8 0 0 0 0 0 0 0 0\n";
        let io = parse_diskstats(text);
        assert_eq!(
            io,
            vec![DiskIoCounters {
                device: "sda".into(),
                read_bytes: 2000 * 512,
                write_bytes: 4000 * 512,
            }]
        );
    }

    #[test]
    fn status_fields() {
        let text = "Name:\tbash\nUid:\t1000\t1000\t1000\t1000\nGid:\t100\t100\t100\t100\n\
                    Groups:\t4 24 27\nVmSize:\t  10 kB\nVmRSS:\t 5 kB\nThreads:\t3\n\
                    voluntary_ctxt_switches:\t12\nnonvoluntary_ctxt_switches:\t4\n";
        let s = parse_status(text);
        assert_eq!(s.uid, 1000);
        assert_eq!(s.gid, 100);
        assert_eq!(s.groups, vec![4, 24, 27]);
        assert_eq!(s.vm_size, 10 * 1024);
        assert_eq!(s.vm_rss, 5 * 1024);
        assert_eq!(s.threads, 3);
        assert_eq!(s.voluntary_ctx_switches, 12);
        assert_eq!(s.involuntary_ctx_switches, 4);
    }

    #[test]
    fn passwd_and_group_databases() {
        let users = parse_passwd(
            "root:x:0:0:root:/root:/bin/bash\n# comment\nbroken:x\nalice:x:1000:1000:Alice,,,:/home/alice:/bin/zsh\n",
        );
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].name, "alice");
        assert_eq!(users[1].shell, "/bin/zsh");
        let groups = parse_group("sudo:x:27:alice,bob\nusers:x:100:\n");
        assert_eq!(groups[0].members, vec!["alice", "bob"]);
        assert!(groups[1].members.is_empty());
    }

    #[test]
    fn reads_processes_from_alternate_root() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("77");
        fs::create_dir_all(&p).unwrap();
        fs::write(
            p.join("stat"),
            "77 (worker) R 1 77 77 0 -1 0 0 0 0 0 10 5 0 0 20 -5 2 0 500 0 10 0",
        )
        .unwrap();
        fs::write(p.join("cmdline"), b"worker\0--fast\0").unwrap();
        fs::write(p.join("comm"), "worker\n").unwrap();
        fs::create_dir_all(dir.path().join("self-not-a-pid")).unwrap();

        let src = LinuxSource::with_roots(dir.path(), dir.path(), dir.path());
        assert_eq!(src.pids().unwrap(), vec![77]);
        let procs = src.processes().unwrap();
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].cmdline, vec!["worker", "--fast"]);
        assert_eq!(procs[0].nice, -5);
        assert_eq!(procs[0].cpu_ticks, 15);
        assert_eq!(src.process_name(77).as_deref(), Some("worker"));
        assert!(matches!(src.process_detail(78), Err(SourceError::NotFound(_))));
    }
}
