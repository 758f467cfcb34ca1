//! Raw data producers.
//!
//! A `MetricSource` hands out one raw snapshot per call: cumulative counters,
//! descriptor tables, connection tables. It keeps no rate state of its own;
//! the `Collector` turns its output into payloads. The implementation is
//! chosen when the server is composed, and tests inject their own.

mod firewall;
mod linux;

pub use firewall::{parse_iptables, parse_nft, parse_ufw};
pub use linux::{
    is_whole_disk, parse_diskstats, parse_group, parse_meminfo, parse_passwd, parse_pid_stat,
    parse_proc_stat, parse_status, LinuxSource, PidStat, StatusFields,
};

use crate::error::SourceError;
use crate::sockets::SocketTable;
use crate::types::{FirewallInfo, GpuInfo};

/// Busy and total jiffies for the aggregate line (`core == None`) or one core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTicks {
    pub core: Option<usize>,
    pub busy: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CpuSnapshot {
    pub model: String,
    pub load_avg: [f64; 3],
    pub uptime_secs: u64,
    pub ticks: Vec<CpuTicks>,
    pub physical_cores: Option<usize>,
    /// MHz per logical core, indexed by core id.
    pub frequencies: Vec<u64>,
    /// (physical core id, degrees C)
    pub core_temps: Vec<(usize, f32)>,
    pub package_temp: Option<f32>,
}

/// All values in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub total: u64,
    pub free: u64,
    pub available: u64,
    pub buffers: u64,
    pub cached: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PartitionSnapshot {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
    pub total: u64,
    pub available: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskIoCounters {
    pub device: String,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DiskSnapshot {
    pub partitions: Vec<PartitionSnapshot>,
    pub io: Vec<DiskIoCounters>,
}

#[derive(Debug, Clone, Default)]
pub struct InterfaceSnapshot {
    pub name: String,
    pub addresses: Vec<String>,
    pub mac: String,
    pub is_up: bool,
    pub is_loopback: bool,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub cmdline: Vec<String>,
    pub uid: Option<u32>,
    pub state: String,
    /// utime + stime in clock ticks.
    pub cpu_ticks: u64,
    /// Start time in clock ticks after boot.
    pub start_ticks: u64,
    pub rss_bytes: u64,
    pub threads: u32,
    pub nice: i32,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessDetailSnapshot {
    pub process: ProcessSnapshot,
    pub cwd: String,
    pub exe: String,
    pub environ: Vec<(String, String)>,
    pub status: StatusFields,
    pub io_read_bytes: u64,
    pub io_write_bytes: u64,
    pub children: Vec<u32>,
}

/// One entry of a process's descriptor table: fd number and link target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub fd: i32,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub home: String,
    pub shell: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

fn unavailable<T>(what: &str) -> Result<T, SourceError> {
    Err(SourceError::Unavailable(what.to_string()))
}

/// Capability set of a platform. Every method is synchronous and may block on
/// filesystem enumeration or an external tool; async callers go through
/// `spawn_blocking`. Unimplemented capabilities report `Unavailable`.
pub trait MetricSource: Send + Sync {
    fn cpu(&self) -> Result<CpuSnapshot, SourceError> {
        unavailable("cpu statistics")
    }

    fn memory(&self) -> Result<MemorySnapshot, SourceError> {
        unavailable("memory statistics")
    }

    fn disks(&self) -> Result<DiskSnapshot, SourceError> {
        unavailable("disk statistics")
    }

    fn interfaces(&self) -> Result<Vec<InterfaceSnapshot>, SourceError> {
        unavailable("network statistics")
    }

    fn gpu(&self) -> Result<GpuInfo, SourceError> {
        Ok(GpuInfo::default())
    }

    fn firewall(&self) -> Result<FirewallInfo, SourceError> {
        Ok(FirewallInfo::default())
    }

    fn processes(&self) -> Result<Vec<ProcessSnapshot>, SourceError> {
        unavailable("process table")
    }

    fn process_detail(&self, pid: u32) -> Result<ProcessDetailSnapshot, SourceError> {
        Err(SourceError::NotFound(format!("process {pid}")))
    }

    /// Every pid currently visible.
    fn pids(&self) -> Result<Vec<u32>, SourceError> {
        unavailable("process table")
    }

    fn process_name(&self, _pid: u32) -> Option<String> {
        None
    }

    fn descriptors(&self, pid: u32) -> Result<Vec<Descriptor>, SourceError> {
        Err(SourceError::NotFound(format!("process {pid}")))
    }

    /// Raw text of one kernel connection table, header line included.
    fn socket_table(&self, _table: SocketTable) -> Result<String, SourceError> {
        unavailable("socket tables")
    }

    fn users(&self) -> Result<Vec<PasswdEntry>, SourceError> {
        unavailable("user database")
    }

    fn groups(&self) -> Result<Vec<GroupEntry>, SourceError> {
        unavailable("group database")
    }

    /// Seconds since the epoch at boot.
    fn boot_time(&self) -> u64 {
        0
    }

    fn clock_ticks(&self) -> u64 {
        100
    }
}
