//! Data types sent to the client over HTTP and in stream frames.
//! Keep this module stable: it defines the wire format (camelCase JSON).

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoginResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Marker emitted in place of a payload whose source could not be read.
#[derive(Debug, Serialize, Clone)]
pub struct Unavailable {
    pub available: bool,
    pub error: String,
}

impl Unavailable {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            available: false,
            error: error.into(),
        }
    }
}

// ---------- cpu ----------

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CpuCore {
    pub id: usize,
    pub usage_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u64>,
}

#[derive(Debug, Serialize, Clone)]
pub struct PhysicalCore {
    pub id: usize,
    pub temperature: f32,
    /// "P" performance or "E" efficiency
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CpuInfo {
    pub model: String,
    pub cores: usize,
    pub threads: usize,
    pub physical_cores: usize,
    pub usage_percent: f64,
    pub load_avg: [f64; 3],
    pub core_stats: Vec<CpuCore>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub core_temps: Vec<PhysicalCore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_temp: Option<f32>,
    pub uptime: String,
}

// ---------- memory ----------

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInfo {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub available: u64,
    pub buffers: u64,
    pub cached: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub swap_free: u64,
    pub used_percent: f64,
    pub swap_percent: f64,
}

// ---------- disk ----------

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiskPartition {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub used_percent: f64,
}

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiskIo {
    pub device: String,
    pub read_bytes: u64,
    pub write_bytes: u64,
    /// bytes per second
    pub read_speed: u64,
    pub write_speed: u64,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct DiskInfo {
    pub partitions: Vec<DiskPartition>,
    pub io: Vec<DiskIo>,
}

// ---------- network ----------

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,
    pub ip_addresses: Vec<String>,
    pub mac: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_speed: u64,
    pub tx_speed: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub is_up: bool,
}

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub interfaces: Vec<NetworkInterface>,
    pub total_rx_bytes: u64,
    pub total_tx_bytes: u64,
    pub total_rx_speed: u64,
    pub total_tx_speed: u64,
}

// ---------- gpu ----------

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct GpuInfo {
    pub available: bool,
    pub name: String,
    pub driver: String,
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_free: u64,
    pub usage_percent: f64,
    pub temperature: f64,
    /// watts
    pub power_draw: f64,
    pub power_limit: f64,
    pub fan_speed: u32,
}

// ---------- firewall ----------

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct FirewallRule {
    pub chain: String,
    pub protocol: String,
    pub port: u16,
    pub source: String,
    pub destination: String,
    pub action: String,
    pub interface: String,
    pub raw: String,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct FirewallInfo {
    pub available: bool,
    pub backend: String,
    pub active: bool,
    pub rules: Vec<FirewallRule>,
}

// ---------- processes ----------

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub command: String,
    pub user: String,
    pub state: String,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_percent: f64,
    pub threads: u32,
    pub nice: i32,
    /// unix seconds
    pub start_time: u64,
}

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessList {
    pub processes: Vec<ProcessInfo>,
    pub total_count: usize,
}

#[derive(Debug, Serialize, Clone)]
pub struct ProcessFd {
    pub fd: i32,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub target: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct ProcessEnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDetail {
    #[serde(flatten)]
    pub info: ProcessInfo,
    pub command_line: Vec<String>,
    pub cwd: String,
    pub exe: String,
    pub environ: Vec<ProcessEnvVar>,
    pub fds: Vec<ProcessFd>,
    pub connections: Vec<SocketRecord>,
    pub children: Vec<u32>,
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<u32>,
    pub uptime: String,
    pub vm_size: u64,
    pub vm_rss: u64,
    pub vm_data: u64,
    pub vm_stack: u64,
    pub vm_swap: u64,
    pub io_read_bytes: u64,
    pub io_write_bytes: u64,
    pub voluntary_ctx_switches: u64,
    pub involuntary_ctx_switches: u64,
}

// ---------- sockets ----------

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SocketRecord {
    pub protocol: &'static str,
    pub local_addr: String,
    pub local_port: u16,
    pub remote_addr: String,
    pub remote_port: u16,
    pub state: String,
    pub inode: u64,
    /// Owner at scan time, if a visible process held the inode.
    pub pid: Option<u32>,
    pub process_name: Option<String>,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct SocketInfo {
    pub tcp: Vec<SocketRecord>,
    pub udp: Vec<SocketRecord>,
    pub unix: Vec<SocketRecord>,
    pub total: usize,
    pub listen: usize,
    pub established: usize,
}

// ---------- lookups ----------

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct GeoInfo {
    pub country: String,
    pub country_code: String,
    pub region: String,
    pub city: String,
    pub org: String,
    pub asn: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct IpInfo {
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub is_private: bool,
    pub is_loopback: bool,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whois: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geoip: Option<GeoInfo>,
    pub related_procs: Vec<u32>,
}

#[derive(Debug, Serialize, Clone)]
pub struct UserProcess {
    pub pid: u32,
    pub name: String,
}

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub gecos: String,
    pub home_dir: String,
    pub shell: String,
    pub groups: Vec<String>,
    pub process_count: usize,
    pub running_procs: Vec<UserProcess>,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct GroupInfo {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub id: String,
    pub name: String,
    pub image: String,
    pub command: String,
    pub created: String,
    pub state: String,
    pub status: String,
    pub ports: String,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct DockerInfo {
    pub available: bool,
    pub containers: Vec<Container>,
}

#[derive(Debug, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub state: String,
    pub sub_state: String,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct ServicesInfo {
    pub available: bool,
    pub manager: &'static str,
    pub services: Vec<Service>,
}
