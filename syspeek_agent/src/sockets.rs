//! Socket to process correlation.
//!
//! Kernel connection tables only carry an inode per row. Owners are found by
//! walking every visible process's descriptor table for `socket:[inode]`
//! links, building an inode index, and joining the two. The index is rebuilt
//! on every call; nothing here is cached.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::SourceError;
use crate::source::MetricSource;
use crate::types::{SocketInfo, SocketRecord};

/// One kernel connection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketTable {
    Tcp4,
    Tcp6,
    Udp4,
    Udp6,
    Unix,
}

impl SocketTable {
    pub const ALL: [SocketTable; 5] = [
        SocketTable::Tcp4,
        SocketTable::Tcp6,
        SocketTable::Udp4,
        SocketTable::Udp6,
        SocketTable::Unix,
    ];

    /// File name under `/proc/net`.
    pub fn file_name(self) -> &'static str {
        match self {
            SocketTable::Tcp4 => "tcp",
            SocketTable::Tcp6 => "tcp6",
            SocketTable::Udp4 => "udp",
            SocketTable::Udp6 => "udp6",
            SocketTable::Unix => "unix",
        }
    }

    /// Protocol tag reported to clients; same as the file name.
    pub fn protocol(self) -> &'static str {
        self.file_name()
    }

    fn is_v6(self) -> bool {
        matches!(self, SocketTable::Tcp6 | SocketTable::Udp6)
    }
}

/// A parsed connection-table row, before owner lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketRow {
    pub table: SocketTable,
    pub local_addr: String,
    pub local_port: u16,
    pub remote_addr: String,
    pub remote_port: u16,
    pub state: String,
    pub inode: u64,
}

/// Extracts the inode from a descriptor link such as `socket:[12345]`.
pub fn parse_socket_target(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

fn hex_bytes(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Decodes the 8-hex-digit IPv4 form, stored in reversed byte order.
pub fn decode_ipv4_hex(s: &str) -> Option<Ipv4Addr> {
    if s.len() != 8 {
        return None;
    }
    let mut b: [u8; 4] = hex_bytes(s)?.try_into().ok()?;
    b.reverse();
    Some(Ipv4Addr::from(b))
}

/// Decodes the 32-hex-digit IPv6 form: four 32-bit groups, each little-endian.
pub fn decode_ipv6_hex(s: &str) -> Option<Ipv6Addr> {
    if s.len() != 32 {
        return None;
    }
    let raw = hex_bytes(s)?;
    let mut out = [0u8; 16];
    for (dst, src) in out.chunks_exact_mut(4).zip(raw.chunks_exact(4)) {
        dst.copy_from_slice(src);
        dst.reverse();
    }
    Some(Ipv6Addr::from(out))
}

fn decode_endpoint(s: &str, v6: bool) -> Option<(String, u16)> {
    let (addr, port) = s.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;
    let addr = if v6 {
        decode_ipv6_hex(addr)?.to_string()
    } else {
        decode_ipv4_hex(addr)?.to_string()
    };
    Some((addr, port))
}

/// TCP state code to name. Unknown codes pass through verbatim.
pub fn tcp_state_name(code: &str) -> String {
    let name = match code.to_ascii_uppercase().as_str() {
        "01" => "ESTABLISHED",
        "02" => "SYN_SENT",
        "03" => "SYN_RECV",
        "04" => "FIN_WAIT1",
        "05" => "FIN_WAIT2",
        "06" => "TIME_WAIT",
        "07" => "CLOSE",
        "08" => "CLOSE_WAIT",
        "09" => "LAST_ACK",
        "0A" => "LISTEN",
        "0B" => "CLOSING",
        _ => return code.to_string(),
    };
    name.to_string()
}

/// Unix socket state code to name. Unknown codes pass through verbatim.
pub fn unix_state_name(code: &str) -> String {
    let name = match code {
        "01" => "FREE",
        "02" => "UNCONNECTED",
        "03" => "CONNECTING",
        "04" => "CONNECTED",
        "05" => "DISCONNECTING",
        _ => return code.to_string(),
    };
    name.to_string()
}

/// Parses a tcp/udp table (v4 or v6, chosen by `table`). The header line and
/// malformed rows are skipped.
pub fn parse_inet_table(text: &str, table: SocketTable) -> Vec<SocketRow> {
    let v6 = table.is_v6();
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let f: Vec<&str> = line.split_whitespace().collect();
            if f.len() < 10 {
                return None;
            }
            let (local_addr, local_port) = decode_endpoint(f[1], v6)?;
            let (remote_addr, remote_port) = decode_endpoint(f[2], v6)?;
            Some(SocketRow {
                table,
                local_addr,
                local_port,
                remote_addr,
                remote_port,
                state: tcp_state_name(f[3]),
                inode: f[9].parse().ok()?,
            })
        })
        .collect()
}

/// Parses `/proc/net/unix`. The socket path, if any, is the local address.
pub fn parse_unix_table(text: &str) -> Vec<SocketRow> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let f: Vec<&str> = line.split_whitespace().collect();
            if f.len() < 7 {
                return None;
            }
            Some(SocketRow {
                table: SocketTable::Unix,
                local_addr: f.get(7).copied().unwrap_or_default().to_string(),
                local_port: 0,
                remote_addr: String::new(),
                remote_port: 0,
                state: unix_state_name(f[5]),
                inode: f[6].parse().ok()?,
            })
        })
        .collect()
}

/// Parses one table's raw text with the parser that matches its format.
pub fn parse_table(text: &str, table: SocketTable) -> Vec<SocketRow> {
    match table {
        SocketTable::Unix => parse_unix_table(text),
        _ => parse_inet_table(text, table),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub pid: u32,
    pub name: String,
}

/// inode -> owning process, built from one full descriptor scan.
#[derive(Debug, Default)]
pub struct InodeIndex {
    owners: HashMap<u64, Owner>,
}

impl InodeIndex {
    /// Walks every visible process's descriptor table. Processes that vanish or
    /// deny access are skipped; only failure to list processes at all is an error.
    pub fn build(source: &dyn MetricSource) -> Result<Self, SourceError> {
        let mut owners = HashMap::new();
        for pid in source.pids()? {
            let Ok(fds) = source.descriptors(pid) else {
                continue;
            };
            let inodes: Vec<u64> = fds
                .iter()
                .filter_map(|d| parse_socket_target(&d.target))
                .collect();
            if inodes.is_empty() {
                continue;
            }
            let Some(name) = source.process_name(pid) else {
                continue;
            };
            for inode in inodes {
                // a socket shared across fork stays with the lowest pid
                owners.entry(inode).or_insert_with(|| Owner {
                    pid,
                    name: name.clone(),
                });
            }
        }
        Ok(Self { owners })
    }

    pub fn owner(&self, inode: u64) -> Option<&Owner> {
        self.owners.get(&inode)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

impl FromIterator<(u64, Owner)> for InodeIndex {
    fn from_iter<I: IntoIterator<Item = (u64, Owner)>>(iter: I) -> Self {
        Self {
            owners: iter.into_iter().collect(),
        }
    }
}

/// Joins rows to owners. A row whose inode has no owner keeps `pid: None`.
pub fn correlate(rows: Vec<SocketRow>, index: &InodeIndex) -> Vec<SocketRecord> {
    rows.into_iter()
        .map(|row| {
            let owner = index.owner(row.inode);
            SocketRecord {
                protocol: row.table.protocol(),
                local_addr: row.local_addr,
                local_port: row.local_port,
                remote_addr: row.remote_addr,
                remote_port: row.remote_port,
                state: row.state,
                inode: row.inode,
                pid: owner.map(|o| o.pid),
                process_name: owner.map(|o| o.name.clone()),
            }
        })
        .collect()
}

/// Reads every table the source offers. Unreadable tables (no IPv6, no unix
/// table) are left out; an error is returned only when none could be read.
fn read_rows(source: &dyn MetricSource) -> Result<Vec<SocketRow>, SourceError> {
    let mut rows = Vec::new();
    let mut last_err = None;
    let mut any = false;
    for table in SocketTable::ALL {
        match source.socket_table(table) {
            Ok(text) => {
                any = true;
                rows.extend(parse_table(&text, table));
            }
            Err(e) => {
                tracing::debug!("socket table {} unreadable: {e}", table.file_name());
                last_err = Some(e);
            }
        }
    }
    match (any, last_err) {
        (false, Some(e)) => Err(e),
        _ => Ok(rows),
    }
}

/// Full scan: index, parse, join, and summary counts.
pub fn scan(source: &dyn MetricSource) -> Result<SocketInfo, SourceError> {
    let index = InodeIndex::build(source)?;
    let records = correlate(read_rows(source)?, &index);

    let mut info = SocketInfo::default();
    for r in records {
        match r.state.as_str() {
            "LISTEN" => info.listen += 1,
            "ESTABLISHED" => info.established += 1,
            _ => {}
        }
        match r.protocol {
            "tcp" | "tcp6" => info.tcp.push(r),
            "udp" | "udp6" => info.udp.push(r),
            _ => info.unix.push(r),
        }
    }
    info.total = info.tcp.len() + info.udp.len() + info.unix.len();
    Ok(info)
}

/// Inet connections held by one process. Returns an empty list when the
/// process's descriptors cannot be read.
pub fn connections_of(source: &dyn MetricSource, pid: u32, name: &str) -> Vec<SocketRecord> {
    let inodes: HashSet<u64> = match source.descriptors(pid) {
        Ok(fds) => fds
            .iter()
            .filter_map(|d| parse_socket_target(&d.target))
            .collect(),
        Err(_) => return Vec::new(),
    };
    if inodes.is_empty() {
        return Vec::new();
    }
    let index: InodeIndex = inodes
        .iter()
        .map(|i| {
            (
                *i,
                Owner {
                    pid,
                    name: name.to_string(),
                },
            )
        })
        .collect();
    let rows = read_rows(source)
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.table != SocketTable::Unix && inodes.contains(&r.inode))
        .collect();
    correlate(rows, &index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Descriptor;

    #[test]
    fn ipv4_is_byte_reversed() {
        assert_eq!(decode_ipv4_hex("0100007F"), Some(Ipv4Addr::LOCALHOST));
        assert_eq!(decode_ipv4_hex("0101A8C0"), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(decode_ipv4_hex("zz00007F"), None);
        assert_eq!(decode_ipv4_hex("7F"), None);
    }

    #[test]
    fn ipv6_groups_are_little_endian() {
        assert_eq!(
            decode_ipv6_hex("00000000000000000000000001000000"),
            Some(Ipv6Addr::LOCALHOST)
        );
        // fe80::1 with the groups stored little-endian
        assert_eq!(
            decode_ipv6_hex("000080FE000000000000000001000000"),
            Some("fe80::1".parse().unwrap())
        );
    }

    #[test]
    fn state_codes() {
        assert_eq!(tcp_state_name("0A"), "LISTEN");
        assert_eq!(tcp_state_name("01"), "ESTABLISHED");
        assert_eq!(tcp_state_name("0C"), "0C");
        assert_eq!(unix_state_name("03"), "CONNECTING");
        assert_eq!(unix_state_name("09"), "09");
    }

    #[test]
    fn socket_targets() {
        assert_eq!(parse_socket_target("socket:[4242]"), Some(4242));
        assert_eq!(parse_socket_target("pipe:[4242]"), None);
        assert_eq!(parse_socket_target("/dev/null"), None);
        assert_eq!(parse_socket_target("socket:[oops]"), None);
    }

    const TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n\
   0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 111 1 0000000000000000 100 0 0 10 0\n\
   1: 0100007F:1F90 0100007F:C350 01 00000000:00000000 00:00000000 00000000  1000        0 222 1 0000000000000000 20 4 30 10 -1\n\
   2: garbage\n\
   3: 0100007F:0035 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 333 1 0000000000000000 100 0 0 10 0\n";

    const UNIX: &str = "Num       RefCount Protocol Flags    Type St Inode Path\n\
0000000000000000: 00000002 00000000 00010000 0001 01 444 /run/app.sock\n\
0000000000000000: 00000003 00000000 00000000 0001 03 555\n";

    #[test]
    fn inet_rows_skip_malformed() {
        let rows = parse_inet_table(TCP, SocketTable::Tcp4);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].local_addr, "127.0.0.1");
        assert_eq!(rows[0].local_port, 8080);
        assert_eq!(rows[0].state, "LISTEN");
        assert_eq!(rows[1].remote_port, 50000);
        assert_eq!(rows[2].inode, 333);
    }

    #[test]
    fn unix_rows() {
        let rows = parse_unix_table(UNIX);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].local_addr, "/run/app.sock");
        assert_eq!(rows[0].state, "FREE");
        assert_eq!(rows[1].local_addr, "");
        assert_eq!(rows[1].state, "CONNECTING");
    }

    struct FakeSource {
        procs: Vec<(u32, &'static str, Vec<&'static str>)>,
    }

    impl MetricSource for FakeSource {
        fn pids(&self) -> Result<Vec<u32>, SourceError> {
            Ok(self.procs.iter().map(|p| p.0).collect())
        }
        fn process_name(&self, pid: u32) -> Option<String> {
            self.procs.iter().find(|p| p.0 == pid).map(|p| p.1.to_string())
        }
        fn descriptors(&self, pid: u32) -> Result<Vec<Descriptor>, SourceError> {
            if pid == 1 {
                return Err(SourceError::PermissionDenied("process 1".into()));
            }
            let p = self
                .procs
                .iter()
                .find(|p| p.0 == pid)
                .ok_or_else(|| SourceError::NotFound(format!("process {pid}")))?;
            Ok(p.2
                .iter()
                .enumerate()
                .map(|(i, t)| Descriptor {
                    fd: i as i32,
                    target: t.to_string(),
                })
                .collect())
        }
        fn socket_table(&self, table: SocketTable) -> Result<String, SourceError> {
            match table {
                SocketTable::Tcp4 => Ok(TCP.to_string()),
                SocketTable::Unix => Ok(UNIX.to_string()),
                _ => Err(SourceError::NotFound("table".into())),
            }
        }
    }

    fn fake() -> FakeSource {
        FakeSource {
            procs: vec![
                (1, "init", vec!["socket:[333]"]),
                (100, "server", vec!["/dev/null", "socket:[111]", "socket:[444]"]),
                (200, "client", vec!["pipe:[9]", "socket:[222]"]),
            ],
        }
    }

    #[test]
    fn owners_match_descriptor_inodes() {
        let info = scan(&fake()).unwrap();
        assert_eq!(info.total, 5);
        assert_eq!(info.listen, 2);
        assert_eq!(info.established, 1);

        let by_inode: HashMap<u64, &SocketRecord> = info
            .tcp
            .iter()
            .chain(info.unix.iter())
            .map(|r| (r.inode, r))
            .collect();
        assert_eq!(by_inode[&111].pid, Some(100));
        assert_eq!(by_inode[&111].process_name.as_deref(), Some("server"));
        assert_eq!(by_inode[&222].pid, Some(200));
        assert_eq!(by_inode[&444].pid, Some(100));
        // pid 1 denied access: its socket has no owner, and the scan still succeeds
        assert_eq!(by_inode[&333].pid, None);
        assert_eq!(by_inode[&333].process_name, None);
        assert_eq!(by_inode[&555].pid, None);
    }

    #[test]
    fn per_process_connections() {
        let conns = connections_of(&fake(), 200, "client");
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].inode, 222);
        assert_eq!(conns[0].pid, Some(200));
        assert!(connections_of(&fake(), 1, "init").is_empty());
    }

    #[test]
    fn no_tables_is_an_error() {
        struct Empty;
        impl MetricSource for Empty {
            fn pids(&self) -> Result<Vec<u32>, SourceError> {
                Ok(vec![])
            }
        }
        assert!(matches!(scan(&Empty), Err(SourceError::Unavailable(_))));
    }
}
