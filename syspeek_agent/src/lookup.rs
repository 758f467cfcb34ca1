//! Read-only lookups: IP addresses, users, groups, containers and services.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::SourceError;
use crate::exec;
use crate::sockets;
use crate::source::{GroupEntry, MetricSource, PasswdEntry};
use crate::types::{
    Container, DockerInfo, GeoInfo, GroupInfo, IpInfo, Service, ServicesInfo, SocketInfo,
    UserInfo, UserProcess,
};

/// Timeout shared by reverse DNS, whois and the geo service.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

const GEO_ENDPOINT: &str = "http://ip-api.com/json";
const WHOIS_MAX_LINES: usize = 20;
const USER_PROCS_LIMIT: usize = 50;

const WHOIS_KEYWORDS: &[&str] = &[
    "orgname",
    "organization",
    "org-name",
    "netname",
    "country",
    "descr",
    "abuse",
    "address",
    "inet6num",
    "route6",
];

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_private()
}

// fc00::/7
fn is_private_v6(ip: Ipv6Addr) -> bool {
    ip.segments()[0] & 0xfe00 == 0xfc00
}

pub fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_v4(v4),
            None => is_private_v6(v6),
        },
    }
}

/// Keeps the identifying lines of a whois answer.
pub fn whois_excerpt(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('%'))
        .filter(|l| {
            let lower = l.to_ascii_lowercase();
            WHOIS_KEYWORDS.iter().any(|k| lower.contains(k))
        })
        .take(WHOIS_MAX_LINES)
        .collect::<Vec<_>>()
        .join("\n")
}

/// First name from `getent hosts` output (`<addr> <name> [aliases]`).
pub fn parse_getent_hosts(text: &str) -> Option<String> {
    text.lines()
        .next()?
        .split_whitespace()
        .nth(1)
        .map(|h| h.trim_end_matches('.').to_string())
}

/// Pids owning a TCP or UDP socket with `ip` at either end.
pub fn related_pids(info: &SocketInfo, ip: IpAddr) -> Vec<u32> {
    let needle = ip.to_string();
    info.tcp
        .iter()
        .chain(info.udp.iter())
        .filter(|s| s.local_addr == needle || s.remote_addr == needle)
        .filter_map(|s| s.pid)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeoAnswer {
    status: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    country_code: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    lat: f64,
    #[serde(default)]
    lon: f64,
    #[serde(default)]
    org: String,
    #[serde(default, rename = "as")]
    asn: String,
}

impl From<GeoAnswer> for GeoInfo {
    fn from(a: GeoAnswer) -> Self {
        GeoInfo {
            country: a.country,
            country_code: a.country_code,
            region: a.region,
            city: a.city,
            org: a.org,
            asn: a.asn,
            latitude: a.lat,
            longitude: a.lon,
        }
    }
}

/// IP lookups. Owns the HTTP client used for geolocation.
#[derive(Debug, Clone)]
pub struct IpLookup {
    http: reqwest::Client,
    geo_endpoint: String,
}

impl IpLookup {
    pub fn new() -> Result<Self, SourceError> {
        Self::with_endpoint(GEO_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: &str) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Failed(format!("http client: {e}")))?;
        Ok(Self {
            http,
            geo_endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn reverse_dns(&self, ip: IpAddr) -> Option<String> {
        let addr = ip.to_string();
        match exec::run("getent", &["hosts", &addr], LOOKUP_TIMEOUT).await {
            Ok(out) => parse_getent_hosts(&out),
            Err(e) => {
                debug!("reverse lookup of {addr}: {e}");
                None
            }
        }
    }

    async fn whois(&self, ip: IpAddr) -> Option<String> {
        let out = exec::run("whois", &[&ip.to_string()], LOOKUP_TIMEOUT)
            .await
            .map_err(|e| debug!("whois {ip}: {e}"))
            .ok()?;
        Some(whois_excerpt(&out)).filter(|s| !s.is_empty())
    }

    async fn geo(&self, ip: IpAddr) -> Option<GeoInfo> {
        let url = format!(
            "{}/{ip}?fields=status,country,countryCode,region,city,lat,lon,org,as",
            self.geo_endpoint
        );
        let answer: GeoAnswer = match self.http.get(&url).send().await {
            Ok(resp) => resp.json().await.map_err(|e| debug!("geo {ip}: {e}")).ok()?,
            Err(e) => {
                debug!("geo {ip}: {e}");
                return None;
            }
        };
        (answer.status == "success").then(|| answer.into())
    }

    /// Classification, reverse name and owning pids; whois and geo data only
    /// for public addresses.
    pub async fn lookup(&self, ip: IpAddr, source: Arc<dyn MetricSource>) -> IpInfo {
        let private = is_private(ip);
        let loopback = ip.is_loopback();
        let public = !private && !loopback && !ip.is_unspecified();

        let scan = tokio::task::spawn_blocking(move || sockets::scan(&*source));
        let (hostname, whois, geoip) = if public {
            tokio::join!(self.reverse_dns(ip), self.whois(ip), self.geo(ip))
        } else {
            (self.reverse_dns(ip).await, None, None)
        };
        let related_procs = match scan.await {
            Ok(Ok(info)) => related_pids(&info, ip),
            Ok(Err(e)) => {
                debug!("socket scan for {ip}: {e}");
                Vec::new()
            }
            Err(e) => {
                debug!("socket scan for {ip} panicked: {e}");
                Vec::new()
            }
        };
        IpInfo {
            ip: ip.to_string(),
            hostname,
            is_private: private,
            is_loopback: loopback,
            version: if ip.is_ipv4() { "IPv4" } else { "IPv6" },
            whois,
            geoip,
            related_procs,
        }
    }
}

fn find_user<'a>(users: &'a [PasswdEntry], query: &str) -> Option<&'a PasswdEntry> {
    users.iter().find(|u| u.name == query).or_else(|| {
        let uid: u32 = query.parse().ok()?;
        users.iter().find(|u| u.uid == uid)
    })
}

fn find_group<'a>(groups: &'a [GroupEntry], query: &str) -> Option<&'a GroupEntry> {
    groups.iter().find(|g| g.name == query).or_else(|| {
        let gid: u32 = query.parse().ok()?;
        groups.iter().find(|g| g.gid == gid)
    })
}

/// User by name or numeric uid.
pub fn user(source: &dyn MetricSource, query: &str) -> Result<UserInfo, SourceError> {
    let users = source.users()?;
    let entry = find_user(&users, query)
        .ok_or_else(|| SourceError::NotFound(format!("user {query}")))?
        .clone();
    let groups = source
        .groups()
        .unwrap_or_default()
        .into_iter()
        .filter(|g| g.gid == entry.gid || g.members.iter().any(|m| *m == entry.name))
        .map(|g| g.name)
        .collect();
    let mut owned: Vec<UserProcess> = source
        .processes()
        .unwrap_or_default()
        .into_iter()
        .filter(|p| p.uid == Some(entry.uid))
        .map(|p| UserProcess {
            pid: p.pid,
            name: p.name,
        })
        .collect();
    owned.sort_by_key(|p| p.pid);
    let process_count = owned.len();
    owned.truncate(USER_PROCS_LIMIT);
    Ok(UserInfo {
        username: entry.name,
        uid: entry.uid,
        gid: entry.gid,
        gecos: entry.gecos,
        home_dir: entry.home,
        shell: entry.shell,
        groups,
        process_count,
        running_procs: owned,
    })
}

/// Group by name or numeric gid. Members include users whose primary group it is.
pub fn group(source: &dyn MetricSource, query: &str) -> Result<GroupInfo, SourceError> {
    let groups = source.groups()?;
    let entry = find_group(&groups, query)
        .ok_or_else(|| SourceError::NotFound(format!("group {query}")))?;
    let mut members: Vec<String> = entry.members.clone();
    for u in source.users().unwrap_or_default() {
        if u.gid == entry.gid && !members.contains(&u.name) {
            members.push(u.name);
        }
    }
    Ok(GroupInfo {
        name: entry.name.clone(),
        gid: entry.gid,
        members,
    })
}

// `docker ps --format '{{json .}}'` row
#[derive(Debug, Deserialize)]
struct PsRow {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Command", default)]
    command: String,
    #[serde(rename = "CreatedAt", default)]
    created: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Ports", default)]
    ports: String,
}

/// One JSON object per line; malformed lines are skipped.
pub fn parse_docker_ps(text: &str) -> Vec<Container> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str::<PsRow>(l).ok())
        .map(|r| Container {
            id: r.id,
            name: r.names.trim_start_matches('/').to_string(),
            image: r.image,
            command: r.command.trim_matches('"').to_string(),
            created: r.created,
            state: r.state.to_lowercase(),
            status: r.status,
            ports: r.ports,
        })
        .collect()
}

fn str_at<'a>(v: &'a Value, pointer: &str) -> &'a str {
    v.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

/// First object of `docker inspect` output.
pub fn parse_docker_inspect(text: &str) -> Result<Container, SourceError> {
    let all: Vec<Value> =
        serde_json::from_str(text)
            .map_err(|e| SourceError::parse("docker inspect", e.to_string()))?;
    let v = all
        .first()
        .ok_or_else(|| SourceError::NotFound("container".into()))?;
    let command = v
        .pointer("/Config/Cmd")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    let ports = v
        .pointer("/NetworkSettings/Ports")
        .and_then(Value::as_object)
        .map(|m| {
            let mut keys: Vec<&str> = m.keys().map(String::as_str).collect();
            keys.sort_unstable();
            keys.join(", ")
        })
        .unwrap_or_default();
    let state = str_at(v, "/State/Status").to_string();
    Ok(Container {
        id: str_at(v, "/Id").to_string(),
        name: str_at(v, "/Name").trim_start_matches('/').to_string(),
        image: str_at(v, "/Config/Image").to_string(),
        command,
        created: str_at(v, "/Created").to_string(),
        status: state.clone(),
        state,
        ports,
    })
}

/// Container list; any failure of the engine yields `available: false`.
pub async fn containers() -> DockerInfo {
    match exec::run("docker", &["ps", "-a", "--format", "{{json .}}"], LOOKUP_TIMEOUT).await {
        Ok(out) => DockerInfo {
            available: true,
            containers: parse_docker_ps(&out),
        },
        Err(e) => {
            debug!("docker: {e}");
            DockerInfo::default()
        }
    }
}

pub async fn container(id: &str) -> Result<Container, SourceError> {
    let out = exec::run("docker", &["inspect", id], LOOKUP_TIMEOUT).await?;
    parse_docker_inspect(&out)
}

/// `systemctl list-units --plain --no-legend` rows.
pub fn parse_units(text: &str) -> Vec<Service> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_start_matches(['●', '*', ' ']);
            let mut fields = line.split_whitespace();
            let unit = fields.next()?;
            let _load = fields.next()?;
            let state = fields.next()?;
            let sub_state = fields.next()?;
            Some(Service {
                name: unit.trim_end_matches(".service").to_string(),
                description: fields.collect::<Vec<_>>().join(" "),
                state: state.to_string(),
                sub_state: sub_state.to_string(),
            })
        })
        .collect()
}

pub async fn services() -> ServicesInfo {
    let args = [
        "list-units",
        "--type=service",
        "--all",
        "--no-pager",
        "--no-legend",
        "--plain",
    ];
    match exec::run("systemctl", &args, LOOKUP_TIMEOUT).await {
        Ok(out) => ServicesInfo {
            available: true,
            manager: "systemd",
            services: parse_units(&out),
        },
        Err(e) => {
            debug!("systemctl: {e}");
            ServicesInfo {
                available: false,
                manager: "none",
                services: Vec::new(),
            }
        }
    }
}
