//! Firewall backend detection and rule parsing.
//!
//! Backends are probed in order ufw, firewalld, nftables, iptables; the first
//! one whose tool answers wins.

use tracing::debug;

use crate::exec::run_blocking;
use crate::types::{FirewallInfo, FirewallRule};

pub(crate) fn detect() -> FirewallInfo {
    let probes: [(&str, fn() -> Option<FirewallInfo>); 4] = [
        ("ufw", try_ufw),
        ("firewalld", try_firewalld),
        ("nftables", try_nft),
        ("iptables", try_iptables),
    ];
    for (name, probe) in probes {
        if let Some(info) = probe() {
            return info;
        }
        debug!("firewall backend {name} not usable");
    }
    FirewallInfo::default()
}

fn try_ufw() -> Option<FirewallInfo> {
    let out = run_blocking("ufw", &["status", "verbose"]).ok()?;
    Some(parse_ufw(&out))
}

fn try_firewalld() -> Option<FirewallInfo> {
    let state = run_blocking("firewall-cmd", &["--state"]).ok()?;
    let mut info = FirewallInfo {
        available: true,
        backend: "firewalld".into(),
        active: state.trim() == "running",
        rules: Vec::new(),
    };
    if let Ok(ports) = run_blocking("firewall-cmd", &["--list-ports"]) {
        info.rules.extend(ports.split_whitespace().filter_map(|p| {
            let (port, proto) = p.split_once('/')?;
            Some(FirewallRule {
                protocol: proto.to_string(),
                port: port.parse().unwrap_or(0),
                action: "ALLOW".into(),
                raw: p.to_string(),
                ..Default::default()
            })
        }));
    }
    if let Ok(services) = run_blocking("firewall-cmd", &["--list-services"]) {
        info.rules.extend(services.split_whitespace().map(|s| FirewallRule {
            action: "ALLOW".into(),
            raw: format!("service: {s}"),
            ..Default::default()
        }));
    }
    Some(info)
}

fn try_nft() -> Option<FirewallInfo> {
    let out = run_blocking("nft", &["list", "ruleset"]).ok()?;
    Some(parse_nft(&out))
}

fn try_iptables() -> Option<FirewallInfo> {
    let out = run_blocking("iptables", &["-L", "-n", "--line-numbers"]).ok()?;
    Some(parse_iptables(&out))
}

/// Parses `ufw status verbose`.
pub fn parse_ufw(text: &str) -> FirewallInfo {
    let mut info = FirewallInfo {
        available: true,
        backend: "ufw".into(),
        ..Default::default()
    };
    for line in text.lines().map(str::trim) {
        if let Some(status) = line.strip_prefix("Status:") {
            info.active = status.trim() == "active";
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(action) = parts
            .iter()
            .find(|p| matches!(**p, "ALLOW" | "DENY" | "REJECT" | "LIMIT"))
        else {
            continue;
        };
        if parts.len() < 3 {
            continue;
        }
        let (port, protocol) = match parts[0].split_once('/') {
            Some((port, proto)) => (port, proto),
            None => (parts[0], ""),
        };
        let chain = if parts.contains(&"IN") {
            "INPUT"
        } else if parts.contains(&"OUT") {
            "OUTPUT"
        } else {
            ""
        };
        let source = parts
            .iter()
            .position(|p| p == action)
            .and_then(|i| parts.get(i + 1..))
            .map(|rest| {
                rest.iter()
                    .filter(|p| !matches!(**p, "IN" | "OUT" | "FWD"))
                    .copied()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        info.rules.push(FirewallRule {
            chain: chain.into(),
            protocol: protocol.into(),
            port: port.parse().unwrap_or(0),
            source,
            action: (*action).into(),
            raw: line.to_string(),
            ..Default::default()
        });
    }
    info
}

/// Parses `nft list ruleset`, keeping rules that match on a port.
pub fn parse_nft(text: &str) -> FirewallInfo {
    let mut info = FirewallInfo {
        available: true,
        backend: "nftables".into(),
        active: true,
        rules: Vec::new(),
    };
    let mut chain = String::new();
    for line in text.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("chain ") {
            chain = rest.split_whitespace().next().unwrap_or_default().to_string();
            continue;
        }
        if !line.contains("dport") && !line.contains("sport") {
            continue;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        let protocol = words
            .iter()
            .find(|w| matches!(**w, "tcp" | "udp"))
            .copied()
            .unwrap_or_default();
        let port = words
            .iter()
            .position(|w| *w == "dport")
            .and_then(|i| words.get(i + 1))
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);
        let action = words
            .iter()
            .rev()
            .find_map(|w| match *w {
                "accept" => Some("ACCEPT"),
                "drop" => Some("DROP"),
                "reject" => Some("REJECT"),
                _ => None,
            })
            .unwrap_or_default();
        let interface = words
            .iter()
            .position(|w| *w == "iifname")
            .and_then(|i| words.get(i + 1))
            .map(|s| s.trim_matches('"').to_string())
            .unwrap_or_default();
        info.rules.push(FirewallRule {
            chain: chain.clone(),
            protocol: protocol.into(),
            port,
            action: action.into(),
            interface,
            raw: line.to_string(),
            ..Default::default()
        });
    }
    info
}

/// Parses `iptables -L -n --line-numbers`.
pub fn parse_iptables(text: &str) -> FirewallInfo {
    let mut info = FirewallInfo {
        available: true,
        backend: "iptables".into(),
        active: true,
        rules: Vec::new(),
    };
    let mut chain = String::new();
    for line in text.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Chain ") {
            chain = rest.split_whitespace().next().unwrap_or_default().to_string();
            continue;
        }
        if line.is_empty() || line.starts_with("num") {
            continue;
        }
        let f: Vec<&str> = line.split_whitespace().collect();
        if f.len() < 5 {
            continue;
        }
        let port = f
            .iter()
            .find_map(|w| w.strip_prefix("dpt:"))
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);
        info.rules.push(FirewallRule {
            chain: chain.clone(),
            action: f[1].into(),
            protocol: f[2].into(),
            source: f[4].into(),
            destination: f.get(5).copied().unwrap_or_default().into(),
            port,
            raw: line.to_string(),
            ..Default::default()
        });
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ufw_rules_and_state() {
        let text = "Status: active\nLogging: on (low)\nDefault: deny (incoming)\n\n\
                    To                         Action      From\n\
                    --                         ------      ----\n\
                    22/tcp                     ALLOW IN    Anywhere\n\
                    443                        DENY IN     10.0.0.0/8\n";
        let info = parse_ufw(text);
        assert!(info.active);
        assert_eq!(info.rules.len(), 2);
        assert_eq!(info.rules[0].port, 22);
        assert_eq!(info.rules[0].protocol, "tcp");
        assert_eq!(info.rules[0].chain, "INPUT");
        assert_eq!(info.rules[0].action, "ALLOW");
        assert_eq!(info.rules[1].source, "10.0.0.0/8");
        assert!(!parse_ufw("Status: inactive\n").active);
    }

    #[test]
    fn nft_rules_carry_chain() {
        let text = "table inet filter {\n\tchain input {\n\t\ttype filter hook input priority 0;\n\
                    \t\tiifname \"eth0\" tcp dport 22 accept\n\t\tudp dport 53 drop\n\t}\n}\n";
        let info = parse_nft(text);
        assert_eq!(info.rules.len(), 2);
        assert_eq!(info.rules[0].chain, "input");
        assert_eq!(info.rules[0].interface, "eth0");
        assert_eq!(info.rules[0].port, 22);
        assert_eq!(info.rules[0].action, "ACCEPT");
        assert_eq!(info.rules[1].protocol, "udp");
        assert_eq!(info.rules[1].action, "DROP");
    }

    #[test]
    fn iptables_rules() {
        let text = "Chain INPUT (policy ACCEPT)\n\
                    num  target     prot opt source               destination\n\
                    1    ACCEPT     tcp  --  0.0.0.0/0            0.0.0.0/0            tcp dpt:22\n\
                    2    DROP       all  --  192.168.1.5          0.0.0.0/0\n\n\
                    Chain FORWARD (policy DROP)\n";
        let info = parse_iptables(text);
        assert_eq!(info.rules.len(), 2);
        assert_eq!(info.rules[0].chain, "INPUT");
        assert_eq!(info.rules[0].port, 22);
        assert_eq!(info.rules[1].action, "DROP");
        assert_eq!(info.rules[1].source, "192.168.1.5");
    }
}
