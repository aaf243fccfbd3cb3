//! `ss -tnpi` socket-table parsing.
//!
//! The tool prints one connection row followed by an indented statistics
//! line. Rows that match neither shape are counted as parse failures and
//! skipped; a garbled snapshot degrades the scan, it never aborts it.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::{ParsedTable, SocketEntry};

fn conn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(ESTAB|SYN-SENT|SYN-RECV|FIN-WAIT-1|FIN-WAIT-2|TIME-WAIT|CLOSE-WAIT|LAST-ACK|LISTEN|CLOSING|CLOSE)\s+\d+\s+\d+\s+(\S+)\s+(\S+)\s*(.*)$",
        )
        .expect("connection row pattern is valid")
    })
}

fn process_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\("([^"]+)",pid=(\d+)"#).expect("process pattern is valid"))
}

/// Parse raw `ss -tnpi` output.
pub fn parse_socket_table(raw: &str) -> ParsedTable {
    let mut table = ParsedTable::default();
    let mut current: Option<(SocketEntry, Vec<String>)> = None;

    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        // Column header printed by ss.
        if line.starts_with("State") || line.starts_with("Netid") {
            continue;
        }

        if let Some(caps) = conn_re().captures(line) {
            if let Some((entry, stats)) = current.take() {
                table.entries.push(finalize(entry, &stats));
            }

            let (local_ip, local_port) = split_address(&caps[2]);
            let (peer_ip, peer_port) = split_address(&caps[3]);
            let (process, pid) = match process_re().captures(&caps[4]) {
                Some(proc_caps) => (
                    proc_caps[1].to_string(),
                    proc_caps[2].parse::<u32>().ok(),
                ),
                None => (String::new(), None),
            };

            current = Some((
                SocketEntry {
                    state: caps[1].to_string(),
                    local_ip,
                    local_port,
                    peer_ip,
                    peer_port,
                    process,
                    pid,
                    ..SocketEntry::default()
                },
                Vec::new(),
            ));
        } else if line.starts_with(char::is_whitespace) {
            match &mut current {
                Some((_, stats)) => stats.push(line.trim().to_string()),
                // Statistics with no preceding connection row.
                None => table.parse_failures += 1,
            }
        } else {
            table.parse_failures += 1;
        }
    }

    if let Some((entry, stats)) = current.take() {
        table.entries.push(finalize(entry, &stats));
    }
    table
}

/// Split `addr:port`, handling bracketed IPv6 (`[::1]:443`).
fn split_address(raw: &str) -> (String, u16) {
    if let Some(rest) = raw.strip_prefix('[') {
        if let Some((ip, port)) = rest.split_once("]:") {
            return (ip.to_string(), port.parse().unwrap_or(0));
        }
    }
    match raw.rsplit_once(':') {
        Some((ip, port)) => (ip.to_string(), port.parse().unwrap_or(0)),
        None => (raw.to_string(), 0),
    }
}

/// Fill in the kernel statistics from the indented continuation lines.
fn finalize(mut entry: SocketEntry, stats: &[String]) -> SocketEntry {
    let info = stats.join(" ");

    entry.bytes_sent = field_u64(&info, "bytes_sent");
    entry.bytes_received = field_u64(&info, "bytes_received");
    entry.segs_out = field_u64(&info, "segs_out");
    entry.segs_in = field_u64(&info, "segs_in");
    entry.data_segs_out = field_u64(&info, "data_segs_out");
    entry.data_segs_in = field_u64(&info, "data_segs_in");
    entry.mss = field_u64(&info, "mss");
    entry.cwnd = field_u64(&info, "cwnd");
    entry.retrans = field_u64(&info, "retrans");

    if let Some(caps) = capture(&info, r"rtt:(\d+\.?\d*)/(\d+\.?\d*)") {
        entry.rtt_ms = caps.0;
        entry.rtt_var_ms = caps.1;
    }
    if let Some(caps) = capture(&info, r"wscale:(\d+),(\d+)") {
        entry.wscale_snd = caps.0 as u32;
        entry.wscale_rcv = caps.1 as u32;
    }
    entry.send_rate = send_rate(&info);

    entry
}

fn field_u64(info: &str, key: &str) -> u64 {
    // Anchor on a non-word boundary so `segs_out` does not match inside
    // `data_segs_out`.
    let pattern = format!(r"(?:^|[ ,]){key}:(\d+)");
    Regex::new(&pattern)
        .ok()
        .and_then(|re| re.captures(info))
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0)
}

fn capture(info: &str, pattern: &str) -> Option<(f64, f64)> {
    let re = Regex::new(pattern).ok()?;
    let caps = re.captures(info)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// `send 9.26Mbps` style throughput estimate, converted to bytes/sec.
fn send_rate(info: &str) -> f64 {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"send\s+(\d+\.?\d*)([KMG]?bps)").expect("send rate pattern is valid")
    });
    let Some(caps) = re.captures(info) else {
        return 0.0;
    };
    let value: f64 = match caps[1].parse() {
        Ok(v) => v,
        Err(_) => return 0.0,
    };
    let bits = match &caps[2] {
        "bps" => value,
        "Kbps" => value * 1_000.0,
        "Mbps" => value * 1_000_000.0,
        "Gbps" => value * 1_000_000_000.0,
        _ => return 0.0,
    };
    bits / 8.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
State    Recv-Q Send-Q  Local Address:Port   Peer Address:Port  Process
ESTAB    0      0       192.168.1.5:43210    93.184.216.34:443  users:((\"firefox\",pid=1234,fd=45))
\t cubic wscale:7,7 rto:204 rtt:12.5/6.25 ato:40 mss:1448 pmtu:1500
\t cwnd:10 bytes_sent:15234 bytes_acked:15234 bytes_received:52341
\t segs_out:42 segs_in:38 data_segs_out:20 data_segs_in:35 send 9.26Mbps
TIME-WAIT 0     0       192.168.1.5:55123    10.0.0.9:8080
";

    #[test]
    fn parses_connection_rows() {
        let table = parse_socket_table(SAMPLE);
        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.parse_failures, 0);

        let first = &table.entries[0];
        assert_eq!(first.state, "ESTAB");
        assert_eq!(first.local_ip, "192.168.1.5");
        assert_eq!(first.local_port, 43210);
        assert_eq!(first.peer_ip, "93.184.216.34");
        assert_eq!(first.peer_port, 443);
        assert_eq!(first.process, "firefox");
        assert_eq!(first.pid, Some(1234));
    }

    #[test]
    fn extracts_kernel_statistics() {
        let table = parse_socket_table(SAMPLE);
        let first = &table.entries[0];
        assert_eq!(first.bytes_sent, 15_234);
        assert_eq!(first.bytes_received, 52_341);
        assert_eq!(first.segs_out, 42);
        assert_eq!(first.segs_in, 38);
        assert_eq!(first.data_segs_out, 20);
        assert_eq!(first.mss, 1448);
        assert_eq!(first.cwnd, 10);
        assert!((first.rtt_ms - 12.5).abs() < f64::EPSILON);
        assert!((first.rtt_var_ms - 6.25).abs() < f64::EPSILON);
        assert_eq!(first.wscale_snd, 7);
        // 9.26 Mbps = 1_157_500 bytes/sec
        assert!((first.send_rate - 1_157_500.0).abs() < 1.0);
    }

    #[test]
    fn garbled_line_counts_as_failure() {
        let raw = "\
ESTAB 0 0 10.0.0.1:1000 10.0.0.2:2000
this line is garbage and matches nothing
";
        let table = parse_socket_table(raw);
        assert_eq!(table.entries.len(), 1);
        assert_eq!(table.parse_failures, 1);
    }

    #[test]
    fn ipv6_addresses() {
        let raw = "ESTAB 0 0 [::1]:8080 [2001:db8::2]:443\n";
        let table = parse_socket_table(raw);
        assert_eq!(table.entries[0].local_ip, "::1");
        assert_eq!(table.entries[0].local_port, 8080);
        assert_eq!(table.entries[0].peer_ip, "2001:db8::2");
        assert_eq!(table.entries[0].peer_port, 443);
    }

    #[test]
    fn missing_statistics_default_to_zero() {
        let raw = "TIME-WAIT 0 0 10.0.0.1:1000 10.0.0.2:2000\n";
        let table = parse_socket_table(raw);
        let entry = &table.entries[0];
        assert_eq!(entry.bytes_sent, 0);
        assert_eq!(entry.rtt_ms, 0.0);
        assert_eq!(entry.send_rate, 0.0);
    }

    #[test]
    fn orphan_statistics_line_is_failure() {
        let table = parse_socket_table("\t cwnd:10 rtt:1.0/0.5\n");
        assert!(table.entries.is_empty());
        assert_eq!(table.parse_failures, 1);
    }
}
