//! Socket entry → scorer feature vector mapping.
//!
//! The external scorer consumes a fixed 26-column vector per connection.
//! Column order is the contract: [`FEATURES`] is the single table defining
//! both the names and the extraction, and nothing else may reorder it.
//! The extractors approximate flow statistics from a point-in-time socket
//! snapshot, which is why several of them lean on the smoothed RTT.

use serde_json::{Map, Value};

use crate::types::SocketEntry;

pub const FEATURE_COUNT: usize = 26;

pub type FeatureVector = [f64; FEATURE_COUNT];

/// One feature column: its wire name and its extractor.
pub struct Feature {
    pub name: &'static str,
    extract: fn(&FlowView) -> f64,
}

/// Intermediate quantities shared by several extractors. Counters are
/// clamped to at least one so the ratio features stay finite.
pub struct FlowView {
    bytes_sent: f64,
    bytes_received: f64,
    segs_out: f64,
    segs_in: f64,
    data_segs_out: f64,
    total_segs: f64,
    total_bytes: f64,
    rtt_ms: f64,
    rtt_sec: f64,
    /// Estimated flow duration in microseconds.
    flow_duration: f64,
    send_rate: f64,
    mss: f64,
    retrans: f64,
    syn_state: bool,
}

impl FlowView {
    fn from_entry(entry: &SocketEntry) -> Self {
        let bytes_sent = (entry.bytes_sent.max(1)) as f64;
        let bytes_received = (entry.bytes_received.max(1)) as f64;
        let segs_out = (entry.segs_out.max(1)) as f64;
        let segs_in = (entry.segs_in.max(1)) as f64;
        let total_segs = segs_out + segs_in;
        // A snapshot has no flow timer; approximate with segment count at
        // the smoothed RTT (50ms default when the kernel reported none).
        let rtt_ms = if entry.rtt_ms > 0.0 { entry.rtt_ms } else { 50.0 };
        Self {
            bytes_sent,
            bytes_received,
            segs_out,
            segs_in,
            data_segs_out: entry.data_segs_out as f64,
            total_segs,
            total_bytes: bytes_sent + bytes_received,
            rtt_ms,
            rtt_sec: rtt_ms / 1000.0,
            flow_duration: total_segs * rtt_ms * 1000.0,
            send_rate: entry.send_rate,
            mss: entry.mss as f64,
            retrans: entry.retrans as f64,
            syn_state: entry.state == "SYN-SENT" || entry.state == "SYN-RECV",
        }
    }

    fn fwd_pkt_len_mean(&self) -> f64 {
        self.bytes_sent / self.segs_out
    }

    fn bwd_pkt_len_mean(&self) -> f64 {
        self.bytes_received / self.segs_in
    }

    fn flow_bytes_per_sec(&self) -> f64 {
        if self.rtt_sec > 0.0 {
            self.total_bytes / (self.total_segs * self.rtt_sec)
        } else {
            self.send_rate
        }
    }

    fn iat_mean(&self, segs: f64) -> f64 {
        if segs > 1.0 {
            self.flow_duration / (segs - 1.0)
        } else {
            self.flow_duration
        }
    }

    /// Raw 16-bit TCP window estimate; the scorer was trained on values
    /// clamped to the header field range.
    fn init_window(&self) -> f64 {
        let window = if self.mss > 0.0 { self.mss * 44.0 } else { 29_200.0 };
        window.min(65_535.0)
    }
}

/// The scorer schema, in wire order. Do not reorder.
pub const FEATURES: [Feature; FEATURE_COUNT] = [
    Feature { name: "flow_duration", extract: |v| v.flow_duration },
    Feature { name: "total_fwd_packets", extract: |v| v.segs_out },
    Feature { name: "total_bwd_packets", extract: |v| v.segs_in },
    Feature { name: "fwd_packet_length_mean", extract: FlowView::fwd_pkt_len_mean },
    Feature { name: "bwd_packet_length_mean", extract: FlowView::bwd_pkt_len_mean },
    Feature { name: "flow_bytes_per_sec", extract: FlowView::flow_bytes_per_sec },
    Feature { name: "flow_packets_per_sec", extract: |v| v.total_segs / (v.total_segs * v.rtt_sec) },
    Feature { name: "fwd_iat_mean", extract: |v| v.iat_mean(v.segs_out) },
    Feature { name: "bwd_iat_mean", extract: |v| v.iat_mean(v.segs_in) },
    Feature { name: "active_mean", extract: |v| v.flow_duration * 0.7 },
    // Every TCP flow carries at least one SYN from the handshake; a flow
    // still mid-handshake counts both directions.
    Feature { name: "syn_flag_count", extract: |v| if v.syn_state { 2.0 } else { 1.0 } },
    Feature { name: "rst_flag_count", extract: |v| if v.retrans > 3.0 { v.retrans.min(10.0) } else { 0.0 } },
    Feature { name: "psh_flag_count", extract: |v| if v.data_segs_out > 0.0 { v.data_segs_out } else { (v.segs_out * 0.6).floor().max(1.0) } },
    Feature { name: "ack_flag_count", extract: |v| v.total_segs },
    Feature { name: "fwd_header_length", extract: |v| v.segs_out * 32.0 },
    Feature { name: "bwd_header_length", extract: |v| v.segs_in * 32.0 },
    Feature { name: "avg_fwd_segment_size", extract: FlowView::fwd_pkt_len_mean },
    Feature { name: "avg_bwd_segment_size", extract: FlowView::bwd_pkt_len_mean },
    Feature { name: "bwd_packets_per_sec", extract: |v| v.segs_in / (v.total_segs * v.rtt_sec) },
    Feature { name: "down_up_ratio", extract: |v| v.bytes_received / v.bytes_sent },
    Feature { name: "avg_packet_size", extract: |v| v.total_bytes / v.total_segs },
    Feature { name: "init_win_bytes_forward", extract: FlowView::init_window },
    Feature { name: "init_win_bytes_backward", extract: FlowView::init_window },
    Feature { name: "subflow_fwd_packets", extract: |v| v.segs_out },
    Feature { name: "subflow_fwd_bytes", extract: |v| v.bytes_sent },
    Feature { name: "subflow_bwd_packets", extract: |v| v.segs_in },
];

/// Column names in wire order, for callers serializing vectors.
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = {
    let mut names = [""; FEATURE_COUNT];
    let mut i = 0;
    while i < FEATURE_COUNT {
        names[i] = FEATURES[i].name;
        i += 1;
    }
    names
};

/// Map one socket entry to its feature vector, in wire order.
pub fn feature_vector(entry: &SocketEntry) -> FeatureVector {
    let view = FlowView::from_entry(entry);
    let mut vector = [0.0; FEATURE_COUNT];
    for (slot, feature) in vector.iter_mut().zip(FEATURES.iter()) {
        *slot = (feature.extract)(&view);
    }
    vector
}

/// Serialize a vector as the named-column JSON object the scorer expects.
pub fn vector_to_event(vector: &FeatureVector) -> Value {
    let mut event = Map::with_capacity(FEATURE_COUNT);
    for (name, value) in FEATURE_COLUMNS.iter().zip(vector.iter()) {
        event.insert((*name).to_string(), Value::from(*value));
    }
    Value::Object(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry() -> SocketEntry {
        SocketEntry {
            state: "ESTAB".into(),
            bytes_sent: 15_234,
            bytes_received: 52_341,
            segs_out: 42,
            segs_in: 38,
            data_segs_out: 20,
            data_segs_in: 35,
            rtt_ms: 12.5,
            mss: 1448,
            ..SocketEntry::default()
        }
    }

    fn feature(vector: &FeatureVector, name: &str) -> f64 {
        let idx = FEATURE_COLUMNS
            .iter()
            .position(|n| *n == name)
            .unwrap_or_else(|| panic!("unknown feature {name}"));
        vector[idx]
    }

    #[test]
    fn column_order_is_pinned() {
        assert_eq!(FEATURE_COLUMNS.len(), 26);
        assert_eq!(FEATURE_COLUMNS[0], "flow_duration");
        assert_eq!(FEATURE_COLUMNS[10], "syn_flag_count");
        assert_eq!(FEATURE_COLUMNS[21], "init_win_bytes_forward");
        assert_eq!(FEATURE_COLUMNS[25], "subflow_bwd_packets");
        // No duplicates.
        for (i, a) in FEATURE_COLUMNS.iter().enumerate() {
            for b in &FEATURE_COLUMNS[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn counters_map_field_by_field() {
        let v = feature_vector(&sample_entry());
        assert_eq!(feature(&v, "total_fwd_packets"), 42.0);
        assert_eq!(feature(&v, "total_bwd_packets"), 38.0);
        assert_eq!(feature(&v, "subflow_fwd_bytes"), 15_234.0);
        assert_eq!(feature(&v, "fwd_header_length"), 42.0 * 32.0);
        assert_eq!(feature(&v, "bwd_header_length"), 38.0 * 32.0);
        assert_eq!(feature(&v, "ack_flag_count"), 80.0);
        assert_eq!(feature(&v, "psh_flag_count"), 20.0);
    }

    #[test]
    fn duration_and_rates() {
        let v = feature_vector(&sample_entry());
        // 80 segments at 12.5ms smoothed RTT, in microseconds.
        assert_eq!(feature(&v, "flow_duration"), 80.0 * 12.5 * 1000.0);
        assert!((feature(&v, "active_mean") - 80.0 * 12.5 * 1000.0 * 0.7).abs() < 1e-6);
        let expected_bps = (15_234.0 + 52_341.0) / (80.0 * 0.0125);
        assert!((feature(&v, "flow_bytes_per_sec") - expected_bps).abs() < 1e-6);
    }

    #[test]
    fn packet_length_means() {
        let v = feature_vector(&sample_entry());
        assert!((feature(&v, "fwd_packet_length_mean") - 15_234.0 / 42.0).abs() < 1e-9);
        assert!((feature(&v, "bwd_packet_length_mean") - 52_341.0 / 38.0).abs() < 1e-9);
        assert_eq!(
            feature(&v, "avg_fwd_segment_size"),
            feature(&v, "fwd_packet_length_mean")
        );
        assert!((feature(&v, "down_up_ratio") - 52_341.0 / 15_234.0).abs() < 1e-9);
    }

    #[test]
    fn flag_counts_follow_state() {
        let established = feature_vector(&sample_entry());
        assert_eq!(feature(&established, "syn_flag_count"), 1.0);
        assert_eq!(feature(&established, "rst_flag_count"), 0.0);

        let mut handshake = sample_entry();
        handshake.state = "SYN-SENT".into();
        handshake.retrans = 6;
        let v = feature_vector(&handshake);
        assert_eq!(feature(&v, "syn_flag_count"), 2.0);
        assert_eq!(feature(&v, "rst_flag_count"), 6.0);
    }

    #[test]
    fn init_window_clamped_to_header_range() {
        let v = feature_vector(&sample_entry());
        assert_eq!(feature(&v, "init_win_bytes_forward"), 1448.0 * 44.0);
        assert!(feature(&v, "init_win_bytes_forward") <= 65_535.0);

        let mut no_mss = sample_entry();
        no_mss.mss = 0;
        let v = feature_vector(&no_mss);
        assert_eq!(feature(&v, "init_win_bytes_forward"), 29_200.0);
    }

    #[test]
    fn zero_counters_stay_finite() {
        let v = feature_vector(&SocketEntry::default());
        for (name, value) in FEATURE_COLUMNS.iter().zip(v.iter()) {
            assert!(value.is_finite(), "{name} not finite: {value}");
        }
    }

    #[test]
    fn event_serialization_uses_wire_names() {
        let v = feature_vector(&sample_entry());
        let event = vector_to_event(&v);
        let object = event.as_object().unwrap();
        assert_eq!(object.len(), 26);
        assert_eq!(
            object["total_fwd_packets"].as_f64().unwrap(),
            feature(&v, "total_fwd_packets")
        );
    }
}
