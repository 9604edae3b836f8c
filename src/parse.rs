// src/parse.rs
//! Result parsing for the external benchmark tools.
//!
//! Parsing is an ordered list of strategies, each returning either parsed
//! metrics or a typed miss. The runner tries the structured fio JSON artifact
//! first and only then falls back to the tool's textual output; dd sequential
//! passes have their own stderr summary parser.

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// One strategy declined or failed to extract metrics. Misses accumulate so
/// the final error names every strategy that was tried.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ParseMiss(pub String);

/// Metrics extracted from one benchmark invocation. Read and write sides are
/// folded into totals: IOPS and bandwidth sum, latency is IOPS-weighted.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMetrics {
    pub throughput_mbps: f64,
    pub iops: f64,
    pub lat_mean_us: Option<f64>,
    pub lat_p99_us: Option<f64>,
}

/// Everything one external invocation left behind.
#[derive(Debug, Default)]
pub struct RawOutput {
    /// Contents of the structured JSON artifact, when the file existed.
    pub json: Option<String>,
    pub stdout: String,
    pub stderr: String,
}

/// Parse a random-I/O (fio) invocation: structured JSON first, text fallback.
pub fn parse_random(raw: &RawOutput) -> Result<ParsedMetrics, ParseMiss> {
    let strategies: [(&str, fn(&RawOutput) -> Result<ParsedMetrics, ParseMiss>); 2] =
        [("fio-json", fio_json_strategy), ("fio-text", fio_text_strategy)];

    let mut misses = Vec::new();
    for (name, strategy) in strategies {
        match strategy(raw) {
            Ok(metrics) => return Ok(metrics),
            Err(miss) => misses.push(format!("{name}: {miss}")),
        }
    }
    Err(ParseMiss(misses.join("; ")))
}

fn fio_json_strategy(raw: &RawOutput) -> Result<ParsedMetrics, ParseMiss> {
    let text = raw
        .json
        .as_deref()
        .ok_or_else(|| ParseMiss("no structured output file".into()))?;
    parse_fio_json(text)
}

fn fio_text_strategy(raw: &RawOutput) -> Result<ParsedMetrics, ParseMiss> {
    parse_fio_text(&raw.stdout)
}

/// One side (read or write) of a fio job summary.
#[derive(Debug, Default, Clone, Copy)]
struct SideMetrics {
    iops: f64,
    bw_mbps: f64,
    lat_mean_us: Option<f64>,
    lat_p99_us: Option<f64>,
}

impl SideMetrics {
    fn is_empty(&self) -> bool {
        self.iops == 0.0 && self.bw_mbps == 0.0
    }
}

fn combine_sides(read: SideMetrics, write: SideMetrics) -> Result<ParsedMetrics, ParseMiss> {
    if read.is_empty() && write.is_empty() {
        return Err(ParseMiss("no read or write activity reported".into()));
    }

    let iops = read.iops + write.iops;
    let lat_mean_us = weighted_latency(read.lat_mean_us, read.iops, write.lat_mean_us, write.iops);
    // p99 is not averageable across sides; take the worse one.
    let lat_p99_us = match (read.lat_p99_us, write.lat_p99_us) {
        (Some(r), Some(w)) => Some(r.max(w)),
        (r, w) => r.or(w),
    };

    Ok(ParsedMetrics {
        throughput_mbps: read.bw_mbps + write.bw_mbps,
        iops,
        lat_mean_us,
        lat_p99_us,
    })
}

fn weighted_latency(a: Option<f64>, a_w: f64, b: Option<f64>, b_w: f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) if a_w + b_w > 0.0 => Some((a * a_w + b * b_w) / (a_w + b_w)),
        (Some(a), Some(b)) => Some((a + b) / 2.0),
        (a, b) => a.or(b),
    }
}

/// Parse fio's `--output-format=json` document (first job, group reporting).
pub fn parse_fio_json(text: &str) -> Result<ParsedMetrics, ParseMiss> {
    let doc: Value =
        serde_json::from_str(text).map_err(|e| ParseMiss(format!("invalid JSON: {e}")))?;
    let job = doc
        .get("jobs")
        .and_then(Value::as_array)
        .and_then(|jobs| jobs.first())
        .ok_or_else(|| ParseMiss("no jobs in fio output".into()))?;

    let read = parse_fio_side(job.get("read"));
    let write = parse_fio_side(job.get("write"));
    combine_sides(read, write)
}

fn parse_fio_side(side: Option<&Value>) -> SideMetrics {
    let Some(side) = side else {
        return SideMetrics::default();
    };
    let iops = side.get("iops").and_then(Value::as_f64).unwrap_or(0.0);
    // fio reports bw in KiB/s.
    let bw_mbps = side.get("bw").and_then(Value::as_f64).unwrap_or(0.0) / 1024.0;

    let mean_ns = side
        .get("lat_ns")
        .and_then(|l| l.get("mean"))
        .and_then(Value::as_f64)
        .or_else(|| {
            side.get("clat_ns")
                .and_then(|l| l.get("mean"))
                .and_then(Value::as_f64)
        });
    let p99_ns = side
        .get("clat_ns")
        .and_then(|l| l.get("percentile"))
        .and_then(|p| p.get("99.000000"))
        .and_then(Value::as_f64);

    SideMetrics {
        iops,
        bw_mbps,
        lat_mean_us: mean_ns.filter(|v| *v > 0.0).map(|ns| ns / 1000.0),
        lat_p99_us: p99_ns.filter(|v| *v > 0.0).map(|ns| ns / 1000.0),
    }
}

/// Fallback parser for fio's human-readable summary lines, e.g.
/// `  read: IOPS=88.2k, BW=345MiB/s (361MB/s)(...)`.
pub fn parse_fio_text(text: &str) -> Result<ParsedMetrics, ParseMiss> {
    let mut read = SideMetrics::default();
    let mut write = SideMetrics::default();

    for line in text.lines() {
        let line = line.trim();
        let side = if line.starts_with("read:") && line.contains("IOPS=") {
            &mut read
        } else if line.starts_with("write:") && line.contains("IOPS=") {
            &mut write
        } else {
            continue;
        };

        for part in line.split(',') {
            let part = part.trim();
            if let Some(v) = part.strip_prefix("read: IOPS=").or_else(|| {
                part.strip_prefix("write: IOPS=")
                    .or_else(|| part.strip_prefix("IOPS="))
            }) {
                if let Some(iops) = parse_si_number(v) {
                    side.iops = iops;
                }
            } else if let Some(v) = part.strip_prefix("BW=") {
                if let Some(mbps) = parse_bandwidth(v) {
                    side.bw_mbps = mbps;
                }
            }
        }
    }

    combine_sides(read, write)
}

/// "88.2k" -> 88200.0, "1234" -> 1234.0
fn parse_si_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Some(rest) = s.strip_suffix(['k', 'K']) {
        rest.parse::<f64>().ok().map(|v| v * 1000.0)
    } else if let Some(rest) = s.strip_suffix(['m', 'M']) {
        rest.parse::<f64>().ok().map(|v| v * 1_000_000.0)
    } else {
        s.parse::<f64>().ok()
    }
}

/// "345MiB/s (361MB/s)" -> MB/s as fio means it (binary units).
fn parse_bandwidth(s: &str) -> Option<f64> {
    let token = s.split_whitespace().next()?;
    if let Some(v) = token.strip_suffix("MiB/s") {
        v.parse::<f64>().ok()
    } else if let Some(v) = token.strip_suffix("KiB/s") {
        v.parse::<f64>().ok().map(|v| v / 1024.0)
    } else if let Some(v) = token.strip_suffix("GiB/s") {
        v.parse::<f64>().ok().map(|v| v * 1024.0)
    } else if let Some(v) = token.strip_suffix("MB/s") {
        v.parse::<f64>().ok()
    } else if let Some(v) = token.strip_suffix("kB/s") {
        v.parse::<f64>().ok().map(|v| v / 1024.0)
    } else {
        None
    }
}

/// Parse dd's stderr summary, e.g.
/// `1073741824 bytes (1.1 GB, 1.0 GiB) copied, 2.49861 s, 430 MB/s`.
/// `bs_bytes` turns the byte count into an operation count for IOPS.
pub fn parse_sequential(raw: &RawOutput, bs_bytes: u64) -> Result<ParsedMetrics, ParseMiss> {
    let re = Regex::new(
        r"(?m)^(\d+)\s+bytes.*copied,\s*([\d.]+)\s*s(?:ecs)?,\s*([\d.]+)\s*([kMG]B/s)",
    )
    .expect("dd summary regex");

    // dd prints the summary on stderr; some shells merge streams, so scan both.
    let caps = re
        .captures(&raw.stderr)
        .or_else(|| re.captures(&raw.stdout))
        .ok_or_else(|| ParseMiss("no dd copy summary found".into()))?;

    let bytes: f64 = caps[1].parse().map_err(|_| ParseMiss("bad byte count".into()))?;
    let secs: f64 = caps[2].parse().map_err(|_| ParseMiss("bad duration".into()))?;
    let rate: f64 = caps[3].parse().map_err(|_| ParseMiss("bad rate".into()))?;
    // dd reports decimal-SI rates; normalise to binary MB/s like fio.
    let throughput_mbps = match &caps[4] {
        u if u == "GB/s" => rate * 1e9,
        u if u == "kB/s" => rate * 1e3,
        _ => rate * 1e6,
    } / (1024.0 * 1024.0);

    if secs <= 0.0 || bs_bytes == 0 {
        return Err(ParseMiss("unusable dd summary".into()));
    }
    let iops = (bytes / bs_bytes as f64) / secs;

    Ok(ParsedMetrics {
        throughput_mbps,
        iops,
        lat_mean_us: None,
        lat_p99_us: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIO_JSON: &str = r#"{
        "jobs": [{
            "read": {
                "iops": 1000.0,
                "bw": 4096,
                "lat_ns": {"mean": 250000.0},
                "clat_ns": {"mean": 240000.0, "percentile": {"99.000000": 900000.0}}
            },
            "write": {
                "iops": 3000.0,
                "bw": 12288,
                "lat_ns": {"mean": 150000.0},
                "clat_ns": {"mean": 140000.0, "percentile": {"99.000000": 700000.0}}
            }
        }]
    }"#;

    #[test]
    fn fio_json_sums_sides_and_weights_latency() {
        let m = parse_fio_json(FIO_JSON).unwrap();
        assert_eq!(m.iops, 4000.0);
        assert!((m.throughput_mbps - 16.0).abs() < 1e-9);
        // (250us * 1000 + 150us * 3000) / 4000 = 175us
        assert!((m.lat_mean_us.unwrap() - 175.0).abs() < 1e-9);
        // worse of the two p99s
        assert!((m.lat_p99_us.unwrap() - 900.0).abs() < 1e-9);
    }

    #[test]
    fn fio_json_rejects_empty_job() {
        assert!(parse_fio_json(r#"{"jobs": []}"#).is_err());
        assert!(parse_fio_json("not json").is_err());
        assert!(parse_fio_json(r#"{"jobs": [{"read": {"iops": 0, "bw": 0}}]}"#).is_err());
    }

    #[test]
    fn fio_text_fallback_parses_summary_lines() {
        let out = "\
test: (groupid=0, jobs=4): err= 0\n\
  read: IOPS=88.2k, BW=345MiB/s (361MB/s)(10.1GiB/30001msec)\n\
  write: IOPS=29.4k, BW=115MiB/s (120MB/s)(3458MiB/30001msec)\n";
        let m = parse_fio_text(out).unwrap();
        assert!((m.iops - 117_600.0).abs() < 1.0);
        assert!((m.throughput_mbps - 460.0).abs() < 1e-9);
        assert!(m.lat_mean_us.is_none());
    }

    #[test]
    fn fio_text_handles_kib_bandwidth() {
        let out = "  write: IOPS=512, BW=2048KiB/s (2097kB/s)(61.4MiB/30001msec)\n";
        let m = parse_fio_text(out).unwrap();
        assert_eq!(m.iops, 512.0);
        assert!((m.throughput_mbps - 2.0).abs() < 1e-9);
    }

    #[test]
    fn strategy_order_prefers_json_then_falls_back() {
        let raw = RawOutput {
            json: Some("garbage".into()),
            stdout: "  read: IOPS=100, BW=400KiB/s (410kB/s)\n".into(),
            stderr: String::new(),
        };
        let m = parse_random(&raw).unwrap();
        assert_eq!(m.iops, 100.0);

        let raw = RawOutput {
            json: Some(FIO_JSON.into()),
            stdout: "  read: IOPS=1, BW=1KiB/s\n".into(),
            stderr: String::new(),
        };
        // JSON wins when it parses.
        assert_eq!(parse_random(&raw).unwrap().iops, 4000.0);
    }

    #[test]
    fn both_strategies_missing_reports_each_miss() {
        let raw = RawOutput::default();
        let err = parse_random(&raw).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("fio-json"), "{msg}");
        assert!(msg.contains("fio-text"), "{msg}");
    }

    #[test]
    fn dd_summary_parses_rate_and_iops() {
        let raw = RawOutput {
            stderr: "1024+0 records in\n1024+0 records out\n\
                     1073741824 bytes (1.1 GB, 1.0 GiB) copied, 2.5 s, 430 MB/s\n"
                .into(),
            ..Default::default()
        };
        let m = parse_sequential(&raw, 1024 * 1024).unwrap();
        // 1 GiB in 1 MiB blocks over 2.5s = 409.6 ops/s
        assert!((m.iops - 409.6).abs() < 1e-9);
        assert!((m.throughput_mbps - 430e6 / (1024.0 * 1024.0)).abs() < 1e-6);
        assert!(m.lat_mean_us.is_none());
    }

    #[test]
    fn dd_summary_missing_is_a_miss() {
        let raw = RawOutput {
            stderr: "dd: failed to open 'x': No such file or directory\n".into(),
            ..Default::default()
        };
        assert!(parse_sequential(&raw, 4096).is_err());
    }
}
