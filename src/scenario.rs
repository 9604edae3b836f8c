// src/scenario.rs
//! Benchmark scenario descriptors and the deterministic test-matrix generator.
//!
//! Full mode is the cartesian product 8 block sizes x 6 queue depths x
//! 2 numjobs options x 5 read ratios = 480 scenarios. Quick mode is a fixed
//! 10-point subset for validation runs. Sequential (dd) passes are expressed
//! through the same spec type so everything downstream is kind-agnostic.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::constants::{
    DEFAULT_FILE_SIZE, DEFAULT_RUNTIME_SECS, QUICK_RUNTIME_SECS, QUICK_SEQ_FILE_SIZE,
    SEQ_TIMEOUT_SECS, TIMEOUT_MARGIN_SECS,
};

/// Block sizes exercised by the full matrix.
pub const BLOCK_SIZES: [&str; 8] = ["4k", "8k", "16k", "32k", "64k", "128k", "1m", "4m"];

/// Queue depths exercised by the full matrix.
pub const QUEUE_DEPTHS: [u32; 6] = [1, 2, 4, 8, 16, 32];

/// Read percentages: 0 = pure write, 100 = pure read, otherwise mixed.
pub const READ_RATIOS: [u32; 5] = [0, 25, 50, 75, 100];

/// Block sizes exercised by the dd sequential passes.
pub const SEQ_BLOCK_SIZES: [&str; 3] = ["1m", "64k", "4k"];

/// Fixed iodepth -> numjobs lookup. Shallow depths pair with low concurrency,
/// deep queues with higher concurrency. Depth 32 maps to {4,8}.
pub fn numjobs_options(queue_depth: u32) -> [u32; 2] {
    if queue_depth <= 4 {
        [1, 4]
    } else {
        [4, 8]
    }
}

/// What one scenario asks the external tool to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    RandWrite,
    RandRead,
    RandRw,
    SeqWrite,
    SeqRead,
}

impl TestKind {
    pub fn is_sequential(self) -> bool {
        matches!(self, TestKind::SeqWrite | TestKind::SeqRead)
    }

    /// Read-only and mixed kinds. These are the ones that lose direct I/O
    /// under the 9p fallback.
    pub fn is_read_dominant(self) -> bool {
        matches!(self, TestKind::RandRead | TestKind::RandRw | TestKind::SeqRead)
    }

    /// fio --rw= value for random kinds.
    pub fn fio_rw(self) -> &'static str {
        match self {
            TestKind::RandWrite => "randwrite",
            TestKind::RandRead => "randread",
            TestKind::RandRw => "randrw",
            TestKind::SeqWrite => "write",
            TestKind::SeqRead => "read",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TestKind::RandWrite => "randwrite",
            TestKind::RandRead => "randread",
            TestKind::RandRw => "randrw",
            TestKind::SeqWrite => "seqwrite",
            TestKind::SeqRead => "seqread",
        }
    }

    fn from_ratio(rwmix_read: u32) -> TestKind {
        match rwmix_read {
            0 => TestKind::RandWrite,
            100 => TestKind::RandRead,
            _ => TestKind::RandRw,
        }
    }
}

/// I/O engine handed to fio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoEngine {
    Libaio,
    Psync,
}

impl IoEngine {
    pub fn as_str(self) -> &'static str {
        match self {
            IoEngine::Libaio => "libaio",
            IoEngine::Psync => "psync",
        }
    }
}

/// Target filesystem class, as far as the generator cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    Generic,
    /// 9p network filesystem: libaio and direct reads are unreliable there,
    /// so the generator rewrites affected scenarios transparently.
    NineP,
}

impl FromStr for FsKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "9p" | "9p2000" | "v9fs" => FsKind::NineP,
            _ => FsKind::Generic,
        })
    }
}

/// Matrix generation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Full,
    Quick,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Mode::Full),
            "quick" => Ok(Mode::Quick),
            other => Err(format!("unknown mode '{other}' (expected full or quick)")),
        }
    }
}

/// One fully-specified benchmark configuration. Immutable once generated;
/// identity is (block_size, queue_depth, numjobs, rwmix_read, kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub kind: TestKind,
    pub block_size: String,
    pub queue_depth: u32,
    pub numjobs: u32,
    pub rwmix_read: u32,
    pub engine: IoEngine,
    pub direct: bool,
    pub file_size: String,
    pub runtime_secs: u64,
    pub timeout_secs: u64,
}

impl ScenarioSpec {
    /// Stable scenario name, the aggregation key across hosts and runs.
    pub fn name(&self) -> String {
        if self.kind.is_sequential() {
            format!("{}_{}", self.kind.label(), self.block_size)
        } else {
            format!(
                "{}_{}_qd{}_j{}_r{}",
                self.kind.label(),
                self.block_size,
                self.queue_depth,
                self.numjobs,
                self.rwmix_read
            )
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    fn random(
        block_size: &str,
        queue_depth: u32,
        numjobs: u32,
        rwmix_read: u32,
        fs: FsKind,
        opts: &MatrixOptions,
    ) -> ScenarioSpec {
        let mut spec = ScenarioSpec {
            kind: TestKind::from_ratio(rwmix_read),
            block_size: block_size.to_string(),
            queue_depth,
            numjobs,
            rwmix_read,
            engine: IoEngine::Libaio,
            direct: true,
            file_size: opts.file_size.clone(),
            runtime_secs: opts.runtime_secs,
            timeout_secs: opts.runtime_secs + TIMEOUT_MARGIN_SECS,
        };
        spec.apply_fs_fallback(fs);
        spec
    }

    fn sequential(kind: TestKind, block_size: &str, file_size: &str, fs: FsKind) -> ScenarioSpec {
        let mut spec = ScenarioSpec {
            kind,
            block_size: block_size.to_string(),
            queue_depth: 1,
            numjobs: 1,
            rwmix_read: if kind == TestKind::SeqRead { 100 } else { 0 },
            engine: IoEngine::Libaio,
            direct: true,
            file_size: file_size.to_string(),
            runtime_secs: 0,
            timeout_secs: SEQ_TIMEOUT_SECS,
        };
        spec.apply_fs_fallback(fs);
        spec
    }

    /// On 9p, swap the async engine for psync everywhere and drop direct I/O
    /// for read-dominant kinds. Write-only kinds keep direct I/O.
    fn apply_fs_fallback(&mut self, fs: FsKind) {
        if fs == FsKind::NineP {
            self.engine = IoEngine::Psync;
            if self.kind.is_read_dominant() {
                self.direct = false;
            }
        }
    }
}

/// Shared knobs for matrix generation.
#[derive(Debug, Clone)]
pub struct MatrixOptions {
    pub runtime_secs: u64,
    pub file_size: String,
}

impl MatrixOptions {
    pub fn new(mode: Mode) -> Self {
        MatrixOptions {
            runtime_secs: match mode {
                Mode::Full => DEFAULT_RUNTIME_SECS,
                Mode::Quick => QUICK_RUNTIME_SECS,
            },
            file_size: DEFAULT_FILE_SIZE.to_string(),
        }
    }
}

/// Quick-mode subset: small-block latency points at the extremes of the
/// queue-depth range, a mid-size mid-depth band, and large-block throughput
/// points. All numjobs values respect the depth lookup.
const QUICK_POINTS: [(&str, u32, u32, u32); 10] = [
    ("4k", 1, 1, 0),
    ("4k", 1, 1, 100),
    ("4k", 1, 1, 50),
    ("4k", 32, 4, 0),
    ("4k", 32, 4, 100),
    ("64k", 8, 4, 0),
    ("64k", 8, 4, 100),
    ("64k", 8, 4, 50),
    ("1m", 4, 1, 0),
    ("1m", 4, 1, 100),
];

/// Generate the ordered random-I/O matrix for the given mode.
pub fn generate_matrix(mode: Mode, fs: FsKind, opts: &MatrixOptions) -> Vec<ScenarioSpec> {
    let mut specs = Vec::new();
    match mode {
        Mode::Full => {
            for block_size in BLOCK_SIZES {
                for queue_depth in QUEUE_DEPTHS {
                    for numjobs in numjobs_options(queue_depth) {
                        for rwmix_read in READ_RATIOS {
                            specs.push(ScenarioSpec::random(
                                block_size,
                                queue_depth,
                                numjobs,
                                rwmix_read,
                                fs,
                                opts,
                            ));
                        }
                    }
                }
            }
        }
        Mode::Quick => {
            for (block_size, queue_depth, numjobs, rwmix_read) in QUICK_POINTS {
                specs.push(ScenarioSpec::random(
                    block_size,
                    queue_depth,
                    numjobs,
                    rwmix_read,
                    fs,
                    opts,
                ));
            }
        }
    }
    specs
}

/// Generate the dd sequential passes: per block size, a write followed by a
/// read of the file the write produced.
pub fn sequential_specs(mode: Mode, fs: FsKind) -> Vec<ScenarioSpec> {
    let file_size = match mode {
        Mode::Full => DEFAULT_FILE_SIZE,
        Mode::Quick => QUICK_SEQ_FILE_SIZE,
    };
    let mut specs = Vec::new();
    for block_size in SEQ_BLOCK_SIZES {
        specs.push(ScenarioSpec::sequential(
            TestKind::SeqWrite,
            block_size,
            file_size,
            fs,
        ));
        specs.push(ScenarioSpec::sequential(
            TestKind::SeqRead,
            block_size,
            file_size,
            fs,
        ));
    }
    specs
}

/// Parse a size string like "4k", "128k", "1m", "1G" into bytes.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (digits, suffix) = s.split_at(s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len()));
    let value: u64 = digits.parse().ok()?;
    let mult = match suffix.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        _ => return None,
    };
    Some(value * mult)
}
