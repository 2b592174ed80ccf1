use bytes::{Buf, BufMut, Bytes, BytesMut};
use skizze_utils::hash::hash_key;
use std::mem;

use crate::{dedup, DomainInfo, QueryResult, Sketch, SketchError, SketchResult};

pub const TYPE_NAME: &str = "hllpp";

/// Current version of the encoded HLL state.
const VERSION: u8 = 1;
const MAGIC: &[u8; 4] = b"HLPP";
/// magic + version + precision
const HEADER_SIZE: usize = 4 + 1 + 1;

/// DEFAULT_PRECISION is the precision used when no capacity is declared.
pub const DEFAULT_PRECISION: u8 = 14;
pub const MIN_PRECISION: u8 = 4;
pub const MAX_PRECISION: u8 = 16;

/// precision_for returns the precision whose register count covers capacity.
pub fn precision_for(capacity: u64) -> u8 {
    if capacity == 0 {
        return DEFAULT_PRECISION;
    }
    let bits = (64 - (capacity - 1).leading_zeros()) as u8;
    bits.clamp(MIN_PRECISION, MAX_PRECISION)
}

/// Plus is a dense HyperLogLog cardinality estimator.
///
/// Values are hashed with a fixed-seed xxHash64, the top `p` bits select a
/// register and the register keeps the longest run of leading zeros seen in
/// the remaining bits.
///
/// The estimate comes from the register histogram (Ertl, "New cardinality
/// estimation algorithms for HyperLogLog sketches", 2017). It needs neither
/// the empirical bias tables of HLL++ nor a switch to linear counting, and
/// stays unbiased from the empty sketch up to the large range.
pub struct Plus {
    /// precision.
    p: u8,
    /// Number of registers used for stochastic averaging of the stream.
    m: u32,
    registers: Vec<u8>,
}

impl Plus {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: u64) -> Self {
        // precision_for never leaves the valid range
        Self::build(precision_for(capacity))
    }

    pub fn with_p(p: u8) -> SketchResult<Self> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&p) {
            return Err(SketchError::InvalidPrecision(p));
        }
        Ok(Self::build(p))
    }

    fn build(p: u8) -> Self {
        let m = 1_u32 << p;
        Self {
            p,
            m,
            registers: vec![0; m as usize],
        }
    }

    pub fn precision(&self) -> u8 {
        self.p
    }

    /// max_rank is the largest value a register can hold.
    fn max_rank(&self) -> u8 {
        64 - self.p + 1
    }

    fn insert(&mut self, v: &[u8]) {
        let x = hash_key(v);
        let idx = (x >> (64 - self.p)) as usize;
        // the guard bit bounds the rank when the remaining bits are all zero
        let w = (x << self.p) | (1 << (self.p - 1));
        let rank = w.leading_zeros() as u8 + 1;
        if rank > self.registers[idx] {
            self.registers[idx] = rank;
        }
    }

    /// count returns the cardinality estimate.
    pub fn count(&self) -> u64 {
        let m = self.m as f64;
        let q = (64 - self.p) as usize;

        // histogram[k] is the number of registers holding k
        let mut histogram = vec![0_u32; q + 2];
        for &r in &self.registers {
            histogram[r as usize] += 1;
        }
        if histogram[0] == self.m {
            return 0;
        }

        let mut z = m * tau(1_f64 - histogram[q + 1] as f64 / m);
        for k in (1..=q).rev() {
            z = 0.5 * (z + histogram[k] as f64);
        }
        z += m * sigma(histogram[0] as f64 / m);

        (ALPHA_INF * m * m / z).round() as u64
    }
}

/// 1 / (2 ln 2), the limit of the HLL bias correction constant.
const ALPHA_INF: f64 = 0.721_347_520_444_481_7;

/// sigma(x) = x + sum(x^(2^k) * 2^(k-1)), k >= 1, for 0 <= x < 1.
fn sigma(mut x: f64) -> f64 {
    if x >= 1_f64 {
        return f64::INFINITY;
    }
    let mut y = 1_f64;
    let mut z = x;
    loop {
        x *= x;
        let prev = z;
        z += x * y;
        y += y;
        if prev == z {
            return z;
        }
    }
}

/// tau(x) = (1 - x - sum((1 - x^(2^-k))^2 * 2^-k)) / 3, k >= 1, for 0 <= x <= 1.
fn tau(mut x: f64) -> f64 {
    if x <= 0_f64 || x >= 1_f64 {
        return 0_f64;
    }
    let mut y = 1_f64;
    let mut z = 1_f64 - x;
    loop {
        x = x.sqrt();
        let prev = z;
        y *= 0.5;
        z -= (1_f64 - x).powi(2) * y;
        if prev == z {
            return z / 3_f64;
        }
    }
}

impl Default for Plus {
    fn default() -> Self {
        Self::new()
    }
}

impl Sketch for Plus {
    fn sketch_type(&self) -> &str {
        TYPE_NAME
    }

    fn add(&mut self, values: &[Bytes]) -> SketchResult<bool> {
        for v in dedup(values) {
            self.insert(v);
        }
        Ok(true)
    }

    fn query(&self) -> SketchResult<QueryResult> {
        Ok(QueryResult::Cardinality(self.count()))
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.registers.len());
        buf.put_slice(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(self.p);
        buf.put_slice(&self.registers);
        buf.to_vec()
    }

    fn decode(&mut self, data: &[u8]) -> SketchResult<()> {
        if data.len() < HEADER_SIZE {
            return Err(SketchError::Corrupt("not enough data for hll header".into()));
        }

        let mut buf = data;
        if &buf[..MAGIC.len()] != MAGIC {
            return Err(SketchError::Corrupt("invalid hll magic".into()));
        }
        buf.advance(MAGIC.len());

        let version = buf.get_u8();
        if version != VERSION {
            return Err(SketchError::Corrupt(format!(
                "unsupported hll version {}",
                version
            )));
        }

        let p = buf.get_u8();
        if p != self.p {
            return Err(SketchError::Corrupt(format!(
                "hll precision mismatch: expected {}, got {}",
                self.p, p
            )));
        }

        if buf.len() != self.m as usize {
            return Err(SketchError::Corrupt(format!(
                "expected {} hll registers, got {}",
                self.m,
                buf.len()
            )));
        }

        let max_rank = self.max_rank();
        if let Some(r) = buf.iter().find(|r| **r > max_rank) {
            return Err(SketchError::Corrupt(format!("hll register out of range: {}", r)));
        }

        self.registers.clear();
        self.registers.extend_from_slice(buf);
        Ok(())
    }

    fn bytes(&self) -> usize {
        self.registers.capacity() + mem::size_of::<Self>()
    }
}

pub(crate) fn construct(info: &DomainInfo) -> SketchResult<Box<dyn Sketch>> {
    Ok(Box::new(Plus::with_capacity(info.capacity)))
}
