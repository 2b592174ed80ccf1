use std::collections::BTreeSet;
use std::mem;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{DomainInfo, QueryResult, Sketch, SketchError, SketchResult};

pub const TYPE_NAME: &str = "dict";

const VERSION: u8 = 1;
const MAGIC: &[u8; 4] = b"DICT";
/// magic + version + value count
const HEADER_SIZE: usize = 4 + 1 + 4;

/// Dict counts distinct values exactly by keeping all of them.
///
/// Unlike the estimators it can forget a value again, so it backs domains
/// that need value deletion.
#[derive(Default)]
pub struct Dict {
    values: BTreeSet<Bytes>,
    /// sum of the value lengths
    size: usize,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, v: &[u8]) -> bool {
        self.values.contains(v)
    }
}

impl Sketch for Dict {
    fn sketch_type(&self) -> &str {
        TYPE_NAME
    }

    fn add(&mut self, values: &[Bytes]) -> SketchResult<bool> {
        for v in values {
            if self.values.insert(v.clone()) {
                self.size += v.len();
            }
        }
        Ok(true)
    }

    fn remove(&mut self, values: &[Bytes]) -> SketchResult<bool> {
        for v in values {
            if self.values.remove(&v[..]) {
                self.size -= v.len();
            }
        }
        Ok(true)
    }

    fn query(&self) -> SketchResult<QueryResult> {
        Ok(QueryResult::Cardinality(self.values.len() as u64))
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.size + 4 * self.values.len());
        buf.put_slice(MAGIC);
        buf.put_u8(VERSION);
        buf.put_u32(self.values.len() as u32);
        for v in &self.values {
            buf.put_u32(v.len() as u32);
            buf.put_slice(v);
        }
        buf.to_vec()
    }

    fn decode(&mut self, data: &[u8]) -> SketchResult<()> {
        if data.len() < HEADER_SIZE {
            return Err(SketchError::Corrupt("not enough data for dict header".into()));
        }

        let mut buf = data;
        if &buf[..MAGIC.len()] != MAGIC {
            return Err(SketchError::Corrupt("invalid dict magic".into()));
        }
        buf.advance(MAGIC.len());

        let version = buf.get_u8();
        if version != VERSION {
            return Err(SketchError::Corrupt(format!(
                "unsupported dict version {}",
                version
            )));
        }

        let n = buf.get_u32();
        let mut values = BTreeSet::new();
        let mut size = 0;
        for _ in 0..n {
            if buf.remaining() < 4 {
                return Err(SketchError::Corrupt("not enough data for dict value".into()));
            }
            let len = buf.get_u32() as usize;
            if buf.remaining() < len {
                return Err(SketchError::Corrupt("not enough data for dict value".into()));
            }
            values.insert(Bytes::copy_from_slice(&buf[..len]));
            buf.advance(len);
            size += len;
        }

        if buf.has_remaining() {
            return Err(SketchError::Corrupt(format!(
                "{} trailing bytes after dict values",
                buf.remaining()
            )));
        }

        self.values = values;
        self.size = size;
        Ok(())
    }

    fn bytes(&self) -> usize {
        self.size + self.values.len() * mem::size_of::<Bytes>() + mem::size_of::<Self>()
    }
}

pub(crate) fn construct(_info: &DomainInfo) -> SketchResult<Box<dyn Sketch>> {
    Ok(Box::new(Dict::new()))
}
