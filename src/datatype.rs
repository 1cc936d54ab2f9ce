//! Element types that may travel in a message.
//!
//! Payloads are plain native-endian element bytes; a [Datatype] knows how to
//! move itself in and out of such a byte stream.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatatypeKind {
    Int8,
    UInt8,
    Int16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Logical,
    ValueIndex,
}

impl DatatypeKind {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DatatypeKind::Int8
                | DatatypeKind::UInt8
                | DatatypeKind::Int16
                | DatatypeKind::Int32
                | DatatypeKind::UInt32
                | DatatypeKind::Int64
                | DatatypeKind::UInt64
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, DatatypeKind::Float | DatatypeKind::Double)
    }
}

/// Size in bytes of one element of `kind`.
pub fn type_size(kind: DatatypeKind) -> usize {
    match kind {
        DatatypeKind::Int8 | DatatypeKind::UInt8 => 1,
        DatatypeKind::Int16 => 2,
        DatatypeKind::Int32 | DatatypeKind::UInt32 | DatatypeKind::Float => 4,
        DatatypeKind::Logical => 4,
        DatatypeKind::Int64 | DatatypeKind::UInt64 | DatatypeKind::Double => 8,
        DatatypeKind::ValueIndex => 16,
    }
}

/// An element type with a fixed-size native-endian byte encoding.
pub trait Datatype: Copy + Send + Sync + 'static {
    const KIND: DatatypeKind;
    const SIZE: usize;

    /// Write this element into `out`, which is exactly `SIZE` bytes long.
    fn write_ne(&self, out: &mut [u8]);
    /// Read an element from `bytes`, which is exactly `SIZE` bytes long.
    fn read_ne(bytes: &[u8]) -> Self;

    fn slice_to_bytes(data: &[Self]) -> Vec<u8> {
        let mut bytes = vec![0u8; data.len() * Self::SIZE];
        for (elem, out) in data.iter().zip(bytes.chunks_exact_mut(Self::SIZE)) {
            elem.write_ne(out);
        }
        bytes
    }

    /// Decode as many whole elements as `bytes` holds into the front of `out`; returns the element count.
    fn copy_from_bytes(bytes: &[u8], out: &mut [Self]) -> usize {
        let mut n = 0;
        for (chunk, elem) in bytes.chunks_exact(Self::SIZE).zip(out.iter_mut()) {
            *elem = Self::read_ne(chunk);
            n += 1;
        }
        n
    }

    fn vec_from_bytes(bytes: &[u8]) -> Vec<Self> {
        bytes.chunks_exact(Self::SIZE).map(Self::read_ne).collect()
    }
}

macro_rules! impl_datatype {
    ($t:ty, $kind:ident) => {
        impl Datatype for $t {
            const KIND: DatatypeKind = DatatypeKind::$kind;
            const SIZE: usize = std::mem::size_of::<$t>();
            fn write_ne(&self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_ne_bytes());
            }
            fn read_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                <$t>::from_ne_bytes(raw)
            }
        }
    };
}

impl_datatype!(i8, Int8);
impl_datatype!(u8, UInt8);
impl_datatype!(i16, Int16);
impl_datatype!(i32, Int32);
impl_datatype!(u32, UInt32);
impl_datatype!(i64, Int64);
impl_datatype!(u64, UInt64);
impl_datatype!(f32, Float);
impl_datatype!(f64, Double);

/// A boolean carried on the wire as a 4 byte integer (non-zero is true).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Logical(pub bool);

impl From<bool> for Logical {
    fn from(b: bool) -> Self {
        Logical(b)
    }
}

impl Datatype for Logical {
    const KIND: DatatypeKind = DatatypeKind::Logical;
    const SIZE: usize = 4;
    fn write_ne(&self, out: &mut [u8]) {
        out.copy_from_slice(&(self.0 as i32).to_ne_bytes());
    }
    fn read_ne(bytes: &[u8]) -> Self {
        Logical(i32::read_ne(bytes) != 0)
    }
}

/// A (value, index) pair used by the location-aware reductions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueIndex {
    pub value: f64,
    pub index: f64,
}

impl ValueIndex {
    pub fn new(value: f64, index: f64) -> Self {
        ValueIndex { value, index }
    }
}

impl Datatype for ValueIndex {
    const KIND: DatatypeKind = DatatypeKind::ValueIndex;
    const SIZE: usize = 16;
    fn write_ne(&self, out: &mut [u8]) {
        self.value.write_ne(&mut out[..8]);
        self.index.write_ne(&mut out[8..16]);
    }
    fn read_ne(bytes: &[u8]) -> Self {
        ValueIndex {
            value: f64::read_ne(&bytes[..8]),
            index: f64::read_ne(&bytes[8..16]),
        }
    }
}
