//! Reduction operators and the element-wise folds that apply them to payload bytes.

use crate::datatype::{Datatype, DatatypeKind, Logical, ValueIndex};
use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitOr, BitXor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Max,
    Min,
    Sum,
    Prod,
    Land,
    Lor,
    Lxor,
    Band,
    Bor,
    Bxor,
    MinLoc,
    MaxLoc,
}

impl ReduceOp {
    /// Whether this operator is defined for elements of `kind`.
    pub fn supports(&self, kind: DatatypeKind) -> bool {
        match self {
            ReduceOp::Max | ReduceOp::Min | ReduceOp::Sum | ReduceOp::Prod => kind.is_numeric(),
            ReduceOp::Land | ReduceOp::Lor | ReduceOp::Lxor => kind == DatatypeKind::Logical,
            ReduceOp::Band | ReduceOp::Bor | ReduceOp::Bxor => kind.is_integer(),
            ReduceOp::MinLoc | ReduceOp::MaxLoc => kind == DatatypeKind::ValueIndex,
        }
    }

    pub(crate) fn check(&self, kind: DatatypeKind) -> Result<()> {
        if self.supports(kind) {
            Ok(())
        } else {
            Err(Error::UnsupportedReduction { op: *self, kind })
        }
    }
}

trait Arith: Datatype + PartialOrd {
    fn add(self, other: Self) -> Self;
    fn mul(self, other: Self) -> Self;
}

macro_rules! impl_int_arith {
    ($($t:ty),*) => {
        $(impl Arith for $t {
            fn add(self, other: Self) -> Self {
                self.wrapping_add(other)
            }
            fn mul(self, other: Self) -> Self {
                self.wrapping_mul(other)
            }
        })*
    };
}

macro_rules! impl_float_arith {
    ($($t:ty),*) => {
        $(impl Arith for $t {
            fn add(self, other: Self) -> Self {
                self + other
            }
            fn mul(self, other: Self) -> Self {
                self * other
            }
        })*
    };
}

impl_int_arith!(i8, u8, i16, i32, u32, i64, u64);
impl_float_arith!(f32, f64);

fn fold_with<T: Datatype>(acc: &mut [u8], incoming: &[u8], f: impl Fn(T, T) -> T) {
    for (a, b) in acc
        .chunks_exact_mut(T::SIZE)
        .zip(incoming.chunks_exact(T::SIZE))
    {
        let folded = f(T::read_ne(a), T::read_ne(b));
        folded.write_ne(a);
    }
}

fn fold_arith<T: Arith>(op: ReduceOp, acc: &mut [u8], incoming: &[u8]) {
    match op {
        ReduceOp::Max => fold_with::<T>(acc, incoming, |a, b| if b > a { b } else { a }),
        ReduceOp::Min => fold_with::<T>(acc, incoming, |a, b| if b < a { b } else { a }),
        ReduceOp::Sum => fold_with::<T>(acc, incoming, T::add),
        ReduceOp::Prod => fold_with::<T>(acc, incoming, T::mul),
        _ => {}
    }
}

fn fold_bits<T>(op: ReduceOp, acc: &mut [u8], incoming: &[u8])
where
    T: Datatype + BitAnd<Output = T> + BitOr<Output = T> + BitXor<Output = T>,
{
    match op {
        ReduceOp::Band => fold_with::<T>(acc, incoming, |a, b| a & b),
        ReduceOp::Bor => fold_with::<T>(acc, incoming, |a, b| a | b),
        ReduceOp::Bxor => fold_with::<T>(acc, incoming, |a, b| a ^ b),
        _ => {}
    }
}

fn fold_int<T>(op: ReduceOp, acc: &mut [u8], incoming: &[u8])
where
    T: Arith + BitAnd<Output = T> + BitOr<Output = T> + BitXor<Output = T>,
{
    match op {
        ReduceOp::Band | ReduceOp::Bor | ReduceOp::Bxor => fold_bits::<T>(op, acc, incoming),
        _ => fold_arith::<T>(op, acc, incoming),
    }
}

fn fold_logical(op: ReduceOp, acc: &mut [u8], incoming: &[u8]) {
    match op {
        ReduceOp::Land => fold_with::<Logical>(acc, incoming, |a, b| Logical(a.0 && b.0)),
        ReduceOp::Lor => fold_with::<Logical>(acc, incoming, |a, b| Logical(a.0 || b.0)),
        ReduceOp::Lxor => fold_with::<Logical>(acc, incoming, |a, b| Logical(a.0 ^ b.0)),
        _ => {}
    }
}

// ties keep the lower index
fn fold_loc(op: ReduceOp, acc: &mut [u8], incoming: &[u8]) {
    let pick = move |a: ValueIndex, b: ValueIndex| {
        let better = match op {
            ReduceOp::MinLoc => b.value < a.value,
            _ => b.value > a.value,
        };
        if better || (b.value == a.value && b.index < a.index) {
            b
        } else {
            a
        }
    };
    fold_with::<ValueIndex>(acc, incoming, pick);
}

/// Fold `incoming` element-wise into `acc`, both holding elements of `kind`.
pub fn fold(op: ReduceOp, kind: DatatypeKind, acc: &mut [u8], incoming: &[u8]) -> Result<()> {
    op.check(kind)?;
    if acc.len() != incoming.len() {
        return Err(Error::InvalidArgument(format!(
            "reduction of {} bytes into a {} byte accumulator",
            incoming.len(),
            acc.len()
        )));
    }
    match kind {
        DatatypeKind::Int8 => fold_int::<i8>(op, acc, incoming),
        DatatypeKind::UInt8 => fold_int::<u8>(op, acc, incoming),
        DatatypeKind::Int16 => fold_int::<i16>(op, acc, incoming),
        DatatypeKind::Int32 => fold_int::<i32>(op, acc, incoming),
        DatatypeKind::UInt32 => fold_int::<u32>(op, acc, incoming),
        DatatypeKind::Int64 => fold_int::<i64>(op, acc, incoming),
        DatatypeKind::UInt64 => fold_int::<u64>(op, acc, incoming),
        DatatypeKind::Float => fold_arith::<f32>(op, acc, incoming),
        DatatypeKind::Double => fold_arith::<f64>(op, acc, incoming),
        DatatypeKind::Logical => fold_logical(op, acc, incoming),
        DatatypeKind::ValueIndex => fold_loc(op, acc, incoming),
    }
    Ok(())
}
