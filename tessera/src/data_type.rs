use bytemuck::{Pod, Zeroable};
use half::{bf16, f16};
use num_traits::NumCast;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
pub enum DataType {
    BF16,
    F16,
    F32,
    I8,
    I32,
}

impl DataType {
    pub const fn size_in_bits(&self) -> usize {
        match self {
            DataType::I8 => 8,
            DataType::BF16 | DataType::F16 => 16,
            DataType::F32 | DataType::I32 => 32,
        }
    }

    pub const fn size_in_bytes(&self) -> usize {
        self.size_in_bits().div_ceil(8)
    }

    /// Widened type every matrix-unit accumulation is carried out in.
    pub const fn accumulator(&self) -> DataType {
        match self {
            DataType::BF16 | DataType::F16 | DataType::F32 => DataType::F32,
            DataType::I8 | DataType::I32 => DataType::I32,
        }
    }
}

/// Accumulator-side arithmetic used by the matrix unit and the epilogues.
pub trait Accumulator: Pod + Zeroable + PartialEq + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    fn zero() -> Self;
    fn mul_add(self, lhs: Self, rhs: Self) -> Self;
    fn add(self, rhs: Self) -> Self;
    fn to_f32(self) -> f32;
}

impl Accumulator for f32 {
    const DATA_TYPE: DataType = DataType::F32;

    fn zero() -> Self {
        0.0
    }

    fn mul_add(self, lhs: Self, rhs: Self) -> Self {
        self + lhs * rhs
    }

    fn add(self, rhs: Self) -> Self {
        self + rhs
    }

    fn to_f32(self) -> f32 {
        self
    }
}

impl Accumulator for i32 {
    const DATA_TYPE: DataType = DataType::I32;

    fn zero() -> Self {
        0
    }

    fn mul_add(self, lhs: Self, rhs: Self) -> Self {
        self + lhs * rhs
    }

    fn add(self, rhs: Self) -> Self {
        self + rhs
    }

    fn to_f32(self) -> f32 {
        self as f32
    }
}

/// An element type a kernel specialization can stage through the memory
/// hierarchy and feed to the matrix unit. The accumulator type is itself an
/// `Element`: L0C buffers are allocated from the same tier arenas as the
/// operand stages.
pub trait Element: Pod + Zeroable + NumCast + PartialEq + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    type Accumulator: Accumulator + Element;

    fn to_accumulator(self) -> Self::Accumulator;
    fn from_accumulator(value: Self::Accumulator) -> Self;
}

macro_rules! impl_element {
    ($($type:ty => ($variant:ident, $acc:ty, $widen:expr, $narrow:expr)),+ $(,)?) => {
        $(
            impl Element for $type {
                const DATA_TYPE: DataType = DataType::$variant;

                type Accumulator = $acc;

                fn to_accumulator(self) -> $acc {
                    $widen(self)
                }

                fn from_accumulator(value: $acc) -> Self {
                    $narrow(value)
                }
            }
        )+
    };
}

impl_element! {
    f16 => (F16, f32, f16::to_f32, f16::from_f32),
    bf16 => (BF16, f32, bf16::to_f32, bf16::from_f32),
    f32 => (F32, f32, std::convert::identity, std::convert::identity),
    i8 => (I8, i32, |value| value as i32, |value: i32| value as i8),
    i32 => (I32, i32, std::convert::identity, std::convert::identity),
}
