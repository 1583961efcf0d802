use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// Element type of every feature in a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    F32,
    I32,
    /// Bit-packed 64-bit words.
    Bits,
}

impl ElementType {
    /// Bytes per element on disk.
    pub fn width(&self) -> usize {
        match self {
            ElementType::F32 | ElementType::I32 => 4,
            ElementType::Bits => 8,
        }
    }
}

/// Fixed-length feature vector. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub enum Feature {
    Dense(Box<[f32]>),
    Discrete(Box<[i32]>),
    Bits(Box<[u64]>),
}

impl Feature {
    pub fn dense(values: Vec<f32>) -> Self {
        Feature::Dense(values.into_boxed_slice())
    }

    pub fn discrete(values: Vec<i32>) -> Self {
        Feature::Discrete(values.into_boxed_slice())
    }

    pub fn bits(words: Vec<u64>) -> Self {
        Feature::Bits(words.into_boxed_slice())
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Feature::Dense(_) => ElementType::F32,
            Feature::Discrete(_) => ElementType::I32,
            Feature::Bits(_) => ElementType::Bits,
        }
    }

    /// Number of elements (words for bit features).
    pub fn dim(&self) -> usize {
        match self {
            Feature::Dense(v) => v.len(),
            Feature::Discrete(v) => v.len(),
            Feature::Bits(v) => v.len(),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.dim() * self.element_type().width()
    }

    pub fn write<B: BufMut>(&self, buf: &mut B) {
        match self {
            Feature::Dense(v) => v.iter().for_each(|x| buf.put_f32_le(*x)),
            Feature::Discrete(v) => v.iter().for_each(|x| buf.put_i32_le(*x)),
            Feature::Bits(v) => v.iter().for_each(|x| buf.put_u64_le(*x)),
        }
    }

    /// Caller guarantees `buf` holds at least `dim * element.width()` bytes.
    pub fn read<B: Buf>(element: ElementType, dim: usize, buf: &mut B) -> Self {
        match element {
            ElementType::F32 => Feature::dense((0..dim).map(|_| buf.get_f32_le()).collect()),
            ElementType::I32 => Feature::discrete((0..dim).map(|_| buf.get_i32_le()).collect()),
            ElementType::Bits => Feature::bits((0..dim).map(|_| buf.get_u64_le()).collect()),
        }
    }

    /// Raw bit pattern of element `i`.
    pub fn element_bits(&self, i: usize) -> u64 {
        match self {
            Feature::Dense(v) => v[i].to_bits() as u64,
            Feature::Discrete(v) => v[i] as u32 as u64,
            Feature::Bits(v) => v[i],
        }
    }

    /// Dot product with a projection; zero for bit features.
    pub fn project(&self, plane: &[f32]) -> f32 {
        match self {
            Feature::Dense(v) => v.iter().zip(plane).map(|(x, p)| x * p).sum(),
            Feature::Discrete(v) => v.iter().zip(plane).map(|(x, p)| *x as f32 * p).sum(),
            Feature::Bits(_) => 0.0,
        }
    }

    /// Bit `i` of a bit-packed feature, `false` for other kinds.
    pub fn bit(&self, i: usize) -> bool {
        match self {
            Feature::Bits(v) => v.get(i / 64).is_some_and(|w| (w >> (i % 64)) & 1 == 1),
            _ => false,
        }
    }

    /// Exact byte image, used as a hash key by the inverted index.
    pub fn key_bytes(&self) -> Box<[u8]> {
        let mut out = Vec::with_capacity(self.byte_len());
        self.write(&mut out);
        out.into_boxed_slice()
    }
}
