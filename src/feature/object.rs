use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, Result};
use crate::feature::vector::{ElementType, Feature};

/// One feature of a possibly multi-feature object.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub feature: Feature,
    pub weight: Option<f32>,
    /// Fixed-width side data, `ObjectLayout::part_data_bytes` long.
    pub data: Vec<u8>,
}

impl Part {
    pub fn new(feature: Feature) -> Self {
        Part { feature, weight: None, data: Vec::new() }
    }

    pub fn weighted(feature: Feature, weight: f32) -> Self {
        Part { feature, weight: Some(weight), data: Vec::new() }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Object {
    pub parts: Vec<Part>,
    pub meta: String,
    /// Fixed-width object-level side data.
    pub data: Vec<u8>,
}

impl Object {
    pub fn new(parts: Vec<Part>) -> Self {
        Object { parts, meta: String::new(), data: Vec::new() }
    }

    pub fn single(feature: Feature) -> Self {
        Object::new(vec![Part::new(feature)])
    }

    /// `(part_tag, feature)` for every part.
    pub fn features(&self) -> impl Iterator<Item = (u32, &Feature)> {
        self.parts.iter().enumerate().map(|(i, p)| (i as u32, &p.feature))
    }
}

/// Deployment-wide shape of objects, and their binary codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectLayout {
    pub element: ElementType,
    pub dim: usize,
    pub weighted: bool,
    pub part_data_bytes: usize,
    pub object_data_bytes: usize,
    pub max_parts: usize,
}

impl Default for ObjectLayout {
    fn default() -> Self {
        ObjectLayout {
            element: ElementType::F32,
            dim: 128,
            weighted: false,
            part_data_bytes: 0,
            object_data_bytes: 0,
            max_parts: 2000,
        }
    }
}

impl ObjectLayout {
    pub fn validate_config(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(Error::config("object.dim must be positive"));
        }
        if self.max_parts == 0 || self.max_parts > u16::MAX as usize {
            return Err(Error::config("object.max_parts must be in 1..=65535"));
        }
        Ok(())
    }

    fn part_bytes(&self) -> usize {
        let weight = if self.weighted { 4 } else { 0 };
        weight + self.part_data_bytes + self.dim * self.element.width()
    }

    /// Check an object built outside the codec (e.g. by an extractor).
    pub fn check(&self, object: &Object) -> Result<()> {
        if object.parts.is_empty() {
            return Err(Error::request("object has no parts"));
        }
        if object.parts.len() > self.max_parts {
            return Err(Error::request(format!(
                "object has {} parts, limit is {}", object.parts.len(), self.max_parts
            )));
        }
        for (tag, part) in object.parts.iter().enumerate() {
            if part.feature.element_type() != self.element || part.feature.dim() != self.dim {
                return Err(Error::request(format!(
                    "part {} has shape {:?}x{}, expected {:?}x{}",
                    tag, part.feature.element_type(), part.feature.dim(), self.element, self.dim
                )));
            }
            if self.weighted && part.weight.is_none() {
                return Err(Error::request(format!("part {} is missing its weight", tag)));
            }
            if part.data.len() != self.part_data_bytes {
                return Err(Error::request(format!("part {} side data has wrong width", tag)));
            }
        }
        if object.data.len() != self.object_data_bytes {
            return Err(Error::request("object side data has wrong width"));
        }
        Ok(())
    }

    pub fn encoded_len(&self, object: &Object) -> usize {
        2 + object.parts.len() * self.part_bytes() + self.object_data_bytes
    }

    /// `[u16 count] { [f32 weight] [side data] [feature] }* [object data]`
    pub fn encode<B: BufMut>(&self, object: &Object, buf: &mut B) {
        buf.put_u16_le(object.parts.len() as u16);
        for part in &object.parts {
            if self.weighted {
                buf.put_f32_le(part.weight.unwrap_or(0.0));
            }
            if self.part_data_bytes > 0 {
                buf.put_slice(&part.data);
            }
            part.feature.write(buf);
        }
        if self.object_data_bytes > 0 {
            buf.put_slice(&object.data);
        }
    }

    pub fn encode_to_vec(&self, object: &Object) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len(object));
        self.encode(object, &mut out);
        out
    }

    pub fn decode<B: Buf>(&self, buf: &mut B) -> Result<Object> {
        need(buf, 2)?;
        let count = buf.get_u16_le() as usize;
        if count > self.max_parts {
            return Err(Error::request(format!("object has {} parts, limit is {}", count, self.max_parts)));
        }
        need(buf, count * self.part_bytes() + self.object_data_bytes)?;
        let mut parts = Vec::with_capacity(count);
        for _ in 0..count {
            let weight = if self.weighted { Some(buf.get_f32_le()) } else { None };
            let mut data = vec![0u8; self.part_data_bytes];
            buf.copy_to_slice(&mut data);
            let feature = Feature::read(self.element, self.dim, buf);
            parts.push(Part { feature, weight, data });
        }
        let mut data = vec![0u8; self.object_data_bytes];
        buf.copy_to_slice(&mut data);
        Ok(Object { parts, meta: String::new(), data })
    }

    pub fn decode_slice(&self, mut bytes: &[u8]) -> Result<Object> {
        self.decode(&mut bytes)
    }
}

fn need<B: Buf>(buf: &B, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::request(format!("truncated object: need {} bytes, have {}", n, buf.remaining())));
    }
    Ok(())
}
