//! Reader and writer for the NumPy `.npy` array container
//!
//! Arrays are written as format version 1.0 (2.0 when the header does not
//! fit in 64 KiB), little-endian, C order, with the header padded so the
//! data starts on a 64-byte boundary. Versions 1, 2 and 3, either byte
//! order and Fortran order are accepted on read.

use crate::errors::FileOpsError;
use ndarray::{ArrayBase, ArrayD, Data, Dimension, IxDyn, ShapeBuilder};

const MAGIC: &[u8] = b"\x93NUMPY";
const ALIGNMENT: usize = 64;

/// Element types that can be stored in an `.npy` file.
pub trait NpyElement: Copy + 'static {
    /// NumPy type kind: `f` float, `i` signed, `u` unsigned, `b` bool.
    const KIND: char;
    const SIZE: usize;

    fn write_le(self, out: &mut Vec<u8>);

    /// Decode exactly `Self::SIZE` bytes.
    fn read(bytes: &[u8], little_endian: bool) -> Self;

    /// Canonical little-endian descriptor, e.g. `<f8` or `|u1`.
    fn descr() -> String {
        let order = if Self::SIZE == 1 { '|' } else { '<' };
        format!("{order}{}{}", Self::KIND, Self::SIZE)
    }
}

macro_rules! impl_npy_element {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(
            impl NpyElement for $ty {
                const KIND: char = $kind;
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read(bytes: &[u8], little_endian: bool) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    if little_endian {
                        <$ty>::from_le_bytes(buf)
                    } else {
                        <$ty>::from_be_bytes(buf)
                    }
                }
            }
        )*
    };
}

impl_npy_element! {
    f32 => 'f',
    f64 => 'f',
    i8 => 'i',
    i16 => 'i',
    i32 => 'i',
    i64 => 'i',
    u8 => 'u',
    u16 => 'u',
    u32 => 'u',
    u64 => 'u',
}

impl NpyElement for bool {
    const KIND: char = 'b';
    const SIZE: usize = 1;

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(u8::from(self));
    }

    fn read(bytes: &[u8], _little_endian: bool) -> Self {
        bytes[0] != 0
    }
}

/// Parsed `.npy` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    pub descr: String,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
}

impl NpyHeader {
    /// `None` when the shape's product does not fit in `usize`.
    fn element_count(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    fn render(&self) -> String {
        let shape = match self.shape.as_slice() {
            [] => "()".to_string(),
            [n] => format!("({n},)"),
            dims => format!(
                "({})",
                dims.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
            ),
        };
        let order = if self.fortran_order { "True" } else { "False" };
        format!(
            "{{'descr': '{}', 'fortran_order': {order}, 'shape': {shape}, }}",
            self.descr
        )
    }

    fn parse(text: &str) -> Result<Self, FileOpsError> {
        let descr_raw = header_value(text, "descr")
            .ok_or_else(|| FileOpsError::invalid_array("header has no 'descr'"))?;
        let descr = quoted(descr_raw).ok_or_else(|| {
            FileOpsError::type_mismatch("simple numeric dtype", "structured dtype")
        })?;

        let order_raw = header_value(text, "fortran_order")
            .ok_or_else(|| FileOpsError::invalid_array("header has no 'fortran_order'"))?;
        let fortran_order = if order_raw.starts_with("True") {
            true
        } else if order_raw.starts_with("False") {
            false
        } else {
            return Err(FileOpsError::invalid_array("invalid 'fortran_order' value"));
        };

        let shape_raw = header_value(text, "shape")
            .ok_or_else(|| FileOpsError::invalid_array("header has no 'shape'"))?;
        let shape = parse_shape(shape_raw)?;

        Ok(NpyHeader {
            descr: descr.to_string(),
            fortran_order,
            shape,
        })
    }
}

/// Text following `'key':` in a header dict.
fn header_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let needle_single = format!("'{key}'");
    let needle_double = format!("\"{key}\"");
    let (start, len) = text
        .find(&needle_single)
        .map(|i| (i, needle_single.len()))
        .or_else(|| text.find(&needle_double).map(|i| (i, needle_double.len())))?;

    let rest = text[start + len..].trim_start();
    rest.strip_prefix(':').map(str::trim_start)
}

fn quoted(text: &str) -> Option<&str> {
    let quote = text.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let body = &text[1..];
    body.find(quote).map(|end| &body[..end])
}

fn parse_shape(text: &str) -> Result<Vec<usize>, FileOpsError> {
    let body = text
        .strip_prefix('(')
        .and_then(|rest| rest.find(')').map(|end| &rest[..end]))
        .ok_or_else(|| FileOpsError::invalid_array("invalid 'shape' value"))?;

    body.split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| {
            // Python 2 era files may write long literals such as `3L`.
            dim.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| FileOpsError::invalid_array(format!("invalid dimension '{dim}'")))
        })
        .collect()
}

/// Split a descriptor into (little_endian, kind, size).
fn parse_descr(descr: &str) -> Option<(bool, char, usize)> {
    let mut chars = descr.chars();
    let first = chars.next()?;
    let (little_endian, kind) = match first {
        '<' | '|' => (true, chars.next()?),
        '>' => (false, chars.next()?),
        '=' => (cfg!(target_endian = "little"), chars.next()?),
        other => (cfg!(target_endian = "little"), other),
    };
    let size = chars.as_str().parse().ok()?;
    Some((little_endian, kind, size))
}

/// Encode `array` as a complete `.npy` file.
pub fn encode<T, S, D>(array: &ArrayBase<S, D>) -> Vec<u8>
where
    T: NpyElement,
    S: Data<Elem = T>,
    D: Dimension,
{
    let header = NpyHeader {
        descr: T::descr(),
        fortran_order: false,
        shape: array.shape().to_vec(),
    };
    let dict = header.render();

    // magic + version + length field is 10 bytes in v1, 12 in v2
    let (version, prefix_len) = if dict.len() + 1 + ALIGNMENT <= u16::MAX as usize {
        (1u8, 10)
    } else {
        (2u8, 12)
    };
    let unpadded = prefix_len + dict.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    let header_len = dict.len() + padding + 1;

    let mut out = Vec::with_capacity(prefix_len + header_len + array.len() * T::SIZE);
    out.extend_from_slice(MAGIC);
    out.push(version);
    out.push(0);
    if version == 1 {
        out.extend_from_slice(&(header_len as u16).to_le_bytes());
    } else {
        out.extend_from_slice(&(header_len as u32).to_le_bytes());
    }
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(b' ').take(padding));
    out.push(b'\n');

    // Logical (row-major) order regardless of memory layout.
    for &value in array.iter() {
        value.write_le(&mut out);
    }
    out
}

/// Read the header, returning it with the offset where data begins.
pub fn read_header(bytes: &[u8]) -> Result<(NpyHeader, usize), FileOpsError> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(FileOpsError::invalid_array("missing NUMPY magic string"));
    }

    let major = bytes[6];
    let (header_len, start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(FileOpsError::invalid_array("truncated header"));
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        other => {
            return Err(FileOpsError::invalid_array(format!(
                "unsupported format version {other}"
            )))
        }
    };

    let end = start + header_len;
    let raw = bytes
        .get(start..end)
        .ok_or_else(|| FileOpsError::invalid_array("truncated header"))?;
    let text = std::str::from_utf8(raw)
        .map_err(|_| FileOpsError::invalid_array("header is not valid text"))?;

    Ok((NpyHeader::parse(text)?, end))
}

/// Decode a complete `.npy` file into an array of `T`.
pub fn decode<T: NpyElement>(bytes: &[u8]) -> Result<ArrayD<T>, FileOpsError> {
    let (header, offset) = read_header(bytes)?;

    let (little_endian, kind, size) = parse_descr(&header.descr)
        .ok_or_else(|| FileOpsError::invalid_array(format!("invalid descr '{}'", header.descr)))?;
    if kind != T::KIND || size != T::SIZE {
        return Err(FileOpsError::type_mismatch(T::descr(), header.descr.clone()));
    }

    let needed = header
        .element_count()
        .and_then(|count| count.checked_mul(T::SIZE))
        .ok_or_else(|| {
            FileOpsError::invalid_array(format!("shape {:?} is too large", header.shape))
        })?;
    let data = &bytes[offset..];
    if data.len() < needed {
        return Err(FileOpsError::invalid_array(format!(
            "expected {needed} data bytes, found {}",
            data.len()
        )));
    }

    let values: Vec<T> = data[..needed]
        .chunks_exact(T::SIZE)
        .map(|chunk| T::read(chunk, little_endian))
        .collect();

    let shape = IxDyn(&header.shape);
    let array = if header.fortran_order {
        ArrayD::from_shape_vec(shape.f(), values)
    } else {
        ArrayD::from_shape_vec(shape, values)
    };
    array.map_err(|e| FileOpsError::invalid_array(e.to_string()))
}
