//! Fixed-width scalars stored little-endian in a node payload.

/// A primitive that can be stored as a node payload.
pub trait Scalar: Copy {
    const WIDTH: usize;

    fn write_le(self, out: &mut Vec<u8>);

    /// `bytes.len()` is always `WIDTH`.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($t:ty),* $(,)?) => {
        $(
            impl Scalar for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();

                #[inline]
                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_scalar!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl Scalar for bool {
    const WIDTH: usize = 1;

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_layout() {
        let mut out = Vec::new();
        0x0102_0304u32.write_le(&mut out);
        assert_eq!(out, [4, 3, 2, 1]);
        assert_eq!(u32::read_le(&out), 0x0102_0304);
    }

    #[test]
    fn float_round_trip() {
        let mut out = Vec::new();
        (-1.5f64).write_le(&mut out);
        assert_eq!(out.len(), f64::WIDTH);
        assert_eq!(f64::read_le(&out), -1.5);
    }
}
