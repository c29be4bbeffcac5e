/// A fixed-size value sent as its raw host-native bytes.
///
/// No byte-order normalisation is applied; both ends must share the same
/// representation.
pub trait Scalar: Copy {
    /// Byte image of one value.
    type Bytes: AsRef<[u8]> + AsMut<[u8]> + Default;

    /// The value's bytes as they go on the wire.
    fn to_wire(self) -> Self::Bytes;

    /// Rebuild a value from bytes produced by [`to_wire`](Self::to_wire).
    fn from_wire(bytes: Self::Bytes) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Scalar for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn to_wire(self) -> Self::Bytes {
                    self.to_ne_bytes()
                }

                fn from_wire(bytes: Self::Bytes) -> Self {
                    <$ty>::from_ne_bytes(bytes)
                }
            }
        )*
    };
}

impl_scalar!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

impl Scalar for bool {
    type Bytes = [u8; 1];

    fn to_wire(self) -> Self::Bytes {
        [u8::from(self)]
    }

    fn from_wire(bytes: Self::Bytes) -> Self {
        bytes[0] != 0
    }
}
