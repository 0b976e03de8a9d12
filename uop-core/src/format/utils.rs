use std::io::{self, Read, Write};

// Little-endian fixed width fields
pub trait FixedSize: Sized {
    fn read<R: Read>(reader: &mut R) -> io::Result<Self>;
    fn write<W: Write>(&self, writer: &mut W) -> io::Result<()>;
}

macro_rules! impl_fixed_size {
    ($($ty:ty),*) => {
        $(
            impl FixedSize for $ty {
                fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    reader.read_exact(&mut buf)?;
                    Ok(<$ty>::from_le_bytes(buf))
                }
                fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
                    writer.write_all(&self.to_le_bytes())
                }
            }
        )*
    };
}

impl_fixed_size!(u16, u32, u64);

pub fn read_le<R: Read, T: FixedSize>(reader: &mut R) -> io::Result<T> {
    T::read(reader)
}
