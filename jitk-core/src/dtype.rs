/// Element type of a base array
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DType {
    /// Boolean stored in one byte
    Bool,
    /// 8 bit signed integer
    Int8,
    /// 16 bit signed integer
    Int16,
    /// 32 bit signed integer
    Int32,
    /// 64 bit signed integer
    Int64,
    /// 8 bit unsigned integer
    UInt8,
    /// 16 bit unsigned integer
    UInt16,
    /// 32 bit unsigned integer
    UInt32,
    /// 64 bit unsigned integer
    UInt64,
    /// 16 bit floating point
    Float16,
    /// 32 bit floating point
    Float32,
    /// 64 bit floating point
    Float64,
    /// Complex number made of two 32 bit floats
    Complex64,
    /// Complex number made of two 64 bit floats
    Complex128,
    /// Random123 generator state (start, key)
    R123,
}

impl DType {
    /// Get the size of DType in bytes
    pub const fn byte_size(self) -> usize {
        match self {
            DType::Bool | DType::Int8 | DType::UInt8 => 1,
            DType::Int16 | DType::UInt16 | DType::Float16 => 2,
            DType::Int32 | DType::UInt32 | DType::Float32 => 4,
            DType::Int64 | DType::UInt64 | DType::Float64 | DType::Complex64 => 8,
            DType::Complex128 | DType::R123 => 16,
        }
    }

    /// Check if self is floating point dtype (complex excluded)
    pub const fn is_float(self) -> bool {
        matches!(self, DType::Float16 | DType::Float32 | DType::Float64)
    }

    /// Check if self is complex dtype
    pub const fn is_complex(self) -> bool {
        matches!(self, DType::Complex64 | DType::Complex128)
    }

    /// Signed integer check
    pub const fn is_signed_integer(self) -> bool {
        matches!(self, DType::Int8 | DType::Int16 | DType::Int32 | DType::Int64)
    }

    /// Unsigned integer check, bool is not an integer
    pub const fn is_unsigned_integer(self) -> bool {
        matches!(self, DType::UInt8 | DType::UInt16 | DType::UInt32 | DType::UInt64)
    }

    /// Signed or unsigned integer
    pub const fn is_integer(self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer()
    }

    /// Name of the field of the constant union used by generated kernels
    pub const fn union_member(self) -> &'static str {
        match self {
            DType::Bool => "bool8",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::UInt8 => "uint8",
            DType::UInt16 => "uint16",
            DType::UInt32 => "uint32",
            DType::UInt64 => "uint64",
            DType::Float16 => "float16",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Complex64 => "complex64",
            DType::Complex128 => "complex128",
            DType::R123 => "r123",
        }
    }

    pub(crate) const ALL: [DType; 15] = [
        DType::Bool,
        DType::Int8,
        DType::Int16,
        DType::Int32,
        DType::Int64,
        DType::UInt8,
        DType::UInt16,
        DType::UInt32,
        DType::UInt64,
        DType::Float16,
        DType::Float32,
        DType::Float64,
        DType::Complex64,
        DType::Complex128,
        DType::R123,
    ];

    /// All element types, in declaration order
    pub fn all() -> impl Iterator<Item = DType> {
        Self::ALL.into_iter()
    }
}

impl core::fmt::Display for DType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            DType::Bool => "BOOL",
            DType::Int8 => "INT8",
            DType::Int16 => "INT16",
            DType::Int32 => "INT32",
            DType::Int64 => "INT64",
            DType::UInt8 => "UINT8",
            DType::UInt16 => "UINT16",
            DType::UInt32 => "UINT32",
            DType::UInt64 => "UINT64",
            DType::Float16 => "FLOAT16",
            DType::Float32 => "FLOAT32",
            DType::Float64 => "FLOAT64",
            DType::Complex64 => "COMPLEX64",
            DType::Complex128 => "COMPLEX128",
            DType::R123 => "R123",
        })
    }
}

#[test]
fn dtype_classes() {
    assert!(DType::Int32.is_signed_integer());
    assert!(!DType::Bool.is_integer());
    assert!(DType::UInt8.is_integer());
    assert_eq!(DType::Complex128.byte_size(), 16);
    assert_eq!(DType::all().filter(|d| d.is_float()).count(), 3);
}
