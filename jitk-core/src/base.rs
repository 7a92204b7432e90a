use crate::{dtype::DType, error::JitError};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::ffi::c_void;

/// Id of base in [Bases] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BaseId(u32);

impl BaseId {
    /// Index of the base
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl From<u32> for BaseId {
    fn from(value: u32) -> Self {
        BaseId(value)
    }
}

impl From<BaseId> for u32 {
    fn from(value: BaseId) -> Self {
        value.0
    }
}

impl core::fmt::Display for BaseId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("a{}", self.0))
    }
}

/// Typed host storage of a base
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    /// bool storage
    Bool(Vec<bool>),
    /// i8 storage
    I8(Vec<i8>),
    /// i16 storage
    I16(Vec<i16>),
    /// i32 storage
    I32(Vec<i32>),
    /// i64 storage
    I64(Vec<i64>),
    /// u8 storage
    U8(Vec<u8>),
    /// u16 storage
    U16(Vec<u16>),
    /// u32 storage
    U32(Vec<u32>),
    /// u64 storage
    U64(Vec<u64>),
    /// f16 storage
    F16(Vec<half::f16>),
    /// f32 storage
    F32(Vec<f32>),
    /// f64 storage
    F64(Vec<f64>),
    /// complex64 storage, real and imaginary part
    C64(Vec<[f32; 2]>),
    /// complex128 storage, real and imaginary part
    C128(Vec<[f64; 2]>),
    /// random123 state
    R123(Vec<[u64; 2]>),
}

macro_rules! buffer_from {
    ($($variant:ident $t:ty),*) => {
        $(impl From<Vec<$t>> for Buffer {
            fn from(value: Vec<$t>) -> Self {
                Buffer::$variant(value)
            }
        })*
    };
}

buffer_from!(Bool bool, I8 i8, I16 i16, I32 i32, I64 i64, U8 u8, U16 u16, U32 u32, U64 u64, F16 half::f16, F32 f32, F64 f64, C64 [f32; 2], C128 [f64; 2], R123 [u64; 2]);

impl Buffer {
    /// Zeroed buffer
    pub fn zeros(dtype: DType, nelem: usize) -> Buffer {
        match dtype {
            DType::Bool => Buffer::Bool(alloc::vec![false; nelem]),
            DType::Int8 => Buffer::I8(alloc::vec![0; nelem]),
            DType::Int16 => Buffer::I16(alloc::vec![0; nelem]),
            DType::Int32 => Buffer::I32(alloc::vec![0; nelem]),
            DType::Int64 => Buffer::I64(alloc::vec![0; nelem]),
            DType::UInt8 => Buffer::U8(alloc::vec![0; nelem]),
            DType::UInt16 => Buffer::U16(alloc::vec![0; nelem]),
            DType::UInt32 => Buffer::U32(alloc::vec![0; nelem]),
            DType::UInt64 => Buffer::U64(alloc::vec![0; nelem]),
            DType::Float16 => Buffer::F16(alloc::vec![half::f16::ZERO; nelem]),
            DType::Float32 => Buffer::F32(alloc::vec![0.0; nelem]),
            DType::Float64 => Buffer::F64(alloc::vec![0.0; nelem]),
            DType::Complex64 => Buffer::C64(alloc::vec![[0.0; 2]; nelem]),
            DType::Complex128 => Buffer::C128(alloc::vec![[0.0; 2]; nelem]),
            DType::R123 => Buffer::R123(alloc::vec![[0; 2]; nelem]),
        }
    }

    /// DType of stored elements
    pub fn dtype(&self) -> DType {
        match self {
            Buffer::Bool(_) => DType::Bool,
            Buffer::I8(_) => DType::Int8,
            Buffer::I16(_) => DType::Int16,
            Buffer::I32(_) => DType::Int32,
            Buffer::I64(_) => DType::Int64,
            Buffer::U8(_) => DType::UInt8,
            Buffer::U16(_) => DType::UInt16,
            Buffer::U32(_) => DType::UInt32,
            Buffer::U64(_) => DType::UInt64,
            Buffer::F16(_) => DType::Float16,
            Buffer::F32(_) => DType::Float32,
            Buffer::F64(_) => DType::Float64,
            Buffer::C64(_) => DType::Complex64,
            Buffer::C128(_) => DType::Complex128,
            Buffer::R123(_) => DType::R123,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            Buffer::Bool(x) => x.len(),
            Buffer::I8(x) => x.len(),
            Buffer::I16(x) => x.len(),
            Buffer::I32(x) => x.len(),
            Buffer::I64(x) => x.len(),
            Buffer::U8(x) => x.len(),
            Buffer::U16(x) => x.len(),
            Buffer::U32(x) => x.len(),
            Buffer::U64(x) => x.len(),
            Buffer::F16(x) => x.len(),
            Buffer::F32(x) => x.len(),
            Buffer::F64(x) => x.len(),
            Buffer::C64(x) => x.len(),
            Buffer::C128(x) => x.len(),
            Buffer::R123(x) => x.len(),
        }
    }

    /// Is the buffer empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read element as i64. Floats truncate, complex numbers use the real part.
    pub fn get_i64(&self, i: usize) -> Option<i64> {
        Some(match self {
            Buffer::Bool(x) => *x.get(i)? as i64,
            Buffer::I8(x) => *x.get(i)? as i64,
            Buffer::I16(x) => *x.get(i)? as i64,
            Buffer::I32(x) => *x.get(i)? as i64,
            Buffer::I64(x) => *x.get(i)?,
            Buffer::U8(x) => *x.get(i)? as i64,
            Buffer::U16(x) => *x.get(i)? as i64,
            Buffer::U32(x) => *x.get(i)? as i64,
            Buffer::U64(x) => *x.get(i)? as i64,
            Buffer::R123(x) => x.get(i)?[0] as i64,
            _ => self.get_f64(i)? as i64,
        })
    }

    /// Read element as f64
    pub fn get_f64(&self, i: usize) -> Option<f64> {
        Some(match self {
            Buffer::F16(x) => x.get(i)?.to_f64(),
            Buffer::F32(x) => *x.get(i)? as f64,
            Buffer::F64(x) => *x.get(i)?,
            Buffer::C64(x) => x.get(i)?[0] as f64,
            Buffer::C128(x) => x.get(i)?[0],
            _ => self.get_i64(i)? as f64,
        })
    }

    /// Read element as bool
    pub fn get_bool(&self, i: usize) -> Option<bool> {
        match self {
            Buffer::Bool(x) => x.get(i).copied(),
            Buffer::F16(_) | Buffer::F32(_) | Buffer::F64(_) | Buffer::C64(_) | Buffer::C128(_) => {
                Some(self.get_f64(i)? != 0.0)
            }
            _ => Some(self.get_i64(i)? != 0),
        }
    }

    /// Write integer value into element, converting to the buffer's dtype
    pub fn set_i64(&mut self, i: usize, v: i64) -> Result<(), JitError> {
        let len = self.len();
        let oob = || JitError::invalid_argument(alloc::format!("index {i} out of bounds of buffer with {len} elements"));
        match self {
            Buffer::Bool(x) => *x.get_mut(i).ok_or_else(oob)? = v != 0,
            Buffer::I8(x) => *x.get_mut(i).ok_or_else(oob)? = v as i8,
            Buffer::I16(x) => *x.get_mut(i).ok_or_else(oob)? = v as i16,
            Buffer::I32(x) => *x.get_mut(i).ok_or_else(oob)? = v as i32,
            Buffer::I64(x) => *x.get_mut(i).ok_or_else(oob)? = v,
            Buffer::U8(x) => *x.get_mut(i).ok_or_else(oob)? = v as u8,
            Buffer::U16(x) => *x.get_mut(i).ok_or_else(oob)? = v as u16,
            Buffer::U32(x) => *x.get_mut(i).ok_or_else(oob)? = v as u32,
            Buffer::U64(x) => *x.get_mut(i).ok_or_else(oob)? = v as u64,
            Buffer::R123(x) => x.get_mut(i).ok_or_else(oob)?[0] = v as u64,
            _ => return self.set_f64(i, v as f64),
        }
        Ok(())
    }

    /// Write float value into element, converting to the buffer's dtype
    pub fn set_f64(&mut self, i: usize, v: f64) -> Result<(), JitError> {
        let len = self.len();
        let oob = || JitError::invalid_argument(alloc::format!("index {i} out of bounds of buffer with {len} elements"));
        match self {
            Buffer::F16(x) => *x.get_mut(i).ok_or_else(oob)? = half::f16::from_f64(v),
            Buffer::F32(x) => *x.get_mut(i).ok_or_else(oob)? = v as f32,
            Buffer::F64(x) => *x.get_mut(i).ok_or_else(oob)? = v,
            Buffer::C64(x) => *x.get_mut(i).ok_or_else(oob)? = [v as f32, 0.0],
            Buffer::C128(x) => *x.get_mut(i).ok_or_else(oob)? = [v, 0.0],
            Buffer::Bool(x) => *x.get_mut(i).ok_or_else(oob)? = v != 0.0,
            _ => return self.set_i64(i, v as i64),
        }
        Ok(())
    }

    /// Raw pointer to the first element, used to bind buffers to compiled kernels
    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        match self {
            Buffer::Bool(x) => x.as_mut_ptr().cast(),
            Buffer::I8(x) => x.as_mut_ptr().cast(),
            Buffer::I16(x) => x.as_mut_ptr().cast(),
            Buffer::I32(x) => x.as_mut_ptr().cast(),
            Buffer::I64(x) => x.as_mut_ptr().cast(),
            Buffer::U8(x) => x.as_mut_ptr().cast(),
            Buffer::U16(x) => x.as_mut_ptr().cast(),
            Buffer::U32(x) => x.as_mut_ptr().cast(),
            Buffer::U64(x) => x.as_mut_ptr().cast(),
            Buffer::F16(x) => x.as_mut_ptr().cast(),
            Buffer::F32(x) => x.as_mut_ptr().cast(),
            Buffer::F64(x) => x.as_mut_ptr().cast(),
            Buffer::C64(x) => x.as_mut_ptr().cast(),
            Buffer::C128(x) => x.as_mut_ptr().cast(),
            Buffer::R123(x) => x.as_mut_ptr().cast(),
        }
    }
}

/// Contiguous allocation referenced by views
#[derive(Debug, Clone, PartialEq)]
pub struct Base {
    /// Element type
    pub dtype: DType,
    /// Number of elements
    pub nelem: usize,
    /// Host data, None if unallocated
    pub data: Option<Buffer>,
}

impl Base {
    /// New unallocated base
    pub fn new(dtype: DType, nelem: usize) -> Base {
        Base { dtype, nelem, data: None }
    }

    /// New allocated base from data
    pub fn from_buffer(data: Buffer) -> Base {
        Base { dtype: data.dtype(), nelem: data.len(), data: Some(data) }
    }

    /// Is data allocated
    pub fn is_allocated(&self) -> bool {
        self.data.is_some()
    }

    /// Size of data in bytes
    pub fn nbytes(&self) -> usize {
        self.nelem * self.dtype.byte_size()
    }
}

/// Arena of bases, ids are issued sequentially
#[derive(Debug, Default)]
pub struct Bases {
    bases: BTreeMap<BaseId, Base>,
    next_id: u32,
}

impl Bases {
    /// New empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert base, returns its id
    pub fn insert(&mut self, base: Base) -> BaseId {
        let id = BaseId(self.next_id);
        self.next_id += 1;
        self.bases.insert(id, base);
        id
    }

    /// Get base
    pub fn get(&self, id: BaseId) -> Option<&Base> {
        self.bases.get(&id)
    }

    /// Get mutable base
    pub fn get_mut(&mut self, id: BaseId) -> Option<&mut Base> {
        self.bases.get_mut(&id)
    }

    /// Data of base, error if the base is missing or unallocated
    pub fn buffer(&self, id: BaseId) -> Result<&Buffer, JitError> {
        self.bases
            .get(&id)
            .and_then(|b| b.data.as_ref())
            .ok_or_else(|| JitError::invalid_argument(alloc::format!("base {id} is not allocated")))
    }

    /// Mutable data of base, error if the base is missing or unallocated
    pub fn buffer_mut(&mut self, id: BaseId) -> Result<&mut Buffer, JitError> {
        self.bases
            .get_mut(&id)
            .and_then(|b| b.data.as_mut())
            .ok_or_else(|| JitError::invalid_argument(alloc::format!("base {id} is not allocated")))
    }

    /// Allocate zeroed data if the base is unallocated
    pub fn allocate(&mut self, id: BaseId) -> Result<(), JitError> {
        let base = self
            .bases
            .get_mut(&id)
            .ok_or_else(|| JitError::invalid_argument(alloc::format!("unknown base {id}")))?;
        if base.data.is_none() {
            base.data = Some(Buffer::zeros(base.dtype, base.nelem));
        }
        Ok(())
    }

    /// Drop data of base, the descriptor stays
    pub fn free(&mut self, id: BaseId) {
        if let Some(base) = self.bases.get_mut(&id) {
            base.data = None;
        }
    }

    /// Remove base from arena
    pub fn remove(&mut self, id: BaseId) -> Option<Base> {
        self.bases.remove(&id)
    }

    /// Number of bases
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    /// Is arena empty
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }
}

#[test]
fn bases_allocate_and_free() -> Result<(), JitError> {
    let mut bases = Bases::new();
    let x = bases.insert(Base::new(DType::Float32, 4));
    let y = bases.insert(Base::from_buffer(alloc::vec![1i32, 2, 3].into()));
    assert_eq!(u32::from(y), 1);
    assert!(bases.buffer(x).is_err());
    bases.allocate(x)?;
    bases.buffer_mut(x)?.set_f64(2, 2.5)?;
    assert_eq!(bases.buffer(x)?.get_f64(2), Some(2.5));
    assert_eq!(bases.buffer(y)?.get_i64(1), Some(2));
    assert!(bases.buffer_mut(y)?.set_i64(3, 0).is_err());
    bases.free(x);
    assert!(!bases.get(x).map_or(true, Base::is_allocated));
    Ok(())
}
