use std::marker::PhantomData;

use crate::data_type::Element;

/// Host-owned device memory. Backed by `u64` words so any element type the
/// kernels stage is correctly aligned.
pub struct DeviceBuffer {
    words: Vec<u64>,
    len_bytes: usize,
}

impl DeviceBuffer {
    pub fn zeroed(len_bytes: usize) -> Self {
        Self {
            words: vec![0u64; len_bytes.div_ceil(8)],
            len_bytes,
        }
    }

    pub fn from_slice<E: Element>(values: &[E]) -> Self {
        let len_bytes = std::mem::size_of_val(values);
        let mut buffer = Self::zeroed(len_bytes);
        buffer.as_mut_slice::<E>()[..values.len()].copy_from_slice(values);
        buffer
    }

    pub fn len_bytes(&self) -> usize {
        self.len_bytes
    }

    pub fn as_slice<E: Element>(&self) -> &[E] {
        let len = self.len_bytes / E::DATA_TYPE.size_in_bytes();
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast(), len) }
    }

    pub fn as_mut_slice<E: Element>(&mut self) -> &mut [E] {
        let len = self.len_bytes / E::DATA_TYPE.size_in_bytes();
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast(), len) }
    }

    /// Device-address view handed to a kernel launch.
    pub fn tensor<E: Element>(&mut self) -> GlobalTensor<E> {
        let len = self.len_bytes / E::DATA_TYPE.size_in_bytes();
        GlobalTensor {
            ptr: self.words.as_mut_ptr().cast(),
            len,
            _marker: PhantomData,
        }
    }
}

/// Raw device address of a global-memory tensor, as the kernels see it.
/// Copyable and shared across core threads; the cross-core flag protocol is
/// the only thing that keeps concurrent accesses disjoint, exactly as on
/// the hardware. No bounds validation happens beyond boundary-tile
/// clipping (debug builds assert).
pub struct GlobalTensor<E> {
    ptr: *mut E,
    len: usize,
    _marker: PhantomData<E>,
}

impl<E> Clone for GlobalTensor<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for GlobalTensor<E> {}

unsafe impl<E: Element> Send for GlobalTensor<E> {}
unsafe impl<E: Element> Sync for GlobalTensor<E> {}

impl<E: Element> GlobalTensor<E> {
    /// Null tensor for optional operands that are absent.
    pub fn absent() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            len: 0,
            _marker: PhantomData,
        }
    }

    pub fn is_absent(&self) -> bool {
        self.ptr.is_null()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View starting `offset` elements into this tensor.
    pub fn at(&self, offset: i64) -> Self {
        debug_assert!(offset >= 0 && (offset as usize) <= self.len);
        Self {
            ptr: unsafe { self.ptr.offset(offset as isize) },
            len: self.len - offset as usize,
            _marker: PhantomData,
        }
    }

    pub fn read(&self, index: i64) -> E {
        debug_assert!((index as usize) < self.len);
        unsafe { self.ptr.offset(index as isize).read() }
    }

    pub fn write(&self, index: i64, value: E) {
        debug_assert!((index as usize) < self.len);
        unsafe { self.ptr.offset(index as isize).write(value) }
    }
}
