//! 多个 worker 并行写入的定长 buffer
//!
//! 每个 worker 先通过一次 `fetch_add` 预留一段 `[base, base + count)`，
//! 之后只在自己预留的区间内写入，因此批量写入本身不需要任何锁。

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct AtomicRangeBuffer<T> {
    storage: Box<[UnsafeCell<T>]>,
    cursor: AtomicUsize,
    name: String,
}

// SAFETY: 不同线程只会通过 `reserve` 拿到互不重叠的区间，
// 对整个 buffer 的访问 (`as_slice` / `into_vec`) 需要 `&mut self` 或所有权
unsafe impl<T: Send> Sync for AtomicRangeBuffer<T> {}

/// 通过 [`AtomicRangeBuffer::reserve`] 预留的一段区间
pub struct ReservedRange<'a, T> {
    base: usize,
    data: &'a mut [T],
}
impl<T> ReservedRange<'_, T> {
    /// 区间在整个 buffer 中的起始下标
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }
}
impl<T> Deref for ReservedRange<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.data
    }
}
impl<T> DerefMut for ReservedRange<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.data
    }
}

// new & init
impl<T: Default> AtomicRangeBuffer<T> {
    pub fn new(capacity: usize, name: impl Into<String>) -> Self {
        let storage = (0..capacity).map(|_| UnsafeCell::new(T::default())).collect::<Box<[_]>>();
        Self {
            storage,
            cursor: AtomicUsize::new(0),
            name: name.into(),
        }
    }
}
// getter
impl<T> AtomicRangeBuffer<T> {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// 已经预留出去的元素数量
    #[inline]
    pub fn len(&self) -> usize {
        self.cursor.load(Ordering::Acquire).min(self.storage.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
// tools
impl<T> AtomicRangeBuffer<T> {
    /// 预留 `count` 个元素
    ///
    /// 超出容量说明预扫描得到的总数是错误的，属于导入器自身的 bug，直接 panic
    pub fn reserve(&self, count: usize) -> ReservedRange<'_, T> {
        let base = self.cursor.fetch_add(count, Ordering::AcqRel);
        assert!(
            base + count <= self.storage.len(),
            "AtomicRangeBuffer({}): reserved range [{base}, {}) is out of bounds (capacity {})",
            self.name,
            base + count,
            self.storage.len()
        );

        // SAFETY: fetch_add 保证每段区间只会被分配一次，区间之间互不重叠；
        // UnsafeCell<T> 与 T 的内存布局相同
        let data = unsafe {
            let ptr = UnsafeCell::raw_get(self.storage.as_ptr().add(base));
            std::slice::from_raw_parts_mut(ptr, count)
        };

        ReservedRange { base, data }
    }

    /// 所有 worker 结束后读取已写入的部分
    pub fn as_slice(&mut self) -> &[T] {
        let len = self.len();
        // SAFETY: &mut self 保证没有其他的 ReservedRange 存活
        unsafe { std::slice::from_raw_parts(UnsafeCell::raw_get(self.storage.as_ptr()), len) }
    }

    /// 取出已写入的部分，未预留的尾部被丢弃
    pub fn into_vec(self) -> Vec<T> {
        let len = self.len();
        let mut data = self.storage.into_vec().into_iter().map(UnsafeCell::into_inner).collect::<Vec<_>>();
        data.truncate(len);
        data
    }
}
