/// 上传到 GPU 之后得到的不透明句柄
///
/// 句柄的含义由上传者决定，场景侧只负责保存
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuHandle(u64);

impl GpuHandle {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}
