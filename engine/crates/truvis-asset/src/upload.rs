use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use truvis_scene::handles::GpuHandle;

/// 贴图上传时每一行的字节数需要对齐到这个值
pub const TEXTURE_ROW_PITCH_ALIGNMENT: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadKind {
    /// RGBA8，`row_pitch` 已按 [`TEXTURE_ROW_PITCH_ALIGNMENT`] 对齐
    Texture { width: u32, height: u32, row_pitch: u32 },
    Buffer,
}

/// 把 CPU 数据交给 GPU 侧，返回不透明的句柄
///
/// 会在多个 worker 中同时调用
pub trait GpuUploader: Send + Sync {
    fn upload(&self, name: &str, kind: UploadKind, bytes: &[u8]) -> GpuHandle;
}

pub struct StagedUpload {
    pub name: String,
    pub kind: UploadKind,
    pub bytes: Vec<u8>,
}

/// 只在 CPU 侧保留一份拷贝，句柄就是拷贝的下标
#[derive(Default)]
pub struct StagingUploader {
    uploads: Mutex<Vec<StagedUpload>>,
    total_bytes: AtomicUsize,
}
impl StagingUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.uploads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn with_upload<R>(&self, handle: GpuHandle, f: impl FnOnce(&StagedUpload) -> R) -> Option<R> {
        self.uploads.lock().get(handle.raw() as usize).map(f)
    }
}
impl GpuUploader for StagingUploader {
    fn upload(&self, name: &str, kind: UploadKind, bytes: &[u8]) -> GpuHandle {
        self.total_bytes.fetch_add(bytes.len(), Ordering::Relaxed);

        let mut uploads = self.uploads.lock();
        let handle = GpuHandle::new(uploads.len() as u64);
        uploads.push(StagedUpload {
            name: name.to_string(),
            kind,
            bytes: bytes.to_vec(),
        });
        handle
    }
}

/// 把紧密排列的 RGBA8 像素按对齐后的行距写入 `scratch`
///
/// # return
/// 行距 (字节)
pub fn write_pitched_rows(width: u32, height: u32, pixels: &[u8], scratch: &mut Vec<u8>) -> u32 {
    let row_bytes = width as usize * 4;
    let row_pitch = row_bytes.next_multiple_of(TEXTURE_ROW_PITCH_ALIGNMENT);
    assert_eq!(pixels.len(), row_bytes * height as usize, "write_pitched_rows: pixel data size mismatch");

    scratch.clear();
    scratch.resize(row_pitch * height as usize, 0);
    if row_bytes > 0 {
        for (dst, src) in scratch.chunks_exact_mut(row_pitch).zip(pixels.chunks_exact(row_bytes)) {
            dst[..row_bytes].copy_from_slice(src);
        }
    }
    row_pitch as u32
}
