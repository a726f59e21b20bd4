//! 光追相关的 instance 标记

use bitflags::bitflags;

/// BLAS 的构建方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RtMeshMode {
    /// 构建一次之后不再变化
    #[default]
    Static,
    /// 每次 transform 变化后 refit
    Dynamic,
}

bitflags! {
    /// TLAS instance mask，shader 中据此只追踪发光体或只追踪非发光体
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RtAsSubgroup: u8 {
        const EMISSIVE = 1 << 0;
        const NON_EMISSIVE = 1 << 1;
    }
}

bitflags! {
    /// 加速结构需要做的工作
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RtDirtyFlags: u8 {
        const REBUILD = 1 << 0;
        const UPDATE = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RtFlags {
    pub mode: RtMeshMode,
    pub mask: RtAsSubgroup,
    pub opaque: bool,
    pub dirty: RtDirtyFlags,
}
impl RtFlags {
    pub fn new(mode: RtMeshMode, mask: RtAsSubgroup, opaque: bool) -> Self {
        Self {
            mode,
            mask,
            opaque,
            dirty: RtDirtyFlags::empty(),
        }
    }

    /// 打包成一个 u32 交给 shader
    ///
    /// - bit 0: dynamic
    /// - bit 1: opaque
    /// - bit 8..16: mask
    /// - bit 16..24: dirty
    pub fn encode(&self) -> u32 {
        u32::from(self.mode == RtMeshMode::Dynamic)
            | (u32::from(self.opaque) << 1)
            | (u32::from(self.mask.bits()) << 8)
            | (u32::from(self.dirty.bits()) << 16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let mut flags = RtFlags::new(RtMeshMode::Dynamic, RtAsSubgroup::EMISSIVE, true);
        assert_eq!(flags.encode(), 0b11 | (1 << 8));

        flags.dirty |= RtDirtyFlags::UPDATE;
        flags.mode = RtMeshMode::Static;
        assert_eq!(flags.encode(), 0b10 | (1 << 8) | (2 << 16));
    }
}
