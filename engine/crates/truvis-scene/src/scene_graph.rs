//! 分层的场景图
//!
//! 第 `k` 层存放深度为 `k` 的所有 instance，每层是一组等长的列：
//! id、父节点 id、局部 transform、世界 transform、mesh id、光追标记、子节点区间。
//! 同一个父节点的子节点在下一层中连续存放，且子节点的顺序与父节点的顺序一致，
//! 因此按层从浅到深遍历时，父节点的世界 transform 总是已经算好的。

use crate::rt_flags::{RtAsSubgroup, RtDirtyFlags, RtFlags, RtMeshMode};
use crate::transform::AffineTransform;
use glam::Mat4;
use rayon::prelude::*;
use truvis_crate_tools::profile_scope;
use truvis_utils::id_hash::INVALID_ID;
use truvis_utils::id_map::IdMap;

/// 默认的最大层数
pub const DEFAULT_MAX_HIERARCHY_DEPTH: usize = 3;

const NO_PARENT: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstanceLocation {
    pub level: u32,
    pub offset: u32,
}

/// 子节点在下一层中的区间 `[first, first + count)`，`count == 0` 时 `first` 无意义
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChildRange {
    pub first: u32,
    pub count: u32,
}

/// 场景图中的一层
#[derive(Default)]
pub struct TreeLevel {
    ids: Vec<u64>,
    parent_ids: Vec<u64>,
    /// 父节点在上一层中的下标，第 0 层为 `NO_PARENT`
    parent_offsets: Vec<u32>,
    local: Vec<AffineTransform>,
    world: Vec<Mat4>,
    mesh_ids: Vec<u64>,
    rt_flags: Vec<RtFlags>,
    children: Vec<ChildRange>,
    transform_dirty: Vec<bool>,
}
// getter
impl TreeLevel {
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
    #[inline]
    pub fn ids(&self) -> &[u64] {
        &self.ids
    }
    #[inline]
    pub fn parent_ids(&self) -> &[u64] {
        &self.parent_ids
    }
    #[inline]
    pub fn parent_offsets(&self) -> &[u32] {
        &self.parent_offsets
    }
    #[inline]
    pub fn local_transforms(&self) -> &[AffineTransform] {
        &self.local
    }
    #[inline]
    pub fn world_transforms(&self) -> &[Mat4] {
        &self.world
    }
    #[inline]
    pub fn mesh_ids(&self) -> &[u64] {
        &self.mesh_ids
    }
    #[inline]
    pub fn rt_flags(&self) -> &[RtFlags] {
        &self.rt_flags
    }
    #[inline]
    pub fn children(&self) -> &[ChildRange] {
        &self.children
    }
}
// tools
impl TreeLevel {
    fn reserve(&mut self, additional: usize) {
        self.ids.reserve(additional);
        self.parent_ids.reserve(additional);
        self.parent_offsets.reserve(additional);
        self.local.reserve(additional);
        self.world.reserve(additional);
        self.mesh_ids.reserve(additional);
        self.rt_flags.reserve(additional);
        self.children.reserve(additional);
        self.transform_dirty.reserve(additional);
    }

    #[allow(clippy::too_many_arguments)]
    fn insert(
        &mut self,
        pos: usize,
        id: u64,
        parent_id: u64,
        parent_offset: u32,
        local: AffineTransform,
        world: Mat4,
        mesh_id: u64,
        rt_flags: RtFlags,
    ) {
        self.ids.insert(pos, id);
        self.parent_ids.insert(pos, parent_id);
        self.parent_offsets.insert(pos, parent_offset);
        self.local.insert(pos, local);
        self.world.insert(pos, world);
        self.mesh_ids.insert(pos, mesh_id);
        self.rt_flags.insert(pos, rt_flags);
        self.children.insert(pos, ChildRange::default());
        self.transform_dirty.insert(pos, false);
    }

    /// 新的子节点应该放在下一层的哪个位置
    fn child_insert_position(&self, parent_offset: usize) -> usize {
        let range = self.children[parent_offset];
        if range.count > 0 {
            return (range.first + range.count) as usize;
        }
        self.children[..parent_offset]
            .iter()
            .rev()
            .find(|r| r.count > 0)
            .map_or(0, |r| (r.first + r.count) as usize)
    }
}

/// 场景图中一个 instance 的只读视图
#[derive(Clone, Copy, Debug)]
pub struct InstanceView<'a> {
    pub id: u64,
    pub parent_id: u64,
    pub mesh_id: u64,
    pub local_transform: &'a AffineTransform,
    pub world_transform: &'a Mat4,
    pub rt_flags: RtFlags,
}

pub struct SceneGraph {
    levels: Vec<TreeLevel>,
    index: IdMap<InstanceLocation>,
    /// 上一次 `update_world_transforms` 之前的世界 transform
    prev_world: IdMap<Mat4>,
    /// 加速结构需要重建或者 refit 的 instance
    rt_dirty: Vec<u64>,
    max_depth: usize,
}
impl Default for SceneGraph {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HIERARCHY_DEPTH)
    }
}
// new & init
impl SceneGraph {
    pub fn new(max_depth: usize) -> Self {
        Self::with_min_buckets(max_depth, 8)
    }

    pub fn with_min_buckets(max_depth: usize, id_map_min_buckets: usize) -> Self {
        assert!(max_depth > 0, "SceneGraph: max depth must be at least 1");
        Self {
            levels: Vec::new(),
            index: IdMap::with_min_buckets(id_map_min_buckets),
            prev_world: IdMap::with_min_buckets(id_map_min_buckets),
            rt_dirty: Vec::new(),
            max_depth,
        }
    }
}
// getter
impl SceneGraph {
    #[inline]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    #[inline]
    pub fn instance_count(&self) -> usize {
        self.index.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// 至少有一个 instance 的层数
    pub fn level_count(&self) -> usize {
        self.levels.iter().rposition(|level| !level.is_empty()).map_or(0, |idx| idx + 1)
    }

    pub fn level_len(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, TreeLevel::len)
    }

    #[inline]
    pub fn level(&self, level: usize) -> Option<&TreeLevel> {
        self.levels.get(level)
    }

    pub fn iter_level(&self, level: usize) -> impl Iterator<Item = InstanceView<'_>> + '_ {
        self.levels
            .get(level)
            .into_iter()
            .flat_map(|level| (0..level.len()).map(move |offset| Self::view(level, offset)))
    }

    pub fn get_by_id(&self, id: u64) -> Option<InstanceLocation> {
        if id == INVALID_ID {
            return None;
        }
        let location = *self.index.find(id)?;
        let stored = self.levels[location.level as usize].ids[location.offset as usize];
        assert_eq!(
            stored, id,
            "SceneGraph: index entry for {id:#018x} points at a slot holding {stored:#018x}"
        );
        Some(location)
    }

    pub fn get(&self, id: u64) -> Option<InstanceView<'_>> {
        let location = self.get_by_id(id)?;
        Some(Self::view(&self.levels[location.level as usize], location.offset as usize))
    }

    pub fn world_transform(&self, id: u64) -> Option<Mat4> {
        self.get(id).map(|view| *view.world_transform)
    }

    pub fn local_transform(&self, id: u64) -> Option<AffineTransform> {
        self.get(id).map(|view| *view.local_transform)
    }

    /// 还没有经历过 `update_world_transforms` 的 instance 返回当前的世界 transform
    pub fn prev_world_transform(&self, id: u64) -> Option<Mat4> {
        let current = self.world_transform(id)?;
        Some(self.prev_world.find(id).copied().unwrap_or(current))
    }

    pub fn mesh_id(&self, id: u64) -> Option<u64> {
        self.get(id).map(|view| view.mesh_id)
    }

    pub fn parent_id(&self, id: u64) -> Option<u64> {
        self.get(id).map(|view| view.parent_id)
    }

    pub fn rt_flags(&self, id: u64) -> Option<RtFlags> {
        self.get(id).map(|view| view.rt_flags)
    }

    fn view(level: &TreeLevel, offset: usize) -> InstanceView<'_> {
        InstanceView {
            id: level.ids[offset],
            parent_id: level.parent_ids[offset],
            mesh_id: level.mesh_ids[offset],
            local_transform: &level.local[offset],
            world_transform: &level.world[offset],
            rt_flags: level.rt_flags[offset],
        }
    }
}
// tools
impl SceneGraph {
    /// 一次性为每一层预留空间
    pub fn reserve_instances(&mut self, counts_per_level: &[usize], total: usize) {
        assert!(
            counts_per_level.len() <= self.max_depth,
            "SceneGraph: {} levels requested, max depth is {}",
            counts_per_level.len(),
            self.max_depth
        );
        if self.levels.len() < counts_per_level.len() {
            self.levels.resize_with(counts_per_level.len(), TreeLevel::default);
        }
        for (level, count) in self.levels.iter_mut().zip(counts_per_level) {
            level.reserve(*count);
        }
        self.index.reserve(self.index.size() + total);
        self.prev_world.reserve(self.prev_world.size() + total);
    }

    /// 在 `level` 层插入一个 instance，放在父节点已有子节点的后面
    ///
    /// # params
    /// - `parent_offset`: 父节点在 `level - 1` 层中的下标，第 0 层必须为 None
    ///
    /// # return
    /// instance 在 `level` 层中的下标。插入位置之后的 instance 会整体后移
    #[allow(clippy::too_many_arguments)]
    pub fn insert_at_level(
        &mut self,
        id: u64,
        level: usize,
        parent_offset: Option<usize>,
        local_transform: AffineTransform,
        mesh_id: u64,
        rt_mode: RtMeshMode,
        rt_mask: RtAsSubgroup,
        is_opaque: bool,
    ) -> usize {
        assert!(
            level < self.max_depth,
            "SceneGraph: level {level} exceeds the maximum hierarchy depth {}",
            self.max_depth
        );
        assert!(
            !self.index.contains(id),
            "SceneGraph: instance {id:#018x} is already in the scene graph"
        );

        let (parent_id, parent_offset, parent_world, pos) = match (level, parent_offset) {
            (0, None) => (INVALID_ID, NO_PARENT, Mat4::IDENTITY, self.level_len(0)),
            (0, Some(_)) => panic!("SceneGraph: instances on level 0 have no parent"),
            (_, None) => panic!("SceneGraph: instance {id:#018x} on level {level} needs a parent"),
            (_, Some(parent_offset)) => {
                let parent_level = self
                    .levels
                    .get(level - 1)
                    .filter(|parent_level| parent_offset < parent_level.len())
                    .unwrap_or_else(|| {
                        panic!("SceneGraph: parent offset {parent_offset} does not exist on level {}", level - 1)
                    });
                (
                    parent_level.ids[parent_offset],
                    parent_offset as u32,
                    parent_level.world[parent_offset],
                    parent_level.child_insert_position(parent_offset),
                )
            }
        };

        let mut rt_flags = RtFlags::new(rt_mode, rt_mask, is_opaque);
        if mesh_id != INVALID_ID {
            rt_flags.dirty = RtDirtyFlags::REBUILD;
            self.rt_dirty.push(id);
        }

        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, TreeLevel::default);
        }

        let (upper, lower) = self.levels.split_at_mut(level);
        let (current, below) = lower.split_at_mut(1);
        let current = &mut current[0];

        current.insert(
            pos,
            id,
            parent_id,
            parent_offset,
            local_transform,
            parent_world * local_transform.to_mat4(),
            mesh_id,
            rt_flags,
        );

        if pos + 1 < current.len() {
            // 后移的 instance：更新索引，以及下一层指向它们的父节点下标
            for (offset, shifted_id) in current.ids.iter().enumerate().skip(pos + 1) {
                let location = self.index.find_mut(*shifted_id).unwrap_or_else(|| {
                    panic!("SceneGraph: shifted instance {shifted_id:#018x} is missing from the index")
                });
                location.offset = offset as u32;
            }
            if let Some(next) = below.first_mut() {
                for child_parent in next.parent_offsets.iter_mut().filter(|p| **p as usize >= pos) {
                    *child_parent += 1;
                }
            }
        }

        if let Some(parent_level) = upper.last_mut() {
            let parent_offset = parent_offset as usize;
            let range = &mut parent_level.children[parent_offset];
            if range.count == 0 {
                range.first = pos as u32;
            }
            range.count += 1;
            for later in parent_level.children[parent_offset + 1..].iter_mut().filter(|r| r.count > 0) {
                later.first += 1;
            }
        }

        self.index.insert_if_absent(id, || InstanceLocation {
            level: level as u32,
            offset: pos as u32,
        });

        pos
    }

    /// 修改局部 transform，下一次 `update_world_transforms` 时生效
    ///
    /// # return
    /// instance 不存在时返回 false
    pub fn set_local_transform(&mut self, id: u64, local_transform: AffineTransform) -> bool {
        let Some(location) = self.get_by_id(id) else {
            return false;
        };
        let level = &mut self.levels[location.level as usize];
        level.local[location.offset as usize] = local_transform;
        level.transform_dirty[location.offset as usize] = true;
        true
    }

    /// 逐层计算世界 transform：`world = parent_world * local`
    ///
    /// 同一层内并行计算；transform 变化过的 instance (包括祖先变化) 会被标记为需要更新加速结构：
    /// dynamic 的 instance 标记 UPDATE，static 的标记 REBUILD
    pub fn update_world_transforms(&mut self) {
        profile_scope!("SceneGraph::update_world_transforms");

        for level_idx in 0..self.levels.len() {
            let (upper, lower) = self.levels.split_at_mut(level_idx);
            let parent = upper.last();
            let level = &mut lower[0];

            for (id, world) in level.ids.iter().zip(&level.world) {
                self.prev_world.insert_or_assign(*id, *world);
            }

            let TreeLevel {
                world,
                local,
                parent_offsets,
                transform_dirty,
                ..
            } = level;
            world
                .par_iter_mut()
                .zip(transform_dirty.par_iter_mut())
                .zip(local.par_iter().zip(parent_offsets.par_iter()))
                .for_each(|((world, dirty), (local, parent_offset))| match parent {
                    Some(parent) => {
                        let parent_offset = *parent_offset as usize;
                        *world = parent.world[parent_offset] * local.to_mat4();
                        *dirty |= parent.transform_dirty[parent_offset];
                    }
                    None => *world = local.to_mat4(),
                });
        }

        for level in &mut self.levels {
            for offset in 0..level.len() {
                if !std::mem::take(&mut level.transform_dirty[offset]) || level.mesh_ids[offset] == INVALID_ID {
                    continue;
                }
                let flags = &mut level.rt_flags[offset];
                if flags.dirty.is_empty() {
                    self.rt_dirty.push(level.ids[offset]);
                }
                flags.dirty |= match flags.mode {
                    RtMeshMode::Dynamic => RtDirtyFlags::UPDATE,
                    RtMeshMode::Static => RtDirtyFlags::REBUILD,
                };
            }
        }
    }

    /// 取出并清空所有需要重建或者 refit 加速结构的 instance
    pub fn take_rt_dirty(&mut self) -> Vec<(u64, RtDirtyFlags)> {
        let ids = std::mem::take(&mut self.rt_dirty);
        ids.into_iter()
            .filter_map(|id| {
                let location = self.get_by_id(id)?;
                let flags = &mut self.levels[location.level as usize].rt_flags[location.offset as usize];
                Some((id, std::mem::take(&mut flags.dirty)))
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.levels.clear();
        self.index.clear();
        self.prev_world.clear();
        self.rt_dirty.clear();
    }
}
