//! 发光体
//!
//! - [`EmissiveSubset`]: 使用发光材质的 mesh primitive，按 mesh id 排序，二分查找
//! - [`EmissiveTriangle`] / [`EmissiveInstance`]: 世界空间下的发光三角形，直接上传给 shader
//! - [`EmissiveStore`]: 上面几项以及三角形功率对应的 alias table

use truvis_crate_tools::profile_scope;
use truvis_utils::alias_table::AliasTable;
use truvis_utils::id_hash::INVALID_ID;

/// 空槽位的 mesh id，排序后落在末尾
pub const EMISSIVE_SENTINEL_MESH_ID: u64 = INVALID_ID;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmissiveSubsetEntry {
    pub mesh_id: u64,
    pub base_vertex: u32,
    pub base_index: u32,
    pub num_indices: u32,
    pub material_index: u32,
}
impl Default for EmissiveSubsetEntry {
    fn default() -> Self {
        Self {
            mesh_id: EMISSIVE_SENTINEL_MESH_ID,
            base_vertex: 0,
            base_index: 0,
            num_indices: 0,
            material_index: 0,
        }
    }
}
impl EmissiveSubsetEntry {
    #[inline]
    pub fn is_sentinel(&self) -> bool {
        self.mesh_id == EMISSIVE_SENTINEL_MESH_ID
    }
}

/// 按 mesh id 升序排列的发光 primitive
#[derive(Clone, Debug, Default)]
pub struct EmissiveSubset {
    entries: Vec<EmissiveSubsetEntry>,
}
// new & init
impl EmissiveSubset {
    /// 由按最坏情况分配、只写了一部分的 buffer 得到
    ///
    /// 未写入的槽位保持哨兵 id，排序后位于末尾，随后被截掉
    pub fn from_sparse(mut entries: Vec<EmissiveSubsetEntry>, count: usize) -> Self {
        profile_scope!("EmissiveSubset::from_sparse");

        entries.sort_unstable_by_key(|entry| entry.mesh_id);
        assert!(count <= entries.len(), "EmissiveSubset: count {count} exceeds buffer size {}", entries.len());
        assert!(
            entries[..count].iter().all(|entry| !entry.is_sentinel()),
            "EmissiveSubset: fewer entries written than counted"
        );
        assert!(
            entries[count..].iter().all(EmissiveSubsetEntry::is_sentinel),
            "EmissiveSubset: more entries written than counted"
        );
        entries.truncate(count);
        entries.shrink_to_fit();

        Self { entries }
    }
}
// getter
impl EmissiveSubset {
    #[inline]
    pub fn entries(&self) -> &[EmissiveSubsetEntry] {
        &self.entries
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, mesh_id: u64) -> Option<&EmissiveSubsetEntry> {
        if mesh_id == EMISSIVE_SENTINEL_MESH_ID {
            return None;
        }
        self.entries
            .binary_search_by_key(&mesh_id, |entry| entry.mesh_id)
            .ok()
            .map(|idx| &self.entries[idx])
    }

    #[inline]
    pub fn contains(&self, mesh_id: u64) -> bool {
        self.find(mesh_id).is_some()
    }
}
// tools
impl EmissiveSubset {
    /// 合并另一个场景的子集，保持有序
    pub fn merge(&mut self, other: impl IntoIterator<Item = EmissiveSubsetEntry>) {
        self.entries.extend(other);
        self.entries.sort_unstable_by_key(|entry| entry.mesh_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// 世界空间下的一个发光三角形
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct EmissiveTriangle {
    pub v0: [f32; 3],
    pub v1: [f32; 3],
    pub v2: [f32; 3],
    pub uv0: [f32; 2],
    pub uv1: [f32; 2],
    pub uv2: [f32; 2],
    /// RGB8 的发光颜色，bit 24 表示双面
    pub packed_emissive: u32,
    pub emissive_strength: f32,
    /// 在 [`EmissiveStore::instances`] 中的下标
    pub instance_index: u32,
}
impl EmissiveTriangle {
    pub fn area(&self) -> f32 {
        let v0 = glam::Vec3::from(self.v0);
        let e1 = glam::Vec3::from(self.v1) - v0;
        let e2 = glam::Vec3::from(self.v2) - v0;
        e1.cross(e2).length() * 0.5
    }
}

/// 一个引用了发光 primitive 的 instance
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct EmissiveInstance {
    pub instance_id: u64,
    pub mesh_id: u64,
    pub base_triangle: u32,
    pub num_triangles: u32,
    pub material_id: u64,
}

/// 所有场景的发光体
#[derive(Default)]
pub struct EmissiveStore {
    subset: EmissiveSubset,
    triangles: Vec<EmissiveTriangle>,
    instances: Vec<EmissiveInstance>,
    /// 每个三角形的功率，未归一化
    triangle_power: Vec<f32>,
    alias_table: Option<AliasTable>,
}
// getter
impl EmissiveStore {
    #[inline]
    pub fn subset(&self) -> &EmissiveSubset {
        &self.subset
    }

    #[inline]
    pub fn triangles(&self) -> &[EmissiveTriangle] {
        &self.triangles
    }

    #[inline]
    pub fn instances(&self) -> &[EmissiveInstance] {
        &self.instances
    }

    #[inline]
    pub fn triangle_power(&self) -> &[f32] {
        &self.triangle_power
    }

    /// 所有三角形的功率都为 0 时为 None，此时不做光源采样
    #[inline]
    pub fn alias_table(&self) -> Option<&AliasTable> {
        self.alias_table.as_ref()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}
// tools
impl EmissiveStore {
    /// 追加一个场景的发光体
    ///
    /// 调用者负责把 subset 中的偏移改为全局偏移；
    /// `alias_table` 是只针对新场景构建的表，已有数据非空时会丢弃它并重新构建
    pub fn append(
        &mut self,
        subset: impl IntoIterator<Item = EmissiveSubsetEntry>,
        mut triangles: Vec<EmissiveTriangle>,
        mut instances: Vec<EmissiveInstance>,
        triangle_power: Vec<f32>,
        alias_table: Option<AliasTable>,
    ) {
        profile_scope!("EmissiveStore::append");
        assert_eq!(
            triangles.len(),
            triangle_power.len(),
            "EmissiveStore: every triangle needs exactly one power value"
        );

        self.subset.merge(subset);

        let triangle_base = self.triangles.len() as u32;
        let instance_base = self.instances.len() as u32;
        for instance in &mut instances {
            instance.base_triangle += triangle_base;
        }
        for triangle in &mut triangles {
            triangle.instance_index += instance_base;
        }

        let was_empty = self.triangles.is_empty();
        self.triangles.append(&mut triangles);
        self.instances.append(&mut instances);
        self.triangle_power.extend_from_slice(&triangle_power);

        self.alias_table = if was_empty { alias_table } else { self.rebuild_alias_table() };
    }

    fn rebuild_alias_table(&self) -> Option<AliasTable> {
        let mut weights = self.triangle_power.clone();
        let table = AliasTable::build(&mut weights);
        if table.is_none() {
            log::warn!("EmissiveStore: total emissive power is zero, light sampling disabled");
        }
        table
    }

    pub fn clear(&mut self) {
        self.subset.clear();
        self.triangles.clear();
        self.instances.clear();
        self.triangle_power.clear();
        self.alias_table = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(mesh_id: u64) -> EmissiveSubsetEntry {
        EmissiveSubsetEntry {
            mesh_id,
            num_indices: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_sparse_subset_sorts_and_shrinks() {
        let mut buffer = vec![EmissiveSubsetEntry::default(); 8];
        buffer[1] = entry(50);
        buffer[4] = entry(7);
        buffer[6] = entry(23);

        let subset = EmissiveSubset::from_sparse(buffer, 3);
        let ids: Vec<u64> = subset.entries().iter().map(|e| e.mesh_id).collect();
        assert_eq!(ids, vec![7, 23, 50]);

        assert_eq!(subset.find(23).map(|e| e.mesh_id), Some(23));
        assert!(subset.find(24).is_none());
        assert!(subset.find(EMISSIVE_SENTINEL_MESH_ID).is_none());
    }

    #[test]
    #[should_panic(expected = "fewer entries written")]
    fn test_sparse_subset_count_mismatch() {
        let mut buffer = vec![EmissiveSubsetEntry::default(); 4];
        buffer[0] = entry(1);
        EmissiveSubset::from_sparse(buffer, 2);
    }

    #[test]
    fn test_triangle_area() {
        let tri = EmissiveTriangle {
            v0: [0.0, 0.0, 0.0],
            v1: [2.0, 0.0, 0.0],
            v2: [0.0, 2.0, 0.0],
            ..Default::default()
        };
        assert!((tri.area() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_append_rebases_and_rebuilds_table() {
        let triangle = |instance_index| EmissiveTriangle {
            instance_index,
            ..Default::default()
        };
        let instance = |base_triangle, num_triangles| EmissiveInstance {
            base_triangle,
            num_triangles,
            ..Default::default()
        };

        let mut store = EmissiveStore::default();
        store.append(
            [entry(3)],
            vec![triangle(0), triangle(0)],
            vec![instance(0, 2)],
            vec![1.0, 1.0],
            AliasTable::build(&mut [1.0, 1.0]),
        );
        store.append([entry(1)], vec![triangle(0)], vec![instance(0, 1)], vec![2.0], None);

        assert_eq!(store.instances()[1].base_triangle, 2);
        assert_eq!(store.triangles()[2].instance_index, 1);
        assert_eq!(store.subset().entries()[0].mesh_id, 1);

        let table = store.alias_table().unwrap();
        assert_eq!(table.len(), 3);
        assert!((table.pdf(2) - 0.5).abs() < 1e-6);
    }
}
