use crate::emissive::{EmissiveInstance, EmissiveSubset, EmissiveTriangle};
use crate::material::Material;
use crate::mesh::{MeshDesc, Vertex};
use crate::rt_flags::{RtAsSubgroup, RtMeshMode};
use crate::transform::AffineTransform;
use truvis_utils::alias_table::AliasTable;

/// 等待插入场景图的 instance
#[derive(Clone, Debug)]
pub struct StagedInstance {
    pub id: u64,
    /// 顶层节点为 `INVALID_ID`
    pub parent_id: u64,
    pub level: usize,
    pub local_transform: AffineTransform,
    /// 没有 mesh 时为 `INVALID_ID`
    pub mesh_id: u64,
    pub rt_mode: RtMeshMode,
    pub rt_mask: RtAsSubgroup,
    pub is_opaque: bool,
}

/// 一次导入的全部产出
///
/// 其中的偏移都是相对本次导入的 buffer 起点，提交到 `SceneCore` 时才换算成全局偏移
#[derive(Default)]
pub struct ImportedScene {
    pub scene_id: u64,
    pub name: String,

    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub meshes: Vec<MeshDesc>,
    /// (material id, material)，subset 中的 `material_index` 指向这里的下标
    pub materials: Vec<(u64, Material)>,

    /// 按层级排序，同一层内父节点相同的 instance 相邻
    pub instances: Vec<StagedInstance>,

    pub emissive_subset: EmissiveSubset,
    pub emissive_triangles: Vec<EmissiveTriangle>,
    pub emissive_instances: Vec<EmissiveInstance>,
    pub triangle_power: Vec<f32>,
    pub alias_table: Option<AliasTable>,
}
impl ImportedScene {
    /// 每一层的 instance 数量
    pub fn instances_per_level(&self) -> Vec<usize> {
        let mut counts = Vec::new();
        for instance in &self.instances {
            if counts.len() <= instance.level {
                counts.resize(instance.level + 1, 0);
            }
            counts[instance.level] += 1;
        }
        counts
    }
}
