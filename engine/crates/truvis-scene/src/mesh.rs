use crate::aabb::Aabb;
use truvis_crate_tools::profile_scope;
use truvis_utils::id_hash::INVALID_ID;
use truvis_utils::id_map::IdMap;

/// 交错排列的顶点，布局与 shader 端一致
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    /// w 分量是副切线的方向 (±1)
    pub tangent: [f32; 4],
}

/// 一个 mesh primitive 在共享 vertex / index buffer 中的位置
///
/// index 是相对 `base_vertex` 的局部下标
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshDesc {
    pub mesh_id: u64,
    pub base_vertex: u32,
    pub base_index: u32,
    pub num_vertices: u32,
    pub num_indices: u32,
    pub material_id: u64,
    /// 物体空间包围盒
    pub aabb: Aabb,
}
impl Default for MeshDesc {
    fn default() -> Self {
        Self {
            mesh_id: INVALID_ID,
            base_vertex: 0,
            base_index: 0,
            num_vertices: 0,
            num_indices: 0,
            material_id: INVALID_ID,
            aabb: Aabb::EMPTY,
        }
    }
}
impl MeshDesc {
    #[inline]
    pub fn num_triangles(&self) -> u32 {
        self.num_indices / 3
    }
}

/// 所有场景的顶点、索引以及 mesh 表
pub struct MeshStore {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    meshes: Vec<MeshDesc>,
    /// mesh id -> `meshes` 中的下标
    index: IdMap<u32>,
}
// new & init
impl MeshStore {
    pub fn new(id_map_min_buckets: usize) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            meshes: Vec::new(),
            index: IdMap::with_min_buckets(id_map_min_buckets),
        }
    }
}
// getter
impl MeshStore {
    #[inline]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    #[inline]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    #[inline]
    pub fn meshes(&self) -> &[MeshDesc] {
        &self.meshes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn get(&self, mesh_id: u64) -> Option<&MeshDesc> {
        let idx = *self.index.find(mesh_id)?;
        let mesh = &self.meshes[idx as usize];
        assert_eq!(mesh.mesh_id, mesh_id, "MeshStore: index points at a different mesh");
        Some(mesh)
    }

    #[inline]
    pub fn contains(&self, mesh_id: u64) -> bool {
        self.index.contains(mesh_id)
    }

    /// mesh 的顶点和索引
    pub fn geometry(&self, mesh_id: u64) -> Option<(&[Vertex], &[u32])> {
        let mesh = self.get(mesh_id)?;
        let vertices = &self.vertices[mesh.base_vertex as usize..][..mesh.num_vertices as usize];
        let indices = &self.indices[mesh.base_index as usize..][..mesh.num_indices as usize];
        Some((vertices, indices))
    }
}
// tools
impl MeshStore {
    /// 追加一个场景的数据，mesh 的偏移会加上已有数据的长度
    ///
    /// # return
    /// (vertex 基址, index 基址)
    pub fn append(&mut self, vertices: Vec<Vertex>, indices: Vec<u32>, meshes: Vec<MeshDesc>) -> (u32, u32) {
        profile_scope!("MeshStore::append");

        let vertex_base = self.vertices.len() as u32;
        let index_base = self.indices.len() as u32;

        if self.vertices.is_empty() {
            self.vertices = vertices;
        } else {
            self.vertices.extend_from_slice(&vertices);
        }
        if self.indices.is_empty() {
            self.indices = indices;
        } else {
            self.indices.extend_from_slice(&indices);
        }

        self.index.reserve(self.meshes.len() + meshes.len());
        self.meshes.reserve(meshes.len());
        for mut mesh in meshes {
            mesh.base_vertex += vertex_base;
            mesh.base_index += index_base;

            let slot = self.meshes.len() as u32;
            let inserted = self.index.insert_if_absent(mesh.mesh_id, || slot);
            assert!(inserted, "MeshStore: mesh {:#018x} is already registered", mesh.mesh_id);
            self.meshes.push(mesh);
        }

        (vertex_base, index_base)
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
        self.meshes.clear();
        self.index.clear();
    }
}
