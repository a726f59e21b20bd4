use crate::handles::GpuHandle;
use glam::{Vec3, Vec4};
use truvis_utils::id_map::IdMap;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlphaMode {
    #[default]
    Opaque,
    Mask,
    Blend,
}

/// CPU 侧的材质数据
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub base_color: Vec4,
    pub emissive: Vec3,
    /// KHR_materials_emissive_strength
    pub emissive_strength: f32,
    pub metallic: f32,
    pub roughness: f32,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub double_sided: bool,

    // 贴图加载失败时为 None
    pub base_color_map: Option<GpuHandle>,
    pub normal_map: Option<GpuHandle>,
    pub metallic_roughness_map: Option<GpuHandle>,
    pub emissive_map: Option<GpuHandle>,
}
impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            emissive: Vec3::ZERO,
            emissive_strength: 1.0,
            metallic: 1.0,
            roughness: 1.0,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            double_sided: false,
            base_color_map: None,
            normal_map: None,
            metallic_roughness_map: None,
            emissive_map: None,
        }
    }
}
impl Material {
    #[inline]
    pub fn is_emissive(&self) -> bool {
        self.emissive_strength > 0.0 && self.emissive.max_element() > 0.0
    }

    #[inline]
    pub fn is_opaque(&self) -> bool {
        self.alpha_mode == AlphaMode::Opaque
    }

    /// 发光颜色打包为 RGB8，bit 24 表示双面发光
    pub fn packed_emissive(&self) -> u32 {
        let to_u8 = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u32;
        to_u8(self.emissive.x)
            | (to_u8(self.emissive.y) << 8)
            | (to_u8(self.emissive.z) << 16)
            | (u32::from(self.double_sided) << 24)
    }
}

/// 按提交顺序排列的材质，同时可以按 id 查找
pub struct MaterialStore {
    ids: Vec<u64>,
    materials: Vec<Material>,
    index: IdMap<u32>,
}
// new & init
impl MaterialStore {
    pub fn new(id_map_min_buckets: usize) -> Self {
        Self {
            ids: Vec::new(),
            materials: Vec::new(),
            index: IdMap::with_min_buckets(id_map_min_buckets),
        }
    }
}
// getter
impl MaterialStore {
    #[inline]
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    #[inline]
    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// 材质在 [`Self::materials`] 中的下标
    #[inline]
    pub fn index_of(&self, material_id: u64) -> Option<u32> {
        self.index.find(material_id).copied()
    }

    pub fn get(&self, material_id: u64) -> Option<&Material> {
        self.index_of(material_id).map(|idx| &self.materials[idx as usize])
    }

    #[inline]
    pub fn contains(&self, material_id: u64) -> bool {
        self.index.contains(material_id)
    }
}
// tools
impl MaterialStore {
    /// # return
    /// 第一个新材质的下标
    pub fn append(&mut self, materials: Vec<(u64, Material)>) -> u32 {
        let base = self.materials.len() as u32;
        self.index.reserve(self.materials.len() + materials.len());
        for (id, material) in materials {
            let slot = self.materials.len() as u32;
            let inserted = self.index.insert_if_absent(id, || slot);
            assert!(inserted, "MaterialStore: material {id:#018x} is already registered");
            self.ids.push(id);
            self.materials.push(material);
        }
        base
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.materials.clear();
        self.index.clear();
    }
}
