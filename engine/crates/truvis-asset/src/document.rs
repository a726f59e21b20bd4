//! 与具体文件格式无关的场景描述
//!
//! 顶点属性以原始字节的形式存放在 buffer 中，由 [`AccessorView`] 描述其布局，
//! 导入器负责校验类型、维度和步长。

use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentType {
    I8,
    U8,
    I16,
    U16,
    U32,
    F32,
}
impl ComponentType {
    #[inline]
    pub fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::U32 | Self::F32 => 4,
        }
    }
}

/// buffer 中一段带类型的数据
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessorView {
    pub buffer: usize,
    pub byte_offset: usize,
    /// 元素数量
    pub count: usize,
    pub component_type: ComponentType,
    /// 每个元素的分量数量，例如 position 为 3
    pub dimensions: usize,
    /// None 表示紧密排列
    pub byte_stride: Option<usize>,
}
impl AccessorView {
    #[inline]
    pub fn element_size(&self) -> usize {
        self.component_type.size() * self.dimensions
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Topology {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
}

#[derive(Clone, Debug, Default)]
pub struct PrimitiveDoc {
    pub positions: Option<AccessorView>,
    pub normals: Option<AccessorView>,
    pub uvs: Option<AccessorView>,
    pub tangents: Option<AccessorView>,
    pub indices: Option<AccessorView>,
    pub material: Option<usize>,
    pub topology: Topology,
}
impl PrimitiveDoc {
    /// 没有 position 时为 0，由导入器报错
    pub fn vertex_count(&self) -> usize {
        self.positions.map_or(0, |p| p.count)
    }

    /// 没有 index 时每个顶点对应一个 index
    pub fn index_count(&self) -> usize {
        self.indices.map_or(self.vertex_count(), |i| i.count)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MeshDoc {
    pub name: String,
    pub primitives: Vec<PrimitiveDoc>,
}

/// 右手坐标系下的节点变换
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodeTransform {
    /// 列主序
    Matrix([f32; 16]),
    Trs {
        translation: [f32; 3],
        /// (x, y, z, w)
        rotation: [f32; 4],
        scale: [f32; 3],
    },
}
impl Default for NodeTransform {
    fn default() -> Self {
        Self::Trs {
            translation: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NodeDoc {
    pub name: String,
    pub transform: NodeTransform,
    pub mesh: Option<usize>,
    pub children: Vec<usize>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlphaModeDoc {
    #[default]
    Opaque,
    Mask,
    Blend,
}

/// 材质参数，贴图使用 image 的下标
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialDoc {
    pub name: String,
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub emissive_factor: [f32; 3],
    pub emissive_strength: f32,
    pub alpha_mode: AlphaModeDoc,
    pub alpha_cutoff: f32,
    pub double_sided: bool,

    pub base_color_texture: Option<usize>,
    pub normal_texture: Option<usize>,
    pub metallic_roughness_texture: Option<usize>,
    pub emissive_texture: Option<usize>,
}
impl Default for MaterialDoc {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color_factor: [1.0; 4],
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            emissive_factor: [0.0; 3],
            emissive_strength: 1.0,
            alpha_mode: AlphaModeDoc::Opaque,
            alpha_cutoff: 0.5,
            double_sided: false,
            base_color_texture: None,
            normal_texture: None,
            metallic_roughness_texture: None,
            emissive_texture: None,
        }
    }
}
impl MaterialDoc {
    #[inline]
    pub fn is_emissive(&self) -> bool {
        self.emissive_strength > 0.0 && self.emissive_factor.iter().any(|c| *c > 0.0)
    }

    /// 依次为 base color, normal, metallic-roughness, emissive
    pub fn textures(&self) -> [Option<usize>; 4] {
        [
            self.base_color_texture,
            self.normal_texture,
            self.metallic_roughness_texture,
            self.emissive_texture,
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSource {
    File(PathBuf),
    /// 内嵌在场景文件中的已编码图片
    Memory { bytes: Vec<u8>, mime_type: Option<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageDoc {
    pub name: String,
    pub source: ImageSource,
}

/// 解析之后的场景
#[derive(Clone, Debug, Default)]
pub struct SceneDocument {
    /// 一般是文件路径，用于生成场景 ID
    pub name: String,
    pub buffers: Vec<Vec<u8>>,
    pub meshes: Vec<MeshDoc>,
    pub materials: Vec<MaterialDoc>,
    pub images: Vec<ImageDoc>,
    pub nodes: Vec<NodeDoc>,
    /// 顶层节点
    pub roots: Vec<usize>,
}
impl SceneDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 把一组紧密排列的数据追加到第 0 个 buffer 的末尾
    pub fn push_attribute<T: bytemuck::Pod>(
        &mut self,
        data: &[T],
        component_type: ComponentType,
        dimensions: usize,
    ) -> AccessorView {
        let element_size = component_type.size() * dimensions;
        let bytes: &[u8] = bytemuck::cast_slice(data);
        assert_eq!(
            bytes.len() % element_size,
            0,
            "SceneDocument: attribute data is not a whole number of elements"
        );

        if self.buffers.is_empty() {
            self.buffers.push(Vec::new());
        }
        let buffer = &mut self.buffers[0];
        // 对齐到 4 字节
        buffer.resize(buffer.len().next_multiple_of(4), 0);
        let byte_offset = buffer.len();
        buffer.extend_from_slice(bytes);

        AccessorView {
            buffer: 0,
            byte_offset,
            count: bytes.len() / element_size,
            component_type,
            dimensions,
            byte_stride: None,
        }
    }
}

impl ImageDoc {
    /// 内嵌的图片返回 None
    pub fn source_path(&self) -> Option<&std::path::Path> {
        match &self.source {
            ImageSource::File(path) => Some(path),
            ImageSource::Memory { .. } => None,
        }
    }
}
