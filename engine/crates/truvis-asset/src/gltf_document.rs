//! 把 glTF 文件转换为 [`SceneDocument`]
//!
//! 只做结构上的转换，属性的类型和步长由导入器校验

use crate::document::{
    AccessorView, AlphaModeDoc, ComponentType, ImageDoc, ImageSource, MaterialDoc, MeshDoc, NodeDoc, NodeTransform,
    PrimitiveDoc, SceneDocument, Topology,
};
use crate::error::{ImportError, Result};
use std::path::Path;
use truvis_crate_tools::profile_scope;

/// 读取 `.gltf` 或 `.glb`，外部 buffer 和 data uri 一并读入
pub fn load(path: impl AsRef<Path>) -> Result<SceneDocument> {
    let path = path.as_ref();
    profile_scope!("gltf_document::load");

    let gltf::Gltf { document, blob } = gltf::Gltf::open(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let buffers = gltf::import_buffers(&document, Some(base_dir), blob)?;

    let mut doc = SceneDocument::new(path.to_string_lossy());
    doc.buffers = buffers.into_iter().map(|data| data.0).collect();

    for mesh in document.meshes() {
        let primitives = mesh
            .primitives()
            .map(|primitive| convert_primitive(mesh.index(), &primitive))
            .collect::<Result<Vec<_>>>()?;
        doc.meshes.push(MeshDoc {
            name: mesh.name().unwrap_or_default().to_string(),
            primitives,
        });
    }
    doc.materials = document.materials().map(|material| convert_material(&material)).collect();
    doc.images = document
        .images()
        .map(|image| convert_image(&image, base_dir, &doc.buffers))
        .collect::<Result<Vec<_>>>()?;
    doc.nodes = document.nodes().map(|node| convert_node(&node)).collect();
    doc.roots = match document.default_scene().or_else(|| document.scenes().next()) {
        Some(scene) => scene.nodes().map(|node| node.index()).collect(),
        None => {
            log::warn!("gltf `{}` has no scene, using all parentless nodes as roots", doc.name);
            parentless_nodes(&doc.nodes)
        }
    };

    log::info!(
        "gltf `{}`: {} buffers, {} meshes, {} materials, {} images, {} nodes",
        doc.name,
        doc.buffers.len(),
        doc.meshes.len(),
        doc.materials.len(),
        doc.images.len(),
        doc.nodes.len()
    );
    Ok(doc)
}

fn parentless_nodes(nodes: &[NodeDoc]) -> Vec<usize> {
    let mut has_parent = vec![false; nodes.len()];
    for child in nodes.iter().flat_map(|node| &node.children) {
        if let Some(flag) = has_parent.get_mut(*child) {
            *flag = true;
        }
    }
    (0..nodes.len()).filter(|idx| !has_parent[*idx]).collect()
}

fn convert_accessor(
    mesh: usize,
    primitive: usize,
    attribute: &'static str,
    accessor: &gltf::Accessor,
) -> Result<AccessorView> {
    let view = accessor.view().ok_or_else(|| ImportError::BadAttribute {
        mesh,
        primitive,
        attribute,
        reason: "has no buffer view (sparse accessors are not supported)".to_string(),
    })?;
    let component_type = match accessor.data_type() {
        gltf::accessor::DataType::I8 => ComponentType::I8,
        gltf::accessor::DataType::U8 => ComponentType::U8,
        gltf::accessor::DataType::I16 => ComponentType::I16,
        gltf::accessor::DataType::U16 => ComponentType::U16,
        gltf::accessor::DataType::U32 => ComponentType::U32,
        gltf::accessor::DataType::F32 => ComponentType::F32,
    };

    Ok(AccessorView {
        buffer: view.buffer().index(),
        byte_offset: view.offset() + accessor.offset(),
        count: accessor.count(),
        component_type,
        dimensions: accessor.dimensions().multiplicity(),
        byte_stride: view.stride(),
    })
}

fn convert_primitive(mesh: usize, primitive: &gltf::Primitive) -> Result<PrimitiveDoc> {
    let prim = primitive.index();
    let attribute = |semantic: gltf::Semantic, name: &'static str| {
        primitive
            .get(&semantic)
            .map(|accessor| convert_accessor(mesh, prim, name, &accessor))
            .transpose()
    };

    let topology = match primitive.mode() {
        gltf::mesh::Mode::Points => Topology::Points,
        gltf::mesh::Mode::Lines => Topology::Lines,
        gltf::mesh::Mode::LineLoop => Topology::LineLoop,
        gltf::mesh::Mode::LineStrip => Topology::LineStrip,
        gltf::mesh::Mode::Triangles => Topology::Triangles,
        gltf::mesh::Mode::TriangleStrip => Topology::TriangleStrip,
        gltf::mesh::Mode::TriangleFan => Topology::TriangleFan,
    };

    Ok(PrimitiveDoc {
        positions: attribute(gltf::Semantic::Positions, "POSITION")?,
        normals: attribute(gltf::Semantic::Normals, "NORMAL")?,
        uvs: attribute(gltf::Semantic::TexCoords(0), "TEXCOORD_0")?,
        tangents: attribute(gltf::Semantic::Tangents, "TANGENT")?,
        indices: primitive
            .indices()
            .map(|accessor| convert_accessor(mesh, prim, "indices", &accessor))
            .transpose()?,
        material: primitive.material().index(),
        topology,
    })
}

fn convert_material(material: &gltf::Material) -> MaterialDoc {
    let pbr = material.pbr_metallic_roughness();
    let image_of = |texture: gltf::Texture| texture.source().index();

    MaterialDoc {
        name: material.name().unwrap_or_default().to_string(),
        base_color_factor: pbr.base_color_factor(),
        metallic_factor: pbr.metallic_factor(),
        roughness_factor: pbr.roughness_factor(),
        emissive_factor: material.emissive_factor(),
        emissive_strength: material.emissive_strength().unwrap_or(1.0),
        alpha_mode: match material.alpha_mode() {
            gltf::material::AlphaMode::Opaque => AlphaModeDoc::Opaque,
            gltf::material::AlphaMode::Mask => AlphaModeDoc::Mask,
            gltf::material::AlphaMode::Blend => AlphaModeDoc::Blend,
        },
        alpha_cutoff: material.alpha_cutoff().unwrap_or(0.5),
        double_sided: material.double_sided(),
        base_color_texture: pbr.base_color_texture().map(|info| image_of(info.texture())),
        normal_texture: material.normal_texture().map(|info| image_of(info.texture())),
        metallic_roughness_texture: pbr.metallic_roughness_texture().map(|info| image_of(info.texture())),
        emissive_texture: material.emissive_texture().map(|info| image_of(info.texture())),
    }
}

fn convert_image(image: &gltf::Image, base_dir: &Path, buffers: &[Vec<u8>]) -> Result<ImageDoc> {
    let source = match image.source() {
        gltf::image::Source::Uri { uri, .. } => ImageSource::File(base_dir.join(uri)),
        gltf::image::Source::View { view, mime_type } => {
            let buffer = view.buffer().index();
            let range = view.offset()..view.offset() + view.length();
            let bytes = buffers.get(buffer).and_then(|data| data.get(range.clone())).ok_or_else(|| {
                ImportError::InvalidReference {
                    what: "image buffer view",
                    index: range.end,
                    count: buffers.get(buffer).map_or(0, Vec::len),
                }
            })?;
            ImageSource::Memory {
                bytes: bytes.to_vec(),
                mime_type: Some(mime_type.to_string()),
            }
        }
    };
    let name = match (image.name(), &source) {
        (Some(name), _) => name.to_string(),
        (None, ImageSource::File(path)) => path.to_string_lossy().into_owned(),
        (None, ImageSource::Memory { .. }) => format!("embedded image {}", image.index()),
    };
    Ok(ImageDoc { name, source })
}

fn convert_node(node: &gltf::Node) -> NodeDoc {
    let transform = match node.transform() {
        gltf::scene::Transform::Matrix { matrix } => NodeTransform::Matrix(bytemuck::cast(matrix)),
        gltf::scene::Transform::Decomposed {
            translation,
            rotation,
            scale,
        } => NodeTransform::Trs {
            translation,
            rotation,
            scale,
        },
    };
    NodeDoc {
        name: node.name().unwrap_or_default().to_string(),
        transform,
        mesh: node.mesh().map(|mesh| mesh.index()),
        children: node.children().map(|child| child.index()).collect(),
    }
}
