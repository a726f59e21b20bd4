//! mesh worker：解码顶点属性，写入共享的 vertex / index / mesh buffer

use super::context::{ImportContext, MeshBuffers, MeshWorkerOutput};
use super::handedness::flip_z;
use crate::document::{AccessorView, ComponentType, PrimitiveDoc, SceneDocument, Topology};
use crate::error::{ImportError, Result};
use glam::{Vec2, Vec3};
use std::ops::Range;
use truvis_crate_tools::profile_scope;
use truvis_scene::aabb::Aabb;
use truvis_scene::emissive::EmissiveSubsetEntry;
use truvis_scene::mesh::{MeshDesc, Vertex};
use truvis_utils::id_hash::{self, INVALID_ID};

/// 出错时用于定位的 (mesh, primitive)
#[derive(Clone, Copy)]
struct PrimitiveRef {
    mesh: usize,
    primitive: usize,
}
impl PrimitiveRef {
    fn bad(self, attribute: &'static str, reason: impl Into<String>) -> ImportError {
        ImportError::BadAttribute {
            mesh: self.mesh,
            primitive: self.primitive,
            attribute,
            reason: reason.into(),
        }
    }
}

/// 解码之后、尚未转换坐标系的 primitive
struct DecodedPrimitive {
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    uvs: Vec<[f32; 2]>,
    tangents: Vec<[f32; 4]>,
    indices: Vec<u32>,
}

pub(crate) fn run_mesh_worker<'b>(
    ctx: &ImportContext,
    buffers: &'b MeshBuffers,
    meshes: Range<usize>,
) -> Result<MeshWorkerOutput<'b>> {
    profile_scope!("import::mesh_worker");
    let doc = ctx.doc;

    let primitives: Vec<(PrimitiveRef, &PrimitiveDoc)> = meshes
        .clone()
        .flat_map(|mesh| {
            doc.meshes[mesh]
                .primitives
                .iter()
                .enumerate()
                .map(move |(primitive, prim)| (PrimitiveRef { mesh, primitive }, prim))
        })
        .collect();

    for (prim_ref, prim) in &primitives {
        if prim.topology != Topology::Triangles {
            return Err(ImportError::UnsupportedTopology {
                mesh: prim_ref.mesh,
                primitive: prim_ref.primitive,
                topology: prim.topology,
            });
        }
        if prim.positions.is_none() {
            return Err(ImportError::MissingAttribute {
                mesh: prim_ref.mesh,
                primitive: prim_ref.primitive,
                attribute: "POSITION",
            });
        }
    }

    let num_vertices: usize = primitives.iter().map(|(_, p)| p.vertex_count()).sum();
    let num_indices: usize = primitives.iter().map(|(_, p)| p.index_count()).sum();

    // 每个 buffer 只做一次原子预留
    let mut vertices = buffers.vertices.reserve(num_vertices);
    let mut indices = buffers.indices.reserve(num_indices);
    let mut mesh_descs = buffers.meshes.reserve(primitives.len());
    let mut emissive = buffers.emissive.reserve(primitives.len());

    let mut vertex_cursor = 0;
    let mut index_cursor = 0;
    let mut num_emissive = 0;
    for (slot, (prim_ref, prim)) in primitives.iter().enumerate() {
        let decoded = decode_primitive(doc, *prim_ref, prim)?;
        let nv = decoded.positions.len();
        let ni = decoded.indices.len();

        let dst_vertices = &mut vertices[vertex_cursor..vertex_cursor + nv];
        let aabb = write_vertices(&decoded, dst_vertices);
        // z 翻转之后交换 1、2 保持正面的绕序
        for (dst, tri) in indices[index_cursor..index_cursor + ni]
            .chunks_exact_mut(3)
            .zip(decoded.indices.chunks_exact(3))
        {
            dst.copy_from_slice(&[tri[0], tri[2], tri[1]]);
        }

        let mesh_id = id_hash::mesh_id(ctx.scene_id, prim_ref.mesh, prim_ref.primitive);
        let base_vertex = (vertices.base() + vertex_cursor) as u32;
        let base_index = (indices.base() + index_cursor) as u32;
        mesh_descs[slot] = MeshDesc {
            mesh_id,
            base_vertex,
            base_index,
            num_vertices: nv as u32,
            num_indices: ni as u32,
            material_id: prim
                .material
                .map_or(INVALID_ID, |material| id_hash::material_id(ctx.scene_id, material)),
            aabb,
        };

        if let Some(material) = prim.material.filter(|m| doc.materials[*m].is_emissive()) {
            emissive[slot] = EmissiveSubsetEntry {
                mesh_id,
                base_vertex,
                base_index,
                num_indices: ni as u32,
                material_index: material as u32,
            };
            num_emissive += 1;
        }

        vertex_cursor += nv;
        index_cursor += ni;
    }
    debug_assert_eq!(vertex_cursor, vertices.len());
    debug_assert_eq!(index_cursor, indices.len());

    log::debug!(
        "mesh worker {meshes:?}: {} primitives, {num_vertices} vertices, {num_emissive} emissive",
        primitives.len()
    );

    Ok(MeshWorkerOutput {
        vertices,
        indices,
        emissive,
        num_emissive,
    })
}

fn decode_primitive(doc: &SceneDocument, prim_ref: PrimitiveRef, prim: &PrimitiveDoc) -> Result<DecodedPrimitive> {
    let Some(position_view) = prim.positions else {
        return Err(ImportError::MissingAttribute {
            mesh: prim_ref.mesh,
            primitive: prim_ref.primitive,
            attribute: "POSITION",
        });
    };
    let positions: Vec<[f32; 3]> = read_floats(doc, prim_ref, "POSITION", &position_view)?;
    let num_vertices = positions.len();

    let indices = match prim.indices {
        Some(view) => read_indices(doc, prim_ref, &view)?,
        None => (0..num_vertices as u32).collect(),
    };
    if indices.len() % 3 != 0 {
        return Err(prim_ref.bad("indices", format!("count {} is not a multiple of 3", indices.len())));
    }
    if let Some(bad) = indices.iter().find(|i| **i as usize >= num_vertices) {
        return Err(prim_ref.bad("indices", format!("index {bad} exceeds vertex count {num_vertices}")));
    }

    let normals = match read_vertex_attribute(doc, prim_ref, "NORMAL", prim.normals, num_vertices)? {
        Some(normals) => normals,
        None => compute_normals(&positions, &indices),
    };
    let uvs = read_vertex_attribute(doc, prim_ref, "TEXCOORD_0", prim.uvs, num_vertices)?
        .unwrap_or_else(|| vec![[0.0; 2]; num_vertices]);
    let tangents = match read_vertex_attribute(doc, prim_ref, "TANGENT", prim.tangents, num_vertices)? {
        Some(tangents) => tangents,
        None => compute_tangents(&positions, &normals, &uvs, &indices),
    };

    Ok(DecodedPrimitive {
        positions,
        normals,
        uvs,
        tangents,
        indices,
    })
}

/// 校验类型、步长和范围，返回紧密排列的字节
fn accessor_bytes<'d>(
    doc: &'d SceneDocument,
    prim_ref: PrimitiveRef,
    attribute: &'static str,
    view: &AccessorView,
    expected: ComponentType,
) -> Result<&'d [u8]> {
    if view.component_type != expected {
        return Err(prim_ref.bad(
            attribute,
            format!("must be {expected:?}, found {:?}", view.component_type),
        ));
    }
    let element_size = view.element_size();
    if let Some(stride) = view.byte_stride.filter(|stride| *stride != element_size) {
        return Err(prim_ref.bad(
            attribute,
            format!("must be tightly packed, stride is {stride} for {element_size}-byte elements"),
        ));
    }
    let Some(buffer) = doc.buffers.get(view.buffer) else {
        return Err(prim_ref.bad(attribute, format!("references missing buffer {}", view.buffer)));
    };
    let end = view.byte_offset + view.count * element_size;
    if end > buffer.len() {
        return Err(prim_ref.bad(
            attribute,
            format!("range {}..{end} exceeds buffer size {}", view.byte_offset, buffer.len()),
        ));
    }
    Ok(&buffer[view.byte_offset..end])
}

fn read_floats<const N: usize>(
    doc: &SceneDocument,
    prim_ref: PrimitiveRef,
    attribute: &'static str,
    view: &AccessorView,
) -> Result<Vec<[f32; N]>> {
    if view.dimensions != N {
        return Err(prim_ref.bad(attribute, format!("must have {N} components, found {}", view.dimensions)));
    }
    let bytes = accessor_bytes(doc, prim_ref, attribute, view, ComponentType::F32)?;
    Ok(bytes
        .chunks_exact(N * 4)
        .map(|element| std::array::from_fn(|c| bytemuck::pod_read_unaligned::<f32>(&element[c * 4..c * 4 + 4])))
        .collect())
}

/// 可选的逐顶点属性，数量必须与 POSITION 一致
fn read_vertex_attribute<const N: usize>(
    doc: &SceneDocument,
    prim_ref: PrimitiveRef,
    attribute: &'static str,
    view: Option<AccessorView>,
    num_vertices: usize,
) -> Result<Option<Vec<[f32; N]>>> {
    let Some(view) = view else {
        return Ok(None);
    };
    if view.count != num_vertices {
        return Err(prim_ref.bad(
            attribute,
            format!("has {} elements, POSITION has {num_vertices}", view.count),
        ));
    }
    read_floats(doc, prim_ref, attribute, &view).map(Some)
}

fn read_indices(doc: &SceneDocument, prim_ref: PrimitiveRef, view: &AccessorView) -> Result<Vec<u32>> {
    if view.dimensions != 1 {
        return Err(prim_ref.bad("indices", format!("must be scalar, found {} components", view.dimensions)));
    }
    let indices = match view.component_type {
        ComponentType::U8 => accessor_bytes(doc, prim_ref, "indices", view, ComponentType::U8)?
            .iter()
            .map(|i| *i as u32)
            .collect(),
        ComponentType::U16 => accessor_bytes(doc, prim_ref, "indices", view, ComponentType::U16)?
            .chunks_exact(2)
            .map(|c| bytemuck::pod_read_unaligned::<u16>(c) as u32)
            .collect(),
        ComponentType::U32 => accessor_bytes(doc, prim_ref, "indices", view, ComponentType::U32)?
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<u32>)
            .collect(),
        other => return Err(prim_ref.bad("indices", format!("must be unsigned, found {other:?}"))),
    };
    Ok(indices)
}

/// 转换到引擎坐标系并写入，返回物体空间包围盒
fn write_vertices(decoded: &DecodedPrimitive, dst: &mut [Vertex]) -> Aabb {
    let mut aabb = Aabb::EMPTY;
    for (i, vertex) in dst.iter_mut().enumerate() {
        let position = flip_z(decoded.positions[i]);
        let [tx, ty, tz, tw] = decoded.tangents[i];
        let [tx, ty, tz] = flip_z([tx, ty, tz]);
        *vertex = Vertex {
            position,
            normal: flip_z(decoded.normals[i]),
            uv: decoded.uvs[i],
            // 镜像之后副切线的方向相反
            tangent: [tx, ty, tz, -tw],
        };
        aabb.extend(Vec3::from(position));
    }
    aabb
}

/// 面积加权的顶点法线
pub(crate) fn compute_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(positions[i as usize]));
        let n = (b - a).cross(c - a);
        for i in tri {
            normals[*i as usize] += n;
        }
    }
    normals
        .into_iter()
        .map(|n| {
            let n = n.normalize_or_zero();
            if n == Vec3::ZERO { Vec3::Y.to_array() } else { n.to_array() }
        })
        .collect()
}

fn any_orthonormal(n: Vec3) -> Vec3 {
    let axis = if n.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
    n.cross(axis).normalize()
}

/// 按三角形的 uv 梯度累加切线，再对法线做 Gram-Schmidt 正交化
pub(crate) fn compute_tangents(
    positions: &[[f32; 3]],
    normals: &[[f32; 3]],
    uvs: &[[f32; 2]],
    indices: &[u32],
) -> Vec<[f32; 4]> {
    let mut tangents = vec![Vec3::ZERO; positions.len()];
    let mut bitangents = vec![Vec3::ZERO; positions.len()];

    for tri in indices.chunks_exact(3) {
        let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let e1 = Vec3::from(positions[i1]) - Vec3::from(positions[i0]);
        let e2 = Vec3::from(positions[i2]) - Vec3::from(positions[i0]);
        let d1 = Vec2::from(uvs[i1]) - Vec2::from(uvs[i0]);
        let d2 = Vec2::from(uvs[i2]) - Vec2::from(uvs[i0]);

        let det = d1.x * d2.y - d2.x * d1.y;
        if det.abs() < 1e-12 {
            continue;
        }
        let r = 1.0 / det;
        let t = (e1 * d2.y - e2 * d1.y) * r;
        let b = (e2 * d1.x - e1 * d2.x) * r;
        for i in [i0, i1, i2] {
            tangents[i] += t;
            bitangents[i] += b;
        }
    }

    (0..positions.len())
        .map(|i| {
            let n = Vec3::from(normals[i]);
            let t = tangents[i] - n * n.dot(tangents[i]);
            let t = if t.length_squared() < 1e-12 { any_orthonormal(n) } else { t.normalize() };
            let w = if n.cross(t).dot(bitangents[i]) < 0.0 { -1.0 } else { 1.0 };
            [t.x, t.y, t.z, w]
        })
        .collect()
}
