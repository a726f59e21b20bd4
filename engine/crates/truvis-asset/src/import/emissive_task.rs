//! 发光体：子集整理、发光 instance、三角形功率与 alias table

use super::context::{EmissiveGeometry, ImportContext, MeshWorkerOutput, TaskOutputs};
use super::handedness::node_local_transform;
use crate::error::Result;
use crate::texture_loader::DecodedTexture;
use glam::{Mat4, Vec2, Vec3};
use itertools::Itertools;
use rayon::prelude::*;
use truvis_crate_tools::profile_scope;
use truvis_scene::emissive::{EmissiveInstance, EmissiveSubset, EmissiveTriangle};
use truvis_scene::mesh::Vertex;
use truvis_utils::alias_table::AliasTable;
use truvis_utils::id_hash;

/// 汇总所有 mesh worker 写入的发光 primitive，排序并截掉空槽位
pub(crate) fn finalize_subset(outputs: &TaskOutputs) -> EmissiveSubset {
    profile_scope!("import::emissive_subset");

    let workers = outputs.mesh_workers.lock();
    let count: usize = workers.iter().map(|w| w.num_emissive).sum();
    let entries = workers
        .iter()
        .sorted_by_key(|w| w.emissive.base())
        .flat_map(|w| w.emissive.iter().copied())
        .collect_vec();

    let subset = EmissiveSubset::from_sparse(entries, count);
    log::debug!("emissive subset: {} of {} primitives", subset.len(), buffer_len(&workers));
    subset
}

fn buffer_len(workers: &[MeshWorkerOutput]) -> usize {
    workers.iter().map(|w| w.emissive.len()).sum()
}

/// 按全局偏移读取各个 worker 写好的顶点与索引
struct GeometryView<'w> {
    vertices: Vec<(usize, &'w [Vertex])>,
    indices: Vec<(usize, &'w [u32])>,
}
impl<'w> GeometryView<'w> {
    fn new(workers: &'w [MeshWorkerOutput]) -> Self {
        Self {
            vertices: Self::sorted_ranges(workers.iter().map(|w| (w.vertices.base(), &*w.vertices))),
            indices: Self::sorted_ranges(workers.iter().map(|w| (w.indices.base(), &*w.indices))),
        }
    }

    fn sorted_ranges<T>(ranges: impl Iterator<Item = (usize, &'w [T])>) -> Vec<(usize, &'w [T])> {
        ranges.filter(|(_, data)| !data.is_empty()).sorted_by_key(|(base, _)| *base).collect_vec()
    }

    /// 从 `offset` 开始的数据，直到所在区间的末尾
    fn tail<T>(ranges: &[(usize, &'w [T])], offset: usize) -> &'w [T] {
        let idx = ranges.partition_point(|(base, _)| *base <= offset);
        assert!(idx > 0, "GeometryView: offset {offset} was never written");
        let (base, data) = ranges[idx - 1];
        &data[offset - base..]
    }
}

/// 第二次遍历节点树：为每个引用了发光 primitive 的节点生成发光 instance 和世界空间的三角形
pub(crate) fn emit_emissive_instances(ctx: &ImportContext, outputs: &TaskOutputs) -> Result<EmissiveGeometry> {
    profile_scope!("import::emissive_instances");
    let doc = ctx.doc;
    let subset = TaskOutputs::get(&outputs.emissive_subset, "emissive subset");
    let materials = TaskOutputs::get(&outputs.materials, "materials");

    let mut geometry = EmissiveGeometry::default();
    if subset.is_empty() {
        return Ok(geometry);
    }

    let workers = outputs.mesh_workers.lock();
    let view = GeometryView::new(&workers);

    let mut stack: Vec<(usize, Mat4)> = doc.roots.iter().rev().map(|root| (*root, Mat4::IDENTITY)).collect();
    while let Some((node_idx, parent_world)) = stack.pop() {
        let node = &doc.nodes[node_idx];
        let world = parent_world * node_local_transform(doc, node_idx)?.to_mat4();
        stack.extend(node.children.iter().rev().map(|child| (*child, world)));

        let Some(mesh_idx) = node.mesh else {
            continue;
        };
        for prim_idx in 0..doc.meshes[mesh_idx].primitives.len() {
            let mesh_id = id_hash::mesh_id(ctx.scene_id, mesh_idx, prim_idx);
            let Some(entry) = subset.find(mesh_id) else {
                continue;
            };

            let material_idx = entry.material_index as usize;
            let (material_id, material) = &materials[material_idx];
            let instance_index = geometry.instances.len() as u32;
            let base_triangle = geometry.triangles.len() as u32;

            let vertices = GeometryView::tail(&view.vertices, entry.base_vertex as usize);
            let indices = &GeometryView::tail(&view.indices, entry.base_index as usize)[..entry.num_indices as usize];
            let packed_emissive = material.packed_emissive();

            geometry.triangles.extend(indices.chunks_exact(3).map(|tri| {
                let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| &vertices[i as usize]);
                let to_world = |v: &Vertex| world.transform_point3(Vec3::from(v.position)).to_array();
                EmissiveTriangle {
                    v0: to_world(a),
                    v1: to_world(b),
                    v2: to_world(c),
                    uv0: a.uv,
                    uv1: b.uv,
                    uv2: c.uv,
                    packed_emissive,
                    emissive_strength: material.emissive_strength,
                    instance_index,
                }
            }));

            geometry.instances.push(EmissiveInstance {
                instance_id: id_hash::instance_id(ctx.scene_id, node_idx, Some((mesh_idx, prim_idx))),
                mesh_id,
                base_triangle,
                num_triangles: entry.num_indices / 3,
                material_id: *material_id,
            });
            geometry.instance_materials.push(material_idx);
        }
    }

    log::debug!(
        "emissive instances: {} instances, {} triangles",
        geometry.instances.len(),
        geometry.triangles.len()
    );
    Ok(geometry)
}

#[inline]
fn luminance(rgb: Vec3) -> f32 {
    rgb.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

/// 在三个顶点和重心处采样发光贴图，取平均亮度
fn texture_estimate(texture: &DecodedTexture, tri: &EmissiveTriangle) -> f32 {
    let [uv0, uv1, uv2] = [tri.uv0, tri.uv1, tri.uv2].map(Vec2::from);
    let centroid = (uv0 + uv1 + uv2) / 3.0;
    [uv0, uv1, uv2, centroid]
        .into_iter()
        .map(|uv| luminance(texture.sample_rgb(uv.to_array())))
        .sum::<f32>()
        / 4.0
}

/// 估计每个发光三角形的功率，并据此构建 alias table
///
/// 功率 = 发光颜色的亮度 × 强度 × 发光贴图的估计 × 世界空间面积
pub(crate) fn build_light_sampling(ctx: &ImportContext, outputs: &TaskOutputs) -> (Vec<f32>, Option<AliasTable>) {
    profile_scope!("import::emissive_power");
    let doc = ctx.doc;
    let geometry = TaskOutputs::get(&outputs.emissive, "emissive instances");

    let power: Vec<f32> = geometry
        .triangles
        .par_iter()
        .map(|tri| {
            let material = &doc.materials[geometry.instance_materials[tri.instance_index as usize]];
            let radiance = luminance(Vec3::from(material.emissive_factor)) * material.emissive_strength;
            let texture = material
                .emissive_texture
                .and_then(|image| outputs.textures[image].get()?.pixels.as_ref())
                .map_or(1.0, |texture| texture_estimate(texture, tri));
            radiance * texture * tri.area()
        })
        .collect();

    if power.is_empty() {
        return (power, None);
    }

    let mut weights = power.clone();
    let table = AliasTable::build(&mut weights);
    match &table {
        Some(table) => log::info!("light sampling: alias table over {} emissive triangles", table.len()),
        None => log::warn!(
            "light sampling: all {} emissive triangles have zero power, light sampling disabled",
            power.len()
        ),
    }
    (power, table)
}
