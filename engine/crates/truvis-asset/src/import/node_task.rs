//! 节点树展开为按层级排列的 instance

use super::context::ImportContext;
use super::handedness::node_local_transform;
use crate::document::{AlphaModeDoc, SceneDocument};
use crate::error::Result;
use std::collections::VecDeque;
use truvis_crate_tools::profile_scope;
use truvis_scene::imported::StagedInstance;
use truvis_scene::rt_flags::{RtAsSubgroup, RtMeshMode};
use truvis_utils::id_hash::{self, INVALID_ID};

/// 广度优先展开节点树，同一父节点的 instance 在结果中相邻
///
/// 带 mesh 的节点每个 primitive 生成一个 instance，子节点挂在第一个 primitive 的 instance 下
pub(crate) fn stage_instances(ctx: &ImportContext) -> Result<Vec<StagedInstance>> {
    profile_scope!("import::node_instances");
    let doc = ctx.doc;

    let mut instances = Vec::new();
    let mut queue: VecDeque<(usize, usize, u64)> = doc.roots.iter().map(|root| (*root, 0, INVALID_ID)).collect();
    while let Some((node_idx, level, parent_id)) = queue.pop_front() {
        let node = &doc.nodes[node_idx];
        let local_transform = node_local_transform(doc, node_idx)?;

        let primitives = node.mesh.map_or(0, |mesh| doc.meshes[mesh].primitives.len());
        let first_id = instances.len();
        match node.mesh {
            Some(mesh_idx) if primitives > 0 => {
                for prim_idx in 0..primitives {
                    let (rt_mask, is_opaque) = primitive_flags(doc, mesh_idx, prim_idx);
                    instances.push(StagedInstance {
                        id: id_hash::instance_id(ctx.scene_id, node_idx, Some((mesh_idx, prim_idx))),
                        parent_id,
                        level,
                        local_transform,
                        mesh_id: id_hash::mesh_id(ctx.scene_id, mesh_idx, prim_idx),
                        rt_mode: RtMeshMode::Static,
                        rt_mask,
                        is_opaque,
                    });
                }
            }
            _ => instances.push(StagedInstance {
                id: id_hash::instance_id(ctx.scene_id, node_idx, None),
                parent_id,
                level,
                local_transform,
                mesh_id: INVALID_ID,
                rt_mode: RtMeshMode::Static,
                rt_mask: RtAsSubgroup::empty(),
                is_opaque: true,
            }),
        }

        let node_instance = instances[first_id].id;
        queue.extend(node.children.iter().map(|child| (*child, level + 1, node_instance)));
    }

    log::debug!("node instances: {} instances from {} nodes", instances.len(), doc.nodes.len());
    Ok(instances)
}

/// 光追的可见性分组与是否不透明，取决于 primitive 的材质
fn primitive_flags(doc: &SceneDocument, mesh_idx: usize, prim_idx: usize) -> (RtAsSubgroup, bool) {
    match doc.meshes[mesh_idx].primitives[prim_idx].material {
        Some(material_idx) => {
            let material = &doc.materials[material_idx];
            let mask = if material.is_emissive() { RtAsSubgroup::EMISSIVE } else { RtAsSubgroup::NON_EMISSIVE };
            (mask, material.alpha_mode == AlphaModeDoc::Opaque)
        }
        None => (RtAsSubgroup::NON_EMISSIVE, true),
    }
}
