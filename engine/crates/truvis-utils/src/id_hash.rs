//! 64 位资源 ID
//!
//! 所有 ID 都是 xxh3 哈希，`u64::MAX - 2 ..= u64::MAX` 这几个值保留给各处的哨兵，
//! 哈希结果落在保留区间时会被折叠到低半区。

use xxhash_rust::xxh3::xxh3_64_with_seed;

/// 表示 "没有"：没有 mesh、没有父节点 (root) 等
pub const INVALID_ID: u64 = u64::MAX;

const FIRST_RESERVED_ID: u64 = u64::MAX - 2;

const SEED_SCENE: u64 = 0x5343_454e_45;
const SEED_MESH: u64 = 0x4d45_5348;
const SEED_MATERIAL: u64 = 0x4d41_54;
const SEED_INSTANCE: u64 = 0x494e_5354;

#[inline]
fn fold_reserved(hash: u64) -> u64 {
    if hash >= FIRST_RESERVED_ID { hash ^ (1 << 63) } else { hash }
}

fn hash_indices(seed: u64, scene_id: u64, indices: &[i64]) -> u64 {
    let mut words = Vec::with_capacity(indices.len() + 1);
    words.push(scene_id as i64);
    words.extend_from_slice(indices);

    fold_reserved(xxh3_64_with_seed(bytemuck::cast_slice(&words), seed))
}

/// 场景 ID，一般由文件路径得到
pub fn scene_id(name: &str) -> u64 {
    fold_reserved(xxh3_64_with_seed(name.as_bytes(), SEED_SCENE))
}

/// mesh primitive 的 ID
pub fn mesh_id(scene_id: u64, mesh_idx: usize, primitive_idx: usize) -> u64 {
    hash_indices(SEED_MESH, scene_id, &[mesh_idx as i64, primitive_idx as i64])
}

pub fn material_id(scene_id: u64, material_idx: usize) -> u64 {
    hash_indices(SEED_MATERIAL, scene_id, &[material_idx as i64])
}

/// instance 的 ID
///
/// 每个 (node, mesh, primitive) 组合对应一个 instance；
/// 不带 mesh 的 node 使用 `None` 作为 mesh 和 primitive
pub fn instance_id(scene_id: u64, node_idx: usize, mesh_primitive: Option<(usize, usize)>) -> u64 {
    let (mesh_idx, primitive_idx) = mesh_primitive.map_or((-1, -1), |(m, p)| (m as i64, p as i64));
    hash_indices(SEED_INSTANCE, scene_id, &[node_idx as i64, mesh_idx, primitive_idx])
}
