use crate::aabb::Aabb;
use crate::emissive::EmissiveStore;
use crate::imported::ImportedScene;
use crate::material::MaterialStore;
use crate::mesh::MeshStore;
use crate::scene_graph::{DEFAULT_MAX_HIERARCHY_DEPTH, SceneGraph};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use truvis_crate_tools::profile_scope;
use truvis_utils::id_hash::INVALID_ID;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SceneSettings {
    pub max_hierarchy_depth: usize,
    pub id_map_min_buckets: usize,
}
impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            max_hierarchy_depth: DEFAULT_MAX_HIERARCHY_DEPTH,
            id_map_min_buckets: 64,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("{kind} {id:#018x} of scene `{scene}` is already loaded")]
    DuplicateId { scene: String, kind: &'static str, id: u64 },
    #[error("instance {id:#018x} of scene `{scene}` references unknown parent {parent:#018x}")]
    MissingParent { scene: String, id: u64, parent: u64 },
    #[error("scene `{scene}` is {depth} levels deep, the scene graph allows {max}")]
    TooDeep { scene: String, depth: usize, max: usize },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub num_meshes: usize,
    pub num_materials: usize,
    pub num_instances: usize,
    pub num_emissive_triangles: usize,
}

/// 场景数据的持有者
///
/// 材质、mesh、instance、发光体各有一把读写锁，需要同时持有多把时按这个顺序加锁
pub struct SceneCore {
    materials: RwLock<MaterialStore>,
    meshes: RwLock<MeshStore>,
    instances: RwLock<SceneGraph>,
    emissives: RwLock<EmissiveStore>,

    settings: SceneSettings,
}
impl Default for SceneCore {
    fn default() -> Self {
        Self::new(SceneSettings::default())
    }
}
// new & init
impl SceneCore {
    pub fn new(settings: SceneSettings) -> Self {
        Self {
            materials: RwLock::new(MaterialStore::new(settings.id_map_min_buckets)),
            meshes: RwLock::new(MeshStore::new(settings.id_map_min_buckets)),
            instances: RwLock::new(SceneGraph::with_min_buckets(
                settings.max_hierarchy_depth,
                settings.id_map_min_buckets,
            )),
            emissives: RwLock::new(EmissiveStore::default()),
            settings,
        }
    }
}
// getter
impl SceneCore {
    #[inline]
    pub fn settings(&self) -> &SceneSettings {
        &self.settings
    }

    #[inline]
    pub fn materials(&self) -> RwLockReadGuard<'_, MaterialStore> {
        self.materials.read()
    }

    #[inline]
    pub fn meshes(&self) -> RwLockReadGuard<'_, MeshStore> {
        self.meshes.read()
    }

    #[inline]
    pub fn instances(&self) -> RwLockReadGuard<'_, SceneGraph> {
        self.instances.read()
    }

    /// 运行时修改 instance，例如 `set_local_transform`
    #[inline]
    pub fn instances_mut(&self) -> RwLockWriteGuard<'_, SceneGraph> {
        self.instances.write()
    }

    #[inline]
    pub fn emissives(&self) -> RwLockReadGuard<'_, EmissiveStore> {
        self.emissives.read()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty() && self.meshes.read().is_empty() && self.materials.read().is_empty()
    }

    /// instance 在世界空间下的包围盒，没有 mesh 的 instance 返回 None
    pub fn instance_aabb(&self, instance_id: u64) -> Option<Aabb> {
        let (mesh_id, world) = {
            let instances = self.instances.read();
            let view = instances.get(instance_id)?;
            (view.mesh_id, *view.world_transform)
        };
        if mesh_id == INVALID_ID {
            return None;
        }
        let aabb = self.meshes.read().get(mesh_id)?.aabb;
        Some(aabb.transformed(&world))
    }
}
// tools
impl SceneCore {
    /// 提交一次导入的结果
    ///
    /// 先检查 id 冲突，检查通过后才会修改任何数据，因此失败时场景保持原样
    pub fn commit(&self, scene: ImportedScene) -> Result<CommitStats, SceneError> {
        profile_scope!("SceneCore::commit");

        let mut materials = self.materials.write();
        let mut meshes = self.meshes.write();
        let mut instances = self.instances.write();
        let mut emissives = self.emissives.write();

        Self::validate(&scene, &materials, &meshes, &instances)?;

        let stats = CommitStats {
            num_meshes: scene.meshes.len(),
            num_materials: scene.materials.len(),
            num_instances: scene.instances.len(),
            num_emissive_triangles: scene.emissive_triangles.len(),
        };
        let counts_per_level = scene.instances_per_level();
        let ImportedScene {
            name,
            vertices,
            indices,
            meshes: scene_meshes,
            materials: scene_materials,
            instances: mut staged,
            emissive_subset,
            emissive_triangles,
            emissive_instances,
            triangle_power,
            alias_table,
            ..
        } = scene;

        let material_base = materials.append(scene_materials);
        let (vertex_base, index_base) = meshes.append(vertices, indices, scene_meshes);

        // 按层插入，父节点总是先于子节点
        staged.sort_by_key(|instance| instance.level);
        instances.reserve_instances(&counts_per_level, staged.len());
        for instance in staged {
            let parent_offset = match instance.level {
                0 => None,
                _ => {
                    let location = instances.get_by_id(instance.parent_id).unwrap_or_else(|| {
                        panic!("SceneCore: parent {:#018x} vanished after validation", instance.parent_id)
                    });
                    Some(location.offset as usize)
                }
            };
            instances.insert_at_level(
                instance.id,
                instance.level,
                parent_offset,
                instance.local_transform,
                instance.mesh_id,
                instance.rt_mode,
                instance.rt_mask,
                instance.is_opaque,
            );
        }
        instances.update_world_transforms();

        let subset = emissive_subset.entries().iter().map(|entry| {
            let mut entry = *entry;
            entry.base_vertex += vertex_base;
            entry.base_index += index_base;
            entry.material_index += material_base;
            entry
        });
        emissives.append(subset, emissive_triangles, emissive_instances, triangle_power, alias_table);

        log::info!(
            "SceneCore: committed `{name}`: {} meshes, {} materials, {} instances, {} emissive triangles",
            stats.num_meshes,
            stats.num_materials,
            stats.num_instances,
            stats.num_emissive_triangles
        );
        Ok(stats)
    }

    fn validate(
        scene: &ImportedScene,
        materials: &MaterialStore,
        meshes: &MeshStore,
        instances: &SceneGraph,
    ) -> Result<(), SceneError> {
        let duplicate = |kind, id| SceneError::DuplicateId {
            scene: scene.name.clone(),
            kind,
            id,
        };

        // 同一次导入内部的重复
        if let Some(id) = first_repeated(scene.materials.iter().map(|(id, _)| *id)) {
            return Err(duplicate("material", id));
        }
        if let Some(id) = first_repeated(scene.meshes.iter().map(|mesh| mesh.mesh_id)) {
            return Err(duplicate("mesh", id));
        }
        if let Some(id) = first_repeated(scene.instances.iter().map(|i| i.id)) {
            return Err(duplicate("instance", id));
        }

        if let Some((id, _)) = scene.materials.iter().find(|(id, _)| materials.contains(*id)) {
            return Err(duplicate("material", *id));
        }
        if let Some(mesh) = scene.meshes.iter().find(|mesh| meshes.contains(mesh.mesh_id)) {
            return Err(duplicate("mesh", mesh.mesh_id));
        }
        if let Some(instance) = scene.instances.iter().find(|i| instances.get_by_id(i.id).is_some()) {
            return Err(duplicate("instance", instance.id));
        }

        let depth = scene.instances_per_level().len();
        if depth > instances.max_depth() {
            return Err(SceneError::TooDeep {
                scene: scene.name.clone(),
                depth,
                max: instances.max_depth(),
            });
        }

        let staged_ids = scene.instances.iter().map(|i| (i.id, i.level)).collect::<std::collections::HashMap<_, _>>();
        for instance in scene.instances.iter().filter(|i| i.level > 0) {
            if staged_ids.get(&instance.parent_id) != Some(&(instance.level - 1)) {
                return Err(SceneError::MissingParent {
                    scene: scene.name.clone(),
                    id: instance.id,
                    parent: instance.parent_id,
                });
            }
        }

        Ok(())
    }

    /// 世界 transform 的更新
    pub fn update_world_transforms(&self) {
        self.instances.write().update_world_transforms();
    }

    /// 丢弃所有场景
    pub fn clear(&self) {
        self.materials.write().clear();
        self.meshes.write().clear();
        self.instances.write().clear();
        self.emissives.write().clear();
    }
}

fn first_repeated(mut ids: impl Iterator<Item = u64>) -> Option<u64> {
    let mut seen = std::collections::HashSet::new();
    ids.find(|id| !seen.insert(*id))
}

impl Drop for SceneCore {
    fn drop(&mut self) {
        log::info!(
            "SceneCore: dropping {} instances, {} meshes",
            self.instances.get_mut().instance_count(),
            self.meshes.get_mut().len()
        );
    }
}
