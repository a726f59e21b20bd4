//! 并行的场景导入
//!
//! 预扫描之后，导入过程被拆成一张任务图：
//!
//! ```text
//! mesh-worker-* ──> emissive-subset ──┐
//!                                     ├──> emissive-instances ──> emissive-power
//! texture-worker-* ──> materials ─────┘
//! node-instances
//! ```
//!
//! 所有任务结束后在调用线程上汇总结果，提交到 `SceneCore`。

mod context;
mod emissive_task;
mod handedness;
mod material_task;
mod mesh_task;
mod node_task;
mod prescan;

pub use prescan::PreScan;

use crate::config::ImportConfig;
use crate::document::SceneDocument;
use crate::error::Result;
use crate::texture_loader::{ImageTextureLoader, TextureLoader};
use crate::upload::{GpuUploader, StagingUploader};
use context::{ImportContext, MeshBuffers, TaskOutputs};
use std::sync::Arc;
use std::time::{Duration, Instant};
use truvis_crate_tools::profile_scope;
use truvis_scene::imported::ImportedScene;
use truvis_scene::scene_core::{CommitStats, SceneCore};
use truvis_utils::id_hash;
use truvis_utils::task_graph::{TaskGraph, TaskHandle};
use truvis_utils::work_split::split_work;

#[derive(Clone, Debug)]
pub struct ImportReport {
    pub scene_id: u64,
    pub name: String,
    pub stats: CommitStats,
    pub num_vertices: usize,
    pub num_triangles: usize,
    pub num_emissive_primitives: usize,
    pub num_levels: usize,
    pub elapsed: Duration,
}

pub struct SceneImporter {
    config: ImportConfig,
    pool: rayon::ThreadPool,
    texture_loader: Box<dyn TextureLoader>,
    uploader: Arc<dyn GpuUploader>,
}
// new & init
impl SceneImporter {
    /// 使用 image crate 解码贴图，上传结果只保存在 CPU 侧
    pub fn new(config: ImportConfig) -> Result<Self> {
        Self::with_collaborators(config, Box::new(ImageTextureLoader), Arc::new(StagingUploader::new()))
    }

    pub fn with_collaborators(
        config: ImportConfig,
        texture_loader: Box<dyn TextureLoader>,
        uploader: Arc<dyn GpuUploader>,
    ) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|index| format!("Scene-Import-{}", index));
        if config.worker_threads > 0 {
            builder = builder.num_threads(config.worker_threads);
        }
        let pool = builder.build()?;
        log::info!("SceneImporter: {} worker threads", pool.current_num_threads());

        Ok(Self {
            config,
            pool,
            texture_loader,
            uploader,
        })
    }
}
// getter
impl SceneImporter {
    #[inline]
    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    #[inline]
    pub fn uploader(&self) -> &Arc<dyn GpuUploader> {
        &self.uploader
    }
}
// tools
impl SceneImporter {
    /// 导入并提交到 `scene`
    ///
    /// 任何一步失败时 `scene` 保持不变
    pub fn import(&self, document: SceneDocument, scene: &SceneCore) -> Result<ImportReport> {
        profile_scope!("SceneImporter::import");
        let start = Instant::now();

        let max_depth = self.config.max_hierarchy_depth.min(scene.settings().max_hierarchy_depth);
        let imported = self.stage(document, max_depth)?;

        let scene_id = imported.scene_id;
        let name = imported.name.clone();
        let num_vertices = imported.vertices.len();
        let num_triangles = imported.indices.len() / 3;
        let num_emissive_primitives = imported.emissive_subset.len();
        let num_levels = imported.instances_per_level().len();

        let stats = scene.commit(imported)?;
        let elapsed = start.elapsed();
        log::info!("SceneImporter: `{name}` imported in {elapsed:?}");

        Ok(ImportReport {
            scene_id,
            name,
            stats,
            num_vertices,
            num_triangles,
            num_emissive_primitives,
            num_levels,
            elapsed,
        })
    }

    /// 只执行导入的任务图，不提交
    pub fn import_detached(&self, document: SceneDocument) -> Result<ImportedScene> {
        self.stage(document, self.config.max_hierarchy_depth)
    }

    fn stage(&self, document: SceneDocument, max_depth: usize) -> Result<ImportedScene> {
        let doc = &document;
        let prescan = {
            profile_scope!("import::prescan");
            PreScan::run(doc, max_depth)?
        };
        log::info!(
            "SceneImporter: `{}`: {} meshes, {} primitives, {} vertices, {} indices, {} instances over {} levels",
            doc.name,
            doc.meshes.len(),
            prescan.num_primitives,
            prescan.num_vertices,
            prescan.num_indices,
            prescan.num_instances,
            prescan.instances_per_level.len()
        );

        let ctx = ImportContext::new(
            doc,
            id_hash::scene_id(&doc.name),
            self.texture_loader.as_ref(),
            self.uploader.as_ref(),
        );
        let buffers = MeshBuffers::new(&prescan);

        let results = {
            let outputs = TaskOutputs::new(doc.images.len());
            let graph = self.build_graph(&ctx, &buffers, &outputs);
            graph.sort()?.execute(&self.pool);

            if let Some(err) = ctx.take_error() {
                log::error!("SceneImporter: `{}` failed: {err}", doc.name);
                return Err(err);
            }
            outputs.into_results()
        };

        // 单线程汇总
        profile_scope!("import::finalize");
        let scene = ImportedScene {
            scene_id: ctx.scene_id,
            name: doc.name.clone(),
            vertices: buffers.vertices.into_vec(),
            indices: buffers.indices.into_vec(),
            meshes: buffers.meshes.into_vec(),
            materials: results.materials,
            instances: results.instances,
            emissive_subset: results.emissive_subset,
            emissive_triangles: results.emissive.triangles,
            emissive_instances: results.emissive.instances,
            triangle_power: results.triangle_power,
            alias_table: results.alias_table,
        };
        drop(ctx);
        drop(document);
        log::debug!("SceneImporter: document released");

        Ok(scene)
    }

    fn build_graph<'a, 'b: 'a>(
        &self,
        ctx: &'a ImportContext<'_>,
        buffers: &'b MeshBuffers,
        outputs: &'a TaskOutputs<'b>,
    ) -> TaskGraph<'a> {
        let doc = ctx.doc;
        let mut graph = TaskGraph::new(format!("import `{}`", doc.name));

        let mesh_ranges = split_work(
            doc.meshes.len(),
            self.config.min_meshes_per_worker,
            self.config.max_mesh_workers,
        );
        let mesh_workers: Vec<TaskHandle> = mesh_ranges
            .into_iter()
            .enumerate()
            .map(|(worker_idx, range)| {
                let name = format!("mesh-worker-{worker_idx}");
                graph.add_task(name.clone(), move || {
                    ctx.run(&name, || {
                        let output = mesh_task::run_mesh_worker(ctx, buffers, range)?;
                        outputs.mesh_workers.lock().push(output);
                        Ok(())
                    })
                })
            })
            .collect();

        let emissive_subset = graph.add_task("emissive-subset", move || {
            ctx.run("emissive-subset", || {
                TaskOutputs::publish(
                    &outputs.emissive_subset,
                    emissive_task::finalize_subset(outputs),
                    "emissive subset",
                );
                Ok(())
            })
        });
        graph.add_edges(&mesh_workers, emissive_subset);

        let texture_ranges = split_work(
            doc.images.len(),
            self.config.min_textures_per_worker,
            self.config.max_texture_workers,
        );
        let texture_workers: Vec<TaskHandle> = texture_ranges
            .into_iter()
            .enumerate()
            .map(|(worker_idx, range)| {
                let name = format!("texture-worker-{worker_idx}");
                graph.add_task(name.clone(), move || {
                    ctx.run(&name, || material_task::run_texture_worker(ctx, outputs, range))
                })
            })
            .collect();

        let materials = graph.add_task("materials", move || {
            ctx.run("materials", || {
                TaskOutputs::publish(&outputs.materials, material_task::build_materials(ctx, outputs), "materials");
                Ok(())
            })
        });
        graph.add_edges(&texture_workers, materials);

        let emissive_instances = graph.add_task("emissive-instances", move || {
            ctx.run("emissive-instances", || {
                let geometry = emissive_task::emit_emissive_instances(ctx, outputs)?;
                TaskOutputs::publish(&outputs.emissive, geometry, "emissive instances");
                Ok(())
            })
        });
        graph.add_edges(&[emissive_subset, materials], emissive_instances);

        let emissive_power = graph.add_task("emissive-power", move || {
            ctx.run("emissive-power", || {
                TaskOutputs::publish(
                    &outputs.light_sampling,
                    emissive_task::build_light_sampling(ctx, outputs),
                    "light sampling",
                );
                Ok(())
            })
        });
        graph.add_edge(emissive_instances, emissive_power);

        // 与发光体相关的任务无关
        graph.add_task("node-instances", move || {
            ctx.run("node-instances", || {
                let instances = node_task::stage_instances(ctx)?;
                TaskOutputs::publish(&outputs.instances, instances, "instances");
                Ok(())
            })
        });

        graph
    }
}
