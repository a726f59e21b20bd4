//! 任务之间共享的状态

use super::prescan::PreScan;
use crate::document::SceneDocument;
use crate::error::ImportError;
use crate::texture_loader::{DecodedTexture, TextureLoader};
use crate::upload::GpuUploader;
use parking_lot::Mutex;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use truvis_scene::emissive::{EmissiveInstance, EmissiveSubset, EmissiveSubsetEntry, EmissiveTriangle};
use truvis_scene::handles::GpuHandle;
use truvis_scene::imported::StagedInstance;
use truvis_scene::material::Material;
use truvis_scene::mesh::{MeshDesc, Vertex};
use truvis_utils::alias_table::AliasTable;
use truvis_utils::atomic_buffer::{AtomicRangeBuffer, ReservedRange};

pub(crate) struct ImportContext<'d> {
    pub doc: &'d SceneDocument,
    pub scene_id: u64,
    pub texture_loader: &'d dyn TextureLoader,
    pub uploader: &'d dyn GpuUploader,

    failed: AtomicBool,
    first_error: Mutex<Option<ImportError>>,
}
impl<'d> ImportContext<'d> {
    pub fn new(
        doc: &'d SceneDocument,
        scene_id: u64,
        texture_loader: &'d dyn TextureLoader,
        uploader: &'d dyn GpuUploader,
    ) -> Self {
        Self {
            doc,
            scene_id,
            texture_loader,
            uploader,
            failed: AtomicBool::new(false),
            first_error: Mutex::new(None),
        }
    }

    /// 执行一个任务；之前已经有任务失败时直接跳过，失败时记录第一个错误
    pub fn run(&self, task: &str, f: impl FnOnce() -> Result<(), ImportError>) {
        if self.failed.load(Ordering::Acquire) {
            log::debug!("task `{task}` skipped, the import has already failed");
            return;
        }
        if let Err(err) = f() {
            log::debug!("task `{task}` failed: {err}");
            let mut slot = self.first_error.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
            self.failed.store(true, Ordering::Release);
        }
    }

    pub fn take_error(&self) -> Option<ImportError> {
        self.first_error.lock().take()
    }
}

/// 按预扫描结果一次性分配的共享 buffer
pub(crate) struct MeshBuffers {
    pub vertices: AtomicRangeBuffer<Vertex>,
    pub indices: AtomicRangeBuffer<u32>,
    pub meshes: AtomicRangeBuffer<MeshDesc>,
    /// 按每个 primitive 都发光的最坏情况分配
    pub emissive: AtomicRangeBuffer<EmissiveSubsetEntry>,
}
impl MeshBuffers {
    pub fn new(prescan: &PreScan) -> Self {
        Self {
            vertices: AtomicRangeBuffer::new(prescan.num_vertices, "vertices"),
            indices: AtomicRangeBuffer::new(prescan.num_indices, "indices"),
            meshes: AtomicRangeBuffer::new(prescan.num_primitives, "mesh-primitives"),
            emissive: AtomicRangeBuffer::new(prescan.num_primitives, "emissive-subset"),
        }
    }
}

/// 一个 mesh worker 预留并写好的区间
pub(crate) struct MeshWorkerOutput<'b> {
    pub vertices: ReservedRange<'b, Vertex>,
    pub indices: ReservedRange<'b, u32>,
    pub emissive: ReservedRange<'b, EmissiveSubsetEntry>,
    pub num_emissive: usize,
}

#[derive(Default)]
pub(crate) struct LoadedTexture {
    /// 找不到文件时为 None
    pub handle: Option<GpuHandle>,
    /// 只有被用作发光贴图时才保留，用于估计发光强度
    pub pixels: Option<DecodedTexture>,
}

#[derive(Default)]
pub(crate) struct EmissiveGeometry {
    pub triangles: Vec<EmissiveTriangle>,
    pub instances: Vec<EmissiveInstance>,
    /// 每个发光 instance 使用的材质在文档中的下标
    pub instance_materials: Vec<usize>,
}

/// 各个任务的产出，每一项只会被写入一次
pub(crate) struct TaskOutputs<'b> {
    pub mesh_workers: Mutex<Vec<MeshWorkerOutput<'b>>>,
    pub emissive_subset: OnceLock<EmissiveSubset>,
    pub textures: Vec<OnceLock<LoadedTexture>>,
    pub materials: OnceLock<Vec<(u64, Material)>>,
    pub emissive: OnceLock<EmissiveGeometry>,
    pub light_sampling: OnceLock<(Vec<f32>, Option<AliasTable>)>,
    pub instances: OnceLock<Vec<StagedInstance>>,
}

pub(crate) struct TaskResults {
    pub emissive_subset: EmissiveSubset,
    pub materials: Vec<(u64, Material)>,
    pub emissive: EmissiveGeometry,
    pub triangle_power: Vec<f32>,
    pub alias_table: Option<AliasTable>,
    pub instances: Vec<StagedInstance>,
}

impl<'b> TaskOutputs<'b> {
    pub fn new(num_images: usize) -> Self {
        Self {
            mesh_workers: Mutex::new(Vec::new()),
            emissive_subset: OnceLock::new(),
            textures: (0..num_images).map(|_| OnceLock::new()).collect(),
            materials: OnceLock::new(),
            emissive: OnceLock::new(),
            light_sampling: OnceLock::new(),
            instances: OnceLock::new(),
        }
    }

    pub fn publish<T>(cell: &OnceLock<T>, value: T, what: &str) {
        assert!(cell.set(value).is_ok(), "import: {what} produced twice");
    }

    /// 读取前置任务的产出，任务图的依赖边保证其已经写入
    pub fn get<'s, T>(cell: &'s OnceLock<T>, what: &str) -> &'s T {
        cell.get()
            .unwrap_or_else(|| panic!("import: {what} read before the task producing it finished"))
    }

    /// 图执行完之后取出所有结果，同时释放对共享 buffer 的借用
    pub fn into_results(self) -> TaskResults {
        let (triangle_power, alias_table) = self.light_sampling.into_inner().unwrap_or_default();
        TaskResults {
            emissive_subset: self.emissive_subset.into_inner().unwrap_or_default(),
            materials: self.materials.into_inner().unwrap_or_default(),
            emissive: self.emissive.into_inner().unwrap_or_default(),
            triangle_power,
            alias_table,
            instances: self.instances.into_inner().unwrap_or_default(),
        }
    }
}
