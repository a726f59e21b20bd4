//! 导入一个或多个 glTF 场景到同一个 `SceneCore`，并打印统计信息

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use truvis_asset::config::ImportConfig;
use truvis_asset::gltf_document;
use truvis_asset::import::SceneImporter;
use truvis_asset::upload::UploadKind;
use truvis_crate_tools::init_log::init_log_with_level;
use truvis_crate_tools::profile::start_profiler;
use truvis_scene::scene_core::SceneCore;

#[derive(Parser, Debug)]
#[command(name = "truvis-scene-import", about = "导入 glTF 场景并输出统计信息")]
struct Cli {
    /// `.gltf` 或 `.glb` 文件，多个文件会合并到同一个场景中
    #[arg(required = true)]
    scenes: Vec<PathBuf>,

    /// 导入配置 (toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 把合并后的顶点和索引也交给上传器
    #[arg(long)]
    upload_geometry: bool,

    /// 启动 tracy client
    #[arg(long)]
    profile: bool,

    /// 输出 debug 级别的日志
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_log_with_level(if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info });
    if cli.profile {
        start_profiler();
    }

    let config = match &cli.config {
        Some(path) => ImportConfig::load(path).with_context(|| format!("loading import config {path:?}"))?,
        None => ImportConfig::default(),
    };
    log::info!("import config: {config:?}");

    let importer = SceneImporter::new(config.clone()).context("creating scene importer")?;
    let scene = SceneCore::new(config.scene_settings());

    for path in &cli.scenes {
        let document = gltf_document::load(path).with_context(|| format!("parsing {path:?}"))?;
        let report = importer.import(document, &scene).with_context(|| format!("importing {path:?}"))?;
        println!(
            "{}: {} vertices, {} triangles, {} materials, {} instances over {} levels, \
             {} emissive primitives, {} emissive triangles ({:.1?})",
            report.name,
            report.num_vertices,
            report.num_triangles,
            report.stats.num_materials,
            report.stats.num_instances,
            report.num_levels,
            report.num_emissive_primitives,
            report.stats.num_emissive_triangles,
            report.elapsed
        );
    }

    if cli.upload_geometry {
        let meshes = scene.meshes();
        let uploader = importer.uploader();
        let vertices = uploader.upload("scene-vertices", UploadKind::Buffer, bytemuck::cast_slice(meshes.vertices()));
        let indices = uploader.upload("scene-indices", UploadKind::Buffer, bytemuck::cast_slice(meshes.indices()));
        log::info!("geometry uploaded: vertices {vertices:?}, indices {indices:?}");
    }

    // 按 SceneCore 的加锁顺序
    let meshes = scene.meshes();
    let graph = scene.instances();
    let emissives = scene.emissives();
    println!(
        "total: {} meshes, {} triangles, {} instances in {} levels, {} emissive triangles, light sampling {}",
        meshes.len(),
        meshes.triangle_count(),
        graph.instance_count(),
        graph.level_count(),
        emissives.triangles().len(),
        if emissives.alias_table().is_some() { "enabled" } else { "disabled" }
    );
    for level in 0..graph.level_count() {
        println!("  level {level}: {} instances", graph.level_len(level));
    }

    Ok(())
}
