//! 场景导入
//!
//! 外部的场景文件先被转换为 [`document::SceneDocument`]，
//! 再由 [`import::SceneImporter`] 在 rayon 线程池上按任务图并行处理，
//! 最终结果提交到 `truvis_scene::scene_core::SceneCore`。

pub mod config;
pub mod document;
pub mod error;
pub mod gltf_document;
pub mod import;
pub mod texture_loader;
pub mod upload;
