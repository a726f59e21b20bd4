//! 场景数据的 CPU 侧存储
//!
//! [`scene_core::SceneCore`] 持有四类资源：材质、mesh、instance (场景图)、发光体，
//! 每一类各自由一把读写锁保护。导入器产生的 [`imported::ImportedScene`] 通过
//! [`scene_core::SceneCore::commit`] 一次性提交。

pub mod aabb;
pub mod emissive;
pub mod handles;
pub mod imported;
pub mod material;
pub mod mesh;
pub mod rt_flags;
pub mod scene_core;
pub mod scene_graph;
pub mod transform;
