use crate::error::{ImportError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use truvis_scene::scene_core::SceneSettings;
use truvis_scene::scene_graph::DEFAULT_MAX_HIERARCHY_DEPTH;

/// 导入器的配置，可以从 toml 文件读取，缺省的字段使用默认值
///
/// ```toml
/// worker_threads = 8
/// max_mesh_workers = 16
/// min_meshes_per_worker = 4
/// max_hierarchy_depth = 4
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    /// 线程池的线程数量，0 表示由 rayon 决定
    pub worker_threads: usize,
    pub max_mesh_workers: usize,
    pub min_meshes_per_worker: usize,
    pub max_texture_workers: usize,
    pub min_textures_per_worker: usize,
    /// 场景图的最大层数
    pub max_hierarchy_depth: usize,
    pub id_map_min_buckets: usize,
}
impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            max_mesh_workers: 16,
            min_meshes_per_worker: 8,
            max_texture_workers: 8,
            min_textures_per_worker: 2,
            max_hierarchy_depth: DEFAULT_MAX_HIERARCHY_DEPTH,
            id_map_min_buckets: 64,
        }
    }
}
impl ImportConfig {
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|source| ImportError::Config {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate(origin)?;
        Ok(config)
    }

    /// 检查反序列化无法表达的取值约束
    pub fn validate(&self, origin: &Path) -> Result<()> {
        // 场景图至少要有根节点所在的一层
        if self.max_hierarchy_depth == 0 {
            return Err(ImportError::InvalidConfig {
                path: origin.to_path_buf(),
                reason: "max_hierarchy_depth must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ImportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text, path)?;
        log::info!("import config loaded from {path:?}: {config:?}");
        Ok(config)
    }

    /// 创建 `SceneCore` 时使用的参数
    pub fn scene_settings(&self) -> SceneSettings {
        SceneSettings {
            max_hierarchy_depth: self.max_hierarchy_depth,
            id_map_min_buckets: self.id_map_min_buckets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ImportConfig::from_toml_str("max_mesh_workers = 2\nmax_hierarchy_depth = 5\n", Path::new("inline"))
            .unwrap();
        assert_eq!(config.max_mesh_workers, 2);
        assert_eq!(config.max_hierarchy_depth, 5);
        assert_eq!(config.min_meshes_per_worker, ImportConfig::default().min_meshes_per_worker);
        assert_eq!(config.scene_settings().max_hierarchy_depth, 5);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = ImportConfig::from_toml_str("max_mesh_worker = 2", Path::new("inline")).unwrap_err();
        assert!(matches!(err, ImportError::Config { .. }));
    }

    #[test]
    fn test_zero_hierarchy_depth_is_rejected() {
        let err = ImportConfig::from_toml_str("max_hierarchy_depth = 0", Path::new("inline")).unwrap_err();
        match err {
            ImportError::InvalidConfig { path, reason } => {
                assert_eq!(path, Path::new("inline"));
                assert!(reason.contains("max_hierarchy_depth"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let config = ImportConfig::from_toml_str("max_hierarchy_depth = 1", Path::new("inline")).unwrap();
        assert_eq!(config.max_hierarchy_depth, 1);
    }
}
