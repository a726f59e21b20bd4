use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("document `{document}` has {count} buffers, only a single buffer is supported")]
    MultipleBuffers { document: String, count: usize },

    #[error("mesh {mesh} primitive {primitive}: missing required attribute {attribute}")]
    MissingAttribute {
        mesh: usize,
        primitive: usize,
        attribute: &'static str,
    },

    #[error("mesh {mesh} primitive {primitive}: attribute {attribute} {reason}")]
    BadAttribute {
        mesh: usize,
        primitive: usize,
        attribute: &'static str,
        reason: String,
    },

    #[error("mesh {mesh} primitive {primitive}: topology {topology:?} is not a triangle list")]
    UnsupportedTopology {
        mesh: usize,
        primitive: usize,
        topology: crate::document::Topology,
    },

    #[error("{what} index {index} is out of range ({count} available)")]
    InvalidReference {
        what: &'static str,
        index: usize,
        count: usize,
    },

    #[error("node {node} is reachable more than once, the node hierarchy must be a forest")]
    NodeVisitedTwice { node: usize },

    #[error("node {node} is at depth {depth}, the scene graph supports at most {max} levels")]
    HierarchyTooDeep { node: usize, depth: usize, max: usize },

    #[error("node {node} has a transform with non-positive determinant {determinant}")]
    DegenerateTransform { node: usize, determinant: f32 },

    #[error("image {image} (`{name}`) could not be decoded: {reason}")]
    Texture {
        image: usize,
        name: String,
        reason: String,
    },

    #[error("failed to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid import config {path:?}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid import config {path:?}: {reason}")]
    InvalidConfig { path: PathBuf, reason: String },

    #[error(transparent)]
    Gltf(#[from] gltf::Error),

    #[error(transparent)]
    TaskGraph(#[from] truvis_utils::task_graph::TaskGraphError),

    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Commit(#[from] truvis_scene::scene_core::SceneError),
}

pub type Result<T> = std::result::Result<T, ImportError>;
