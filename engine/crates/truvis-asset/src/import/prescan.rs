use crate::document::SceneDocument;
use crate::error::{ImportError, Result};

/// 导入前的统计，用于一次性分配所有 buffer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreScan {
    pub num_vertices: usize,
    pub num_indices: usize,
    pub num_primitives: usize,
    pub num_instances: usize,
    pub instances_per_level: Vec<usize>,
}

impl PreScan {
    /// 校验引用关系和层级深度，并统计数量
    pub fn run(doc: &SceneDocument, max_depth: usize) -> Result<Self> {
        if doc.buffers.len() > 1 {
            return Err(ImportError::MultipleBuffers {
                document: doc.name.clone(),
                count: doc.buffers.len(),
            });
        }
        validate_references(doc)?;

        let mut scan = Self::default();
        for mesh in &doc.meshes {
            for primitive in &mesh.primitives {
                scan.num_vertices += primitive.vertex_count();
                scan.num_indices += primitive.index_count();
                scan.num_primitives += 1;
            }
        }

        // 第一次遍历：层级必须是深度有限的森林
        let mut visited = vec![false; doc.nodes.len()];
        let mut stack: Vec<(usize, usize)> = doc.roots.iter().rev().map(|root| (*root, 0)).collect();
        while let Some((node, depth)) = stack.pop() {
            if std::mem::replace(&mut visited[node], true) {
                return Err(ImportError::NodeVisitedTwice { node });
            }
            if depth >= max_depth {
                return Err(ImportError::HierarchyTooDeep {
                    node,
                    depth,
                    max: max_depth,
                });
            }
            stack.extend(doc.nodes[node].children.iter().rev().map(|child| (*child, depth + 1)));
        }

        // 第二次遍历：每一层的 instance 数量
        let mut stack: Vec<(usize, usize)> = doc.roots.iter().map(|root| (*root, 0)).collect();
        while let Some((node, depth)) = stack.pop() {
            if scan.instances_per_level.len() <= depth {
                scan.instances_per_level.resize(depth + 1, 0);
            }
            let count = instances_of_node(doc, node);
            scan.instances_per_level[depth] += count;
            scan.num_instances += count;
            stack.extend(doc.nodes[node].children.iter().map(|child| (*child, depth + 1)));
        }

        Ok(scan)
    }
}

/// 带 mesh 的节点每个 primitive 一个 instance，否则一个不带 mesh 的 instance
pub(crate) fn instances_of_node(doc: &SceneDocument, node: usize) -> usize {
    doc.nodes[node]
        .mesh
        .map_or(0, |mesh| doc.meshes[mesh].primitives.len())
        .max(1)
}

fn check_index(what: &'static str, index: usize, count: usize) -> Result<()> {
    if index < count {
        Ok(())
    } else {
        Err(ImportError::InvalidReference { what, index, count })
    }
}

fn validate_references(doc: &SceneDocument) -> Result<()> {
    for root in &doc.roots {
        check_index("root node", *root, doc.nodes.len())?;
    }
    for node in &doc.nodes {
        for child in &node.children {
            check_index("child node", *child, doc.nodes.len())?;
        }
        if let Some(mesh) = node.mesh {
            check_index("mesh", mesh, doc.meshes.len())?;
        }
    }
    for mesh in &doc.meshes {
        for primitive in &mesh.primitives {
            if let Some(material) = primitive.material {
                check_index("material", material, doc.materials.len())?;
            }
        }
    }
    for material in &doc.materials {
        for image in material.textures().into_iter().flatten() {
            check_index("image", image, doc.images.len())?;
        }
    }
    Ok(())
}
