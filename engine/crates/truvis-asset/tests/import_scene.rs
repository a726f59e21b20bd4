use std::path::PathBuf;
use std::sync::Arc;
use truvis_asset::config::ImportConfig;
use truvis_asset::document::{
    ComponentType, ImageDoc, ImageSource, MaterialDoc, MeshDoc, NodeDoc, NodeTransform, PrimitiveDoc, SceneDocument,
    Topology,
};
use truvis_asset::error::ImportError;
use truvis_asset::gltf_document;
use truvis_asset::import::SceneImporter;
use truvis_asset::texture_loader::{DecodedTexture, ImageTextureLoader, TextureLoadResult, TextureLoader};
use truvis_asset::upload::StagingUploader;
use truvis_scene::rt_flags::RtAsSubgroup;
use truvis_scene::scene_core::{SceneCore, SceneError};
use truvis_utils::id_hash::{self, INVALID_ID};

/// 一排边长为 1 的正方形，每个两个三角形
fn quads(doc: &mut SceneDocument, count: usize, material: usize) -> PrimitiveDoc {
    let mut positions = Vec::new();
    let mut indices = Vec::new();
    for q in 0..count {
        let x = q as f32;
        let base = positions.len() as u32;
        positions.extend_from_slice(&[[x, 0.0, 0.0], [x + 1.0, 0.0, 0.0], [x + 1.0, 1.0, 0.0], [x, 1.0, 0.0]]);
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    PrimitiveDoc {
        positions: Some(doc.push_attribute(&positions, ComponentType::F32, 3)),
        indices: Some(doc.push_attribute(&indices, ComponentType::U32, 1)),
        material: Some(material),
        ..Default::default()
    }
}

fn translated(x: f32, y: f32, z: f32) -> NodeTransform {
    NodeTransform::Trs {
        translation: [x, y, z],
        rotation: [0.0, 0.0, 0.0, 1.0],
        scale: [1.0; 3],
    }
}

/// 两个顶层节点：
/// - 节点 0：发光材质的 mesh，两个三角形
/// - 节点 1：纯变换节点，子节点 2 是不发光的 mesh，四个三角形
fn two_root_scene(name: &str) -> SceneDocument {
    let mut doc = SceneDocument::new(name);
    doc.materials = vec![
        MaterialDoc {
            name: "light".to_string(),
            emissive_factor: [1.0, 1.0, 1.0],
            emissive_strength: 2.0,
            ..Default::default()
        },
        MaterialDoc {
            name: "floor".to_string(),
            ..Default::default()
        },
    ];
    let light = quads(&mut doc, 1, 0);
    let floor = quads(&mut doc, 2, 1);
    doc.meshes = vec![
        MeshDoc {
            name: "light".to_string(),
            primitives: vec![light],
        },
        MeshDoc {
            name: "floor".to_string(),
            primitives: vec![floor],
        },
    ];
    doc.nodes = vec![
        NodeDoc {
            name: "light".to_string(),
            transform: translated(1.0, 0.0, 0.0),
            mesh: Some(0),
            children: vec![],
        },
        NodeDoc {
            name: "group".to_string(),
            transform: translated(0.0, 3.0, 0.0),
            mesh: None,
            children: vec![2],
        },
        NodeDoc {
            name: "floor".to_string(),
            mesh: Some(1),
            ..Default::default()
        },
    ];
    doc.roots = vec![0, 1];
    doc
}

fn importer() -> SceneImporter {
    SceneImporter::new(ImportConfig::default()).unwrap()
}

/// 所有贴图都解码成同一张纯白图片
struct WhiteLoader;
impl TextureLoader for WhiteLoader {
    fn load(&self, _source: &ImageSource) -> TextureLoadResult {
        TextureLoadResult::Loaded(DecodedTexture {
            width: 2,
            height: 2,
            pixels: vec![255; 16],
        })
    }
}

struct BrokenLoader;
impl TextureLoader for BrokenLoader {
    fn load(&self, _source: &ImageSource) -> TextureLoadResult {
        TextureLoadResult::Failed("truncated file".to_string())
    }
}

fn with_emissive_texture(mut doc: SceneDocument) -> SceneDocument {
    doc.images.push(ImageDoc {
        name: "glow".to_string(),
        source: ImageSource::File(PathBuf::from("this/texture/does/not/exist.png")),
    });
    doc.materials[0].emissive_texture = Some(0);
    doc
}

#[test]
fn test_end_to_end() {
    let scene = SceneCore::default();
    let doc = two_root_scene("end-to-end.gltf");
    let scene_id = id_hash::scene_id(&doc.name);

    let report = importer().import(doc, &scene).unwrap();
    assert_eq!(report.scene_id, scene_id);
    assert_eq!(report.num_triangles, 6);
    assert_eq!(report.num_vertices, 12);
    assert_eq!(report.num_emissive_primitives, 1);
    assert_eq!(report.num_levels, 2);
    assert_eq!(report.stats.num_instances, 3);

    let meshes = scene.meshes();
    assert_eq!(meshes.len(), 2);
    assert_eq!(meshes.indices().len(), 18);
    assert_eq!(meshes.triangle_count(), 6);
    drop(meshes);

    let emissives = scene.emissives();
    assert_eq!(emissives.subset().len(), 1);
    assert_eq!(emissives.triangles().len(), 2);
    assert_eq!(emissives.instances().len(), 1);
    assert_eq!(emissives.triangle_power().len(), 2);
    // 亮度 1，强度 2，面积 0.5
    for power in emissives.triangle_power() {
        assert!((power - 1.0).abs() < 1e-5, "power {power}");
    }
    assert_eq!(emissives.alias_table().map(|table| table.len()), Some(2));

    let light_instance = id_hash::instance_id(scene_id, 0, Some((0, 0)));
    assert_eq!(emissives.instances()[0].instance_id, light_instance);
    assert_eq!(emissives.instances()[0].num_triangles, 2);
    for tri in emissives.triangles() {
        for v in [tri.v0, tri.v1, tri.v2] {
            assert!(v[0] >= 1.0 && v[0] <= 2.0, "triangle not in world space: {v:?}");
        }
    }
    drop(emissives);

    let graph = scene.instances();
    assert_eq!(graph.instance_count(), 3);
    assert_eq!(graph.level_count(), 2);
    assert_eq!(graph.level_len(0), 2);
    assert_eq!(graph.level_len(1), 1);

    let group = id_hash::instance_id(scene_id, 1, None);
    let floor = id_hash::instance_id(scene_id, 2, Some((1, 0)));
    assert_eq!(graph.mesh_id(group), Some(INVALID_ID));
    assert_eq!(graph.parent_id(floor), Some(group));
    assert_eq!(graph.mesh_id(floor), Some(id_hash::mesh_id(scene_id, 1, 0)));

    let floor_origin = graph.world_transform(floor).unwrap().transform_point3(glam::Vec3::ZERO);
    assert!((floor_origin - glam::Vec3::new(0.0, 3.0, 0.0)).length() < 1e-5);

    assert_eq!(graph.rt_flags(light_instance).unwrap().mask, RtAsSubgroup::EMISSIVE);
    assert_eq!(graph.rt_flags(floor).unwrap().mask, RtAsSubgroup::NON_EMISSIVE);
    drop(graph);

    let aabb = scene.instance_aabb(floor).unwrap();
    assert!((aabb.max.x - 2.0).abs() < 1e-5);
    assert!((aabb.min.y - 3.0).abs() < 1e-5);
}

#[test]
fn test_emissive_subset_search() {
    let doc = two_root_scene("subset.gltf");
    let scene_id = id_hash::scene_id(&doc.name);
    let imported = importer().import_detached(doc).unwrap();

    let light = id_hash::mesh_id(scene_id, 0, 0);
    let entry = imported.emissive_subset.find(light).unwrap();
    assert_eq!(entry.mesh_id, light);
    assert_eq!(entry.num_indices, 6);
    assert_eq!(entry.material_index, 0);

    assert!(imported.emissive_subset.find(id_hash::mesh_id(scene_id, 1, 0)).is_none());
    assert!(imported.emissive_subset.find(INVALID_ID).is_none());
}

fn assert_rejected(doc: SceneDocument, check: impl FnOnce(&ImportError) -> bool) {
    let scene = SceneCore::default();
    let err = importer().import(doc, &scene).unwrap_err();
    assert!(check(&err), "unexpected error: {err}");
    assert!(scene.is_empty());
    assert!(scene.meshes().is_empty());
    assert!(scene.materials().is_empty());
}

#[test]
fn test_reject_non_float_positions() {
    let mut doc = two_root_scene("u16-positions.gltf");
    let positions = doc.push_attribute(&[0u16; 12], ComponentType::U16, 3);
    doc.meshes[1].primitives[0].positions = Some(positions);
    assert_rejected(doc, |err| matches!(err, ImportError::BadAttribute { attribute: "POSITION", .. }));
}

#[test]
fn test_reject_strided_attribute() {
    let mut doc = two_root_scene("strided.gltf");
    let mut positions = doc.meshes[0].primitives[0].positions.unwrap();
    positions.byte_stride = Some(16);
    doc.meshes[0].primitives[0].positions = Some(positions);
    assert_rejected(doc, |err| matches!(err, ImportError::BadAttribute { mesh: 0, .. }));
}

#[test]
fn test_reject_non_triangle_topology() {
    let mut doc = two_root_scene("strip.gltf");
    doc.meshes[1].primitives[0].topology = Topology::TriangleStrip;
    assert_rejected(doc, |err| {
        matches!(
            err,
            ImportError::UnsupportedTopology {
                mesh: 1,
                topology: Topology::TriangleStrip,
                ..
            }
        )
    });
}

#[test]
fn test_reject_multiple_buffers() {
    let mut doc = two_root_scene("two-buffers.gltf");
    doc.buffers.push(vec![0; 16]);
    assert_rejected(doc, |err| matches!(err, ImportError::MultipleBuffers { count: 2, .. }));
}

#[test]
fn test_reject_mirrored_transform() {
    let mut doc = two_root_scene("mirrored.gltf");
    doc.nodes[2].transform = NodeTransform::Trs {
        translation: [0.0; 3],
        rotation: [0.0, 0.0, 0.0, 1.0],
        scale: [-1.0, 1.0, 1.0],
    };
    assert_rejected(doc, |err| matches!(err, ImportError::DegenerateTransform { node: 2, .. }));
}

#[test]
fn test_reject_too_deep() {
    let mut doc = two_root_scene("deep.gltf");
    // 0 -> 1 -> 2 -> 3，共四层
    doc.nodes[0].children = vec![1];
    doc.nodes.push(NodeDoc::default());
    doc.nodes[2].children = vec![3];
    doc.roots = vec![0];
    assert_rejected(doc, |err| matches!(err, ImportError::HierarchyTooDeep { node: 3, depth: 3, max: 3 }));
}

#[test]
fn test_reject_shared_node() {
    let mut doc = two_root_scene("shared.gltf");
    doc.nodes[0].children = vec![2];
    assert_rejected(doc, |err| matches!(err, ImportError::NodeVisitedTwice { node: 2 }));
}

#[test]
fn test_missing_texture_is_not_fatal() {
    let scene = SceneCore::default();
    let doc = with_emissive_texture(two_root_scene("missing-texture.gltf"));
    let uploader = Arc::new(StagingUploader::new());
    let importer =
        SceneImporter::with_collaborators(ImportConfig::default(), Box::new(ImageTextureLoader), uploader.clone())
            .unwrap();

    importer.import(doc, &scene).unwrap();
    assert!(uploader.is_empty());
    let materials = scene.materials();
    assert!(materials.materials()[0].emissive_map.is_none());
    drop(materials);

    // 贴图缺失时按亮度 1 估计
    let emissives = scene.emissives();
    assert!((emissives.triangle_power()[0] - 1.0).abs() < 1e-5);
}

#[test]
fn test_loaded_texture_is_uploaded() {
    let scene = SceneCore::default();
    let doc = with_emissive_texture(two_root_scene("white-texture.gltf"));
    let uploader = Arc::new(StagingUploader::new());
    let importer =
        SceneImporter::with_collaborators(ImportConfig::default(), Box::new(WhiteLoader), uploader.clone()).unwrap();

    importer.import(doc, &scene).unwrap();
    assert_eq!(uploader.len(), 1);
    // 每行 8 字节，对齐到 256
    assert_eq!(uploader.total_bytes(), 2 * 256);

    let handle = scene.materials().materials()[0].emissive_map.unwrap();
    assert_eq!(uploader.with_upload(handle, |upload| upload.name.clone()), Some("glow".to_string()));
    assert!((scene.emissives().triangle_power()[1] - 1.0).abs() < 1e-5);
}

#[test]
fn test_broken_texture_fails_import() {
    let scene = SceneCore::default();
    let doc = with_emissive_texture(two_root_scene("broken-texture.gltf"));
    let importer = SceneImporter::with_collaborators(
        ImportConfig::default(),
        Box::new(BrokenLoader),
        Arc::new(StagingUploader::new()),
    )
    .unwrap();

    let err = importer.import(doc, &scene).unwrap_err();
    assert!(matches!(err, ImportError::Texture { image: 0, .. }));
    assert!(scene.is_empty());
}

#[test]
fn test_merge_two_scenes() {
    let scene = SceneCore::default();
    let importer = importer();
    importer.import(two_root_scene("first.gltf"), &scene).unwrap();
    importer.import(two_root_scene("second.gltf"), &scene).unwrap();

    let second = id_hash::scene_id("second.gltf");
    let meshes = scene.meshes();
    assert_eq!(meshes.len(), 4);
    assert_eq!(meshes.vertices().len(), 24);
    let light = meshes.get(id_hash::mesh_id(second, 0, 0)).unwrap();
    assert_eq!(light.base_vertex, 12);
    assert_eq!(light.base_index, 18);
    drop(meshes);

    let emissives = scene.emissives();
    assert_eq!(emissives.subset().len(), 2);
    let entry = emissives.subset().find(id_hash::mesh_id(second, 0, 0)).unwrap();
    assert_eq!(entry.base_vertex, 12);
    assert_eq!(entry.material_index, 2);
    assert_eq!(emissives.triangles().len(), 4);
    assert_eq!(emissives.instances()[1].base_triangle, 2);
    assert_eq!(emissives.alias_table().map(|table| table.len()), Some(4));
    drop(emissives);

    assert_eq!(scene.instances().instance_count(), 6);
}

#[test]
fn test_reimport_same_scene_is_rejected() {
    let scene = SceneCore::default();
    let importer = importer();
    importer.import(two_root_scene("twice.gltf"), &scene).unwrap();

    let err = importer.import(two_root_scene("twice.gltf"), &scene).unwrap_err();
    assert!(matches!(err, ImportError::Commit(SceneError::DuplicateId { .. })));
    assert_eq!(scene.meshes().len(), 2);
    assert_eq!(scene.instances().instance_count(), 3);
}

#[test]
fn test_many_meshes_over_several_workers() {
    let mut doc = SceneDocument::new("grid.gltf");
    doc.materials = vec![
        MaterialDoc {
            emissive_factor: [1.0, 0.0, 0.0],
            ..Default::default()
        },
        MaterialDoc::default(),
    ];
    for i in 0..100 {
        let primitive = quads(&mut doc, 1 + i % 3, i % 2);
        doc.meshes.push(MeshDoc {
            name: format!("mesh-{i}"),
            primitives: vec![primitive],
        });
        doc.nodes.push(NodeDoc {
            transform: translated(0.0, 0.0, i as f32),
            mesh: Some(i),
            ..Default::default()
        });
        doc.roots.push(i);
    }
    let scene_id = id_hash::scene_id(&doc.name);

    let config = ImportConfig {
        worker_threads: 4,
        min_meshes_per_worker: 4,
        ..Default::default()
    };
    let imported = SceneImporter::new(config).unwrap().import_detached(doc).unwrap();

    assert_eq!(imported.meshes.len(), 100);
    assert_eq!(imported.emissive_subset.len(), 50);
    let entries = imported.emissive_subset.entries();
    assert!(entries.windows(2).all(|w| w[0].mesh_id < w[1].mesh_id));

    // 每个 mesh 的偏移都指向它自己的顶点
    for desc in &imported.meshes {
        let mesh_idx = (0..100).find(|i| id_hash::mesh_id(scene_id, *i, 0) == desc.mesh_id).unwrap();
        assert_eq!(desc.num_indices as usize, 6 * (1 + mesh_idx % 3));
        let first = imported.vertices[desc.base_vertex as usize].position;
        assert_eq!(first, [0.0, 0.0, 0.0]);
    }
    let emissive_triangles: u32 = imported.emissive_instances.iter().map(|i| i.num_triangles).sum();
    assert_eq!(emissive_triangles as usize, imported.emissive_triangles.len());
    assert_eq!(imported.triangle_power.len(), imported.emissive_triangles.len());
}

const EMBEDDED_TRIANGLE: &str = r#"{"asset":{"version":"2.0"},"extensionsUsed":["KHR_materials_emissive_strength"],"scene":0,"scenes":[{"nodes":[0]}],"nodes":[{"name":"root","translation":[0,0,2],"children":[1]},{"name":"lamp","mesh":0}],"meshes":[{"name":"tri","primitives":[{"attributes":{"POSITION":0},"indices":1,"material":0}]}],"materials":[{"name":"light","emissiveFactor":[1,0.5,0.25],"extensions":{"KHR_materials_emissive_strength":{"emissiveStrength":3.0}}}],"accessors":[{"bufferView":0,"componentType":5126,"count":3,"type":"VEC3","min":[0,0,0],"max":[1,1,0]},{"bufferView":1,"componentType":5123,"count":3,"type":"SCALAR"}],"bufferViews":[{"buffer":0,"byteOffset":0,"byteLength":36},{"buffer":0,"byteOffset":36,"byteLength":6}],"buffers":[{"byteLength":44,"uri":"data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAAAAABAAIAAAA="}]}"#;

#[test]
fn test_gltf_document() {
    let dir = std::env::temp_dir().join(format!("truvis-asset-gltf-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("triangle.gltf");
    std::fs::write(&path, EMBEDDED_TRIANGLE).unwrap();

    let doc = gltf_document::load(&path).unwrap();
    assert_eq!(doc.buffers.len(), 1);
    assert_eq!(doc.roots, vec![0]);
    assert_eq!(doc.nodes[0].children, vec![1]);
    assert_eq!(doc.nodes[1].mesh, Some(0));
    let primitive = &doc.meshes[0].primitives[0];
    assert_eq!(primitive.topology, Topology::Triangles);
    assert_eq!(primitive.positions.unwrap().count, 3);
    assert_eq!(primitive.indices.unwrap().component_type, ComponentType::U16);
    assert_eq!(doc.materials[0].emissive_strength, 3.0);
    assert!(doc.materials[0].is_emissive());

    let scene = SceneCore::default();
    let report = importer().import(doc, &scene).unwrap();
    assert_eq!(report.num_triangles, 1);
    assert_eq!(report.num_levels, 2);

    let emissives = scene.emissives();
    let tri = emissives.triangles()[0];
    // z 轴翻转之后平移到 z = -2
    for v in [tri.v0, tri.v1, tri.v2] {
        assert!((v[2] + 2.0).abs() < 1e-5);
    }
    let expected = (0.2126 + 0.7152 * 0.5 + 0.0722 * 0.25) * 3.0 * 0.5;
    assert!((emissives.triangle_power()[0] - expected).abs() < 1e-4);

    std::fs::remove_dir_all(&dir).ok();
}
