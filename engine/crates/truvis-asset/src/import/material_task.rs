//! 贴图 worker 与材质构建

use super::context::{ImportContext, LoadedTexture, TaskOutputs};
use crate::document::{AlphaModeDoc, MaterialDoc};
use crate::error::{ImportError, Result};
use crate::texture_loader::TextureLoadResult;
use crate::upload::{UploadKind, write_pitched_rows};
use glam::{Vec3, Vec4};
use std::ops::Range;
use truvis_crate_tools::profile_scope;
use truvis_scene::material::{AlphaMode, Material};
use truvis_utils::id_hash;

/// 加载并上传一段连续的贴图，每个 worker 使用自己的 scratch buffer
pub(crate) fn run_texture_worker(ctx: &ImportContext, outputs: &TaskOutputs, images: Range<usize>) -> Result<()> {
    profile_scope!("import::texture_worker");
    let doc = ctx.doc;

    let mut scratch = Vec::new();
    for image_idx in images {
        let image = &doc.images[image_idx];
        let keep_pixels = doc
            .materials
            .iter()
            .any(|m| m.is_emissive() && m.emissive_texture == Some(image_idx));

        let loaded = match ctx.texture_loader.load(&image.source) {
            TextureLoadResult::Loaded(texture) => {
                let row_pitch = write_pitched_rows(texture.width, texture.height, &texture.pixels, &mut scratch);
                let handle = ctx.uploader.upload(
                    &image.name,
                    UploadKind::Texture {
                        width: texture.width,
                        height: texture.height,
                        row_pitch,
                    },
                    &scratch,
                );
                log::debug!(
                    "texture `{}` uploaded: {}x{} -> {handle:?}",
                    image.name,
                    texture.width,
                    texture.height
                );
                LoadedTexture {
                    handle: Some(handle),
                    pixels: keep_pixels.then_some(texture),
                }
            }
            TextureLoadResult::NotFound => {
                log::warn!("texture `{}` ({:?}) not found, slot left empty", image.name, image.source_path());
                LoadedTexture::default()
            }
            TextureLoadResult::Failed(reason) => {
                return Err(ImportError::Texture {
                    image: image_idx,
                    name: image.name.clone(),
                    reason,
                });
            }
        };
        TaskOutputs::publish(&outputs.textures[image_idx], loaded, "texture");
    }
    Ok(())
}

/// 按文档中的顺序构建材质，贴图槽位引用上传后的句柄
pub(crate) fn build_materials(ctx: &ImportContext, outputs: &TaskOutputs) -> Vec<(u64, Material)> {
    profile_scope!("import::materials");

    let handle_of = |image: Option<usize>| image.and_then(|idx| outputs.textures[idx].get()?.handle);
    ctx.doc
        .materials
        .iter()
        .enumerate()
        .map(|(idx, doc_mat)| {
            let material = convert_material(doc_mat, &handle_of);
            (id_hash::material_id(ctx.scene_id, idx), material)
        })
        .collect()
}

fn convert_material(
    doc_mat: &MaterialDoc,
    handle_of: &impl Fn(Option<usize>) -> Option<truvis_scene::handles::GpuHandle>,
) -> Material {
    Material {
        base_color: Vec4::from(doc_mat.base_color_factor),
        emissive: Vec3::from(doc_mat.emissive_factor),
        emissive_strength: doc_mat.emissive_strength,
        metallic: doc_mat.metallic_factor,
        roughness: doc_mat.roughness_factor,
        alpha_mode: match doc_mat.alpha_mode {
            AlphaModeDoc::Opaque => AlphaMode::Opaque,
            AlphaModeDoc::Mask => AlphaMode::Mask,
            AlphaModeDoc::Blend => AlphaMode::Blend,
        },
        alpha_cutoff: doc_mat.alpha_cutoff,
        double_sided: doc_mat.double_sided,

        base_color_map: handle_of(doc_mat.base_color_texture),
        normal_map: handle_of(doc_mat.normal_texture),
        metallic_roughness_map: handle_of(doc_mat.metallic_roughness_texture),
        emissive_map: handle_of(doc_mat.emissive_texture),
    }
}
