use crate::document::ImageSource;
use glam::Vec3;
use truvis_crate_tools::profile_scope;

/// 解码后的 RGBA8 像素
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedTexture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}
impl DecodedTexture {
    /// 最近点采样，uv 按 repeat 处理，返回 [0, 1] 的 rgb
    pub fn sample_rgb(&self, uv: [f32; 2]) -> Vec3 {
        if self.width == 0 || self.height == 0 {
            return Vec3::ZERO;
        }
        let wrap = |t: f32, size: u32| {
            let t = t - t.floor();
            ((t * size as f32) as u32).min(size - 1) as usize
        };
        let x = wrap(uv[0], self.width);
        let y = wrap(uv[1], self.height);
        let idx = (y * self.width as usize + x) * 4;
        Vec3::new(
            self.pixels[idx] as f32,
            self.pixels[idx + 1] as f32,
            self.pixels[idx + 2] as f32,
        ) / 255.0
    }
}

pub enum TextureLoadResult {
    Loaded(DecodedTexture),
    /// 文件不存在，导入器只会输出警告
    NotFound,
    Failed(String),
}

/// 读取并解码贴图
pub trait TextureLoader: Send + Sync {
    fn load(&self, source: &ImageSource) -> TextureLoadResult;
}

/// 使用 image crate 解码，统一转换为 RGBA8
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageTextureLoader;

impl TextureLoader for ImageTextureLoader {
    fn load(&self, source: &ImageSource) -> TextureLoadResult {
        profile_scope!("ImageTextureLoader::load");

        let decoded = match source {
            ImageSource::File(path) => {
                if !path.exists() {
                    return TextureLoadResult::NotFound;
                }
                log::debug!("loading texture: {path:?}");
                image::open(path)
            }
            ImageSource::Memory { bytes, .. } => image::load_from_memory(bytes),
        };

        match decoded {
            Ok(img) => {
                let img = img.into_rgba8();
                let (width, height) = img.dimensions();
                TextureLoadResult::Loaded(DecodedTexture {
                    width,
                    height,
                    pixels: img.into_raw(),
                })
            }
            Err(image::ImageError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                TextureLoadResult::NotFound
            }
            Err(e) => TextureLoadResult::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_wraps() {
        let texture = DecodedTexture {
            width: 2,
            height: 1,
            pixels: vec![255, 0, 0, 255, 0, 0, 255, 255],
        };
        assert_eq!(texture.sample_rgb([0.25, 0.5]), Vec3::X);
        assert_eq!(texture.sample_rgb([0.75, 0.5]), Vec3::Z);
        assert_eq!(texture.sample_rgb([1.25, 0.5]), Vec3::X);
        assert_eq!(texture.sample_rgb([-0.25, 0.5]), Vec3::Z);
    }

    #[test]
    fn test_missing_file() {
        let source = ImageSource::File("does/not/exist.png".into());
        assert!(matches!(ImageTextureLoader.load(&source), TextureLoadResult::NotFound));

        let garbage = ImageSource::Memory {
            bytes: vec![1, 2, 3, 4],
            mime_type: None,
        };
        assert!(matches!(ImageTextureLoader.load(&garbage), TextureLoadResult::Failed(_)));
    }
}
