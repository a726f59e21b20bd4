use glam::{Mat4, Quat, Vec3};

/// 缩放、旋转、平移三部分组成的局部变换
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineTransform {
    pub scale: Vec3,
    pub rotation: Quat,
    pub translation: Vec3,
}
impl Default for AffineTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}
impl AffineTransform {
    pub const IDENTITY: Self = Self {
        scale: Vec3::ONE,
        rotation: Quat::IDENTITY,
        translation: Vec3::ZERO,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    /// 分解矩阵；矩阵包含切变时结果只是近似
    pub fn from_mat4(m: &Mat4) -> Self {
        let (scale, rotation, translation) = m.to_scale_rotation_translation();
        Self {
            scale,
            rotation,
            translation,
        }
    }

    /// T * R * S
    #[inline]
    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mat4_round_trip() {
        let t = AffineTransform {
            scale: Vec3::new(2.0, 3.0, 0.5),
            rotation: Quat::from_rotation_y(0.7),
            translation: Vec3::new(1.0, -2.0, 4.0),
        };
        let back = AffineTransform::from_mat4(&t.to_mat4());
        assert!((back.scale - t.scale).abs().max_element() < 1e-5);
        assert!((back.translation - t.translation).abs().max_element() < 1e-5);
        assert!(back.rotation.dot(t.rotation).abs() > 1.0 - 1e-5);
    }
}
