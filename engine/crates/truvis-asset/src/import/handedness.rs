//! 右手坐标系到引擎左手坐标系的转换：z 轴取反
//!
//! 对矩阵做 `S * M * S`，`S = diag(1, 1, -1)`；
//! 对 TRS 来说等价于平移 z 取反、四元数变为 `(-x, -y, z, w)`，缩放不变。
//! 顶点的 z 取反之后三角形的绕序会反过来，index 需要交换 1 和 2。

use crate::document::{NodeTransform, SceneDocument};
use crate::error::{ImportError, Result};
use glam::{Mat4, Quat, Vec3};
use truvis_scene::transform::AffineTransform;

#[inline]
pub(crate) fn flip_z(v: [f32; 3]) -> [f32; 3] {
    [v[0], v[1], -v[2]]
}

pub(crate) fn flip_matrix(m: &Mat4) -> Mat4 {
    let s = Mat4::from_scale(Vec3::new(1.0, 1.0, -1.0));
    s * *m * s
}

/// 节点在引擎坐标系下的局部变换
///
/// 行列式不为正的变换 (镜像、退化) 会导致绕序和法线错误，直接拒绝
pub(crate) fn node_local_transform(doc: &SceneDocument, node_idx: usize) -> Result<AffineTransform> {
    let (transform, determinant) = match doc.nodes[node_idx].transform {
        NodeTransform::Matrix(cols) => {
            let m = flip_matrix(&Mat4::from_cols_array(&cols));
            (AffineTransform::from_mat4(&m), m.determinant())
        }
        NodeTransform::Trs {
            translation,
            rotation,
            scale,
        } => {
            let [x, y, z, w] = rotation;
            let transform = AffineTransform {
                scale: Vec3::from(scale),
                rotation: Quat::from_xyzw(-x, -y, z, w).normalize(),
                translation: Vec3::from(flip_z(translation)),
            };
            (transform, scale[0] * scale[1] * scale[2])
        }
    };

    // NaN 也在这里被拒绝
    if !(determinant > 0.0) {
        return Err(ImportError::DegenerateTransform {
            node: node_idx,
            determinant,
        });
    }
    Ok(transform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::NodeDoc;

    fn doc_with(transform: NodeTransform) -> SceneDocument {
        SceneDocument {
            nodes: vec![NodeDoc {
                transform,
                ..Default::default()
            }],
            roots: vec![0],
            ..Default::default()
        }
    }

    #[test]
    fn test_trs_matches_matrix_conversion() {
        let rotation = Quat::from_euler(glam::EulerRot::XYZ, 0.3, -0.8, 1.1);
        let translation = [1.0, 2.0, 3.0];
        let scale = [2.0, 0.5, 1.5];

        let from_trs = node_local_transform(
            &doc_with(NodeTransform::Trs {
                translation,
                rotation: rotation.to_array(),
                scale,
            }),
            0,
        )
        .unwrap();

        let m = Mat4::from_scale_rotation_translation(Vec3::from(scale), rotation, Vec3::from(translation));
        let expected = flip_matrix(&m);
        assert!(from_trs.to_mat4().abs_diff_eq(expected, 1e-5));

        let from_matrix = node_local_transform(&doc_with(NodeTransform::Matrix(m.to_cols_array())), 0).unwrap();
        assert!(from_matrix.to_mat4().abs_diff_eq(expected, 1e-4));
    }

    #[test]
    fn test_flipped_point() {
        let m = Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0));
        let p = flip_matrix(&m).transform_point3(Vec3::from(flip_z([1.0, 2.0, 3.0])));
        // 先在右手系下变换再翻转，结果一致
        assert_eq!(p, Vec3::from(flip_z(m.transform_point3(Vec3::new(1.0, 2.0, 3.0)).to_array())));
    }

    #[test]
    fn test_mirror_is_rejected() {
        let mirror = NodeTransform::Trs {
            translation: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0, -1.0, 1.0],
        };
        let err = node_local_transform(&doc_with(mirror), 0).unwrap_err();
        assert!(matches!(err, ImportError::DegenerateTransform { node: 0, .. }));

        let zero = NodeTransform::Matrix([0.0; 16]);
        assert!(node_local_transform(&doc_with(zero), 0).is_err());
    }
}
