//! masked flatten: 体数据到矩阵的稳定展平.
//!
//! 所有展平都按同一行优先序遍历体素, 因此同一受试者的每个特征块第 `i` 行
//! 与标签向量第 `i` 个元素指向同一个物理体素.

use ndarray::{Array1, Array2, Array3, Axis};

use crate::data::{ChannelVolume, HeaderAttr, MrLabel};
use crate::error::AlignError;

/// 校验掩膜形状与数据形状一致.
fn check_mask(
    what: &'static str,
    shape: crate::Idx3d,
    mask: Option<&Array3<bool>>,
) -> Result<(), AlignError> {
    match mask {
        Some(m) if m.dim() != shape => Err(AlignError::ShapeMismatch {
            what,
            expected: shape,
            actual: m.dim(),
        }),
        _ => Ok(()),
    }
}

/// 将多通道特征图像展平为 \[选中体素数, 通道数\] 的矩阵.
///
/// `mask` 中 `true` 表示排除. `mask` 为 `None` 时选中所有体素.
pub fn flatten_channels(
    image: &ChannelVolume,
    mask: Option<&Array3<bool>>,
) -> Result<Array2<f32>, AlignError> {
    check_mask("feature image vs mask", image.shape(), mask)?;

    let (z, h, w) = image.shape();
    let channels = image.channels();
    // 构造时保证标准布局, 该 reshape 不会失败.
    let flat = image
        .data()
        .into_shape((z * h * w, channels))
        .expect("特征图像为标准布局");

    match mask {
        None => Ok(flat.to_owned()),
        Some(m) => {
            let keep: Vec<usize> = m
                .iter()
                .enumerate()
                .filter_map(|(row, excluded)| (!excluded).then_some(row))
                .collect();
            Ok(flat.select(Axis(0), &keep))
        }
    }
}

/// 将标注展平为 \[选中体素数\] 的 `i16` 标签向量. 行序与 [`flatten_channels`] 一致.
pub fn flatten_labels(
    label: &MrLabel,
    mask: Option<&Array3<bool>>,
) -> Result<Array1<i16>, AlignError> {
    check_mask("labels vs mask", label.shape(), mask)?;

    let values: Vec<i16> = match mask {
        None => label.data().iter().map(|v| *v as i16).collect(),
        Some(m) => label
            .data()
            .iter()
            .zip(m.iter())
            .filter_map(|(v, excluded)| (!excluded).then_some(*v as i16))
            .collect(),
    };
    Ok(Array1::from_vec(values))
}

#[cfg(test)]
mod tests {
    use super::{flatten_channels, flatten_labels};
    use crate::data::{ChannelVolume, MrLabel, MrScan};
    use crate::error::AlignError;
    use ndarray::Array3;

    fn label() -> MrLabel {
        let data = Array3::from_shape_fn((2, 2, 2), |(z, h, w)| (z * 4 + h * 2 + w) as u8);
        MrLabel::fake(data, [1.0; 3])
    }

    /// 通道值等于体素的行优先序号.
    fn feature() -> ChannelVolume {
        let data = Array3::from_shape_fn((2, 2, 2), |(z, h, w)| (z * 4 + h * 2 + w) as f32);
        ChannelVolume::from_scan(&MrScan::fake(data, [1.0; 3]), "intensity")
    }

    #[test]
    fn test_no_mask_selects_everything() {
        let m = flatten_channels(&feature(), None).unwrap();
        assert_eq!(m.dim(), (8, 1));
        let l = flatten_labels(&label(), None).unwrap();
        assert_eq!(l.len(), 8);
        // 行优先序.
        for row in 0..8 {
            assert_eq!(m[(row, 0)], row as f32);
            assert_eq!(l[row], row as i16);
        }
    }

    #[test]
    fn test_rows_track_the_same_voxel() {
        let mut mask = Array3::from_elem((2, 2, 2), true);
        mask[(0, 1, 0)] = false;
        mask[(1, 1, 1)] = false;

        let m = flatten_channels(&feature(), Some(&mask)).unwrap();
        let l = flatten_labels(&label(), Some(&mask)).unwrap();
        assert_eq!(m.dim(), (2, 1));
        assert_eq!(l.len(), 2);
        // 特征块与标签向量的同一行指向同一体素.
        assert_eq!(m[(0, 0)], 2.0);
        assert_eq!(l[0], 2);
        assert_eq!(m[(1, 0)], 7.0);
        assert_eq!(l[1], 7);
    }

    #[test]
    fn test_mask_shape_mismatch() {
        let mask = Array3::from_elem((1, 2, 2), false);
        assert!(matches!(
            flatten_channels(&feature(), Some(&mask)),
            Err(AlignError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            flatten_labels(&label(), Some(&mask)),
            Err(AlignError::ShapeMismatch { .. })
        ));
    }
}
