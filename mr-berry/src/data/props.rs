//! 图像空间属性快照.

use nifti::NiftiHeader;
use serde::{Deserialize, Serialize};

use crate::Idx3d;

/// 图像空间属性: 形状, 体素间距, 原点与方向.
///
/// 在配准阶段结束后从已配准图像的 header 快照一次, 用于:
///
/// 1. 校验同一受试者的所有图像在空间上相互对齐;
/// 2. 将展平的预测向量还原为体数据.
///
/// # 注意
///
/// 方向信息仅保存 quaternion 的 (b, c, d) 三分量, 重采样算法按轴对齐网格处理.
/// 该假设在 atlas 配准后的数据上保证成立, 但可能不适用于任意朝向的原始扫描. fixme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageProperties {
    /// 数据形状, 按 (z, h, w) 排列.
    pub shape: Idx3d,

    /// 体素间距, 按 \[z, h, w\] 排列, 以毫米为单位.
    pub spacing: [f32; 3],

    /// 空间原点 (qoffset), 按 \[x, y, z\] 排列.
    pub origin: [f32; 3],

    /// 方向 quaternion 的 (b, c, d) 分量.
    pub direction: [f32; 3],
}

impl ImageProperties {
    /// 从 nifti header 快照空间属性.
    pub fn from_header(header: &NiftiHeader) -> Self {
        // [W, H, z]. 体素个数数组.
        let [_, w, h, z, ..] = header.dim;
        let [_, sw, sh, sz, ..] = header.pixdim;
        Self {
            shape: (z as usize, h as usize, w as usize),
            spacing: [sz, sh, sw],
            origin: [header.quatern_x, header.quatern_y, header.quatern_z],
            direction: [header.quatern_b, header.quatern_c, header.quatern_d],
        }
    }

    /// 按快照属性重建一个 nifti header.
    ///
    /// 重建出的 header 只携带空间属性, 其余字段保持默认值.
    pub fn to_header(&self) -> NiftiHeader {
        let mut header = NiftiHeader::default();
        let (z, h, w) = self.shape;
        header.dim = [3, w as u16, h as u16, z as u16, 1, 1, 1, 1];
        let [sz, sh, sw] = self.spacing;
        header.pixdim = [1.0, sw, sh, sz, 1.0, 1.0, 1.0, 1.0];
        header.qform_code = 1;
        let [ox, oy, oz] = self.origin;
        (header.quatern_x, header.quatern_y, header.quatern_z) = (ox, oy, oz);
        let [qb, qc, qd] = self.direction;
        (header.quatern_b, header.quatern_c, header.quatern_d) = (qb, qc, qd);
        header
    }

    /// 获取数据体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        let (z, h, w) = self.shape;
        z * h * w
    }

    /// 求 (z, h, w) 体素索引对应的空间点, 按 \[x, y, z\] 排列.
    ///
    /// 轴映射: w -> x, h -> y, z -> z.
    #[inline]
    pub fn point_of(&self, (z, h, w): Idx3d) -> [f64; 3] {
        let [sz, sh, sw] = self.spacing;
        let [ox, oy, oz] = self.origin;
        [
            ox as f64 + w as f64 * sw as f64,
            oy as f64 + h as f64 * sh as f64,
            oz as f64 + z as f64 * sz as f64,
        ]
    }

    /// 求空间点 (按 \[x, y, z\] 排列) 对应的连续体素索引, 按 \[z, h, w\] 排列.
    ///
    /// 返回值不做越界约束, 由调用方的插值逻辑处理.
    #[inline]
    pub fn continuous_index_of(&self, [x, y, z]: [f64; 3]) -> [f64; 3] {
        let [sz, sh, sw] = self.spacing;
        let [ox, oy, oz] = self.origin;
        [
            (z - oz as f64) / sz as f64,
            (y - oy as f64) / sh as f64,
            (x - ox as f64) / sw as f64,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::ImageProperties;

    fn props() -> ImageProperties {
        ImageProperties {
            shape: (4, 8, 16),
            spacing: [2.0, 1.0, 0.5],
            origin: [-3.0, 5.0, 7.0],
            direction: [0.0, 0.0, 0.0],
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let p = props();
        let rebuilt = ImageProperties::from_header(&p.to_header());
        assert_eq!(p, rebuilt);
    }

    #[test]
    fn test_point_index_roundtrip() {
        let p = props();
        let pos = (3, 2, 9);
        let [iz, ih, iw] = p.continuous_index_of(p.point_of(pos));
        assert!((iz - 3.0).abs() < 1e-9);
        assert!((ih - 2.0).abs() < 1e-9);
        assert!((iw - 9.0).abs() < 1e-9);
    }
}
