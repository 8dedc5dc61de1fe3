//! 简单特征: atlas 坐标与梯度幅值.

use ndarray::{Array3, ArrayView3};

use crate::data::{ChannelVolume, HeaderAttr, ImageProperties, MrScan};
use crate::filtering::prep::for_each_slice;
use crate::Idx3d;

/// 逐体素 atlas 空间坐标特征 (3 通道: x, y, z).
///
/// 所有模态在配准后共享同一网格, 因此该特征只计算一次.
pub fn atlas_coordinates(props: &ImageProperties) -> ChannelVolume {
    let shape = props.shape;
    let channels: Vec<Array3<f32>> = (0..3)
        .map(|axis| Array3::from_shape_fn(shape, |pos| props.point_of(pos)[axis] as f32))
        .collect();

    ChannelVolume::from_channels(
        vec!["x".to_owned(), "y".to_owned(), "z".to_owned()],
        channels,
        props.clone(),
    )
    .expect("坐标通道与属性同形状")
}

/// 某方向上的中心差分. 边界处退化为单侧差分.
#[inline]
fn diff_along(data: &ArrayView3<'_, f32>, pos: Idx3d, axis: usize, spacing: f64) -> f64 {
    let n = data.dim();
    let n = [n.0, n.1, n.2][axis];
    let i = [pos.0, pos.1, pos.2][axis];

    let at = |j: usize| {
        let mut p = [pos.0, pos.1, pos.2];
        p[axis] = j;
        data[(p[0], p[1], p[2])] as f64
    };

    let (lo, hi) = (i.saturating_sub(1), (i + 1).min(n - 1));
    if hi == lo {
        // 该方向只有一层, 没有可差分的邻居.
        return 0.0;
    }
    (at(hi) - at(lo)) / ((hi - lo) as f64 * spacing)
}

/// 逐体素梯度幅值. 体素间距参与差分权重.
pub fn gradient_magnitude(scan: &MrScan) -> MrScan {
    let props = scan.props();
    let [sz, sh, sw] = props.spacing.map(|v| v as f64);
    let input = scan.data();

    let mut out = Array3::<f32>::zeros(props.shape);
    for_each_slice(&mut out, |z, mut slice| {
        for ((h, w), v) in slice.indexed_iter_mut() {
            let gz = diff_along(&input, (z, h, w), 0, sz);
            let gh = diff_along(&input, (z, h, w), 1, sh);
            let gw = diff_along(&input, (z, h, w), 2, sw);
            *v = (gz * gz + gh * gh + gw * gw).sqrt() as f32;
        }
    });

    MrScan::from_parts(out, &props)
}
