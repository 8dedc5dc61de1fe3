//! 预处理阶段: 配准、去颅骨与强度归一化.
//!
//! "配准" 在这里指将体数据按预计算的仿射变换重采样到参考 (atlas) 网格上;
//! 变换本身由外部配准优化器离线求得, 不在本 crate 范围内.

use std::sync::Arc;

use ndarray::{Array3, ArrayView3, ArrayViewMut2, Axis};

use crate::data::{
    AffineTransform, HeaderAttr, ImageProperties, MrLabel, MrScan, MrVolume,
};
use crate::error::{AlignError, ConfigError, PipelineError};
use crate::filtering::{FilterParams, PipelineFilter};

/// 标准差低于该值的图像被视为常值图像, 归一化时原样返回.
const STD_EPS: f32 = 1e-6;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};

        /// 按 z 方向切片逐层处理输出数组, 多线程模式.
        pub(crate) fn for_each_slice<T, F>(data: &mut Array3<T>, op: F)
        where
            T: Send + Sync,
            F: Fn(usize, ArrayViewMut2<'_, T>) + Sync + Send,
        {
            data.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(z, slice)| op(z, slice));
        }
    } else {
        /// 按 z 方向切片逐层处理输出数组, 单线程模式.
        pub(crate) fn for_each_slice<T, F>(data: &mut Array3<T>, op: F)
        where
            T: Send,
            F: Fn(usize, ArrayViewMut2<'_, T>) + Sync + Send,
        {
            data.axis_iter_mut(Axis(0))
                .enumerate()
                .for_each(|(z, slice)| op(z, slice));
        }
    }
}

/// 三线性插值采样. 越界部分按 0 处理.
fn trilinear(data: &ArrayView3<'_, f32>, [iz, ih, iw]: [f64; 3]) -> f32 {
    let (nz, nh, nw) = data.dim();
    let (z0, h0, w0) = (iz.floor(), ih.floor(), iw.floor());
    let (fz, fh, fw) = (iz - z0, ih - h0, iw - w0);

    let mut acc = 0.0f64;
    for (dz, wz) in [(0i64, 1.0 - fz), (1, fz)] {
        for (dh, wh) in [(0i64, 1.0 - fh), (1, fh)] {
            for (dw, ww) in [(0i64, 1.0 - fw), (1, fw)] {
                let weight = wz * wh * ww;
                if weight == 0.0 {
                    continue;
                }
                let (z, h, w) = (z0 as i64 + dz, h0 as i64 + dh, w0 as i64 + dw);
                if z < 0 || h < 0 || w < 0 {
                    continue;
                }
                let (z, h, w) = (z as usize, h as usize, w as usize);
                if z >= nz || h >= nh || w >= nw {
                    continue;
                }
                acc += weight * data[(z, h, w)] as f64;
            }
        }
    }
    acc as f32
}

/// 最近邻采样. 越界部分按默认值 (0) 处理.
fn nearest<T: Copy + Default>(data: &ArrayView3<'_, T>, [iz, ih, iw]: [f64; 3]) -> T {
    let (nz, nh, nw) = data.dim();
    let (z, h, w) = (iz.round(), ih.round(), iw.round());
    if z < 0.0 || h < 0.0 || w < 0.0 {
        return T::default();
    }
    let (z, h, w) = (z as usize, h as usize, w as usize);
    if z >= nz || h >= nh || w >= nw {
        return T::default();
    }
    data[(z, h, w)]
}

/// 将移动体数据重采样到参考网格, 逐点取值方式由 `sample` 给出.
fn resample<T>(
    moving: &ArrayView3<'_, T>,
    moving_props: &ImageProperties,
    reference: &ImageProperties,
    transform: &AffineTransform,
    sample: impl Fn(&ArrayView3<'_, T>, [f64; 3]) -> T + Sync + Send,
) -> Array3<T>
where
    T: Copy + Default + Send + Sync,
{
    let mut out = Array3::<T>::default(reference.shape);
    for_each_slice(&mut out, |z, mut slice| {
        for ((h, w), v) in slice.indexed_iter_mut() {
            let point = reference.point_of((z, h, w));
            let mapped = transform.apply(point);
            *v = sample(moving, moving_props.continuous_index_of(mapped));
        }
    });
    out
}

/// 配准参数.
#[derive(Debug)]
pub struct RegistrationParams {
    /// 参考图像 (atlas). 作为共享只读状态, 通过 `Arc` 在各受试者间复用.
    pub reference: Arc<MrScan>,

    /// 将参考空间点映射到移动图像空间的预计算仿射变换.
    pub transform: AffineTransform,

    /// 是否按标注图像处理 (强制最近邻采样以保持离散类别码).
    pub is_label: bool,
}

/// 配准阶段: 将体数据重采样到参考网格上.
///
/// 输出的空间属性恒等于参考图像的空间属性.
#[derive(Debug, Default)]
pub struct ImageRegistration {
    params: Option<RegistrationParams>,
}

impl ImageRegistration {
    /// 创建参数未绑定的配准阶段.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineFilter for ImageRegistration {
    #[inline]
    fn name(&self) -> &'static str {
        "registration"
    }

    #[inline]
    fn ready(&self) -> bool {
        self.params.is_some()
    }

    fn set_params(&mut self, params: FilterParams) -> Result<(), ConfigError> {
        match params {
            FilterParams::Registration(p) => {
                self.params = Some(p);
                Ok(())
            }
            _ => Err(ConfigError::ParamMismatch {
                filter: self.name(),
            }),
        }
    }

    fn execute(&self, input: &MrVolume) -> Result<MrVolume, PipelineError> {
        let params = self.params.as_ref().ok_or(ConfigError::MissingParams {
            filter: self.name(),
        })?;
        let reference = params.reference.props();

        match input {
            MrVolume::Scan(scan) => {
                let data = if params.is_label {
                    resample(
                        &scan.data(),
                        &scan.props(),
                        &reference,
                        &params.transform,
                        |d, i| nearest(d, i),
                    )
                } else {
                    resample(
                        &scan.data(),
                        &scan.props(),
                        &reference,
                        &params.transform,
                        |d, i| trilinear(d, i),
                    )
                };
                Ok(MrScan::from_parts(data, &reference).into())
            }
            // 标注数据无条件使用最近邻采样.
            MrVolume::Label(label) => {
                let data = resample(
                    &label.data(),
                    &label.props(),
                    &reference,
                    &params.transform,
                    |d, i| nearest(d, i),
                );
                Ok(MrLabel::from_parts(data, &reference).into())
            }
        }
    }
}

/// 去颅骨参数.
#[derive(Debug)]
pub struct SkullStripParams {
    /// 已配准的脑掩膜. 非零体素视为脑内.
    pub mask: MrLabel,
}

/// 去颅骨阶段: 将脑掩膜外的体素强度清零.
#[derive(Debug, Default)]
pub struct SkullStripping {
    params: Option<SkullStripParams>,
}

impl SkullStripping {
    /// 创建参数未绑定的去颅骨阶段.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineFilter for SkullStripping {
    #[inline]
    fn name(&self) -> &'static str {
        "skull-stripping"
    }

    #[inline]
    fn ready(&self) -> bool {
        self.params.is_some()
    }

    fn set_params(&mut self, params: FilterParams) -> Result<(), ConfigError> {
        match params {
            FilterParams::SkullStrip(p) => {
                self.params = Some(p);
                Ok(())
            }
            _ => Err(ConfigError::ParamMismatch {
                filter: self.name(),
            }),
        }
    }

    fn execute(&self, input: &MrVolume) -> Result<MrVolume, PipelineError> {
        let params = self.params.as_ref().ok_or(ConfigError::MissingParams {
            filter: self.name(),
        })?;
        let scan = input.as_scan().ok_or(ConfigError::UnsupportedVolume {
            filter: self.name(),
        })?;

        if scan.shape() != params.mask.shape() {
            return Err(AlignError::ShapeMismatch {
                what: "scan vs brain mask",
                expected: scan.shape(),
                actual: params.mask.shape(),
            }
            .into());
        }

        let mut data = scan.data().to_owned();
        data.zip_mut_with(&params.mask.data(), |v, m| {
            if *m == 0 {
                *v = 0.0;
            }
        });
        Ok(MrScan::from_parts(data, &scan.props()).into())
    }
}

/// 强度归一化阶段: 全图 z-score.
///
/// 常值图像 (标准差趋于 0) 原样返回, 不产生 NaN.
#[derive(Debug, Default)]
pub struct ImageNormalization;

impl ImageNormalization {
    /// 创建归一化阶段. 该阶段无参数.
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl PipelineFilter for ImageNormalization {
    #[inline]
    fn name(&self) -> &'static str {
        "normalization"
    }

    fn set_params(&mut self, _params: FilterParams) -> Result<(), ConfigError> {
        Err(ConfigError::ParamMismatch {
            filter: self.name(),
        })
    }

    fn execute(&self, input: &MrVolume) -> Result<MrVolume, PipelineError> {
        let scan = input.as_scan().ok_or(ConfigError::UnsupportedVolume {
            filter: self.name(),
        })?;

        let n = scan.size() as f64;
        let mean = scan.data().iter().map(|v| *v as f64).sum::<f64>() / n;
        let var = scan
            .data()
            .iter()
            .map(|v| {
                let d = *v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        let std = var.sqrt() as f32;

        if std < STD_EPS {
            return Ok(input.clone());
        }

        let mean = mean as f32;
        let data = scan.data().mapv(|v| (v - mean) / std);
        Ok(MrScan::from_parts(data, &scan.props()).into())
    }
}
