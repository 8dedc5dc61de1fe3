//! 分割结果的后处理阶段.

use std::collections::VecDeque;
use std::sync::Arc;

use ndarray::Array3;

use crate::consts::tissue;
use crate::data::{ChannelVolume, HeaderAttr, MrLabel, MrScan, MrVolume};
use crate::error::{ConfigError, PipelineError};
use crate::filtering::{FilterParams, PipelineFilter};
use crate::Idx3d;

/// 简单形态学清理阶段: 对每个组织类别只保留最大的 6-连通分量,
/// 其余分量回填为背景.
///
/// 体素级分类器的输出常带有孤立的小块误判, 该阶段将其去除.
#[derive(Debug, Clone)]
pub struct ComponentCleanup {
    classes: Vec<u8>,
}

impl Default for ComponentCleanup {
    fn default() -> Self {
        Self {
            classes: tissue::FOREGROUND_CLASSES.to_vec(),
        }
    }
}

impl ComponentCleanup {
    /// 创建作用于给定类别集合的清理阶段.
    pub fn new<I: IntoIterator<Item = u8>>(classes: I) -> Self {
        Self {
            classes: classes.into_iter().collect(),
        }
    }
}

impl PipelineFilter for ComponentCleanup {
    #[inline]
    fn name(&self) -> &'static str {
        "component-cleanup"
    }

    fn set_params(&mut self, _params: FilterParams) -> Result<(), ConfigError> {
        Err(ConfigError::ParamMismatch {
            filter: self.name(),
        })
    }

    fn execute(&self, input: &MrVolume) -> Result<MrVolume, PipelineError> {
        let label = input.as_label().ok_or(ConfigError::UnsupportedVolume {
            filter: self.name(),
        })?;

        let mut data = label.data().to_owned();
        for &class in &self.classes {
            retain_largest_component(&mut data, class, tissue::BACKGROUND);
        }
        Ok(MrLabel::from_parts(data, &label.props()).into())
    }
}

/// 获取 `pos` 前后上下左右六个点的坐标.
///
/// 在数据范围外的坐标会被过滤掉, 不会包含在返回值中.
fn diamond_neighbours((nz, nh, nw): Idx3d, (z, h, w): Idx3d) -> Vec<Idx3d> {
    [
        (z.wrapping_sub(1), h, w),
        (z.saturating_add(1), h, w),
        (z, h.wrapping_sub(1), w),
        (z, h.saturating_add(1), w),
        (z, h, w.wrapping_sub(1)),
        (z, h, w.saturating_add(1)),
    ]
    .into_iter()
    .filter(|(z0, h0, w0)| *z0 < nz && *h0 < nh && *w0 < nw)
    .collect()
}

/// 对值为 `class` 的体素做 6-连通分量分解, 只保留第一个最大分量,
/// 其余分量全部回填为 `fill_with`.
fn retain_largest_component(data: &mut Array3<u8>, class: u8, fill_with: u8) {
    let dim = data.dim();
    let mut visited = Array3::from_elem(dim, false);
    let mut components: Vec<Vec<Idx3d>> = Vec::new();

    for seed in data
        .indexed_iter()
        .filter_map(|(pos, &v)| (v == class).then_some(pos))
    {
        if visited[seed] {
            continue;
        }

        // 从 seed 出发收集一个连通分量.
        let mut component = Vec::new();
        let mut queue = VecDeque::from([seed]);
        visited[seed] = true;
        while let Some(cur) = queue.pop_front() {
            component.push(cur);
            for next in diamond_neighbours(dim, cur) {
                if !visited[next] && data[next] == class {
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
        }
        components.push(component);
    }

    if components.len() <= 1 {
        return;
    }

    let keep = components
        .iter()
        .enumerate()
        .max_by_key(|(_, c)| c.len())
        .map(|(i, _)| i)
        .unwrap();
    for (_, component) in components.iter().enumerate().filter(|(i, _)| *i != keep) {
        for pos in component {
            data[*pos] = fill_with;
        }
    }
}

/// dense CRF 后处理参数: 强度引导图像与分类器概率输出.
#[derive(Debug)]
pub struct DenseCrfParams {
    /// 已配准的 T1w 扫描.
    pub t1: MrScan,

    /// 已配准的 T2w 扫描.
    pub t2: MrScan,

    /// 分类器的逐类别概率体数据.
    pub probability: ChannelVolume,
}

/// 外部 dense CRF 算法.
pub trait CrfAlgorithm: Send + Sync {
    /// 以强度与概率为证据优化分割结果.
    fn refine(
        &self,
        segmentation: &MrLabel,
        t1: &MrScan,
        t2: &MrScan,
        probability: &ChannelVolume,
    ) -> Result<MrLabel, PipelineError>;
}

/// dense CRF 后处理阶段. 算法本体由外部实现提供.
pub struct DenseCrf {
    algorithm: Arc<dyn CrfAlgorithm>,
    params: Option<DenseCrfParams>,
}

impl DenseCrf {
    /// 创建参数未绑定的 CRF 阶段.
    pub fn new(algorithm: Arc<dyn CrfAlgorithm>) -> Self {
        Self {
            algorithm,
            params: None,
        }
    }
}

impl PipelineFilter for DenseCrf {
    #[inline]
    fn name(&self) -> &'static str {
        "dense-crf"
    }

    #[inline]
    fn ready(&self) -> bool {
        self.params.is_some()
    }

    fn set_params(&mut self, params: FilterParams) -> Result<(), ConfigError> {
        match params {
            FilterParams::DenseCrf(p) => {
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
        let label = input.as_label().ok_or(ConfigError::UnsupportedVolume {
            filter: self.name(),
        })?;

        self.algorithm
            .refine(label, &params.t1, &params.t2, &params.probability)
            .map(MrVolume::Label)
    }
}
