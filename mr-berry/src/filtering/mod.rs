//! 过滤器管道: 按序执行、逐阶段绑定参数的图像变换链.
//!
//! 管道先通过 [`FilterPipeline::add`] 追加阶段 (此时参数未绑定), 再通过
//! [`FilterPipeline::set_params`] 为指定下标的阶段绑定参数, 最后
//! [`FilterPipeline::execute`] 严格按插入序执行. 空管道是恒等变换.
//!
//! 阶段把输入当作只读数据, 总是返回新的体数据. 这是必须的: 同一张源图像会被
//! 送入多条独立配置的管道 (如 T1w 与 T2w 各自的预处理链), 它们之间不允许别名.

pub mod post;
pub mod prep;
pub mod texture;

use crate::data::MrVolume;
use crate::error::{ConfigError, PipelineError};

/// 可绑定到管道阶段上的参数.
#[derive(Debug)]
pub enum FilterParams {
    /// 配准参数.
    Registration(prep::RegistrationParams),

    /// 去颅骨参数.
    SkullStrip(prep::SkullStripParams),

    /// dense CRF 后处理参数.
    DenseCrf(post::DenseCrfParams),
}

/// 管道阶段.
///
/// 需要参数的阶段在参数绑定前 `ready` 返回 `false`,
/// 此时执行管道会得到配置错误而不是部分执行的结果.
pub trait PipelineFilter {
    /// 阶段名, 用于错误信息.
    fn name(&self) -> &'static str;

    /// 参数是否已就绪.
    #[inline]
    fn ready(&self) -> bool {
        true
    }

    /// 绑定/覆盖参数. 收到类型不匹配的参数时返回 `Err`.
    fn set_params(&mut self, params: FilterParams) -> Result<(), ConfigError>;

    /// 对输入执行变换, 返回新的体数据. 输入不会被修改.
    fn execute(&self, input: &MrVolume) -> Result<MrVolume, PipelineError>;
}

/// 过滤器管道: 有序的 (阶段, 参数) 序列.
#[derive(Default)]
pub struct FilterPipeline {
    stages: Vec<Box<dyn PipelineFilter>>,
}

impl FilterPipeline {
    /// 创建空管道.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个阶段 (参数未绑定), 返回其下标.
    pub fn add(&mut self, filter: Box<dyn PipelineFilter>) -> usize {
        self.stages.push(filter);
        self.stages.len() - 1
    }

    /// 为下标为 `index` 的阶段绑定/覆盖参数.
    pub fn set_params(&mut self, index: usize, params: FilterParams) -> Result<(), ConfigError> {
        let len = self.stages.len();
        match self.stages.get_mut(index) {
            None => Err(ConfigError::StageOutOfRange { index, len }),
            Some(stage) => stage.set_params(params),
        }
    }

    /// 阶段个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// 判断管道是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// 严格按插入序执行所有阶段, 每个阶段消费前一阶段的输出.
    ///
    /// 空管道返回输入的逐 bit 等价副本. 任一阶段参数未就绪时返回配置错误.
    pub fn execute(&self, input: &MrVolume) -> Result<MrVolume, PipelineError> {
        let mut current = input.clone();
        for stage in &self.stages {
            if !stage.ready() {
                return Err(ConfigError::MissingParams {
                    filter: stage.name(),
                }
                .into());
            }
            current = stage.execute(&current)?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::prep::ImageRegistration;
    use super::FilterPipeline;
    use crate::data::{HeaderAttr, MrScan, MrVolume};
    use crate::error::{ConfigError, PipelineError};
    use ndarray::Array3;

    fn volume() -> MrVolume {
        let data = Array3::from_shape_fn((2, 3, 4), |(z, h, w)| (z * 100 + h * 10 + w) as f32);
        MrVolume::Scan(MrScan::fake(data, [2.0, 1.0, 1.0]))
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let pipeline = FilterPipeline::new();
        assert!(pipeline.is_empty());

        let input = volume();
        let output = pipeline.execute(&input).unwrap();
        let (input, output) = (input.into_scan().unwrap(), output.into_scan().unwrap());
        assert_eq!(input.data(), output.data());
        assert_eq!(input.props(), output.props());
    }

    #[test]
    fn test_unbound_params_fail_before_running() {
        let mut pipeline = FilterPipeline::new();
        let index = pipeline.add(Box::new(ImageRegistration::new()));
        assert_eq!(index, 0);
        assert_eq!(pipeline.len(), 1);

        match pipeline.execute(&volume()) {
            Err(PipelineError::Config(ConfigError::MissingParams { filter })) => {
                assert_eq!(filter, "registration");
            }
            other => panic!("意外结果: {other:?}"),
        }
    }

    #[test]
    fn test_set_params_rejects_bad_index() {
        let mut pipeline = FilterPipeline::new();
        let err = pipeline.set_params(
            3,
            super::FilterParams::SkullStrip(super::prep::SkullStripParams {
                mask: crate::data::MrLabel::fake(Array3::zeros((1, 1, 1)), [1.0; 3]),
            }),
        );
        assert!(matches!(
            err,
            Err(ConfigError::StageOutOfRange { index: 3, len: 0 })
        ));
    }
}
