//! 流水线运行时错误.

use crate::data::subject::FeatureImageKind;
use crate::data::transform::TransformError;
use crate::filtering::texture::TextureFamily;
use crate::Idx3d;

/// 配置错误. 该类错误是确定性的, 重试只会复现同样的失败.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// 过滤器需要参数, 但执行前未绑定.
    MissingParams {
        /// 过滤器名.
        filter: &'static str,
    },

    /// 为过滤器绑定了类型不匹配的参数.
    ParamMismatch {
        /// 过滤器名.
        filter: &'static str,
    },

    /// 过滤器收到了它不支持的体数据种类 (如对标注执行归一化).
    UnsupportedVolume {
        /// 过滤器名.
        filter: &'static str,
    },

    /// `set_params` 的阶段下标越界.
    StageOutOfRange {
        /// 请求的阶段下标.
        index: usize,
        /// 管道内现有阶段个数.
        len: usize,
    },

    /// 纹理特征族已启用, 但没有绑定对应的外部提取算法.
    FamilyNotBound(TextureFamily),

    /// 纹理特征族已启用, 但其参数表没有激活任何具名特征.
    EmptyFamily(TextureFamily),

    /// 参数表中出现了该特征族不认识的具名特征.
    UnknownFeature {
        /// 特征族.
        family: TextureFamily,
        /// 未知的具名特征.
        name: String,
    },

    /// 采样类别数与逐类别保留概率数不一致.
    SamplingArity {
        /// 类别个数.
        classes: usize,
        /// 保留概率个数.
        rates: usize,
    },

    /// 向特征图像集重复插入了同一种特征图像.
    DuplicateFeature(FeatureImageKind),

    /// 受试者的特征矩阵已存在, 特征提取只允许执行一次.
    MatrixAlreadyBuilt {
        /// 受试者标识.
        id: String,
    },

    /// 训练与推理两侧的特征 schema 不一致.
    SchemaMismatch {
        /// 第一处不一致的描述.
        detail: String,
    },
}

/// 空间对齐错误. 指示上游存在配准或形状层面的 bug,
/// 必须中止当前受试者而不是截断/填充继续.
#[derive(Debug, Clone, PartialEq)]
pub enum AlignError {
    /// 成对图像的空间属性不一致.
    PropertyMismatch {
        /// 哪一对图像.
        what: &'static str,
    },

    /// 体数据形状不一致.
    ShapeMismatch {
        /// 哪一对数据.
        what: &'static str,
        /// 期望形状.
        expected: Idx3d,
        /// 实际形状.
        actual: Idx3d,
    },

    /// masked flatten 后各特征块的体素行数不一致.
    VoxelCountMismatch {
        /// 行数不一致的特征块.
        what: String,
        /// 期望行数.
        expected: usize,
        /// 实际行数.
        actual: usize,
    },

    /// 多通道合成时, 通道名个数与通道数据个数不一致.
    ChannelArity {
        /// 通道名个数.
        names: usize,
        /// 通道数据个数.
        channels: usize,
    },
}

/// 数据加载错误.
#[derive(Debug)]
pub enum LoadError {
    /// nifti 文件读写错误.
    Nifti(nifti::NiftiError),

    /// 仿射变换文件读取/解析错误.
    Transform(TransformError),

    /// 其他底层 I/O 错误.
    Io(std::io::Error),
}

/// 管道统一错误.
#[derive(Debug)]
pub enum PipelineError {
    /// 配置错误.
    Config(ConfigError),

    /// 空间对齐错误.
    Align(AlignError),

    /// 数据加载错误.
    Load(LoadError),

    /// worker 边界传输表示的编解码错误.
    Transfer(bincode::Error),
}

impl From<ConfigError> for PipelineError {
    #[inline]
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<AlignError> for PipelineError {
    #[inline]
    fn from(e: AlignError) -> Self {
        Self::Align(e)
    }
}

impl From<LoadError> for PipelineError {
    #[inline]
    fn from(e: LoadError) -> Self {
        Self::Load(e)
    }
}

impl From<nifti::NiftiError> for PipelineError {
    #[inline]
    fn from(e: nifti::NiftiError) -> Self {
        Self::Load(LoadError::Nifti(e))
    }
}

/// 处理单个受试者时, 携带阶段名的失败.
#[derive(Debug)]
pub struct StageFailure {
    /// 失败的阶段名.
    pub stage: &'static str,

    /// 底层错误.
    pub source: PipelineError,
}

impl StageFailure {
    /// 构造.
    #[inline]
    pub fn new<E: Into<PipelineError>>(stage: &'static str, source: E) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// 批量执行中单个 work item 的失败. 总是携带来源受试者标识与阶段名,
/// 不允许匿名失败.
#[derive(Debug)]
pub struct WorkerError {
    /// 来源受试者标识.
    pub id: String,

    /// 失败的阶段名.
    pub stage: String,

    /// 底层错误.
    pub source: PipelineError,
}

impl WorkerError {
    /// 从阶段失败和受试者标识构造.
    #[inline]
    pub fn from_stage(id: &str, failure: StageFailure) -> Self {
        Self {
            id: id.to_owned(),
            stage: failure.stage.to_owned(),
            source: failure.source,
        }
    }
}
