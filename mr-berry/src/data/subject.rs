//! 受试者图像容器: 原始图像、派生特征图像与最终特征矩阵的归属单元.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::{AffineTransform, ChannelVolume, ImageProperties, MrLabel, MrScan};
use crate::error::ConfigError;
use crate::features::schema::FeatureSchema;
use crate::filtering::texture::TextureFamily;

/// 采集模态. 同一受试者的两种 MRI 对比度.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    /// T1 加权.
    T1w,

    /// T2 加权.
    T2w,
}

impl Modality {
    /// 全部模态, 按固定求值序排列.
    pub const ALL: [Modality; 2] = [Modality::T1w, Modality::T2w];

    /// 模态的短名.
    #[inline]
    pub fn tag(&self) -> &'static str {
        match self {
            Modality::T1w => "t1w",
            Modality::T2w => "t2w",
        }
    }
}

/// 特征图像种类. 其取值集合是封闭的, 同一种特征图像最多出现一次.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureImageKind {
    /// atlas 空间体素坐标 (3 通道).
    AtlasCoordinates,

    /// 某模态的原始强度 (1 通道).
    Intensity(Modality),

    /// 某模态的梯度幅值 (1 通道).
    GradientIntensity(Modality),

    /// 某模态下某个纹理特征族的输出 (通道数等于激活的具名特征数).
    Texture(TextureFamily, Modality),
}

impl FeatureImageKind {
    /// 该种类的短名, 用于 schema 列名和错误信息.
    pub fn tag(&self) -> String {
        match self {
            Self::AtlasCoordinates => "atlas-coord".to_owned(),
            Self::Intensity(m) => format!("{}-intensity", m.tag()),
            Self::GradientIntensity(m) => format!("{}-gradient", m.tag()),
            Self::Texture(f, m) => format!("{}-{}", m.tag(), f.tag()),
        }
    }
}

/// 有序特征图像集.
///
/// 迭代序恒等于插入序, 该顺序直接决定特征矩阵的列序, 因此训练与推理两侧
/// 必须以同样的顺序插入. 重复插入同一种特征图像会被拒绝.
#[derive(Debug, Default)]
pub struct FeatureImageSet {
    entries: Vec<(FeatureImageKind, ChannelVolume)>,
}

impl FeatureImageSet {
    /// 创建空集.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 按插入序追加一种特征图像.
    pub fn insert(&mut self, kind: FeatureImageKind, image: ChannelVolume) -> Result<(), ConfigError> {
        if self.entries.iter().any(|(k, _)| *k == kind) {
            return Err(ConfigError::DuplicateFeature(kind));
        }
        self.entries.push((kind, image));
        Ok(())
    }

    /// 获取能按插入序迭代所有特征图像的迭代器.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&FeatureImageKind, &ChannelVolume)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// 特征图像个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 判断是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 所有特征图像的总通道数.
    #[inline]
    pub fn total_channels(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.channels()).sum()
    }

    /// 丢弃所有特征图像, 释放内存.
    #[inline]
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// 特征矩阵: (体素 x 特征列) 的 `f32` 矩阵与逐体素 `i16` 标签向量.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    /// 特征数据, 每行一个体素, 每列一个特征.
    pub data: Array2<f32>,

    /// 标签向量, 行序与 `data` 一致.
    pub labels: Array1<i16>,
}

/// 受试者的固定图像槽位. 每个槽位恰有一个图像, 槽位集合在构造时就已确定,
/// 管道阶段只做原位替换.
#[derive(Debug, Clone)]
pub struct SubjectImages {
    /// T1 加权扫描.
    pub t1: MrScan,

    /// T2 加权扫描.
    pub t2: MrScan,

    /// 真值标注.
    pub ground_truth: MrLabel,

    /// 脑掩膜.
    pub brain_mask: MrLabel,

    /// 预计算的配准仿射变换.
    pub transform: AffineTransform,
}

/// 受试者图像容器: 单个处理单元.
///
/// 生命周期: 加载创建 -> 掩膜配准 -> 模态配准/去颅骨/归一化 -> 特征提取 ->
/// 矩阵组装 (同时清空特征图像) -> 只读使用. 特征矩阵一经写入不可再变.
#[derive(Debug)]
pub struct Subject {
    id: String,

    /// 原始/已配准图像槽位.
    pub images: SubjectImages,

    /// 派生特征图像, 由特征提取按固定求值序增量填充, 矩阵组装后清空.
    pub feature_images: FeatureImageSet,

    feature_matrix: Option<FeatureMatrix>,
    schema: Option<FeatureSchema>,
    properties: Option<ImageProperties>,
}

impl Subject {
    /// 创建容器. `id` 一经设置不可修改.
    pub fn new(id: impl Into<String>, images: SubjectImages) -> Self {
        Self {
            id: id.into(),
            images,
            feature_images: FeatureImageSet::new(),
            feature_matrix: None,
            schema: None,
            properties: None,
        }
    }

    /// 受试者标识.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 配准后快照的空间属性. 配准阶段尚未运行时为 `None`.
    #[inline]
    pub fn properties(&self) -> Option<&ImageProperties> {
        self.properties.as_ref()
    }

    /// 快照空间属性. 应在配准阶段结束后调用一次.
    #[inline]
    pub fn set_properties(&mut self, props: ImageProperties) {
        self.properties = Some(props);
    }

    /// 已组装的特征矩阵. 组装尚未发生时为 `None`.
    #[inline]
    pub fn feature_matrix(&self) -> Option<&FeatureMatrix> {
        self.feature_matrix.as_ref()
    }

    /// 与特征矩阵列序对应的 schema.
    #[inline]
    pub fn schema(&self) -> Option<&FeatureSchema> {
        self.schema.as_ref()
    }

    /// 写入特征矩阵与 schema, 并清空特征图像以释放内存.
    ///
    /// 每个容器只允许写入一次, 重复写入返回 `Err`.
    pub fn install_feature_matrix(
        &mut self,
        matrix: FeatureMatrix,
        schema: FeatureSchema,
    ) -> Result<(), ConfigError> {
        if self.feature_matrix.is_some() {
            return Err(ConfigError::MatrixAlreadyBuilt {
                id: self.id.clone(),
            });
        }
        self.feature_matrix = Some(matrix);
        self.schema = Some(schema);
        self.feature_images.clear();
        Ok(())
    }
}
