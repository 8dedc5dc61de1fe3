//! 纹理特征族与外部逐体素提取算法的接口.
//!
//! 纹理数学 (共生矩阵, 一阶统计, 尺寸区) 由外部特征库提供, 本模块只定义
//! 特征族的封闭枚举、各族的规范具名特征表, 以及逐体素提取的 trait 边界.

use std::collections::HashMap;

use ndarray::Array3;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::data::{MrLabel, MrScan};
use crate::error::{ConfigError, PipelineError};

/// 纹理特征族.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFamily {
    /// 灰度共生矩阵特征.
    Glcm,

    /// 一阶统计特征.
    FirstOrder,

    /// 灰度尺寸区矩阵特征.
    Glszm,
}

impl TextureFamily {
    /// 全部特征族, 按固定求值序排列.
    pub const ALL: [TextureFamily; 3] =
        [TextureFamily::Glcm, TextureFamily::FirstOrder, TextureFamily::Glszm];

    /// 特征族的短名.
    #[inline]
    pub fn tag(&self) -> &'static str {
        match self {
            TextureFamily::Glcm => "glcm",
            TextureFamily::FirstOrder => "firstorder",
            TextureFamily::Glszm => "glszm",
        }
    }

    /// 该特征族的规范具名特征表, 顺序固定.
    pub fn canonical_names(&self) -> &'static [&'static str] {
        match self {
            TextureFamily::Glcm => &GLCM_NAMES,
            TextureFamily::FirstOrder => &FIRST_ORDER_NAMES,
            TextureFamily::Glszm => &GLSZM_NAMES,
        }
    }
}

/// GLCM 具名特征表.
const GLCM_NAMES: [&str; 24] = [
    "Autocorrelation",
    "ClusterProminence",
    "ClusterShade",
    "ClusterTendency",
    "Contrast",
    "Correlation",
    "DifferenceAverage",
    "DifferenceEntropy",
    "DifferenceVariance",
    "Id",
    "Idm",
    "Idmn",
    "Idn",
    "Imc1",
    "Imc2",
    "InverseVariance",
    "JointAverage",
    "JointEnergy",
    "JointEntropy",
    "MCC",
    "MaximumProbability",
    "SumAverage",
    "SumEntropy",
    "SumSquares",
];

/// 一阶统计具名特征表.
const FIRST_ORDER_NAMES: [&str; 18] = [
    "10Percentile",
    "90Percentile",
    "Energy",
    "Entropy",
    "InterquartileRange",
    "Kurtosis",
    "Maximum",
    "MeanAbsoluteDeviation",
    "Mean",
    "Median",
    "Minimum",
    "Range",
    "RobustMeanAbsoluteDeviation",
    "RootMeanSquared",
    "Skewness",
    "TotalEnergy",
    "Uniformity",
    "Variance",
];

/// GLSZM 具名特征表.
const GLSZM_NAMES: [&str; 16] = [
    "SmallAreaEmphasis",
    "LargeAreaEmphasis",
    "GrayLevelNonUniformity",
    "GrayLevelNonUniformityNormalized",
    "SizeZoneNonUniformity",
    "SizeZoneNonUniformityNormalized",
    "ZonePercentage",
    "GrayLevelVariance",
    "ZoneVariance",
    "ZoneEntropy",
    "LowGrayLevelZoneEmphasis",
    "HighGrayLevelZoneEmphasis",
    "SmallAreaLowGrayLevelEmphasis",
    "SmallAreaHighGrayLevelEmphasis",
    "LargeAreaLowGrayLevelEmphasis",
    "LargeAreaHighGrayLevelEmphasis",
];

static DEFAULT_GLCM_PARAMS: Lazy<HashMap<String, bool>> =
    Lazy::new(|| all_disabled(&GLCM_NAMES));

static DEFAULT_FIRST_ORDER_PARAMS: Lazy<HashMap<String, bool>> =
    Lazy::new(|| all_disabled(&FIRST_ORDER_NAMES));

static DEFAULT_GLSZM_PARAMS: Lazy<HashMap<String, bool>> =
    Lazy::new(|| all_disabled(&GLSZM_NAMES));

fn all_disabled(names: &[&str]) -> HashMap<String, bool> {
    names.iter().map(|n| ((*n).to_owned(), false)).collect()
}

/// 获取某特征族的默认参数表: 包含全部具名特征, 且全部关闭.
/// 调用方按需把想要的具名特征置为 `true`.
pub fn default_parameters(family: TextureFamily) -> HashMap<String, bool> {
    match family {
        TextureFamily::Glcm => DEFAULT_GLCM_PARAMS.clone(),
        TextureFamily::FirstOrder => DEFAULT_FIRST_ORDER_PARAMS.clone(),
        TextureFamily::Glszm => DEFAULT_GLSZM_PARAMS.clone(),
    }
}

/// 依照规范顺序筛选参数表中激活的具名特征.
///
/// 参数表中出现规范表之外的键时返回 `Err`; 没有任何激活项时也返回 `Err`,
/// 因为 "启用了特征族却不产生任何列" 几乎总是配置笔误.
pub fn enabled_names(
    family: TextureFamily,
    parameters: &HashMap<String, bool>,
) -> Result<Vec<String>, ConfigError> {
    let canonical = family.canonical_names();
    for key in parameters.keys() {
        if !canonical.contains(&key.as_str()) {
            return Err(ConfigError::UnknownFeature {
                family,
                name: key.clone(),
            });
        }
    }

    let names: Vec<String> = canonical
        .iter()
        .filter(|n| parameters.get(**n).copied().unwrap_or(false))
        .map(|n| (*n).to_owned())
        .collect();

    if names.is_empty() {
        return Err(ConfigError::EmptyFamily(family));
    }
    Ok(names)
}

/// 外部逐体素纹理特征提取算法.
///
/// 实现方在 `mask` 非零的体素上工作, 对每个激活的具名特征产出一个与输入等形状的
/// 标量体数据 (逐体素模式, 不是整图聚合标量). 输出顺序必须与 `enabled` 一致.
/// 输出的空间元数据不被信任, 调用方会以对应模态的属性重新盖章.
pub trait TextureExtractor: Send + Sync {
    /// 该实现覆盖的特征族.
    fn family(&self) -> TextureFamily;

    /// 对 `image` 执行逐体素提取.
    fn extract(
        &self,
        image: &MrScan,
        mask: &MrLabel,
        enabled: &[String],
    ) -> Result<Vec<(String, Array3<f32>)>, PipelineError>;
}

/// 纹理提取算法注册表: 特征族到外部实现的绑定.
#[derive(Default)]
pub struct TextureRegistry {
    entries: Vec<(TextureFamily, Box<dyn TextureExtractor>)>,
}

impl TextureRegistry {
    /// 创建空注册表.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定特征族的外部实现. 同族重复绑定时后者覆盖前者.
    pub fn bind(&mut self, extractor: Box<dyn TextureExtractor>) {
        let family = extractor.family();
        self.entries.retain(|(f, _)| *f != family);
        self.entries.push((family, extractor));
    }

    /// 查询特征族的外部实现.
    pub fn get(&self, family: TextureFamily) -> Option<&dyn TextureExtractor> {
        self.entries
            .iter()
            .find(|(f, _)| *f == family)
            .map(|(_, e)| e.as_ref())
    }
}
