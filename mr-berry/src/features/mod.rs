//! 特征提取与特征矩阵组装.
//!
//! 特征图像按固定求值序产生: atlas 坐标 -> 逐模态强度 -> 逐模态梯度 ->
//! 逐模态纹理特征族. 该顺序直接决定特征矩阵的列序, 训练与推理两侧必须一致;
//! 组装同时产出描述列序的 [`schema::FeatureSchema`] 用于对账.

pub mod flatten;
pub mod sampler;
pub mod schema;
pub mod simple;

use std::collections::HashMap;

use itertools::izip;
use ndarray::{concatenate, Array2, Axis};

use crate::consts;
use crate::data::subject::{FeatureImageKind, FeatureMatrix, Modality, Subject};
use crate::data::{ChannelVolume, HeaderAttr, MrScan};
use crate::error::{AlignError, ConfigError, PipelineError};
use crate::filtering::texture::{
    default_parameters, enabled_names, TextureFamily, TextureRegistry,
};
use flatten::{flatten_channels, flatten_labels};
use schema::{FeatureColumn, FeatureSchema};

/// 单个纹理特征族的配置.
#[derive(Debug, Clone)]
pub struct TextureFamilyConfig {
    /// 是否启用该特征族.
    pub enabled: bool,

    /// 具名特征开关表. 键必须来自该族的规范特征表.
    pub parameters: HashMap<String, bool>,
}

impl TextureFamilyConfig {
    /// 关闭状态的默认配置, 参数表包含全部具名特征且全部关闭.
    pub fn disabled(family: TextureFamily) -> Self {
        Self {
            enabled: false,
            parameters: default_parameters(family),
        }
    }
}

/// 训练体素采样配置.
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// 参与训练的类别表.
    pub class_ids: Vec<u8>,

    /// 与类别表一一对应的纳入概率.
    pub rates: Vec<f64>,

    /// 随机种子.
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            class_ids: consts::tissue::ALL_CLASSES.to_vec(),
            rates: consts::DEFAULT_SAMPLING_RATES.to_vec(),
            seed: consts::DEFAULT_SAMPLING_SEED,
        }
    }
}

/// 特征提取配置.
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    /// 训练模式: 启用训练体素采样. 推理模式不加掩膜,
    /// 背景体素的排除由调用方负责, 这里不做强制.
    pub training: bool,

    /// 是否产出 atlas 坐标特征.
    pub coordinates_feature: bool,

    /// 是否产出逐模态强度特征.
    pub intensity_feature: bool,

    /// 是否产出逐模态梯度幅值特征.
    pub gradient_intensity_feature: bool,

    /// GLCM 特征族配置.
    pub glcm_features: TextureFamilyConfig,

    /// 一阶统计特征族配置.
    pub first_order_features: TextureFamilyConfig,

    /// GLSZM 特征族配置.
    pub glszm_features: TextureFamilyConfig,

    /// 训练体素采样配置.
    pub sampling: SamplingConfig,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            training: true,
            coordinates_feature: false,
            intensity_feature: false,
            gradient_intensity_feature: false,
            glcm_features: TextureFamilyConfig::disabled(TextureFamily::Glcm),
            first_order_features: TextureFamilyConfig::disabled(TextureFamily::FirstOrder),
            glszm_features: TextureFamilyConfig::disabled(TextureFamily::Glszm),
            sampling: SamplingConfig::default(),
        }
    }
}

impl FeatureConfig {
    /// 获取某特征族的配置.
    pub fn family(&self, family: TextureFamily) -> &TextureFamilyConfig {
        match family {
            TextureFamily::Glcm => &self.glcm_features,
            TextureFamily::FirstOrder => &self.first_order_features,
            TextureFamily::Glszm => &self.glszm_features,
        }
    }
}

/// 特征提取器: 对单个受试者执行特征图像生成与矩阵组装.
///
/// 每个容器只允许执行一次: 执行会填充并随后清空 `feature_images`,
/// 并一次性写入特征矩阵. 对已有矩阵的容器再次执行会返回配置错误.
pub struct FeatureExtractor<'a> {
    subject: &'a mut Subject,
    config: &'a FeatureConfig,
    textures: &'a TextureRegistry,
}

impl<'a> FeatureExtractor<'a> {
    /// 构造.
    pub fn new(
        subject: &'a mut Subject,
        config: &'a FeatureConfig,
        textures: &'a TextureRegistry,
    ) -> Self {
        Self {
            subject,
            config,
            textures,
        }
    }

    /// 执行特征提取与矩阵组装.
    pub fn execute(self) -> Result<(), PipelineError> {
        let subject = self.subject;
        if subject.feature_matrix().is_some() {
            return Err(ConfigError::MatrixAlreadyBuilt {
                id: subject.id().to_owned(),
            }
            .into());
        }

        let props = subject.images.t1.props();

        // 简单特征. 插入序即列序.
        if self.config.coordinates_feature {
            subject
                .feature_images
                .insert(FeatureImageKind::AtlasCoordinates, simple::atlas_coordinates(&props))?;
        }

        if self.config.intensity_feature {
            for m in Modality::ALL {
                let image = ChannelVolume::from_scan(scan_of(subject, m), "intensity");
                subject
                    .feature_images
                    .insert(FeatureImageKind::Intensity(m), image)?;
            }
        }

        if self.config.gradient_intensity_feature {
            for m in Modality::ALL {
                let gradient = simple::gradient_magnitude(scan_of(subject, m));
                let image = ChannelVolume::from_scan(&gradient, "gradient");
                subject
                    .feature_images
                    .insert(FeatureImageKind::GradientIntensity(m), image)?;
            }
        }

        // 纹理特征族: 外部算法逐体素提取, 合成多通道图像并以模态属性重新盖章.
        for family in TextureFamily::ALL {
            let family_config = self.config.family(family);
            if !family_config.enabled {
                continue;
            }

            let names = enabled_names(family, &family_config.parameters)?;
            log::debug!(
                "subject {}: {} features in use: {:?}",
                subject.id(),
                family.tag(),
                names
            );
            let extractor = self
                .textures
                .get(family)
                .ok_or(ConfigError::FamilyNotBound(family))?;

            for m in Modality::ALL {
                let outputs =
                    extractor.extract(scan_of(subject, m), &subject.images.brain_mask, &names)?;
                if outputs.len() != names.len() {
                    return Err(AlignError::ChannelArity {
                        names: names.len(),
                        channels: outputs.len(),
                    }
                    .into());
                }
                for (expected, (got, _)) in izip!(&names, &outputs) {
                    if expected != got {
                        return Err(ConfigError::UnknownFeature {
                            family,
                            name: got.clone(),
                        }
                        .into());
                    }
                }

                let (channel_names, volumes): (Vec<_>, Vec<_>) = outputs.into_iter().unzip();
                let composite = ChannelVolume::from_channels(channel_names, volumes, props.clone())?;
                subject
                    .feature_images
                    .insert(FeatureImageKind::Texture(family, m), composite)?;
            }
        }

        // 训练掩膜. 推理模式下不加掩膜.
        let mask = if self.config.training {
            let sampling = &self.config.sampling;
            Some(sampler::training_mask(
                &subject.images.ground_truth,
                &sampling.class_ids,
                &sampling.rates,
                sampling.seed,
            )?)
        } else {
            None
        };

        // 按插入序展平并水平拼接. 各块行数必须一致.
        let mut blocks: Vec<Array2<f32>> = Vec::with_capacity(subject.feature_images.len());
        let mut columns: Vec<FeatureColumn> = Vec::with_capacity(subject.feature_images.total_channels());
        let mut rows: Option<usize> = None;

        for (kind, image) in subject.feature_images.iter() {
            log::debug!("subject {}: assembling feature block {}", subject.id(), kind.tag());
            let block = flatten_channels(image, mask.as_ref())?;
            match rows {
                None => rows = Some(block.nrows()),
                Some(expected) if expected != block.nrows() => {
                    return Err(AlignError::VoxelCountMismatch {
                        what: kind.tag(),
                        expected,
                        actual: block.nrows(),
                    }
                    .into());
                }
                Some(_) => {}
            }
            for name in image.names() {
                columns.push(FeatureColumn {
                    kind: *kind,
                    name: name.clone(),
                });
            }
            blocks.push(block);
        }

        let labels = flatten_labels(&subject.images.ground_truth, mask.as_ref())?;
        if let Some(expected) = rows {
            if labels.len() != expected {
                return Err(AlignError::VoxelCountMismatch {
                    what: "labels".to_owned(),
                    expected,
                    actual: labels.len(),
                }
                .into());
            }
        }

        let data = if blocks.is_empty() {
            Array2::zeros((labels.len(), 0))
        } else {
            let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
            // 行数已检查, 水平拼接不会失败.
            concatenate(Axis(1), &views).expect("特征块行数一致")
        };

        let schema = FeatureSchema::new(columns);
        subject.install_feature_matrix(FeatureMatrix { data, labels }, schema)?;
        Ok(())
    }
}

/// 获取某模态的扫描.
#[inline]
fn scan_of(subject: &Subject, m: Modality) -> &MrScan {
    match m {
        Modality::T1w => &subject.images.t1,
        Modality::T2w => &subject.images.t2,
    }
}

#[cfg(test)]
mod tests {
    use super::{FeatureConfig, FeatureExtractor, SamplingConfig};
    use crate::data::subject::{Subject, SubjectImages};
    use crate::data::{AffineTransform, MrLabel, MrScan};
    use crate::error::{ConfigError, PipelineError};
    use crate::filtering::texture::{TextureExtractor, TextureFamily, TextureRegistry};
    use ndarray::Array3;

    /// [4, 4, 4] 合成受试者: 真值取 {0, 1} 两类.
    fn subject() -> Subject {
        let t1 = Array3::from_shape_fn((4, 4, 4), |(z, h, w)| (z * 16 + h * 4 + w) as f32);
        let t2 = Array3::from_elem((4, 4, 4), 2.5);
        let gt = Array3::from_shape_fn((4, 4, 4), |(z, _, _)| u8::from(z >= 2));
        let mask = Array3::from_elem((4, 4, 4), 1u8);

        Subject::new(
            "synthetic-0",
            SubjectImages {
                t1: MrScan::fake(t1, [1.0; 3]),
                t2: MrScan::fake(t2, [1.0; 3]),
                ground_truth: MrLabel::fake(gt, [1.0; 3]),
                brain_mask: MrLabel::fake(mask, [1.0; 3]),
                transform: AffineTransform::identity(),
            },
        )
    }

    fn simple_config(training: bool) -> FeatureConfig {
        FeatureConfig {
            training,
            coordinates_feature: true,
            intensity_feature: true,
            gradient_intensity_feature: true,
            sampling: SamplingConfig {
                class_ids: vec![0, 1],
                rates: vec![0.0, 1.0],
                seed: 7,
            },
            ..FeatureConfig::default()
        }
    }

    /// 把每个激活的具名特征映射为输入强度副本的占位外部算法.
    struct EchoTexture(TextureFamily);

    impl TextureExtractor for EchoTexture {
        fn family(&self) -> TextureFamily {
            self.0
        }

        fn extract(
            &self,
            image: &MrScan,
            _mask: &MrLabel,
            enabled: &[String],
        ) -> Result<Vec<(String, Array3<f32>)>, PipelineError> {
            Ok(enabled
                .iter()
                .map(|n| (n.clone(), image.data().to_owned()))
                .collect())
        }
    }

    #[test]
    fn test_training_mask_bounds_rows() {
        let mut s = subject();
        let registry = TextureRegistry::new();
        FeatureExtractor::new(&mut s, &simple_config(true), &registry)
            .execute()
            .unwrap();

        let matrix = s.feature_matrix().unwrap();
        // 类别 0 概率 0, 类别 1 概率 1: 行数恰为标签 1 的体素数.
        assert_eq!(matrix.data.nrows(), 32);
        // 坐标 3 列 + 强度 2 列 + 梯度 2 列.
        assert_eq!(matrix.data.ncols(), 7);
        assert_eq!(matrix.labels.len(), 32);
        assert!(matrix.labels.iter().all(|l| *l == 1));
        // 特征图像已被清空.
        assert!(s.feature_images.is_empty());
    }

    #[test]
    fn test_training_and_inference_share_columns() {
        let registry = TextureRegistry::new();

        let mut train = subject();
        FeatureExtractor::new(&mut train, &simple_config(true), &registry)
            .execute()
            .unwrap();

        let mut test = subject();
        FeatureExtractor::new(&mut test, &simple_config(false), &registry)
            .execute()
            .unwrap();

        let (m_train, m_test) = (train.feature_matrix().unwrap(), test.feature_matrix().unwrap());
        // 列数与列序一致, 只有行数不同.
        assert_eq!(m_train.data.ncols(), m_test.data.ncols());
        assert_eq!(m_test.data.nrows(), 64);
        train
            .schema()
            .unwrap()
            .validate(test.schema().unwrap())
            .unwrap();
    }

    #[test]
    fn test_single_glcm_feature_yields_one_column_per_modality() {
        let mut registry = TextureRegistry::new();
        registry.bind(Box::new(EchoTexture(TextureFamily::Glcm)));

        let mut config = FeatureConfig {
            training: false,
            ..FeatureConfig::default()
        };
        config.glcm_features.enabled = true;
        config
            .glcm_features
            .parameters
            .insert("Autocorrelation".into(), true);

        let mut s = subject();
        FeatureExtractor::new(&mut s, &config, &registry).execute().unwrap();

        let matrix = s.feature_matrix().unwrap();
        // 每个模态恰好一列.
        assert_eq!(matrix.data.ncols(), 2);
        let schema = s.schema().unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.columns()[0].name, "Autocorrelation");
    }

    /// 输出形状与输入不一致的外部算法.
    struct BrokenTexture;

    impl TextureExtractor for BrokenTexture {
        fn family(&self) -> TextureFamily {
            TextureFamily::FirstOrder
        }

        fn extract(
            &self,
            _image: &MrScan,
            _mask: &MrLabel,
            enabled: &[String],
        ) -> Result<Vec<(String, Array3<f32>)>, PipelineError> {
            Ok(enabled
                .iter()
                .map(|n| (n.clone(), Array3::zeros((2, 2, 2))))
                .collect())
        }
    }

    #[test]
    fn test_misshapen_texture_output_is_rejected() {
        let mut registry = TextureRegistry::new();
        registry.bind(Box::new(BrokenTexture));

        let mut config = FeatureConfig {
            training: false,
            ..FeatureConfig::default()
        };
        config.first_order_features.enabled = true;
        config
            .first_order_features
            .parameters
            .insert("Mean".into(), true);

        let mut s = subject();
        let err = FeatureExtractor::new(&mut s, &config, &registry).execute();
        assert!(matches!(
            err,
            Err(PipelineError::Align(crate::error::AlignError::ShapeMismatch { .. }))
        ));
    }

    #[test]
    fn test_enabled_family_without_algorithm_fails() {
        let registry = TextureRegistry::new();
        let mut config = FeatureConfig::default();
        config.glszm_features.enabled = true;
        config
            .glszm_features
            .parameters
            .insert("ZoneEntropy".into(), true);

        let mut s = subject();
        let err = FeatureExtractor::new(&mut s, &config, &registry).execute();
        assert!(matches!(
            err,
            Err(PipelineError::Config(ConfigError::FamilyNotBound(
                TextureFamily::Glszm
            )))
        ));
    }

    #[test]
    fn test_second_execution_is_rejected() {
        let registry = TextureRegistry::new();
        let config = simple_config(true);

        let mut s = subject();
        FeatureExtractor::new(&mut s, &config, &registry).execute().unwrap();
        let err = FeatureExtractor::new(&mut s, &config, &registry).execute();
        assert!(matches!(
            err,
            Err(PipelineError::Config(ConfigError::MatrixAlreadyBuilt { .. }))
        ));
    }
}
