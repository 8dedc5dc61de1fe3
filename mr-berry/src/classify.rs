//! 分类器接口与预测结果的体数据还原.
//!
//! 分类器本体 (随机森林) 由外部实现提供, 这里只定义消费它所需的边界,
//! 以及把展平的预测向量/概率矩阵还原为体数据的转换.

use itertools::Itertools;
use ndarray::{Array1, Array2, Array3};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_MAX_DEPTH, DEFAULT_N_ESTIMATORS};
use crate::data::{ChannelVolume, ImageProperties, MrLabel};
use crate::error::AlignError;
use crate::error::PipelineError;

/// 随机森林参数, 透传给外部实现.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    /// 树数量.
    pub n_estimators: u32,

    /// 单棵树最大深度.
    pub max_depth: u32,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: DEFAULT_N_ESTIMATORS,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// 外部体素级分类器.
///
/// 推理前调用方应当用训练时保存的 [`crate::features::schema::FeatureSchema`]
/// 校验现场提取器的 schema, 列序不一致的矩阵送入分类器是静默的数据腐蚀.
pub trait Classifier {
    /// 以特征矩阵与标签向量拟合模型.
    fn fit(&mut self, data: &Array2<f32>, labels: &Array1<i16>) -> Result<(), PipelineError>;

    /// 预测每行体素的类别.
    fn predict(&self, data: &Array2<f32>) -> Result<Array1<u8>, PipelineError>;

    /// 预测每行体素的逐类别概率. 列序与训练类别表一致.
    fn predict_proba(&self, data: &Array2<f32>) -> Result<Array2<f32>, PipelineError>;
}

/// 从概率矩阵按逐行最大值推出类别标签.
///
/// `classes` 与概率列一一对应, 个数不一致时返回 `Err`. 并列时取最后一个最大列,
/// 该选择是确定性的.
pub fn labels_from_probabilities(
    probabilities: &Array2<f32>,
    classes: &[u8],
) -> Result<Array1<u8>, AlignError> {
    if probabilities.ncols() != classes.len() || classes.is_empty() {
        return Err(AlignError::ChannelArity {
            names: classes.len(),
            channels: probabilities.ncols(),
        });
    }

    let labels: Vec<u8> = probabilities
        .rows()
        .into_iter()
        .map(|row| {
            let best = row
                .iter()
                .position_max_by_key(|v| OrderedFloat(**v))
                .expect("类别表非空");
            classes[best]
        })
        .collect();
    Ok(Array1::from_vec(labels))
}

/// 将展平的预测向量还原为标注体数据.
///
/// 向量长度必须等于 `props` 的体素数 (即推理在全体体素上进行).
pub fn prediction_to_volume(
    predictions: &Array1<u8>,
    props: &ImageProperties,
) -> Result<MrLabel, AlignError> {
    if predictions.len() != props.size() {
        return Err(AlignError::VoxelCountMismatch {
            what: "predictions".to_owned(),
            expected: props.size(),
            actual: predictions.len(),
        });
    }

    // 长度已检查, reshape 不会失败.
    let data = Array3::from_shape_vec(props.shape, predictions.to_vec()).unwrap();
    Ok(MrLabel::from_parts(data, props))
}

/// 将逐类别概率矩阵还原为多通道体数据, 通道名为类别值.
pub fn probabilities_to_volume(
    probabilities: &Array2<f32>,
    classes: &[u8],
    props: &ImageProperties,
) -> Result<ChannelVolume, AlignError> {
    if probabilities.ncols() != classes.len() {
        return Err(AlignError::ChannelArity {
            names: classes.len(),
            channels: probabilities.ncols(),
        });
    }
    if probabilities.nrows() != props.size() {
        return Err(AlignError::VoxelCountMismatch {
            what: "probabilities".to_owned(),
            expected: props.size(),
            actual: probabilities.nrows(),
        });
    }

    let names = classes.iter().map(|c| c.to_string()).collect();
    let channels: Vec<Array3<f32>> = (0..classes.len())
        .map(|ci| {
            // 单列是非连续视图, 先物化再 reshape.
            Array3::from_shape_vec(props.shape, probabilities.column(ci).to_vec()).unwrap()
        })
        .collect();
    ChannelVolume::from_channels(names, channels, props.clone())
}

#[cfg(test)]
mod tests {
    use super::{labels_from_probabilities, prediction_to_volume, probabilities_to_volume};
    use crate::data::ImageProperties;
    use crate::error::AlignError;
    use ndarray::{arr2, Array1};

    fn props() -> ImageProperties {
        ImageProperties {
            shape: (1, 2, 2),
            spacing: [1.0; 3],
            origin: [0.0; 3],
            direction: [0.0; 3],
        }
    }

    #[test]
    fn test_argmax_labels() {
        let proba = arr2(&[[0.7, 0.2, 0.1], [0.1, 0.2, 0.7], [0.2, 0.6, 0.2]]);
        let labels = labels_from_probabilities(&proba, &[0, 1, 5]).unwrap();
        assert_eq!(labels.to_vec(), vec![0, 5, 1]);

        assert!(matches!(
            labels_from_probabilities(&proba, &[0, 1]),
            Err(AlignError::ChannelArity { .. })
        ));
    }

    #[test]
    fn test_prediction_roundtrip() {
        let pred = Array1::from_vec(vec![0u8, 1, 2, 3]);
        let label = prediction_to_volume(&pred, &props()).unwrap();
        assert_eq!(label[(0, 0, 0)], 0);
        assert_eq!(label[(0, 0, 1)], 1);
        assert_eq!(label[(0, 1, 0)], 2);
        assert_eq!(label[(0, 1, 1)], 3);

        let short = Array1::from_vec(vec![0u8, 1]);
        assert!(matches!(
            prediction_to_volume(&short, &props()),
            Err(AlignError::VoxelCountMismatch { .. })
        ));
    }

    #[test]
    fn test_probability_volume_channels() {
        let proba = arr2(&[
            [0.9, 0.1],
            [0.8, 0.2],
            [0.3, 0.7],
            [0.4, 0.6],
        ]);
        let vol = probabilities_to_volume(&proba, &[0, 1], &props()).unwrap();
        assert_eq!(vol.channels(), 2);
        assert_eq!(vol.names(), ["0", "1"]);
        assert_eq!(vol.data()[(0, 0, 0, 0)], 0.9);
        assert_eq!(vol.data()[(0, 1, 0, 1)], 0.7);
    }
}
