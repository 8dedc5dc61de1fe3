//! 训练体素采样: 逐类别 Bernoulli 细化.

use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::{HeaderAttr, MrLabel};
use crate::error::ConfigError;

/// 从真值标注生成训练掩膜.
///
/// 返回的布尔体数据中 `true` 表示该体素被排除, `false` 表示被纳入训练.
/// 对每个体素: 其标签不在 `class_ids` 中时总是被排除; 否则以
/// `rates[index_of(class)]` 的概率被独立纳入.
///
/// 这是逐类别的 Bernoulli 细化而不是定额抽样: 种子不固定时各类别的实际
/// 纳入数逐次波动, 且随体数据大小在受试者之间变化. 在小体数据上实际类别
/// 均衡只被近似控制, 这是该采样方式的固有性质.
///
/// 随机流由 `seed` 决定: 同一 (标注, 类别表, 概率表, 种子) 组合下
/// 两次调用产生逐 bit 相同的掩膜.
///
/// `class_ids` 与 `rates` 必须等长, 否则返回 `Err`.
pub fn training_mask(
    label: &MrLabel,
    class_ids: &[u8],
    rates: &[f64],
    seed: u64,
) -> Result<Array3<bool>, ConfigError> {
    if class_ids.len() != rates.len() {
        return Err(ConfigError::SamplingArity {
            classes: class_ids.len(),
            rates: rates.len(),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut mask = Array3::from_elem(label.shape(), true);

    // 行优先遍历, 与 masked flatten 的行序一致.
    for (excluded, voxel) in mask.iter_mut().zip(label.data().iter()) {
        if let Some(index) = class_ids.iter().position(|c| c == voxel) {
            // `gen` 产生 [0, 1) 上的均匀分布: 概率 1.0 恒纳入, 0.0 恒排除.
            if rng.gen::<f64>() < rates[index] {
                *excluded = false;
            }
        }
    }

    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::training_mask;
    use crate::data::MrLabel;
    use crate::error::ConfigError;
    use ndarray::Array3;

    /// [4, 4, 4] 的二类标注: 前一半为 0, 后一半为 1.
    fn two_class_label() -> MrLabel {
        let data = Array3::from_shape_fn((4, 4, 4), |(z, _, _)| u8::from(z >= 2));
        MrLabel::fake(data, [1.0; 3])
    }

    #[test]
    fn test_same_seed_reproduces_mask() {
        let label = two_class_label();
        let a = training_mask(&label, &[0, 1], &[0.4, 0.6], 99).unwrap();
        let b = training_mask(&label, &[0, 1], &[0.4, 0.6], 99).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_extreme_rates() {
        let label = two_class_label();
        // 概率 0 的类别没有任何体素被纳入; 概率 1 的类别全部纳入.
        let mask = training_mask(&label, &[0, 1], &[0.0, 1.0], 7).unwrap();
        for (excluded, voxel) in mask.iter().zip(label.data().iter()) {
            match voxel {
                0 => assert!(*excluded),
                1 => assert!(!*excluded),
                _ => unreachable!(),
            }
        }

        // 纳入数正好等于标签 1 的体素数.
        let included = mask.iter().filter(|m| !**m).count();
        assert_eq!(included, label.count(1));
        assert_eq!(included, 32);
    }

    #[test]
    fn test_unknown_class_always_excluded() {
        let label = two_class_label();
        // 标签 1 不在类别表中, 即使概率全为 1 也被排除.
        let mask = training_mask(&label, &[0], &[1.0], 1).unwrap();
        let included = mask.iter().filter(|m| !**m).count();
        assert_eq!(included, label.count(0));
    }

    #[test]
    fn test_arity_mismatch() {
        let label = two_class_label();
        assert!(matches!(
            training_mask(&label, &[0, 1], &[0.5], 1),
            Err(ConfigError::SamplingArity {
                classes: 2,
                rates: 1
            })
        ));
    }
}
