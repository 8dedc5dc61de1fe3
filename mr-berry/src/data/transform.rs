//! 预计算仿射变换及其 ITK 文本格式解析.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// ITK 变换文本文件的首行标记.
const ITK_MAGIC: &str = "#Insight Transform File V1.0";

/// 被接受的变换种类. 两者参数布局一致.
const ITK_KINDS: [&str; 2] = [
    "AffineTransform_double_3_3",
    "MatrixOffsetTransformBase_double_3_3",
];

/// 读取/解析 ITK 变换文本文件的错误.
#[derive(Debug)]
pub enum TransformError {
    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// 文件没有以 ITK 变换文本标记开头.
    NotATransformFile,

    /// 变换种类不受支持.
    UnsupportedKind(String),

    /// `Parameters:` 行缺失或参数个数不是 12.
    MalformedParameters,

    /// `FixedParameters:` 行存在但参数个数不是 3.
    MalformedFixedParameters,
}

/// 三维仿射变换. 将参考空间点映射到移动图像空间点:
/// `y = A (x - c) + c + t`, 其中 `A` 为矩阵, `c` 为旋转中心, `t` 为平移.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    /// 3x3 矩阵, 行优先.
    matrix: [f64; 9],

    /// 平移分量.
    translation: [f64; 3],

    /// 旋转中心.
    center: [f64; 3],
}

impl AffineTransform {
    /// 恒等变换.
    pub fn identity() -> Self {
        Self {
            matrix: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            translation: [0.0; 3],
            center: [0.0; 3],
        }
    }

    /// 直接从分量构造.
    pub fn new(matrix: [f64; 9], translation: [f64; 3], center: [f64; 3]) -> Self {
        Self {
            matrix,
            translation,
            center,
        }
    }

    /// 从 ITK 文本文件 (`#Insight Transform File V1.0`) 读取仿射变换.
    ///
    /// 文件的 `Parameters:` 行依次包含 9 个矩阵元素 (行优先) 和 3 个平移分量,
    /// `FixedParameters:` 行包含 3 个旋转中心分量 (缺失时按原点处理).
    pub fn from_itk_file<P: AsRef<Path>>(path: P) -> Result<Self, TransformError> {
        let text = fs::read_to_string(path.as_ref()).map_err(TransformError::Io)?;
        Self::from_itk_text(&text)
    }

    /// 同 [`Self::from_itk_file`], 但直接解析文本内容.
    pub fn from_itk_text(text: &str) -> Result<Self, TransformError> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        if lines.next() != Some(ITK_MAGIC) {
            return Err(TransformError::NotATransformFile);
        }

        let mut params: Option<Vec<f64>> = None;
        let mut fixed: Option<Vec<f64>> = None;
        for line in lines {
            if let Some(kind) = line.strip_prefix("Transform:") {
                let kind = kind.trim();
                if !ITK_KINDS.contains(&kind) {
                    return Err(TransformError::UnsupportedKind(kind.to_owned()));
                }
            } else if let Some(rest) = line.strip_prefix("Parameters:") {
                params = Some(parse_floats(rest).ok_or(TransformError::MalformedParameters)?);
            } else if let Some(rest) = line.strip_prefix("FixedParameters:") {
                fixed = Some(parse_floats(rest).ok_or(TransformError::MalformedFixedParameters)?);
            }
        }

        let params = params.ok_or(TransformError::MalformedParameters)?;
        if params.len() != 12 {
            return Err(TransformError::MalformedParameters);
        }
        let mut matrix = [0.0; 9];
        matrix.copy_from_slice(&params[..9]);
        let mut translation = [0.0; 3];
        translation.copy_from_slice(&params[9..]);

        let center = match fixed {
            None => [0.0; 3],
            Some(f) if f.len() == 3 => [f[0], f[1], f[2]],
            Some(_) => return Err(TransformError::MalformedFixedParameters),
        };

        Ok(Self {
            matrix,
            translation,
            center,
        })
    }

    /// 将参考空间点 `p` (按 \[x, y, z\] 排列) 映射到移动图像空间.
    #[inline]
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let m = &self.matrix;
        let c = &self.center;
        let t = &self.translation;
        let d = [p[0] - c[0], p[1] - c[1], p[2] - c[2]];
        [
            m[0] * d[0] + m[1] * d[1] + m[2] * d[2] + c[0] + t[0],
            m[3] * d[0] + m[4] * d[1] + m[5] * d[2] + c[1] + t[1],
            m[6] * d[0] + m[7] * d[1] + m[8] * d[2] + c[2] + t[2],
        ]
    }
}

/// 解析一行空白分隔的浮点数. 任一字段非法时返回 `None`.
fn parse_floats(s: &str) -> Option<Vec<f64>> {
    s.split_whitespace()
        .map(|tok| tok.parse::<f64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{AffineTransform, TransformError};

    const SAMPLE: &str = "\
#Insight Transform File V1.0
#Transform 0
Transform: AffineTransform_double_3_3
Parameters: 1 0 0 0 1 0 0 0 1 5 -3 2
FixedParameters: 1 1 1
";

    #[test]
    fn test_parse_translation_only() {
        let t = AffineTransform::from_itk_text(SAMPLE).unwrap();
        let q = t.apply([2.0, 4.0, 6.0]);
        assert_eq!(q, [7.0, 1.0, 8.0]);
    }

    #[test]
    fn test_identity_apply() {
        let t = AffineTransform::identity();
        assert_eq!(t.apply([1.5, -2.0, 0.25]), [1.5, -2.0, 0.25]);
    }

    #[test]
    fn test_reject_garbage() {
        assert!(matches!(
            AffineTransform::from_itk_text("hello world"),
            Err(TransformError::NotATransformFile)
        ));

        let bad = SAMPLE.replace("Parameters: 1 0 0 0 1 0 0 0 1 5 -3 2", "Parameters: 1 2 3");
        assert!(matches!(
            AffineTransform::from_itk_text(&bad),
            Err(TransformError::MalformedParameters)
        ));

        let alien = SAMPLE.replace("AffineTransform_double_3_3", "Euler3DTransform_double_3_3");
        assert!(matches!(
            AffineTransform::from_itk_text(&alien),
            Err(TransformError::UnsupportedKind(_))
        ));
    }
}
