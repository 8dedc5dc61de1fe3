//! 特征 schema: 特征矩阵列序的显式描述.
//!
//! 特征矩阵的列序由特征图像集的插入序隐式决定, 而训练出的分类器对该顺序是
//! 敏感的. schema 把这个顺序物化为显式对象, 随训练产物一起保存, 并在每次
//! 推理前与现场提取器的 schema 对账 -- 把静默的数据腐蚀变成响亮的配置错误.

use serde::{Deserialize, Serialize};

use crate::data::subject::FeatureImageKind;
use crate::error::ConfigError;

/// 当前 schema 布局版本.
pub const SCHEMA_VERSION: u16 = 1;

/// 一个特征列的描述.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureColumn {
    /// 该列来自哪种特征图像.
    pub kind: FeatureImageKind,

    /// 特征图像内的通道名.
    pub name: String,
}

impl FeatureColumn {
    /// 列的全名, 如 `t1w-glcm/Autocorrelation`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.kind.tag(), self.name)
    }
}

/// 带版本的有序特征列描述表.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    version: u16,
    columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    /// 以当前版本创建 schema.
    pub fn new(columns: Vec<FeatureColumn>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            columns,
        }
    }

    /// 布局版本.
    #[inline]
    pub fn version(&self) -> u16 {
        self.version
    }

    /// 有序的列描述.
    #[inline]
    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    /// 列数.
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// 判断是否没有任何列.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// 用训练时的 schema (`self`) 校验现场提取器产出的 schema.
    ///
    /// 版本、列数或任一列不一致时返回 `Err`, 并指出第一处差异.
    pub fn validate(&self, live: &FeatureSchema) -> Result<(), ConfigError> {
        if self.version != live.version {
            return Err(ConfigError::SchemaMismatch {
                detail: format!("版本不一致: {} vs {}", self.version, live.version),
            });
        }
        if self.columns.len() != live.columns.len() {
            return Err(ConfigError::SchemaMismatch {
                detail: format!("列数不一致: {} vs {}", self.columns.len(), live.columns.len()),
            });
        }
        for (index, (expected, actual)) in
            self.columns.iter().zip(live.columns.iter()).enumerate()
        {
            if expected != actual {
                return Err(ConfigError::SchemaMismatch {
                    detail: format!(
                        "第 {index} 列不一致: {} vs {}",
                        expected.full_name(),
                        actual.full_name()
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{FeatureColumn, FeatureSchema};
    use crate::data::subject::{FeatureImageKind, Modality};
    use crate::error::ConfigError;

    fn column(kind: FeatureImageKind, name: &str) -> FeatureColumn {
        FeatureColumn {
            kind,
            name: name.to_owned(),
        }
    }

    fn schema() -> FeatureSchema {
        FeatureSchema::new(vec![
            column(FeatureImageKind::AtlasCoordinates, "x"),
            column(FeatureImageKind::Intensity(Modality::T1w), "intensity"),
        ])
    }

    #[test]
    fn test_equal_schemas_validate() {
        assert!(schema().validate(&schema()).is_ok());
    }

    #[test]
    fn test_column_difference_is_loud() {
        let trained = schema();
        let live = FeatureSchema::new(vec![
            column(FeatureImageKind::AtlasCoordinates, "x"),
            column(FeatureImageKind::Intensity(Modality::T2w), "intensity"),
        ]);
        match trained.validate(&live) {
            Err(ConfigError::SchemaMismatch { detail }) => {
                assert!(detail.contains("第 1 列"), "detail = {detail}");
            }
            other => panic!("意外结果: {other:?}"),
        }

        let short = FeatureSchema::new(vec![column(FeatureImageKind::AtlasCoordinates, "x")]);
        assert!(matches!(
            trained.validate(&short),
            Err(ConfigError::SchemaMismatch { .. })
        ));
    }
}
