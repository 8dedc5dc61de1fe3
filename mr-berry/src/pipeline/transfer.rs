//! worker 边界传输适配器.
//!
//! 体数据句柄不允许以默认对象形式跨越 worker 边界: 跨越前必须显式转换为
//! "裸数组 + 空间元数据" 的传输表示, 跨越后再还原. 传输表示经 `bincode`
//! 编码成帧, 因此将线程池换成真正的子进程也不需要改动任何签名.

use ndarray::{Array1, Array2, Array3};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::data::subject::{FeatureMatrix, Subject, SubjectImages};
use crate::data::{AffineTransform, HeaderAttr, ImageProperties, MrLabel, MrScan};
use crate::error::PipelineError;
use crate::features::schema::FeatureSchema;

/// 可跨越 worker 边界的类型: 拥有一个纯数据的传输表示.
pub trait Transferable: Sized {
    /// 传输表示. 只包含裸数组与元数据, 可直接序列化.
    type Repr: Serialize + DeserializeOwned + Send + 'static;

    /// 转换为传输表示.
    fn into_transfer(self) -> Self::Repr;

    /// 从传输表示还原.
    fn from_transfer(repr: Self::Repr) -> Self;
}

/// 将值编码为跨边界的字节帧.
pub fn encode<T: Transferable>(value: T) -> Result<Vec<u8>, PipelineError> {
    bincode::serialize(&value.into_transfer()).map_err(PipelineError::Transfer)
}

/// 从字节帧还原值.
pub fn decode<T: Transferable>(bytes: &[u8]) -> Result<T, PipelineError> {
    bincode::deserialize::<T::Repr>(bytes)
        .map(T::from_transfer)
        .map_err(PipelineError::Transfer)
}

/// 强度扫描的传输表示.
#[derive(Serialize, Deserialize)]
pub struct ScanTransfer {
    props: ImageProperties,
    data: Vec<f32>,
}

impl Transferable for MrScan {
    type Repr = ScanTransfer;

    fn into_transfer(self) -> ScanTransfer {
        ScanTransfer {
            props: self.props(),
            data: self.into_raw().into_raw_vec(),
        }
    }

    fn from_transfer(repr: ScanTransfer) -> Self {
        // 传输表示由本模块自己生成, 长度总是一致.
        let data = Array3::from_shape_vec(repr.props.shape, repr.data).unwrap();
        MrScan::from_parts(data, &repr.props)
    }
}

/// 标注的传输表示.
#[derive(Serialize, Deserialize)]
pub struct LabelTransfer {
    props: ImageProperties,
    data: Vec<u8>,
}

impl Transferable for MrLabel {
    type Repr = LabelTransfer;

    fn into_transfer(self) -> LabelTransfer {
        LabelTransfer {
            props: self.props(),
            data: self.into_raw().into_raw_vec(),
        }
    }

    fn from_transfer(repr: LabelTransfer) -> Self {
        let data = Array3::from_shape_vec(repr.props.shape, repr.data).unwrap();
        MrLabel::from_parts(data, &repr.props)
    }
}

/// 特征矩阵的传输表示.
#[derive(Serialize, Deserialize)]
pub struct MatrixTransfer {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
    labels: Vec<i16>,
}

impl Transferable for FeatureMatrix {
    type Repr = MatrixTransfer;

    fn into_transfer(self) -> MatrixTransfer {
        let (rows, cols) = self.data.dim();
        MatrixTransfer {
            rows,
            cols,
            data: self.data.into_raw_vec(),
            labels: self.labels.into_raw_vec(),
        }
    }

    fn from_transfer(repr: MatrixTransfer) -> Self {
        FeatureMatrix {
            data: Array2::from_shape_vec((repr.rows, repr.cols), repr.data).unwrap(),
            labels: Array1::from_vec(repr.labels),
        }
    }
}

/// 受试者容器的传输表示.
#[derive(Serialize, Deserialize)]
pub struct SubjectTransfer {
    id: String,
    t1: ScanTransfer,
    t2: ScanTransfer,
    ground_truth: LabelTransfer,
    brain_mask: LabelTransfer,
    transform: AffineTransform,
    properties: Option<ImageProperties>,
    matrix: Option<(MatrixTransfer, FeatureSchema)>,
}

impl Transferable for Subject {
    type Repr = SubjectTransfer;

    fn into_transfer(self) -> SubjectTransfer {
        let id = self.id().to_owned();
        let properties = self.properties().cloned();
        let matrix = match (self.feature_matrix().cloned(), self.schema().cloned()) {
            (Some(m), Some(s)) => Some((m.into_transfer(), s)),
            _ => None,
        };
        let images = self.images;
        SubjectTransfer {
            id,
            t1: images.t1.into_transfer(),
            t2: images.t2.into_transfer(),
            ground_truth: images.ground_truth.into_transfer(),
            brain_mask: images.brain_mask.into_transfer(),
            transform: images.transform,
            properties,
            matrix,
        }
    }

    fn from_transfer(repr: SubjectTransfer) -> Self {
        let mut subject = Subject::new(
            repr.id,
            SubjectImages {
                t1: MrScan::from_transfer(repr.t1),
                t2: MrScan::from_transfer(repr.t2),
                ground_truth: MrLabel::from_transfer(repr.ground_truth),
                brain_mask: MrLabel::from_transfer(repr.brain_mask),
                transform: repr.transform,
            },
        );
        if let Some(props) = repr.properties {
            subject.set_properties(props);
        }
        if let Some((matrix, schema)) = repr.matrix {
            // 新容器必然还没有矩阵.
            subject
                .install_feature_matrix(FeatureMatrix::from_transfer(matrix), schema)
                .unwrap();
        }
        subject
    }
}

#[cfg(test)]
mod tests {
    use super::{decode, encode, Transferable};
    use crate::data::subject::{FeatureMatrix, Subject, SubjectImages};
    use crate::data::{AffineTransform, HeaderAttr, MrLabel, MrScan};
    use crate::features::schema::FeatureSchema;
    use ndarray::{arr1, arr2, Array3};

    fn scan() -> MrScan {
        let data = Array3::from_shape_fn((2, 3, 4), |(z, h, w)| (z * 12 + h * 4 + w) as f32);
        MrScan::fake(data, [2.0, 1.0, 0.5])
    }

    #[test]
    fn test_scan_roundtrip_is_lossless() {
        let original = scan();
        let bytes = encode(original.clone()).unwrap();
        let restored: MrScan = decode(&bytes).unwrap();
        assert_eq!(restored.data(), original.data());
        assert_eq!(restored.props(), original.props());
    }

    #[test]
    fn test_subject_roundtrip_keeps_matrix() {
        let mut subject = Subject::new(
            "s-42",
            SubjectImages {
                t1: scan(),
                t2: scan(),
                ground_truth: MrLabel::fake(Array3::zeros((2, 3, 4)), [2.0, 1.0, 0.5]),
                brain_mask: MrLabel::fake(Array3::from_elem((2, 3, 4), 1), [2.0, 1.0, 0.5]),
                transform: AffineTransform::identity(),
            },
        );
        subject.set_properties(scan().props());
        subject
            .install_feature_matrix(
                FeatureMatrix {
                    data: arr2(&[[1.0, 2.0], [3.0, 4.0]]),
                    labels: arr1(&[0i16, 1]),
                },
                FeatureSchema::new(vec![]),
            )
            .unwrap();

        let bytes = encode(subject).unwrap();
        let restored: Subject = decode(&bytes).unwrap();
        assert_eq!(restored.id(), "s-42");
        assert_eq!(restored.properties(), Some(&scan().props()));
        let matrix = restored.feature_matrix().unwrap();
        assert_eq!(matrix.data, arr2(&[[1.0, 2.0], [3.0, 4.0]]));
        assert_eq!(matrix.labels, arr1(&[0i16, 1]));
    }
}
