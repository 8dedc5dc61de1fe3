//! 特征矩阵的 npz 归档.
//!
//! 特征矩阵的组装开销远大于其读取开销, 把组装结果存入 npz
//! 归档可以在分类器调参等重复实验中复用.

use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use ndarray::{Ix1, Ix2, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError, WriteNpzError};

use crate::data::subject::{FeatureMatrix, Subject};

/// 受试者特征数据在归档内的条目名.
#[inline]
fn features_entry(id: &str) -> String {
    format!("{id}-features.npy")
}

/// 受试者标签向量在归档内的条目名.
#[inline]
fn labels_entry(id: &str) -> String {
    format!("{id}-labels.npy")
}

/// 写入特征矩阵归档的错误.
#[derive(Debug)]
pub enum WriteMatrixError {
    /// 某受试者尚未组装特征矩阵.
    MatrixMissing(String),

    /// 写入 npz 文件错误.
    WriteNpzError(WriteNpzError),

    /// 其他底层 I/O 错误.
    IoError(std::io::Error),
}

/// 将一批受试者的特征矩阵写入 npz 归档文件.
///
/// 每个受试者占两个条目: `{id}-features.npy` 与 `{id}-labels.npy`.
pub fn save_matrices<'a, P, I>(path: P, subjects: I) -> Result<(), WriteMatrixError>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = &'a Subject>,
{
    let file = File::create(path.as_ref()).map_err(WriteMatrixError::IoError)?;
    let mut npz = NpzWriter::new(file);

    for subject in subjects {
        let matrix = subject
            .feature_matrix()
            .ok_or_else(|| WriteMatrixError::MatrixMissing(subject.id().to_owned()))?;
        npz.add_array(features_entry(subject.id()), &matrix.data)
            .map_err(WriteMatrixError::WriteNpzError)?;
        npz.add_array(labels_entry(subject.id()), &matrix.labels)
            .map_err(WriteMatrixError::WriteNpzError)?;
    }

    npz.finish().map_err(WriteMatrixError::WriteNpzError)?;
    Ok(())
}

/// 打开 [`MatrixArchive`] 错误.
#[derive(Debug)]
pub enum OpenArchiveError {
    /// workers 太大. 最多支持 64.
    TooManyWorkers(u32),

    /// 打开 npz 文件错误.
    ReadNpzError(ReadNpzError),

    /// 其他底层 I/O 错误.
    IoError(std::io::Error),
}

/// 读取归档条目的错误.
#[derive(Debug)]
pub enum ReadMatrixError {
    /// 读取 npz 条目错误 (含条目不存在).
    ReadNpzError(ReadNpzError),
}

/// 特征矩阵 npz 归档的读取端.
///
/// 该结构可用于建模硬盘上已组装好的多个受试者特征矩阵的压缩文件.
pub struct MatrixArchive {
    entries: Vec<Mutex<NpzReader<File>>>,
    turn: AtomicUsize,
}

impl MatrixArchive {
    /// 初始化.
    ///
    /// `workers` 指定了底层工作通道的个数, 最大为 64. 系统会从路径 `p` 打开文件
    /// `workers` 次, 并为每个打开通道指定一个排他入口点 (以期获得更高的并行度).
    pub fn new<P: AsRef<Path>>(workers: NonZeroUsize, p: P) -> Result<Self, OpenArchiveError> {
        let workers = workers.get();
        if workers > 64 {
            return Err(OpenArchiveError::TooManyWorkers(64));
        }
        let mut v = Vec::with_capacity(workers);
        for _ in 0..workers {
            let file = OpenOptions::new()
                .read(true)
                .open(p.as_ref())
                .map_err(OpenArchiveError::IoError)?;
            v.push(Mutex::new(
                NpzReader::new(file).map_err(OpenArchiveError::ReadNpzError)?,
            ));
        }
        Ok(Self {
            entries: v,
            turn: AtomicUsize::new(0),
        })
    }

    /// 通过受试者标识获取其特征矩阵与标签向量.
    pub fn matrix_by_id(&self, id: &str) -> Result<FeatureMatrix, ReadMatrixError> {
        let slot = self.next_slot();
        let mut file = self.entries[slot].lock().unwrap();
        let data = file
            .by_name::<OwnedRepr<f32>, Ix2>(features_entry(id).as_str())
            .map_err(ReadMatrixError::ReadNpzError)?;
        let labels = file
            .by_name::<OwnedRepr<i16>, Ix1>(labels_entry(id).as_str())
            .map_err(ReadMatrixError::ReadNpzError)?;
        Ok(FeatureMatrix { data, labels })
    }

    /// 获取底层 npz 文件包含的所有条目名.
    pub fn entry_names(&self) -> Result<Vec<String>, ReadMatrixError> {
        let slot = self.next_slot();
        self.entries[slot]
            .lock()
            .unwrap()
            .names()
            .map_err(ReadMatrixError::ReadNpzError)
    }

    /// 工作通道个数.
    #[inline]
    pub fn worker_len(&self) -> usize {
        self.entries.len()
    }

    fn next_slot(&self) -> usize {
        self.turn.fetch_add(1, Ordering::Relaxed) % self.worker_len()
    }
}

#[cfg(test)]
mod tests {
    use super::{save_matrices, MatrixArchive, WriteMatrixError};
    use crate::data::subject::{FeatureMatrix, Subject, SubjectImages};
    use crate::data::{AffineTransform, MrLabel, MrScan};
    use crate::features::schema::FeatureSchema;
    use ndarray::{arr1, arr2, Array3};
    use std::num::NonZeroUsize;

    fn subject(id: &str, with_matrix: bool) -> Subject {
        let mut s = Subject::new(
            id,
            SubjectImages {
                t1: MrScan::fake(Array3::zeros((1, 1, 1)), [1.0; 3]),
                t2: MrScan::fake(Array3::zeros((1, 1, 1)), [1.0; 3]),
                ground_truth: MrLabel::fake(Array3::zeros((1, 1, 1)), [1.0; 3]),
                brain_mask: MrLabel::fake(Array3::zeros((1, 1, 1)), [1.0; 3]),
                transform: AffineTransform::identity(),
            },
        );
        if with_matrix {
            s.install_feature_matrix(
                FeatureMatrix {
                    data: arr2(&[[1.0, 2.0], [3.0, 4.0]]),
                    labels: arr1(&[1i16, 2]),
                },
                FeatureSchema::new(vec![]),
            )
            .unwrap();
        }
        s
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let path = std::env::temp_dir().join(format!("mr-berry-cache-{}.npz", std::process::id()));
        let s = subject("s0", true);
        save_matrices(&path, [&s]).unwrap();

        let archive = MatrixArchive::new(NonZeroUsize::new(2).unwrap(), &path).unwrap();
        assert_eq!(archive.worker_len(), 2);

        let names = archive.entry_names().unwrap();
        assert!(names.contains(&"s0-features.npy".to_owned()));

        let matrix = archive.matrix_by_id("s0").unwrap();
        assert_eq!(matrix.data, arr2(&[[1.0, 2.0], [3.0, 4.0]]));
        assert_eq!(matrix.labels, arr1(&[1i16, 2]));

        assert!(archive.matrix_by_id("missing").is_err());

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_subject_without_matrix_is_rejected() {
        let path = std::env::temp_dir().join(format!("mr-berry-cache2-{}.npz", std::process::id()));
        let s = subject("s1", false);
        assert!(matches!(
            save_matrices(&path, [&s]),
            Err(WriteMatrixError::MatrixMissing(_))
        ));
        std::fs::remove_file(path).ok();
    }
}
