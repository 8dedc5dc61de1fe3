//! 数据集操作.
//!
//! 提供迭代器风格的受试者路径获取模式. 目录发现 (crawling) 由调用方负责,
//! 这里只负责按固定文件名模式拼装路径.

use std::path::{Path, PathBuf};

use crate::consts::{
    SUBJECT_BRAIN_MASK_FILE, SUBJECT_GROUND_TRUTH_FILE, SUBJECT_T1_FILE, SUBJECT_T2_FILE,
    SUBJECT_TRANSFORM_FILE,
};

mod matrix_cache;

pub use matrix_cache::{
    save_matrices, MatrixArchive, OpenArchiveError, ReadMatrixError, WriteMatrixError,
};

/// 单个受试者的输入文件路径组.
#[derive(Debug, Clone)]
pub struct SubjectPaths {
    /// T1w 原生扫描.
    pub t1: PathBuf,

    /// T2w 原生扫描.
    pub t2: PathBuf,

    /// 真值标注.
    pub ground_truth: PathBuf,

    /// 脑掩膜.
    pub brain_mask: PathBuf,

    /// 预计算仿射变换.
    pub transform: PathBuf,
}

impl SubjectPaths {
    /// 按固定文件名模式从受试者目录拼装路径组.
    pub fn from_dir<P: AsRef<Path>>(directory: P) -> Self {
        let directory = directory.as_ref();
        Self {
            t1: directory.join(SUBJECT_T1_FILE),
            t2: directory.join(SUBJECT_T2_FILE),
            ground_truth: directory.join(SUBJECT_GROUND_TRUTH_FILE),
            brain_mask: directory.join(SUBJECT_BRAIN_MASK_FILE),
            transform: directory.join(SUBJECT_TRANSFORM_FILE),
        }
    }
}

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 从指定受试者标识与数据集根目录创建受试者路径加载器.
///
/// # 注意
///
/// 1. `root` 必须是目录, 否则程序 panic.
/// 2. 每个标识 `id` 对应 `root/{id}/` 下按固定文件名组织的一组文件;
///   文件是否存在不在此处校验, 缺失会在实际加载时以 `Err` 返回.
pub fn subject_loader<I, S, P>(ids: I, root: P) -> SubjectLoader
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    P: AsRef<Path>,
{
    let root = root.as_ref().to_owned();
    assert!(root.is_dir());

    let mut ids_rev: Vec<String> = ids.into_iter().map(Into::into).collect();
    ids_rev.reverse();

    SubjectLoader { root, ids_rev }
}

/// 受试者路径加载器.
#[derive(Debug)]
pub struct SubjectLoader {
    root: PathBuf,
    ids_rev: Vec<String>,
}

impl Iterator for SubjectLoader {
    type Item = (String, SubjectPaths);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.ids_rev.pop()?;

        self.root.push(&id);
        let paths = SubjectPaths::from_dir(&self.root);
        self.root.pop();

        Some((id, paths))
    }
}

impl ExactSizeIterator for SubjectLoader {
    #[inline]
    fn len(&self) -> usize {
        self.ids_rev.len()
    }
}
