//! 对 `mr_berry::dataset` 的更一层封装. 提供更直接的数据集路径获取.

use mr_berry::dataset::{self, subject_loader, SubjectLoader};
use std::env;
use std::path::{Path, PathBuf};

/// 获取 atlas 目录.
///
/// 1. 若环境变量 `$MRB_ATLAS_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/atlas`.
pub fn atlas_dir_from_env_or_home() -> PathBuf {
    if let Ok(d) = env::var("MRB_ATLAS_DIR") {
        PathBuf::from(d)
    } else {
        dataset::home_dataset_dir_with(["atlas"]).unwrap()
    }
}

/// 获取训练集根目录.
///
/// 1. 若环境变量 `$MRB_TRAIN_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/train`.
pub fn train_dir_from_env_or_home() -> PathBuf {
    if let Ok(d) = env::var("MRB_TRAIN_DIR") {
        PathBuf::from(d)
    } else {
        dataset::home_dataset_dir_with(["train"]).unwrap()
    }
}

/// 获取测试集根目录.
///
/// 1. 若环境变量 `$MRB_TEST_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/test`.
pub fn test_dir_from_env_or_home() -> PathBuf {
    if let Ok(d) = env::var("MRB_TEST_DIR") {
        PathBuf::from(d)
    } else {
        dataset::home_dataset_dir_with(["test"]).unwrap()
    }
}

/// 从 `$MRB_SUBJECTS` (逗号分隔) 获取受试者标识表. 未设置时返回 `None`.
pub fn subject_ids_from_env() -> Option<Vec<String>> {
    let raw = env::var("MRB_SUBJECTS").ok()?;
    let ids: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    (!ids.is_empty()).then_some(ids)
}

/// 获取给定受试者在 `path` 下的路径加载器.
pub fn subject_paths<I, S, P>(ids: I, path: P) -> SubjectLoader
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    P: AsRef<Path>,
{
    subject_loader(ids, path)
}

/// 从 `$MRB_TRAIN_DIR` 或 `$HOME/dataset/train` 下创建受试者路径加载器.
#[inline]
pub fn train_loader_from_env_or_home<I, S>(ids: I) -> SubjectLoader
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    subject_paths(ids, train_dir_from_env_or_home())
}
