//! 程序运行函数.

use std::sync::Arc;
use std::time::Instant;

use mr_berry::prelude::*;
use utils::loader;

use crate::result::{BatchModeResult, ModeProfile};

/// 两种执行模式下使用的同一套预处理参数.
fn params() -> PreProcessParams {
    let mut params = PreProcessParams::default();
    params.features.training = true;
    params.features.coordinates_feature = true;
    params.features.intensity_feature = true;
    params.features.gradient_intensity_feature = true;
    params
}

/// 实际运行.
pub fn run() -> BatchModeResult {
    let atlas_dir = loader::atlas_dir_from_env_or_home();
    assert!(atlas_dir.is_dir());
    let train_dir = loader::train_dir_from_env_or_home();
    assert!(train_dir.is_dir());
    let ids = loader::subject_ids_from_env()
        .expect("Set $MRB_SUBJECTS to a comma separated subject id list");

    let atlas = AtlasContext::load(&atlas_dir).expect("Loading atlas config error");
    let textures = Arc::new(TextureRegistry::new());
    let params = params();

    println!("Running batch mode comparison on {} subjects...", ids.len());
    print!("{}", describe_params(&params));
    let modes = [
        ("sequential", ExecMode::Sequential),
        ("parallel", ExecMode::Parallel(None)),
    ];

    BatchModeResult::from_iter(modes.map(|(name, mode)| {
        println!("{name}: pre-processing...");
        let items: Vec<_> = loader::subject_paths(ids.clone(), &train_dir).collect();

        let begin = Instant::now();
        let results = pre_process_batch(
            items,
            &atlas,
            Arc::clone(&textures),
            &params,
            mode,
            FailurePolicy::Abort,
        )
        .expect("Batch processing error");
        let elapsed = begin.elapsed();

        let subjects: Vec<Subject> =
            results.into_iter().map(|r| r.expect("Abort 策略下均为成功项")).collect();

        // 输出序必须与提交序一致.
        for (expected, subject) in ids.iter().zip(subjects.iter()) {
            assert_eq!(expected, subject.id(), "Result order broken");
        }

        let columns = subjects
            .first()
            .and_then(Subject::feature_matrix)
            .map_or(0, |m| m.data.ncols());
        let rows = subjects
            .iter()
            .filter_map(Subject::feature_matrix)
            .map(|m| m.data.nrows())
            .sum();

        (
            name,
            ModeProfile {
                subjects: subjects.len(),
                columns,
                rows,
                elapsed,
            },
        )
    }))
}
