//! 批量执行器: 把单受试者处理函数按 sequential / parallel 模式铺开,
//! 并保证输出序恒等于提交序.

use std::num::NonZeroUsize;
use std::sync::mpsc;
use std::sync::Arc;

use threadpool::ThreadPool;

use crate::atlas::AtlasContext;
use crate::data::subject::Subject;
use crate::data::{ChannelVolume, MrLabel};
use crate::dataset::SubjectPaths;
use crate::error::{StageFailure, WorkerError};
use crate::filtering::post::CrfAlgorithm;
use crate::filtering::texture::TextureRegistry;
use crate::pipeline::transfer::{decode, encode, Transferable};
use crate::pipeline::{post_process, pre_process, PostProcessParams, PreProcessParams};

/// 执行模式.
#[derive(Debug, Copy, Clone)]
pub enum ExecMode {
    /// 在调用线程上顺序执行.
    Sequential,

    /// 扇出到 worker 池. `None` 表示以可用核心数为上限.
    Parallel(Option<NonZeroUsize>),
}

/// 单个 work item 失败时的批处理策略. 两种策略都不会静默丢弃失败的受试者.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailurePolicy {
    /// 整批失败: 返回提交序中第一个失败.
    Abort,

    /// 继续处理其余受试者, 失败以逐项 `Err` 的形式原位保留.
    Continue,
}

/// 对有序 work items 运行 `op`, 返回与提交序一致的结果表.
///
/// 调用线程阻塞到整批完成为止; parallel 模式下各 worker 的完成序是任意的,
/// 结果按下标回填, 除保序所需的回填表外不额外物化中间结果. 结果跨越 worker
/// 边界时总是经过 [`Transferable`] 传输表示, 不做默认对象传递.
///
/// `Abort` 策略下返回 `Err(第一个失败)`; `Continue` 策略下总是返回 `Ok`,
/// 逐项结果自行携带成败. 卡死或崩溃的 worker 会使整批停滞/失败,
/// 不支持取消或超时, 调用方应以进程级重启应对挂起.
pub fn run_batch<I, R, F>(
    items: Vec<(String, I)>,
    op: F,
    mode: ExecMode,
    policy: FailurePolicy,
) -> Result<Vec<Result<R, WorkerError>>, WorkerError>
where
    I: Send + 'static,
    R: Transferable + Send + 'static,
    F: Fn(&str, I) -> Result<R, StageFailure> + Send + Sync + 'static,
{
    let results = match mode {
        ExecMode::Sequential => items
            .into_iter()
            .map(|(id, item)| op(&id, item).map_err(|f| WorkerError::from_stage(&id, f)))
            .collect(),
        ExecMode::Parallel(workers) => run_parallel(items, op, workers),
    };

    match policy {
        FailurePolicy::Continue => Ok(results),
        FailurePolicy::Abort => {
            match results.iter().position(|r| r.is_err()) {
                None => Ok(results),
                // 提交序中的第一个失败.
                Some(first) => match results.into_iter().nth(first) {
                    Some(Err(err)) => Err(err),
                    _ => unreachable!("position 已定位到 Err 项"),
                },
            }
        }
    }
}

fn run_parallel<I, R, F>(
    items: Vec<(String, I)>,
    op: F,
    workers: Option<NonZeroUsize>,
) -> Vec<Result<R, WorkerError>>
where
    I: Send + 'static,
    R: Transferable + Send + 'static,
    F: Fn(&str, I) -> Result<R, StageFailure> + Send + Sync + 'static,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let workers = workers
        .map(NonZeroUsize::get)
        .unwrap_or_else(num_cpus::get)
        .min(total)
        .max(1);
    log::debug!("dispatching {total} work items onto {workers} workers");

    let pool = ThreadPool::new(workers);
    let op = Arc::new(op);
    let (tx, rx) = mpsc::channel::<(usize, String, Result<Vec<u8>, WorkerError>)>();

    for (index, (id, item)) in items.into_iter().enumerate() {
        let tx = tx.clone();
        let op = Arc::clone(&op);
        pool.execute(move || {
            // 结果在 worker 侧编码为传输帧, 句柄本体不跨越边界.
            let outcome = match op(&id, item) {
                Ok(result) => encode(result).map_err(|e| WorkerError {
                    id: id.clone(),
                    stage: "transfer".to_owned(),
                    source: e,
                }),
                Err(failure) => Err(WorkerError::from_stage(&id, failure)),
            };
            // 接收端只在调用方 panic 时才会消失.
            let _ = tx.send((index, id, outcome));
        });
    }
    drop(tx);

    // 仅为保序而存在的回填表.
    let mut slots: Vec<Option<Result<R, WorkerError>>> = (0..total).map(|_| None).collect();
    for (index, id, outcome) in rx.iter() {
        let decoded = outcome.and_then(|bytes| {
            decode::<R>(&bytes).map_err(|e| WorkerError {
                id,
                stage: "transfer".to_owned(),
                source: e,
            })
        });
        slots[index] = Some(decoded);
    }

    slots
        .into_iter()
        .map(|slot| slot.expect("每个 work item 恰好回报一次"))
        .collect()
}

/// 对一批受试者执行预处理 (加载 -> 配准 -> 去颅骨/归一化 -> 特征提取).
///
/// 返回表的顺序与 `items` 一致, 与执行模式和 worker 完成序无关.
pub fn pre_process_batch(
    items: Vec<(String, SubjectPaths)>,
    atlas: &AtlasContext,
    textures: Arc<TextureRegistry>,
    params: &PreProcessParams,
    mode: ExecMode,
    policy: FailurePolicy,
) -> Result<Vec<Result<Subject, WorkerError>>, WorkerError> {
    let atlas = atlas.clone();
    let params = params.clone();
    run_batch(
        items,
        move |id, paths: SubjectPaths| pre_process(id, &paths, &atlas, &textures, &params),
        mode,
        policy,
    )
}

/// 后处理的单个 work item.
pub struct PostWorkItem {
    /// 预处理产出的受试者容器 (CRF 需要其中的强度图像).
    pub subject: Arc<Subject>,

    /// 分类器输出的分割标注.
    pub segmentation: MrLabel,

    /// 分类器输出的逐类别概率 (CRF 启用时必须提供).
    pub probability: Option<ChannelVolume>,
}

/// 对一批 (受试者, 分割, 概率) 三元组执行后处理. 保序约定同 [`pre_process_batch`].
pub fn post_process_batch(
    items: Vec<(String, PostWorkItem)>,
    crf: Option<Arc<dyn CrfAlgorithm>>,
    params: &PostProcessParams,
    mode: ExecMode,
    policy: FailurePolicy,
) -> Result<Vec<Result<MrLabel, WorkerError>>, WorkerError> {
    let params = params.clone();
    run_batch(
        items,
        move |_id, item: PostWorkItem| {
            post_process(
                &item.subject,
                &item.segmentation,
                item.probability.as_ref(),
                crf.clone(),
                &params,
            )
        },
        mode,
        policy,
    )
}
