#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供多模态脑部 MRI (T1w/T2w) 体素级组织分类流水线的结构化数据模型
//! 和编排算法: 图像容器、过滤器管道、特征提取与特征矩阵组装、训练体素采样,
//! 以及按提交序返回结果的批量并行执行器.
//!
//! 该 crate 目前仅提供 `safe` 接口. 分类器本体 (随机森林)、配准优化、逐体素纹理
//! 数学 (GLCM / first-order / GLSZM) 和 CRF 后处理属于外部算法, 只在 trait
//! 边界上被消费.
//!
//! # 注意
//!
//! 1. 该 crate 按照固定的受试者目录模式组织数据 (见 [`consts`] 与 [`dataset`]),
//!   没有对其它源的数据进行直接适配 (但如果新数据按照同样模式组织, 也可以工作).
//! 2. 在非期望情况下, 程序会直接 panic, 而不会导致内存错误. As what Rust promises.
//!
//! # 开发计划
//!
//! ### 图像容器与 nifti 数据结构 ✅
//!
//! 实现位于 `src/data`.
//!
//! ### 过滤器管道 (配准 / 去颅骨 / 归一化 / 后处理) ✅
//!
//! 按序执行、逐阶段绑定参数的图像变换链.
//!
//! 实现位于 `src/filtering`.
//!
//! ### 特征提取与特征矩阵组装 ✅
//!
//! 简单特征 (坐标, 强度, 梯度幅值) + 外部纹理特征族, 按固定求值序写入特征图像集,
//! 经 masked flatten 水平拼接成 (矩阵, 标签) 对.
//!
//! 实现位于 `src/features`.
//!
//! ### 训练体素采样 ✅
//!
//! 给定类别与逐类别保留概率的 Bernoulli 细化, 种子固定时逐 bit 可复现.
//!
//! 实现位于 `src/features/sampler.rs`.
//!
//! ### 批量执行器 ✅
//!
//! sequential / parallel 两种模式, 输出序恒等于提交序; worker 边界只允许
//! "裸数组 + 元数据" 形式的显式传输表示通过.
//!
//! 实现位于 `src/pipeline/batch.rs`.
//!
//! ### 特征 schema 校验 ✅
//!
//! 训练/推理两侧的特征列序用显式带版本的 schema 对象对账, 不一致即报错.
//!
//! 实现位于 `src/features/schema.rs`.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 3D MRI 体数据基础结构.
pub mod data;

pub use data::subject::{
    FeatureImageKind, FeatureImageSet, FeatureMatrix, Modality, Subject, SubjectImages,
};
pub use data::{ChannelVolume, HeaderAttr, ImageProperties, MrLabel, MrScan, MrVolume};

pub mod consts;

pub mod error;

pub use error::{AlignError, ConfigError, LoadError, PipelineError, StageFailure, WorkerError};

pub mod atlas;
pub mod classify;
pub mod dataset;
pub mod features;
pub mod filtering;
pub mod pipeline;
pub mod prelude;
