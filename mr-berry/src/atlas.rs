//! atlas 参考图像上下文.

use std::path::Path;
use std::sync::Arc;

use crate::consts::{ATLAS_T1_FILE, ATLAS_T2_FILE};
use crate::data::{HeaderAttr, MrScan};
use crate::error::{AlignError, PipelineError};

/// 批处理开始前加载一次的 atlas 参考图像对.
///
/// 这是整个批处理过程中唯一的共享状态: 只读, 以显式值对象的形式传入每次
/// 受试者处理, 不存在进程级全局变量. 内部以 `Arc` 保存, 克隆是廉价的.
#[derive(Debug, Clone)]
pub struct AtlasContext {
    t1: Arc<MrScan>,
    t2: Arc<MrScan>,
}

impl AtlasContext {
    /// 从 atlas 目录加载 T1w 与 T2w 参考图像.
    ///
    /// 两张图像的空间属性不一致时返回 `Err`: 没有合法的配准基线,
    /// 整个批处理都无法进行.
    pub fn load<P: AsRef<Path>>(directory: P) -> Result<Self, PipelineError> {
        let directory = directory.as_ref();
        let t1 = MrScan::open(directory.join(ATLAS_T1_FILE))?;
        let t2 = MrScan::open(directory.join(ATLAS_T2_FILE))?;
        Self::from_scans(t1, t2)
    }

    /// 从已加载的扫描构造 atlas 上下文, 并执行同样的属性一致性检查.
    pub fn from_scans(t1: MrScan, t2: MrScan) -> Result<Self, PipelineError> {
        if t1.props() != t2.props() {
            return Err(AlignError::PropertyMismatch {
                what: "atlas t1 vs t2",
            }
            .into());
        }
        Ok(Self {
            t1: Arc::new(t1),
            t2: Arc::new(t2),
        })
    }

    /// T1w 参考图像.
    #[inline]
    pub fn t1(&self) -> &MrScan {
        &self.t1
    }

    /// T2w 参考图像.
    #[inline]
    pub fn t2(&self) -> &MrScan {
        &self.t2
    }

    /// T1w 参考图像的共享句柄.
    #[inline]
    pub fn arc_t1(&self) -> Arc<MrScan> {
        Arc::clone(&self.t1)
    }

    /// T2w 参考图像的共享句柄.
    #[inline]
    pub fn arc_t2(&self) -> Arc<MrScan> {
        Arc::clone(&self.t2)
    }
}
