//! 通用常量.

/// 组织标签值.
pub mod tissue {
    /// 真值标注中, 背景的体素值.
    pub const BACKGROUND: u8 = 0;

    /// 真值标注中, 白质的体素值.
    pub const WHITE_MATTER: u8 = 1;

    /// 真值标注中, 灰质的体素值.
    pub const GREY_MATTER: u8 = 2;

    /// 真值标注中, 海马体的体素值.
    pub const HIPPOCAMPUS: u8 = 3;

    /// 真值标注中, 杏仁核的体素值.
    pub const AMYGDALA: u8 = 4;

    /// 真值标注中, 丘脑的体素值.
    pub const THALAMUS: u8 = 5;

    /// 全部组织类别 (含背景), 按标签值升序排列.
    pub const ALL_CLASSES: [u8; 6] = [
        BACKGROUND,
        WHITE_MATTER,
        GREY_MATTER,
        HIPPOCAMPUS,
        AMYGDALA,
        THALAMUS,
    ];

    /// 前景组织类别 (不含背景), 按标签值升序排列.
    pub const FOREGROUND_CLASSES: [u8; 5] =
        [WHITE_MATTER, GREY_MATTER, HIPPOCAMPUS, AMYGDALA, THALAMUS];

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, BACKGROUND)
    }

    /// 体素是否是前景组织?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        matches!(p, WHITE_MATTER..=THALAMUS)
    }

    /// 体素是否是白质?
    #[inline]
    pub const fn is_white_matter(p: u8) -> bool {
        matches!(p, WHITE_MATTER)
    }

    /// 体素是否是灰质?
    #[inline]
    pub const fn is_grey_matter(p: u8) -> bool {
        matches!(p, GREY_MATTER)
    }
}

/// 训练体素采样的默认逐类别保留概率, 与 [`tissue::ALL_CLASSES`] 一一对应.
///
/// 常见类别 (背景, 白质, 灰质) 被大幅下采样, 稀有类别保留得更多,
/// 以使每个受试者进入训练矩阵的体素数维持在可控范围内.
pub const DEFAULT_SAMPLING_RATES: [f64; 6] = [0.0003, 0.004, 0.003, 0.04, 0.04, 0.02];

/// 训练体素采样的默认随机种子.
pub const DEFAULT_SAMPLING_SEED: u64 = 51;

/// atlas 目录下 T1w 参考图像的文件名.
pub const ATLAS_T1_FILE: &str = "mni_icbm152_t1_tal_nlin_sym_09a_mask.nii.gz";

/// atlas 目录下 T2w 参考图像的文件名.
pub const ATLAS_T2_FILE: &str = "mni_icbm152_t2_tal_nlin_sym_09a.nii.gz";

/// 受试者目录下, T1w 原生扫描的文件名.
pub const SUBJECT_T1_FILE: &str = "T1native.nii.gz";

/// 受试者目录下, T2w 原生扫描的文件名.
pub const SUBJECT_T2_FILE: &str = "T2native.nii.gz";

/// 受试者目录下, 真值标注的文件名.
pub const SUBJECT_GROUND_TRUTH_FILE: &str = "labels_native.nii.gz";

/// 受试者目录下, 脑掩膜的文件名.
pub const SUBJECT_BRAIN_MASK_FILE: &str = "Brainmasknative.nii.gz";

/// 受试者目录下, 预计算仿射变换的文件名.
pub const SUBJECT_TRANSFORM_FILE: &str = "affine.txt";

/// 随机森林默认树数量.
pub const DEFAULT_N_ESTIMATORS: u32 = 50;

/// 随机森林默认最大深度.
pub const DEFAULT_MAX_DEPTH: u32 = 60;
