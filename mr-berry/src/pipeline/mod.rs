//! 受试者级编排: 预处理与后处理.
//!
//! 预处理是一条严格的状态序列: 加载 -> 掩膜配准 -> 模态配准/去颅骨/归一化 ->
//! 真值配准 -> 属性快照与对齐校验 -> 特征提取与矩阵组装. 每个阶段由布尔开关
//! 门控, 关闭的阶段整体跳过 (恒等迁移), 不存在部分应用. 任一阶段失败都会
//! 携带受试者标识与阶段名中止, 不会产出填充了一半的容器.

pub mod batch;
pub mod transfer;

use std::sync::Arc;

use crate::atlas::AtlasContext;
use crate::data::subject::{Subject, SubjectImages};
use crate::data::{
    AffineTransform, ChannelVolume, HeaderAttr, MrLabel, MrScan, MrVolume,
};
use crate::dataset::SubjectPaths;
use crate::error::{AlignError, ConfigError, LoadError, PipelineError, StageFailure};
use crate::features::{FeatureConfig, FeatureExtractor};
use crate::filtering::post::{ComponentCleanup, CrfAlgorithm, DenseCrf, DenseCrfParams};
use crate::filtering::prep::{
    ImageNormalization, ImageRegistration, RegistrationParams, SkullStripParams, SkullStripping,
};
use crate::filtering::texture::TextureRegistry;
use crate::filtering::{FilterParams, FilterPipeline};

pub use batch::{
    post_process_batch, pre_process_batch, run_batch, ExecMode, FailurePolicy, PostWorkItem,
};

/// 预处理参数.
#[derive(Debug, Clone)]
pub struct PreProcessParams {
    /// 是否执行配准阶段.
    pub registration_pre: bool,

    /// 是否执行去颅骨阶段.
    pub skullstrip_pre: bool,

    /// 是否执行强度归一化阶段.
    pub normalization_pre: bool,

    /// 特征提取配置.
    pub features: FeatureConfig,
}

impl Default for PreProcessParams {
    fn default() -> Self {
        Self {
            registration_pre: true,
            skullstrip_pre: true,
            normalization_pre: true,
            features: FeatureConfig::default(),
        }
    }
}

/// 后处理参数.
#[derive(Debug, Clone)]
pub struct PostProcessParams {
    /// 是否执行简单形态学清理.
    pub simple_post: bool,

    /// 是否执行 dense CRF 优化.
    pub crf_post: bool,
}

impl Default for PostProcessParams {
    fn default() -> Self {
        Self {
            simple_post: true,
            crf_post: false,
        }
    }
}

/// 将生效的配置渲染为缩进文本块, 便于实验驱动程序随结果一起留档.
///
/// 只列出打开的开关; 启用的纹理特征族附带其激活的具名特征,
/// 一个都没激活时标注 `NO feature active`.
pub fn describe_params(params: &PreProcessParams) -> String {
    use crate::filtering::texture::TextureFamily;

    let mut out = String::new();
    let features = &params.features;
    let flags = [
        ("registration_pre", params.registration_pre),
        ("skullstrip_pre", params.skullstrip_pre),
        ("normalization_pre", params.normalization_pre),
        ("training", features.training),
        ("coordinates_feature", features.coordinates_feature),
        ("intensity_feature", features.intensity_feature),
        ("gradient_intensity_feature", features.gradient_intensity_feature),
    ];
    for (name, value) in flags {
        if value {
            out.push_str(name);
            out.push_str(": true\n");
        }
    }

    for family in TextureFamily::ALL {
        let config = features.family(family);
        if !config.enabled {
            continue;
        }
        out.push_str(&format!("{}_features:\n", family.tag()));
        let mut active: Vec<&str> = family
            .canonical_names()
            .iter()
            .filter(|n| config.parameters.get(**n).copied().unwrap_or(false))
            .copied()
            .collect();
        if active.is_empty() {
            out.push_str("  NO feature active\n");
        } else {
            for name in active.drain(..) {
                out.push_str("  ");
                out.push_str(name);
                out.push_str(": true\n");
            }
        }
    }
    out
}

/// 标注管道的输出必然仍是标注.
fn expect_label(volume: MrVolume) -> MrLabel {
    volume.into_label().ok().expect("标注管道的输出仍是标注")
}

/// 扫描管道的输出必然仍是扫描.
fn expect_scan(volume: MrVolume) -> MrScan {
    volume.into_scan().ok().expect("扫描管道的输出仍是扫描")
}

/// 构造某一模态的预处理管道.
fn modality_pipeline(
    reference: Arc<MrScan>,
    transform: &AffineTransform,
    brain_mask: &MrLabel,
    params: &PreProcessParams,
) -> Result<FilterPipeline, ConfigError> {
    let mut pipeline = FilterPipeline::new();
    if params.registration_pre {
        let index = pipeline.add(Box::new(ImageRegistration::new()));
        pipeline.set_params(
            index,
            FilterParams::Registration(RegistrationParams {
                reference,
                transform: transform.clone(),
                is_label: false,
            }),
        )?;
    }
    if params.skullstrip_pre {
        let index = pipeline.add(Box::new(SkullStripping::new()));
        pipeline.set_params(
            index,
            FilterParams::SkullStrip(SkullStripParams {
                mask: brain_mask.clone(),
            }),
        )?;
    }
    if params.normalization_pre {
        pipeline.add(Box::new(ImageNormalization::new()));
    }
    Ok(pipeline)
}

/// 构造标注类图像 (脑掩膜, 真值) 的配准管道.
fn label_pipeline(
    reference: Arc<MrScan>,
    transform: &AffineTransform,
    enabled: bool,
) -> Result<FilterPipeline, ConfigError> {
    let mut pipeline = FilterPipeline::new();
    if enabled {
        let index = pipeline.add(Box::new(ImageRegistration::new()));
        pipeline.set_params(
            index,
            FilterParams::Registration(RegistrationParams {
                reference,
                transform: transform.clone(),
                is_label: true,
            }),
        )?;
    }
    Ok(pipeline)
}

/// 加载并预处理单个受试者, 产出带特征矩阵的容器.
///
/// 脑掩膜先于各模态配准, 因为模态的去颅骨阶段消费已配准的掩膜.
/// 所有错误都携带阶段名, 再由批量执行器补充受试者标识.
pub fn pre_process(
    id: &str,
    paths: &SubjectPaths,
    atlas: &AtlasContext,
    textures: &TextureRegistry,
    params: &PreProcessParams,
) -> Result<Subject, StageFailure> {
    log::info!("processing subject {id}");

    // 加载.
    let stage = |e: PipelineError| StageFailure::new("load", e);
    let t1 = MrScan::open(&paths.t1).map_err(|e| stage(e.into()))?;
    let t2 = MrScan::open(&paths.t2).map_err(|e| stage(e.into()))?;
    let ground_truth = MrLabel::open(&paths.ground_truth).map_err(|e| stage(e.into()))?;
    let brain_mask = MrLabel::open(&paths.brain_mask).map_err(|e| stage(e.into()))?;
    let transform = AffineTransform::from_itk_file(&paths.transform)
        .map_err(|e| stage(LoadError::Transform(e).into()))?;

    let mut subject = Subject::new(
        id,
        SubjectImages {
            t1,
            t2,
            ground_truth,
            brain_mask,
            transform,
        },
    );

    // 脑掩膜配准.
    let pipeline = label_pipeline(
        atlas.arc_t1(),
        &subject.images.transform,
        params.registration_pre,
    )
    .map_err(|e| StageFailure::new("brain-mask", e))?;
    let out = pipeline
        .execute(&MrVolume::Label(subject.images.brain_mask.clone()))
        .map_err(|e| StageFailure::new("brain-mask", e))?;
    subject.images.brain_mask = expect_label(out);

    // T1w 预处理.
    let pipeline = modality_pipeline(
        atlas.arc_t1(),
        &subject.images.transform,
        &subject.images.brain_mask,
        params,
    )
    .map_err(|e| StageFailure::new("t1w", e))?;
    let out = pipeline
        .execute(&MrVolume::Scan(subject.images.t1.clone()))
        .map_err(|e| StageFailure::new("t1w", e))?;
    subject.images.t1 = expect_scan(out);

    // T2w 预处理.
    let pipeline = modality_pipeline(
        atlas.arc_t2(),
        &subject.images.transform,
        &subject.images.brain_mask,
        params,
    )
    .map_err(|e| StageFailure::new("t2w", e))?;
    let out = pipeline
        .execute(&MrVolume::Scan(subject.images.t2.clone()))
        .map_err(|e| StageFailure::new("t2w", e))?;
    subject.images.t2 = expect_scan(out);

    // 真值配准.
    let pipeline = label_pipeline(
        atlas.arc_t1(),
        &subject.images.transform,
        params.registration_pre,
    )
    .map_err(|e| StageFailure::new("ground-truth", e))?;
    let out = pipeline
        .execute(&MrVolume::Label(subject.images.ground_truth.clone()))
        .map_err(|e| StageFailure::new("ground-truth", e))?;
    subject.images.ground_truth = expect_label(out);

    // 配准结束后快照空间属性, 并校验全部图像相互对齐.
    let props = subject.images.t1.props();
    subject.set_properties(props.clone());
    let pairs = [
        ("t1 vs t2", subject.images.t2.props()),
        ("t1 vs ground truth", subject.images.ground_truth.props()),
        ("t1 vs brain mask", subject.images.brain_mask.props()),
    ];
    for (what, other) in pairs {
        if other != props {
            return Err(StageFailure::new(
                "alignment",
                AlignError::PropertyMismatch { what },
            ));
        }
    }

    // 特征提取与矩阵组装 (组装后特征图像被清空).
    FeatureExtractor::new(&mut subject, &params.features, textures)
        .execute()
        .map_err(|e| StageFailure::new("features", e))?;

    Ok(subject)
}

/// 对预测出的分割标注执行后处理管道.
///
/// 该管道独立于预处理的状态序列; CRF 启用时必须同时提供外部算法与概率体数据.
pub fn post_process(
    subject: &Subject,
    segmentation: &MrLabel,
    probability: Option<&ChannelVolume>,
    crf: Option<Arc<dyn CrfAlgorithm>>,
    params: &PostProcessParams,
) -> Result<MrLabel, StageFailure> {
    log::info!("post-processing subject {}", subject.id());

    let mut pipeline = FilterPipeline::new();
    if params.simple_post {
        pipeline.add(Box::<ComponentCleanup>::default());
    }
    if params.crf_post {
        let algorithm = crf.ok_or(StageFailure::new(
            "post",
            ConfigError::MissingParams { filter: "dense-crf" },
        ))?;
        let probability = probability.ok_or(StageFailure::new(
            "post",
            ConfigError::MissingParams { filter: "dense-crf" },
        ))?;
        let index = pipeline.add(Box::new(DenseCrf::new(algorithm)));
        pipeline
            .set_params(
                index,
                FilterParams::DenseCrf(DenseCrfParams {
                    t1: subject.images.t1.clone(),
                    t2: subject.images.t2.clone(),
                    probability: probability.clone(),
                }),
            )
            .map_err(|e| StageFailure::new("post", e))?;
    }

    let out = pipeline
        .execute(&MrVolume::Label(segmentation.clone()))
        .map_err(|e| StageFailure::new("post", e))?;
    Ok(expect_label(out))
}

#[cfg(test)]
mod tests {
    use super::{post_process, pre_process, PostProcessParams, PreProcessParams};
    use crate::atlas::AtlasContext;
    use crate::data::{AffineTransform, HeaderAttr, MrLabel, MrScan};
    use crate::dataset::SubjectPaths;
    use crate::features::SamplingConfig;
    use crate::filtering::texture::TextureRegistry;
    use ndarray::Array3;
    use std::fs;
    use std::path::PathBuf;

    const TRANSFORM_TEXT: &str = "\
#Insight Transform File V1.0
#Transform 0
Transform: AffineTransform_double_3_3
Parameters: 1 0 0 0 1 0 0 0 1 0 0 0
FixedParameters: 0 0 0
";

    /// 在临时目录下铺设一个合成受试者.
    fn synthetic_subject_dir(tag: &str) -> (PathBuf, SubjectPaths) {
        let dir = std::env::temp_dir().join(format!("mr-berry-pre-{tag}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let t1 = Array3::from_shape_fn((4, 4, 4), |(z, h, w)| (z * 16 + h * 4 + w) as f32);
        let t2 = Array3::from_shape_fn((4, 4, 4), |(z, h, w)| (64 - z * 16 - h * 4 - w) as f32);
        let gt = Array3::from_shape_fn((4, 4, 4), |(z, _, _)| u8::from(z >= 2));
        let mask = Array3::from_elem((4, 4, 4), 1u8);

        let paths = SubjectPaths::from_dir(&dir);
        MrScan::fake(t1, [1.0; 3]).save(&paths.t1).unwrap();
        MrScan::fake(t2, [1.0; 3]).save(&paths.t2).unwrap();
        MrLabel::fake(gt, [1.0; 3]).save(&paths.ground_truth).unwrap();
        MrLabel::fake(mask, [1.0; 3]).save(&paths.brain_mask).unwrap();
        fs::write(&paths.transform, TRANSFORM_TEXT).unwrap();

        (dir, paths)
    }

    fn synthetic_atlas() -> AtlasContext {
        let t1 = MrScan::fake(Array3::zeros((4, 4, 4)), [1.0; 3]);
        let t2 = MrScan::fake(Array3::zeros((4, 4, 4)), [1.0; 3]);
        AtlasContext::from_scans(t1, t2).unwrap()
    }

    #[test]
    fn test_pre_process_end_to_end() {
        let (dir, paths) = synthetic_subject_dir("e2e");
        let atlas = synthetic_atlas();
        let textures = TextureRegistry::new();

        let mut params = PreProcessParams::default();
        params.features.coordinates_feature = true;
        params.features.intensity_feature = true;
        params.features.gradient_intensity_feature = true;
        params.features.sampling = SamplingConfig {
            class_ids: vec![0, 1],
            rates: vec![0.0, 1.0],
            seed: 7,
        };

        let subject = pre_process("syn-0", &paths, &atlas, &textures, &params).unwrap();
        assert_eq!(subject.id(), "syn-0");
        assert_eq!(subject.properties(), Some(&atlas.t1().props()));

        let matrix = subject.feature_matrix().unwrap();
        assert_eq!(matrix.data.ncols(), 7);
        // 类别 1 全部纳入, 类别 0 全部排除.
        assert_eq!(matrix.data.nrows(), 32);
        assert!(subject.feature_images.is_empty());

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_pre_process_failure_names_the_stage() {
        let (dir, mut paths) = synthetic_subject_dir("missing");
        paths.t2 = dir.join("does-not-exist.nii.gz");

        let err = pre_process(
            "syn-1",
            &paths,
            &synthetic_atlas(),
            &TextureRegistry::new(),
            &PreProcessParams::default(),
        )
        .unwrap_err();
        assert_eq!(err.stage, "load");

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_post_process_without_crf() {
        let (dir, paths) = synthetic_subject_dir("post");
        let atlas = synthetic_atlas();
        let mut params = PreProcessParams::default();
        params.features.intensity_feature = true;
        let subject =
            pre_process("syn-2", &paths, &atlas, &TextureRegistry::new(), &params).unwrap();

        // 一大一小两个分量, 清理后只保留大者.
        let mut seg = Array3::<u8>::zeros((4, 4, 4));
        seg[(0, 0, 0)] = 1;
        seg[(2, 2, 2)] = 1;
        seg[(2, 2, 3)] = 1;
        let seg = MrLabel::fake(seg, [1.0; 3]);

        let out = post_process(
            &subject,
            &seg,
            None,
            None,
            &PostProcessParams::default(),
        )
        .unwrap();
        assert_eq!(out.count(1), 2);
        assert_eq!(out[(0, 0, 0)], 0);

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_crf_without_algorithm_is_config_error() {
        let (dir, paths) = synthetic_subject_dir("crf");
        let atlas = synthetic_atlas();
        let mut params = PreProcessParams::default();
        params.features.intensity_feature = true;
        let subject =
            pre_process("syn-3", &paths, &atlas, &TextureRegistry::new(), &params).unwrap();

        let seg = MrLabel::fake(Array3::zeros((4, 4, 4)), [1.0; 3]);
        let err = post_process(
            &subject,
            &seg,
            None,
            None,
            &PostProcessParams {
                simple_post: false,
                crf_post: true,
            },
        )
        .unwrap_err();
        assert_eq!(err.stage, "post");

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_identity_transform_parses() {
        let t = AffineTransform::from_itk_text(TRANSFORM_TEXT).unwrap();
        assert_eq!(t, AffineTransform::identity());
    }

    #[test]
    fn test_describe_params_lists_active_features() {
        let mut params = PreProcessParams::default();
        params.features.intensity_feature = true;
        params.features.glcm_features.enabled = true;
        params
            .features
            .glcm_features
            .parameters
            .insert("Contrast".into(), true);

        let text = super::describe_params(&params);
        assert!(text.contains("intensity_feature: true"));
        assert!(text.contains("glcm_features:\n  Contrast: true"));
        assert!(!text.contains("coordinates_feature"));
        assert!(!text.contains("glszm"));
    }
}
