//! 🧠欢迎光临🫐
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::data::subject::{
    FeatureImageKind, FeatureImageSet, FeatureMatrix, Modality, Subject, SubjectImages,
};
pub use crate::data::{
    AffineTransform, ChannelVolume, HeaderAttr, ImageProperties, MrLabel, MrScan, MrVolume,
};

pub use crate::consts::tissue::{
    AMYGDALA, BACKGROUND, GREY_MATTER, HIPPOCAMPUS, THALAMUS, WHITE_MATTER,
};
pub use crate::consts::{DEFAULT_SAMPLING_RATES, DEFAULT_SAMPLING_SEED};

pub use crate::atlas::AtlasContext;
pub use crate::classify::{Classifier, ForestParams};
pub use crate::dataset::{self, subject_loader, SubjectPaths};
pub use crate::error::{
    AlignError, ConfigError, LoadError, PipelineError, StageFailure, WorkerError,
};
pub use crate::features::schema::FeatureSchema;
pub use crate::features::{FeatureConfig, SamplingConfig, TextureFamilyConfig};
pub use crate::filtering::texture::{TextureExtractor, TextureFamily, TextureRegistry};
pub use crate::filtering::FilterPipeline;
pub use crate::pipeline::{
    describe_params, post_process, post_process_batch, pre_process, pre_process_batch, ExecMode,
    FailurePolicy, PostProcessParams, PostWorkItem, PreProcessParams,
};
