use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{stack, Array3, Array4, ArrayView, ArrayView4, ArrayViewMut, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::error::AlignError;
use crate::Idx3d;

pub mod props;
pub mod subject;
pub mod transform;

pub use props::ImageProperties;
pub use transform::AffineTransform;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 3D MRI nii 文件 header 的共用属性和部分通用操作.
pub trait HeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状大小.
    #[inline]
    fn shape(&self) -> Idx3d {
        get_shape_from_header(self.header())
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 获取单个体素分辨率. 该分辨率以毫米为单位, 分别代表空间 (相邻切片方向),
    /// 高 (自然图像的垂直方向), 宽 (自然图像的水平方向).
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, z, ..] = self.header().pixdim;
        [z as f64, h as f64, w as f64]
    }

    /// 快照该图像的空间属性.
    #[inline]
    fn props(&self) -> ImageProperties {
        ImageProperties::from_header(self.header())
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }
}

/// nii 格式 3D MRI 扫描, 包括 header 和体素强度. 强度值以 `f32` 保存.
#[derive(Debug, Clone)]
pub struct MrScan {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl HeaderAttr for MrScan {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for MrScan {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for MrScan {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl MrScan {
    /// 打开 nii 文件格式的 3D MRI 扫描. `path` 为 nii 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        // [W, H, z] -> [z, H, W].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray()?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data =
            Array3::<f32>::from_shape_vec(get_shape_from_header(&header), data.into_raw_vec())
                .unwrap();

        Ok(Self { header, data })
    }

    /// 将扫描写入 nii 文件. `.nii.gz` 后缀自动启用压缩.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> nifti::Result<()> {
        // [z, H, W] -> [W, H, z].
        let data = self.data.view().permuted_axes([2, 1, 0]);
        let data = data.as_standard_layout();
        WriterOptions::new(path.as_ref())
            .reference_header(self.header())
            .write_nifti(&data)
    }

    /// 根据裸数据和体素间距直接创建 `MrScan` 实体.
    ///
    /// # 参数
    ///
    /// 1. `data` 按照 (z, h, w) 组织.
    /// 2. `spacing` 按照 \[z, h, w\] 格式存储, 以毫米为单位.
    ///
    /// # 注意
    ///
    /// 该方法可能会创建不一致的实体, 因此你应仅将其用于实验目的.
    pub fn fake(data: Array3<f32>, spacing: [f32; 3]) -> Self {
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().to_owned()
        };

        let (z, h, w) = data.dim();
        let mut header = Box::<NiftiHeader>::default();
        header.dim = [3, w as u16, h as u16, z as u16, 1, 1, 1, 1];
        let [sz, sh, sw] = spacing;
        header.pixdim = [1.0, sw, sh, sz, 1.0, 1.0, 1.0, 1.0];
        header.qform_code = 1;
        header.intent_name[..4].copy_from_slice(b"fake");

        Self { header, data }
    }

    /// 根据裸数据和空间属性快照重建 `MrScan` 实体.
    ///
    /// `data` 的形状必须与 `props.shape` 一致, 否则程序 panic.
    pub fn from_parts(data: Array3<f32>, props: &ImageProperties) -> Self {
        assert_eq!(data.dim(), props.shape, "数据形状与空间属性不一致");
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().to_owned()
        };
        Self {
            header: Box::new(props.to_header()),
            data,
        }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, f32, Ix3> {
        self.data.view_mut()
    }

    /// 直接获得底层数据的所有权.
    #[inline]
    pub fn into_raw(self) -> Array3<f32> {
        self.data
    }
}

/// nii 格式 3D MRI 标注 (真值或脑掩膜), 包括 header 和标签值. 标签值以 `u8` 保存.
#[derive(Debug, Clone)]
pub struct MrLabel {
    header: BoxedHeader,
    data: Array3<u8>,
}

impl HeaderAttr for MrLabel {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for MrLabel {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for MrLabel {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl MrLabel {
    /// 打开 nii 文件格式的 3D MRI 标注. `path` 为 nii 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        // [W, H, z] -> [z, H, W]
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray::<u8>()?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data =
            Array3::<u8>::from_shape_vec(get_shape_from_header(&header), data.into_raw_vec())
                .unwrap();

        Ok(Self { header, data })
    }

    /// 将标注写入 nii 文件. `.nii.gz` 后缀自动启用压缩.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> nifti::Result<()> {
        // [z, H, W] -> [W, H, z].
        let data = self.data.view().permuted_axes([2, 1, 0]);
        let data = data.as_standard_layout();
        WriterOptions::new(path.as_ref())
            .reference_header(self.header())
            .write_nifti(&data)
    }

    /// 根据裸标签数据和体素间距直接创建 `MrLabel` 实体.
    ///
    /// # 参数
    ///
    /// 1. `data` 按照 (z, h, w) 组织.
    /// 2. `spacing` 按照 \[z, h, w\] 格式存储, 以毫米为单位.
    ///
    /// # 注意
    ///
    /// 该方法可能会创建不一致的实体, 因此你应仅将其用于实验目的.
    pub fn fake(data: Array3<u8>, spacing: [f32; 3]) -> Self {
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().to_owned()
        };

        let (z, h, w) = data.dim();
        let mut header = Box::<NiftiHeader>::default();
        header.dim = [3, w as u16, h as u16, z as u16, 1, 1, 1, 1];
        let [sz, sh, sw] = spacing;
        header.pixdim = [1.0, sw, sh, sz, 1.0, 1.0, 1.0, 1.0];
        header.qform_code = 1;
        header.intent_name[..4].copy_from_slice(b"fake");

        Self { header, data }
    }

    /// 根据裸标签数据和空间属性快照重建 `MrLabel` 实体.
    ///
    /// `data` 的形状必须与 `props.shape` 一致, 否则程序 panic.
    pub fn from_parts(data: Array3<u8>, props: &ImageProperties) -> Self {
        assert_eq!(data.dim(), props.shape, "数据形状与空间属性不一致");
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().to_owned()
        };
        Self {
            header: Box::new(props.to_header()),
            data,
        }
    }

    /// 判断该结构是否是由 `fake` 方法手动拼接的.
    pub fn is_faked(&self) -> bool {
        self.header.intent_name.starts_with(b"fake")
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, u8, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, u8, Ix3> {
        self.data.view_mut()
    }

    /// 直接获得底层数据的所有权.
    #[inline]
    pub fn into_raw(self) -> Array3<u8> {
        self.data
    }

    /// 获取 3D 标注中值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u8) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 将 3D 标注中值为 `old` 的体素全部替换为 `new`.
    ///
    /// 返回总共成功替换的个数.
    pub fn replace(&mut self, old: u8, new: u8) -> usize {
        let mut cnt = 0usize;
        self.data
            .iter_mut()
            .filter(|pix| **pix == old)
            .for_each(|p| {
                cnt += 1;
                *p = new;
            });
        cnt
    }
}

/// 能在过滤器管道中流动的体数据: 强度扫描或离散标注.
///
/// 配准阶段会同时作用于两类数据, 标注类数据强制使用最近邻重采样以保持离散类别码.
#[derive(Debug, Clone)]
pub enum MrVolume {
    /// 强度扫描.
    Scan(MrScan),

    /// 离散标注.
    Label(MrLabel),
}

impl From<MrScan> for MrVolume {
    #[inline]
    fn from(s: MrScan) -> Self {
        Self::Scan(s)
    }
}

impl From<MrLabel> for MrVolume {
    #[inline]
    fn from(l: MrLabel) -> Self {
        Self::Label(l)
    }
}

impl MrVolume {
    /// 获取数据形状大小.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        match self {
            Self::Scan(s) => s.shape(),
            Self::Label(l) => l.shape(),
        }
    }

    /// 快照该体数据的空间属性.
    #[inline]
    pub fn props(&self) -> ImageProperties {
        match self {
            Self::Scan(s) => s.props(),
            Self::Label(l) => l.props(),
        }
    }

    /// 若为强度扫描, 返回其引用.
    #[inline]
    pub fn as_scan(&self) -> Option<&MrScan> {
        match self {
            Self::Scan(s) => Some(s),
            Self::Label(_) => None,
        }
    }

    /// 若为离散标注, 返回其引用.
    #[inline]
    pub fn as_label(&self) -> Option<&MrLabel> {
        match self {
            Self::Scan(_) => None,
            Self::Label(l) => Some(l),
        }
    }

    /// 消费自我, 若为强度扫描则返回 `Ok`.
    #[inline]
    pub fn into_scan(self) -> Result<MrScan, Self> {
        match self {
            Self::Scan(s) => Ok(s),
            other => Err(other),
        }
    }

    /// 消费自我, 若为离散标注则返回 `Ok`.
    #[inline]
    pub fn into_label(self) -> Result<MrLabel, Self> {
        match self {
            Self::Label(l) => Ok(l),
            other => Err(other),
        }
    }
}

/// 多通道特征图像: 每个体素携带一个或多个标量特征值.
///
/// 数据按 (z, h, w, c) 组织, 通道名与通道一一对应.
/// 空间属性总是由调用方显式盖章, 外部特征算法的输出不被信任.
#[derive(Debug, Clone)]
pub struct ChannelVolume {
    names: Vec<String>,
    data: Array4<f32>,
    props: ImageProperties,
}

impl ChannelVolume {
    /// 将单通道扫描包装为特征图像.
    pub fn from_scan(scan: &MrScan, name: &str) -> Self {
        let props = scan.props();
        let data = scan.data().to_owned().insert_axis(Axis(3));
        Self {
            names: vec![name.to_owned()],
            data,
            props,
        }
    }

    /// 将若干单通道体数据合成为一个多通道特征图像, 并以 `props` 盖章.
    ///
    /// 通道名与通道数据个数必须一致, 且每个通道的形状必须等于 `props.shape`.
    pub fn from_channels(
        names: Vec<String>,
        channels: Vec<Array3<f32>>,
        props: ImageProperties,
    ) -> Result<Self, AlignError> {
        if names.len() != channels.len() {
            return Err(AlignError::ChannelArity {
                names: names.len(),
                channels: channels.len(),
            });
        }

        for ch in &channels {
            if ch.dim() != props.shape {
                return Err(AlignError::ShapeMismatch {
                    what: "feature channel vs stamp",
                    expected: props.shape,
                    actual: ch.dim(),
                });
            }
        }

        let views: Vec<_> = channels.iter().map(|c| c.view()).collect();
        // 合成结果是 owned 标准布局数组, 可直接按 (体素, 通道) 展平.
        let data = stack(Axis(3), &views).expect("通道形状已检查");
        debug_assert!(data.is_standard_layout());

        Ok(Self { names, data, props })
    }

    /// 通道个数.
    #[inline]
    pub fn channels(&self) -> usize {
        self.data.dim().3
    }

    /// 通道名, 与通道一一对应.
    #[inline]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// 空间属性.
    #[inline]
    pub fn props(&self) -> &ImageProperties {
        &self.props
    }

    /// 获取数据形状大小 (不含通道维).
    #[inline]
    pub fn shape(&self) -> Idx3d {
        let (z, h, w, _) = self.data.dim();
        (z, h, w)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// 直接获得底层数据的所有权.
    #[inline]
    pub fn into_raw(self) -> Array4<f32> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelVolume, HeaderAttr, MrLabel, MrScan};
    use crate::error::AlignError;
    use ndarray::{Array3, Array4};

    #[test]
    fn test_fake_shape_and_props() {
        let scan = MrScan::fake(Array3::zeros((2, 3, 4)), [2.0, 1.0, 0.5]);
        assert_eq!(scan.shape(), (2, 3, 4));
        assert_eq!(scan.size(), 24);
        let p = scan.props();
        assert_eq!(p.shape, (2, 3, 4));
        assert_eq!(p.spacing, [2.0, 1.0, 0.5]);
    }

    #[test]
    fn test_label_count_replace() {
        let mut data = Array3::zeros((2, 2, 2));
        data[(0, 0, 0)] = 3u8;
        data[(1, 1, 1)] = 3u8;
        let mut label = MrLabel::fake(data, [1.0; 3]);
        assert!(label.is_faked());
        assert_eq!(label.count(3), 2);
        assert_eq!(label.replace(3, 5), 2);
        assert_eq!(label.count(3), 0);
        assert_eq!(label.count(5), 2);
    }

    #[test]
    fn test_channel_volume_compose() {
        let scan = MrScan::fake(Array3::from_elem((2, 2, 2), 1.5), [1.0; 3]);
        let props = scan.props();

        let composed = ChannelVolume::from_channels(
            vec!["a".into(), "b".into()],
            vec![Array3::zeros((2, 2, 2)), Array3::from_elem((2, 2, 2), 2.0)],
            props.clone(),
        )
        .unwrap();
        assert_eq!(composed.channels(), 2);
        assert_eq!(composed.shape(), (2, 2, 2));
        assert_eq!(composed.data()[(0, 0, 0, 1)], 2.0);

        let bad = ChannelVolume::from_channels(
            vec!["a".into()],
            vec![Array3::zeros((1, 2, 2))],
            props.clone(),
        );
        assert!(matches!(bad, Err(AlignError::ShapeMismatch { .. })));

        let arity = ChannelVolume::from_channels(vec!["a".into()], vec![], props);
        assert!(matches!(arity, Err(AlignError::ChannelArity { .. })));

        let single = ChannelVolume::from_scan(&scan, "intensity");
        assert_eq!(single.channels(), 1);
        let raw: Array4<f32> = single.into_raw();
        assert_eq!(raw.dim(), (2, 2, 2, 1));
    }
}
