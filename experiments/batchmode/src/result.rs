//! 实验结果.

use std::io::{self, Write};
use std::time::Duration;

/// 单个执行模式的运行概况.
pub struct ModeProfile {
    /// 处理的受试者个数.
    pub subjects: usize,

    /// 特征矩阵列数.
    pub columns: usize,

    /// 所有受试者的特征矩阵行数之和.
    pub rows: usize,

    /// 整批耗时.
    pub elapsed: Duration,
}

/// 将 `profile` 的结果写进 `w` 中.
fn describe_into<W: Write>(name: &str, p: &ModeProfile, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    writeln!(w, "Profile `{name}`:")?;
    writeln!(w, "{S4}Subjects: {}", p.subjects)?;
    writeln!(w, "{S4}Feature columns: {}", p.columns)?;
    writeln!(w, "{S4}Total matrix rows: {}", p.rows)?;
    writeln!(w, "{S4}Wall time: {} ms", p.elapsed.as_millis())?;
    let per_subject = p.elapsed.as_millis() as f64 / (p.subjects.max(1)) as f64;
    write!(w, "{S4}Average per subject: {per_subject:.1} ms")?;
    Ok(())
}

/// 对照实验最终结果.
pub struct BatchModeResult {
    data: Vec<(&'static str, ModeProfile)>,
}

impl BatchModeResult {
    /// 从 (模式名, 概况) 序列收集结果.
    pub fn from_iter<I: IntoIterator<Item = (&'static str, ModeProfile)>>(it: I) -> Self {
        Self {
            data: it.into_iter().collect(),
        }
    }

    /// 分析运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut buf = Vec::with_capacity(512);

        for (key, profile) in self.data.iter() {
            describe_into(key, profile, &mut buf).unwrap();
            println!("{}", std::str::from_utf8(&buf).unwrap());
            buf.clear();

            utils::sep();
        }
    }
}
