//! 构建错误类型：
//! - 资源缺失（清单、主题、扩展）在编译开始前即报告
//! - 任一编译阶段的读写/编译失败均视为整次构建失败

use std::{io, path::{Path, PathBuf}};

use thiserror::Error;

use crate::resource::ResourceKind;

#[derive(Debug, Error)]
pub(crate) enum BuildError {
    #[error("找不到资源 `{name}`（搜索目录: {}）", dir.display())]
    ResourceNotFound { name: String, dir: PathBuf },

    #[error("清单解析失败 {}: {message}", path.display())]
    InvalidManifest { path: PathBuf, message: String },

    #[error("{pass} 编译失败 {}: {message}", path.display())]
    CompilationFailure {
        pass: ResourceKind,
        path: PathBuf,
        message: String,
    },

    /// `@import` 既未命中覆盖表，也无法在文件系统中找到
    #[error("Sass 导入无法解析（应用 {app}）: {message}")]
    ImportResolutionMiss { app: String, message: String },

    #[error("输出目录尚未创建，无法写入编译结果")]
    OutputRootNotPrepared,

    #[error("无法准备输出目录 {}: {source}", path.display())]
    PrepareOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BuildError {
    pub(crate) fn io(pass: ResourceKind, path: &Path, err: io::Error) -> Self {
        BuildError::CompilationFailure {
            pass,
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    /// 导入解析失败在分类上属于编译失败
    pub(crate) fn is_compilation_failure(&self) -> bool {
        matches!(
            self,
            BuildError::CompilationFailure { .. } | BuildError::ImportResolutionMiss { .. }
        )
    }
}

pub(crate) type BuildResult<T> = std::result::Result<T, BuildError>;
