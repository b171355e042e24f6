//! 资源模型：
//! - `Resource` 描述一个可构建文件（源路径、目标路径、所属应用、覆盖来源）
//! - `Template` / `Javascript` 在其上附加各自的编译信息

use std::{
    collections::BTreeSet,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use tracing::info;

use crate::utils::join_rel;

/// 四类资源，对应四个编译阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ResourceKind {
    Templates,
    Sass,
    Javascript,
    Assets,
}

impl ResourceKind {
    /// 按入口聚合的类型：任何变更都需要全量重编
    pub(crate) fn is_aggregated(self) -> bool {
        matches!(self, ResourceKind::Sass | ResourceKind::Javascript)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Templates => "Templates",
            ResourceKind::Sass => "Sass",
            ResourceKind::Javascript => "Javascript",
            ResourceKind::Assets => "Assets",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Resource {
    /// 相对内容根目录，首段为声明者的名称
    pub(crate) src: String,
    /// 相对输出根目录
    pub(crate) dst: String,
    pub(crate) name: String,
    pub(crate) applications: BTreeSet<String>,
    /// 主题覆盖声明中的源路径（仅用于日志）
    pub(crate) override_src: Option<String>,
    pub(crate) override_full_src: Option<PathBuf>,
    pub(crate) format: Option<String>,
    base_src: PathBuf,
}

impl Resource {
    pub(crate) fn new(base_src: &Path, src: String, dst: String, name: String, app: &str) -> Self {
        let mut applications = BTreeSet::new();
        applications.insert(app.to_string());
        Resource {
            src,
            dst,
            name,
            applications,
            override_src: None,
            override_full_src: None,
            format: None,
            base_src: base_src.to_path_buf(),
        }
    }

    pub(crate) fn source_content(&self) -> io::Result<String> {
        fs::read_to_string(self.full_src())
    }

    pub(crate) fn add_application(&mut self, app: &str) {
        self.applications.insert(app.to_string());
    }

    pub(crate) fn full_src(&self) -> PathBuf {
        match &self.override_full_src {
            Some(p) => p.clone(),
            None => join_rel(&self.base_src, &self.src),
        }
    }

    pub(crate) fn apply_override(&mut self, declared_src: &str, full_src: PathBuf) {
        self.override_src = Some(declared_src.to_string());
        self.override_full_src = Some(full_src);
    }

    pub(crate) fn log_override_message(&self) {
        if let Some(o) = &self.override_src {
            info!("覆盖: {} <- {}", self.src, o);
        }
    }

    /// 去掉格式后缀的目标路径，即模块加载器使用的路径
    pub(crate) fn module_path(&self) -> &str {
        match self.format.as_deref() {
            Some(format) => self.dst.strip_suffix(format).unwrap_or(&self.dst),
            None => &self.dst,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Template {
    pub(crate) resource: Resource,
    /// 所属扩展的静态资源基础 URL（不含结尾 `/`）
    pub(crate) extension_asset_url: String,
    pub(crate) dependencies: Vec<String>,
}

impl Template {
    pub(crate) fn new(resource: Resource, extension_asset_url: String) -> Self {
        Template {
            resource,
            extension_asset_url,
            dependencies: vec!["Handlebars".into(), "Handlebars.CompilerNameLookup".into()],
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Javascript {
    pub(crate) resource: Resource,
    pub(crate) is_entrypoint: bool,
    pub(crate) extension_full_name: String,
}
