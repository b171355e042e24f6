//! Sass 编译（grass）：
//! - 每个应用合成一段入口源码：辅助函数 + 每个入口一条 `@import`
//! - 导入解析经由 `OverrideFs`，命中主题覆盖时读取覆盖文件
//! - 各应用并行编译为 `css/<app>.css`

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use grass::{Options, OutputStyle};
use tracing::debug;

use super::{ResourceCompiler, Selection};
use crate::{
    context::{CompilationContext, SassEntry},
    error::{BuildError, BuildResult},
    resource::ResourceKind,
    utils::{forward_slashes, join_rel, run_parallel},
};

const CSS_FOLDER: &str = "css";

/// grass 找不到导入文件时的报错前缀
const IMPORT_MISS: &str = "Can't find stylesheet";

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SassCompiler;

/// 把导入候选路径映射到覆盖源文件的文件系统适配器
#[derive(Debug)]
struct OverrideFs<'a> {
    files_path: &'a Path,
    /// 规范化后的目标路径（`Widgets/Sass/foo.scss`）-> 覆盖源文件绝对路径
    overrides: &'a BTreeMap<String, PathBuf>,
}

impl OverrideFs<'_> {
    /// 绝对候选路径 -> 覆盖表的键：相对内容根、去掉 partial 下划线、补全 `.scss`
    fn lookup_key(&self, path: &Path) -> Option<String> {
        let rel = forward_slashes(path.strip_prefix(self.files_path).ok()?);
        let (dir, file) = match rel.rsplit_once('/') {
            Some((dir, file)) => (Some(dir), file),
            None => (None, rel.as_str()),
        };
        let file = match file.strip_prefix('_') {
            Some(public) if !public.is_empty() => public,
            _ => file,
        };
        let file = if Path::new(file).extension().is_none() { format!("{file}.scss") } else { file.to_string() };
        Some(match dir {
            Some(dir) => format!("{dir}/{file}"),
            None => file,
        })
    }

    fn resolve(&self, path: &Path) -> Option<&PathBuf> {
        self.lookup_key(path).and_then(|key| self.overrides.get(&key))
    }
}

impl grass::Fs for OverrideFs<'_> {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        self.resolve(path).is_some() || path.is_file()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        match self.resolve(path) {
            Some(source) => {
                debug!("Sass 覆盖: {} <- {}", path.display(), source.display());
                fs::read(source)
            }
            None => fs::read(path),
        }
    }
}

impl SassCompiler {
    /// 某个应用的合成入口源码
    fn entry_source(ctx: &CompilationContext, entries: &[SassEntry]) -> String {
        let mut source = String::new();
        for entry in entries {
            source.push_str(&local_functions(&entry.assets_path));
            let full = forward_slashes(&join_rel(&ctx.files_path, &entry.entry));
            source.push_str(&format!("@import \"{full}\";\n"));
        }
        source
    }

    fn compile_app(
        ctx: &CompilationContext,
        css_folder: &Path,
        fs_adapter: &OverrideFs<'_>,
        app: &str,
        entries: &[SassEntry],
    ) -> BuildResult<()> {
        let source = Self::entry_source(ctx, entries);
        // 内容根目录作为导入搜索路径，候选路径同样经过覆盖表
        let options = Options::default()
            .fs(fs_adapter)
            .load_path(&ctx.files_path)
            .style(OutputStyle::Expanded);
        let css = grass::from_string(source, &options).map_err(|e| {
            let message = e.to_string();
            if message.contains(IMPORT_MISS) {
                BuildError::ImportResolutionMiss { app: app.to_string(), message }
            } else {
                BuildError::CompilationFailure {
                    pass: ResourceKind::Sass,
                    path: PathBuf::from(format!("{app}.css")),
                    message,
                }
            }
        })?;
        let dst = css_folder.join(format!("{app}.css"));
        fs::write(&dst, css).map_err(|e| BuildError::io(ResourceKind::Sass, &dst, e))?;
        debug!("样式 {} -> {}", app, dst.display());
        Ok(())
    }
}

/// 每个入口前重新定义两个资源路径函数，都指向该入口所属包的资源目录
fn local_functions(assets_path: &str) -> String {
    ["getThemeAssetsPath", "getExtensionAssetsPath"]
        .iter()
        .map(|name| format!("@function {name}($asset) {{ @return '../{assets_path}/' + $asset; }}\n"))
        .collect()
}

impl ResourceCompiler for SassCompiler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Sass
    }

    /// 入口聚合的资源，总是全量编译
    fn compile(&self, ctx: &CompilationContext, _selection: &Selection) -> BuildResult<()> {
        let css_folder = ctx.local_server_path()?.join(CSS_FOLDER);
        fs::create_dir_all(&css_folder).map_err(|e| BuildError::io(ResourceKind::Sass, &css_folder, e))?;

        let overrides: BTreeMap<String, PathBuf> = ctx
            .sass_overrides()
            .iter()
            .filter_map(|(dst, o)| ctx.locate_override(&o.src).map(|full| (dst.clone(), full)))
            .collect();
        let fs_adapter = OverrideFs { files_path: &ctx.files_path, overrides: &overrides };

        let apps: Vec<(&String, &Vec<SassEntry>)> = ctx.sass_entrypoints().iter().collect();
        run_parallel(&apps, |(app, entries)| Self::compile_app(ctx, &css_folder, &fs_adapter, app, entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::fixture;

    fn compile(root: &Path) -> BuildResult<String> {
        let ctx = fixture(root);
        let out = root.join("LocalServer");
        fs::create_dir_all(&out).unwrap();
        ctx.set_local_server_path(out.clone());
        SassCompiler.compile(&ctx, &Selection::All)?;
        Ok(fs::read_to_string(out.join("css/shopping.css")).unwrap())
    }

    #[test]
    fn partial_import_uses_theme_override() {
        let dir = tempfile::tempdir().unwrap();
        let css = compile(dir.path()).unwrap();
        assert!(css.contains("green"), "{css}");
        assert!(!css.contains("blue"), "{css}");
        assert!(css.contains(".widgets"));
    }

    #[test]
    fn asset_helpers_point_at_package_assets() {
        let dir = tempfile::tempdir().unwrap();
        let css = compile(dir.path()).unwrap();
        assert!(css.contains("../assets/Acme/Pure/2.0/img/bg.png"), "{css}");
    }

    #[test]
    fn content_root_import_uses_theme_override() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture(dir.path());
        fs::write(ctx.files_path.join("Widgets/Sass/main.scss"), ".widgets { color: red; }\n").unwrap();
        fs::write(ctx.files_path.join("Pure/Sass/theme.scss"), "@import \"Widgets/Sass/foo\";\n").unwrap();
        let out = dir.path().join("LocalServer");
        fs::create_dir_all(&out).unwrap();
        ctx.set_local_server_path(out.clone());
        SassCompiler.compile(&ctx, &Selection::All).unwrap();
        let css = fs::read_to_string(out.join("css/shopping.css")).unwrap();
        assert!(css.contains("green"), "{css}");
        assert!(!css.contains("blue"), "{css}");
    }

    #[test]
    fn helpers_follow_each_entry_package() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture(dir.path());
        fs::write(
            ctx.files_path.join("Widgets/Sass/main.scss"),
            ".widgets { background: getThemeAssetsPath('img/w.png'); }\n",
        )
        .unwrap();
        let out = dir.path().join("LocalServer");
        fs::create_dir_all(&out).unwrap();
        ctx.set_local_server_path(out.clone());
        SassCompiler.compile(&ctx, &Selection::All).unwrap();
        let css = fs::read_to_string(out.join("css/shopping.css")).unwrap();
        assert!(css.contains("../assets/Acme/Widgets/1.0/img/w.png"), "{css}");
        assert!(css.contains("../assets/Acme/Pure/2.0/img/bg.png"), "{css}");
    }

    #[test]
    fn missing_import_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture(dir.path());
        fs::write(ctx.files_path.join("Pure/Sass/theme.scss"), "@import \"nowhere\";\n").unwrap();
        let out = dir.path().join("LocalServer");
        fs::create_dir_all(&out).unwrap();
        ctx.set_local_server_path(out);
        let err = SassCompiler.compile(&ctx, &Selection::All).unwrap_err();
        assert!(matches!(err, BuildError::ImportResolutionMiss { .. }), "{err}");
    }

    #[test]
    fn lookup_key_normalizes_partials() {
        let overrides = BTreeMap::new();
        let fs_adapter = OverrideFs { files_path: Path::new("/files"), overrides: &overrides };
        let key = |p: &str| fs_adapter.lookup_key(Path::new(p));
        assert_eq!(key("/files/Widgets/Sass/_foo.scss").as_deref(), Some("Widgets/Sass/foo.scss"));
        assert_eq!(key("/files/Widgets/Sass/foo").as_deref(), Some("Widgets/Sass/foo.scss"));
        assert_eq!(key("/files/foo.scss").as_deref(), Some("foo.scss"));
        assert_eq!(key("/elsewhere/foo.scss"), None);
    }
}
