//! 编译编排：
//! - 清空并重建输出目录，写入模块加载器
//! - 并发运行 templates / sass / javascript / assets 四个编译阶段
//! - 任一阶段失败即整次构建失败（已写入的文件不回滚）
//! - 监视器触发的单阶段（或部分资源）重编

use std::{
    collections::BTreeSet,
    fs,
    sync::{Arc, Mutex},
    thread,
};

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::{
    context::CompilationContext,
    error::{BuildError, BuildResult},
    resource::ResourceKind,
    runtime,
};

mod assets;
mod sass;
mod templates;

pub(crate) use assets::{AssetsCompiler, JavascriptCompiler};
pub(crate) use sass::SassCompiler;
pub(crate) use templates::TemplatesCompiler;

/// 参与本次编译的资源（按资源 `src` 选择）
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Selection {
    All,
    Only(BTreeSet<String>),
}

impl Selection {
    pub(crate) fn includes(&self, src: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(set) => set.contains(src),
        }
    }
}

/// 单个资源类型的编译阶段
pub(crate) trait ResourceCompiler: Send + Sync {
    fn kind(&self) -> ResourceKind;
    fn compile(&self, ctx: &CompilationContext, selection: &Selection) -> BuildResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuildState {
    Idle,
    FolderPrepared,
    Compiling,
    Done,
    Failed,
}

pub(crate) struct Compiler {
    context: Arc<CompilationContext>,
    compilers: Vec<Box<dyn ResourceCompiler>>,
    state: Mutex<BuildState>,
    last_build: Mutex<Option<DateTime<Local>>>,
}

impl Compiler {
    pub(crate) fn new(context: Arc<CompilationContext>) -> BuildResult<Self> {
        let compilers: Vec<Box<dyn ResourceCompiler>> = vec![
            Box::new(SassCompiler),
            Box::new(TemplatesCompiler::new()?),
            Box::new(JavascriptCompiler),
            Box::new(AssetsCompiler),
        ];
        Ok(Self::with_compilers(context, compilers))
    }

    pub(crate) fn with_compilers(context: Arc<CompilationContext>, compilers: Vec<Box<dyn ResourceCompiler>>) -> Self {
        Compiler {
            context,
            compilers,
            state: Mutex::new(BuildState::Idle),
            last_build: Mutex::new(None),
        }
    }

    pub(crate) fn context(&self) -> &Arc<CompilationContext> {
        &self.context
    }

    pub(crate) fn state(&self) -> BuildState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: BuildState) {
        debug!("构建状态 -> {:?}", state);
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// 最近一次成功构建的完成时间
    pub(crate) fn last_build(&self) -> Option<DateTime<Local>> {
        *self.last_build.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 删除并重建输出目录，记录到上下文，并写入模块加载器
    pub(crate) fn prepare_output_root(&self) -> BuildResult<()> {
        let root = self.context.output_root().to_path_buf();
        let prepare = |e: std::io::Error| BuildError::PrepareOutput { path: root.clone(), source: e };
        if root.exists() {
            fs::remove_dir_all(&root).map_err(prepare)?;
        }
        fs::create_dir_all(&root).map_err(prepare)?;
        self.context.set_local_server_path(root.clone());

        // 去掉 node shebang，浏览器不认
        let loader = runtime::script(runtime::MODULE_LOADER).unwrap_or_default();
        let loader = match loader.strip_prefix("#!") {
            Some(rest) => rest.split_once('\n').map_or("", |(_, body)| body),
            None => loader,
        };
        fs::write(root.join(runtime::MODULE_LOADER), loader).map_err(prepare)?;
        self.set_state(BuildState::FolderPrepared);
        Ok(())
    }

    /// 完整构建：准备输出目录后并发运行全部阶段
    pub(crate) fn compile(&self) -> BuildResult<()> {
        let started = std::time::Instant::now();
        if let Err(e) = self.prepare_output_root() {
            self.set_state(BuildState::Failed);
            return Err(e);
        }
        self.set_state(BuildState::Compiling);
        let result = self.run_passes(self.compilers.iter().collect(), &Selection::All);
        self.finish(&result);
        if result.is_ok() {
            info!("构建完成，用时 {:.2?}", started.elapsed());
        }
        result
    }

    /// 只重跑某一类资源；输出目录必须已经准备好
    pub(crate) fn recompile(&self, kind: ResourceKind, selection: &Selection) -> BuildResult<()> {
        self.context.local_server_path()?;
        let passes: Vec<&Box<dyn ResourceCompiler>> = self.compilers.iter().filter(|c| c.kind() == kind).collect();
        self.set_state(BuildState::Compiling);
        let result = self.run_passes(passes, selection);
        self.finish(&result);
        result
    }

    fn finish(&self, result: &BuildResult<()>) {
        match result {
            Ok(()) => {
                *self.last_build.lock().unwrap_or_else(|e| e.into_inner()) = Some(Local::now());
                self.set_state(BuildState::Done);
            }
            Err(_) => self.set_state(BuildState::Failed),
        }
    }

    fn run_passes(&self, passes: Vec<&Box<dyn ResourceCompiler>>, selection: &Selection) -> BuildResult<()> {
        let ctx = self.context.as_ref();
        thread::scope(|s| {
            let handles: Vec<_> = passes
                .into_iter()
                .map(|c| {
                    s.spawn(move || {
                        info!("开始编译 {}", c.kind());
                        let r = c.compile(ctx, selection);
                        if r.is_ok() {
                            info!("完成编译 {}", c.kind());
                        }
                        r
                    })
                })
                .collect();
            let mut first_err = None;
            for h in handles {
                match h.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        if first_err.is_none() {
                            first_err = Some(e);
                        }
                    }
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            first_err.map_or(Ok(()), Err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::fixture;
    use std::path::PathBuf;

    struct Broken;

    impl ResourceCompiler for Broken {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Assets
        }
        fn compile(&self, _ctx: &CompilationContext, _selection: &Selection) -> BuildResult<()> {
            Err(BuildError::CompilationFailure {
                pass: ResourceKind::Assets,
                path: PathBuf::from("broken.png"),
                message: "boom".into(),
            })
        }
    }

    #[test]
    fn full_build_writes_every_output_kind() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(fixture(dir.path()));
        let compiler = Compiler::new(ctx.clone()).unwrap();
        assert_eq!(compiler.state(), BuildState::Idle);
        compiler.compile().unwrap();
        assert_eq!(compiler.state(), BuildState::Done);
        assert!(compiler.last_build().is_some());

        let out = dir.path().join("LocalServer");
        let loader = fs::read_to_string(out.join("require.js")).unwrap();
        assert!(!loader.starts_with("#!"));
        assert!(out.join("templates/processed-templates/Widgets/views/main.tpl.js").is_file());
        assert!(out.join("templates/shopping-templates.js").is_file());
        assert!(out.join("templates/javascript-libs.js").is_file());
        assert!(out.join("css/shopping.css").is_file());
        assert!(out.join("javascript/shopping-javascript.js").is_file());
        assert!(out.join("assets/Acme/Widgets/1.0/img/logo.png").is_file());
    }

    #[test]
    fn compile_wipes_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(fixture(dir.path()));
        let stale = dir.path().join("LocalServer").join("stale.txt");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "old").unwrap();
        Compiler::new(ctx).unwrap().compile().unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn one_failing_pass_fails_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(fixture(dir.path()));
        let compiler = Compiler::with_compilers(ctx, vec![Box::new(SassCompiler), Box::new(Broken)]);
        let err = compiler.compile().unwrap_err();
        assert!(err.is_compilation_failure());
        assert_eq!(compiler.state(), BuildState::Failed);
        assert!(compiler.last_build().is_none());
        // 其他阶段的产物保留在磁盘上
        assert!(dir.path().join("LocalServer/css/shopping.css").is_file());
    }

    #[test]
    fn recompile_requires_prepared_output() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(fixture(dir.path()));
        let compiler = Compiler::new(ctx).unwrap();
        let err = compiler.recompile(ResourceKind::Assets, &Selection::All).unwrap_err();
        assert!(matches!(err, BuildError::OutputRootNotPrepared));

        compiler.prepare_output_root().unwrap();
        assert_eq!(compiler.state(), BuildState::FolderPrepared);
        compiler.recompile(ResourceKind::Assets, &Selection::All).unwrap();
        assert!(dir.path().join("LocalServer/assets/Acme/Widgets/1.0/img/logo.png").is_file());
        assert!(!dir.path().join("LocalServer/css").exists());
    }
}
