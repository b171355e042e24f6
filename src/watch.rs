//! 源文件监视：
//! - 递归监视内容根目录
//! - 按扩展名归类：`.tpl` 模板、`.js` 脚本、`.scss` 样式，其余为静态资源
//! - 样式与脚本全量重编；模板与资源只重编源路径包含变更路径的条目
//! - 重编失败只记录日志，已发布的输出保持旧版本

use std::{
    collections::BTreeSet,
    path::Path,
    sync::{mpsc, Arc},
    thread,
};

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info};

use crate::{
    compile::{Compiler, Selection},
    context::CompilationContext,
    resource::ResourceKind,
    utils::extension_of,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Trigger {
    Full(ResourceKind),
    Partial(ResourceKind, BTreeSet<String>),
    Ignore,
}

pub(crate) fn kind_for(path: &Path) -> ResourceKind {
    match extension_of(path).as_str() {
        "tpl" => ResourceKind::Templates,
        "js" => ResourceKind::Javascript,
        "scss" => ResourceKind::Sass,
        _ => ResourceKind::Assets,
    }
}

/// 变更文件 -> 需要执行的重编
pub(crate) fn classify(ctx: &CompilationContext, path: &Path) -> Trigger {
    let kind = kind_for(path);
    if kind.is_aggregated() {
        return Trigger::Full(kind);
    }
    let Some(rel) = ctx.exclude_base_files_path(path) else {
        return Trigger::Ignore;
    };
    let matched: BTreeSet<String> = match kind {
        // 主题覆盖文件变更时，路由回被覆盖的模板
        ResourceKind::Templates => ctx
            .templates()
            .iter()
            .map(|t| &t.resource)
            .filter(|r| r.src.contains(&rel) || r.override_src.as_deref().is_some_and(|o| o.contains(&rel)))
            .map(|r| r.src.clone())
            .collect(),
        _ => ctx.assets().iter().filter(|a| a.src.contains(&rel)).map(|a| a.src.clone()).collect(),
    };
    if matched.is_empty() {
        debug!("变更未命中任何 {}: {}", kind, rel);
        Trigger::Ignore
    } else {
        Trigger::Partial(kind, matched)
    }
}

fn is_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}

/// 启动监视线程；返回的 watcher 需在服务期间保持存活
pub(crate) fn start(compiler: Arc<Compiler>) -> Result<RecommendedWatcher> {
    let root = compiler.context().files_path.clone();
    let (tx, rx) = mpsc::channel::<notify::Result<notify::Event>>();
    let mut watcher = notify::recommended_watcher(tx).context("创建文件监视器失败")?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("无法监视目录: {}", root.display()))?;
    println!("👀 监视目录: {}", root.display());

    thread::spawn(move || {
        for res in rx {
            let event = match res {
                Ok(event) if is_change(&event.kind) => event,
                Ok(_) => continue,
                Err(e) => {
                    error!("监视事件错误: {}", e);
                    continue;
                }
            };
            for path in event.paths {
                if path.is_dir() {
                    continue;
                }
                handle_change(&compiler, &path);
            }
        }
    });
    Ok(watcher)
}

fn handle_change(compiler: &Compiler, path: &Path) {
    let (kind, selection) = match classify(compiler.context(), path) {
        Trigger::Full(kind) => (kind, Selection::All),
        Trigger::Partial(kind, set) => (kind, Selection::Only(set)),
        Trigger::Ignore => return,
    };
    info!("检测到变更 {}，重编 {}", path.display(), kind);
    if let Err(e) = compiler.recompile(kind, &selection) {
        error!("重编 {} 失败: {}", kind, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::fixture;

    #[test]
    fn extension_routes_to_pass() {
        assert_eq!(kind_for(Path::new("a/b.tpl")), ResourceKind::Templates);
        assert_eq!(kind_for(Path::new("a/b.JS")), ResourceKind::Javascript);
        assert_eq!(kind_for(Path::new("a/_b.scss")), ResourceKind::Sass);
        assert_eq!(kind_for(Path::new("a/b.woff2")), ResourceKind::Assets);
        assert_eq!(kind_for(Path::new("a/README")), ResourceKind::Assets);
    }

    #[test]
    fn stylesheet_change_triggers_full_sass_pass() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture(dir.path());
        let changed = ctx.files_path.join("Widgets/Sass/_foo.scss");
        assert_eq!(classify(&ctx, &changed), Trigger::Full(ResourceKind::Sass));
    }

    #[test]
    fn template_change_selects_matching_templates_only() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture(dir.path());
        let changed = ctx.files_path.join("Widgets/views/main.tpl");
        let expected: BTreeSet<String> = ["Widgets/views/main.tpl".to_string()].into();
        assert_eq!(classify(&ctx, &changed), Trigger::Partial(ResourceKind::Templates, expected));

        let unrelated = ctx.files_path.join("Widgets/views/bar.tpl");
        assert_eq!(classify(&ctx, &unrelated), Trigger::Ignore);
    }

    #[test]
    fn override_change_routes_to_overridden_template() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture(dir.path());
        let changed = ctx.files_path.join("Pure/Overrides/Widgets/views/main.tpl");
        let expected: BTreeSet<String> = ["Widgets/views/main.tpl".to_string()].into();
        assert_eq!(classify(&ctx, &changed), Trigger::Partial(ResourceKind::Templates, expected));
    }

    #[test]
    fn asset_change_and_outside_paths() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = fixture(dir.path());
        let logo = ctx.files_path.join("Widgets/assets/img/logo.png");
        assert!(matches!(classify(&ctx, &logo), Trigger::Partial(ResourceKind::Assets, _)));
        assert_eq!(classify(&ctx, Path::new("/somewhere/else/logo.png")), Trigger::Ignore);
    }

    #[test]
    fn change_recompiles_only_selected_template() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(fixture(dir.path()));
        let compiler = Compiler::new(ctx.clone()).unwrap();
        compiler.compile().unwrap();

        let override_src = ctx.files_path.join("Pure/Overrides/Widgets/views/main.tpl");
        std::fs::write(&override_src, "<em>{{name}}</em>").unwrap();
        handle_change(&compiler, &override_src);
        let module = std::fs::read_to_string(
            dir.path().join("LocalServer/templates/processed-templates/Widgets/views/main.tpl.js"),
        )
        .unwrap();
        assert!(module.contains("<em>{{name}}</em>"));
    }
}
