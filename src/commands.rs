//! 命令调度模块：
//! - 接收解析好的 CLI 参数，与环境变量、配置文件合并得到“有效参数”
//! - 组装项目结构、编译上下文与编译器
//! - 调用构建、监视、本地服务等模块

use anyhow::{bail, Context, Result};
use std::{env, path::PathBuf, sync::Arc};

use crate::{
    cli::{Cli, Command, ProjectArgs},
    compile::Compiler,
    config::{self, Config, Settings},
    context::CompilationContext,
    project::ProjectLayout,
    server, watch,
    utils::{env_bool_truthy, env_opt_path, env_opt_string, env_opt_u16, split_list},
};

/// 运行指定的子命令
pub(crate) fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve { args, open } => {
            let settings = effective_settings(args)?;
            let compiler = Arc::new(prepare_compiler(&settings)?);
            compiler.compile().context("首次构建失败")?;

            // watcher 需存活到服务结束
            let _watcher = watch::start(compiler.clone())?;
            if open {
                let url = compiler.context().server_url.to_string();
                let _ = webbrowser::open(&url);
            }
            server::serve(compiler, &settings.bind_addr())
        }
        Command::Build { args } => {
            let settings = effective_settings(args)?;
            let compiler = prepare_compiler(&settings)?;
            compiler.compile().context("构建失败")?;
            println!("✅ 已生成: {}", settings.out_dir.display());
            Ok(())
        }
        Command::List { project } => {
            let project = effective_project(project)?;
            let layout = ProjectLayout::discover(&project)?;
            println!("📁 项目: {}", layout.project_folder.display());
            println!("🎨 主题:");
            for (name, path) in &layout.themes {
                println!("  - {} ({})", name, path.display());
            }
            println!("🧩 扩展:");
            for (name, path) in &layout.extensions {
                println!("  - {} ({})", name, path.display());
            }
            Ok(())
        }
    }
}

fn effective_project(cli: Option<PathBuf>) -> Result<PathBuf> {
    match cli.or(env_opt_path("LOCALSERVE_PROJECT")) {
        Some(p) => Ok(p),
        None => env::current_dir().context("无法获取当前目录"),
    }
}

/// CLI > 环境变量 > 配置文件 > 默认值
fn effective_settings(args: ProjectArgs) -> Result<Settings> {
    let project = effective_project(args.project)?;
    let loaded = config::load_config(&project, args.config.as_deref())?;
    println!("ℹ️ 本次使用的配置来源: {}", config::describe_source(&loaded.source));

    let cli = Config {
        theme: args.theme,
        extensions: args.extensions.as_deref().map(split_list).unwrap_or_default(),
        port: args.port,
        https: args.https.then_some(true),
        out: args.out,
    };
    let env = Config {
        theme: env_opt_string("LOCALSERVE_THEME"),
        extensions: env_opt_string("LOCALSERVE_EXTENSIONS").as_deref().map(split_list).unwrap_or_default(),
        port: env_opt_u16("LOCALSERVE_PORT"),
        https: env_bool_truthy("LOCALSERVE_HTTPS"),
        out: env_opt_path("LOCALSERVE_OUT"),
    };
    Ok(Settings::merge(project, cli, env, loaded.config))
}

fn prepare_compiler(settings: &Settings) -> Result<Compiler> {
    let layout = ProjectLayout::discover(&settings.project_folder)?;
    let Some(theme) = settings.theme.as_deref().or_else(|| only_theme(&layout)) else {
        bail!(
            "未指定主题（--theme / LOCALSERVE_THEME / localserve.yaml），可选: {}",
            layout.themes.keys().cloned().collect::<Vec<_>>().join(", ")
        );
    };
    let context = CompilationContext::load(
        &layout,
        theme,
        &settings.extensions,
        settings.server_url()?,
        settings.out_dir.clone(),
    )
    .with_context(|| format!("加载主题 {} 失败", theme))?;
    Ok(Compiler::new(Arc::new(context))?)
}

/// 项目中只有一个主题时可省略 `--theme`
fn only_theme(layout: &ProjectLayout) -> Option<&str> {
    match layout.themes.len() {
        1 => layout.themes.keys().next().map(String::as_str),
        _ => None,
    }
}
