//! CLI 定义模块：仅负责命令行参数结构体与解析
//! 将 clap 的声明与业务逻辑解耦，便于在其它模块中复用参数。

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// 顶层 CLI 入口
#[derive(Parser, Debug)]
#[command(name = "localserve", about = "主题与扩展的本地预览构建服务", version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// `serve` 与 `build` 共用的项目参数
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct ProjectArgs {
    /// 项目目录（含 deploy.xml / Objects / FileCabinet），默认当前目录
    #[arg(short, long, value_name = "DIR")]
    pub(crate) project: Option<PathBuf>,
    /// 配置文件路径，默认：<项目>/localserve.yaml
    #[arg(short, long, value_name = "FILE")]
    pub(crate) config: Option<PathBuf>,
    /// 主题清单名（Objects 下的 xml 文件名，不含扩展名）
    #[arg(short, long, value_name = "NAME")]
    pub(crate) theme: Option<String>,
    /// 启用的扩展，逗号分隔
    #[arg(short, long, value_name = "A,B")]
    pub(crate) extensions: Option<String>,
    /// 服务端口，默认 7777
    #[arg(long, value_name = "PORT")]
    pub(crate) port: Option<u16>,
    /// 生成的资源地址使用 https
    #[arg(long)]
    pub(crate) https: bool,
    /// 输出目录，默认：<项目>/LocalServer
    #[arg(short, long, value_name = "DIR")]
    pub(crate) out: Option<PathBuf>,
}

/// 子命令定义
#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// 构建、监视源文件并启动本地服务
    Serve {
        #[command(flatten)]
        args: ProjectArgs,
        /// 启动后自动在浏览器打开
        #[arg(long)]
        open: bool,
    },
    /// 只构建一次
    Build {
        #[command(flatten)]
        args: ProjectArgs,
    },
    /// 列出项目中的主题与扩展
    List {
        /// 项目目录，默认当前目录
        #[arg(short, long, value_name = "DIR")]
        project: Option<PathBuf>,
    },
}
