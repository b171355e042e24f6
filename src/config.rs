//! 配置与加载模块：
//! - 定义 `localserve.yaml` 的结构（主题、扩展、端口、输出目录）
//! - 提供 `load_config`：显式路径 > 项目目录自动发现 > 内置默认
//! - 合并 CLI / 环境变量 / 配置文件得到最终 `Settings`

use std::{fs, path::{Path, PathBuf}};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use url::Url;

pub(crate) const DEFAULT_PORT: u16 = 7777;
pub(crate) const DEFAULT_OUT: &str = "LocalServer";

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// 主题清单名（Objects 目录下 xml 文件名，不含扩展名）
    #[serde(default)]
    pub(crate) theme: Option<String>,
    /// 启用的扩展列表
    #[serde(default)]
    pub(crate) extensions: Vec<String>,
    #[serde(default)]
    pub(crate) port: Option<u16>,
    /// 生成的资源地址使用 https 协议
    #[serde(default)]
    pub(crate) https: Option<bool>,
    /// 输出目录（相对项目目录）
    #[serde(default, alias = "output")]
    pub(crate) out: Option<PathBuf>,
}

/// 配置来源（用于打印和调试）
#[derive(Debug, Clone)]
pub(crate) enum ConfigSource {
    LocalExplicit(String),
    LocalAuto(String),
    Defaults,
}

/// 加载后的配置及其来源
#[derive(Debug, Clone)]
pub(crate) struct LoadedConfig { pub(crate) config: Config, pub(crate) source: ConfigSource }

/// 人类可读的来源描述
pub(crate) fn describe_source(src: &ConfigSource) -> String {
    match src {
        ConfigSource::LocalExplicit(p) => format!("本地文件: {}", p),
        ConfigSource::LocalAuto(p) => format!("本地文件(自动发现): {}", p),
        ConfigSource::Defaults => "内置默认值".to_string(),
    }
}

// 自动发现：<project>/localserve.yaml / localserve.yml
fn resolve_local_config_path(project: &Path) -> Option<PathBuf> {
    ["localserve.yaml", "localserve.yml"]
        .iter()
        .map(|cand| project.join(cand))
        .find(|p| p.exists())
}

pub(crate) fn load_config(project: &Path, explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            bail!("配置文件不存在: {}", path.display());
        }
        let config = read_config(path)?;
        return Ok(LoadedConfig { config, source: ConfigSource::LocalExplicit(path.display().to_string()) });
    }
    if let Some(path) = resolve_local_config_path(project) {
        let config = read_config(&path)?;
        return Ok(LoadedConfig { config, source: ConfigSource::LocalAuto(path.display().to_string()) });
    }
    Ok(LoadedConfig { config: Config::default(), source: ConfigSource::Defaults })
}

fn read_config(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path).with_context(|| format!("读取配置失败: {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("解析 YAML 失败: {}", path.display()))
}

/// 合并后的运行参数
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) project_folder: PathBuf,
    pub(crate) theme: Option<String>,
    pub(crate) extensions: Vec<String>,
    pub(crate) port: u16,
    pub(crate) https: bool,
    pub(crate) out_dir: PathBuf,
}

impl Settings {
    /// 高优先级在前：`cli` 覆盖 `env`，`env` 覆盖配置文件
    pub(crate) fn merge(project_folder: PathBuf, cli: Config, env: Config, file: Config) -> Self {
        let theme = cli.theme.or(env.theme).or(file.theme);
        let extensions = [cli.extensions, env.extensions, file.extensions]
            .into_iter()
            .find(|list| !list.is_empty())
            .unwrap_or_default();
        let port = cli.port.or(env.port).or(file.port).unwrap_or(DEFAULT_PORT);
        let https = cli.https.or(env.https).or(file.https).unwrap_or(false);
        let out = cli.out.or(env.out).or(file.out).unwrap_or_else(|| PathBuf::from(DEFAULT_OUT));
        let out_dir = if out.is_absolute() { out } else { project_folder.join(out) };
        Settings { project_folder, theme, extensions, port, https, out_dir }
    }

    /// 本地服务地址，例如 `http://localhost:7777/`
    pub(crate) fn server_url(&self) -> Result<Url> {
        let scheme = if self.https { "https" } else { "http" };
        Url::parse(&format!("{}://localhost:{}/", scheme, self.port)).context("无效的服务地址")
    }

    pub(crate) fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}
