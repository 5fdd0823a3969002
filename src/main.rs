//! mmtest 命令行入口

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use mmtest::{
    common::{ExecutionResult, Testcase},
    config::AppConfig,
    dispatch::TestcaseRunner,
    ssh::RemoteSession,
    telemetry,
};

#[derive(Parser)]
#[command(name = "mmtest")]
#[command(version, about = "Run testcases on remote worker machines over SSH.")]
struct CommandLine {
    /// 配置文件（toml/yaml/json）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a testcase on the selected workers
    Run {
        /// Testcase JSON file
        #[arg(short, long, conflicts_with = "command")]
        testcase: Option<PathBuf>,
        /// Shell command to run instead of a testcase file
        #[arg(long)]
        command: Option<String>,
        /// Testcase name used with --command
        #[arg(long, default_value = "adhoc")]
        name: String,
        /// Worker index, may be repeated (default: all workers)
        #[arg(short, long = "worker")]
        workers: Vec<usize>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Only show (truncated) output of workers that did not pass
        #[arg(long)]
        brief: bool,
    },
    /// Execute a command on one host
    Exec {
        /// Host address or worker index
        host: String,
        command: String,
    },
    /// Download a file from one host
    Get {
        /// Host address or worker index
        host: String,
        remote: String,
        local: PathBuf,
    },
    /// Upload a file to one host
    Put {
        /// Host address or worker index
        host: String,
        local: PathBuf,
        remote: String,
    },
    /// List configured workers
    Workers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CommandLine::parse();

    // 加载 .env 文件（开发环境）
    // 按优先级加载：.env.local > .env
    dotenv::from_filename(".env.local").ok();
    dotenv::dotenv().ok();

    let config = AppConfig::load(cli.config.as_deref()).map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    telemetry::init_telemetry(&config.logging);

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "mmtest starting");

    let config = Arc::new(config);

    match cli.command {
        Commands::Run {
            testcase,
            command,
            name,
            workers,
            json,
            brief,
        } => {
            let testcase = load_testcase(testcase, command, name).await?;
            let mut runner = TestcaseRunner::new(config, testcase);
            if !workers.is_empty() {
                runner = runner.with_workers(workers);
            }

            let report = runner.run().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.render(brief));
            }

            if !report.all_passed() {
                std::process::exit(1);
            }
        }
        Commands::Exec { host, command } => {
            let session = open_session(&config, &host).await?;
            let result = session.exec(&command).await;
            session.close().await.ok();

            let result = result?;
            print!("{}", result.stdout);
            eprint!("{}", result.stderr);
            std::process::exit(exit_code(&result));
        }
        Commands::Get {
            host,
            remote,
            local,
        } => {
            let session = open_session(&config, &host).await?;
            let bytes = session.get_file(&remote, &local).await;
            session.close().await.ok();
            println!("{} bytes <- {}:{}", bytes?, host, remote);
        }
        Commands::Put {
            host,
            local,
            remote,
        } => {
            let session = open_session(&config, &host).await?;
            let bytes = session.put_file(&local, &remote).await;
            session.close().await.ok();
            println!("{} bytes -> {}:{}", bytes?, host, remote);
        }
        Commands::Workers => {
            let pool = config.worker_pool()?;
            for (index, host) in pool.iter() {
                println!("{:>3}  {}", index, host);
            }
        }
    }

    Ok(())
}

async fn load_testcase(
    path: Option<PathBuf>,
    command: Option<String>,
    name: String,
) -> anyhow::Result<Testcase> {
    match (path, command) {
        (Some(path), _) => {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read testcase {}", path.display()))?;
            Testcase::from_json(&content)
                .with_context(|| format!("Invalid testcase {}", path.display()))
        }
        (None, Some(command)) => Ok(Testcase::new(name, command)),
        (None, None) => Ok(Testcase::diagnostic()),
    }
}

/// 纯数字视为 worker 下标，否则视为主机地址
async fn open_session(config: &AppConfig, host: &str) -> anyhow::Result<RemoteSession> {
    let host = match host.parse::<usize>() {
        Ok(index) => {
            let pool = config.worker_pool()?;
            pool.get(index)
                .with_context(|| format!("Worker index {} out of range (0..{})", index, pool.len()))?
                .to_string()
        }
        Err(_) => host.to_string(),
    };

    let ssh_config = config.ssh.for_host(&host, None);
    let session = RemoteSession::open(&ssh_config)
        .await
        .with_context(|| format!("Failed to connect to {}", ssh_config.target()))?;
    Ok(session)
}

fn exit_code(result: &ExecutionResult) -> i32 {
    match result.exit_code {
        Some(code) => code,
        None if result.timed_out => 124,
        None => 1,
    }
}
