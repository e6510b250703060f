//! Coroscope CLI - コマンドラインインターフェース
//!
//! スタックレスコルーチンの非同期バックトレースを表示する coroscope のREPLインターフェース

use anyhow::Result;
use clap::{Parser, Subcommand};
use coroscope_core::{Flow, Session};
use coroscope_coro::CoroAbi;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// 履歴ファイルの名前（ホームディレクトリ直下）
const HISTORY_FILE: &str = ".coroscope_history";

/// Coroscope - Async backtraces for stackless coroutines
#[derive(Parser)]
#[command(name = "coroscope")]
#[command(version)]
#[command(about = "Reconstructs the logical call chain of suspended stackless coroutines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: TargetCommand,

    /// Coroutine frame layout (clang, gcc or promise-link)
    #[arg(long, global = true, default_value = "clang")]
    abi: CoroAbi,

    /// Enable debug logging (RUST_LOG overrides this)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Run a command and exit instead of starting the REPL (repeatable)
    #[arg(short = 'x', long = "execute", global = true)]
    execute: Vec<String>,
}

#[derive(Subcommand)]
enum TargetCommand {
    /// Attach to a running process
    Attach {
        /// Path to the executable binary
        binary: PathBuf,

        /// Process ID to attach to
        #[arg(short, long)]
        pid: i32,
    },

    /// Open a core dump
    Core {
        /// Path to the executable binary
        binary: PathBuf,

        /// Path to the core file
        corefile: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let session = open_session(&cli.command, cli.abi)?;

    if cli.execute.is_empty() {
        run_repl(&session)
    } else {
        run_batch(&session, &cli.execute)
    }
}

/// ログ出力を初期化する（標準エラー出力へ）
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// バイナリを読み込み、プロセスにアタッチまたはコアダンプを開く
fn open_session(command: &TargetCommand, abi: CoroAbi) -> Result<Session> {
    match command {
        TargetCommand::Attach { binary, pid } => {
            let session = Session::attach(binary, *pid, abi)?;
            println!("Attached to process {} ({})", pid, binary.display());
            Ok(session)
        }
        TargetCommand::Core { binary, corefile } => {
            let session = Session::open_core(binary, corefile, abi)?;
            println!("Opened core file {} ({})", corefile.display(), binary.display());
            Ok(session)
        }
    }
}

/// `-x` で渡されたコマンドを順に実行する
fn run_batch(session: &Session, commands: &[String]) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in commands {
        match session.execute(line, &mut out) {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => eprintln!("Error: {}", e),
        }
    }
    out.flush()?;
    Ok(())
}

/// REPLループを実行する
fn run_repl(session: &Session) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;
    let history = home::home_dir().map(|dir| dir.join(HISTORY_FILE));
    if let Some(path) = &history {
        if rl.load_history(path).is_err() {
            debug!("no history at {}", path.display());
        }
    }

    loop {
        let readline = rl.readline("(coroscope) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                match session.execute(line, &mut out) {
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Some(path) = &history {
        if let Err(e) = rl.save_history(path) {
            warn!("Failed to save history to {}: {}", path.display(), e);
        }
    }
    Ok(())
}
