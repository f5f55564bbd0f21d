use std::path::{Path, PathBuf};

use clap::Parser;
use owo_colors::OwoColorize;

use sandpit_bundler::{
    Bundler, CompileRequest, CompileStatus, EvalOutcome, Evaluator, LogLevel, OutboundMessage,
    Status,
};

/// Sandpit - compile, link and evaluate a small web project in an embedded
/// page.
#[derive(Parser)]
#[command(name = "sandpit", version, about, long_about = None)]
struct Cli {
    /// Project directory to bundle
    project: PathBuf,

    /// Preset template (vanilla, react)
    #[arg(short, long, default_value = "vanilla")]
    template: String,

    /// Evaluate an expression after the program ran and print its JSON value
    #[arg(long)]
    eval: Option<String>,

    /// Forward console output up to this level (error, warning, info, debug)
    #[arg(long, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    /// Print verbose logs
    #[arg(short, long)]
    verbose: bool,
}

fn parse_log_level(value: &str) -> Result<LogLevel, String> {
    match value {
        "error" => Ok(LogLevel::Error),
        "warn" | "warning" => Ok(LogLevel::Warning),
        "info" => Ok(LogLevel::Info),
        "debug" => Ok(LogLevel::Debug),
        other => Err(format!(
            "unknown log level '{other}' (expected error, warning, info or debug)"
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .without_time()
        .init();

    let files = load_project(&cli.project)?;
    if files.is_empty() {
        eprintln!("{} {} contains no source files", "warning:".yellow(), cli.project.display());
    }

    let bundler = Bundler::with_defaults()?;
    let mut messages = bundler.subscribe();
    let request = CompileRequest {
        files,
        template: cli.template.clone(),
        log_level: cli.log_level,
        ..Default::default()
    };

    let mut outcome = bundler.compile(request.clone()).await;
    if outcome.needs_full_reload() {
        bundler.reset();
        outcome = bundler.compile(request.clone()).await;
    }
    drain_messages(&mut messages);

    match outcome.status {
        CompileStatus::Failed(err) => {
            eprintln!("{} {}", "error:".red().bold(), err);
            std::process::exit(1);
        }
        CompileStatus::EmptyProject => {
            println!("{}", "Nothing to bundle: no entry point found.".dimmed());
            return Ok(());
        }
        CompileStatus::FullReload => {
            eprintln!("{} compile kept requesting a reload", "error:".red().bold());
            std::process::exit(1);
        }
        CompileStatus::Ready | CompileStatus::HtmlOnly => {}
    }

    let mut evaluator = Evaluator::new(&bundler)?;
    let mut restarts = 0usize;
    loop {
        match evaluator.run() {
            Ok(EvalOutcome::Completed) => break,
            Ok(EvalOutcome::NeedsRecompile) => {
                restarts += 1;
                if restarts > 3 {
                    eprintln!("{} module kept invalidating itself", "error:".red().bold());
                    std::process::exit(1);
                }
                let outcome = bundler.compile(request.clone()).await;
                drain_messages(&mut messages);
                if let Some(err) = outcome.error() {
                    eprintln!("{} {}", "error:".red().bold(), err);
                    std::process::exit(1);
                }
            }
            Err(err) => {
                drain_messages(&mut messages);
                eprintln!("{} {}", "error:".red().bold(), err);
                std::process::exit(1);
            }
        }
    }
    drain_messages(&mut messages);

    if let Some(expr) = &cli.eval {
        match evaluator.eval_json(expr) {
            Ok(value) => println!("{value}"),
            Err(err) => {
                eprintln!("{} {}", "error:".red().bold(), err);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Read every source file under the project directory into absolute virtual
/// paths, skipping dependency and build directories.
fn load_project(root: &Path) -> anyhow::Result<indexmap::IndexMap<String, String>> {
    let mut files = indexmap::IndexMap::new();
    collect_files(root, root, &mut files)?;
    files.sort_keys();
    Ok(files)
}

fn collect_files(
    root: &Path,
    dir: &Path,
    files: &mut indexmap::IndexMap<String, String>,
) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            if matches!(name.as_str(), "node_modules" | "target" | "dist" | "build")
                || name.starts_with('.')
            {
                continue;
            }
            collect_files(root, &path, files)?;
            continue;
        }
        // Text sources only; anything that does not read as UTF-8 is not
        // bundleable here.
        let Ok(contents) = std::fs::read_to_string(&path) else {
            continue;
        };
        let rel = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        files.insert(format!("/{rel}"), contents);
    }
    Ok(())
}

fn drain_messages(rx: &mut tokio::sync::mpsc::UnboundedReceiver<OutboundMessage>) {
    while let Ok(message) = rx.try_recv() {
        print_message(message);
    }
}

fn print_message(message: OutboundMessage) {
    match message {
        OutboundMessage::Status { status } => {
            println!("{} {}", "status".dimmed(), status_name(status).cyan());
        }
        OutboundMessage::Console { log: Some(log), .. } => {
            let line = log.args.join(" ");
            match log.method.as_str() {
                "error" => println!("{} {}", "console".dimmed(), line.red()),
                "warn" => println!("{} {}", "console".dimmed(), line.yellow()),
                _ => println!("{} {}", "console".dimmed(), line),
            }
        }
        OutboundMessage::Console {
            result: Some(result),
            ..
        } => {
            println!("{} {}", "result".dimmed(), result);
        }
        OutboundMessage::Action(action) => {
            println!("{} {}", action.title.red().bold(), action.message);
            for frame in action.payload.frames {
                let file = frame.file_name.unwrap_or_default();
                let line = frame.line_number.unwrap_or_default();
                println!("    at {}:{}", file, line);
            }
        }
        OutboundMessage::Refresh => {
            println!("{}", "page reload requested".dimmed());
        }
        OutboundMessage::Done { compilaton_error } if !compilaton_error => {
            println!("{}", "done".green());
        }
        _ => {}
    }
}

fn status_name(status: Status) -> &'static str {
    match status {
        Status::Initializing => "initializing",
        Status::InstallingDependencies => "installing-dependencies",
        Status::Transpiling => "transpiling",
        Status::Evaluating => "evaluating",
        Status::Done => "done",
        Status::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_project_maps_files_to_virtual_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.js"), "console.log(1);").unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/util.js"), "module.exports = 1;").unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/skip")).unwrap();
        std::fs::write(dir.path().join("node_modules/skip/index.js"), "x").unwrap();

        let files = load_project(dir.path()).unwrap();
        assert_eq!(files.get("/index.js").unwrap(), "console.log(1);");
        assert_eq!(files.get("/src/util.js").unwrap(), "module.exports = 1;");
        assert!(files.keys().all(|key| !key.contains("node_modules")));
    }

    #[test]
    fn log_levels_parse_from_flag_values() {
        assert_eq!(parse_log_level("error").unwrap(), LogLevel::Error);
        assert_eq!(parse_log_level("warning").unwrap(), LogLevel::Warning);
        assert_eq!(parse_log_level("warn").unwrap(), LogLevel::Warning);
        assert!(parse_log_level("noisy").is_err());
    }
}
