#![warn(clippy::pedantic)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use lattejvm::{ExecError, Vm};
use lattejvm_class_loaders::{DirectoryClassLoader, JmodClassLoader};

/// Environment variable naming the JDK module archive directly.
const ENV_BASE_JMOD: &str = "LATTE_JAVA_BASE_JMOD";
/// Environment variable selecting the log level (trace/info/warn/error).
const ENV_LOG_LEVEL: &str = "LATTE_LOG_LEVEL";

#[derive(Debug, Parser)]
#[command(name = "lattejvm")]
#[command(version = "0.1.0")]
#[command(about = "A small JVM that runs .class files against java.base.jmod")]
struct CliArgs {
    /// Path to the .class file whose stem names the main class.
    #[arg(value_name = "CLASS_FILE")]
    class_file: PathBuf,
}

fn tracing_level() -> tracing::Level {
    match std::env::var(ENV_LOG_LEVEL) {
        Ok(level) if level.eq_ignore_ascii_case("trace") || level == "*" => tracing::Level::TRACE,
        Ok(level) if level.eq_ignore_ascii_case("debug") => tracing::Level::DEBUG,
        Ok(level) if level.eq_ignore_ascii_case("info") => tracing::Level::INFO,
        Ok(level) if level.eq_ignore_ascii_case("error") => tracing::Level::ERROR,
        _ => tracing::Level::WARN,
    }
}

fn init_logging() {
    // Program output owns stdout; diagnostics go to stderr.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing_level())
        .with_writer(std::io::stderr)
        .without_time()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Locates java.base.jmod: explicit env var, then JAVA_HOME, then the
/// conventional install glob.
fn find_jmod_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(ENV_BASE_JMOD) {
        return Some(PathBuf::from(path));
    }

    if let Ok(java_home) = std::env::var("JAVA_HOME") {
        let candidate = Path::new(&java_home).join("jmods").join("java.base.jmod");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    glob::glob("/usr/lib/jvm/java-*-openjdk-*/jmods/java.base.jmod")
        .ok()?
        .filter_map(Result::ok)
        .next()
}

fn run(args: &CliArgs) -> Result<(), String> {
    let class_file = &args.class_file;
    let class_dir = class_file
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_owned);
    let main_class = class_file
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| format!("not a .class file path: {}", class_file.display()))?
        .to_owned();

    let jmod_path = find_jmod_path().ok_or_else(|| {
        format!("could not find java.base.jmod; set {ENV_BASE_JMOD} or JAVA_HOME")
    })?;
    tracing::info!("using module archive {}", jmod_path.display());

    let bootstrap = JmodClassLoader::new(jmod_path);
    let user_loader = DirectoryClassLoader::new(class_dir, Box::new(bootstrap));

    let mut vm = Vm::new(Box::new(user_loader));
    match vm.run_main(&main_class) {
        Ok(()) => Ok(()),
        Err(ExecError::Java(exc)) => {
            let class_name = exc.class_name().replace('/', ".");
            match exc.message() {
                Some(message) => Err(format!(
                    "Exception in thread \"main\" {class_name}: {message}"
                )),
                None => Err(format!("Exception in thread \"main\" {class_name}")),
            }
        }
        Err(ExecError::Vm(err)) => Err(format!("vm error: {err:?}")),
    }
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_logging();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}
