use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;

use duet::config::Config;
use duet::diagnostic::render_diagnostics;
use duet::error::Error;

/// Internal fault (EX_SOFTWARE).
const EXIT_INTERNAL: i32 = 70;

#[derive(Parser)]
#[command(
    name = "duet",
    version,
    about = "Split annotated C++ into host and device sources, and regenerate device source from compiled modules"
)]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split an annotated source file into cpu and gpu sources
    Split {
        /// Annotated source file
        input: PathBuf,
        /// Host output (default: <stem>.cpu.<ext> next to the input)
        #[arg(long, value_name = "PATH")]
        cpu_out: Option<PathBuf>,
        /// Device output (default: <input><device_suffix>)
        #[arg(long, value_name = "PATH")]
        gpu_out: Option<PathBuf>,
        /// Configuration file (default: ./duet.toml if present)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Regenerate source text from a compiled module
    Regen {
        /// Textual module file
        module: PathBuf,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Registered backend name (see `duet targets`)
        #[arg(long)]
        backend: Option<String>,
        /// Target triple overriding the module's
        #[arg(long)]
        triple: Option<String>,
        /// Configuration file (default: ./duet.toml if present)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// List registered backends and passes
    Targets,
}

fn main() {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    let outcome = std::panic::catch_unwind(|| match cli.command {
        Command::Split {
            input,
            cpu_out,
            gpu_out,
            config,
        } => cmd_split(&input, cpu_out, gpu_out, config.as_deref()),
        Command::Regen {
            module,
            output,
            backend,
            triple,
            config,
        } => cmd_regen(&module, output.as_deref(), backend, triple, config.as_deref()),
        Command::Targets => {
            cmd_targets();
            0
        }
    });

    match outcome {
        Ok(code) => process::exit(code),
        Err(_) => {
            eprintln!("error: internal fault, aborting");
            process::exit(EXIT_INTERNAL);
        }
    }
}

fn exit_code(err: &Error) -> i32 {
    if err.is_internal() {
        EXIT_INTERNAL
    } else {
        1
    }
}

/// Explicit `--config`, else `./duet.toml`, else defaults.
fn load_config(explicit: Option<&Path>) -> Result<Config, i32> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let local = PathBuf::from("duet.toml");
            if !local.is_file() {
                return Ok(Config::default());
            }
            local
        }
    };
    Config::load(&path).map_err(|diag| {
        let source = std::fs::read_to_string(&path).unwrap_or_default();
        diag.render(&path.display().to_string(), &source);
        1
    })
}

fn read_file(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })
}

fn write_file(path: &Path, text: &str) -> Result<(), Error> {
    std::fs::write(path, text).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })
}

// --- duet split ---

fn default_cpu_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{}.cpu.{}", stem, ext.to_string_lossy()),
        None => format!("{}.cpu", stem),
    };
    input.with_file_name(name)
}

fn cmd_split(input: &Path, cpu_out: Option<PathBuf>, gpu_out: Option<PathBuf>, config: Option<&Path>) -> i32 {
    let config = match load_config(config) {
        Ok(c) => c,
        Err(code) => return code,
    };
    match split(input, cpu_out, gpu_out, &config) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {}", err);
            exit_code(&err)
        }
    }
}

fn split(input: &Path, cpu_out: Option<PathBuf>, gpu_out: Option<PathBuf>, config: &Config) -> Result<i32, Error> {
    let text = read_file(input)?;
    let name = input.display().to_string();
    let output = duet::split_source(&name, &text, &config.rewrite)?;
    render_diagnostics(&output.diagnostics, &name, &text);

    let cpu_path = cpu_out.unwrap_or_else(|| default_cpu_path(input));
    let gpu_path = gpu_out.unwrap_or_else(|| PathBuf::from(format!("{}{}", name, config.rewrite.device_suffix)));
    write_file(&cpu_path, &output.cpu_source)?;
    write_file(&gpu_path, &output.gpu_source)?;

    eprintln!(
        "split {} -> {} (cpu), {} (gpu), {} kernel(s)",
        name,
        cpu_path.display(),
        gpu_path.display(),
        output.kernels.len()
    );
    Ok(if output.has_errors() { 1 } else { 0 })
}

// --- duet regen ---

fn cmd_regen(
    module: &Path,
    output: Option<&Path>,
    backend: Option<String>,
    triple: Option<String>,
    config: Option<&Path>,
) -> i32 {
    let mut config = match load_config(config) {
        Ok(c) => c,
        Err(code) => return code,
    };
    if let Some(backend) = backend {
        config.codegen.backend = backend;
    }
    if triple.is_some() {
        config.codegen.triple = triple;
    }
    match regen(module, output, &config) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err);
            exit_code(&err)
        }
    }
}

fn regen(module: &Path, output: Option<&Path>, config: &Config) -> Result<(), Error> {
    let text = read_file(module)?;
    let name = module
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| module.display().to_string());
    let source = duet::regenerate_text(&name, &text, &config.codegen)?;
    match output {
        Some(path) => {
            write_file(path, &source)?;
            eprintln!("wrote {}", path.display());
        }
        None => print!("{}", source),
    }
    Ok(())
}

// --- duet targets ---

fn cmd_targets() {
    let env = duet::backend::Environment::ensure_initialized();
    println!("Backends:");
    for entry in env.targets.entries() {
        println!("  {:<10} {}", entry.name, entry.description);
    }
    println!("Passes:");
    for pass in env.passes.passes() {
        println!("  {:<24} {}", pass.name, pass.description);
    }
}
