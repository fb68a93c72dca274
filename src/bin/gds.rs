//! `gds compile` / `gds decompile` — the CLI surface over the library (§6).
//!
//! File-pair inference, recursive directory walking and progress reporting
//! live here; none of it belongs in the library, which only ever sees one
//! program's bytes at a time.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use gds_compiler::patch;
use gds_compiler::reader;
use gds_compiler::text;
use gds_compiler::writer;
use gds_compiler::Registry;

#[derive(Parser)]
#[command(name = "gds", about = "Compile and decompile GDS scripts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile GDA source files into GDS binaries.
    Compile(CompileArgs),
    /// Decompile GDS binaries into GDA source files.
    Decompile(DecompileArgs),
}

#[derive(Args)]
struct CompileArgs {
    input: PathBuf,
    output: PathBuf,
    #[arg(short, long)]
    recursive: bool,
    #[arg(short, long)]
    quiet: bool,
    #[arg(short = 'o', long = "overwrite", default_value_t = true, action = clap::ArgAction::Set)]
    overwrite: bool,
    #[arg(short = 'w', long)]
    workspace: Option<PathBuf>,
}

#[derive(Args)]
struct DecompileArgs {
    input: PathBuf,
    output: PathBuf,
    #[arg(short, long)]
    recursive: bool,
    #[arg(short, long)]
    quiet: bool,
    #[arg(short = 'o', long = "overwrite", default_value_t = true, action = clap::ArgAction::Set)]
    overwrite: bool,
    #[arg(short = 'w', long)]
    workspace: Option<PathBuf>,
    #[arg(short = 'p', long = "patches", default_value_t = true, action = clap::ArgAction::Set)]
    patches: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let ok = match cli.command {
        Commands::Compile(args) => run_compile(args),
        Commands::Decompile(args) => run_decompile(args),
    };
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn default_registry_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("resources/gds_commands")
}

fn load_registry() -> Option<Registry> {
    match Registry::load(&default_registry_root()) {
        Ok(r) => Some(r),
        Err(e) => {
            eprintln!("ERR: could not load command definitions: {e}");
            None
        }
    }
}

fn run_compile(args: CompileArgs) -> bool {
    let Some(registry) = load_registry() else {
        return false;
    };
    let pairs = match cli_file_pairs(&args.input, &args.output, &[".gda"], ".gds", args.recursive) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("ERR: {e}");
            return false;
        }
    };
    let pairs = if args.overwrite {
        pairs
    } else {
        pairs.into_iter().filter(|(_, out)| !out.exists()).collect()
    };

    let workdir = workdir_for(args.workspace.as_deref());
    log::debug!("compiling against workdir {}", workdir.display());

    foreach_file_pair(&pairs, args.quiet, |inpath, outpath| {
        let source = fs::read_to_string(inpath)?;
        let program = text::parser::parse(&source, &registry)
            .map_err(gds_compiler::SyntaxError::from)?;
        let bytes = writer::write_program(&program).map_err(gds_compiler::FormatError::from)?;
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(outpath, bytes)?;
        Ok(())
    })
}

fn run_decompile(args: DecompileArgs) -> bool {
    let Some(registry) = load_registry() else {
        return false;
    };
    let pairs = match cli_file_pairs(&args.input, &args.output, &[".gds"], ".gda", args.recursive) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("ERR: {e}");
            return false;
        }
    };
    let pairs = if args.overwrite {
        pairs
    } else {
        pairs.into_iter().filter(|(_, out)| !out.exists()).collect()
    };

    let workdir = workdir_for(args.workspace.as_deref());

    foreach_file_pair(&pairs, args.quiet, |inpath, outpath| {
        let rel = relative_path(inpath, &workdir);
        let raw = fs::read(inpath)?;
        let data = if args.patches { patch::patch(&raw, &rel) } else { raw };
        let program = reader::read_program(&data, &registry).map_err(gds_compiler::FormatError::from)?;
        let eventid = text::writer::eventid_from_path(&rel);
        let opts = text::writer::WriteOptions {
            lang: "en",
            eventid: eventid.as_deref(),
            workdir: Some(&workdir),
            omit_file_contents: false,
        };
        let text = text::writer::write_with(&program.elements, &opts);
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(outpath, text)?;
        Ok(())
    })
}

/// Resolves `-w/--workspace`, defaulting to the current directory, matching
/// the original CLI's `workspace or os.getcwd()`.
fn workdir_for(workspace: Option<&Path>) -> PathBuf {
    match workspace {
        Some(w) => w.to_path_buf(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// A file's path relative to the workdir, used for patch matching and
/// doc-template `eventid` extraction. Falls back to the path as given if it
/// isn't under the workdir.
fn relative_path(path: &Path, workdir: &Path) -> String {
    path.strip_prefix(workdir)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// A per-file error, already formatted the way the CLI reports it.
struct FileError(String);

impl From<std::io::Error> for FileError {
    fn from(e: std::io::Error) -> Self {
        FileError(e.to_string())
    }
}
impl From<gds_compiler::FormatError> for FileError {
    fn from(e: gds_compiler::FormatError) -> Self {
        FileError(e.to_string())
    }
}
impl From<gds_compiler::SyntaxError> for FileError {
    fn from(e: gds_compiler::SyntaxError) -> Self {
        FileError(e.to_string())
    }
}

/// Runs `process` over every input/output path pair, reporting failures per
/// file without aborting the batch. Returns whether every file succeeded.
fn foreach_file_pair(
    pairs: &[(PathBuf, PathBuf)],
    quiet: bool,
    process: impl Fn(&Path, &Path) -> Result<(), FileError>,
) -> bool {
    let bar = if quiet || pairs.is_empty() {
        None
    } else {
        let bar = ProgressBar::new(pairs.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Some(bar)
    };

    let mut all_ok = true;
    for (inpath, outpath) in pairs {
        if let Err(e) = process(inpath, outpath) {
            eprintln!("ERR: {}: could not process: {}", inpath.display(), e.0);
            all_ok = false;
        }
        if let Some(bar) = &bar {
            bar.inc(1);
        }
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    all_ok
}

/// Infers `(input, output)` file pairs from CLI arguments: a single file
/// pair, or a directory walk exchanging `in_endings` for `out_ending`.
fn cli_file_pairs(
    input: &Path,
    output: &Path,
    in_endings: &[&str],
    out_ending: &str,
    recursive: bool,
) -> Result<Vec<(PathBuf, PathBuf)>, String> {
    if input.is_file() {
        return Ok(vec![(input.to_path_buf(), output.to_path_buf())]);
    }
    if !input.is_dir() {
        return Err(format!("{} does not exist", input.display()));
    }

    let mut pairs = Vec::new();
    let walker = walkdir::WalkDir::new(input).max_depth(if recursive { usize::MAX } else { 1 });
    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = path.to_string_lossy();
        let matched_ending = in_endings.iter().find(|e| name.ends_with(**e));
        let Some(ending) = matched_ending else { continue };
        let rel = path.strip_prefix(input).unwrap_or(path);
        let stem = rel.to_string_lossy();
        let stem = stem.strip_suffix(ending).unwrap_or(&stem);
        let out_path = output.join(format!("{stem}{out_ending}"));
        pairs.push((path.to_path_buf(), out_path));
    }

    let mut seen = HashSet::new();
    for (_, out) in &pairs {
        if !seen.insert(out.clone()) {
            return Err(format!("duplicate output path {}", out.display()));
        }
    }

    Ok(pairs)
}
