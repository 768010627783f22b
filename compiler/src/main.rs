use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use ptcg::diag::{codes, CgError};
use ptcg::generator::{self, CodeGenerator, GeneratorOptions, OverwritePolicy, StaticRuntime};
use ptcg::model::Model;
use ptcg::pass::PassId;

/// Usage errors and a missing model.
const EXIT_USAGE: i32 = -1;
/// No generator for the requested language and dialect.
const EXIT_NO_GENERATOR: i32 = -2;
const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Print the generated program to stdout
    Code,
    /// Write the program under the code directory
    File,
    /// Write, compile and run the program
    Run,
    /// Print how each adapter was found, as JSON
    Adapters,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Overwrite {
    Fail,
    Overwrite,
    Skip,
}

impl From<Overwrite> for OverwritePolicy {
    fn from(o: Overwrite) -> Self {
        match o {
            Overwrite::Fail => OverwritePolicy::Fail,
            Overwrite::Overwrite => OverwritePolicy::Overwrite,
            Overwrite::Skip => OverwritePolicy::Skip,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "ptcg",
    version,
    about = "Ptolemy code generator: turns JSON actor models into C or Java programs"
)]
struct Cli {
    /// Model description files (.json)
    models: Vec<PathBuf>,

    /// Directory generated files are written to
    #[arg(long, default_value = generator::DEFAULT_CODE_DIRECTORY)]
    code_directory: PathBuf,

    /// Generator package, e.g. generic.program.procedural.java
    #[arg(long, conflicts_with = "language")]
    generator_package: Option<String>,

    /// Target language (c, java); shorthand for --generator-package
    #[arg(long)]
    language: Option<String>,

    /// Adapter search packages, separated by ';', ':', ' ' or '*'
    #[arg(long)]
    generator_package_list: Option<String>,

    /// Generator dialect of the language
    #[arg(long, default_value = "")]
    dialect: String,

    /// Compile and run the generated program, with the language's default
    /// commands unless --compile-command or --run-command is given
    #[arg(long)]
    run: bool,

    /// Run command; @modelName@, @codeDirectory@ and @fileName@ are substituted
    #[arg(long)]
    run_command: Option<String>,

    /// Compile command, run before the run command
    #[arg(long)]
    compile_command: Option<String>,

    /// Inline fire code into the main loop
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    inline: bool,

    /// What to do when the output file exists
    #[arg(long, value_enum, default_value_t = Overwrite::Overwrite)]
    overwrite: Overwrite,

    /// Kill compile or run commands after this many seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Template root searched before the shipped templates (repeatable)
    #[arg(long)]
    template_dir: Vec<PathBuf>,

    /// Override a top-level model parameter (repeatable)
    #[arg(short = 'P', value_name = "NAME=VALUE")]
    parameter: Vec<String>,

    /// Output stage; --run upgrades `file` to `run`
    #[arg(long, value_enum, default_value_t = EmitStage::File)]
    emit: EmitStage,

    /// Log generation passes and timing
    #[arg(long)]
    verbose: bool,
}

fn fail(e: &CgError) -> ! {
    eprintln!("ptcg: {}", e);
    if e.code == Some(codes::E0101) {
        std::process::exit(EXIT_NO_GENERATOR);
    }
    std::process::exit(EXIT_FAILURE);
}

fn options(cli: &Cli) -> Result<GeneratorOptions, CgError> {
    let generator_package = match (&cli.generator_package, &cli.language) {
        (Some(p), _) => p.clone(),
        (None, Some(l)) => generator::language_package(l),
        (None, None) => generator::DEFAULT_GENERATOR_PACKAGE.to_string(),
    };
    let overrides = cli
        .parameter
        .iter()
        .map(|p| generator::parse_override(p))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(GeneratorOptions {
        package_list: cli
            .generator_package_list
            .clone()
            .unwrap_or_else(|| generator_package.clone()),
        generator_package,
        dialect: cli.dialect.clone(),
        code_directory: cli.code_directory.clone(),
        inline: cli.inline,
        run: cli.run || cli.run_command.is_some() || cli.emit == EmitStage::Run,
        compile_command: cli.compile_command.clone(),
        run_command: cli.run_command.clone(),
        overwrite: cli.overwrite.into(),
        timeout: cli.timeout.map(Duration::from_secs_f64),
        template_dirs: cli.template_dir.clone(),
        overrides,
    })
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            if e.use_stderr() {
                std::process::exit(EXIT_USAGE);
            }
            std::process::exit(0);
        }
    };

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if cli.models.is_empty() {
        eprintln!("ptcg: no model given; usage: ptcg [OPTIONS] <MODELS>...");
        std::process::exit(EXIT_USAGE);
    }

    let options = options(&cli).unwrap_or_else(|e| {
        eprintln!("ptcg: {}", e);
        std::process::exit(EXIT_USAGE)
    });
    log::debug!("generator package = {}", options.generator_package);
    log::debug!("code directory    = {}", options.code_directory.display());

    let terminal = match cli.emit {
        EmitStage::Adapters => PassId::ResolveAdapters,
        EmitStage::Code => PassId::Generate,
        EmitStage::File if !options.run => PassId::Write,
        EmitStage::File | EmitStage::Run => PassId::Execute,
    };

    let generator = CodeGenerator::new(options).unwrap_or_else(|e| fail(&e));

    let mut exit_code = 0;
    for path in &cli.models {
        let mut model = Model::load(path).unwrap_or_else(|e| fail(&e));
        generator.apply_overrides(&mut model);
        log::info!("generating {} from {}", model.name, path.display());

        let mut runtime = StaticRuntime;
        let output = ptcg::pipeline::run_pipeline(
            &generator,
            &mut model,
            &mut runtime,
            terminal,
            |_, _| {},
        )
        .unwrap_or_else(|e| fail(&e));

        match cli.emit {
            EmitStage::Adapters => match serde_json::to_string_pretty(&output.adapters) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("ptcg: failed to serialize the adapter report: {}", e);
                    std::process::exit(EXIT_FAILURE);
                }
            },
            EmitStage::Code => print!("{}", output.code.unwrap_or_default()),
            EmitStage::File | EmitStage::Run => {
                if let Some(path) = &output.path {
                    eprintln!("ptcg: wrote {}", path.display());
                }
            }
        }
        exit_code = output.exit_code;
    }
    std::process::exit(exit_code);
}
