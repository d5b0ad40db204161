//! codebox CLI
//!
//! A command-line tool for running code snippets in disposable containers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codebox::{
    Config, ContainerRuntime, DockerRuntime, EXAMPLE_CONFIG, Language, SessionConfig,
    SessionError, with_session,
};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codebox")]
#[command(about = "A tool for running code snippets in disposable containers")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: codebox.toml)
        #[arg(short, long, default_value = "codebox.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a source file (install libraries, compile if needed, then execute)
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language (e.g., python, cpp, go). Inferred from the file extension if omitted
        #[arg(short, long = "lang")]
        language: Option<String>,

        /// Library to install before running (repeatable)
        #[arg(short = 'L', long = "library", value_name = "NAME")]
        libraries: Vec<String>,

        /// Image to run instead of the language default
        #[arg(long, conflicts_with = "dockerfile")]
        image: Option<String>,

        /// Dockerfile to build the image from
        #[arg(long)]
        dockerfile: Option<PathBuf>,

        /// Commit the container into the image and keep it after the run
        #[arg(long)]
        keep_template: bool,
    },

    /// Execute a shell command in a fresh session container
    Exec {
        /// Language whose image to use
        #[arg(short, long = "lang", default_value = "python")]
        language: String,

        /// Image to run instead of the language default
        #[arg(long)]
        image: Option<String>,

        /// Working directory inside the container
        #[arg(short, long)]
        workdir: Option<String>,

        /// Command to run through /bin/sh -c
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// List available languages
    Languages,

    /// Show effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Init { output, force } = &cli.command {
        return init_config(output, *force).await;
    }

    // Load configuration
    if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
    } else {
        debug!("using default configuration");
    }
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Run {
            source,
            language,
            libraries,
            image,
            dockerfile,
            keep_template,
        } => {
            let language = match language {
                Some(name) => name.parse::<Language>().context("unknown language")?,
                None => infer_language(&source)?,
            };
            let mut session = config.session_config_for(language);
            if image.is_some() || dockerfile.is_some() {
                session.image = image;
                session.dockerfile = dockerfile;
            }
            session.keep_template |= keep_template;
            run_source(&config, session, &source, libraries).await
        }
        Commands::Exec {
            language,
            image,
            workdir,
            command,
        } => {
            let language: Language = language.parse().context("unknown language")?;
            let mut session = config.session_config_for(language);
            if let Some(image) = image {
                session.image = Some(image);
                session.dockerfile = None;
            }
            run_command(&config, session, command.join(" "), workdir).await
        }
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

fn connect(config: &Config) -> Result<Arc<dyn ContainerRuntime>> {
    let runtime = DockerRuntime::from_config(config).context("failed to connect to docker")?;
    Ok(Arc::new(runtime))
}

fn infer_language(source: &Path) -> Result<Language> {
    let extension = source
        .extension()
        .and_then(|ext| ext.to_str())
        .context("cannot infer language from a file without extension; pass --lang")?;
    Language::ALL
        .into_iter()
        .find(|lang| lang.profile().extension == extension)
        .with_context(|| format!("no language uses the '.{extension}' extension; pass --lang"))
}

async fn run_source(
    config: &Config,
    session: SessionConfig,
    source: &Path,
    libraries: Vec<String>,
) -> Result<()> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    info!(language = %session.lang, "running program");
    let runtime = connect(config)?;
    let result = with_session(runtime, session, move |session| {
        Box::pin(async move {
            let libraries: Vec<&str> = libraries.iter().map(String::as_str).collect();
            session.run(&code, &libraries).await
        })
    })
    .await;

    match result {
        Ok(output) => {
            print!("{}", output.text);
            Ok(())
        }
        Err(error) => exit_with(error),
    }
}

async fn run_command(
    config: &Config,
    session: SessionConfig,
    command: String,
    workdir: Option<String>,
) -> Result<()> {
    let runtime = connect(config)?;
    let output = with_session(runtime, session, move |session| {
        Box::pin(async move { session.execute_command_in(&command, workdir.as_deref()).await })
    })
    .await;

    match output {
        Ok(output) => {
            print!("{}", output.text);
            info!(exit_code = ?output.exit_code, "command finished");
            match output.exit_code {
                Some(0) => Ok(()),
                code => std::process::exit(code.and_then(|c| i32::try_from(c).ok()).unwrap_or(1)),
            }
        }
        Err(error) => exit_with(error),
    }
}

/// Print captured output of a failed step, then exit non-zero
fn exit_with(error: SessionError) -> Result<()> {
    match error {
        SessionError::Execution { .. } | SessionError::Timeout { .. } => {
            if let Some(output) = error.output()
                && !output.is_empty()
            {
                eprintln!("{output}");
            }
            eprintln!("{error}");
            std::process::exit(1);
        }
        error => Err(error).context("session failed"),
    }
}

fn list_languages(config: &Config) {
    println!("Available languages:\n");

    for lang in Language::ALL {
        let profile = lang.profile();
        let lang_type = if profile.is_compiled() {
            "compiled"
        } else {
            "interpreted"
        };
        let install = if profile.supports_install() {
            ""
        } else {
            ", no libraries"
        };
        println!(
            "  {:<12} {:<11} .{:<5} {} ({lang_type}{install})",
            lang.as_str(),
            profile.name,
            profile.extension,
            config.default_image(lang),
        );
    }
}

fn show_config(config: &Config) {
    println!(
        "Docker host: {}",
        config.docker_host.as_deref().unwrap_or("(local defaults)")
    );
    println!("API timeout: {}s", config.api_timeout);
    match config.command_timeout {
        Some(secs) => println!("Command timeout: {secs}s"),
        None => println!("Command timeout: none"),
    }
    println!();
    println!("Session defaults:");
    println!("  Language: {}", config.session.lang);
    println!("  Image: {:?}", config.session.image);
    println!("  Dockerfile: {:?}", config.session.dockerfile);
    println!("  Keep template: {}", config.session.keep_template);
    println!("  Verbose: {}", config.session.verbose);
    println!();
    println!("Images:");
    for lang in Language::ALL {
        println!("  {:<12} {}", lang.as_str(), config.default_image(lang));
    }
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
