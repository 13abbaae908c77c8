use anyhow::Context;
use clap::{Parser, Subcommand};
use scriptui_gen::emit::{self, SourceOrigin, WindowCodeBehind, WindowMarkup};
use scriptui_gen::generate::{DEFAULT_GENERATED_FOLDER, GenerateRequest};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "scriptui-gen")]
#[command(about = "Generate window sources from a ScriptUI DSL script and register them in a project")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Make sure the project compiles everything in the generated folder
    Patch {
        /// Project manifest to patch in place
        manifest: PathBuf,

        /// Generated folder, relative to the project
        #[arg(short, long, default_value = DEFAULT_GENERATED_FOLDER)]
        folder: String,
    },
    /// Write a window code-behind file
    Emit {
        /// Destination file, overwritten if present
        output: PathBuf,

        #[command(flatten)]
        window: WindowArgs,
    },
    /// Write the window markup page
    Markup {
        /// Destination file, overwritten if present
        output: PathBuf,

        /// Text shown centered in the window
        #[arg(short, long, default_value = "")]
        message: String,

        #[command(flatten)]
        window: WindowArgs,
    },
    /// Emit markup and code-behind into the generated folder and patch the project
    Generate {
        manifest: PathBuf,

        #[arg(short, long, default_value = DEFAULT_GENERATED_FOLDER)]
        folder: String,

        #[arg(short, long, default_value = "")]
        message: String,

        #[command(flatten)]
        window: WindowArgs,
    },
}

#[derive(clap::Args)]
struct WindowArgs {
    #[arg(long, default_value = emit::DEFAULT_NAMESPACE)]
    namespace: String,

    #[arg(long, default_value = emit::DEFAULT_CLASS_NAME)]
    class: String,

    /// DSL script the constructor is attributed to
    #[arg(long, default_value = emit::DEFAULT_SCRIPT_NAME)]
    script: String,

    /// Line in the DSL script the constructor is attributed to
    #[arg(long, default_value_t = 1)]
    line: u32,
}

impl WindowArgs {
    fn code_behind(&self) -> WindowCodeBehind {
        WindowCodeBehind {
            namespace: self.namespace.clone(),
            class_name: self.class.clone(),
            constructor_origin: Some(SourceOrigin::new(self.script.clone(), self.line)),
            ..WindowCodeBehind::default()
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "scriptui_gen=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(err) = run(cli) {
        tracing::error!("scriptui-gen failed: {err:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Patch { manifest, folder } => {
            let outcome = scriptui_gen::patch(&manifest, &folder)
                .with_context(|| format!("patching {}", manifest.display()))?;
            if !outcome.changed() {
                tracing::info!("{} already references {folder}", manifest.display());
            }
        }
        Commands::Emit { output, window } => {
            emit::emit_code_behind(&window.code_behind(), &output)?;
            tracing::info!("wrote {}", output.display());
        }
        Commands::Markup {
            output,
            message,
            window,
        } => {
            let markup = WindowMarkup::for_code_behind(&window.code_behind(), message);
            emit::emit_markup(&markup, &output)?;
            tracing::info!("wrote {}", output.display());
        }
        Commands::Generate {
            manifest,
            folder,
            message,
            window,
        } => {
            let request = GenerateRequest {
                manifest_path: manifest,
                generated_folder: folder,
                code_behind: window.code_behind(),
                message,
            };
            let artifacts = scriptui_gen::generate(&request)?;
            tracing::info!(
                "wrote {} and {}",
                artifacts.markup_path.display(),
                artifacts.code_behind_path.display()
            );
        }
    }

    Ok(())
}
