use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use libime_demo::{Command, Demo, DemoConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "libime-demo")]
#[command(about = "Drive the libime demo input method on an in-memory host")]
#[command(version)]
struct Cli {
    /// TOML configuration; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Initial text of the first document
    #[arg(long, global = true, default_value = "")]
    text: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive REPL mode
    Repl,
    /// Run each argument as a REPL line, then print the final state
    Type {
        /// Lines such as `hello{enter}` or `:caret 0`
        lines: Vec<String>,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<DemoConfig> {
    match path {
        Some(path) => DemoConfig::load(path),
        None => Ok(DemoConfig::default()),
    }
}

fn print_help() {
    println!("Type letters to compose; {{enter}} or {{space}} commits, {{esc}} cancels.");
    println!("Keys: {{bs}} {{del}} {{left}} {{right}} {{home}} {{end}} {{toggle}}");
    println!("Commands: :focus TEXT  :switch N  :caret N  :terminate  :click");
    println!("          :keyboard on|off  :state  :quit");
}

fn run_repl(mut demo: Demo) -> anyhow::Result<()> {
    println!("libime demo - Ctrl-D or :quit to exit.");
    print_help();

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            continue;
        }
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(err) => {
                eprintln!("error: {err}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        match demo.execute(command) {
            Ok(Some(reply)) => println!("{reply}"),
            Ok(None) => {
                let snapshot = demo.snapshot();
                println!("doc: {:?}  preedit: {:?}", snapshot.document, snapshot.preedit);
            }
            Err(err) => eprintln!("error: {err:#}"),
        }
    }
    demo.shutdown()
}

fn run_lines(mut demo: Demo, lines: &[String]) -> anyhow::Result<()> {
    for line in lines {
        let command = Command::parse(line).with_context(|| format!("in {line:?}"))?;
        if command == Command::Quit {
            break;
        }
        if let Some(reply) = demo.execute(command)? {
            println!("{reply}");
        }
    }
    println!("{}", serde_json::to_string_pretty(&demo.snapshot())?);
    demo.shutdown()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Some(Commands::Config) => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Commands::Type { lines }) => run_lines(Demo::new(&config, &cli.text)?, &lines),
        Some(Commands::Repl) | None => run_repl(Demo::new(&config, &cli.text)?),
    }
}
