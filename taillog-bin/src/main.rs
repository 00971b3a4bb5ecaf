use anyhow::{Context, Result, bail};
use clap::Parser;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::{
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};
use taillog_framework::{LogReader, ReaderProfile, ReaderState, SourceOptions};
use taillog_sources::{FILE_SOURCE, PROCESS_SOURCE, TCP_SOURCE, UDP_SOURCE, default_registry};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const PROFILE_DIR: &str = "taillog";

/// taillog - read, parse and follow multi-line logs
#[derive(Parser, Debug)]
#[command(name = "taillog")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Reader profile: a TOML file, or a profile name looked up in the config directory
    #[arg(short, long, value_name = "PROFILE")]
    profile: String,

    /// Read a log file (`.gz` files are decompressed)
    #[arg(short, long, conflicts_with_all = ["command", "tcp", "udp"])]
    file: Option<PathBuf>,

    /// Read the standard output of a command
    #[arg(short, long, num_args = 1.., allow_hyphen_values = true, value_name = "PROGRAM [ARGS]")]
    command: Vec<String>,

    /// Listen on an address and read what a client sends
    #[arg(long, value_name = "HOST:PORT", conflicts_with_all = ["command", "udp"])]
    tcp: Option<String>,

    /// Bind an address and read the datagrams sent to it
    #[arg(long, value_name = "HOST:PORT", conflicts_with = "command")]
    udp: Option<String>,

    /// Keep reading, reopening the source whenever it ends
    #[arg(long)]
    continuous: bool,

    /// Level of diagnostic messages on stderr
    #[arg(long, default_value = "warn", value_parser = parse_level)]
    log_level: LevelFilter,

    /// Also write diagnostic messages to a file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let result = init_logger(args.log_level, args.log_file.as_deref()).and_then(|()| run(args));
    ExitCode::from(report(&result, &mut io::stderr()))
}

/// print the error chain once, returning the exit status
fn report(result: &Result<()>, out: &mut impl Write) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            let _ = writeln!(out, "Error: {:#}", e);
            1
        }
    }
}

fn parse_level(value: &str) -> Result<LevelFilter, String> {
    value
        .parse()
        .map_err(|_| format!("expected off, error, warn, info, debug or trace, got '{}'", value))
}

fn init_logger(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    let config = ConfigBuilder::new().set_time_format_rfc3339().build();
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Some(path) = log_file {
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        loggers.push(WriteLogger::new(level, config, file));
    }
    CombinedLogger::init(loggers).context("Failed to install logger")
}

/// a path as given, otherwise `<config dir>/taillog/<name>.toml`
fn resolve_profile(profile: &str) -> Result<PathBuf> {
    let path = PathBuf::from(profile);
    if path.exists() {
        return Ok(path);
    }
    let config_dir = dirs::config_dir().context("Unable to determine the config directory")?;
    let candidate = config_dir.join(PROFILE_DIR).join(format!("{}.toml", profile));
    if candidate.exists() {
        Ok(candidate)
    } else {
        bail!(
            "Profile '{}' not found (also looked for {})",
            profile,
            candidate.display()
        )
    }
}

fn source_from_args(args: &Args) -> Option<(&'static str, SourceOptions)> {
    if let Some(file) = &args.file {
        let options = SourceOptions {
            file_name: Some(file.clone()),
            ..Default::default()
        };
        return Some((FILE_SOURCE, options));
    }
    if let Some((program, arguments)) = args.command.split_first() {
        let options = SourceOptions {
            command: Some(program.clone()),
            arguments: arguments.to_vec(),
            ..Default::default()
        };
        return Some((PROCESS_SOURCE, options));
    }
    if let Some(address) = &args.tcp {
        let options = SourceOptions {
            address: Some(address.clone()),
            ..Default::default()
        };
        return Some((TCP_SOURCE, options));
    }
    if let Some(address) = &args.udp {
        let options = SourceOptions {
            address: Some(address.clone()),
            ..Default::default()
        };
        return Some((UDP_SOURCE, options));
    }
    None
}

fn run(args: Args) -> Result<()> {
    let profile_path = resolve_profile(&args.profile)?;
    let mut profile = ReaderProfile::load(&profile_path)?;
    log::debug!("Loaded profile {}", profile_path.display());

    let (provider, options) = match source_from_args(&args) {
        Some((provider, options)) => (provider.to_string(), options),
        None => {
            let source = profile
                .source
                .take()
                .context("No log source given on the command line or in the profile")?;
            (source.provider, source.options)
        }
    };
    let mut desc = profile.into_desc()?;
    if args.continuous {
        desc.is_continuous_reading = true;
    }

    let registry = default_registry();
    let source = registry
        .create_source(&provider, &options)
        .with_context(|| format!("Unable to create '{}' log source", provider))?;
    let reader = LogReader::new(source, desc)?;
    reader.start()?;
    follow(&reader)
}

/// print records as they arrive until the reader stops
fn follow(reader: &LogReader) -> Result<()> {
    let logs = reader.logs();
    let mut out = io::stdout().lock();
    let mut last_id = 0;
    let mut version = logs.version();
    loop {
        let state = reader.state();
        for record in logs.after_id(last_id) {
            writeln!(out, "{}", record)?;
            last_id = record.id();
        }
        out.flush()?;

        match state {
            ReaderState::Stopped if !reader.is_continuous_reading() => return Ok(()),
            ReaderState::DataSourceError => bail!(
                "Unable to read from {}, source state is {:?}",
                reader.source().name(),
                reader.source().state()
            ),
            ReaderState::UnclassifiedError => bail!("Reading stopped after an unexpected error"),
            ReaderState::Disposed => return Ok(()),
            _ => {}
        }
        version = logs.wait_for_change(version, POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_report_prints_error_once() {
        let mut out = Vec::new();
        let result = Err(anyhow!("no such file").context("Unable to create 'file' log source"));
        assert_eq!(report(&result, &mut out), 1);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "Error: Unable to create 'file' log source: no such file\n");
        assert_eq!(text.matches("Error:").count(), 1);

        let mut out = Vec::new();
        assert_eq!(report(&Ok(()), &mut out), 0);
        assert!(out.is_empty());
    }
}
