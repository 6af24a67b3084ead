//! CLI entry point for `mailrelay`.

use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};

use mailrelay::config::{self, ForwardPolicy, Settings};
use mailrelay::mailbox::imap::ImapConnector;
use mailrelay::notify::{CommandNotifier, LogNotifier, Notifications};
use mailrelay::pipeline::Forwarder;
use mailrelay::transport::smtp::SmtpConnector;

/// Forward attachments of unread mail to a fixed recipient.
///
/// What to forward is configured through environment variables
/// (EMAIL_USER, EMAIL_PASSWORD, RECIPIENT_EMAIL, IMAP_HOST, SMTP_HOST,
/// EXPECTED_SENDER, ATTACHMENT_FILENAME_PATTERN, SAME_SUBJECT, SAME_BODY,
/// SET_UNREAD, ...). Logging, timeouts and the notification command live in
/// the settings file ($MAILRELAY_CONFIG or ~/.config/mailrelay/config.toml).
#[derive(Parser)]
#[command(name = "mailrelay", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one forwarding pass (default)
    Run,
    /// Validate the configuration and print it without connecting
    CheckConfig {
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = config::load_settings();

    let log_level = match cli.verbose {
        0 => settings.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &settings);

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(&settings),
        Commands::CheckConfig { json } => cmd_check_config(&settings, json),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "mailrelay failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, settings: &Settings) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::log_dir(settings);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailrelay.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Build the notification fan-out from the settings.
fn notifications(settings: &Settings) -> Notifications {
    let sinks = Notifications::new().with(LogNotifier);
    match settings.notify.command.as_deref() {
        Some(command) if !command.trim().is_empty() => sinks.with(CommandNotifier::new(command)),
        _ => sinks,
    }
}

/// Run a single pass.
fn cmd_run(settings: &Settings) -> anyhow::Result<()> {
    let policy = ForwardPolicy::from_env()?;
    tracing::debug!(?policy, "Loaded forward policy");

    let forwarder = Forwarder::new(
        &policy,
        ImapConnector::new(&settings.network),
        SmtpConnector::new(&settings.network),
        notifications(settings),
    );

    let report = forwarder.run_pass()?;
    tracing::info!(
        forwarded = report.forwarded(),
        skipped = report.skipped(),
        failed = report.failed(),
        "Done"
    );
    Ok(())
}

/// Print the effective (redacted) configuration.
fn cmd_check_config(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let policy = ForwardPolicy::from_env()?;

    if json {
        let value = serde_json::json!({
            "policy": policy,
            "settings": settings,
            "settings_file": config::settings_file_path(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!();
    println!("  Provider:         {:?}", policy.provider);
    println!("  Mailbox:          {} (user {})", policy.imap, policy.credentials.user);
    println!("  Transport:        {}", policy.smtp);
    println!("  From / To:        {} -> {}", policy.sender, policy.recipient);
    println!(
        "  Expected sender:  {}",
        policy.expected_sender.as_deref().unwrap_or("(any)")
    );
    println!(
        "  Attachment glob:  {}",
        policy
            .attachment_pattern
            .as_ref()
            .map_or("(any)", |p| p.as_str())
    );
    println!("  Same subject:     {}", policy.same_subject);
    println!("  Same body:        {}", policy.same_body);
    println!("  Set unread:       {}", policy.set_unread);
    println!(
        "  Notify command:   {}",
        settings.notify.command.as_deref().unwrap_or("(none)")
    );
    println!();
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailrelay", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}
