//! targpg CLI - manage a password-protected tar archive.
//!
//! Every invocation opens one archive, applies the requested actions in a
//! fixed order (new password, add, remove, extract, list) and saves it
//! again if anything changed.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use zeroize::Zeroizing;

use targpg_archive::{AddOptions, ArchiveOptions, Interaction, PasswordSource, SecureArchive};
use targpg_common::Passphrase;
use targpg_crypto::KdfParams;

#[derive(Parser, Debug)]
#[command(name = "targpg")]
#[command(about = "Manage a password-protected archive of sensitive documents")]
#[command(version)]
struct Cli {
    /// Encrypted archive file.
    archive: PathBuf,

    /// Add files or directories to the archive.
    #[arg(short, long, num_args = 0.., action = ArgAction::Append, value_name = "FILE")]
    add: Option<Vec<PathBuf>>,

    /// Extract members; with no names, choose from a numbered list.
    #[arg(short, long, num_args = 0.., action = ArgAction::Append, value_name = "NAME")]
    extract: Option<Vec<String>>,

    /// Remove members from the archive.
    #[arg(short, long, num_args = 0.., action = ArgAction::Append, value_name = "NAME")]
    remove: Option<Vec<String>>,

    /// Create the archive without confirmation if it does not exist.
    #[arg(short, long)]
    create: bool,

    /// File holding the archive password.
    #[arg(short, long, value_name = "FILE")]
    passfile: Option<PathBuf>,

    /// List the contents of the archive.
    #[arg(short, long)]
    list: bool,

    /// Refuse to add a name that is already in the archive.
    #[arg(short = 'x', long, conflicts_with = "update")]
    unique: bool,

    /// Replace members that are added again instead of keeping both.
    #[arg(short, long)]
    update: bool,

    /// Directory to extract into.
    #[arg(short, long, default_value = ".", value_name = "DIR")]
    output: PathBuf,

    /// Read added paths relative to this directory (default: current).
    #[arg(short, long, value_name = "DIR")]
    directory: Option<PathBuf>,

    /// Change the archive password.
    #[arg(short, long)]
    newpass: bool,

    /// File holding the new password (implies --newpass).
    #[arg(long, value_name = "FILE")]
    new_passfile: Option<PathBuf>,

    /// Save to this file instead of the archive path.
    #[arg(long, value_name = "FILE")]
    save_as: Option<PathBuf>,

    /// KDF strength used when saving: "interactive", "moderate", or "sensitive".
    #[arg(short, long, default_value = "interactive")]
    strength: String,

    /// Gzip level used when saving.
    #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
    level: u32,

    /// Increase logging (repeat for more).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn log_level(&self) -> Level {
        if self.quiet {
            return Level::ERROR;
        }
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    fn changes_password(&self) -> bool {
        self.newpass || self.new_passfile.is_some()
    }

    /// Whether the archive must be saved after the actions ran.
    fn mutates(&self) -> bool {
        let adds = self.add.as_ref().is_some_and(|a| !a.is_empty());
        let removes = self.remove.as_ref().is_some_and(|r| !r.is_empty());
        adds || removes || self.changes_password()
    }
}

/// Interaction over stdin and stdout.
struct TerminalInteraction;

impl Interaction for TerminalInteraction {
    fn ask(&mut self, prompt: &str) -> targpg_common::Result<String> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", prompt)?;
        stdout.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn read_password(&mut self, prompt: &str) -> targpg_common::Result<Passphrase> {
        let password = Zeroizing::new(rpassword::prompt_password(prompt)?);
        Ok(Passphrase::new(password.as_str()))
    }

    fn show(&mut self, line: &str) -> targpg_common::Result<()> {
        writeln!(io::stdout(), "{}", line)?;
        Ok(())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(cli.log_level()).into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("targpg: cannot set up logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Open the archive, run the requested actions and save.
///
/// A failing action skips the save; the archive is closed either way.
fn run(cli: &Cli) -> Result<()> {
    let kdf_params = KdfParams::from_strength(&cli.strength).context("Invalid --strength")?;
    let options = ArchiveOptions::default()
        .with_autocreate(cli.create)
        .with_kdf_params(kdf_params)
        .with_compression_level(cli.level);

    let password = match &cli.passfile {
        Some(path) => PasswordSource::File(path.clone()),
        None => PasswordSource::Prompt,
    };

    let mut archive = SecureArchive::open(&cli.archive, &password, options, TerminalInteraction)
        .with_context(|| format!("Cannot open {}", cli.archive.display()))?;

    apply(&mut archive, cli)?;

    if cli.mutates() {
        let saved = archive
            .save(cli.save_as.as_deref())
            .context("Failed to save archive")?;
        debug!(path = %saved.display(), "Archive written");
    }

    archive.close();
    Ok(())
}

fn apply<I: Interaction>(archive: &mut SecureArchive<I>, cli: &Cli) -> Result<()> {
    if cli.changes_password() {
        let source = match &cli.new_passfile {
            Some(path) => PasswordSource::File(path.clone()),
            None => PasswordSource::Prompt,
        };
        archive
            .change_password(&source)
            .context("Failed to change password")?;
    }

    if let Some(files) = &cli.add {
        let options = AddOptions {
            unique: cli.unique,
            update: cli.update,
        };
        archive
            .add(files, cli.directory.as_deref(), options)
            .context("Failed to add files")?;
    }

    if let Some(names) = &cli.remove {
        archive.remove(names).context("Failed to remove members")?;
    }

    if let Some(names) = &cli.extract {
        archive
            .extract(names, &cli.output)
            .context("Failed to extract members")?;
    }

    if cli.list {
        archive.list().context("Failed to list archive")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::fs;
    use targpg_archive::ScriptedInteraction;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("targpg").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_repeated_lists_merge() {
        let cli = parse(&["secure.gpg", "-a", "one", "two", "-a", "three"]);
        assert_eq!(
            cli.add.unwrap(),
            vec![
                PathBuf::from("one"),
                PathBuf::from("two"),
                PathBuf::from("three")
            ]
        );
        assert!(cli.extract.is_none());
    }

    #[test]
    fn test_bare_extract_is_present_but_empty() {
        let cli = parse(&["secure.gpg", "-e"]);
        assert_eq!(cli.extract, Some(Vec::new()));
        assert!(!cli.mutates());
    }

    #[test]
    fn test_mutating_flags() {
        assert!(parse(&["secure.gpg", "-a", "f"]).mutates());
        assert!(parse(&["secure.gpg", "-r", "f"]).mutates());
        assert!(parse(&["secure.gpg", "-n"]).mutates());
        assert!(parse(&["secure.gpg", "--new-passfile", "p"]).mutates());
        assert!(!parse(&["secure.gpg", "-l", "-e", "f"]).mutates());
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(parse(&["secure.gpg"]).log_level(), Level::INFO);
        assert_eq!(parse(&["secure.gpg", "-v"]).log_level(), Level::DEBUG);
        assert_eq!(parse(&["secure.gpg", "-vv"]).log_level(), Level::TRACE);
        assert_eq!(parse(&["secure.gpg", "-q"]).log_level(), Level::ERROR);
    }

    #[test]
    fn test_invalid_level_rejected() {
        let result = Cli::try_parse_from(["targpg", "secure.gpg", "--level", "12"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_apply_runs_actions_in_order() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("b.txt"), "b").unwrap();
        let passfile = dir.path().join("pass");
        fs::write(&passfile, "password\n").unwrap();
        let archive_path = dir.path().join("secure.gpg");
        let out = dir.path().join("out");

        let cli = parse(&[
            archive_path.to_str().unwrap(),
            "-a",
            "a.txt",
            "b.txt",
            "-d",
            src.to_str().unwrap(),
            "-r",
            "a.txt",
            "-e",
            "b.txt",
            "-o",
            out.to_str().unwrap(),
            "-l",
        ]);

        let options = ArchiveOptions::default()
            .with_autocreate(true)
            .with_kdf_params(KdfParams {
                memory_cost: 1024,
                time_cost: 1,
                parallelism: 1,
            });
        let mut archive = SecureArchive::open(
            &archive_path,
            &PasswordSource::File(passfile),
            options,
            ScriptedInteraction::new(),
        )
        .unwrap();

        apply(&mut archive, &cli).unwrap();

        assert_eq!(archive.names().unwrap(), vec!["b.txt"]);
        assert_eq!(fs::read_to_string(out.join("b.txt")).unwrap(), "b");
        assert_eq!(archive.interaction().output().len(), 1);
    }
}
