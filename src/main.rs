//! `hubfs` command line: assembles the content engine (provider client,
//! façade, overlay router). The OS-side FUSE bridge that would hand VFS
//! callbacks to it is an external collaborator, not built here.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use hubfs::config::{AuthMode, CredentialHelper, GitCredentialFill, MountOptions};
use hubfs::error::{Error, Result};
use hubfs::facade::Facade;
use hubfs::overlay::{FacadeOpener, Router, ShardSeed};
use hubfs::pack::Credentials;
use hubfs::provider;
use hubfs::unionfs::Filesystem;

#[derive(Parser)]
#[command(name = "hubfs")]
#[command(about = "file system view of remote Git hosting providers")]
#[command(version)]
struct Cli {
    /// print product/version/copyright and exit
    #[arg(long = "version")]
    print_version: bool,

    /// enable verbose tracing
    #[arg(short = 'd')]
    debug: bool,

    /// how credentials are acquired: force|full|required|optional|none|git|token=T
    #[arg(long = "auth")]
    auth: Option<String>,

    /// keyring entry holding the token
    #[arg(long = "authkey")]
    authkey: Option<String>,

    /// acquire token and exit, without mounting
    #[arg(long = "authonly")]
    authonly: bool,

    /// disable the overlay scratch layer
    #[arg(long = "readonly")]
    readonly: bool,

    /// present refs with full refs/heads/... names
    #[arg(long = "fullrefs")]
    fullrefs: bool,

    /// include/exclude repository filter rules
    #[arg(long = "filter")]
    filter: Option<String>,

    /// FUSE mount options, key=value,...
    #[arg(short = 'o')]
    mount_options: Option<String>,

    /// provider name (e.g. github, gitlab); defaults to github
    remote: Option<String>,

    /// mount point
    mountpoint: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.print_version {
        println!("hubfs {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::new(filter)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(UsageError(msg)) => {
            eprintln!("usage error: {msg}");
            ExitCode::from(2)
        }
    }
}

struct UsageError(String);

fn run(cli: Cli) -> std::result::Result<(), UsageError> {
    let Some(mountpoint) = cli.mountpoint.clone() else {
        return Err(UsageError("missing mountpoint".into()));
    };

    let opts = match &cli.mount_options {
        Some(tokens) => MountOptions::parse(tokens).map_err(|e| UsageError(e.to_string()))?,
        None => MountOptions::default(),
    };

    match inner(cli, mountpoint, opts) {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

fn inner(cli: Cli, mountpoint: PathBuf, opts: MountOptions) -> Result<()> {
    let provider_name = cli.remote.as_deref().unwrap_or("github");
    if let Some(authkey) = &cli.authkey {
        tracing::debug!(%authkey, "keyring lookups are not implemented; using -auth directly");
    }
    let auth_mode = match &cli.auth {
        Some(s) => AuthMode::parse(s)?,
        None => AuthMode::Optional,
    };
    let filter_rules = match cli.filter.or(opts.filter) {
        Some(rules) => provider::FilterRules::parse(&rules)?,
        None => provider::FilterRules::empty(),
    };

    let token = acquire_token(provider_name, &auth_mode)?;
    if cli.authonly {
        tracing::info!(provider_name, "credentials acquired, exiting without mount");
        return Ok(());
    }

    let provider_cache = Arc::new(provider::build_with_filter(provider_name, token.clone(), filter_rules)?);

    let cache_dir = opts.cache_dir.unwrap_or_else(default_cache_dir);
    let fullrefs = cli.fullrefs || opts.fullrefs;
    let separator = '+';
    let credentials = token.map(|t| credentials_for(provider_name, t));

    let facade = Arc::new(Facade::new(provider_cache, cache_dir, separator, fullrefs, credentials));
    let opener = Box::new(FacadeShardOpener { facade: facade.clone(), separator, readonly: cli.readonly });
    let ttl = opts.ttl.unwrap_or(Duration::from_secs(300));
    let router = Router::new(facade.clone() as Arc<dyn Filesystem>, opener, 0, ttl);

    tracing::info!(?mountpoint, provider_name, shards = router.shard_count(), "content engine assembled; awaiting FUSE bridge");
    Ok(())
}

/// wires the overlay router's shard factory back to the façade.
struct FacadeShardOpener {
    facade: Arc<Facade>,
    separator: char,
    readonly: bool,
}

impl FacadeOpener for FacadeShardOpener {
    fn open(&self, prefix: &str) -> Option<ShardSeed> {
        if self.readonly {
            return None;
        }
        let parts: Vec<&str> = prefix.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).collect();
        let [owner, repo, refname] = parts[..] else { return None };
        let scratch_dir = self
            .facade
            .repo_cache_dir(owner, repo)
            .join("files")
            .join(refname.replace('/', &self.separator.to_string()));
        Some(ShardSeed { scratch_dir, readonly: self.facade.clone() })
    }
}

fn default_cache_dir() -> PathBuf {
    dirs_cache_root().join("hubfs")
}

fn dirs_cache_root() -> PathBuf {
    std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn credentials_for(provider_name: &str, token: String) -> Credentials {
    match provider_name {
        "gitlab" => Credentials::gitlab(token),
        _ => Credentials::github(token),
    }
}

fn acquire_token(provider_name: &str, mode: &AuthMode) -> Result<Option<String>> {
    match mode {
        AuthMode::None => Ok(None),
        AuthMode::Token(t) => Ok(Some(t.clone())),
        AuthMode::Git => GitCredentialFill.fill(provider_name).map(Some),
        AuthMode::Optional => Ok(GitCredentialFill.fill(provider_name).ok()),
        AuthMode::Required | AuthMode::Full | AuthMode::Force => {
            GitCredentialFill.fill(provider_name).map(Some).map_err(|_| {
                Error::Unauthorized(format!("no credentials available for {provider_name}"))
            })
        }
    }
}
