//! Command-line client for publishing static sites to quay.

mod api_client;
mod bundle;

use anyhow::{Context, Result};
use api_client::{ApiClient, ChunkFile, UploadChunk};
use bundle::{BundleFile, collect_files, plan_chunks};
use clap::{Args, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use quay_core::{FinalizeRequest, SiteId, SiteSummary};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const DEFAULT_CHUNK_FILES: usize = 50;
const DEFAULT_CHUNK_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "quayctl")]
#[command(about = "Publish and manage static sites on a quay server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Server URL (overrides client config and QUAY_SERVER)
    #[arg(long)]
    server: Option<String>,

    /// Bearer token (overrides client config and QUAY_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Client config file path
    #[arg(long, env = "QUAY_CLIENT_CONFIG")]
    client_config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a built site directory and finalize it
    Push {
        /// Directory holding the built bundle (e.g. build/ or dist/)
        dir: PathBuf,
        /// Add to or replace an existing site
        #[arg(long)]
        site_id: Option<String>,
        /// Display name for the site
        #[arg(long)]
        name: Option<String>,
        /// Skip chunks the server already acknowledged for --site-id
        #[arg(long, default_value_t = false, requires = "site_id")]
        resume: bool,
        /// Send everything in a single request instead of chunks
        #[arg(long, default_value_t = false, conflicts_with = "resume")]
        direct: bool,
        /// Maximum files per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_FILES)]
        chunk_files: usize,
        /// Byte budget per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_BYTES)]
        chunk_bytes: u64,
        /// Fail instead of finalizing when chunks are missing
        #[arg(long, default_value_t = false)]
        require_complete: bool,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Show a site record and any unfinished upload
    Status {
        site_id: String,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Delete a site and all of its files
    Delete {
        site_id: String,
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Check server health and version
    Health {
        #[command(flatten)]
        api: ApiArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Push {
            dir,
            site_id,
            name,
            resume,
            direct,
            chunk_files,
            chunk_bytes,
            require_complete,
            api,
        } => {
            let options = PushOptions {
                site_id,
                name,
                resume,
                direct,
                chunk_files,
                chunk_bytes,
                require_complete,
            };
            handle_push_command(&dir, options, &api).await
        }
        Commands::Status { site_id, api } => handle_status_command(&site_id, &api).await,
        Commands::Delete { site_id, api } => handle_delete_command(&site_id, &api).await,
        Commands::Health { api } => handle_health_command(&api).await,
    }
}

#[derive(Debug, serde::Deserialize, Default)]
#[serde(default)]
struct ClientConfig {
    server: Option<String>,
    token: Option<String>,
}

struct ClientSettings {
    server: String,
    token: Option<String>,
}

/// Flags win over `QUAY_SERVER`/`QUAY_TOKEN`, which win over the config file.
fn resolve_client_settings(api: &ApiArgs) -> Result<ClientSettings> {
    let config_path = client_config_path(api.client_config.as_deref())?;
    let config = load_client_config(&config_path)?;

    let server = api.server.clone().or(config.server).ok_or_else(|| {
        anyhow::anyhow!(
            "no server configured: use --server, QUAY_SERVER or `server` in {}",
            config_path.display()
        )
    })?;
    Ok(ClientSettings {
        server: normalize_base_url(&server)?,
        token: api.token.clone().or(config.token),
    })
}

fn get_api_client(api: &ApiArgs) -> Result<(ApiClient, String)> {
    let settings = resolve_client_settings(api)?;
    let client = ApiClient::new(&settings.server, settings.token.as_deref())?;
    Ok((client, settings.server))
}

fn client_config_path(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }

    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(path) => PathBuf::from(path),
        None => {
            let home = std::env::var_os("HOME")
                .ok_or_else(|| anyhow::anyhow!("HOME not set; set QUAY_CLIENT_CONFIG"))?;
            PathBuf::from(home).join(".config")
        }
    };

    Ok(base.join("quay").join("client.toml"))
}

fn load_client_config(path: &Path) -> Result<ClientConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("QUAY_").only(&["server", "token"]));

    figment
        .extract()
        .context("failed to load client configuration")
}

fn normalize_base_url(url: &str) -> Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("server URL must start with http:// or https://");
    }
    Ok(url.trim_end_matches('/').to_string())
}

/// Absolute site URL; servers without a public URL report a path.
fn absolute_url(base_url: &str, url: &str) -> String {
    if url.starts_with('/') {
        format!("{base_url}{url}")
    } else {
        url.to_string()
    }
}

struct PushOptions {
    site_id: Option<String>,
    name: Option<String>,
    resume: bool,
    direct: bool,
    chunk_files: usize,
    chunk_bytes: u64,
    require_complete: bool,
}

async fn handle_push_command(dir: &Path, options: PushOptions, api: &ApiArgs) -> Result<()> {
    let (client, base_url) = get_api_client(api)?;

    let files = collect_files(dir)?;
    if files.is_empty() {
        anyhow::bail!("{} contains no files to upload", dir.display());
    }
    let total_bytes: u64 = files.iter().map(|f| f.size).sum();
    println!(
        "Uploading {} files ({}) from {}",
        files.len(),
        format_bytes(total_bytes),
        dir.display()
    );

    if let Some(site_id) = &options.site_id {
        SiteId::parse(site_id).with_context(|| format!("invalid --site-id {site_id}"))?;
    }

    if options.direct {
        let chunk = UploadChunk {
            site_id: options.site_id.clone(),
            site_name: options.name.clone(),
            chunk: None,
            files: read_chunk_files(&files).await?,
        };
        let result = client.upload_chunk(&chunk).await?;
        report_failures(&result.results);
        print_site(&base_url, &result.site);
        println!("Complete: {}", yes_no(result.complete));
        return Ok(());
    }

    let chunks = plan_chunks(&files, options.chunk_files, options.chunk_bytes);
    let total_chunks = u32::try_from(chunks.len()).context("too many chunks")?;

    let mut site_id = options.site_id.clone();
    let mut already_received = BTreeSet::new();
    if options.resume
        && let Some(id) = &site_id
    {
        match client.upload_session(id).await? {
            Some(session) if session.total_chunks == total_chunks => {
                already_received = session.received_chunks.into_iter().collect();
                println!(
                    "Resuming: {} of {} chunks already uploaded",
                    already_received.len(),
                    total_chunks
                );
            }
            Some(session) => {
                eprintln!(
                    "Warning: server session expects {} chunks but this bundle has {}; uploading everything",
                    session.total_chunks, total_chunks
                );
            }
            None => println!("No upload session on the server; uploading everything"),
        }
    }

    let mut failed_files = 0u64;
    for (index, chunk_files) in chunks.iter().enumerate() {
        let chunk_number = index as u32 + 1;
        if already_received.contains(&chunk_number) {
            continue;
        }
        let chunk = UploadChunk {
            site_id: site_id.clone(),
            site_name: options.name.clone(),
            chunk: Some((chunk_number, total_chunks)),
            files: read_chunk_files(chunk_files).await?,
        };
        let result = client
            .upload_chunk(&chunk)
            .await
            .with_context(|| format!("chunk {chunk_number}/{total_chunks} failed"))?;

        failed_files += result.files_failed;
        report_failures(&result.results);
        println!(
            "  chunk {chunk_number}/{total_chunks}: {} files stored",
            result.files_received - result.files_failed
        );
        site_id.get_or_insert_with(|| result.site_id.to_string());
    }

    let site_id = match site_id {
        Some(id) => SiteId::parse(&id)?,
        None => anyhow::bail!("server did not assign a site id"),
    };
    let finalized = client
        .finalize(&FinalizeRequest {
            site_id,
            site_name: options.name.clone(),
            total_files: Some(files.len() as u64),
            require_complete: options.require_complete,
        })
        .await?;

    print_site(&base_url, &finalized.site);
    println!("Complete: {}", yes_no(finalized.complete));
    if !finalized.complete || failed_files > 0 {
        eprintln!(
            "Warning: upload incomplete ({failed_files} files failed); rerun with --resume --site-id {}",
            finalized.site.id
        );
    }
    Ok(())
}

async fn read_chunk_files(files: &[BundleFile]) -> Result<Vec<ChunkFile>> {
    let mut out = Vec::with_capacity(files.len());
    for file in files {
        let data = tokio::fs::read(&file.path)
            .await
            .with_context(|| format!("failed to read {}", file.path.display()))?;
        out.push(ChunkFile {
            path: file.relative.clone(),
            data,
        });
    }
    Ok(out)
}

fn report_failures(results: &[quay_core::FileWriteResult]) {
    for result in results.iter().filter(|r| !r.success) {
        eprintln!(
            "  failed: {} ({})",
            result.path,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
}

fn print_site(base_url: &str, site: &SiteSummary) {
    println!("Site: {}", site.id);
    println!("  name: {}", site.name);
    println!("  status: {}", site.status);
    println!("  files: {}", site.file_count);
    println!("  url: {}", absolute_url(base_url, &site.url));
    if let Some(storage_url) = &site.storage_url {
        println!("  storage: {storage_url}");
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

async fn handle_status_command(site_id: &str, api: &ApiArgs) -> Result<()> {
    let (client, base_url) = get_api_client(api)?;

    match client.get_site(site_id).await {
        Ok(site) => print_site(&base_url, &site),
        Err(e) => println!("No site record: {e}"),
    }

    if let Some(session) = client.upload_session(site_id).await? {
        println!(
            "Upload in progress: {}/{} chunks received, {} files written",
            session.received_chunks.len(),
            session.total_chunks,
            session.files_written
        );
    }
    Ok(())
}

async fn handle_delete_command(site_id: &str, api: &ApiArgs) -> Result<()> {
    let (client, _) = get_api_client(api)?;
    let deleted = client.delete_site(site_id).await?;
    println!(
        "Deleted {} ({} objects)",
        deleted.site_id, deleted.objects_deleted
    );
    Ok(())
}

async fn handle_health_command(api: &ApiArgs) -> Result<()> {
    let (client, _) = get_api_client(api)?;
    let health = client.health().await?;

    println!("Status: {}", health.status);
    println!("Server version: {}", health.version);
    println!("Client version: {}", env!("CARGO_PKG_VERSION"));

    if health.version != env!("CARGO_PKG_VERSION") {
        eprintln!(
            "Warning: version mismatch (server: {}, client: {})",
            health.version,
            env!("CARGO_PKG_VERSION")
        );
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://sites.example.com/").unwrap(),
            "https://sites.example.com"
        );
        assert!(normalize_base_url("sites.example.com").is_err());
    }

    #[test]
    fn test_absolute_url() {
        assert_eq!(
            absolute_url("http://localhost:8080", "/sites/s1/proxy/"),
            "http://localhost:8080/sites/s1/proxy/"
        );
        assert_eq!(
            absolute_url("http://localhost:8080", "https://cdn.example/sites/s1/proxy/"),
            "https://cdn.example/sites/s1/proxy/"
        );
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_client_config_file_and_flag_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(&path, "server = \"http://from-file:8080/\"\ntoken = \"file-token\"\n")
            .unwrap();

        let api = ApiArgs {
            server: None,
            token: Some("flag-token".to_string()),
            client_config: Some(path.to_string_lossy().into_owned()),
        };
        let settings = resolve_client_settings(&api).unwrap();
        assert_eq!(settings.token.as_deref(), Some("flag-token"));
        if std::env::var_os("QUAY_SERVER").is_none() {
            assert_eq!(settings.server, "http://from-file:8080");
        }
    }
}
