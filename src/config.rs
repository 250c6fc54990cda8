use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "agora", about = "Forum backend with realtime notifications")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
    pub hub: HubConfig,
    pub posts: PostsConfig,
    pub auth: AuthConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Redis,
    /// In-process store; nothing survives a restart.
    Memory,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// Default: redis.
    pub backend: CacheBackendKind,
    /// Default: redis://127.0.0.1:6379.
    pub redis_url: String,
    /// Default: 1000ms.
    pub connect_timeout_ms: u64,
    /// Lifetime of a cached post summary. Default: 7 days.
    pub summary_ttl_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of transport partitions, one consumer task each. Default: 2.
    pub partitions: usize,
    /// Bounded queue length per partition. Default: 1024.
    pub queue_capacity: usize,
    /// Failed intents kept for inspection. Default: 256.
    pub dead_letter_capacity: usize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HubConfig {
    /// Pending commands the hub loop accepts before callers wait. Default: 1024.
    pub command_buffer: usize,
    /// Per-connection outbound queue length. Default: 256.
    pub outbound_buffer: usize,
    /// Offline messages kept per recipient; oldest evicted first. Default: 100.
    pub mailbox_capacity: usize,
    /// Offline messages older than this are dropped. Default: 1 day.
    pub mailbox_ttl_secs: u64,
    /// Deadline for a single websocket write. Default: 10s.
    pub write_wait_secs: u64,
    /// Read-side idle timeout. Default: 60s.
    pub pong_wait_secs: u64,
    /// Heartbeat period, must be shorter than `pong_wait_secs`. Default: 54s.
    pub ping_interval_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PostsConfig {
    /// Delay before the second cache delete of a post update. Default: 2000ms.
    pub delayed_delete_ms: u64,
    /// Pending delayed deletes before new ones are applied immediately. Default: 1024.
    pub invalidation_backlog: usize,
    /// Characters kept in a post summary. Default: 100.
    pub summary_length: usize,
    pub default_page_size: i64,
    pub max_page_size: i64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub session_hours: u64,
    /// Usernames granted operator access at startup. Default: none.
    pub admins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Redis,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout_ms: 1000,
            summary_ttl_secs: 7 * 24 * 3600,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            partitions: 2,
            queue_capacity: 1024,
            dead_letter_capacity: 256,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_buffer: 1024,
            outbound_buffer: 256,
            mailbox_capacity: 100,
            mailbox_ttl_secs: 24 * 3600,
            write_wait_secs: 10,
            pong_wait_secs: 60,
            ping_interval_secs: 54,
        }
    }
}

impl Default for PostsConfig {
    fn default() -> Self {
        Self {
            delayed_delete_ms: 2000,
            invalidation_backlog: 1024,
            summary_length: 100,
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_hours: 720,
            admins: Vec::new(),
        }
    }
}

impl CacheConfig {
    pub fn summary_ttl(&self) -> Duration {
        Duration::from_secs(self.summary_ttl_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl HubConfig {
    pub fn mailbox_ttl(&self) -> Duration {
        Duration::from_secs(self.mailbox_ttl_secs)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

impl PostsConfig {
    pub fn delayed_delete(&self) -> Duration {
        Duration::from_millis(self.delayed_delete_ms)
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("agora.db"));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.hub.ping_interval_secs == 0
            || self.hub.ping_interval_secs >= self.hub.pong_wait_secs
        {
            anyhow::bail!(
                "hub.ping_interval_secs ({}) must be non-zero and shorter than hub.pong_wait_secs ({})",
                self.hub.ping_interval_secs,
                self.hub.pong_wait_secs
            );
        }
        if self.pipeline.partitions == 0 || self.pipeline.queue_capacity == 0 {
            anyhow::bail!("pipeline.partitions and pipeline.queue_capacity must be positive");
        }
        if self.posts.default_page_size <= 0 || self.posts.max_page_size <= 0 {
            anyhow::bail!("posts page sizes must be positive");
        }
        Ok(())
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".agora")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("agora.db"))
    }
}
