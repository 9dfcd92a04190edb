use std::env;
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<Config> = OnceLock::new();

// --- CONFIG AGGREGATOR ---

#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerConfig,
    pub memory_broker: MemoryBrokerConfig,
    pub log: LogConfig,
}

impl Config {
    pub fn global() -> &'static Config {
        CONFIG.get_or_init(Self::load)
    }

    fn load() -> Self {
        dotenv::dotenv().ok();
        Self {
            broker: BrokerConfig::load(),
            memory_broker: MemoryBrokerConfig::load(),
            log: LogConfig::load(),
        }
    }
}

// --- MODULES ---

// BROKER (consumer + producer side)
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub hosts: String,
    /// A too low wait makes the consumer receive a stream of empty fetches
    /// and back off on its own, waiting longer than this between polls.
    pub fetch_wait_max_ms: u64,
    pub connect_timeout_ms: u64,
    pub connect_retries: u32,
    /// Suffix of the consumer group id. Required to create a cache.
    pub group_suffix: Option<String>,
    /// 0 disables consumer stats events.
    pub stats_interval_ms: u64,
}

impl BrokerConfig {
    fn load() -> Self {
        Self {
            hosts:              get_env("KAFKA_CACHE_BROKERS", "localhost:9092"),
            fetch_wait_max_ms:  get_env("KAFKA_CACHE_FETCH_WAIT_MS", "50"),
            connect_timeout_ms: get_env("KAFKA_CACHE_CONNECT_TIMEOUT_MS", "5000"),
            connect_retries:    get_env("KAFKA_CACHE_CONNECT_RETRIES", "5"),
            group_suffix:       env::var("KAFKA_CACHE_GROUP_SUFFIX").ok().filter(|s| !s.trim().is_empty()),
            stats_interval_ms:  get_env("KAFKA_CACHE_STATS_INTERVAL_MS", "0"),
        }
    }

    pub fn fetch_wait_max(&self) -> Duration {
        Duration::from_millis(self.fetch_wait_max_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_ms > 0).then(|| Duration::from_millis(self.stats_interval_ms))
    }

    /// `kafka-cache-<suffix>`, or `None` when no suffix is configured.
    pub fn group_id(&self) -> Option<String> {
        self.group_suffix
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("kafka-cache-{}", s))
    }
}

// IN-MEMORY BROKER
#[derive(Debug, Clone)]
pub struct MemoryBrokerConfig {
    pub max_message_bytes: usize,
    pub fetch_batch: usize,
    pub actor_channel_capacity: usize,
    pub auto_create_topics: bool,
}

impl MemoryBrokerConfig {
    fn load() -> Self {
        Self {
            max_message_bytes:      get_env("MEMORY_BROKER_MAX_MESSAGE_BYTES", "1048576"), // 1MB
            fetch_batch:            get_env("MEMORY_BROKER_FETCH_BATCH", "500"),
            actor_channel_capacity: get_env("MEMORY_BROKER_ACTOR_CHAN_CAP", "10000"),
            auto_create_topics:     get_env("MEMORY_BROKER_AUTO_CREATE", "false"),
        }
    }
}

impl Default for MemoryBrokerConfig {
    fn default() -> Self {
        Config::global().memory_broker.clone()
    }
}

// LOGGING
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
}

impl LogConfig {
    fn load() -> Self {
        Self {
            level: get_env("KAFKA_CACHE_LOG_LEVEL", "debug"),
        }
    }
}

// --- PRIVATE HELPER ---

fn get_env<T: std::str::FromStr>(key: &str, default: &str) -> T {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            eprintln!("Config error: {} must be valid (got '{}'), using '{}'", key, raw, default);
            // Defaults above are literals that always parse.
            default.parse().unwrap_or_else(|_| panic!("invalid default for {}", key))
        }
    }
}
